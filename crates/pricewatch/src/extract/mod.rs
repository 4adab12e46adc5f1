//! Sold-price extraction from a rendered results page.
//!
//! [`PageExtractor`] navigates to the marketplace's sold/completed search
//! for a query and runs an ordered list of [`ExtractionTier`]s. The first
//! tier that produces at least `min_usable` candidates wins outright. When
//! none does, the cascade keeps everything it found, dropping values from a
//! later tier that an earlier tier already produced.
//!
//! Nothing here fails past the component boundary: navigation timeouts,
//! selector errors and unreadable pages all end as an empty (or partial)
//! candidate list with the reason recorded in the [`DebugTrace`].

pub mod selectors;
pub mod tiers;
pub mod trace;

pub use selectors::SelectorSet;
pub use tiers::{ExtractionTier, TierOutcome, DEFAULT_TIERS};
pub use trace::{DebugTrace, TierAttempt};

use crate::config::{
    Config, DEFAULT_MARKET_URL, DEFAULT_NAV_TIMEOUT_MS, DEFAULT_WAIT_TIMEOUT_MS, USABLE_CANDIDATES,
};
use crate::query::Query;
use crate::renderer::RenderContext;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};
use url::Url;

/// Which tier and selector produced a candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionMethod {
    pub tier: ExtractionTier,
    pub selector: Option<String>,
}

/// An unvalidated price found on the page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceCandidate {
    pub raw_text: String,
    /// Amount matched in `raw_text`, before range filtering.
    pub numeric_value: Option<f64>,
    pub extraction_method: ExtractionMethod,
}

/// Extractor settings.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub market_url: String,
    pub nav_timeout_ms: u64,
    pub wait_timeout_ms: u64,
    pub min_usable: usize,
    pub tiers: Vec<ExtractionTier>,
    pub selectors: SelectorSet,
    /// Where diagnostic snapshots go; `None` disables them.
    pub snapshot_dir: Option<PathBuf>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            market_url: DEFAULT_MARKET_URL.to_string(),
            nav_timeout_ms: DEFAULT_NAV_TIMEOUT_MS,
            wait_timeout_ms: DEFAULT_WAIT_TIMEOUT_MS,
            min_usable: USABLE_CANDIDATES,
            tiers: DEFAULT_TIERS.to_vec(),
            selectors: SelectorSet::default(),
            snapshot_dir: None,
        }
    }
}

impl From<&Config> for ExtractorConfig {
    fn from(config: &Config) -> Self {
        Self {
            market_url: config.market_url.clone(),
            nav_timeout_ms: config.nav_timeout_ms,
            wait_timeout_ms: config.wait_timeout_ms,
            snapshot_dir: config.snapshot_dir.clone(),
            ..Self::default()
        }
    }
}

/// Candidates for one query plus how they were found.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub candidates: Vec<PriceCandidate>,
    pub trace: DebugTrace,
}

/// Drives one render context through the tier cascade.
#[derive(Debug, Clone, Default)]
pub struct PageExtractor {
    config: ExtractorConfig,
}

impl PageExtractor {
    /// Extractor with the given settings.
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    /// Sold/completed listings search URL for a query.
    pub fn search_url(&self, query: &Query) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(&self.config.market_url)?;
        url.query_pairs_mut()
            .append_pair("_nkw", query.as_str())
            .append_pair("LH_Sold", "1")
            .append_pair("LH_Complete", "1")
            .append_pair("_ipg", "120");
        Ok(url)
    }

    /// Navigate to the search page for `query` and collect price candidates.
    pub async fn extract(&self, ctx: &mut dyn RenderContext, query: &Query) -> Extraction {
        let start = Instant::now();

        let url = match self.search_url(query) {
            Ok(url) => url,
            Err(e) => {
                let mut trace = DebugTrace::new(self.config.market_url.clone());
                trace.error(format!("invalid market URL: {e}"));
                return Extraction {
                    candidates: Vec::new(),
                    trace,
                };
            }
        };
        let mut trace = DebugTrace::new(url.as_str());

        match ctx.navigate(url.as_str(), self.config.nav_timeout_ms).await {
            Ok(nav) => trace.navigation = Some(nav),
            Err(e) => {
                warn!(%query, "navigation failed: {e:#}");
                trace.error(format!("navigation failed: {e:#}"));
                self.capture_snapshot(ctx, query, &mut trace).await;
                trace.elapsed_ms = start.elapsed().as_millis() as u64;
                return Extraction {
                    candidates: Vec::new(),
                    trace,
                };
            }
        }

        let any_container = self.config.selectors.any_container();
        match ctx
            .wait_for_selector(&any_container, self.config.wait_timeout_ms)
            .await
        {
            Ok(true) => {}
            Ok(false) => trace.note(format!(
                "no listing containers after {}ms",
                self.config.wait_timeout_ms
            )),
            Err(e) => trace.error(format!("waiting for listings failed: {e:#}")),
        }

        let candidates = self.run_cascade(&*ctx, &mut trace).await;

        if candidates.is_empty() {
            self.capture_snapshot(ctx, query, &mut trace).await;
        }
        trace.elapsed_ms = start.elapsed().as_millis() as u64;

        info!(
            %query,
            tier = trace.tier_used.map(|t| t.as_str()).unwrap_or("merged"),
            candidates = candidates.len(),
            elapsed_ms = trace.elapsed_ms,
            "extraction finished"
        );

        Extraction { candidates, trace }
    }

    /// Run tiers in order against an already-loaded page.
    pub async fn run_cascade(&self, ctx: &dyn RenderContext, trace: &mut DebugTrace) -> Vec<PriceCandidate> {
        let mut below_threshold: Vec<TierOutcome> = Vec::new();

        for tier in &self.config.tiers {
            let outcome = tier.run(ctx, &self.config.selectors, trace).await;
            trace.attempts.push(outcome.attempt.clone());

            if outcome.candidates.len() >= self.config.min_usable {
                trace.tier_used = Some(*tier);
                return outcome.candidates;
            }
            if !outcome.candidates.is_empty() {
                trace.note(format!(
                    "{tier} found {} candidates, below the usable threshold of {}",
                    outcome.candidates.len(),
                    self.config.min_usable
                ));
            }
            below_threshold.push(outcome);
        }

        let merged = merge_tiers(below_threshold);
        trace.merged_tiers = !merged.is_empty();
        merged
    }

    async fn capture_snapshot(&self, ctx: &dyn RenderContext, query: &Query, trace: &mut DebugTrace) {
        let Some(dir) = &self.config.snapshot_dir else {
            return;
        };
        match ctx.snapshot(dir, query.as_str()).await {
            Ok(path) => {
                info!(%query, path = %path.display(), "saved diagnostic snapshot");
                trace.snapshot = Some(path);
            }
            Err(e) => trace.error(format!("snapshot failed: {e:#}")),
        }
    }
}

/// Concatenate tier results in order. Within a tier every candidate is kept;
/// a later tier contributes only amounts no earlier tier produced.
fn merge_tiers(outcomes: Vec<TierOutcome>) -> Vec<PriceCandidate> {
    let mut merged: Vec<PriceCandidate> = Vec::new();
    for outcome in outcomes {
        let earlier: Vec<Option<f64>> = merged.iter().map(|c| c.numeric_value).collect();
        merged.extend(
            outcome
                .candidates
                .into_iter()
                .filter(|c| !earlier.contains(&c.numeric_value)),
        );
    }
    merged
}
