//! Extraction strategies, tried in order by the cascade.

use super::selectors::SelectorSet;
use super::trace::{DebugTrace, TierAttempt};
use super::{ExtractionMethod, PriceCandidate};
use crate::normalize::{match_amount, parse_amount};
use crate::renderer::RenderContext;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;
use tracing::debug;

/// Currency-prefixed amount anywhere in the page markup.
static MARKUP_PRICE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\s?(\d{1,3}(?:,\d{3})+(?:\.\d{1,2})?|\d+(?:\.\d{1,2})?)")
        .expect("markup price regex is valid")
});

/// One strategy in the fallback cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionTier {
    /// Listing containers first, then one price inside each.
    ItemScoped,
    /// Price-like elements anywhere on the page.
    GlobalElements,
    /// Regex over the raw markup.
    TextPattern,
}

/// The default cascade order.
pub const DEFAULT_TIERS: [ExtractionTier; 3] = [
    ExtractionTier::ItemScoped,
    ExtractionTier::GlobalElements,
    ExtractionTier::TextPattern,
];

impl ExtractionTier {
    /// Name used in traces and entry metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionTier::ItemScoped => "item_scoped",
            ExtractionTier::GlobalElements => "global_elements",
            ExtractionTier::TextPattern => "text_pattern",
        }
    }

    /// How much a candidate from this tier can be trusted to be a sold price.
    pub fn confidence(&self) -> f32 {
        match self {
            ExtractionTier::ItemScoped => 0.9,
            ExtractionTier::GlobalElements => 0.6,
            ExtractionTier::TextPattern => 0.3,
        }
    }

    /// Run this strategy against the current page.
    ///
    /// Query failures are written to `trace` and skipped; they never escape.
    pub async fn run(
        &self,
        ctx: &dyn RenderContext,
        selectors: &SelectorSet,
        trace: &mut DebugTrace,
    ) -> TierOutcome {
        let outcome = match self {
            ExtractionTier::ItemScoped => item_scoped(ctx, selectors, trace).await,
            ExtractionTier::GlobalElements => global_elements(ctx, selectors, trace).await,
            ExtractionTier::TextPattern => text_pattern(ctx, trace).await,
        };
        debug!(
            tier = self.as_str(),
            selector = outcome.attempt.selector.as_deref().unwrap_or("-"),
            matched = outcome.attempt.elements_matched,
            candidates = outcome.candidates.len(),
            "tier finished"
        );
        outcome
    }
}

impl fmt::Display for ExtractionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Candidates produced by one tier plus its trace entry.
#[derive(Debug, Clone)]
pub struct TierOutcome {
    pub candidates: Vec<PriceCandidate>,
    pub attempt: TierAttempt,
}

impl TierOutcome {
    fn new(tier: ExtractionTier) -> Self {
        Self {
            candidates: Vec::new(),
            attempt: TierAttempt {
                tier,
                selector: None,
                elements_matched: 0,
                candidates: 0,
                confidence: tier.confidence(),
            },
        }
    }

    fn push(&mut self, raw_text: String, selector: Option<String>) -> bool {
        let Some(amount) = match_amount(&raw_text) else {
            return false;
        };
        let numeric_value = parse_amount(amount);
        self.candidates.push(PriceCandidate {
            raw_text,
            numeric_value,
            extraction_method: ExtractionMethod {
                tier: self.attempt.tier,
                selector,
            },
        });
        self.attempt.candidates = self.candidates.len();
        true
    }
}

async fn item_scoped(ctx: &dyn RenderContext, selectors: &SelectorSet, trace: &mut DebugTrace) -> TierOutcome {
    let mut outcome = TierOutcome::new(ExtractionTier::ItemScoped);

    for container_sel in &selectors.containers {
        let containers = match ctx.query_selector_all(container_sel, None).await {
            Ok(found) => found,
            Err(e) => {
                trace.error(format!("item_scoped: query {container_sel} failed: {e:#}"));
                continue;
            }
        };
        if containers.is_empty() {
            continue;
        }

        // The first container layout that matches is the page's layout.
        outcome.attempt.selector = Some(container_sel.clone());
        outcome.attempt.elements_matched = containers.len();

        for container in containers {
            for price_sel in &selectors.item_price {
                let prices = match ctx.query_selector_all(price_sel, Some(container)).await {
                    Ok(found) => found,
                    Err(e) => {
                        trace.error(format!("item_scoped: query {price_sel} failed: {e:#}"));
                        continue;
                    }
                };
                let Some(first) = prices.first() else {
                    continue;
                };
                let text = match ctx.inner_text(*first).await {
                    Ok(Some(text)) => text,
                    Ok(None) => continue,
                    Err(e) => {
                        trace.error(format!("item_scoped: reading {price_sel} failed: {e:#}"));
                        continue;
                    }
                };
                if outcome.push(text, Some(format!("{container_sel} {price_sel}"))) {
                    break;
                }
            }
        }
        return outcome;
    }

    outcome
}

async fn global_elements(
    ctx: &dyn RenderContext,
    selectors: &SelectorSet,
    trace: &mut DebugTrace,
) -> TierOutcome {
    let mut outcome = TierOutcome::new(ExtractionTier::GlobalElements);

    for price_sel in &selectors.global_price {
        let elements = match ctx.query_selector_all(price_sel, None).await {
            Ok(found) => found,
            Err(e) => {
                trace.error(format!("global_elements: query {price_sel} failed: {e:#}"));
                continue;
            }
        };
        if elements.is_empty() {
            continue;
        }

        let matched = elements.len();
        for element in elements {
            match ctx.inner_text(element).await {
                Ok(Some(text)) => {
                    outcome.push(text, Some(price_sel.clone()));
                }
                Ok(None) => {}
                Err(e) => trace.error(format!("global_elements: reading {price_sel} failed: {e:#}")),
            }
        }

        // Stop at the first selector that yields prices; later selectors
        // mostly re-match the same nodes through broader patterns.
        if !outcome.candidates.is_empty() {
            outcome.attempt.selector = Some(price_sel.clone());
            outcome.attempt.elements_matched = matched;
            break;
        }
    }

    outcome
}

async fn text_pattern(ctx: &dyn RenderContext, trace: &mut DebugTrace) -> TierOutcome {
    let mut outcome = TierOutcome::new(ExtractionTier::TextPattern);

    let markup = match ctx.content().await {
        Ok(markup) => markup,
        Err(e) => {
            trace.error(format!("text_pattern: reading page content failed: {e:#}"));
            return outcome;
        }
    };

    for m in MARKUP_PRICE_RE.find_iter(&markup) {
        outcome.attempt.elements_matched += 1;
        outcome.push(m.as_str().to_string(), None);
    }
    outcome
}
