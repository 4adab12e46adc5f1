//! Query pipelines and the three ways of running them.
//!
//! A pipeline is extract → normalize → summarize, optionally followed by a
//! sync. [`BatchOrchestrator`] runs one query inline, many queries behind
//! a concurrency gate, or a whole catalog one query at a time with a pause
//! in between. Whatever goes wrong inside one pipeline ends up in that
//! query's [`QueryOutcome`]; it never aborts the rest of the run.

use crate::audit::{RunLedger, RunMode};
use crate::catalog::Catalog;
use crate::config::{clamp_concurrency, DEFAULT_MAX_CONCURRENT, MAX_BATCH_QUERIES, MAX_CONCURRENT_CEILING};
use crate::error::BatchError;
use crate::extract::{DebugTrace, PageExtractor};
use crate::normalize::{PriceNormalizer, PriceSample};
use crate::pool::ContextPool;
use crate::query::Query;
use crate::renderer::{RenderContext, Renderer};
use crate::stats::PriceStatistics;
use crate::sync::{RecordSynchronizer, SyncOutcome, SyncStatus};
use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What one pipeline produced for one query.
#[derive(Debug, Clone, Serialize)]
pub struct ScrapeResult {
    pub query: Query,
    pub sample: PriceSample,
    pub statistics: PriceStatistics,
    pub debug_trace: DebugTrace,
    pub timestamp: DateTime<Utc>,
}

impl ScrapeResult {
    /// Compute statistics for `sample` and stamp the result.
    pub fn new(query: Query, sample: PriceSample, debug_trace: DebugTrace) -> Self {
        let statistics = PriceStatistics::from_sample(&sample);
        Self {
            query,
            sample,
            statistics,
            debug_trace,
            timestamp: Utc::now(),
        }
    }
}

/// Per-call switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Sync results to the record store.
    pub store: bool,
    /// Include the debug trace in the report.
    pub debug: bool,
}

/// Caller-facing report for one query.
#[derive(Debug, Clone, Serialize)]
pub struct ScrapeReport {
    pub query: String,
    /// Accepted prices in extraction order.
    pub prices: Vec<f64>,
    pub prices_sorted: Vec<f64>,
    pub average: f64,
    pub median_price: f64,
    pub lowest_price: f64,
    pub highest_price: f64,
    pub price_range: f64,
    pub price_count: usize,
    pub timestamp: DateTime<Utc>,
    pub sync_status: SyncStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_result: Option<SyncOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<DebugTrace>,
}

impl ScrapeReport {
    /// Flatten a result into its report; the trace is kept only with `debug`.
    pub fn new(result: ScrapeResult, storage: Option<SyncOutcome>, debug: bool) -> Self {
        let stats = result.statistics;
        Self {
            query: result.query.to_string(),
            prices: result.sample.values().to_vec(),
            prices_sorted: stats.sorted,
            average: stats.average,
            median_price: stats.median,
            lowest_price: stats.min,
            highest_price: stats.max,
            price_range: stats.range,
            price_count: stats.count,
            timestamp: result.timestamp,
            sync_status: storage
                .as_ref()
                .map(|o| o.status)
                .unwrap_or(SyncStatus::NotRequested),
            storage_result: storage,
            debug: debug.then_some(result.debug_trace),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Error,
}

/// One entry in a batch report.
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub query: String,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ScrapeReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryOutcome {
    /// A finished pipeline. Still an error when its sync reported one.
    pub fn completed(query: String, report: ScrapeReport) -> Self {
        let error = report
            .storage_result
            .as_ref()
            .filter(|o| o.status == SyncStatus::Error)
            .map(|o| o.errors.join("; "));
        Self {
            query,
            status: if error.is_some() {
                OutcomeStatus::Error
            } else {
                OutcomeStatus::Success
            },
            data: Some(report),
            error,
        }
    }

    /// A query whose pipeline failed.
    pub fn failure(query: String, error: impl Into<String>) -> Self {
        Self {
            query,
            status: OutcomeStatus::Error,
            data: None,
            error: Some(error.into()),
        }
    }

    /// Whether the query counts as successful.
    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

/// Totals over a batch or scheduled run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_queries: usize,
    pub successful: usize,
    pub failed: usize,
    pub total_prices_found: usize,
    pub total_prices_stored: usize,
    pub cards_created: usize,
    pub duration_seconds: f64,
    pub max_concurrent: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub results: Vec<QueryOutcome>,
    pub batch_summary: BatchSummary,
}

impl BatchReport {
    /// Aggregate per-query outcomes into the batch summary.
    pub fn new(results: Vec<QueryOutcome>, max_concurrent: usize, elapsed: Duration) -> Self {
        let successful = results.iter().filter(|r| r.is_success()).count();
        let reports = || results.iter().filter_map(|r| r.data.as_ref());
        let storage = || reports().filter_map(|d| d.storage_result.as_ref());

        let batch_summary = BatchSummary {
            total_queries: results.len(),
            successful,
            failed: results.len() - successful,
            total_prices_found: reports().map(|d| d.price_count).sum(),
            total_prices_stored: storage().map(|s| s.entries_inserted).sum(),
            cards_created: storage().filter(|s| s.card_created).count(),
            duration_seconds: elapsed.as_secs_f64(),
            max_concurrent,
        };
        Self {
            results,
            batch_summary,
        }
    }
}

/// Check a batch request against the accepted limits and return the
/// concurrency to use.
pub fn validate_batch(query_count: usize, max_concurrent: Option<usize>) -> Result<usize, BatchError> {
    if query_count == 0 {
        return Err(BatchError::NoQueries);
    }
    if query_count > MAX_BATCH_QUERIES {
        return Err(BatchError::TooManyQueries(query_count, MAX_BATCH_QUERIES));
    }
    match max_concurrent {
        None => Ok(DEFAULT_MAX_CONCURRENT),
        Some(n) if (1..=MAX_CONCURRENT_CEILING).contains(&n) => Ok(n),
        Some(n) => Err(BatchError::Concurrency(n, MAX_CONCURRENT_CEILING)),
    }
}

/// Runs query pipelines.
///
/// Cheap to clone; clones share the renderer, store and ledger.
#[derive(Clone)]
pub struct BatchOrchestrator {
    renderer: Arc<dyn Renderer>,
    extractor: Arc<PageExtractor>,
    normalizer: PriceNormalizer,
    synchronizer: Option<RecordSynchronizer>,
    ledger: Option<Arc<RunLedger>>,
}

impl BatchOrchestrator {
    /// Observe-only orchestrator with default bounds.
    pub fn new(renderer: Arc<dyn Renderer>, extractor: PageExtractor) -> Self {
        Self {
            renderer,
            extractor: Arc::new(extractor),
            normalizer: PriceNormalizer::default(),
            synchronizer: None,
            ledger: None,
        }
    }

    /// Replace the price normalizer.
    pub fn with_normalizer(mut self, normalizer: PriceNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// Enable storage.
    pub fn with_synchronizer(mut self, synchronizer: RecordSynchronizer) -> Self {
        self.synchronizer = Some(synchronizer);
        self
    }

    /// Record every batch and scheduled run.
    pub fn with_ledger(mut self, ledger: Arc<RunLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// The renderer pipelines open contexts from.
    pub fn renderer(&self) -> &Arc<dyn Renderer> {
        &self.renderer
    }

    /// Whether runs with `store: true` can succeed.
    pub fn can_store(&self) -> bool {
        self.synchronizer.is_some()
    }

    /// Extract, normalize and summarize one query in an already-open context.
    pub async fn scrape_in(&self, ctx: &mut dyn RenderContext, query: &Query) -> ScrapeResult {
        let extraction = self.extractor.extract(ctx, query).await;
        let sample = self.normalizer.normalize(&extraction.candidates);
        if sample.len() < extraction.candidates.len() {
            info!(
                %query,
                kept = sample.len(),
                dropped = extraction.candidates.len() - sample.len(),
                "normalized candidates"
            );
        }
        ScrapeResult::new(query.clone(), sample, extraction.trace)
    }

    /// Single-query mode: one pipeline, run to completion.
    pub async fn run_query(&self, query: &Query, options: RunOptions) -> Result<ScrapeReport> {
        let pool = ContextPool::new(Arc::clone(&self.renderer), 1);
        self.run_in_pool(&pool, query, options).await
    }

    /// Batch mode: all queries at once, at most `max_concurrent` in flight.
    /// Results come back in submission order.
    pub async fn run_batch(&self, queries: Vec<Query>, max_concurrent: usize, options: RunOptions) -> BatchReport {
        let pool = ContextPool::new(Arc::clone(&self.renderer), clamp_concurrency(max_concurrent));
        self.run_batch_in(&pool, queries, options).await
    }

    /// Batch mode against a caller-supplied gate.
    pub async fn run_batch_in(&self, pool: &ContextPool, queries: Vec<Query>, options: RunOptions) -> BatchReport {
        let start = Instant::now();
        info!(
            queries = queries.len(),
            max_concurrent = pool.max_contexts(),
            store = options.store,
            "batch started"
        );

        let (labels, handles): (Vec<String>, Vec<_>) = queries
            .into_iter()
            .map(|query| (query.to_string(), self.spawn_pipeline(pool, query, options)))
            .unzip();

        let results = labels
            .into_iter()
            .zip(join_all(handles).await)
            .map(|(query, joined)| settle(query, joined))
            .collect();

        debug!(peak = pool.peak(), active = pool.active(), "batch gate drained");
        let report = BatchReport::new(results, pool.max_contexts(), start.elapsed());
        self.finish(RunMode::Batch, &report);
        report
    }

    /// Scheduled mode: the catalog in order, one query at a time, with
    /// `delay` between consecutive queries.
    pub async fn run_catalog(&self, catalog: &Catalog, delay: Duration, options: RunOptions) -> BatchReport {
        let start = Instant::now();
        info!(
            catalog = %catalog.name,
            queries = catalog.len(),
            delay_secs = delay.as_secs_f64(),
            "scheduled run started"
        );

        let pool = ContextPool::new(Arc::clone(&self.renderer), 1);
        let mut results = Vec::with_capacity(catalog.len());
        for (i, query) in catalog.queries().iter().enumerate() {
            if i > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let joined = self.spawn_pipeline(&pool, query.clone(), options).await;
            results.push(settle(query.to_string(), joined));
        }

        let report = BatchReport::new(results, 1, start.elapsed());
        self.finish(RunMode::Scheduled, &report);
        report
    }

    fn spawn_pipeline(&self, pool: &ContextPool, query: Query, options: RunOptions) -> JoinHandle<Result<ScrapeReport>> {
        let this = self.clone();
        let pool = pool.clone();
        tokio::spawn(async move { this.run_in_pool(&pool, &query, options).await })
    }

    async fn run_in_pool(&self, pool: &ContextPool, query: &Query, options: RunOptions) -> Result<ScrapeReport> {
        let synchronizer = match (&self.synchronizer, options.store) {
            (Some(s), true) => Some(s),
            (None, true) => bail!("storage requested but no record store is configured"),
            (_, false) => None,
        };

        let mut slot = pool.acquire().await?;
        let result = self.scrape_in(slot.context_mut(), query).await;
        let storage = match synchronizer {
            Some(s) => Some(s.sync(&result).await),
            None => None,
        };
        if let Err(e) = slot.release().await {
            warn!(%query, "closing render context failed: {e:#}");
        }

        Ok(ScrapeReport::new(result, storage, options.debug))
    }

    fn finish(&self, mode: RunMode, report: &BatchReport) {
        let s = &report.batch_summary;
        info!(
            mode = ?mode,
            successful = s.successful,
            failed = s.failed,
            prices = s.total_prices_found,
            stored = s.total_prices_stored,
            cards_created = s.cards_created,
            duration_secs = s.duration_seconds,
            "run finished"
        );
        if let Some(ledger) = &self.ledger {
            if let Err(e) = ledger.record(mode, report) {
                warn!(path = %ledger.path().display(), "failed to write run ledger: {e:#}");
            }
        }
    }
}

fn settle(query: String, joined: std::result::Result<Result<ScrapeReport>, tokio::task::JoinError>) -> QueryOutcome {
    match joined {
        Ok(Ok(report)) => QueryOutcome::completed(query, report),
        Ok(Err(e)) => {
            warn!(%query, "pipeline failed: {e:#}");
            QueryOutcome::failure(query, format!("{e:#}"))
        }
        Err(e) => {
            warn!(%query, "pipeline task aborted: {e}");
            QueryOutcome::failure(query, format!("pipeline task aborted: {e}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::ExtractorConfig;
    use crate::renderer::StaticContext;
    use assert_json_diff::assert_json_include;
    use crate::store::memory::FailPoint;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const THREE_SALES: &str = r#"<html><body><ul>
        <li class="s-item"><span class="s-item__price">$150.00</span></li>
        <li class="s-item"><span class="s-item__price">$162.50</span></li>
        <li class="s-item"><span class="s-item__price">$175.00</span></li>
    </ul></body></html>"#;

    /// Serves fixed markup; the context opened on call `fail_call` (0-based) fails.
    struct FixtureRenderer {
        html: &'static str,
        calls: AtomicUsize,
        fail_call: Option<usize>,
    }

    impl FixtureRenderer {
        fn new(html: &'static str) -> Self {
            Self {
                html,
                calls: AtomicUsize::new(0),
                fail_call: None,
            }
        }

        fn failing_on(html: &'static str, call: usize) -> Self {
            Self {
                fail_call: Some(call),
                ..Self::new(html)
            }
        }
    }

    #[async_trait]
    impl Renderer for FixtureRenderer {
        async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_call == Some(call) {
                bail!("browser crashed");
            }
            Ok(Box::new(StaticContext::from_html(self.html)))
        }

        fn name(&self) -> &'static str {
            "fixture"
        }
    }

    fn orchestrator(renderer: FixtureRenderer) -> BatchOrchestrator {
        let extractor = PageExtractor::new(ExtractorConfig {
            market_url: "https://market.test/sch/i.html".to_string(),
            wait_timeout_ms: 10,
            ..ExtractorConfig::default()
        });
        BatchOrchestrator::new(Arc::new(renderer), extractor)
    }

    fn queries(names: &[&str]) -> Vec<Query> {
        names.iter().map(|n| Query::new(n).unwrap()).collect()
    }

    #[tokio::test]
    async fn test_single_query_report() {
        let orch = orchestrator(FixtureRenderer::new(THREE_SALES));
        let report = orch
            .run_query(&Query::new("Charizard PSA 10").unwrap(), RunOptions::default())
            .await
            .unwrap();

        assert_eq!(report.prices, vec![150.0, 162.5, 175.0]);
        assert_eq!(report.average, 162.5);
        assert_eq!(report.median_price, 162.5);
        assert_eq!(report.price_range, 25.0);
        assert_eq!(report.sync_status, SyncStatus::NotRequested);
        assert!(report.debug.is_none());
    }

    #[tokio::test]
    async fn test_report_wire_shape() {
        let orch = orchestrator(FixtureRenderer::new(THREE_SALES));
        let report = orch
            .run_batch(queries(&["Charizard PSA 10"]), 1, RunOptions::default())
            .await;

        assert_json_include!(
            actual: serde_json::to_value(&report).unwrap(),
            expected: serde_json::json!({
                "results": [{
                    "query": "Charizard PSA 10",
                    "status": "success",
                    "data": {
                        "prices": [150.0, 162.5, 175.0],
                        "prices_sorted": [150.0, 162.5, 175.0],
                        "average": 162.5,
                        "median_price": 162.5,
                        "lowest_price": 150.0,
                        "highest_price": 175.0,
                        "price_range": 25.0,
                        "price_count": 3,
                        "sync_status": "not_requested"
                    }
                }],
                "batch_summary": {
                    "total_queries": 1,
                    "successful": 1,
                    "failed": 0,
                    "total_prices_found": 3,
                    "total_prices_stored": 0,
                    "cards_created": 0,
                    "max_concurrent": 1
                }
            })
        );
    }

    #[tokio::test]
    async fn test_debug_flag_attaches_trace() {
        let orch = orchestrator(FixtureRenderer::new(THREE_SALES));
        let options = RunOptions {
            debug: true,
            ..RunOptions::default()
        };
        let report = orch
            .run_query(&Query::new("Charizard PSA 10").unwrap(), options)
            .await
            .unwrap();
        let trace = report.debug.expect("debug trace");
        assert!(trace.merged_tiers);
        assert_eq!(trace.attempts.len(), 3);
    }

    #[tokio::test]
    async fn test_store_without_store_is_query_error() {
        let orch = orchestrator(FixtureRenderer::new(THREE_SALES));
        let options = RunOptions {
            store: true,
            ..RunOptions::default()
        };
        let err = orch
            .run_query(&Query::new("Charizard PSA 10").unwrap(), options)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no record store"));
    }

    #[tokio::test]
    async fn test_batch_isolates_failures_and_keeps_order() {
        let orch = orchestrator(FixtureRenderer::failing_on(THREE_SALES, 1));
        let report = orch
            .run_batch(queries(&["A", "B", "C"]), 3, RunOptions::default())
            .await;

        let names: Vec<_> = report.results.iter().map(|r| r.query.as_str()).collect();
        assert_eq!(names, ["A", "B", "C"]);
        assert_eq!(report.batch_summary.total_queries, 3);
        assert_eq!(report.batch_summary.successful, 2);
        assert_eq!(report.batch_summary.failed, 1);
        assert_eq!(report.batch_summary.total_prices_found, 6);
        let failed = report.results.iter().find(|r| !r.is_success()).unwrap();
        assert!(failed.error.as_deref().unwrap().contains("browser crashed"));
    }

    #[tokio::test]
    async fn test_batch_clamps_concurrency() {
        let orch = orchestrator(FixtureRenderer::new(THREE_SALES));
        let report = orch.run_batch(queries(&["A"]), 50, RunOptions::default()).await;
        assert_eq!(report.batch_summary.max_concurrent, MAX_CONCURRENT_CEILING);
    }

    #[tokio::test]
    async fn test_batch_with_store_counts_created_cards() {
        let store = Arc::new(MemoryStore::new());
        let orch = orchestrator(FixtureRenderer::new(THREE_SALES))
            .with_synchronizer(RecordSynchronizer::new(store.clone()));
        let options = RunOptions {
            store: true,
            ..RunOptions::default()
        };

        let report = orch.run_batch(queries(&["A", "B"]), 2, options).await;
        assert_eq!(report.batch_summary.successful, 2);
        assert_eq!(report.batch_summary.cards_created, 2);
        assert_eq!(report.batch_summary.total_prices_stored, 6);
        assert_eq!(store.cards().await.len(), 2);
    }

    #[tokio::test]
    async fn test_sync_error_marks_query_failed() {
        let store = Arc::new(MemoryStore::new());
        store.fail_on(FailPoint::Summary).await;
        let orch = orchestrator(FixtureRenderer::new(THREE_SALES))
            .with_synchronizer(RecordSynchronizer::new(store.clone()));
        let options = RunOptions {
            store: true,
            ..RunOptions::default()
        };

        let report = orch.run_batch(queries(&["A"]), 1, options).await;
        let outcome = &report.results[0];
        assert!(!outcome.is_success());
        assert!(outcome.data.is_some());
        assert_eq!(report.batch_summary.total_prices_stored, 3);
    }

    #[tokio::test]
    async fn test_catalog_runs_sequentially_with_delay() {
        let orch = orchestrator(FixtureRenderer::failing_on(THREE_SALES, 1));
        let catalog = Catalog::new("test", queries(&["A", "B", "C"]));

        let started = Instant::now();
        let report = orch
            .run_catalog(&catalog, Duration::from_millis(100), RunOptions::default())
            .await;

        // Two gaps for three queries.
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert_eq!(report.batch_summary.max_concurrent, 1);
        assert!(report.results[0].is_success());
        assert!(!report.results[1].is_success());
        assert!(report.results[2].is_success());
    }

    #[tokio::test]
    async fn test_runs_are_written_to_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.jsonl");
        let ledger = Arc::new(RunLedger::open(&path).unwrap());
        let orch = orchestrator(FixtureRenderer::new(THREE_SALES)).with_ledger(ledger);

        orch.run_batch(queries(&["A", "B"]), 2, RunOptions::default()).await;
        let records = RunLedger::tail(&path, 10).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].mode, RunMode::Batch);
        assert_eq!(records[0].summary.total_queries, 2);
    }

    #[test]
    fn test_validate_batch_limits() {
        assert_eq!(validate_batch(3, None), Ok(DEFAULT_MAX_CONCURRENT));
        assert_eq!(validate_batch(3, Some(5)), Ok(5));
        assert_eq!(validate_batch(0, None), Err(BatchError::NoQueries));
        assert_eq!(validate_batch(21, None), Err(BatchError::TooManyQueries(21, 20)));
        assert_eq!(validate_batch(2, Some(6)), Err(BatchError::Concurrency(6, 5)));
        assert_eq!(validate_batch(2, Some(0)), Err(BatchError::Concurrency(0, 5)));
    }
}
