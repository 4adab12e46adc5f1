//! Sold-listing price harvesting for collectible cards.
//!
//! A query runs through [`PageExtractor`] (tiered selector cascade over a
//! rendered results page), [`PriceNormalizer`] (parse and range-filter),
//! [`PriceStatistics`], and optionally [`RecordSynchronizer`], which writes
//! observations and a per-card summary to a PostgREST store.
//! [`BatchOrchestrator`] runs those pipelines singly, in bounded-parallel
//! batches, or sequentially over a [`Catalog`].

pub mod audit;
pub mod batch;
pub mod catalog;
pub mod config;
pub mod error;
pub mod extract;
pub mod normalize;
pub mod pool;
pub mod query;
pub mod renderer;
pub mod stats;
pub mod store;
pub mod sync;

pub use audit::{RunLedger, RunMode, RunRecord};
pub use batch::{
    validate_batch, BatchOrchestrator, BatchReport, BatchSummary, OutcomeStatus, QueryOutcome,
    RunOptions, ScrapeReport, ScrapeResult,
};
pub use catalog::{default_catalog, Catalog};
pub use config::Config;
pub use error::{BatchError, CatalogError, ConfigError, QueryError, StoreError};
pub use extract::{DebugTrace, ExtractorConfig, PageExtractor, PriceCandidate};
pub use normalize::{PriceBounds, PriceNormalizer, PriceSample};
pub use pool::ContextPool;
pub use query::Query;
pub use renderer::{ChromiumRenderer, HttpRenderer, RenderContext, Renderer};
pub use stats::PriceStatistics;
pub use store::{MemoryStore, PostgrestStore, RecordStore};
pub use sync::{RecordSynchronizer, SyncConfig, SyncOutcome, SyncStatus};
