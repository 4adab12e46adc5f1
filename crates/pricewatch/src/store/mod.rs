//! Remote record store: cards, append-only price observations, and one
//! summary row per card, plus a read view joining cards to their summary.

pub mod memory;
pub mod postgrest;

pub use memory::MemoryStore;
pub use postgrest::PostgrestStore;

use crate::error::StoreResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type CardId = i64;

/// A catalog item, keyed by exact name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardEntity {
    pub id: CardId,
    pub name: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// One observed sold price, written once and never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceEntryRecord {
    pub card_id: CardId,
    pub price: f64,
    pub source: String,
    pub scraped_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Latest statistics for a card. At most one row per `card_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardPriceSummary {
    pub card_id: CardId,
    pub average_price: f64,
    pub lowest_price: f64,
    pub highest_price: f64,
    pub price_count: i64,
    pub last_seen: DateTime<Utc>,
}

/// Row of the `cards_with_prices` view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardWithPrice {
    pub id: CardId,
    pub name: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub latest_price: Option<f64>,
    #[serde(default)]
    pub last_price_update: Option<DateTime<Utc>>,
    #[serde(default)]
    pub price_count: Option<i64>,
}

/// Sort key for [`CardQuery`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardOrder {
    #[default]
    LatestPrice,
    CreatedAt,
    Name,
}

impl CardOrder {
    /// Column name in the view.
    pub fn column(&self) -> &'static str {
        match self {
            CardOrder::LatestPrice => "latest_price",
            CardOrder::CreatedAt => "created_at",
            CardOrder::Name => "name",
        }
    }
}

/// Filters over the `cards_with_prices` view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CardQuery {
    /// Case-insensitive substring of the card name.
    pub name_contains: Option<String>,
    /// Inclusive lower bound on `latest_price`.
    pub min_price: Option<f64>,
    /// Inclusive upper bound on `latest_price`.
    pub max_price: Option<f64>,
    /// Only cards whose `latest_price` is above zero.
    pub only_priced: bool,
    pub order_by: CardOrder,
    pub descending: bool,
    pub limit: Option<usize>,
}

/// Filtered lookup, insert, and update over the three tables, plus the
/// read view.
///
/// Lookups and writes are separate round trips; nothing here is
/// transactional.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Card whose name equals `name` exactly.
    async fn find_card(&self, name: &str) -> StoreResult<Option<CardEntity>>;

    /// Insert a card. Returns `None` when a card with that name already
    /// existed and the insert was ignored.
    async fn create_card(&self, name: &str) -> StoreResult<Option<CardEntity>>;

    /// Append observation rows; returns how many were written.
    async fn insert_price_entries(&self, entries: &[PriceEntryRecord]) -> StoreResult<usize>;

    async fn find_summary(&self, card_id: CardId) -> StoreResult<Option<CardPriceSummary>>;

    async fn insert_summary(&self, summary: &CardPriceSummary) -> StoreResult<()>;

    /// Overwrite the summary row for `summary.card_id`.
    async fn update_summary(&self, summary: &CardPriceSummary) -> StoreResult<()>;

    /// Filtered read over the cards-with-latest-summary view.
    async fn cards_with_prices(&self, query: &CardQuery) -> StoreResult<Vec<CardWithPrice>>;
}
