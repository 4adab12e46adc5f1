//! In-memory record store for tests and dry runs.

use super::{
    CardEntity, CardId, CardOrder, CardPriceSummary, CardQuery, CardWithPrice, PriceEntryRecord,
    RecordStore,
};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::Utc;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

/// Operations that can be made to fail on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    FindCard,
    CreateCard,
    /// The n-th call (0-based) to `insert_price_entries`.
    EntryBatch(usize),
    Summary,
    View,
}

#[derive(Default)]
struct Tables {
    cards: Vec<CardEntity>,
    entries: Vec<PriceEntryRecord>,
    summaries: HashMap<CardId, CardPriceSummary>,
    next_id: CardId,
    entry_calls: usize,
    failures: HashSet<FailPoint>,
}

impl Tables {
    fn check(&self, point: FailPoint) -> StoreResult<()> {
        if self.failures.contains(&point) {
            return Err(StoreError::Unavailable(format!("injected failure at {point:?}")));
        }
        Ok(())
    }
}

/// Keeps the three tables in process memory. Data is lost on drop.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the given operation fail from now on.
    pub async fn fail_on(&self, point: FailPoint) {
        self.tables.write().await.failures.insert(point);
    }

    /// All cards in creation order.
    pub async fn cards(&self) -> Vec<CardEntity> {
        self.tables.read().await.cards.clone()
    }

    /// All price entries in insertion order.
    pub async fn entries(&self) -> Vec<PriceEntryRecord> {
        self.tables.read().await.entries.clone()
    }

    /// All summaries, by card id.
    pub async fn summaries(&self) -> Vec<CardPriceSummary> {
        let mut rows: Vec<_> = self.tables.read().await.summaries.values().cloned().collect();
        rows.sort_by_key(|s| s.card_id);
        rows
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn find_card(&self, name: &str) -> StoreResult<Option<CardEntity>> {
        let tables = self.tables.read().await;
        tables.check(FailPoint::FindCard)?;
        Ok(tables.cards.iter().find(|c| c.name == name).cloned())
    }

    async fn create_card(&self, name: &str) -> StoreResult<Option<CardEntity>> {
        let mut tables = self.tables.write().await;
        tables.check(FailPoint::CreateCard)?;
        if tables.cards.iter().any(|c| c.name == name) {
            return Ok(None);
        }
        tables.next_id += 1;
        let card = CardEntity {
            id: tables.next_id,
            name: name.to_string(),
            created_at: Some(Utc::now()),
        };
        tables.cards.push(card.clone());
        Ok(Some(card))
    }

    async fn insert_price_entries(&self, entries: &[PriceEntryRecord]) -> StoreResult<usize> {
        let mut tables = self.tables.write().await;
        let call = tables.entry_calls;
        tables.entry_calls += 1;
        tables.check(FailPoint::EntryBatch(call))?;
        tables.entries.extend_from_slice(entries);
        Ok(entries.len())
    }

    async fn find_summary(&self, card_id: CardId) -> StoreResult<Option<CardPriceSummary>> {
        let tables = self.tables.read().await;
        tables.check(FailPoint::Summary)?;
        Ok(tables.summaries.get(&card_id).cloned())
    }

    async fn insert_summary(&self, summary: &CardPriceSummary) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.check(FailPoint::Summary)?;
        if tables.summaries.contains_key(&summary.card_id) {
            return Err(StoreError::Status {
                operation: "insert",
                table: "card_prices",
                status: 409,
                body: format!("duplicate summary for card {}", summary.card_id),
            });
        }
        tables.summaries.insert(summary.card_id, summary.clone());
        Ok(())
    }

    async fn update_summary(&self, summary: &CardPriceSummary) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.check(FailPoint::Summary)?;
        // PATCH against a missing row matches nothing and still succeeds.
        if let Some(row) = tables.summaries.get_mut(&summary.card_id) {
            *row = summary.clone();
        }
        Ok(())
    }

    async fn cards_with_prices(&self, query: &CardQuery) -> StoreResult<Vec<CardWithPrice>> {
        let tables = self.tables.read().await;
        tables.check(FailPoint::View)?;

        let needle = query.name_contains.as_ref().map(|n| n.to_lowercase());
        let mut rows: Vec<CardWithPrice> = tables
            .cards
            .iter()
            .map(|card| {
                let summary = tables.summaries.get(&card.id);
                CardWithPrice {
                    id: card.id,
                    name: card.name.clone(),
                    created_at: card.created_at,
                    latest_price: summary.map(|s| s.average_price),
                    last_price_update: summary.map(|s| s.last_seen),
                    price_count: summary.map(|s| s.price_count),
                }
            })
            .filter(|row| {
                needle
                    .as_ref()
                    .is_none_or(|n| row.name.to_lowercase().contains(n.as_str()))
            })
            .filter(|row| !query.only_priced || row.latest_price.is_some_and(|p| p > 0.0))
            .filter(|row| {
                query
                    .min_price
                    .is_none_or(|min| row.latest_price.is_some_and(|p| p >= min))
            })
            .filter(|row| {
                query
                    .max_price
                    .is_none_or(|max| row.latest_price.is_some_and(|p| p <= max))
            })
            .collect();

        rows.sort_by(|a, b| {
            let ord = match query.order_by {
                CardOrder::LatestPrice => cmp_nulls_last(a.latest_price, b.latest_price, query.descending),
                CardOrder::CreatedAt => cmp_nulls_last(a.created_at, b.created_at, query.descending),
                CardOrder::Name => directed(a.name.cmp(&b.name), query.descending),
            };
            ord.then(a.id.cmp(&b.id))
        });

        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }
}

fn directed(ord: Ordering, descending: bool) -> Ordering {
    if descending {
        ord.reverse()
    } else {
        ord
    }
}

fn cmp_nulls_last<T: PartialOrd>(a: Option<T>, b: Option<T>, descending: bool) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => directed(a.partial_cmp(&b).unwrap_or(Ordering::Equal), descending),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
