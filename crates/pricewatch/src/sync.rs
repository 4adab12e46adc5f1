//! Reconcile one query's prices against the record store.
//!
//! Three steps, each attempted even when an earlier one partly failed:
//! resolve (or create) the card, append one observation row per price in
//! fixed-size batches, then write the card's summary row.

use crate::batch::ScrapeResult;
use crate::config::INSERT_BATCH_SIZE;
use crate::error::{StoreError, StoreResult};
use crate::stats::PriceStatistics;
use crate::store::{CardEntity, CardId, CardPriceSummary, PriceEntryRecord, RecordStore};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Source tag written on every observation row.
pub const DEFAULT_SOURCE: &str = "ebay_sold";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Persistence was not asked for. Never produced by the synchronizer.
    NotRequested,
    Success,
    /// The sample was empty; nothing was written.
    NoData,
    Error,
}

/// What one sync wrote, and what went wrong.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub card_id: Option<CardId>,
    pub card_created: bool,
    pub entries_inserted: usize,
    /// The summary row was written, by insert or by update.
    pub summary_updated: bool,
    pub status: SyncStatus,
    pub errors: Vec<String>,
}

impl SyncOutcome {
    fn new(status: SyncStatus) -> Self {
        Self {
            card_id: None,
            card_created: false,
            entries_inserted: 0,
            summary_updated: false,
            status,
            errors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Observation rows per insert request.
    pub batch_size: usize,
    pub source: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: INSERT_BATCH_SIZE,
            source: DEFAULT_SOURCE.to_string(),
        }
    }
}

/// Writes scrape results to a [`RecordStore`].
///
/// Card creation is conflict-safe. The summary write is a lookup followed
/// by an insert or update, so callers must not sync the same card name
/// from two places at once.
#[derive(Clone)]
pub struct RecordSynchronizer {
    store: Arc<dyn RecordStore>,
    config: SyncConfig,
}

impl RecordSynchronizer {
    /// Synchronizer with default batch size and source.
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self::with_config(store, SyncConfig::default())
    }

    /// Synchronizer with custom settings; batch size is at least 1.
    pub fn with_config(store: Arc<dyn RecordStore>, config: SyncConfig) -> Self {
        Self {
            store,
            config: SyncConfig {
                batch_size: config.batch_size.max(1),
                ..config
            },
        }
    }

    /// Write one result. Failures are collected in the outcome, never returned.
    pub async fn sync(&self, result: &ScrapeResult) -> SyncOutcome {
        let query = result.query.as_str();
        if result.sample.is_empty() {
            info!(query, "no prices to store");
            return SyncOutcome::new(SyncStatus::NoData);
        }

        let mut outcome = SyncOutcome::new(SyncStatus::Success);

        let card = match self.resolve_card(query).await {
            Ok((card, created)) => {
                outcome.card_created = created;
                card
            }
            Err(e) => {
                warn!(query, error = %e, "card resolution failed");
                outcome.errors.push(format!("resolving card: {e}"));
                outcome.status = SyncStatus::Error;
                return outcome;
            }
        };
        outcome.card_id = Some(card.id);

        let rows = self.entry_rows(card.id, result);
        let batches = rows.len().div_ceil(self.config.batch_size);
        for (n, chunk) in rows.chunks(self.config.batch_size).enumerate() {
            match self.store.insert_price_entries(chunk).await {
                Ok(written) => outcome.entries_inserted += written,
                Err(e) => {
                    warn!(query, card_id = card.id, batch = n + 1, error = %e, "entry batch failed");
                    outcome
                        .errors
                        .push(format!("inserting entry batch {} of {batches}: {e}", n + 1));
                }
            }
        }

        match self.write_summary(card.id, &result.statistics).await {
            Ok(()) => outcome.summary_updated = true,
            Err(e) => {
                warn!(query, card_id = card.id, error = %e, "summary write failed");
                outcome.errors.push(format!("writing summary: {e}"));
            }
        }

        if !outcome.errors.is_empty() {
            outcome.status = SyncStatus::Error;
        }
        info!(
            query,
            card_id = card.id,
            created = outcome.card_created,
            inserted = outcome.entries_inserted,
            of = rows.len(),
            status = ?outcome.status,
            "sync finished"
        );
        outcome
    }

    /// Look a card up by exact name, creating it when missing. Returns the
    /// card and whether this call created it.
    pub async fn resolve_card(&self, name: &str) -> StoreResult<(CardEntity, bool)> {
        if let Some(card) = self.store.find_card(name).await? {
            debug!(name, card_id = card.id, "found card");
            return Ok((card, false));
        }
        if let Some(card) = self.store.create_card(name).await? {
            info!(name, card_id = card.id, "created card");
            return Ok((card, true));
        }
        // Someone else created it between our lookup and insert.
        match self.store.find_card(name).await? {
            Some(card) => Ok((card, false)),
            None => Err(StoreError::EmptyRepresentation {
                operation: "insert",
                table: "cards",
            }),
        }
    }

    fn entry_rows(&self, card_id: CardId, result: &ScrapeResult) -> Vec<PriceEntryRecord> {
        let tier = result
            .debug_trace
            .tier_used
            .map(|t| t.as_str())
            .unwrap_or("merged");
        result
            .sample
            .iter()
            .enumerate()
            .map(|(position, price)| PriceEntryRecord {
                card_id,
                price,
                source: self.config.source.clone(),
                scraped_at: result.timestamp,
                metadata: serde_json::json!({
                    "query": result.query.as_str(),
                    "tier": tier,
                    "position": position,
                }),
            })
            .collect()
    }

    async fn write_summary(&self, card_id: CardId, stats: &PriceStatistics) -> StoreResult<()> {
        let summary = CardPriceSummary {
            card_id,
            average_price: stats.average,
            lowest_price: stats.min,
            highest_price: stats.max,
            price_count: stats.count as i64,
            last_seen: Utc::now(),
        };
        if self.store.find_summary(card_id).await?.is_some() {
            self.store.update_summary(&summary).await
        } else {
            self.store.insert_summary(&summary).await
        }
    }
}
