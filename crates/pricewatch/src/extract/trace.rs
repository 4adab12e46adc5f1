//! Debug trace recorded while extracting one page.

use super::tiers::ExtractionTier;
use crate::renderer::NavigationResult;
use serde::Serialize;
use std::path::PathBuf;

/// What one tier attempt found.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierAttempt {
    pub tier: ExtractionTier,
    /// Selector that produced the matches, if the tier is selector-driven.
    pub selector: Option<String>,
    /// Elements (or pattern matches) found before price parsing.
    pub elements_matched: usize,
    /// Candidates with a recognised amount.
    pub candidates: usize,
    pub confidence: f32,
}

/// Provenance of one extraction round.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DebugTrace {
    pub url: String,
    pub navigation: Option<NavigationResult>,
    pub attempts: Vec<TierAttempt>,
    /// Tier whose candidates were kept; `None` when no tier was usable and
    /// the cascade merged everything it found.
    pub tier_used: Option<ExtractionTier>,
    pub merged_tiers: bool,
    pub notes: Vec<String>,
    pub errors: Vec<String>,
    pub snapshot: Option<PathBuf>,
    pub elapsed_ms: u64,
}

impl DebugTrace {
    /// Empty trace for a page load of `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Record a non-fatal failure.
    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Record an observation.
    pub fn note(&mut self, message: impl Into<String>) {
        self.notes.push(message.into());
    }
}
