//! Price text parsing and plausibility filtering.

use crate::config::{MAX_PRICE, MIN_PRICE};
use crate::extract::PriceCandidate;
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

/// Amount with optional thousands separators and up to two decimals.
const AMOUNT: &str = r"(\d{1,3}(?:,\d{3})+(?:\.\d{1,2})?|\d+(?:\.\d{1,2})?)";

/// Patterns tried in order against a price fragment; the first match wins.
static PRICE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // "$1,234.56", "US $150.00", "$ 99"
        format!(r"\$\s*{AMOUNT}"),
        // "USD 150", "150.00 USD"
        format!(r"(?i)\bUSD\s*{AMOUNT}"),
        format!(r"(?i){AMOUNT}\s*USD\b"),
        // bare number as a last resort
        AMOUNT.to_string(),
    ]
    .iter()
    .map(|p| Regex::new(p).expect("price pattern is valid"))
    .collect()
});

/// Find the numeric part of a price fragment, e.g. `"1,234.56"` in `"US $1,234.56"`.
pub fn match_amount(text: &str) -> Option<&str> {
    PRICE_PATTERNS.iter().find_map(|re| {
        re.captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    })
}

/// Parse a price fragment into a number. `None` when no pattern matches.
pub fn parse_price(text: &str) -> Option<f64> {
    parse_amount(match_amount(text)?)
}

/// Parse a bare amount, dropping thousands separators.
pub fn parse_amount(amount: &str) -> Option<f64> {
    let cleaned: String = amount.chars().filter(|c| *c != ',').collect();
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Inclusive range of plausible prices.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriceBounds {
    pub min: f64,
    pub max: f64,
}

impl Default for PriceBounds {
    fn default() -> Self {
        Self {
            min: MIN_PRICE,
            max: MAX_PRICE,
        }
    }
}

impl PriceBounds {
    /// Inclusive range check; NaN is never contained.
    pub fn contains(&self, value: f64) -> bool {
        value.is_finite() && value >= self.min && value <= self.max
    }
}

/// Validated prices for one query, in extraction order.
///
/// Every value lies within the [`PriceBounds`] used to build it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PriceSample(Vec<f64>);

impl PriceSample {
    /// A sample with no prices.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Prices in extraction order.
    pub fn values(&self) -> &[f64] {
        &self.0
    }

    /// Number of prices.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no price survived normalization.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Prices in extraction order, by value.
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.0.iter().copied()
    }
}

/// Turns raw candidates into a [`PriceSample`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PriceNormalizer {
    bounds: PriceBounds,
}

impl PriceNormalizer {
    /// Normalizer with the given bounds.
    pub fn new(bounds: PriceBounds) -> Self {
        Self { bounds }
    }

    /// Keep parseable, in-range candidates. Rejections are silent.
    pub fn normalize(&self, candidates: &[PriceCandidate]) -> PriceSample {
        PriceSample(
            candidates
                .iter()
                .filter_map(|c| c.numeric_value.or_else(|| parse_price(&c.raw_text)))
                .filter(|v| self.bounds.contains(*v))
                .collect(),
        )
    }

    /// Normalize free-text fragments directly.
    pub fn normalize_texts<S: AsRef<str>>(&self, texts: &[S]) -> PriceSample {
        PriceSample(
            texts
                .iter()
                .filter_map(|t| parse_price(t.as_ref()))
                .filter(|v| self.bounds.contains(*v))
                .collect(),
        )
    }
}
