//! CSS selectors for the sold-listings results page.
//!
//! The marketplace ships several listing layouts at once (the older
//! `s-item` cards and the newer `s-card`/`su-card` grid). Each list is tried
//! in order, so put the most specific selectors first. Update these when
//! extraction starts falling through to the text-pattern tier.

use serde::{Deserialize, Serialize};

/// Listing containers, one per sold item.
pub const LISTING_CONTAINERS: &[&str] = &[
    "li.s-item",
    "li.s-card",
    "div.s-item__wrapper",
    "div.su-card-container",
    "[data-testid='item-card']",
];

/// Price elements searched inside one listing container.
pub const ITEM_PRICE: &[&str] = &[
    ".s-item__price",
    ".s-card__price",
    ".su-styled-text.primary.bold",
    "span.POSITIVE",
    "[class*='price']",
];

/// Price elements searched across the whole page.
pub const GLOBAL_PRICE: &[&str] = &[
    ".s-item__price",
    ".s-card__price",
    "span.POSITIVE",
    "[class*='price']",
    ".notranslate",
];

/// The selector lists used by one extractor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorSet {
    pub containers: Vec<String>,
    pub item_price: Vec<String>,
    pub global_price: Vec<String>,
}

impl Default for SelectorSet {
    fn default() -> Self {
        Self {
            containers: to_owned(LISTING_CONTAINERS),
            item_price: to_owned(ITEM_PRICE),
            global_price: to_owned(GLOBAL_PRICE),
        }
    }
}

impl SelectorSet {
    /// All container selectors as one selector group, for waiting on any of them.
    pub fn any_container(&self) -> String {
        self.containers.join(", ")
    }
}

fn to_owned(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_selectors_parse() {
        let set = SelectorSet::default();
        for sel in set
            .containers
            .iter()
            .chain(&set.item_price)
            .chain(&set.global_price)
        {
            assert!(scraper::Selector::parse(sel).is_ok(), "bad selector {sel}");
        }
        assert!(scraper::Selector::parse(&set.any_container()).is_ok());
    }
}
