//! Query catalogs swept by scheduled runs.
//!
//! A catalog is plain configuration: an ordered, duplicate-free list of
//! queries handed to the orchestrator at call time.

use crate::error::CatalogError;
use crate::query::Query;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Queries swept by the default scheduled run.
const DEFAULT_QUERIES: &[&str] = &[
    "Charizard PSA 10",
    "Pikachu PSA 9",
    "Blastoise holo",
    "Venusaur 1st edition",
    "Mewtwo PSA 8",
    "Gyarados holo",
    "Alakazam PSA 9",
    "Machamp 1st edition",
    "Gengar holo",
    "Dragonite PSA 10",
];

/// A named, ordered list of distinct queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub name: String,
    queries: Vec<Query>,
}

impl Catalog {
    /// Build a catalog, dropping repeated queries while keeping first-seen order.
    pub fn new(name: impl Into<String>, queries: impl IntoIterator<Item = Query>) -> Self {
        let mut catalog = Self {
            name: name.into(),
            queries: Vec::new(),
        };
        for q in queries {
            if !catalog.queries.contains(&q) {
                catalog.queries.push(q);
            }
        }
        catalog
    }

    /// Load a catalog from a JSON file.
    ///
    /// Accepts either `{"name": ..., "queries": [...]}` or a bare array of
    /// query strings (named after the file stem).
    pub fn from_json_file(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path)?;
        let value: serde_json::Value = serde_json::from_str(&raw)?;

        if value.is_array() {
            let texts: Vec<String> = serde_json::from_value(value)?;
            let queries = texts
                .iter()
                .map(Query::new)
                .collect::<Result<Vec<_>, _>>()?;
            let name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("catalog")
                .to_string();
            return Ok(Self::new(name, queries));
        }

        let parsed: Catalog = serde_json::from_value(value)?;
        Ok(Self::new(parsed.name, parsed.queries))
    }

    /// Add a query; returns false if it was already present.
    pub fn add(&mut self, query: Query) -> bool {
        if self.queries.contains(&query) {
            return false;
        }
        info!(catalog = %self.name, %query, "added query");
        self.queries.push(query);
        true
    }

    /// Remove a query; returns false if it was not present.
    pub fn remove(&mut self, query: &Query) -> bool {
        let before = self.queries.len();
        self.queries.retain(|q| q != query);
        let removed = self.queries.len() != before;
        if removed {
            info!(catalog = %self.name, %query, "removed query");
        }
        removed
    }

    /// Queries in sweep order.
    pub fn queries(&self) -> &[Query] {
        &self.queries
    }

    /// Number of queries.
    pub fn len(&self) -> usize {
        self.queries.len()
    }

    /// Whether the catalog has no queries.
    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

/// The predefined graded-card catalog.
pub fn default_catalog() -> Catalog {
    let queries = DEFAULT_QUERIES
        .iter()
        .filter_map(|q| Query::new(q).ok());
    Catalog::new("default", queries)
}
