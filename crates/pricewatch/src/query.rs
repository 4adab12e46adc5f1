//! Search queries identifying one catalog item.

use crate::error::QueryError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest query the marketplace search box accepts.
pub const MAX_QUERY_LEN: usize = 300;

/// A search string identifying one catalog item, e.g. `"Charizard PSA 10"`.
///
/// The trimmed text is also the card name in the remote store, so two
/// queries that differ only in surrounding whitespace resolve to the same
/// card.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Query(String);

impl Query {
    /// Trimmed query; blank text is rejected.
    pub fn new(text: impl AsRef<str>) -> Result<Self, QueryError> {
        let trimmed = text.as_ref().trim();
        if trimmed.is_empty() {
            return Err(QueryError::Empty);
        }
        let len = trimmed.chars().count();
        if len > MAX_QUERY_LEN {
            return Err(QueryError::TooLong(len, MAX_QUERY_LEN));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// The trimmed query text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Query {
    type Error = QueryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Query::new(value)
    }
}

impl From<Query> for String {
    fn from(query: Query) -> Self {
        query.0
    }
}

impl AsRef<str> for Query {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_trims_whitespace() {
        let q = Query::new("  Charizard PSA 10 \n").unwrap();
        assert_eq!(q.as_str(), "Charizard PSA 10");
    }

    #[test]
    fn test_query_rejects_blank() {
        assert_eq!(Query::new("   "), Err(QueryError::Empty));
    }

    #[test]
    fn test_query_rejects_overlong() {
        let long = "x".repeat(MAX_QUERY_LEN + 1);
        assert!(matches!(Query::new(long), Err(QueryError::TooLong(_, _))));
    }

    #[test]
    fn test_query_deserialize_validates() {
        let ok: Query = serde_json::from_str("\"Pikachu PSA 9\"").unwrap();
        assert_eq!(ok.to_string(), "Pikachu PSA 9");
        assert!(serde_json::from_str::<Query>("\"\"").is_err());
    }
}
