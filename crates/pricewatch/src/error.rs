//! Error types for the pricewatch library.

/// Failures talking to the remote record store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{operation} on {table} failed with status {status}: {body}")]
    Status {
        operation: &'static str,
        table: &'static str,
        status: u16,
        body: String,
    },

    #[error("{operation} on {table} returned no rows")]
    EmptyRepresentation {
        operation: &'static str,
        table: &'static str,
    },

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Failures loading process configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has an invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// A search string that cannot be used as a query.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("query is empty")]
    Empty,

    #[error("query is {0} characters long, limit is {1}")]
    TooLong(usize, usize),
}

/// Failures loading or editing a query catalog.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid catalog entry: {0}")]
    Query(#[from] QueryError),
}

/// A batch request outside the accepted limits.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchError {
    #[error("batch has no queries")]
    NoQueries,

    #[error("batch has {0} queries, limit is {1}")]
    TooManyQueries(usize, usize),

    #[error("max_concurrent must be between 1 and {1}, got {0}")]
    Concurrency(usize, usize),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
