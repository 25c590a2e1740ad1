//! Error types for key inventory operations

/// Errors from key inventory operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("pool empty: no keys left for period {0}")]
    PoolEmpty(String),

    #[error("no pool file for period {0}")]
    PoolMissing(String),

    #[error("invalid period: {0:?}")]
    InvalidPeriod(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("remote store: {0}")]
    Remote(#[from] repo_contents::Error),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result alias for key inventory operations.
pub type Result<T> = std::result::Result<T, Error>;
