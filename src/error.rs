use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Fetch failed for wallet {wallet}: {source}")]
    Fetch {
        wallet: String,
        #[source]
        source: FetchError,
    },

    /// Current and previous snapshots disagree on their key count after alignment.
    #[error("Snapshot alignment violated: current has {current} rows, previous has {previous}")]
    AlignmentMismatch { current: usize, previous: usize },

    /// Same length, but the key sequences diverge at `index`.
    #[error("Snapshot alignment violated at row {index}: current key {current}, previous key {previous}")]
    KeyMismatch {
        index: usize,
        current: String,
        previous: String,
    },

    #[error("Persisting snapshot failed: {0}")]
    Persistence(#[source] Box<AppError>),

    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    #[error("Invalid stored decimal {0:?}")]
    InvalidDecimal(String),

    #[error("Timestamp out of range: {0} ms")]
    InvalidTimestamp(i64),
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Per-wallet upstream failure. Whether it aborts a cycle is decided by the engine.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("rate limited by upstream")]
    RateLimited,

    #[error("wallet not found upstream: {0}")]
    NotFound(String),

    #[error("malformed upstream response: {0}")]
    Malformed(String),

    #[error("upstream returned status {0}")]
    Status(u16),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),
}

impl AppError {
    pub fn persistence(err: AppError) -> Self {
        AppError::Persistence(Box::new(err))
    }
}
