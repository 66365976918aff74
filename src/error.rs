use chrono::NaiveDate;
use thiserror::Error;

/// Errors raised while retrieving or decoding a daily feed.
#[derive(Debug, Error)]
pub enum FeedError {
    /// The HTTP request could not be completed.
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The exchange answered with a status other than success or not-found.
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    /// A bhav CSV row could not be decoded.
    #[error("malformed bhav row: {0}")]
    Csv(#[from] csv::Error),

    /// A field was present but its value could not be interpreted.
    #[error("invalid {field} value {value:?}")]
    InvalidField { field: &'static str, value: String },
}

/// Errors raised by the security registry or the history store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `DuckDB` rejected a statement.
    #[error(transparent)]
    DuckDb(#[from] duckdb::Error),

    /// The connection lock was poisoned by a panicking writer.
    #[error("store connection lock poisoned")]
    Poisoned,

    /// A stored value could not be converted back into its domain type.
    #[error("corrupt {column} value {value:?}")]
    Corrupt { column: &'static str, value: String },

    /// A symbol collided on insert but the existing row could not be read back.
    #[error("duplicate security {symbol} could not be resolved")]
    DuplicateSecurity { symbol: String },

    /// The blocking task running a statement panicked or was cancelled.
    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Failure of a single `update_history` run.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// The feed client could not produce data for the trade date.
    #[error("feed unavailable for {date}: {source}")]
    FeedUnavailable {
        date: NaiveDate,
        #[source]
        source: FeedError,
    },

    /// The registry snapshot could not be loaded.
    #[error("registry read failed: {0}")]
    RegistryRead(#[source] StoreError),

    /// Writing a security or the history batch failed.
    #[error("store write failed: {0}")]
    StoreWrite(#[from] StoreError),
}
