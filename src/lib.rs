//! Daily end-of-day (bhav) history ingestion for NSE equities.
//!
//! A run fetches one trade date's bhav copy, registers any symbol the
//! registry has not seen yet, and stores the day's rows as a single atomic
//! batch. See [`pipeline::HistoryUpdater::update_history`].

pub mod config;
pub mod data;
pub mod error;
pub mod pipeline;
pub mod storage;

pub use config::Config;
pub use error::{FeedError, StoreError, UpdateError};
pub use pipeline::{HistoryUpdater, UpdateOutcome};
