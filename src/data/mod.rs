pub mod ingestion;
pub mod models;
pub mod processing;

pub use ingestion::{DailyFeed, FeedConfig, NseBhavFeed};
pub use models::{DailyHistoryRecord, RawFeedRecord, Security, SecurityId};
pub use processing::SymbolResolver;

#[cfg(test)]
pub(crate) use models::fixtures;
