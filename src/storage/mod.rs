//! Persistence contracts consumed by the ingestion pipeline.
//!
//! Writes happen in two phases. Securities are registered one at a time as
//! soon as an unknown symbol is seen, while history rows are committed as a
//! single batch at the end of a run. A registered security therefore
//! survives a history batch that later fails; callers re-running the same
//! trade date will simply find it in the registry.

pub mod duckdb;
#[cfg(test)]
pub mod memory;

use crate::data::{DailyHistoryRecord, Security, SecurityId};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;

pub use self::duckdb::DuckDbStore;

/// Result of registering a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// A new security row was written.
    Created(SecurityId),
    /// The symbol was already registered, possibly by a concurrent run.
    Existing(SecurityId),
}

impl Registration {
    /// Returns the security id whether or not this call created the row.
    pub fn id(self) -> SecurityId {
        match self {
            Registration::Created(id) | Registration::Existing(id) => id,
        }
    }
}

/// Durable registry of known securities, unique by symbol.
#[async_trait]
pub trait SecurityRegistry: Send + Sync {
    /// Returns every registered symbol mapped to its security id.
    async fn symbol_map(&self) -> Result<HashMap<String, SecurityId>, StoreError>;

    /// Registers `symbol` unless it already exists.
    ///
    /// The check and the insert are a single atomic step at the store, so two
    /// runs racing on the same new symbol both receive the same id.
    ///
    /// # Errors
    /// Returns a `StoreError` if the write fails. This write is committed
    /// immediately and is not rolled back by a later history failure.
    async fn create_security(&self, symbol: &str, isin: &str)
        -> Result<Registration, StoreError>;

    /// Lists every registered security ordered by id.
    async fn list_securities(&self) -> Result<Vec<Security>, StoreError>;
}

/// Append-only store of daily history rows.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Persists `records` atomically: either all rows become visible or none do.
    ///
    /// # Returns
    /// The number of rows written
    async fn bulk_insert(&self, records: &[DailyHistoryRecord]) -> Result<usize, StoreError>;

    /// Returns the rows stored for `trade_date` in insertion order.
    async fn list_for_date(
        &self,
        trade_date: NaiveDate,
    ) -> Result<Vec<DailyHistoryRecord>, StoreError>;
}
