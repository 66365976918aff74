//! In-process registry and history store used by the pipeline tests.

use super::{HistoryStore, Registration, SecurityRegistry};
use crate::data::{DailyHistoryRecord, Security, SecurityId};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct State {
    securities: Vec<Security>,
    history: Vec<DailyHistoryRecord>,
    writes: usize,
}

/// Keeps everything in vectors and counts every write call.
///
/// `fail_history_after(n)` makes the next batch fail once `n` rows have been
/// staged, which is how a mid-batch failure is simulated.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    fail_history_after: Mutex<Option<usize>>,
    fail_reads: Mutex<bool>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-registered with `(symbol, isin)` pairs, ids from 1.
    pub fn with_securities(symbols: &[(&str, &str)]) -> Self {
        let store = Self::new();
        {
            let mut state = store.state.lock().unwrap();
            for (index, (symbol, isin)) in symbols.iter().enumerate() {
                state.securities.push(Security {
                    id: SecurityId(index as i64 + 1),
                    symbol: symbol.to_string(),
                    isin: isin.to_string(),
                    created_at: Utc::now(),
                });
            }
        }
        store
    }

    /// Makes every later batch fail once `rows` rows are staged.
    pub fn fail_history_after(&self, rows: usize) {
        *self.fail_history_after.lock().unwrap() = Some(rows);
    }

    /// Makes `symbol_map` fail from now on.
    pub fn fail_reads(&self) {
        *self.fail_reads.lock().unwrap() = true;
    }

    /// Number of write calls seen so far.
    pub fn writes(&self) -> usize {
        self.state.lock().unwrap().writes
    }

    /// Snapshot of every stored history row.
    pub fn history(&self) -> Vec<DailyHistoryRecord> {
        self.state.lock().unwrap().history.clone()
    }

    /// Snapshot of every registered security.
    pub fn securities(&self) -> Vec<Security> {
        self.state.lock().unwrap().securities.clone()
    }
}

#[async_trait]
impl SecurityRegistry for MemoryStore {
    async fn symbol_map(&self) -> Result<HashMap<String, SecurityId>, StoreError> {
        if *self.fail_reads.lock().map_err(|_| StoreError::Poisoned)? {
            return Err(StoreError::Poisoned);
        }
        let state = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(state
            .securities
            .iter()
            .map(|security| (security.symbol.clone(), security.id))
            .collect())
    }

    async fn create_security(
        &self,
        symbol: &str,
        isin: &str,
    ) -> Result<Registration, StoreError> {
        let mut state = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        state.writes += 1;
        if let Some(existing) = state.securities.iter().find(|s| s.symbol == symbol) {
            return Ok(Registration::Existing(existing.id));
        }

        let id = SecurityId(state.securities.len() as i64 + 1);
        state.securities.push(Security {
            id,
            symbol: symbol.to_string(),
            isin: isin.to_string(),
            created_at: Utc::now(),
        });
        Ok(Registration::Created(id))
    }

    async fn list_securities(&self) -> Result<Vec<Security>, StoreError> {
        Ok(self.securities())
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn bulk_insert(&self, records: &[DailyHistoryRecord]) -> Result<usize, StoreError> {
        let limit = *self
            .fail_history_after
            .lock()
            .map_err(|_| StoreError::Poisoned)?;
        let mut state = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        state.writes += 1;

        let mut staged = Vec::with_capacity(records.len());
        for record in records {
            if limit.is_some_and(|limit| staged.len() >= limit) {
                return Err(StoreError::Corrupt {
                    column: "security_id",
                    value: record.security_id.to_string(),
                });
            }
            staged.push(record.clone());
        }

        state.history.extend(staged);
        Ok(records.len())
    }

    async fn list_for_date(
        &self,
        trade_date: NaiveDate,
    ) -> Result<Vec<DailyHistoryRecord>, StoreError> {
        Ok(self
            .history()
            .into_iter()
            .filter(|record| record.trade_date == trade_date)
            .collect())
    }
}
