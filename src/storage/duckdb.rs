//! `DuckDB`-backed security registry and history store.

use super::{HistoryStore, Registration, SecurityRegistry};
use crate::data::{DailyHistoryRecord, Security, SecurityId};
use crate::error::StoreError;
use ::duckdb::{params, Connection};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

const SCHEMA: &str = "
CREATE SEQUENCE IF NOT EXISTS securities_id_seq START 1;
CREATE TABLE IF NOT EXISTS securities (
    id BIGINT PRIMARY KEY DEFAULT nextval('securities_id_seq'),
    symbol VARCHAR NOT NULL UNIQUE,
    isin VARCHAR NOT NULL,
    created_at TIMESTAMP NOT NULL
);
CREATE SEQUENCE IF NOT EXISTS stock_history_id_seq START 1;
CREATE TABLE IF NOT EXISTS stock_history (
    id BIGINT PRIMARY KEY DEFAULT nextval('stock_history_id_seq'),
    security_id BIGINT NOT NULL REFERENCES securities(id),
    trade_date DATE NOT NULL,
    open DOUBLE NOT NULL,
    high DOUBLE NOT NULL,
    low DOUBLE NOT NULL,
    close DOUBLE NOT NULL,
    last DOUBLE NOT NULL,
    prev_close DOUBLE NOT NULL,
    total_traded_qty BIGINT NOT NULL,
    total_traded_value DOUBLE NOT NULL,
    total_trades BIGINT NOT NULL,
    deliverables DOUBLE,
    watch_list BOOLEAN NOT NULL DEFAULT FALSE,
    is_filtered BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMP NOT NULL
);
CREATE INDEX IF NOT EXISTS stock_history_trade_date_idx ON stock_history (trade_date);
";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Registry and history store sharing a single `DuckDB` connection.
///
/// Every statement runs on tokio's blocking pool under the connection lock,
/// so async workers never wait on database I/O.
pub struct DuckDbStore {
    connection: Arc<Mutex<Connection>>,
}

impl DuckDbStore {
    /// Opens (or creates) the database file at `path` and applies the schema.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or the schema fails to apply
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let connection = Connection::open(path)?;
        info!(path = %path.display(), "opened history database");
        Self::with_connection(connection)
    }

    /// Opens a throwaway in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(connection: Connection) -> Result<Self, StoreError> {
        connection.execute_batch("PRAGMA disable_progress_bar;")?;
        connection.execute_batch(SCHEMA)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Runs `work` against the locked connection on the blocking pool.
    async fn run<T, F>(&self, work: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let connection = Arc::clone(&self.connection);
        tokio::task::spawn_blocking(move || {
            let mut connection = connection.lock().map_err(|_| StoreError::Poisoned)?;
            work(&mut connection)
        })
        .await?
    }
}

fn format_timestamp(value: DateTime<Utc>) -> String {
    value.naive_utc().format(TIMESTAMP_FORMAT).to_string()
}

fn parse_timestamp(value: String) -> Result<DateTime<Utc>, StoreError> {
    NaiveDateTime::parse_from_str(&value, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| StoreError::Corrupt {
            column: "created_at",
            value,
        })
}

fn parse_date(value: String) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(&value, "%Y-%m-%d").map_err(|_| StoreError::Corrupt {
        column: "trade_date",
        value,
    })
}

fn find_security_id(connection: &Connection, symbol: &str) -> Result<Option<SecurityId>, StoreError> {
    match connection.query_row(
        "SELECT id FROM securities WHERE symbol = ?",
        params![symbol],
        |row| row.get::<_, i64>(0),
    ) {
        Ok(id) => Ok(Some(SecurityId(id))),
        Err(::duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(error) => Err(error.into()),
    }
}

fn select_symbol_map(connection: &Connection) -> Result<HashMap<String, SecurityId>, StoreError> {
    let mut statement = connection.prepare("SELECT symbol, id FROM securities")?;
    let rows = statement.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, SecurityId(row.get::<_, i64>(1)?)))
    })?;

    let mut symbols = HashMap::new();
    for row in rows {
        let (symbol, id) = row?;
        symbols.insert(symbol, id);
    }
    Ok(symbols)
}

fn insert_security(
    connection: &Connection,
    symbol: &str,
    isin: &str,
) -> Result<Registration, StoreError> {
    let inserted = connection.execute(
        "INSERT INTO securities (symbol, isin, created_at) \
         VALUES (?, ?, CAST(? AS TIMESTAMP)) \
         ON CONFLICT (symbol) DO NOTHING",
        params![symbol, isin, format_timestamp(Utc::now())],
    )?;

    let id = find_security_id(connection, symbol)?.ok_or_else(|| StoreError::DuplicateSecurity {
        symbol: symbol.to_string(),
    })?;

    if inserted == 1 {
        debug!(symbol, %id, "registered security");
        Ok(Registration::Created(id))
    } else {
        debug!(symbol, %id, "security already registered");
        Ok(Registration::Existing(id))
    }
}

fn select_securities(connection: &Connection) -> Result<Vec<Security>, StoreError> {
    let mut statement = connection.prepare(
        "SELECT id, symbol, isin, strftime(created_at, '%Y-%m-%d %H:%M:%S.%f') \
         FROM securities ORDER BY id",
    )?;
    let rows = statement.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
        ))
    })?;

    let mut securities = Vec::new();
    for row in rows {
        let (id, symbol, isin, created_at) = row?;
        securities.push(Security {
            id: SecurityId(id),
            symbol,
            isin,
            created_at: parse_timestamp(created_at)?,
        });
    }
    Ok(securities)
}

fn insert_history(
    connection: &mut Connection,
    records: &[DailyHistoryRecord],
) -> Result<usize, StoreError> {
    // Dropping the transaction without commit rolls every row back.
    let transaction = connection.transaction()?;
    {
        let mut statement = transaction.prepare(
            "INSERT INTO stock_history \
             (security_id, trade_date, open, high, low, close, last, prev_close, \
              total_traded_qty, total_traded_value, total_trades, deliverables, \
              watch_list, is_filtered, created_at) \
             VALUES (?, CAST(? AS DATE), ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, CAST(? AS TIMESTAMP))",
        )?;
        for record in records {
            statement.execute(params![
                record.security_id.0,
                record.trade_date.to_string(),
                record.open,
                record.high,
                record.low,
                record.close,
                record.last,
                record.prev_close,
                record.total_traded_qty,
                record.total_traded_value,
                record.total_trades,
                record.deliverables,
                record.watch_list,
                record.is_filtered,
                format_timestamp(record.created_at),
            ])?;
        }
    }
    transaction.commit()?;

    debug!(rows = records.len(), "committed history batch");
    Ok(records.len())
}

fn select_history(
    connection: &Connection,
    trade_date: NaiveDate,
) -> Result<Vec<DailyHistoryRecord>, StoreError> {
    let mut statement = connection.prepare(
        "SELECT security_id, strftime(trade_date, '%Y-%m-%d'), open, high, low, close, last, \
                prev_close, total_traded_qty, total_traded_value, total_trades, deliverables, \
                watch_list, is_filtered, strftime(created_at, '%Y-%m-%d %H:%M:%S.%f') \
         FROM stock_history WHERE trade_date = CAST(? AS DATE) ORDER BY id",
    )?;
    let rows = statement.query_map(params![trade_date.to_string()], |row| {
        Ok((
            DailyHistoryRecord {
                security_id: SecurityId(row.get(0)?),
                // Filled in below once the text columns are parsed.
                trade_date,
                open: row.get(2)?,
                high: row.get(3)?,
                low: row.get(4)?,
                close: row.get(5)?,
                last: row.get(6)?,
                prev_close: row.get(7)?,
                total_traded_qty: row.get(8)?,
                total_traded_value: row.get(9)?,
                total_trades: row.get(10)?,
                deliverables: row.get(11)?,
                watch_list: row.get(12)?,
                is_filtered: row.get(13)?,
                created_at: DateTime::<Utc>::MIN_UTC,
            },
            row.get::<_, String>(1)?,
            row.get::<_, String>(14)?,
        ))
    })?;

    let mut records = Vec::new();
    for row in rows {
        let (mut record, stored_date, created_at) = row?;
        record.trade_date = parse_date(stored_date)?;
        record.created_at = parse_timestamp(created_at)?;
        records.push(record);
    }
    Ok(records)
}

#[async_trait]
impl SecurityRegistry for DuckDbStore {
    async fn symbol_map(&self) -> Result<HashMap<String, SecurityId>, StoreError> {
        self.run(|connection| select_symbol_map(connection)).await
    }

    async fn create_security(
        &self,
        symbol: &str,
        isin: &str,
    ) -> Result<Registration, StoreError> {
        let symbol = symbol.to_string();
        let isin = isin.to_string();
        self.run(move |connection| insert_security(connection, &symbol, &isin))
            .await
    }

    async fn list_securities(&self) -> Result<Vec<Security>, StoreError> {
        self.run(|connection| select_securities(connection)).await
    }
}

#[async_trait]
impl HistoryStore for DuckDbStore {
    async fn bulk_insert(&self, records: &[DailyHistoryRecord]) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        let records = records.to_vec();
        self.run(move |connection| insert_history(connection, &records))
            .await
    }

    async fn list_for_date(
        &self,
        trade_date: NaiveDate,
    ) -> Result<Vec<DailyHistoryRecord>, StoreError> {
        self.run(move |connection| select_history(connection, trade_date))
            .await
    }
}
