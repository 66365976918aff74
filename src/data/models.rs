use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Store-assigned identifier of a registered security.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SecurityId(pub i64);

impl fmt::Display for SecurityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A tradable instrument known to the registry.
///
/// Securities are created the first time their symbol shows up in a bhav
/// feed and are never modified afterwards.
///
/// # Fields
/// * `id`: Identifier assigned by the registry
/// * `symbol`: Exchange ticker, unique within the registry
/// * `isin`: International securities identification number
/// * `created_at`: When the security was first registered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Security {
    pub id: SecurityId,
    pub symbol: String,
    pub isin: String,
    pub created_at: DateTime<Utc>,
}

impl fmt::Display for Security {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.symbol)
    }
}

/// One symbol's end-of-day statistics as delivered by the exchange feed.
///
/// Field names follow the bhav copy columns they are read from. The pipeline
/// treats these values as read-only input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFeedRecord {
    pub symbol: String,
    pub isin: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub last: f64,
    pub prev_close: f64,
    pub total_traded_qty: i64,
    pub total_traded_value: f64,
    pub trade_date: NaiveDate,
    pub total_trades: i64,
    pub deliverables: Option<f64>,
    pub is_filtered: bool,
}

/// A persisted day of trading history for one security.
///
/// # Fields
/// * `security_id`: Security the record belongs to
/// * `trade_date`: Session the statistics describe
/// * `open` .. `prev_close`: Session prices
/// * `total_traded_qty`: Shares traded during the session
/// * `total_traded_value`: Turnover for the session
/// * `total_trades`: Number of trades executed
/// * `deliverables`: Deliverable quantity, absent when the exchange did not publish it
/// * `watch_list`: User flag, never set by ingestion
/// * `is_filtered`: Copied from the feed record
/// * `created_at`: When the record was built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyHistoryRecord {
    pub security_id: SecurityId,
    pub trade_date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub last: f64,
    pub prev_close: f64,
    pub total_traded_qty: i64,
    pub total_traded_value: f64,
    pub total_trades: i64,
    pub deliverables: Option<f64>,
    pub watch_list: bool,
    pub is_filtered: bool,
    pub created_at: DateTime<Utc>,
}

impl DailyHistoryRecord {
    /// Builds a history record from a feed record resolved to `security_id`.
    ///
    /// Every feed field maps one-to-one onto the record; `watch_list` starts
    /// out unset.
    pub fn from_feed(
        security_id: SecurityId,
        raw: &RawFeedRecord,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            security_id,
            trade_date: raw.trade_date,
            open: raw.open,
            high: raw.high,
            low: raw.low,
            close: raw.close,
            last: raw.last,
            prev_close: raw.prev_close,
            total_traded_qty: raw.total_traded_qty,
            total_traded_value: raw.total_traded_value,
            total_trades: raw.total_trades,
            deliverables: raw.deliverables,
            watch_list: false,
            is_filtered: raw.is_filtered,
            created_at,
        }
    }
}

/// Renders `<security id> - <trade date>`. A history row has no id of its
/// own until stored and carries the security id rather than the symbol, so
/// this pair is what identifies it in log lines.
impl fmt::Display for DailyHistoryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.security_id, self.trade_date)
    }
}
