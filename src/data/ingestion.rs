use super::models::RawFeedRecord;
use crate::error::FeedError;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Source of end-of-day trading records.
///
/// An empty vector means the exchange had no session on that date; any
/// retrieval or decoding problem is reported as a `FeedError` instead.
#[async_trait]
pub trait DailyFeed: Send + Sync {
    async fn fetch_daily(&self, date: NaiveDate) -> Result<Vec<RawFeedRecord>, FeedError>;
}

/// Settings for the NSE archive client.
///
/// Path templates accept `{yyyy}`, `{mm}`, `{dd}` and `{MON}` (upper-case
/// month abbreviation) placeholders.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Archive host, without a trailing slash.
    pub base_url: String,
    /// Path template of the bhav copy CSV.
    pub bhav_path: String,
    /// Path template of the security-wise delivery position file.
    pub delivery_path: String,
    /// Series kept from the bhav copy.
    pub series: Vec<String>,
    /// Series whose records are flagged `is_filtered`.
    pub filtered_series: Vec<String>,
    /// Sent with every request; the archive rejects blank agents.
    pub user_agent: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: "https://archives.nseindia.com".to_string(),
            bhav_path: "/content/historical/EQUITIES/{yyyy}/{MON}/cm{dd}{MON}{yyyy}bhav.csv"
                .to_string(),
            delivery_path: "/archives/equities/mto/MTO_{dd}{mm}{yyyy}.DAT".to_string(),
            series: vec!["EQ".to_string(), "BE".to_string(), "BZ".to_string()],
            filtered_series: vec!["BE".to_string(), "BZ".to_string()],
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko)"
                .to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Fills the date placeholders of an archive path template.
///
/// # Arguments
/// * `template`: Path containing `{yyyy}`, `{mm}`, `{dd}` or `{MON}`
/// * `date`: Trade date substituted into the placeholders
///
/// # Returns
/// The expanded path
pub fn expand_template(template: &str, date: NaiveDate) -> String {
    template
        .replace("{yyyy}", &date.format("%Y").to_string())
        .replace("{mm}", &date.format("%m").to_string())
        .replace("{dd}", &date.format("%d").to_string())
        .replace("{MON}", &date.format("%b").to_string().to_uppercase())
}

/// One row of the bhav copy CSV. Columns not listed here are ignored.
#[derive(Debug, Deserialize)]
struct BhavRow {
    #[serde(rename = "SYMBOL")]
    symbol: String,
    #[serde(rename = "SERIES")]
    series: String,
    #[serde(rename = "OPEN")]
    open: f64,
    #[serde(rename = "HIGH")]
    high: f64,
    #[serde(rename = "LOW")]
    low: f64,
    #[serde(rename = "CLOSE")]
    close: f64,
    #[serde(rename = "LAST")]
    last: f64,
    #[serde(rename = "PREVCLOSE")]
    prev_close: f64,
    #[serde(rename = "TOTTRDQTY")]
    total_traded_qty: i64,
    #[serde(rename = "TOTTRDVAL")]
    total_traded_value: f64,
    #[serde(rename = "TIMESTAMP")]
    timestamp: String,
    #[serde(rename = "TOTALTRADES")]
    total_trades: i64,
    #[serde(rename = "ISIN")]
    isin: String,
}

fn parse_bhav(body: &str) -> Result<Vec<BhavRow>, FeedError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(body.as_bytes());

    let mut rows = Vec::new();
    for row in reader.deserialize::<BhavRow>() {
        rows.push(row?);
    }
    Ok(rows)
}

/// Reads deliverable quantities from a security-wise delivery position file.
///
/// Only record type `20` lines carry data:
/// `20,<sr no>,<symbol>,<series>,<qty traded>,<deliverable qty>,<pct>`.
fn parse_deliveries(body: &str) -> Result<HashMap<(String, String), f64>, FeedError> {
    let mut deliveries = HashMap::new();
    for line in body.lines() {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() < 6 || fields[0] != "20" {
            continue;
        }

        let quantity = fields[5]
            .parse::<f64>()
            .map_err(|_| FeedError::InvalidField {
                field: "deliverable quantity",
                value: fields[5].to_string(),
            })?;
        deliveries.insert((fields[2].to_string(), fields[3].to_string()), quantity);
    }
    Ok(deliveries)
}

fn parse_trade_date(value: &str) -> Result<NaiveDate, FeedError> {
    NaiveDate::parse_from_str(value, "%d-%b-%Y")
        .or_else(|_| NaiveDate::parse_from_str(value, "%Y-%m-%d"))
        .map_err(|_| FeedError::InvalidField {
            field: "TIMESTAMP",
            value: value.to_string(),
        })
}

/// Daily feed backed by the NSE archive: the bhav copy for prices and the
/// delivery position file for deliverable quantities.
pub struct NseBhavFeed {
    client: reqwest::Client,
    config: FeedConfig,
}

impl NseBhavFeed {
    /// Creates a client for the configured archive.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built
    pub fn new(config: FeedConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .build()?;

        Ok(Self { client, config })
    }

    fn url(&self, template: &str, date: NaiveDate) -> String {
        format!(
            "{}{}",
            self.config.base_url.trim_end_matches('/'),
            expand_template(template, date)
        )
    }

    /// Downloads `url`, mapping a 404 to `None`.
    async fn download(&self, url: &str) -> Result<Option<String>, FeedError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| FeedError::Http {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(FeedError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|source| FeedError::Http {
            url: url.to_string(),
            source,
        })?;
        Ok(Some(body))
    }

    fn to_record(
        &self,
        row: BhavRow,
        deliveries: &HashMap<(String, String), f64>,
    ) -> Result<RawFeedRecord, FeedError> {
        let deliverables = deliveries
            .get(&(row.symbol.clone(), row.series.clone()))
            .copied();

        Ok(RawFeedRecord {
            trade_date: parse_trade_date(&row.timestamp)?,
            is_filtered: self.config.filtered_series.contains(&row.series),
            deliverables,
            symbol: row.symbol,
            isin: row.isin,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            last: row.last,
            prev_close: row.prev_close,
            total_traded_qty: row.total_traded_qty,
            total_traded_value: row.total_traded_value,
            total_trades: row.total_trades,
        })
    }
}

#[async_trait]
impl DailyFeed for NseBhavFeed {
    #[instrument(skip(self))]
    async fn fetch_daily(&self, date: NaiveDate) -> Result<Vec<RawFeedRecord>, FeedError> {
        let bhav_url = self.url(&self.config.bhav_path, date);
        let Some(body) = self.download(&bhav_url).await? else {
            info!(url = %bhav_url, "bhav copy not published");
            return Ok(Vec::new());
        };

        let rows: Vec<BhavRow> = parse_bhav(&body)?
            .into_iter()
            .filter(|row| self.config.series.contains(&row.series))
            .collect();
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let delivery_url = self.url(&self.config.delivery_path, date);
        let deliveries = match self.download(&delivery_url).await? {
            Some(body) => parse_deliveries(&body)?,
            None => {
                warn!(url = %delivery_url, "delivery positions not published, deliverables left empty");
                HashMap::new()
            }
        };

        let records = rows
            .into_iter()
            .map(|row| self.to_record(row, &deliveries))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(records = records.len(), "decoded bhav copy");
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BHAV: &str = "\
SYMBOL,SERIES,OPEN,HIGH,LOW,CLOSE,LAST,PREVCLOSE,TOTTRDQTY,TOTTRDVAL,TIMESTAMP,TOTALTRADES,ISIN,
ACME,EQ,100,105,99,104,104,101,1000,104000,10-JAN-2024,50,INE000A01,
ACME,N1,99,99,99,99,99,99,10,990,10-JAN-2024,1,INE000A02,
NEWCO,BE,10,11,9.5,10.5,10.5,10,500,5250,10-JAN-2024,20,INE999Z99,
";

    const MTO: &str = "\
Security Wise Delivery Position - Compulsory Rolling Settlement
10,MTO,10012024,123456789,0002345
Trade Date <10-JAN-2024>,Settlement Type <N>,Settlement No <2024007>
Record Type,Sr No,Name of Security,Type,Quantity Traded,Deliverable Quantity,% of Deliverable Quantity to Traded Quantity
20,1,ACME,EQ,1000,300,30.00
20,2,OTHER,EQ,50,5,10.00
";

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 10).unwrap()
    }

    fn feed_for(server: &MockServer) -> NseBhavFeed {
        NseBhavFeed::new(FeedConfig {
            base_url: server.uri(),
            bhav_path: "/bhav/cm{dd}{MON}{yyyy}bhav.csv".to_string(),
            delivery_path: "/mto/MTO_{dd}{mm}{yyyy}.DAT".to_string(),
            ..FeedConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_expand_template() {
        let expanded = expand_template(&FeedConfig::default().bhav_path, date());
        assert_eq!(
            expanded,
            "/content/historical/EQUITIES/2024/JAN/cm10JAN2024bhav.csv"
        );
        assert_eq!(
            expand_template("MTO_{dd}{mm}{yyyy}.DAT", date()),
            "MTO_10012024.DAT"
        );
    }

    #[test]
    fn test_parse_bhav_ignores_trailing_column() {
        let rows = parse_bhav(BHAV).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].symbol, "ACME");
        assert_eq!(rows[0].total_traded_qty, 1000);
        assert_eq!(rows[2].low, 9.5);
        assert_eq!(rows[2].isin, "INE999Z99");
    }

    #[test]
    fn test_parse_bhav_rejects_bad_number() {
        let body = "SYMBOL,SERIES,OPEN,HIGH,LOW,CLOSE,LAST,PREVCLOSE,TOTTRDQTY,TOTTRDVAL,TIMESTAMP,TOTALTRADES,ISIN\n\
                    ACME,EQ,abc,105,99,104,104,101,1000,104000,10-JAN-2024,50,INE000A01\n";
        assert!(matches!(parse_bhav(body), Err(FeedError::Csv(_))));
    }

    #[test]
    fn test_parse_deliveries_reads_record_type_20() {
        let deliveries = parse_deliveries(MTO).unwrap();
        assert_eq!(deliveries.len(), 2);
        assert_eq!(
            deliveries.get(&("ACME".to_string(), "EQ".to_string())),
            Some(&300.0)
        );
    }

    #[test]
    fn test_parse_trade_date_formats() {
        assert_eq!(parse_trade_date("10-JAN-2024").unwrap(), date());
        assert_eq!(parse_trade_date("2024-01-10").unwrap(), date());
        assert!(parse_trade_date("yesterday").is_err());
    }

    #[tokio::test]
    async fn test_fetch_daily_joins_deliveries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bhav/cm10JAN2024bhav.csv"))
            .respond_with(ResponseTemplate::new(200).set_body_string(BHAV))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/mto/MTO_10012024.DAT"))
            .respond_with(ResponseTemplate::new(200).set_body_string(MTO))
            .mount(&server)
            .await;

        let records = feed_for(&server).fetch_daily(date()).await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].symbol, "ACME");
        assert_eq!(records[0].deliverables, Some(300.0));
        assert!(!records[0].is_filtered);
        assert_eq!(records[0].trade_date, date());
        assert_eq!(records[1].symbol, "NEWCO");
        assert_eq!(records[1].deliverables, None);
        assert!(records[1].is_filtered);
    }

    #[tokio::test]
    async fn test_fetch_daily_missing_bhav_is_empty() {
        let server = MockServer::start().await;

        let records = feed_for(&server).fetch_daily(date()).await.unwrap();

        assert!(records.is_empty());
    }

    async fn mount_bhav_without_deliveries(server: &MockServer, body: &str) {
        Mock::given(method("GET"))
            .and(path("/bhav/cm10JAN2024bhav.csv"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body.to_string()))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/mto/MTO_10012024.DAT"))
            .respond_with(ResponseTemplate::new(200).set_body_string(MTO))
            .expect(0)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_fetch_daily_header_only_bhav_is_empty() {
        let server = MockServer::start().await;
        mount_bhav_without_deliveries(
            &server,
            "SYMBOL,SERIES,OPEN,HIGH,LOW,CLOSE,LAST,PREVCLOSE,TOTTRDQTY,TOTTRDVAL,TIMESTAMP,TOTALTRADES,ISIN,\n",
        )
        .await;

        let records = feed_for(&server).fetch_daily(date()).await.unwrap();

        assert!(records.is_empty());
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url.path(), "/bhav/cm10JAN2024bhav.csv");
    }

    #[tokio::test]
    async fn test_fetch_daily_unlisted_series_only_is_empty() {
        let server = MockServer::start().await;
        mount_bhav_without_deliveries(
            &server,
            "SYMBOL,SERIES,OPEN,HIGH,LOW,CLOSE,LAST,PREVCLOSE,TOTTRDQTY,TOTTRDVAL,TIMESTAMP,TOTALTRADES,ISIN,\n\
             ACME,N1,99,99,99,99,99,99,10,990,10-JAN-2024,1,INE000A02,\n",
        )
        .await;

        let records = feed_for(&server).fetch_daily(date()).await.unwrap();

        assert!(records.is_empty());
        let requests = server.received_requests().await.unwrap();
        assert!(requests
            .iter()
            .all(|request| request.url.path() != "/mto/MTO_10012024.DAT"));
    }

    #[tokio::test]
    async fn test_fetch_daily_missing_deliveries_leaves_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bhav/cm10JAN2024bhav.csv"))
            .respond_with(ResponseTemplate::new(200).set_body_string(BHAV))
            .mount(&server)
            .await;

        let records = feed_for(&server).fetch_daily(date()).await.unwrap();

        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|record| record.deliverables.is_none()));
    }

    #[tokio::test]
    async fn test_fetch_daily_server_error_is_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = feed_for(&server).fetch_daily(date()).await;

        assert!(matches!(result, Err(FeedError::Status { status: 503, .. })));
    }
}
