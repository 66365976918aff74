use crate::data::{DailyFeed, DailyHistoryRecord, SymbolResolver};
use crate::error::UpdateError;
use crate::storage::{HistoryStore, SecurityRegistry};
use chrono::{Local, NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument};

/// What a successful `update_history` run did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UpdateOutcome {
    /// History rows were committed for the trade date.
    Ingested {
        trade_date: NaiveDate,
        records: usize,
        securities_created: usize,
    },
    /// The feed had nothing for the trade date; nothing was written.
    NoData { trade_date: NaiveDate },
}

/// Pulls one day of bhav data into the history store.
///
/// Runs on one updater are serialized: a second `update_history` call waits
/// for the first to finish before taking its registry snapshot.
pub struct HistoryUpdater {
    feed: Arc<dyn DailyFeed>,
    registry: Arc<dyn SecurityRegistry>,
    history: Arc<dyn HistoryStore>,
    gate: Mutex<()>,
}

impl HistoryUpdater {
    /// Creates an updater over the given feed and stores.
    ///
    /// # Arguments
    /// * `feed`: Source of the day's bhav records
    /// * `registry`: Security registry used for symbol resolution
    /// * `history`: Store receiving the committed batch
    pub fn new(
        feed: Arc<dyn DailyFeed>,
        registry: Arc<dyn SecurityRegistry>,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        Self {
            feed,
            registry,
            history,
            gate: Mutex::new(()),
        }
    }

    /// Ingests the bhav data for `trade_date`, or for today when `None`.
    ///
    /// The default date is taken from the local clock when the call is made.
    ///
    /// # Workflow
    /// 1. Snapshot the registry's symbol mapping
    /// 2. Fetch the feed for the date
    /// 3. Resolve every record to a security, registering unseen symbols
    /// 4. Commit all history rows in one atomic batch
    ///
    /// # Errors
    /// * `UpdateError::RegistryRead` if the symbol snapshot could not be loaded; nothing is written
    /// * `UpdateError::FeedUnavailable` if the feed could not be fetched; nothing is written
    /// * `UpdateError::StoreWrite` if registering a security or the batch fails.
    ///   Securities registered before the failure are kept.
    #[instrument(skip(self))]
    pub async fn update_history(
        &self,
        trade_date: Option<NaiveDate>,
    ) -> Result<UpdateOutcome, UpdateError> {
        let trade_date = trade_date.unwrap_or_else(|| Local::now().date_naive());
        let _running = self.gate.lock().await;

        let snapshot = self
            .registry
            .symbol_map()
            .await
            .map_err(UpdateError::RegistryRead)?;
        let feed_records = self
            .feed
            .fetch_daily(trade_date)
            .await
            .map_err(|source| UpdateError::FeedUnavailable {
                date: trade_date,
                source,
            })?;

        let mut resolver = SymbolResolver::new(snapshot);
        let created_at = Utc::now();
        let mut history = Vec::with_capacity(feed_records.len());

        for record in &feed_records {
            let security_id = resolver.resolve(self.registry.as_ref(), record).await?;
            history.push(DailyHistoryRecord::from_feed(security_id, record, created_at));
        }

        if history.is_empty() {
            info!(%trade_date, "no data found on NSE");
            return Ok(UpdateOutcome::NoData { trade_date });
        }

        let records = self.history.bulk_insert(&history).await?;
        info!(
            %trade_date,
            records,
            securities_created = resolver.created(),
            "stored daily history"
        );

        Ok(UpdateOutcome::Ingested {
            trade_date,
            records,
            securities_created: resolver.created(),
        })
    }
}
