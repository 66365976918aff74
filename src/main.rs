use anyhow::Context;
use bhav_history::data::NseBhavFeed;
use bhav_history::storage::DuckDbStore;
use bhav_history::{Config, HistoryUpdater, UpdateError, UpdateOutcome};
use chrono::NaiveDate;
use clap::Parser;
use dotenv::dotenv;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Loads one day of NSE bhav data into the local history database.
#[derive(Debug, Parser)]
#[command(name = "bhav-history", version)]
struct Cli {
    /// Trade date to ingest (YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Database file, overriding BHAV_DATABASE_PATH.
    #[arg(long)]
    database: Option<PathBuf>,

    /// Print the run summary as JSON on stdout.
    #[arg(long)]
    json: bool,
}

/// Logs the result of a run and renders the JSON summary when requested.
///
/// # Arguments
/// * `result`: Result of `update_history`
/// * `json`: Whether to render the summary as JSON
///
/// # Returns
/// The summary line for stdout on success, `None` when the run failed. A
/// failure is logged here once and not returned again.
///
/// # Errors
/// Returns an error if the summary cannot be serialized
fn report(
    result: Result<UpdateOutcome, UpdateError>,
    json: bool,
) -> anyhow::Result<Option<String>> {
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(error = %err, "bhav ingestion failed");
            return Ok(None);
        }
    };

    match &outcome {
        UpdateOutcome::Ingested {
            trade_date,
            records,
            securities_created,
        } => info!(%trade_date, records, securities_created, "ingestion complete"),
        UpdateOutcome::NoData { trade_date } => info!(%trade_date, "ingestion complete, market closed"),
    }

    if json {
        Ok(Some(serde_json::to_string(&outcome)?))
    } else {
        Ok(Some(String::new()))
    }
}

/// Entry point for the daily ingestion job.
///
/// # Workflow Steps
/// - Load environment variables from .env file
/// - Open the history database
/// - Fetch and store the bhav data for the requested date
///
/// # Returns
/// Returns success when data was stored or the exchange had no session,
/// otherwise a failure exit code so the scheduler sees a non-zero exit
#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Load environment variables from .env file
    dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env().context("invalid configuration")?;
    if let Some(database) = cli.database {
        config.database_path = database;
    }

    let store = Arc::new(
        DuckDbStore::open(&config.database_path).with_context(|| {
            format!("failed to open database {}", config.database_path.display())
        })?,
    );
    let feed = Arc::new(NseBhavFeed::new(config.feed)?);
    let updater = HistoryUpdater::new(feed, store.clone(), store);

    match report(updater.update_history(cli.date).await, cli.json)? {
        Some(summary) => {
            if !summary.is_empty() {
                println!("{summary}");
            }
            Ok(ExitCode::SUCCESS)
        }
        None => Ok(ExitCode::FAILURE),
    }
}
