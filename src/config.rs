use crate::data::FeedConfig;
use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings for the ingestion job.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub feed: FeedConfig,
}

impl Config {
    /// Reads settings from the process environment.
    ///
    /// Call `dotenv()` first to pick up a `.env` file. Unset variables fall
    /// back to their defaults.
    ///
    /// # Errors
    /// Returns an error if a numeric variable cannot be parsed
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = FeedConfig::default();

        let timeout = match lookup("NSE_TIMEOUT_SECS") {
            Some(value) => Duration::from_secs(
                value
                    .trim()
                    .parse()
                    .with_context(|| format!("NSE_TIMEOUT_SECS must be a whole number, got {value:?}"))?,
            ),
            None => defaults.timeout,
        };

        let feed = FeedConfig {
            base_url: lookup("NSE_BASE_URL").unwrap_or(defaults.base_url),
            bhav_path: lookup("NSE_BHAV_PATH").unwrap_or(defaults.bhav_path),
            delivery_path: lookup("NSE_DELIVERY_PATH").unwrap_or(defaults.delivery_path),
            series: lookup("NSE_SERIES")
                .map(|value| split_list(&value))
                .unwrap_or(defaults.series),
            filtered_series: lookup("NSE_FILTERED_SERIES")
                .map(|value| split_list(&value))
                .unwrap_or(defaults.filtered_series),
            user_agent: lookup("NSE_USER_AGENT").unwrap_or(defaults.user_agent),
            timeout,
        };

        Ok(Self {
            database_path: lookup("BHAV_DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("bhav_history.duckdb")),
            feed,
        })
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|item| item.trim().to_uppercase())
        .filter(|item| !item.is_empty())
        .collect()
}
