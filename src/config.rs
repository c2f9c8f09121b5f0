//! Pipeline configuration loaded from the environment.
//!
//! A `.env` file is honored when present. Missing required variables and
//! unparseable values are configuration errors, which abort the run before
//! any fetch.

use std::path::PathBuf;

use chrono::{Duration, NaiveDate, Utc};

use crate::error::SyncError;

/// Days of history fetched on a first run when no backfill start is set.
const DEFAULT_BACKFILL_DAYS: i64 = 30;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// GA4 property the reports are pulled from.
    pub property_id: String,
    /// File holding a pre-issued OAuth access token for the Data API.
    pub credentials_path: PathBuf,
    /// SQLite warehouse path.
    pub database_path: String,
    /// Directory for post-run CSV exports; disabled when unset.
    pub export_dir: Option<PathBuf>,
    /// Earliest date ever fetched; the watermark fallback on a first run.
    pub backfill_start_date: NaiveDate,
    /// Most recent days excluded from fetching because the remote data for
    /// them is still provisional.
    pub reporting_lag_days: u32,
    /// Fetch attempts per dataset per run.
    pub max_retry_attempts: u32,
    /// Base delay for exponential backoff between attempts.
    pub backoff_base_secs: u64,
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, SyncError> {
        dotenv::dotenv().ok();

        let property_id = std::env::var("GA4_PROPERTY_ID")
            .map_err(|_| SyncError::Configuration("GA4_PROPERTY_ID is not set".into()))?;

        let credentials_path = std::env::var("GA4_CREDENTIALS_PATH")
            .map_err(|_| SyncError::Configuration("GA4_CREDENTIALS_PATH is not set".into()))?
            .into();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "ga4_warehouse.db".to_string());

        let export_dir = std::env::var("EXPORT_DIR").ok().map(PathBuf::from);

        let backfill_start_date = match std::env::var("BACKFILL_START_DATE") {
            Ok(raw) => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|err| {
                SyncError::Configuration(format!("invalid BACKFILL_START_DATE {raw:?}: {err}"))
            })?,
            Err(_) => Utc::now().date_naive() - Duration::days(DEFAULT_BACKFILL_DAYS),
        };

        let reporting_lag_days = parse_env_or("REPORTING_LAG_DAYS", 1)?;
        let max_retry_attempts = parse_env_or("MAX_RETRY_ATTEMPTS", 3)?;
        let backoff_base_secs = parse_env_or("BACKOFF_BASE_SECS", 1)?;

        if max_retry_attempts == 0 {
            return Err(SyncError::Configuration(
                "MAX_RETRY_ATTEMPTS must be at least 1".into(),
            ));
        }

        Ok(Self {
            property_id,
            credentials_path,
            database_path,
            export_dir,
            backfill_start_date,
            reporting_lag_days,
            max_retry_attempts,
            backoff_base_secs,
        })
    }
}

fn parse_env_or<T>(name: &str, default: T) -> Result<T, SyncError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|err| SyncError::Configuration(format!("invalid {name} {raw:?}: {err}"))),
        Err(_) => Ok(default),
    }
}
