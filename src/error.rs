//! Error taxonomy for the sync engine.
//!
//! Three layers: [`ApiError`] classifies a single failed attempt against the
//! reporting API (the retry loop needs the transient/permanent split),
//! [`FetchError`] is the terminal fetch outcome once the retry policy has
//! been applied, and [`SyncError`] is the per-dataset taxonomy the
//! orchestrator catches and aggregates.

use chrono::NaiveDate;
use thiserror::Error;

use crate::models::DatasetId;

/// A single failed attempt against the GA4 Data API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("rate limited (HTTP 429)")]
    RateLimited,

    #[error("server error (HTTP {status}): {body}")]
    Server { status: u16, body: String },

    #[error("client error (HTTP {status}): {body}")]
    Client { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ApiError {
    /// Whether the retry loop may attempt the request again.
    ///
    /// Network failures, rate limiting and server-side errors are worth a
    /// retry; everything else (auth, malformed query, unparseable body)
    /// will fail the same way next time.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiError::Network(_) | ApiError::RateLimited | ApiError::Server { .. }
        )
    }
}

/// Terminal fetch outcome once the retry policy has been applied.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("permanent failure fetching {dataset}: {source}")]
    Permanent {
        dataset: DatasetId,
        #[source]
        source: ApiError,
    },

    #[error("retries exhausted after {attempts} attempts fetching {dataset}: {source}")]
    Exhausted {
        dataset: DatasetId,
        attempts: u32,
        #[source]
        source: ApiError,
    },
}

/// Per-dataset sync failure. Never crosses a dataset boundary; the
/// orchestrator logs it and moves on to the next dataset.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Fatal: aborts the whole run before any fetch.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// A fetch for a non-empty range returned zero rows. Suspicious, not
    /// fatal: the dataset is skipped and the watermark stays put.
    #[error("empty result set for {dataset} over {start}..{end}")]
    EmptyDataset {
        dataset: DatasetId,
        start: NaiveDate,
        end: NaiveDate,
    },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}
