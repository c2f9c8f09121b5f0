//! Per-dataset sync state machine and run aggregation.
//!
//! Each dataset runs `Idle -> RangeResolved -> Fetched -> Validated ->
//! Written -> WatermarkAdvanced`, with `Failed` reachable from any
//! transition. The datasets run concurrently and fail independently: one
//! dataset's failure never blocks or rolls back another's progress.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use futures_util::future::join_all;
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::error::SyncError;
use crate::ga4::ReportClient;
use crate::models::{DatasetId, DatasetSpec, DateRange, DATASETS};
use crate::storage::WarehouseStorage;
use crate::sync::fetcher::{fetch_with_retry, RetryPolicy};
use crate::sync::range::resolve_fetch_range;

/// States of one dataset's sync run, emitted as the `state` field on the
/// transition log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    RangeResolved,
    Fetched,
    Validated,
    Written,
    WatermarkAdvanced,
    Failed,
}

/// Rolled-up terminal status of one dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// Watermark already at the cutoff; nothing fetched, nothing written.
    UpToDate,
    /// Range fetched, written, watermark advanced.
    Synced,
    /// Terminal failure; sibling datasets are unaffected.
    Failed,
}

/// Terminal outcome of one dataset.
#[derive(Debug)]
pub struct DatasetOutcome {
    pub dataset: DatasetId,
    pub status: SyncStatus,
    pub range: Option<DateRange>,
    pub rows_written: usize,
    pub error: Option<SyncError>,
}

/// Aggregated result of a full run.
#[derive(Debug)]
pub struct RunSummary {
    pub outcomes: Vec<DatasetOutcome>,
}

impl RunSummary {
    pub fn fully_successful(&self) -> bool {
        self.outcomes.iter().all(|o| o.status != SyncStatus::Failed)
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == SyncStatus::Failed)
            .count()
    }

    pub fn format_report(&self) -> String {
        const INNER_WIDTH: usize = 74;

        let mut out = String::new();
        out.push_str(&format!("╔{}╗\n", "═".repeat(INNER_WIDTH)));
        out.push_str(&format!("║{:^1$}║\n", "SYNC RUN SUMMARY", INNER_WIDTH));
        out.push_str(&format!("╠{}╣\n", "═".repeat(INNER_WIDTH)));
        for outcome in &self.outcomes {
            let detail = match outcome.status {
                SyncStatus::UpToDate => "up to date".to_string(),
                SyncStatus::Synced => format!(
                    "synced {} ({} rows)",
                    outcome.range.map(|r| r.to_string()).unwrap_or_default(),
                    outcome.rows_written
                ),
                SyncStatus::Failed => format!(
                    "FAILED: {}",
                    outcome
                        .error
                        .as_ref()
                        .map(|e| e.to_string())
                        .unwrap_or_default()
                ),
            };
            out.push_str(&format!(
                "║  {:<8} {:<63}║\n",
                outcome.dataset.to_string(),
                truncate(&detail, 63)
            ));
        }
        out.push_str(&format!("╚{}╝\n", "═".repeat(INNER_WIDTH)));
        out
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let mut short: String = text.chars().take(max - 1).collect();
        short.push('…');
        short
    }
}

pub struct SyncOrchestrator<C> {
    client: C,
    storage: Arc<WarehouseStorage>,
    config: PipelineConfig,
}

impl<C: ReportClient> SyncOrchestrator<C> {
    pub fn new(client: C, storage: Arc<WarehouseStorage>, config: PipelineConfig) -> Self {
        Self {
            client,
            storage,
            config,
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.config.max_retry_attempts,
            base_delay: Duration::from_secs(self.config.backoff_base_secs),
        }
    }

    /// Run every dataset's state machine to a terminal state.
    ///
    /// A bad backfill window is a configuration error and aborts the whole
    /// run before any fetch; everything else is caught per dataset.
    pub async fn run(&self, today: NaiveDate) -> Result<RunSummary, SyncError> {
        resolve_fetch_range(
            None,
            self.config.backfill_start_date,
            today,
            self.config.reporting_lag_days,
        )?;

        let outcomes = join_all(
            DATASETS
                .iter()
                .map(|spec| self.sync_dataset(spec, today)),
        )
        .await;

        let summary = RunSummary { outcomes };
        info!(
            datasets = summary.outcomes.len(),
            failed = summary.failed_count(),
            "sync run finished"
        );
        Ok(summary)
    }

    async fn sync_dataset(&self, spec: &DatasetSpec, today: NaiveDate) -> DatasetOutcome {
        let mut outcome = DatasetOutcome {
            dataset: spec.id,
            status: SyncStatus::Failed,
            range: None,
            rows_written: 0,
            error: None,
        };

        if let Err(err) = self.try_sync(spec, today, &mut outcome).await {
            match &err {
                SyncError::EmptyDataset { .. } => warn!(
                    dataset = %spec.id,
                    range = ?outcome.range,
                    state = ?SyncState::Failed,
                    error = %err,
                    "dataset sync failed"
                ),
                _ => error!(
                    dataset = %spec.id,
                    range = ?outcome.range,
                    state = ?SyncState::Failed,
                    error = %err,
                    "dataset sync failed"
                ),
            }
            outcome.status = SyncStatus::Failed;
            outcome.error = Some(err);
        }
        outcome
    }

    /// Drive one dataset from `Idle` to `WatermarkAdvanced`, recording
    /// progress into `outcome`. Any error leaves the watermark untouched.
    async fn try_sync(
        &self,
        spec: &DatasetSpec,
        today: NaiveDate,
        outcome: &mut DatasetOutcome,
    ) -> Result<(), SyncError> {
        let watermark = self.storage.watermark(spec.id)?;
        info!(dataset = %spec.id, watermark = ?watermark, state = ?SyncState::Idle, "starting dataset sync");

        let Some(range) = resolve_fetch_range(
            watermark,
            self.config.backfill_start_date,
            today,
            self.config.reporting_lag_days,
        )?
        else {
            info!(dataset = %spec.id, "up to date, nothing to fetch");
            outcome.status = SyncStatus::UpToDate;
            return Ok(());
        };
        outcome.range = Some(range);
        info!(dataset = %spec.id, %range, days = range.num_days(), state = ?SyncState::RangeResolved, "fetch range resolved");

        let rows = fetch_with_retry(&self.client, spec, &range, &self.retry_policy()).await?;
        info!(dataset = %spec.id, %range, rows = rows.len(), state = ?SyncState::Fetched, "report fetched");

        if rows.is_empty() {
            return Err(SyncError::EmptyDataset {
                dataset: spec.id,
                start: range.start,
                end: range.end,
            });
        }
        info!(dataset = %spec.id, %range, state = ?SyncState::Validated, "result set validated");

        let written = self.storage.write_dataset(spec, &range, &rows)?;
        outcome.rows_written = written;
        info!(dataset = %spec.id, %range, rows = written, state = ?SyncState::Written, "dataset written");

        // Only after the transaction above has durably committed.
        self.storage.advance_watermark(spec.id, range.end)?;
        info!(dataset = %spec.id, watermark = %range.end, state = ?SyncState::WatermarkAdvanced, "watermark advanced");

        outcome.status = SyncStatus::Synced;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DatasetId;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn summary_rollup() {
        let summary = RunSummary {
            outcomes: vec![
                DatasetOutcome {
                    dataset: DatasetId::Users,
                    status: SyncStatus::Synced,
                    range: Some(DateRange::new(d("2024-03-11"), d("2024-03-15"))),
                    rows_written: 5,
                    error: None,
                },
                DatasetOutcome {
                    dataset: DatasetId::Content,
                    status: SyncStatus::Failed,
                    range: None,
                    rows_written: 0,
                    error: Some(SyncError::Configuration("boom".into())),
                },
            ],
        };

        assert!(!summary.fully_successful());
        assert_eq!(summary.failed_count(), 1);

        let report = summary.format_report();
        assert!(report.contains("users"));
        assert!(report.contains("synced 2024-03-11..2024-03-15 (5 rows)"));
        assert!(report.contains("FAILED: configuration error: boom"));
    }

    #[test]
    fn long_failure_details_are_truncated() {
        let summary = RunSummary {
            outcomes: vec![DatasetOutcome {
                dataset: DatasetId::Site,
                status: SyncStatus::Failed,
                range: None,
                rows_written: 0,
                error: Some(SyncError::Configuration("x".repeat(200))),
            }],
        };

        let report = summary.format_report();
        assert!(report.contains('…'));
        for line in report.lines() {
            assert!(line.chars().count() <= 76);
        }
    }
}
