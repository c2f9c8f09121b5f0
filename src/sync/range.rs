//! Date range resolution: the gap between the watermark and the newest
//! non-provisional day.

use chrono::{Duration, NaiveDate};

use crate::error::SyncError;
use crate::models::DateRange;

/// Resolve the dates to fetch for one dataset.
///
/// The cutoff is `today - lag_days`: the most recent days are excluded
/// because the remote source's data for them is still provisional. The range
/// starts the day after the watermark, or at the backfill start when the
/// dataset has never been synced. Returns `None` when the watermark has
/// already reached the cutoff, the common case on repeated runs.
pub fn resolve_fetch_range(
    watermark: Option<NaiveDate>,
    backfill_start: NaiveDate,
    today: NaiveDate,
    lag_days: u32,
) -> Result<Option<DateRange>, SyncError> {
    let cutoff = today - Duration::days(i64::from(lag_days));
    if backfill_start > cutoff {
        return Err(SyncError::Configuration(format!(
            "backfill start {backfill_start} is after the reporting cutoff {cutoff}"
        )));
    }

    let start = match watermark {
        Some(mark) => mark + Duration::days(1),
        None => backfill_start,
    };

    if start > cutoff {
        return Ok(None);
    }
    Ok(Some(DateRange::new(start, cutoff)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn gap_after_watermark() {
        // watermark D, lag 1, today D+6: exactly D+1..D+5
        let range = resolve_fetch_range(Some(d("2024-03-10")), d("2024-01-01"), d("2024-03-16"), 1)
            .unwrap()
            .unwrap();
        assert_eq!(range.start, d("2024-03-11"));
        assert_eq!(range.end, d("2024-03-15"));

        let days: Vec<_> = range.days().collect();
        assert_eq!(
            days,
            vec![
                d("2024-03-11"),
                d("2024-03-12"),
                d("2024-03-13"),
                d("2024-03-14"),
                d("2024-03-15"),
            ]
        );
    }

    #[test]
    fn no_op_when_caught_up() {
        let resolved =
            resolve_fetch_range(Some(d("2024-03-15")), d("2024-01-01"), d("2024-03-16"), 1)
                .unwrap();
        assert!(resolved.is_none());
    }

    #[test]
    fn watermark_past_cutoff_is_still_a_no_op() {
        let resolved =
            resolve_fetch_range(Some(d("2024-03-20")), d("2024-01-01"), d("2024-03-16"), 1)
                .unwrap();
        assert!(resolved.is_none());
    }

    #[test]
    fn first_run_starts_at_backfill() {
        let range = resolve_fetch_range(None, d("2024-03-01"), d("2024-03-16"), 2)
            .unwrap()
            .unwrap();
        assert_eq!(range.start, d("2024-03-01"));
        assert_eq!(range.end, d("2024-03-14"));
    }

    #[test]
    fn zero_lag_includes_today() {
        let range = resolve_fetch_range(Some(d("2024-03-15")), d("2024-01-01"), d("2024-03-16"), 0)
            .unwrap()
            .unwrap();
        assert_eq!(range.start, d("2024-03-16"));
        assert_eq!(range.end, d("2024-03-16"));
    }

    #[test]
    fn backfill_after_cutoff_is_a_configuration_error() {
        let err = resolve_fetch_range(None, d("2024-03-16"), d("2024-03-16"), 1).unwrap_err();
        assert!(matches!(err, SyncError::Configuration(_)));
    }
}
