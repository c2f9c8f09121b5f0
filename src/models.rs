//! Shared data model: the dataset catalog, fetched report rows and date
//! ranges.
//!
//! A dataset is the unit of synchronization: one fact table, one remote
//! report query, one watermark. The catalog below is the complete mapping of
//! logical datasets to their GA4 query parameters; everything else in the
//! crate is generic over a [`DatasetSpec`].

use std::fmt;

use chrono::NaiveDate;

/// Logical dataset identifiers, also used as `sync_state.dataset_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatasetId {
    Users,
    Content,
    Site,
}

impl DatasetId {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetId::Users => "users",
            DatasetId::Content => "content",
            DatasetId::Site => "site",
        }
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mapping of a logical dataset to its fact table and remote query
/// parameters.
#[derive(Debug, Clone, Copy)]
pub struct DatasetSpec {
    pub id: DatasetId,
    /// Fact table name.
    pub table: &'static str,
    /// Measure column names, aligned with `api_metrics`.
    pub measure_columns: &'static [&'static str],
    /// GA4 report dimensions: `date` first, then the optional key dimension.
    pub api_dimensions: &'static [&'static str],
    /// GA4 report metrics.
    pub api_metrics: &'static [&'static str],
}

impl DatasetSpec {
    /// Whether the remote report carries a secondary key dimension. Datasets
    /// without one are keyed by date alone and store an empty
    /// `dimension_key`.
    pub fn has_key_dimension(&self) -> bool {
        self.api_dimensions.len() > 1
    }

    /// Upsert statement for this fact table. Re-running the same write
    /// replaces measures on the composite key instead of duplicating rows.
    pub fn upsert_sql(&self) -> String {
        let columns = self.measure_columns.join(", ");
        let placeholders: Vec<String> = (0..self.measure_columns.len())
            .map(|i| format!("?{}", i + 3))
            .collect();
        let updates: Vec<String> = self
            .measure_columns
            .iter()
            .map(|col| format!("{col} = excluded.{col}"))
            .collect();
        format!(
            "INSERT INTO {} (date, dimension_key, {}) VALUES (?1, ?2, {}) \
             ON CONFLICT(date, dimension_key) DO UPDATE SET {}",
            self.table,
            columns,
            placeholders.join(", "),
            updates.join(", ")
        )
    }

    /// Ordered projection of the fact table, used by the CSV export and by
    /// content comparisons in tests.
    pub fn select_sql(&self) -> String {
        format!(
            "SELECT date, dimension_key, {} FROM {} ORDER BY date, dimension_key",
            self.measure_columns.join(", "),
            self.table
        )
    }
}

/// Property-wide user activity, one row per date (no key dimension).
pub const USER_METRICS: DatasetSpec = DatasetSpec {
    id: DatasetId::Users,
    table: "user_metrics",
    measure_columns: &[
        "users",
        "sessions",
        "engagement_rate",
        "conversions",
        "avg_session_duration",
    ],
    api_dimensions: &["date"],
    api_metrics: &[
        "activeUsers",
        "sessions",
        "engagementRate",
        "conversions",
        "averageSessionDuration",
    ],
};

/// Per-page content metrics, keyed by page title.
pub const CONTENT_METRICS: DatasetSpec = DatasetSpec {
    id: DatasetId::Content,
    table: "content_metrics",
    measure_columns: &[
        "page_views",
        "sessions",
        "engagement_rate",
        "engagement_duration",
    ],
    api_dimensions: &["date", "pageTitle"],
    api_metrics: &[
        "screenPageViews",
        "sessions",
        "engagementRate",
        "userEngagementDuration",
    ],
};

/// Site search metrics, keyed by search term.
pub const SITE_METRICS: DatasetSpec = DatasetSpec {
    id: DatasetId::Site,
    table: "site_metrics",
    measure_columns: &["events", "page_views"],
    api_dimensions: &["date", "searchTerm"],
    api_metrics: &["eventCount", "screenPageViews"],
};

/// All datasets a sync run covers.
pub const DATASETS: &[DatasetSpec] = &[USER_METRICS, CONTENT_METRICS, SITE_METRICS];

/// One row of a fetched report: the calendar date, the key dimension value
/// (empty for datasets keyed by date alone), and the measures in
/// `measure_columns` order.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    pub date: NaiveDate,
    pub dimension_key: String,
    pub measures: Vec<f64>,
}

/// Inclusive calendar date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn num_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Ordered, contiguous dates of the range.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |date| *date <= end)
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}
