//! Relational warehouse: schema ownership, transactional upserts and
//! watermark persistence.
//!
//! One SQLite connection behind a mutex, held only across synchronous calls.
//! This module owns all DDL and every transaction boundary; callers get
//! whole-dataset writes that either commit completely or leave the tables
//! untouched.

pub mod export;

use std::path::Path;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, TransactionBehavior};
use tracing::{debug, info};

use crate::error::SyncError;
use crate::models::{DatasetId, DatasetSpec, DateRange, ReportRow};

const DATE_FORMAT: &str = "%Y-%m-%d";

const SCHEMA_SQL: &str = r#"
-- Durability / integrity settings
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

-- Shared calendar dimension, append-only
CREATE TABLE IF NOT EXISTS date_dim (
    date TEXT PRIMARY KEY,
    year INTEGER NOT NULL,
    month INTEGER NOT NULL,
    day_of_week INTEGER NOT NULL
) WITHOUT ROWID;

-- Property-wide user metrics, one row per date
CREATE TABLE IF NOT EXISTS user_metrics (
    date TEXT NOT NULL REFERENCES date_dim(date),
    dimension_key TEXT NOT NULL,
    users INTEGER NOT NULL,
    sessions INTEGER NOT NULL,
    engagement_rate REAL NOT NULL,
    conversions INTEGER NOT NULL,
    avg_session_duration REAL NOT NULL,
    PRIMARY KEY (date, dimension_key)
);

-- Per-page content metrics, keyed by page title
CREATE TABLE IF NOT EXISTS content_metrics (
    date TEXT NOT NULL REFERENCES date_dim(date),
    dimension_key TEXT NOT NULL,
    page_views INTEGER NOT NULL,
    sessions INTEGER NOT NULL,
    engagement_rate REAL NOT NULL,
    engagement_duration REAL NOT NULL,
    PRIMARY KEY (date, dimension_key)
);

-- Site search metrics, keyed by search term
CREATE TABLE IF NOT EXISTS site_metrics (
    date TEXT NOT NULL REFERENCES date_dim(date),
    dimension_key TEXT NOT NULL,
    events INTEGER NOT NULL,
    page_views INTEGER NOT NULL,
    PRIMARY KEY (date, dimension_key)
);

-- Per-dataset sync watermarks
CREATE TABLE IF NOT EXISTS sync_state (
    dataset_id TEXT PRIMARY KEY,
    last_synced_date TEXT NOT NULL
) WITHOUT ROWID;
"#;

/// One projected fact row, date already rendered as ISO text.
#[derive(Debug, Clone, PartialEq)]
pub struct FactRow {
    pub date: String,
    pub dimension_key: String,
    pub measures: Vec<f64>,
}

/// SQLite-backed warehouse.
pub struct WarehouseStorage {
    conn: Arc<Mutex<Connection>>,
}

impl WarehouseStorage {
    /// Open or create the warehouse and apply the schema. Safe to call every
    /// run; all DDL is `IF NOT EXISTS`.
    pub fn open(db_path: &str) -> Result<Self, SyncError> {
        let path = Path::new(db_path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|err| {
                    SyncError::Configuration(format!(
                        "cannot create database directory {}: {err}",
                        parent.display()
                    ))
                })?;
            }
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(db_path, flags)?;
        conn.execute_batch(SCHEMA_SQL)?;

        info!(path = %db_path, "warehouse opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory warehouse (for testing).
    pub fn open_memory() -> Result<Self, SyncError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Write one dataset's fetched rows for a resolved range.
    ///
    /// Fills the date dimension for every date of the range, then upserts
    /// the fact rows on `(date, dimension_key)`. Both steps run in a single
    /// IMMEDIATE transaction: any failure rolls the whole write back and the
    /// tables are unchanged from before the call. An empty `rows` for a
    /// non-empty range is an anomaly and is rejected before the transaction
    /// starts.
    pub fn write_dataset(
        &self,
        spec: &DatasetSpec,
        range: &DateRange,
        rows: &[ReportRow],
    ) -> Result<usize, SyncError> {
        if rows.is_empty() {
            return Err(SyncError::EmptyDataset {
                dataset: spec.id,
                start: range.start,
                end: range.end,
            });
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        for date in range.days() {
            tx.execute(
                "INSERT INTO date_dim (date, year, month, day_of_week) \
                 VALUES (?1, ?2, ?3, ?4) ON CONFLICT(date) DO NOTHING",
                params![
                    date.format(DATE_FORMAT).to_string(),
                    date.year(),
                    date.month(),
                    date.weekday().number_from_monday(),
                ],
            )?;
        }

        let upsert = spec.upsert_sql();
        {
            let mut stmt = tx.prepare(&upsert)?;
            for row in rows {
                let date_text = row.date.format(DATE_FORMAT).to_string();
                let mut bound: Vec<&dyn rusqlite::ToSql> =
                    Vec::with_capacity(2 + row.measures.len());
                bound.push(&date_text);
                bound.push(&row.dimension_key);
                for measure in &row.measures {
                    bound.push(measure);
                }
                stmt.execute(&bound[..])?;
            }
        }

        tx.commit()?;
        debug!(dataset = %spec.id, rows = rows.len(), "dataset committed");
        Ok(rows.len())
    }

    /// Last fully synced date for a dataset, if it has ever synced.
    pub fn watermark(&self, dataset: DatasetId) -> Result<Option<NaiveDate>, SyncError> {
        let conn = self.conn.lock();
        let date = conn
            .query_row(
                "SELECT last_synced_date FROM sync_state WHERE dataset_id = ?1",
                params![dataset.as_str()],
                |row| {
                    let text: String = row.get(0)?;
                    NaiveDate::parse_from_str(&text, DATE_FORMAT).map_err(|err| {
                        rusqlite::Error::FromSqlConversionFailure(
                            0,
                            rusqlite::types::Type::Text,
                            Box::new(err),
                        )
                    })
                },
            )
            .optional()?;
        Ok(date)
    }

    /// Advance a dataset watermark. Monotonic: a stale caller can never move
    /// it backward.
    pub fn advance_watermark(&self, dataset: DatasetId, date: NaiveDate) -> Result<(), SyncError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sync_state (dataset_id, last_synced_date) VALUES (?1, ?2) \
             ON CONFLICT(dataset_id) DO UPDATE SET last_synced_date = excluded.last_synced_date \
             WHERE excluded.last_synced_date > sync_state.last_synced_date",
            params![dataset.as_str(), date.format(DATE_FORMAT).to_string()],
        )?;
        Ok(())
    }

    /// Number of fact rows for a dataset.
    pub fn fact_row_count(&self, spec: &DatasetSpec) -> Result<usize, SyncError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", spec.table),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Number of rows in the date dimension.
    pub fn date_dim_count(&self) -> Result<usize, SyncError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM date_dim", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Ordered projection of one fact table, used by the CSV export and by
    /// content comparisons in tests.
    pub fn load_fact_rows(&self, spec: &DatasetSpec) -> Result<Vec<FactRow>, SyncError> {
        let conn = self.conn.lock();
        let sql = spec.select_sql();
        let mut stmt = conn.prepare(&sql)?;
        let measure_count = spec.measure_columns.len();

        let rows = stmt
            .query_map([], |row| {
                let date: String = row.get(0)?;
                let dimension_key: String = row.get(1)?;
                let mut measures = Vec::with_capacity(measure_count);
                for i in 0..measure_count {
                    measures.push(row.get::<_, f64>(2 + i)?);
                }
                Ok(FactRow {
                    date,
                    dimension_key,
                    measures,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CONTENT_METRICS, SITE_METRICS, USER_METRICS};

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn range(start: &str, end: &str) -> DateRange {
        DateRange::new(d(start), d(end))
    }

    fn make_row(spec: &DatasetSpec, date: &str, key: &str, seed: f64) -> ReportRow {
        ReportRow {
            date: d(date),
            dimension_key: key.to_string(),
            measures: (0..spec.measure_columns.len())
                .map(|i| seed + i as f64)
                .collect(),
        }
    }

    #[test]
    fn schema_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("warehouse.db");
        let db_path = db_path.to_str().unwrap();

        {
            let storage = WarehouseStorage::open(db_path).unwrap();
            let r = range("2024-03-11", "2024-03-11");
            let rows = vec![make_row(&SITE_METRICS, "2024-03-11", "rust", 10.0)];
            storage.write_dataset(&SITE_METRICS, &r, &rows).unwrap();
        }

        // Second open re-applies the DDL and keeps existing data.
        let storage = WarehouseStorage::open(db_path).unwrap();
        assert_eq!(storage.fact_row_count(&SITE_METRICS).unwrap(), 1);
        assert_eq!(storage.date_dim_count().unwrap(), 1);
    }

    #[test]
    fn rewrite_replaces_instead_of_duplicating() {
        let storage = WarehouseStorage::open_memory().unwrap();
        let r = range("2024-03-11", "2024-03-12");

        let first = vec![
            make_row(&CONTENT_METRICS, "2024-03-11", "Home", 10.0),
            make_row(&CONTENT_METRICS, "2024-03-12", "Home", 20.0),
        ];
        storage.write_dataset(&CONTENT_METRICS, &r, &first).unwrap();

        // Same keys, new measures: counts stay put, values are replaced.
        let second = vec![
            make_row(&CONTENT_METRICS, "2024-03-11", "Home", 30.0),
            make_row(&CONTENT_METRICS, "2024-03-12", "Home", 40.0),
        ];
        storage
            .write_dataset(&CONTENT_METRICS, &r, &second)
            .unwrap();

        assert_eq!(storage.fact_row_count(&CONTENT_METRICS).unwrap(), 2);
        assert_eq!(storage.date_dim_count().unwrap(), 2);

        let loaded = storage.load_fact_rows(&CONTENT_METRICS).unwrap();
        assert_eq!(loaded[0].measures[0], 30.0);
        assert_eq!(loaded[1].measures[0], 40.0);
    }

    #[test]
    fn identical_rewrite_is_idempotent() {
        let storage = WarehouseStorage::open_memory().unwrap();
        let r = range("2024-03-11", "2024-03-12");
        let rows = vec![
            make_row(&USER_METRICS, "2024-03-11", "", 10.0),
            make_row(&USER_METRICS, "2024-03-12", "", 20.0),
        ];

        storage.write_dataset(&USER_METRICS, &r, &rows).unwrap();
        let before = storage.load_fact_rows(&USER_METRICS).unwrap();

        storage.write_dataset(&USER_METRICS, &r, &rows).unwrap();
        let after = storage.load_fact_rows(&USER_METRICS).unwrap();

        assert_eq!(before, after);
    }

    #[test]
    fn empty_rows_are_rejected() {
        let storage = WarehouseStorage::open_memory().unwrap();
        let r = range("2024-03-11", "2024-03-12");

        let err = storage.write_dataset(&USER_METRICS, &r, &[]).unwrap_err();
        assert!(matches!(err, SyncError::EmptyDataset { .. }));
        assert_eq!(storage.fact_row_count(&USER_METRICS).unwrap(), 0);
        assert_eq!(storage.date_dim_count().unwrap(), 0);
    }

    #[test]
    fn failed_write_rolls_back_completely() {
        let storage = WarehouseStorage::open_memory().unwrap();
        let r = range("2024-03-11", "2024-03-12");

        // The second row's date lies outside the range, so its date_dim row
        // is missing and the foreign key rejects it mid-transaction.
        let rows = vec![
            make_row(&SITE_METRICS, "2024-03-11", "rust", 10.0),
            make_row(&SITE_METRICS, "2024-04-01", "go", 20.0),
        ];

        let err = storage.write_dataset(&SITE_METRICS, &r, &rows).unwrap_err();
        assert!(matches!(err, SyncError::Storage(_)));

        // Neither the fact rows nor the date-dimension fill survived.
        assert_eq!(storage.fact_row_count(&SITE_METRICS).unwrap(), 0);
        assert_eq!(storage.date_dim_count().unwrap(), 0);
    }

    #[test]
    fn date_dim_rows_carry_derived_fields() {
        let storage = WarehouseStorage::open_memory().unwrap();
        let r = range("2024-03-11", "2024-03-11"); // a Monday
        let rows = vec![make_row(&USER_METRICS, "2024-03-11", "", 1.0)];
        storage.write_dataset(&USER_METRICS, &r, &rows).unwrap();

        let conn = storage.conn.lock();
        let (year, month, dow): (i32, u32, u32) = conn
            .query_row(
                "SELECT year, month, day_of_week FROM date_dim WHERE date = '2024-03-11'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();

        assert_eq!(year, 2024);
        assert_eq!(month, 3);
        assert_eq!(dow, 1);
    }

    #[test]
    fn watermark_round_trip_and_monotonicity() {
        let storage = WarehouseStorage::open_memory().unwrap();
        assert!(storage.watermark(DatasetId::Users).unwrap().is_none());

        storage
            .advance_watermark(DatasetId::Users, d("2024-03-15"))
            .unwrap();
        assert_eq!(
            storage.watermark(DatasetId::Users).unwrap(),
            Some(d("2024-03-15"))
        );

        // A stale advance cannot rewind the watermark.
        storage
            .advance_watermark(DatasetId::Users, d("2024-03-10"))
            .unwrap();
        assert_eq!(
            storage.watermark(DatasetId::Users).unwrap(),
            Some(d("2024-03-15"))
        );

        storage
            .advance_watermark(DatasetId::Users, d("2024-03-20"))
            .unwrap();
        assert_eq!(
            storage.watermark(DatasetId::Users).unwrap(),
            Some(d("2024-03-20"))
        );

        // Watermarks are independent per dataset.
        assert!(storage.watermark(DatasetId::Content).unwrap().is_none());
    }

    #[test]
    fn date_dim_is_shared_across_datasets() {
        let storage = WarehouseStorage::open_memory().unwrap();
        let r = range("2024-03-11", "2024-03-11");

        storage
            .write_dataset(
                &USER_METRICS,
                &r,
                &[make_row(&USER_METRICS, "2024-03-11", "", 1.0)],
            )
            .unwrap();
        storage
            .write_dataset(
                &SITE_METRICS,
                &r,
                &[make_row(&SITE_METRICS, "2024-03-11", "rust", 1.0)],
            )
            .unwrap();

        // Both datasets reference the same calendar row.
        assert_eq!(storage.date_dim_count().unwrap(), 1);
    }
}
