//! CSV projections of the fact tables.
//!
//! A read-only byproduct of a successful run. Export never touches
//! watermarks or fact tables; a failure here is logged by the caller and
//! does not affect the run outcome.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use super::WarehouseStorage;
use crate::models::DatasetSpec;

impl WarehouseStorage {
    /// Export one fact table to `<dir>/<table>.csv`, creating the directory
    /// if needed. Rows come out ordered by `(date, dimension_key)`.
    pub fn export_fact_csv(&self, spec: &DatasetSpec, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)
            .with_context(|| format!("cannot create export directory {}", dir.display()))?;
        let path = dir.join(format!("{}.csv", spec.table));

        let rows = self.load_fact_rows(spec)?;

        let mut out = String::new();
        out.push_str("date,dimension_key");
        for col in spec.measure_columns {
            out.push(',');
            out.push_str(col);
        }
        out.push('\n');

        for row in &rows {
            out.push_str(&csv_field(&row.date));
            out.push(',');
            out.push_str(&csv_field(&row.dimension_key));
            for measure in &row.measures {
                out.push(',');
                out.push_str(&format_measure(*measure));
            }
            out.push('\n');
        }

        fs::write(&path, out).with_context(|| format!("cannot write {}", path.display()))?;
        info!(table = spec.table, rows = rows.len(), path = %path.display(), "fact table exported");
        Ok(path)
    }
}

/// Quote a field when it contains a delimiter, quote or newline.
fn csv_field(raw: &str) -> String {
    if raw.contains(&[',', '"', '\n', '\r'][..]) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

/// Render integral measures without a trailing `.0`.
fn format_measure(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}
