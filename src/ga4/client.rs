//! GA4 Data API report client.
//!
//! One logical `runReport` call per dataset per date range. The client is
//! deliberately thin: credential exchange happens outside this crate, and
//! the client consumes a pre-issued OAuth access token read from the
//! configured credentials file.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::PipelineConfig;
use crate::error::{ApiError, SyncError};
use crate::models::{DatasetSpec, DateRange, ReportRow};

const GA4_API_BASE: &str = "https://analyticsdata.googleapis.com/v1beta";
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Seam between the sync engine and the remote reporting API.
///
/// One call fetches the full tabular result set for one dataset over one
/// date range. Implementations classify their failures via [`ApiError`] so
/// the retry loop can tell transient from permanent.
#[async_trait]
pub trait ReportClient: Send + Sync {
    async fn run_report(
        &self,
        spec: &DatasetSpec,
        range: &DateRange,
    ) -> Result<Vec<ReportRow>, ApiError>;
}

#[async_trait]
impl<T: ReportClient + ?Sized> ReportClient for Arc<T> {
    async fn run_report(
        &self,
        spec: &DatasetSpec,
        range: &DateRange,
    ) -> Result<Vec<ReportRow>, ApiError> {
        (**self).run_report(spec, range).await
    }
}

pub struct Ga4Client {
    http: reqwest::Client,
    property_id: String,
    access_token: String,
}

impl Ga4Client {
    pub fn new(property_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent("ga4-warehouse/0.1")
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http,
            property_id: property_id.into(),
            access_token: access_token.into(),
        }
    }

    /// Build a client from pipeline configuration, reading the access token
    /// from the configured credentials file.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, SyncError> {
        let token = read_access_token(&config.credentials_path)?;
        Ok(Self::new(config.property_id.clone(), token))
    }
}

fn read_access_token(path: &Path) -> Result<String, SyncError> {
    let raw = std::fs::read_to_string(path).map_err(|err| {
        SyncError::Configuration(format!(
            "cannot read credentials file {}: {err}",
            path.display()
        ))
    })?;
    let token = raw.trim().to_string();
    if token.is_empty() {
        return Err(SyncError::Configuration(format!(
            "credentials file {} is empty",
            path.display()
        )));
    }
    Ok(token)
}

// =============================================================================
// Wire format
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunReportRequest<'a> {
    date_ranges: [ApiDateRange; 1],
    dimensions: Vec<ApiName<'a>>,
    metrics: Vec<ApiName<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiDateRange {
    start_date: String,
    end_date: String,
}

#[derive(Debug, Serialize)]
struct ApiName<'a> {
    name: &'a str,
}

#[derive(Debug, Deserialize)]
struct RunReportResponse {
    #[serde(default)]
    rows: Vec<ApiRow>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiRow {
    #[serde(default)]
    dimension_values: Vec<ApiValue>,
    #[serde(default)]
    metric_values: Vec<ApiValue>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiValue {
    #[serde(default)]
    value: String,
}

#[async_trait]
impl ReportClient for Ga4Client {
    async fn run_report(
        &self,
        spec: &DatasetSpec,
        range: &DateRange,
    ) -> Result<Vec<ReportRow>, ApiError> {
        let url = format!(
            "{GA4_API_BASE}/properties/{}:runReport",
            self.property_id
        );
        let request = RunReportRequest {
            date_ranges: [ApiDateRange {
                start_date: range.start.format("%Y-%m-%d").to_string(),
                end_date: range.end.format("%Y-%m-%d").to_string(),
            }],
            dimensions: spec
                .api_dimensions
                .iter()
                .map(|&name| ApiName { name })
                .collect(),
            metrics: spec
                .api_metrics
                .iter()
                .map(|&name| ApiName { name })
                .collect(),
        };

        debug!(dataset = %spec.id, %range, "issuing runReport request");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ApiError::RateLimited);
        }
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Server {
                status: status.as_u16(),
                body,
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Client {
                status: status.as_u16(),
                body,
            });
        }

        let report: RunReportResponse = response
            .json()
            .await
            .map_err(|err| ApiError::Malformed(err.to_string()))?;

        parse_report(spec, report)
    }
}

/// Convert the string-typed wire rows into [`ReportRow`]s.
fn parse_report(spec: &DatasetSpec, report: RunReportResponse) -> Result<Vec<ReportRow>, ApiError> {
    let mut rows = Vec::with_capacity(report.rows.len());
    for row in report.rows {
        if row.dimension_values.len() < spec.api_dimensions.len() {
            return Err(ApiError::Malformed(format!(
                "{}: expected {} dimension values, got {}",
                spec.id,
                spec.api_dimensions.len(),
                row.dimension_values.len()
            )));
        }
        if row.metric_values.len() < spec.api_metrics.len() {
            return Err(ApiError::Malformed(format!(
                "{}: expected {} metric values, got {}",
                spec.id,
                spec.api_metrics.len(),
                row.metric_values.len()
            )));
        }

        let date = parse_report_date(&row.dimension_values[0].value)?;
        let dimension_key = if spec.has_key_dimension() {
            row.dimension_values[1].value.clone()
        } else {
            String::new()
        };
        let measures = row.metric_values[..spec.api_metrics.len()]
            .iter()
            .map(|v| {
                v.value.parse::<f64>().map_err(|err| {
                    ApiError::Malformed(format!("metric value {:?}: {err}", v.value))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        rows.push(ReportRow {
            date,
            dimension_key,
            measures,
        });
    }
    Ok(rows)
}

/// GA4 emits dates as `YYYYMMDD`; `YYYY-MM-DD` shows up in older exports.
fn parse_report_date(raw: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
        .map_err(|err| ApiError::Malformed(format!("bad report date {raw:?}: {err}")))
}
