//! Bounded retry with exponential backoff around one logical report fetch.

use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::ga4::ReportClient;
use crate::models::{DatasetSpec, DateRange, ReportRow};

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Retry policy for transient fetch failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based): base, 2x base,
    /// 4x base, ... capped at 30s.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << (attempt - 1).min(16);
        self.base_delay.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

/// Fetch one dataset over one range, retrying transient failures only.
///
/// Permanent failures propagate immediately with zero retries; exhausting
/// all attempts propagates the last transient cause. No state is
/// mutated here; the backoff sleeps are the only suspension points, so a
/// concurrently running sibling dataset is never blocked by them.
pub async fn fetch_with_retry<C>(
    client: &C,
    spec: &DatasetSpec,
    range: &DateRange,
    policy: &RetryPolicy,
) -> Result<Vec<ReportRow>, FetchError>
where
    C: ReportClient + ?Sized,
{
    let mut attempt = 1u32;
    loop {
        match client.run_report(spec, range).await {
            Ok(rows) => {
                debug!(dataset = %spec.id, %range, rows = rows.len(), attempt, "fetch succeeded");
                return Ok(rows);
            }
            Err(err) if !err.is_transient() => {
                return Err(FetchError::Permanent {
                    dataset: spec.id,
                    source: err,
                });
            }
            Err(err) => {
                if attempt >= policy.max_attempts {
                    return Err(FetchError::Exhausted {
                        dataset: spec.id,
                        attempts: attempt,
                        source: err,
                    });
                }
                let delay = policy.backoff_delay(attempt);
                warn!(
                    dataset = %spec.id,
                    %range,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient fetch failure, backing off"
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
