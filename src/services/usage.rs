use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::constants::usage::MAX_WINDOW_HOURS;
use crate::errors::IntegrationError;
use crate::models::{UsageLog, UsageStats};
use crate::services::logger::Logger;
use crate::stores::LogStore;

#[derive(Clone)]
pub struct UsageRecorder {
    logger: Logger,
    store: Arc<dyn LogStore>,
}

fn window_start(window_hours: u32) -> Result<chrono::DateTime<Utc>, IntegrationError> {
    if window_hours == 0 || window_hours > MAX_WINDOW_HOURS {
        return Err(IntegrationError::validation(format!(
            "window_hours must be between 1 and {}",
            MAX_WINDOW_HOURS
        )));
    }
    Ok(Utc::now() - Duration::hours(i64::from(window_hours)))
}

pub fn summarize(rows: &[UsageLog]) -> UsageStats {
    if rows.is_empty() {
        return UsageStats::default();
    }
    let total = rows.len() as u64;
    let successful = rows.iter().filter(|row| row.is_success()).count() as u64;
    let elapsed: u64 = rows.iter().map(|row| row.response_time_ms).sum();
    let bytes: u64 = rows
        .iter()
        .map(|row| row.request_bytes + row.response_bytes)
        .sum();
    UsageStats {
        total_requests: total,
        successful_requests: successful,
        error_rate: (total - successful) as f64 * 100.0 / total as f64,
        average_response_time_ms: elapsed as f64 / total as f64,
        total_bytes: bytes,
    }
}

impl UsageRecorder {
    pub fn new(logger: Logger, store: Arc<dyn LogStore>) -> Self {
        Self {
            logger: logger.child("usage"),
            store,
        }
    }

    /// Persists one row. A failed write is logged and surfaced.
    pub async fn record(&self, entry: &UsageLog) -> Result<(), IntegrationError> {
        if let Err(err) = self.store.append_usage(entry).await {
            self.logger.error(
                "Failed to write usage log",
                Some(&serde_json::json!({
                    "configuration_id": entry.configuration_id,
                    "status_code": entry.status_code,
                    "error": err.to_string(),
                })),
            );
            return Err(err.into());
        }
        self.logger.debug(
            "Usage recorded",
            Some(&serde_json::json!({
                "configuration_id": entry.configuration_id,
                "method": entry.method,
                "endpoint": entry.endpoint,
                "status_code": entry.status_code,
                "response_time_ms": entry.response_time_ms,
            })),
        );
        Ok(())
    }

    pub async fn list_usage_logs(
        &self,
        owner_id: &str,
        configuration_id: Option<Uuid>,
        window_hours: u32,
    ) -> Result<Vec<UsageLog>, IntegrationError> {
        let since = window_start(window_hours)?;
        Ok(self
            .store
            .list_usage_since(owner_id, configuration_id, since)
            .await?)
    }

    pub async fn get_usage_stats(
        &self,
        owner_id: &str,
        configuration_id: Option<Uuid>,
        window_hours: u32,
    ) -> Result<UsageStats, IntegrationError> {
        let rows = self
            .list_usage_logs(owner_id, configuration_id, window_hours)
            .await?;
        Ok(summarize(&rows))
    }
}
