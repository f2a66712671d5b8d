use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::constants::rate_limit::WINDOW_MS;
use crate::errors::IntegrationError;
use crate::services::logger::Logger;
use crate::stores::LogStore;

/// Sliding 60s window derived from usage-log rows. Concurrent callers can
/// both observe `limit - 1` and both proceed.
#[derive(Clone)]
pub struct RateLimiter {
    logger: Logger,
    store: Arc<dyn LogStore>,
}

impl RateLimiter {
    pub fn new(logger: Logger, store: Arc<dyn LogStore>) -> Self {
        Self {
            logger: logger.child("rate_limit"),
            store,
        }
    }

    pub async fn current_count(
        &self,
        owner_id: &str,
        configuration_id: Uuid,
    ) -> Result<u64, IntegrationError> {
        let since = Utc::now() - Duration::milliseconds(WINDOW_MS);
        Ok(self
            .store
            .count_usage_since(owner_id, configuration_id, since)
            .await?)
    }

    pub async fn check_and_throw_if_exceeded(
        &self,
        owner_id: &str,
        configuration_id: Uuid,
        limit: u32,
    ) -> Result<(), IntegrationError> {
        let count = self.current_count(owner_id, configuration_id).await?;
        if count >= u64::from(limit) {
            self.logger.warn(
                "Rate limit exceeded",
                Some(&serde_json::json!({
                    "configuration_id": configuration_id,
                    "limit": limit,
                    "count": count,
                })),
            );
            return Err(IntegrationError::rate_limited(limit));
        }
        Ok(())
    }
}
