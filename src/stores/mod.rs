pub mod memory_store;
pub mod sqlite_store;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::StoreError;
use crate::models::{
    Configuration, Credential, CredentialType, UsageLog, WebhookDelivery, WebhookEndpoint,
};

pub use memory_store::MemoryStore;
pub use sqlite_store::SqliteStore;

/// Owner-scoped rows for configurations, credentials and webhook endpoints.
/// Nothing here hard-deletes: rows are deactivated so audit records stay valid.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn insert_configuration(&self, config: &Configuration) -> Result<(), StoreError>;

    async fn get_configuration(
        &self,
        owner_id: &str,
        id: Uuid,
    ) -> Result<Option<Configuration>, StoreError>;

    async fn list_configurations(&self, owner_id: &str) -> Result<Vec<Configuration>, StoreError>;

    async fn save_configuration(&self, config: &Configuration) -> Result<(), StoreError>;

    /// Deactivates every active credential for the same (configuration, type)
    /// and inserts `credential` as one atomic step. Returns how many were deactivated.
    async fn replace_active_credential(&self, credential: &Credential) -> Result<u64, StoreError>;

    /// Most recently stored active credential for the pair.
    async fn active_credential(
        &self,
        configuration_id: Uuid,
        credential_type: CredentialType,
    ) -> Result<Option<Credential>, StoreError>;

    async fn deactivate_credential(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn insert_webhook_endpoint(&self, endpoint: &WebhookEndpoint) -> Result<(), StoreError>;

    /// Active endpoints only.
    async fn find_webhook_by_path(&self, path: &str)
        -> Result<Option<WebhookEndpoint>, StoreError>;

    async fn get_webhook_endpoint(
        &self,
        owner_id: &str,
        id: Uuid,
    ) -> Result<Option<WebhookEndpoint>, StoreError>;

    async fn list_webhook_endpoints(&self, owner_id: &str)
        -> Result<Vec<WebhookEndpoint>, StoreError>;

    async fn save_webhook_endpoint(&self, endpoint: &WebhookEndpoint) -> Result<(), StoreError>;

    async fn touch_webhook_endpoint(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;
}

/// Append-only audit rows. The rate limiter reads its window from here.
#[async_trait]
pub trait LogStore: Send + Sync {
    async fn append_usage(&self, entry: &UsageLog) -> Result<(), StoreError>;

    async fn count_usage_since(
        &self,
        owner_id: &str,
        configuration_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    async fn list_usage_since(
        &self,
        owner_id: &str,
        configuration_id: Option<Uuid>,
        since: DateTime<Utc>,
    ) -> Result<Vec<UsageLog>, StoreError>;

    async fn append_delivery(&self, delivery: &WebhookDelivery) -> Result<(), StoreError>;

    /// Newest first.
    async fn list_deliveries(
        &self,
        endpoint_id: Uuid,
        limit: usize,
    ) -> Result<Vec<WebhookDelivery>, StoreError>;
}
