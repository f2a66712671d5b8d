use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use super::{ConfigStore, LogStore};
use crate::errors::StoreError;
use crate::models::{
    Configuration, Credential, CredentialType, UsageLog, WebhookDelivery, WebhookEndpoint,
};

#[derive(Default)]
struct Tables {
    configurations: HashMap<Uuid, Configuration>,
    credentials: Vec<Credential>,
    webhooks: HashMap<Uuid, WebhookEndpoint>,
    usage: Vec<UsageLog>,
    deliveries: Vec<WebhookDelivery>,
}

/// Process-local store. All tables sit behind one lock so multi-row updates
/// are observed atomically.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables.write().map_err(|_| StoreError::Poisoned)
    }

    pub fn usage_len(&self) -> usize {
        self.read().map(|t| t.usage.len()).unwrap_or(0)
    }

    pub fn credentials_for(&self, configuration_id: Uuid) -> Vec<Credential> {
        self.read()
            .map(|t| {
                t.credentials
                    .iter()
                    .filter(|c| c.configuration_id == configuration_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn insert_configuration(&self, config: &Configuration) -> Result<(), StoreError> {
        self.write()?.configurations.insert(config.id, config.clone());
        Ok(())
    }

    async fn get_configuration(
        &self,
        owner_id: &str,
        id: Uuid,
    ) -> Result<Option<Configuration>, StoreError> {
        Ok(self
            .read()?
            .configurations
            .get(&id)
            .filter(|c| c.owner_id == owner_id)
            .cloned())
    }

    async fn list_configurations(&self, owner_id: &str) -> Result<Vec<Configuration>, StoreError> {
        let mut out: Vec<Configuration> = self
            .read()?
            .configurations
            .values()
            .filter(|c| c.owner_id == owner_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn save_configuration(&self, config: &Configuration) -> Result<(), StoreError> {
        self.write()?.configurations.insert(config.id, config.clone());
        Ok(())
    }

    async fn replace_active_credential(&self, credential: &Credential) -> Result<u64, StoreError> {
        let mut tables = self.write()?;
        let mut deactivated = 0;
        for existing in tables.credentials.iter_mut() {
            if existing.is_active
                && existing.configuration_id == credential.configuration_id
                && existing.credential_type == credential.credential_type
            {
                existing.is_active = false;
                deactivated += 1;
            }
        }
        tables.credentials.push(credential.clone());
        Ok(deactivated)
    }

    async fn active_credential(
        &self,
        configuration_id: Uuid,
        credential_type: CredentialType,
    ) -> Result<Option<Credential>, StoreError> {
        Ok(self
            .read()?
            .credentials
            .iter()
            .rev()
            .find(|c| {
                c.is_active
                    && c.configuration_id == configuration_id
                    && c.credential_type == credential_type
            })
            .cloned())
    }

    async fn deactivate_credential(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.write()?;
        let Some(found) = tables
            .credentials
            .iter_mut()
            .find(|c| c.id == id && c.is_active)
        else {
            return Ok(false);
        };
        found.is_active = false;
        Ok(true)
    }

    async fn insert_webhook_endpoint(&self, endpoint: &WebhookEndpoint) -> Result<(), StoreError> {
        self.write()?.webhooks.insert(endpoint.id, endpoint.clone());
        Ok(())
    }

    async fn find_webhook_by_path(
        &self,
        path: &str,
    ) -> Result<Option<WebhookEndpoint>, StoreError> {
        Ok(self
            .read()?
            .webhooks
            .values()
            .find(|w| w.is_active && w.endpoint_path == path)
            .cloned())
    }

    async fn get_webhook_endpoint(
        &self,
        owner_id: &str,
        id: Uuid,
    ) -> Result<Option<WebhookEndpoint>, StoreError> {
        Ok(self
            .read()?
            .webhooks
            .get(&id)
            .filter(|w| w.owner_id == owner_id)
            .cloned())
    }

    async fn list_webhook_endpoints(
        &self,
        owner_id: &str,
    ) -> Result<Vec<WebhookEndpoint>, StoreError> {
        let mut out: Vec<WebhookEndpoint> = self
            .read()?
            .webhooks
            .values()
            .filter(|w| w.owner_id == owner_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn save_webhook_endpoint(&self, endpoint: &WebhookEndpoint) -> Result<(), StoreError> {
        self.write()?.webhooks.insert(endpoint.id, endpoint.clone());
        Ok(())
    }

    async fn touch_webhook_endpoint(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        if let Some(endpoint) = self.write()?.webhooks.get_mut(&id) {
            endpoint.last_triggered_at = Some(at);
        }
        Ok(())
    }
}

#[async_trait]
impl LogStore for MemoryStore {
    async fn append_usage(&self, entry: &UsageLog) -> Result<(), StoreError> {
        self.write()?.usage.push(entry.clone());
        Ok(())
    }

    async fn count_usage_since(
        &self,
        owner_id: &str,
        configuration_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        Ok(self
            .read()?
            .usage
            .iter()
            .filter(|u| {
                u.owner_id == owner_id
                    && u.configuration_id == configuration_id
                    && u.created_at >= since
            })
            .count() as u64)
    }

    async fn list_usage_since(
        &self,
        owner_id: &str,
        configuration_id: Option<Uuid>,
        since: DateTime<Utc>,
    ) -> Result<Vec<UsageLog>, StoreError> {
        let mut out: Vec<UsageLog> = self
            .read()?
            .usage
            .iter()
            .filter(|u| u.owner_id == owner_id && u.created_at >= since)
            .filter(|u| configuration_id.map_or(true, |id| u.configuration_id == id))
            .cloned()
            .collect();
        out.reverse();
        Ok(out)
    }

    async fn append_delivery(&self, delivery: &WebhookDelivery) -> Result<(), StoreError> {
        self.write()?.deliveries.push(delivery.clone());
        Ok(())
    }

    async fn list_deliveries(
        &self,
        endpoint_id: Uuid,
        limit: usize,
    ) -> Result<Vec<WebhookDelivery>, StoreError> {
        Ok(self
            .read()?
            .deliveries
            .iter()
            .rev()
            .filter(|d| d.endpoint_id == endpoint_id)
            .take(limit)
            .cloned()
            .collect())
    }
}
