use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::IntegrationError;
use crate::models::{Configuration, ConfigurationUpdate, NewConfiguration};
use crate::services::logger::Logger;
use crate::services::validation::Validation;
use crate::stores::ConfigStore;

#[derive(Clone)]
pub struct ConfigurationService {
    logger: Logger,
    validation: Validation,
    store: Arc<dyn ConfigStore>,
}

impl ConfigurationService {
    pub fn new(logger: Logger, validation: Validation, store: Arc<dyn ConfigStore>) -> Self {
        Self {
            logger: logger.child("configurations"),
            validation,
            store,
        }
    }

    pub async fn create_configuration(
        &self,
        owner_id: &str,
        input: NewConfiguration,
    ) -> Result<Configuration, IntegrationError> {
        let owner_id = self.validation.ensure_name(owner_id, "Owner id")?;
        let now = Utc::now();
        let config = Configuration {
            id: Uuid::new_v4(),
            owner_id,
            name: self.validation.ensure_name(&input.name, "Configuration name")?,
            base_url: self.validation.ensure_base_url(&input.base_url)?,
            default_headers: self.validation.ensure_headers(&input.default_headers)?,
            auth_method: input.auth_method,
            auth_detail: self.validation.ensure_auth_detail(&input.auth_detail)?,
            rate_limit_per_minute: self
                .validation
                .ensure_rate_limit(input.rate_limit_per_minute)?,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_configuration(&config).await?;
        self.logger.info(
            "Configuration created",
            Some(&serde_json::json!({
                "configuration_id": config.id,
                "name": config.name,
                "auth_method": config.auth_method.as_str(),
            })),
        );
        Ok(config)
    }

    /// Active configurations only; inactive ones read as not found.
    pub async fn get_configuration(
        &self,
        owner_id: &str,
        configuration_id: Uuid,
    ) -> Result<Configuration, IntegrationError> {
        match self
            .store
            .get_configuration(owner_id, configuration_id)
            .await?
        {
            Some(config) if config.is_active => Ok(config),
            _ => Err(IntegrationError::configuration_not_found()),
        }
    }

    pub async fn list_configurations(
        &self,
        owner_id: &str,
    ) -> Result<Vec<Configuration>, IntegrationError> {
        let mut configs: Vec<Configuration> = self
            .store
            .list_configurations(owner_id)
            .await?
            .into_iter()
            .filter(|config| config.is_active)
            .collect();
        configs.sort_by(|a, b| a.name.cmp(&b.name).then(a.created_at.cmp(&b.created_at)));
        Ok(configs)
    }

    pub async fn update_configuration(
        &self,
        owner_id: &str,
        configuration_id: Uuid,
        update: ConfigurationUpdate,
    ) -> Result<Configuration, IntegrationError> {
        let mut config = self.get_configuration(owner_id, configuration_id).await?;
        if let Some(name) = update.name.as_deref() {
            config.name = self.validation.ensure_name(name, "Configuration name")?;
        }
        if let Some(base_url) = update.base_url.as_deref() {
            config.base_url = self.validation.ensure_base_url(base_url)?;
        }
        if let Some(headers) = update.default_headers.as_ref() {
            config.default_headers = self.validation.ensure_headers(headers)?;
        }
        if let Some(method) = update.auth_method {
            config.auth_method = method;
        }
        if let Some(detail) = update.auth_detail.as_ref() {
            config.auth_detail = self.validation.ensure_auth_detail(detail)?;
        }
        if update.rate_limit_per_minute.is_some() {
            config.rate_limit_per_minute = self
                .validation
                .ensure_rate_limit(update.rate_limit_per_minute)?;
        }
        config.updated_at = Utc::now();
        self.store.save_configuration(&config).await?;
        self.logger.info(
            "Configuration updated",
            Some(&serde_json::json!({ "configuration_id": config.id })),
        );
        Ok(config)
    }

    /// Soft delete; credentials and logs stay in place.
    pub async fn deactivate_configuration(
        &self,
        owner_id: &str,
        configuration_id: Uuid,
    ) -> Result<Configuration, IntegrationError> {
        let mut config = self.get_configuration(owner_id, configuration_id).await?;
        config.is_active = false;
        config.updated_at = Utc::now();
        self.store.save_configuration(&config).await?;
        self.logger.info(
            "Configuration deactivated",
            Some(&serde_json::json!({ "configuration_id": config.id })),
        );
        Ok(config)
    }
}
