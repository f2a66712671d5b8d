use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::IntegrationError;
use crate::models::{
    CallResult, CallSpec, Configuration, ConfigurationUpdate, CreatedWebhook, Credential,
    CredentialType, DeliveryResult, ExecutionContext, NewConfiguration, UsageLog, UsageStats,
    WebhookDelivery, WebhookEndpoint, WebhookEndpointSpec,
};
use crate::services::configuration::ConfigurationService;
use crate::services::credentials::CredentialService;
use crate::services::invoker::HttpInvoker;
use crate::services::logger::Logger;
use crate::services::rate_limiter::RateLimiter;
use crate::services::settings::Settings;
use crate::services::url_guard::{DnsResolver, SystemResolver, UrlGuard};
use crate::services::usage::UsageRecorder;
use crate::services::validation::Validation;
use crate::services::vault::Vault;
use crate::services::webhook::{ActionDispatcher, InvokerDispatcher, WebhookService};
use crate::stores::{ConfigStore, LogStore, MemoryStore, SqliteStore};

/// Composition root. Build one per process and share it by reference.
#[derive(Clone)]
pub struct App {
    pub logger: Logger,
    pub settings: Settings,
    pub configurations: ConfigurationService,
    pub credentials: CredentialService,
    pub invoker: HttpInvoker,
    pub usage: UsageRecorder,
    pub webhooks: WebhookService,
    validation: Validation,
    config_store: Arc<dyn ConfigStore>,
    log_store: Arc<dyn LogStore>,
}

impl App {
    /// SQLite when `database_path` is set, in-memory tables otherwise.
    pub fn initialize(settings: Settings) -> Result<Self, IntegrationError> {
        let (config_store, log_store): (Arc<dyn ConfigStore>, Arc<dyn LogStore>) =
            match settings.database_path.as_ref() {
                Some(path) => {
                    let store = Arc::new(SqliteStore::open(path)?);
                    (
                        store.clone() as Arc<dyn ConfigStore>,
                        store as Arc<dyn LogStore>,
                    )
                }
                None => {
                    let store = Arc::new(MemoryStore::new());
                    (
                        store.clone() as Arc<dyn ConfigStore>,
                        store as Arc<dyn LogStore>,
                    )
                }
            };
        Ok(Self::with_stores(
            settings,
            config_store,
            log_store,
            Arc::new(SystemResolver),
        ))
    }

    pub fn with_stores(
        settings: Settings,
        config_store: Arc<dyn ConfigStore>,
        log_store: Arc<dyn LogStore>,
        resolver: Arc<dyn DnsResolver>,
    ) -> Self {
        let logger = Logger::new("callgate");
        let validation = Validation::new();
        let vault = Arc::new(Vault::new(settings.encryption_key.clone()));

        let configurations =
            ConfigurationService::new(logger.clone(), validation.clone(), config_store.clone());
        let credentials = CredentialService::new(logger.clone(), vault, config_store.clone());
        let guard = UrlGuard::new(logger.clone(), resolver)
            .allow_private_networks(settings.allow_private_networks);
        let limiter = RateLimiter::new(logger.clone(), log_store.clone());
        let usage = UsageRecorder::new(logger.clone(), log_store.clone());
        let invoker = HttpInvoker::new(
            logger.clone(),
            validation.clone(),
            configurations.clone(),
            credentials.clone(),
            guard,
            limiter,
            usage.clone(),
            &settings,
        );
        let webhooks = WebhookService::new(
            logger.clone(),
            validation.clone(),
            config_store.clone(),
            log_store.clone(),
            Arc::new(InvokerDispatcher::new(invoker.clone())),
        );

        logger.debug(
            "Initialized",
            Some(&serde_json::json!({
                "persistent": settings.database_path.is_some(),
                "allow_private_networks": settings.allow_private_networks,
                "default_timeout_ms": settings.default_timeout_ms,
            })),
        );

        Self {
            logger,
            settings,
            configurations,
            credentials,
            invoker,
            usage,
            webhooks,
            validation,
            config_store,
            log_store,
        }
    }

    /// Replaces the default invoker-backed webhook action dispatcher.
    pub fn with_action_dispatcher(mut self, dispatcher: Arc<dyn ActionDispatcher>) -> Self {
        self.webhooks = WebhookService::new(
            self.logger.clone(),
            self.validation.clone(),
            self.config_store.clone(),
            self.log_store.clone(),
            dispatcher,
        );
        self
    }

    pub async fn create_configuration(
        &self,
        owner_id: &str,
        input: NewConfiguration,
    ) -> Result<Configuration, IntegrationError> {
        self.configurations.create_configuration(owner_id, input).await
    }

    pub async fn get_configuration(
        &self,
        owner_id: &str,
        configuration_id: Uuid,
    ) -> Result<Configuration, IntegrationError> {
        self.configurations
            .get_configuration(owner_id, configuration_id)
            .await
    }

    pub async fn list_configurations(
        &self,
        owner_id: &str,
    ) -> Result<Vec<Configuration>, IntegrationError> {
        self.configurations.list_configurations(owner_id).await
    }

    pub async fn update_configuration(
        &self,
        owner_id: &str,
        configuration_id: Uuid,
        update: ConfigurationUpdate,
    ) -> Result<Configuration, IntegrationError> {
        self.configurations
            .update_configuration(owner_id, configuration_id, update)
            .await
    }

    pub async fn deactivate_configuration(
        &self,
        owner_id: &str,
        configuration_id: Uuid,
    ) -> Result<Configuration, IntegrationError> {
        self.configurations
            .deactivate_configuration(owner_id, configuration_id)
            .await
    }

    pub async fn test_configuration(
        &self,
        owner_id: &str,
        configuration_id: Uuid,
    ) -> Result<CallResult, IntegrationError> {
        self.invoker
            .test_configuration(owner_id, configuration_id)
            .await
    }

    pub async fn store_credential(
        &self,
        owner_id: &str,
        configuration_id: Uuid,
        credential_type: CredentialType,
        plaintext: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Credential, IntegrationError> {
        self.credentials
            .store_credential(
                owner_id,
                configuration_id,
                credential_type,
                plaintext,
                expires_at,
            )
            .await
    }

    pub async fn get_credential(
        &self,
        owner_id: &str,
        configuration_id: Uuid,
        credential_type: CredentialType,
    ) -> Result<Option<String>, IntegrationError> {
        self.credentials
            .get_credential(owner_id, configuration_id, credential_type)
            .await
    }

    pub async fn delete_credential(
        &self,
        owner_id: &str,
        configuration_id: Uuid,
        credential_type: CredentialType,
    ) -> Result<bool, IntegrationError> {
        self.credentials
            .delete_credential(owner_id, configuration_id, credential_type)
            .await
    }

    pub async fn execute(
        &self,
        owner_id: &str,
        configuration_id: Uuid,
        call: &CallSpec,
        context: &ExecutionContext,
    ) -> Result<CallResult, IntegrationError> {
        self.invoker
            .execute(owner_id, configuration_id, call, context)
            .await
    }

    pub async fn create_webhook_endpoint(
        &self,
        owner_id: &str,
        spec: WebhookEndpointSpec,
    ) -> Result<CreatedWebhook, IntegrationError> {
        self.webhooks.create_webhook_endpoint(owner_id, spec).await
    }

    pub async fn receive_webhook(
        &self,
        path: &str,
        headers: &BTreeMap<String, String>,
        payload: &[u8],
        source_ip: Option<&str>,
    ) -> Result<DeliveryResult, IntegrationError> {
        self.webhooks
            .receive_webhook(path, headers, payload, source_ip)
            .await
    }

    pub async fn list_webhook_endpoints(
        &self,
        owner_id: &str,
    ) -> Result<Vec<WebhookEndpoint>, IntegrationError> {
        self.webhooks.list_webhook_endpoints(owner_id).await
    }

    pub async fn deactivate_webhook_endpoint(
        &self,
        owner_id: &str,
        endpoint_id: Uuid,
    ) -> Result<WebhookEndpoint, IntegrationError> {
        self.webhooks
            .deactivate_webhook_endpoint(owner_id, endpoint_id)
            .await
    }

    pub async fn list_webhook_deliveries(
        &self,
        owner_id: &str,
        endpoint_id: Uuid,
        limit: Option<usize>,
    ) -> Result<Vec<WebhookDelivery>, IntegrationError> {
        self.webhooks
            .list_webhook_deliveries(owner_id, endpoint_id, limit)
            .await
    }

    pub async fn get_usage_stats(
        &self,
        owner_id: &str,
        configuration_id: Option<Uuid>,
        window_hours: u32,
    ) -> Result<UsageStats, IntegrationError> {
        self.usage
            .get_usage_stats(owner_id, configuration_id, window_hours)
            .await
    }

    pub async fn list_usage_logs(
        &self,
        owner_id: &str,
        configuration_id: Option<Uuid>,
        window_hours: u32,
    ) -> Result<Vec<UsageLog>, IntegrationError> {
        self.usage
            .list_usage_logs(owner_id, configuration_id, window_hours)
            .await
    }
}
