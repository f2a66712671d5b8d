use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde_json::Value;
use sha2::Sha256;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::constants::webhook::{
    DEFAULT_DELIVERY_LIMIT, PATH_PREFIX, PATH_RANDOM_BYTES, SECRET_PREFIX, SECRET_RANDOM_BYTES,
    SIGNATURE_HEADERS, SIGNATURE_PREFIX, STEP_ID,
};
use crate::errors::IntegrationError;
use crate::models::{
    CallResult, CreatedWebhook, DeliveryResult, DeliveryStatus, ExecutionContext, WebhookAction,
    WebhookDelivery, WebhookEndpoint, WebhookEndpointSpec,
};
use crate::services::invoker::HttpInvoker;
use crate::services::logger::Logger;
use crate::services::validation::Validation;
use crate::stores::{ConfigStore, LogStore};
use crate::utils::redact::redact_header_map;
use crate::utils::text::clip_message;

type HmacSha256 = Hmac<Sha256>;

const MAX_DELIVERY_LIMIT: usize = 500;

/// Runs the action bound to a webhook endpoint.
#[async_trait]
pub trait ActionDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        endpoint: &WebhookEndpoint,
        action: &WebhookAction,
        payload: &Value,
    ) -> Result<CallResult, IntegrationError>;
}

/// Sends the bound call through the invoker on behalf of the endpoint owner.
#[derive(Clone)]
pub struct InvokerDispatcher {
    invoker: HttpInvoker,
}

impl InvokerDispatcher {
    pub fn new(invoker: HttpInvoker) -> Self {
        Self { invoker }
    }
}

#[async_trait]
impl ActionDispatcher for InvokerDispatcher {
    async fn dispatch(
        &self,
        endpoint: &WebhookEndpoint,
        action: &WebhookAction,
        payload: &Value,
    ) -> Result<CallResult, IntegrationError> {
        let mut call = action.call.clone();
        if call.action_id.is_none() {
            call.action_id = Some(format!("webhook:{}", endpoint.id));
        }
        self.invoker
            .execute(
                &endpoint.owner_id,
                action.configuration_id,
                &call,
                &webhook_context(payload),
            )
            .await
    }
}

/// Top-level scalars become variables; the whole payload is step `webhook`.
pub fn webhook_context(payload: &Value) -> ExecutionContext {
    let mut context = ExecutionContext::new().with_step(STEP_ID, payload.clone());
    if let Value::Object(map) = payload {
        for (key, value) in map {
            if !value.is_object() && !value.is_array() {
                context.variables.insert(key.clone(), value.clone());
            }
        }
    }
    context
}

/// `sha256=<hex>` over the exact payload bytes.
pub fn sign_webhook_payload(secret: &str, payload: &[u8]) -> Result<String, IntegrationError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| IntegrationError::internal("Failed to initialize HMAC-SHA256"))?;
    mac.update(payload);
    Ok(format!(
        "{}{}",
        SIGNATURE_PREFIX,
        hex::encode(mac.finalize().into_bytes())
    ))
}

fn verify_signature(secret: &str, payload: &[u8], header: &str) -> Result<(), IntegrationError> {
    let trimmed = header.trim();
    let hex_sig = trimmed.strip_prefix(SIGNATURE_PREFIX).unwrap_or(trimmed);
    let sig_bytes = hex::decode(hex_sig).map_err(|_| IntegrationError::invalid_signature())?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| IntegrationError::internal("Failed to initialize HMAC-SHA256"))?;
    mac.update(payload);
    mac.verify_slice(&sig_bytes)
        .map_err(|_| IntegrationError::invalid_signature())
}

fn find_signature<'a>(headers: &'a BTreeMap<String, String>) -> Option<&'a str> {
    SIGNATURE_HEADERS.iter().find_map(|wanted| {
        headers
            .iter()
            .find(|(name, _)| name.trim().eq_ignore_ascii_case(wanted))
            .map(|(_, value)| value.as_str())
    })
}

fn random_token(prefix: &str, bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    format!("{}{}", prefix, hex::encode(buf))
}

fn parse_payload(payload: &[u8]) -> Value {
    if payload.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(payload)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(payload).into_owned()))
}

#[derive(Clone)]
pub struct WebhookService {
    logger: Logger,
    validation: Validation,
    config_store: Arc<dyn ConfigStore>,
    log_store: Arc<dyn LogStore>,
    dispatcher: Arc<dyn ActionDispatcher>,
}

impl WebhookService {
    pub fn new(
        logger: Logger,
        validation: Validation,
        config_store: Arc<dyn ConfigStore>,
        log_store: Arc<dyn LogStore>,
        dispatcher: Arc<dyn ActionDispatcher>,
    ) -> Self {
        Self {
            logger: logger.child("webhooks"),
            validation,
            config_store,
            log_store,
            dispatcher,
        }
    }

    pub async fn create_webhook_endpoint(
        &self,
        owner_id: &str,
        spec: WebhookEndpointSpec,
    ) -> Result<CreatedWebhook, IntegrationError> {
        let owner_id = self.validation.ensure_name(owner_id, "Owner id")?;
        let name = self.validation.ensure_name(&spec.name, "Webhook name")?;
        if let Some(action) = spec.target_action.as_ref() {
            match self
                .config_store
                .get_configuration(&owner_id, action.configuration_id)
                .await?
            {
                Some(config) if config.is_active => {}
                _ => return Err(IntegrationError::configuration_not_found()),
            }
        }
        let endpoint = WebhookEndpoint {
            id: Uuid::new_v4(),
            owner_id,
            name,
            endpoint_path: random_token(PATH_PREFIX, PATH_RANDOM_BYTES),
            secret: spec
                .signed
                .then(|| random_token(SECRET_PREFIX, SECRET_RANDOM_BYTES)),
            target_action: spec.target_action,
            is_active: true,
            last_triggered_at: None,
            created_at: Utc::now(),
        };
        self.config_store.insert_webhook_endpoint(&endpoint).await?;
        self.logger.info(
            "Webhook endpoint created",
            Some(&serde_json::json!({
                "endpoint_id": endpoint.id,
                "signed": endpoint.secret.is_some(),
                "has_action": endpoint.target_action.is_some(),
            })),
        );
        Ok(CreatedWebhook {
            id: endpoint.id,
            path: endpoint.endpoint_path,
            secret: endpoint.secret,
        })
    }

    /// Verifies and records one inbound delivery. Unknown paths and failed
    /// signature checks are errors; a failed downstream action is not.
    pub async fn receive_webhook(
        &self,
        path: &str,
        headers: &BTreeMap<String, String>,
        payload: &[u8],
        source_ip: Option<&str>,
    ) -> Result<DeliveryResult, IntegrationError> {
        let started = Instant::now();
        let endpoint = self
            .config_store
            .find_webhook_by_path(path.trim())
            .await?
            .ok_or_else(|| IntegrationError::not_found("Webhook endpoint not found"))?;
        let body = parse_payload(payload);

        if let Some(secret) = endpoint.secret.as_deref() {
            let verdict = match find_signature(headers) {
                None => Err(IntegrationError::missing_signature()),
                Some(signature) => verify_signature(secret, payload, signature),
            };
            if let Err(err) = verdict {
                let delivery = self.delivery(
                    &endpoint,
                    headers,
                    body,
                    source_ip,
                    DeliveryStatus::Failed,
                    Some(err.message.clone()),
                    started,
                );
                self.log_store.append_delivery(&delivery).await?;
                self.logger.warn(
                    "Webhook signature rejected",
                    Some(&serde_json::json!({
                        "endpoint_id": endpoint.id,
                        "code": err.code,
                        "source_ip": source_ip,
                    })),
                );
                return Err(err);
            }
        }

        let (status, action, error) = match endpoint.target_action.as_ref() {
            None => (DeliveryStatus::Success, None, None),
            Some(action) => match self.dispatcher.dispatch(&endpoint, action, &body).await {
                Ok(result) if result.success => (DeliveryStatus::Success, Some(result), None),
                Ok(result) => {
                    let error = result.error.clone();
                    (DeliveryStatus::Failed, Some(result), error)
                }
                Err(err) => (DeliveryStatus::Failed, None, Some(err.public_message())),
            },
        };

        let delivery = self.delivery(
            &endpoint,
            headers,
            body,
            source_ip,
            status,
            error.clone(),
            started,
        );
        self.log_store.append_delivery(&delivery).await?;
        if status == DeliveryStatus::Success {
            self.config_store
                .touch_webhook_endpoint(endpoint.id, delivery.created_at)
                .await?;
        }
        self.logger.info(
            "Webhook delivery processed",
            Some(&serde_json::json!({
                "endpoint_id": endpoint.id,
                "delivery_id": delivery.id,
                "status": status.as_str(),
                "processing_time_ms": delivery.processing_time_ms,
            })),
        );

        Ok(DeliveryResult {
            delivery_id: delivery.id,
            endpoint_id: endpoint.id,
            status,
            processing_time_ms: delivery.processing_time_ms,
            action,
            error,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn delivery(
        &self,
        endpoint: &WebhookEndpoint,
        headers: &BTreeMap<String, String>,
        payload: Value,
        source_ip: Option<&str>,
        status: DeliveryStatus,
        error_message: Option<String>,
        started: Instant,
    ) -> WebhookDelivery {
        WebhookDelivery {
            id: Uuid::new_v4(),
            endpoint_id: endpoint.id,
            source_ip: source_ip.map(|ip| ip.to_string()),
            headers: redact_header_map(headers),
            payload,
            status,
            error_message: error_message.map(|msg| clip_message(&msg)),
            processing_time_ms: started.elapsed().as_millis() as u64,
            created_at: Utc::now(),
        }
    }

    pub async fn list_webhook_endpoints(
        &self,
        owner_id: &str,
    ) -> Result<Vec<WebhookEndpoint>, IntegrationError> {
        let mut endpoints = self.config_store.list_webhook_endpoints(owner_id).await?;
        endpoints.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(endpoints)
    }

    async fn owned_endpoint(
        &self,
        owner_id: &str,
        endpoint_id: Uuid,
    ) -> Result<WebhookEndpoint, IntegrationError> {
        self.config_store
            .get_webhook_endpoint(owner_id, endpoint_id)
            .await?
            .ok_or_else(|| IntegrationError::not_found("Webhook endpoint not found"))
    }

    pub async fn deactivate_webhook_endpoint(
        &self,
        owner_id: &str,
        endpoint_id: Uuid,
    ) -> Result<WebhookEndpoint, IntegrationError> {
        let mut endpoint = self.owned_endpoint(owner_id, endpoint_id).await?;
        endpoint.is_active = false;
        self.config_store.save_webhook_endpoint(&endpoint).await?;
        self.logger.info(
            "Webhook endpoint deactivated",
            Some(&serde_json::json!({ "endpoint_id": endpoint.id })),
        );
        Ok(endpoint)
    }

    pub async fn list_webhook_deliveries(
        &self,
        owner_id: &str,
        endpoint_id: Uuid,
        limit: Option<usize>,
    ) -> Result<Vec<WebhookDelivery>, IntegrationError> {
        let endpoint = self.owned_endpoint(owner_id, endpoint_id).await?;
        let limit = limit
            .unwrap_or(DEFAULT_DELIVERY_LIMIT)
            .clamp(1, MAX_DELIVERY_LIMIT);
        Ok(self.log_store.list_deliveries(endpoint.id, limit).await?)
    }
}
