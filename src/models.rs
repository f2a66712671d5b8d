use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use crate::errors::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    #[default]
    None,
    Bearer,
    ApiKey,
    Basic,
}

impl AuthMethod {
    /// The credential type a configured method pulls from the vault.
    pub fn credential_type(self) -> Option<CredentialType> {
        match self {
            AuthMethod::None => None,
            AuthMethod::Bearer => Some(CredentialType::Bearer),
            AuthMethod::ApiKey => Some(CredentialType::ApiKey),
            AuthMethod::Basic => Some(CredentialType::Basic),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AuthMethod::None => "none",
            AuthMethod::Bearer => "bearer",
            AuthMethod::ApiKey => "api_key",
            AuthMethod::Basic => "basic",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "none" | "" => Some(AuthMethod::None),
            "bearer" => Some(AuthMethod::Bearer),
            "api_key" | "apikey" => Some(AuthMethod::ApiKey),
            "basic" => Some(AuthMethod::Basic),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialType {
    Bearer,
    ApiKey,
    Basic,
}

impl CredentialType {
    pub fn as_str(self) -> &'static str {
        match self {
            CredentialType::Bearer => "bearer",
            CredentialType::ApiKey => "api_key",
            CredentialType::Basic => "basic",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "bearer" => Some(CredentialType::Bearer),
            "api_key" | "apikey" => Some(CredentialType::ApiKey),
            "basic" => Some(CredentialType::Basic),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthPlacement {
    #[default]
    Header,
    Query,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AuthDetail {
    #[serde(default)]
    pub placement: AuthPlacement,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    pub id: Uuid,
    pub owner_id: String,
    pub name: String,
    pub base_url: String,
    pub default_headers: BTreeMap<String, String>,
    pub auth_method: AuthMethod,
    pub auth_detail: AuthDetail,
    pub rate_limit_per_minute: u32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NewConfiguration {
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub default_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub auth_method: AuthMethod,
    #[serde(default)]
    pub auth_detail: AuthDetail,
    #[serde(default)]
    pub rate_limit_per_minute: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigurationUpdate {
    pub name: Option<String>,
    pub base_url: Option<String>,
    pub default_headers: Option<BTreeMap<String, String>>,
    pub auth_method: Option<AuthMethod>,
    pub auth_detail: Option<AuthDetail>,
    pub rate_limit_per_minute: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: Uuid,
    pub owner_id: String,
    pub configuration_id: Uuid,
    pub credential_type: CredentialType,
    /// `<iv_hex>:<tag_hex>:<data_hex>`
    pub encrypted_value: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Credential {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BodyKind {
    #[default]
    Json,
    Text,
    Form,
}

/// Inline authentication that replaces whatever the configuration declares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthOverride {
    Bearer {
        token: String,
    },
    ApiKey {
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default)]
        placement: AuthPlacement,
    },
    Basic {
        username: String,
        password: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSpec {
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_kind: Option<BodyKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthOverride>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Accepted for callers that implement their own retry loop; never acted on here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_id: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl Default for CallSpec {
    fn default() -> Self {
        Self {
            method: default_method(),
            endpoint: String::new(),
            query: BTreeMap::new(),
            headers: BTreeMap::new(),
            body: None,
            body_kind: None,
            auth: None,
            timeout_ms: None,
            retries: None,
            action_id: None,
        }
    }
}

impl CallSpec {
    pub fn new(method: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_auth(mut self, auth: AuthOverride) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CallResult {
    pub success: bool,
    pub data: Value,
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub response_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl CallResult {
    pub fn failed(kind: ErrorKind, error: impl Into<String>, response_time_ms: u64) -> Self {
        Self {
            success: false,
            data: Value::Null,
            status: 0,
            headers: BTreeMap::new(),
            response_time_ms,
            error: Some(error.into()),
            error_kind: Some(kind),
        }
    }
}

/// Ephemeral per-call bundle owned by the calling workflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionContext {
    #[serde(default)]
    pub variables: HashMap<String, Value>,
    #[serde(default)]
    pub steps: HashMap<String, Value>,
    #[serde(default)]
    pub integrations: HashMap<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn with_step(mut self, step_id: impl Into<String>, output: Value) -> Self {
        self.steps.insert(step_id.into(), output);
        self
    }

    pub fn with_integration(mut self, integration_id: impl Into<String>, bundle: Value) -> Self {
        self.integrations.insert(integration_id.into(), bundle);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookAction {
    pub configuration_id: Uuid,
    #[serde(default)]
    pub call: CallSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEndpoint {
    pub id: Uuid,
    pub owner_id: String,
    pub name: String,
    pub endpoint_path: String,
    pub secret: Option<String>,
    pub target_action: Option<WebhookAction>,
    pub is_active: bool,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEndpointSpec {
    pub name: String,
    #[serde(default)]
    pub target_action: Option<WebhookAction>,
    #[serde(default = "default_signed")]
    pub signed: bool,
}

fn default_signed() -> bool {
    true
}

impl WebhookEndpointSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target_action: None,
            signed: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedWebhook {
    pub id: Uuid,
    pub path: String,
    pub secret: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Success,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Success => "success",
            DeliveryStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "success" => Some(DeliveryStatus::Success),
            "failed" => Some(DeliveryStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub endpoint_id: Uuid,
    pub source_ip: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub payload: Value,
    pub status: DeliveryStatus,
    pub error_message: Option<String>,
    pub processing_time_ms: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryResult {
    pub delivery_id: Uuid,
    pub endpoint_id: Uuid,
    pub status: DeliveryStatus,
    pub processing_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<CallResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageLog {
    pub id: Uuid,
    pub owner_id: String,
    pub configuration_id: Uuid,
    pub action_id: Option<String>,
    pub method: String,
    pub endpoint: String,
    /// 0 when no HTTP response was received.
    pub status_code: u16,
    pub response_time_ms: u64,
    pub error_message: Option<String>,
    pub request_bytes: u64,
    pub response_bytes: u64,
    pub created_at: DateTime<Utc>,
}

impl UsageLog {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct UsageStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    /// Percentage of non-2xx calls, 0..=100.
    pub error_rate: f64,
    pub average_response_time_ms: f64,
    pub total_bytes: u64,
}
