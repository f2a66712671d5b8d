use base64::Engine;
use chrono::Utc;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Method};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::constants::auth::{DEFAULT_API_KEY_HEADER, DEFAULT_API_KEY_QUERY};
use crate::errors::{ErrorKind, IntegrationError};
use crate::models::{
    AuthDetail, AuthOverride, AuthPlacement, BodyKind, CallResult, CallSpec, Configuration,
    CredentialType, ExecutionContext, UsageLog,
};
use crate::services::configuration::ConfigurationService;
use crate::services::credentials::CredentialService;
use crate::services::logger::Logger;
use crate::services::rate_limiter::RateLimiter;
use crate::services::settings::Settings;
use crate::services::url_guard::{UrlGuard, ValidatedTarget};
use crate::services::usage::UsageRecorder;
use crate::services::validation::Validation;
use crate::utils::template;
use crate::utils::text::{clip_message, encode_component};

const DEFAULT_ACCEPT: &str = "application/json, text/plain, */*";

#[derive(Debug, Clone)]
struct InvokerLimits {
    default_timeout_ms: u64,
    max_timeout_ms: u64,
    max_response_bytes: usize,
    user_agent: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AppliedAuth {
    Header(String, String),
    Query(String, String),
}

/// The parts of a call fixed by the spec alone. Checked before the rate
/// limiter, so malformed calls never consume quota.
#[derive(Debug)]
struct PreparedCall {
    method: Method,
    endpoint: String,
    action_id: Option<String>,
    auth: Option<AuthOverride>,
    timeout_ms: u64,
}

/// URL, headers and body after context substitution.
#[derive(Debug)]
struct RequestParts {
    url: String,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
}

impl RequestParts {
    fn request_bytes(&self) -> u64 {
        self.body.as_ref().map(|b| b.len() as u64).unwrap_or(0)
    }
}

#[derive(Debug)]
struct Exchange {
    status: u16,
    data: Value,
    headers: BTreeMap<String, String>,
    response_bytes: u64,
}

#[derive(Clone)]
pub struct HttpInvoker {
    logger: Logger,
    validation: Validation,
    configurations: ConfigurationService,
    credentials: CredentialService,
    guard: UrlGuard,
    limiter: RateLimiter,
    usage: UsageRecorder,
    limits: InvokerLimits,
}

impl HttpInvoker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        logger: Logger,
        validation: Validation,
        configurations: ConfigurationService,
        credentials: CredentialService,
        guard: UrlGuard,
        limiter: RateLimiter,
        usage: UsageRecorder,
        settings: &Settings,
    ) -> Self {
        Self {
            logger: logger.child("invoker"),
            validation,
            configurations,
            credentials,
            guard,
            limiter,
            usage,
            limits: InvokerLimits {
                default_timeout_ms: settings.default_timeout_ms,
                max_timeout_ms: settings.max_timeout_ms,
                max_response_bytes: settings.max_response_bytes,
                user_agent: settings.user_agent.clone(),
            },
        }
    }

    /// Runs one outbound call. `Err` is reserved for an unknown configuration
    /// and malformed call specs. Every other outcome is a `CallResult` and
    /// leaves exactly one usage-log row behind, including calls whose
    /// context values cannot be placed into the request.
    pub async fn execute(
        &self,
        owner_id: &str,
        configuration_id: Uuid,
        call: &CallSpec,
        context: &ExecutionContext,
    ) -> Result<CallResult, IntegrationError> {
        let config = self
            .configurations
            .get_configuration(owner_id, configuration_id)
            .await?;
        let prepared = self.prepare(call)?;

        if let Err(err) = self
            .limiter
            .check_and_throw_if_exceeded(owner_id, config.id, config.rate_limit_per_minute)
            .await
        {
            if err.kind != ErrorKind::RateLimited {
                return Err(err);
            }
            let result = CallResult::failed(err.kind, err.public_message(), 0);
            self.finish(&config, &prepared, &result, 0, 0).await;
            return Ok(result);
        }

        let parts = match self.assemble(&config, call, context) {
            Ok(parts) => parts,
            Err(err) => {
                let result = CallResult::failed(err.kind, clip_message(&err.public_message()), 0);
                self.finish(&config, &prepared, &result, 0, 0).await;
                return Ok(result);
            }
        };

        // Detached so that dropping the caller's future cannot skip the usage row.
        let this = self.clone();
        let handle = tokio::spawn(async move { this.run(config, prepared, parts).await });
        handle
            .await
            .map_err(|err| IntegrationError::internal(format!("Call task failed: {}", err)))
    }

    /// `GET` on the configuration's base URL through the full pipeline.
    pub async fn test_configuration(
        &self,
        owner_id: &str,
        configuration_id: Uuid,
    ) -> Result<CallResult, IntegrationError> {
        let mut call = CallSpec::new("GET", "");
        call.action_id = Some("configuration_test".to_string());
        self.execute(owner_id, configuration_id, &call, &ExecutionContext::new())
            .await
    }

    fn prepare(&self, call: &CallSpec) -> Result<PreparedCall, IntegrationError> {
        let method = self.validation.ensure_method(&call.method)?;
        let timeout_ms = self.validation.ensure_timeout(
            call.timeout_ms,
            self.limits.default_timeout_ms,
            self.limits.max_timeout_ms,
        )?;
        self.validation.ensure_retries(call.retries)?;
        // Raw template text must already be a legal header; substituted
        // values are checked again in `assemble`.
        for (key, raw) in &call.headers {
            self.validation.ensure_header_pair(key, raw)?;
        }
        Ok(PreparedCall {
            method,
            endpoint: call.endpoint.clone(),
            action_id: call.action_id.clone(),
            auth: call.auth.clone(),
            timeout_ms,
        })
    }

    fn assemble(
        &self,
        config: &Configuration,
        call: &CallSpec,
        context: &ExecutionContext,
    ) -> Result<RequestParts, IntegrationError> {
        let url = build_url(&config.base_url, &call.endpoint, &call.query, context)?;

        let mut headers = HeaderMap::new();
        let (name, value) = self
            .validation
            .ensure_header_pair("User-Agent", &self.limits.user_agent)?;
        headers.insert(name, value);
        headers.insert(ACCEPT, HeaderValue::from_static(DEFAULT_ACCEPT));
        // Caller headers come second so they win over configuration defaults.
        for (key, raw) in config.default_headers.iter().chain(call.headers.iter()) {
            let resolved = template::resolve(raw, context);
            let (name, value) = self.validation.ensure_header_pair(key, &resolved)?;
            headers.insert(name, value);
        }

        let (body, content_type) = prepare_body(call.body.as_ref(), call.body_kind, context)?;
        if let Some(content_type) = content_type {
            if !headers.contains_key(CONTENT_TYPE) {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
            }
        }

        Ok(RequestParts { url, headers, body })
    }

    async fn run(
        &self,
        config: Configuration,
        prepared: PreparedCall,
        parts: RequestParts,
    ) -> CallResult {
        let started = Instant::now();
        let deadline = Duration::from_millis(prepared.timeout_ms);
        // DNS validation, connect, send and body read share one deadline.
        let exchange = self.exchange(&config, &prepared, &parts);
        let outcome = match tokio::time::timeout(deadline, exchange).await {
            Ok(outcome) => outcome,
            Err(_) => Err(IntegrationError::timeout("timeout")),
        };
        let elapsed = started.elapsed().as_millis() as u64;

        let (result, response_bytes) = match outcome {
            Ok(exchange) => {
                let success = (200..300).contains(&exchange.status);
                let result = CallResult {
                    success,
                    data: exchange.data,
                    status: exchange.status,
                    headers: exchange.headers,
                    response_time_ms: elapsed,
                    error: (!success).then(|| format!("HTTP {}", exchange.status)),
                    error_kind: None,
                };
                (result, exchange.response_bytes)
            }
            Err(err) => {
                let message = clip_message(&err.public_message());
                (CallResult::failed(err.kind, message, elapsed), 0)
            }
        };
        let request_bytes = parts.request_bytes();
        self.finish(&config, &prepared, &result, request_bytes, response_bytes)
            .await;
        result
    }

    async fn exchange(
        &self,
        config: &Configuration,
        prepared: &PreparedCall,
        parts: &RequestParts,
    ) -> Result<Exchange, IntegrationError> {
        let target = self.guard.validate(&parts.url).await?;

        let auth = match prepared.auth.as_ref() {
            Some(auth) => Some(override_auth(auth)?),
            None => self.configured_auth(config).await?,
        };
        let mut headers = parts.headers.clone();
        let mut url = target.url.clone();
        match auth {
            None => {}
            Some(AppliedAuth::Header(name, value)) => {
                let (name, value) = self.validation.ensure_header_pair(&name, &value)?;
                headers.insert(name, value);
            }
            Some(AppliedAuth::Query(name, value)) => {
                url.query_pairs_mut().append_pair(&name, &value);
            }
        }

        let client = pinned_client(&target, &self.limits.user_agent)?;
        let mut request = client.request(prepared.method.clone(), url).headers(headers);
        if let Some(body) = parts.body.as_ref() {
            request = request.body(body.clone());
        }
        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let response_headers = headers_to_map(response.headers());
        let content_type = response_headers
            .get("content-type")
            .cloned()
            .unwrap_or_default();
        let (buffer, read_bytes, truncated) =
            read_capped(response, self.limits.max_response_bytes).await?;
        Ok(Exchange {
            status,
            data: parse_body(&buffer, &content_type, truncated),
            headers: response_headers,
            response_bytes: read_bytes,
        })
    }

    async fn configured_auth(
        &self,
        config: &Configuration,
    ) -> Result<Option<AppliedAuth>, IntegrationError> {
        let Some(credential_type) = config.auth_method.credential_type() else {
            return Ok(None);
        };
        let secret = self
            .credentials
            .decrypt_active(config.id, credential_type)
            .await?
            .ok_or_else(|| {
                IntegrationError::authentication_missing(format!(
                    "No active {} credential for this configuration",
                    credential_type.as_str()
                ))
            })?;
        credential_auth(credential_type, &secret, &config.auth_detail).map(Some)
    }

    async fn finish(
        &self,
        config: &Configuration,
        prepared: &PreparedCall,
        result: &CallResult,
        request_bytes: u64,
        response_bytes: u64,
    ) {
        let entry = UsageLog {
            id: Uuid::new_v4(),
            owner_id: config.owner_id.clone(),
            configuration_id: config.id,
            action_id: prepared.action_id.clone(),
            method: prepared.method.as_str().to_string(),
            endpoint: prepared.endpoint.clone(),
            status_code: result.status,
            response_time_ms: result.response_time_ms,
            error_message: result.error.clone(),
            request_bytes,
            response_bytes,
            created_at: Utc::now(),
        };
        // The recorder logs its own failures; the call outcome stands either way.
        let _ = self.usage.record(&entry).await;

        let meta = serde_json::json!({
            "configuration_id": config.id,
            "method": entry.method,
            "endpoint": entry.endpoint,
            "status": result.status,
            "response_time_ms": result.response_time_ms,
            "error_kind": result.error_kind.map(|kind| kind.as_str()),
        });
        if result.success {
            self.logger.info("Integration call completed", Some(&meta));
        } else {
            self.logger.warn("Integration call failed", Some(&meta));
        }
    }
}

/// Joins base and endpoint with exactly one slash and substitutes context
/// values, percent-encoding whatever was substituted.
fn build_url(
    base_url: &str,
    endpoint: &str,
    query: &BTreeMap<String, String>,
    context: &ExecutionContext,
) -> Result<String, IntegrationError> {
    let endpoint = template::resolve_encoded(endpoint, context, encode_component);
    let base = base_url.trim().trim_end_matches('/');
    let path = endpoint.trim().trim_start_matches('/');
    let joined = if path.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, path)
    };
    let mut url = url::Url::parse(&joined)
        .map_err(|_| IntegrationError::validation("Endpoint does not form a valid URL"))?;
    if !query.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (key, raw) in query {
            pairs.append_pair(key, &template::resolve(raw, context));
        }
    }
    Ok(url.to_string())
}

fn bearer_value(token: &str) -> String {
    if token.to_lowercase().starts_with("bearer ") {
        token.to_string()
    } else {
        format!("Bearer {}", token)
    }
}

fn basic_value(username: &str, password: &str) -> String {
    let encoded =
        base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", username, password));
    format!("Basic {}", encoded)
}

fn api_key_auth(key: &str, name: Option<&str>, placement: AuthPlacement) -> AppliedAuth {
    match placement {
        AuthPlacement::Header => AppliedAuth::Header(
            name.unwrap_or(DEFAULT_API_KEY_HEADER).to_string(),
            key.to_string(),
        ),
        AuthPlacement::Query => AppliedAuth::Query(
            name.unwrap_or(DEFAULT_API_KEY_QUERY).to_string(),
            key.to_string(),
        ),
    }
}

fn override_auth(auth: &AuthOverride) -> Result<AppliedAuth, IntegrationError> {
    match auth {
        AuthOverride::Bearer { token } => {
            if token.trim().is_empty() {
                return Err(IntegrationError::authentication_invalid(
                    "Bearer token must not be empty",
                ));
            }
            Ok(AppliedAuth::Header(
                "Authorization".to_string(),
                bearer_value(token.trim()),
            ))
        }
        AuthOverride::ApiKey {
            key,
            name,
            placement,
        } => {
            if key.is_empty() {
                return Err(IntegrationError::authentication_invalid(
                    "API key must not be empty",
                ));
            }
            Ok(api_key_auth(key, name.as_deref(), *placement))
        }
        AuthOverride::Basic { username, password } => {
            if username.is_empty() {
                return Err(IntegrationError::authentication_invalid(
                    "Basic auth username must not be empty",
                ));
            }
            Ok(AppliedAuth::Header(
                "Authorization".to_string(),
                basic_value(username, password),
            ))
        }
    }
}

fn credential_auth(
    credential_type: CredentialType,
    secret: &str,
    detail: &AuthDetail,
) -> Result<AppliedAuth, IntegrationError> {
    match credential_type {
        CredentialType::Bearer => Ok(AppliedAuth::Header(
            "Authorization".to_string(),
            bearer_value(secret.trim()),
        )),
        CredentialType::ApiKey => Ok(api_key_auth(
            secret,
            detail.key_name.as_deref(),
            detail.placement,
        )),
        CredentialType::Basic => {
            let (username, password) = secret.split_once(':').ok_or_else(|| {
                IntegrationError::authentication_invalid(
                    "Stored basic credential is not in \"username:password\" form",
                )
            })?;
            Ok(AppliedAuth::Header(
                "Authorization".to_string(),
                basic_value(username, password),
            ))
        }
    }
}

/// Body bytes plus the content type to send when the caller set none.
fn prepare_body(
    body: Option<&Value>,
    kind: Option<BodyKind>,
    context: &ExecutionContext,
) -> Result<(Option<Vec<u8>>, Option<&'static str>), IntegrationError> {
    let Some(body) = body else {
        return Ok((None, None));
    };
    if body.is_null() {
        return Ok((None, None));
    }
    let resolved = template::resolve_value(body, context);
    let kind = kind.unwrap_or(if resolved.is_string() {
        BodyKind::Text
    } else {
        BodyKind::Json
    });
    match kind {
        BodyKind::Json => Ok((
            Some(serde_json::to_vec(&resolved)?),
            Some("application/json"),
        )),
        BodyKind::Text => Ok((
            Some(template::stringify(&resolved).into_bytes()),
            Some("text/plain; charset=utf-8"),
        )),
        BodyKind::Form => {
            let map = resolved.as_object().ok_or_else(|| {
                IntegrationError::validation("Form bodies must be a flat object")
            })?;
            let pairs: Vec<(String, String)> = map
                .iter()
                .filter(|(_, value)| !value.is_null())
                .map(|(key, value)| (key.clone(), template::stringify(value)))
                .collect();
            let encoded = serde_urlencoded::to_string(pairs)
                .map_err(|_| IntegrationError::validation("Form body could not be encoded"))?;
            Ok((
                Some(encoded.into_bytes()),
                Some("application/x-www-form-urlencoded"),
            ))
        }
    }
}

/// A client that can only reach the addresses the guard approved.
fn pinned_client(target: &ValidatedTarget, user_agent: &str) -> Result<Client, IntegrationError> {
    let mut builder = Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy()
        .user_agent(user_agent.to_string());
    if target.resolved {
        builder = builder.resolve_to_addrs(&target.host, &target.addrs);
    }
    builder
        .build()
        .map_err(|err| IntegrationError::internal(format!("Failed to build HTTP client: {}", err)))
}

fn map_reqwest_error(err: reqwest::Error) -> IntegrationError {
    if err.is_timeout() {
        return IntegrationError::timeout("timeout");
    }
    // Query strings may carry API keys.
    let err = err.without_url();
    let mut message = err.to_string();
    let mut source = std::error::Error::source(&err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    IntegrationError::network(clip_message(&message))
}

fn headers_to_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for (key, value) in headers {
        if let Ok(text) = value.to_str() {
            out.entry(key.as_str().to_string())
                .and_modify(|existing: &mut String| {
                    existing.push_str(", ");
                    existing.push_str(text);
                })
                .or_insert_with(|| text.to_string());
        }
    }
    out
}

async fn read_capped(
    response: reqwest::Response,
    max_bytes: usize,
) -> Result<(Vec<u8>, u64, bool), IntegrationError> {
    let mut buffer = Vec::new();
    let mut read_bytes: u64 = 0;
    let mut truncated = false;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(map_reqwest_error)?;
        read_bytes += chunk.len() as u64;
        let remaining = max_bytes.saturating_sub(buffer.len());
        if chunk.len() <= remaining {
            buffer.extend_from_slice(&chunk);
        } else {
            buffer.extend_from_slice(&chunk[..remaining]);
            truncated = true;
            break;
        }
    }
    Ok((buffer, read_bytes, truncated))
}

fn parse_body(buffer: &[u8], content_type: &str, truncated: bool) -> Value {
    if buffer.is_empty() {
        return Value::Null;
    }
    if !truncated && content_type.to_lowercase().contains("json") {
        if let Ok(parsed) = serde_json::from_slice::<Value>(buffer) {
            return parsed;
        }
    }
    Value::String(String::from_utf8_lossy(buffer).into_owned())
}
