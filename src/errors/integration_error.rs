use serde::Serialize;
use serde_json::Value;
use std::error::Error;
use std::fmt;

use crate::constants::security::PUBLIC_REJECTION_MESSAGE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    RateLimited,
    SecurityRejected,
    AuthenticationMissing,
    AuthenticationInvalid,
    CredentialFormat,
    CredentialAuth,
    Timeout,
    Network,
    InvalidSignature,
    MissingSignature,
    Validation,
    Misconfigured,
    Storage,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::SecurityRejected => "security_rejected",
            ErrorKind::AuthenticationMissing => "authentication_missing",
            ErrorKind::AuthenticationInvalid => "authentication_invalid",
            ErrorKind::CredentialFormat => "credential_format",
            ErrorKind::CredentialAuth => "credential_auth",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Network => "network",
            ErrorKind::InvalidSignature => "invalid_signature",
            ErrorKind::MissingSignature => "missing_signature",
            ErrorKind::Validation => "validation",
            ErrorKind::Misconfigured => "misconfigured",
            ErrorKind::Storage => "storage",
            ErrorKind::Internal => "internal",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrationError {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub retryable: bool,
}

impl IntegrationError {
    pub fn new(kind: ErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            hint: None,
            details: None,
            retryable: matches!(kind, ErrorKind::Timeout | ErrorKind::Network),
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn configuration_not_found() -> Self {
        Self::new(
            ErrorKind::NotFound,
            "CONFIGURATION_NOT_FOUND",
            "Integration configuration not found",
        )
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, "NOT_FOUND", message)
    }

    pub fn rate_limited(limit: u32) -> Self {
        Self::new(
            ErrorKind::RateLimited,
            "RATE_LIMIT_EXCEEDED",
            format!("Rate limit exceeded: {} requests per minute", limit),
        )
        .with_details(serde_json::json!({ "limit": limit }))
    }

    /// The message carries the internal reason; callers surface `public_message()`.
    pub fn security_rejected(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::SecurityRejected, "SECURITY_REJECTED", reason)
    }

    pub fn authentication_missing(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::AuthenticationMissing,
            "AUTHENTICATION_MISSING",
            message,
        )
    }

    pub fn authentication_invalid(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::AuthenticationInvalid,
            "AUTHENTICATION_INVALID",
            message,
        )
    }

    pub fn credential_format(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CredentialFormat, "CREDENTIAL_FORMAT", message)
            .with_hint("Expected format: \"<iv_hex>:<tag_hex>:<data_hex>\".")
    }

    pub fn credential_auth() -> Self {
        Self::new(
            ErrorKind::CredentialAuth,
            "CREDENTIAL_AUTH",
            "Failed to authenticate encrypted credential",
        )
        .with_hint(concat!(
            "The stored value was tampered with, or the encryption key differs ",
            "from the one used to store it."
        ))
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, "TIMEOUT", message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, "NETWORK", message)
    }

    pub fn invalid_signature() -> Self {
        Self::new(
            ErrorKind::InvalidSignature,
            "INVALID_SIGNATURE",
            "Webhook signature does not match payload",
        )
    }

    pub fn missing_signature() -> Self {
        Self::new(
            ErrorKind::MissingSignature,
            "MISSING_SIGNATURE",
            "Webhook signature header is required for this endpoint",
        )
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, "VALIDATION", message)
    }

    pub fn misconfigured(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Misconfigured, "MISCONFIGURED", message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Storage, "STORAGE", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, "INTERNAL", message)
    }

    /// Text that is safe to hand back to end users.
    pub fn public_message(&self) -> String {
        match self.kind {
            ErrorKind::SecurityRejected => PUBLIC_REJECTION_MESSAGE.to_string(),
            ErrorKind::Timeout => "timeout".to_string(),
            _ => self.message.clone(),
        }
    }
}

impl fmt::Display for IntegrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for IntegrationError {}

impl From<std::io::Error> for IntegrationError {
    fn from(err: std::io::Error) -> Self {
        IntegrationError::internal(err.to_string())
    }
}

impl From<serde_json::Error> for IntegrationError {
    fn from(err: serde_json::Error) -> Self {
        IntegrationError::validation(format!("Invalid JSON: {}", err))
    }
}
