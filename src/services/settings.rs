use std::path::PathBuf;

use crate::constants::{buffers, network};
use crate::utils::feature_flags::is_truthy;

fn env_string(keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| std::env::var(key).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

fn env_number<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub encryption_key: Option<String>,
    pub database_path: Option<PathBuf>,
    pub default_timeout_ms: u64,
    pub max_timeout_ms: u64,
    pub max_response_bytes: usize,
    pub allow_private_networks: bool,
    pub user_agent: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            encryption_key: None,
            database_path: None,
            default_timeout_ms: network::TIMEOUT_API_REQUEST_MS,
            max_timeout_ms: network::TIMEOUT_MAX_MS,
            max_response_bytes: buffers::MAX_RESPONSE_BYTES,
            allow_private_networks: false,
            user_agent: network::USER_AGENT.to_string(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let max_timeout_ms = env_number("CALLGATE_MAX_TIMEOUT_MS")
            .filter(|v: &u64| *v > 0)
            .unwrap_or(defaults.max_timeout_ms);
        Self {
            encryption_key: env_string(&["CALLGATE_ENCRYPTION_KEY", "ENCRYPTION_KEY"]),
            database_path: env_string(&["CALLGATE_DATABASE_PATH"]).map(PathBuf::from),
            default_timeout_ms: env_number("CALLGATE_HTTP_TIMEOUT_MS")
                .filter(|v: &u64| *v > 0)
                .unwrap_or(defaults.default_timeout_ms)
                .min(max_timeout_ms),
            max_timeout_ms,
            max_response_bytes: env_number("CALLGATE_MAX_RESPONSE_BYTES")
                .filter(|v: &usize| *v > 0)
                .unwrap_or(defaults.max_response_bytes),
            allow_private_networks: std::env::var("CALLGATE_ALLOW_PRIVATE_NETWORKS")
                .map(is_truthy)
                .unwrap_or(false),
            user_agent: env_string(&["CALLGATE_USER_AGENT"]).unwrap_or(defaults.user_agent),
        }
    }

    pub fn with_encryption_key(mut self, key: impl Into<String>) -> Self {
        self.encryption_key = Some(key.into());
        self
    }

    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }

    pub fn with_private_networks(mut self, allow: bool) -> Self {
        self.allow_private_networks = allow;
        self
    }

    pub fn with_default_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }
}
