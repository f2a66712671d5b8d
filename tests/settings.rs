mod common;
use common::ENV_LOCK;

use callgate::constants::network;
use callgate::services::settings::Settings;
use std::path::PathBuf;

const KEYS: [&str; 8] = [
    "CALLGATE_ENCRYPTION_KEY",
    "ENCRYPTION_KEY",
    "CALLGATE_DATABASE_PATH",
    "CALLGATE_HTTP_TIMEOUT_MS",
    "CALLGATE_MAX_TIMEOUT_MS",
    "CALLGATE_MAX_RESPONSE_BYTES",
    "CALLGATE_ALLOW_PRIVATE_NETWORKS",
    "CALLGATE_USER_AGENT",
];

fn snapshot() -> Vec<(&'static str, Option<String>)> {
    KEYS.iter().map(|key| (*key, std::env::var(key).ok())).collect()
}

fn restore_env(previous: Vec<(&'static str, Option<String>)>) {
    for (key, value) in previous {
        match value {
            Some(value) => std::env::set_var(key, value),
            None => std::env::remove_var(key),
        }
    }
}

#[tokio::test]
async fn from_env_uses_defaults_when_unset() {
    let _guard = ENV_LOCK.lock().await;
    let previous = snapshot();
    for key in KEYS {
        std::env::remove_var(key);
    }

    let settings = Settings::from_env();
    assert!(settings.encryption_key.is_none());
    assert!(settings.database_path.is_none());
    assert_eq!(settings.default_timeout_ms, network::TIMEOUT_API_REQUEST_MS);
    assert_eq!(settings.max_timeout_ms, network::TIMEOUT_MAX_MS);
    assert!(!settings.allow_private_networks);
    assert!(settings.user_agent.starts_with("callgate/"));

    restore_env(previous);
}

#[tokio::test]
async fn from_env_reads_overrides() {
    let _guard = ENV_LOCK.lock().await;
    let previous = snapshot();
    for key in KEYS {
        std::env::remove_var(key);
    }
    std::env::set_var("ENCRYPTION_KEY", "legacy");
    std::env::set_var("CALLGATE_DATABASE_PATH", "/var/lib/callgate/state.db");
    std::env::set_var("CALLGATE_MAX_TIMEOUT_MS", "5000");
    std::env::set_var("CALLGATE_HTTP_TIMEOUT_MS", "9000");
    std::env::set_var("CALLGATE_MAX_RESPONSE_BYTES", "2048");
    std::env::set_var("CALLGATE_ALLOW_PRIVATE_NETWORKS", "yes");
    std::env::set_var("CALLGATE_USER_AGENT", "acme-bot/2");

    let settings = Settings::from_env();
    assert_eq!(settings.encryption_key.as_deref(), Some("legacy"));
    assert_eq!(
        settings.database_path,
        Some(PathBuf::from("/var/lib/callgate/state.db"))
    );
    assert_eq!(settings.max_timeout_ms, 5000);
    assert_eq!(settings.default_timeout_ms, 5000);
    assert_eq!(settings.max_response_bytes, 2048);
    assert!(settings.allow_private_networks);
    assert_eq!(settings.user_agent, "acme-bot/2");

    std::env::set_var("CALLGATE_ENCRYPTION_KEY", "primary");
    std::env::set_var("CALLGATE_HTTP_TIMEOUT_MS", "not-a-number");
    std::env::set_var("CALLGATE_ALLOW_PRIVATE_NETWORKS", "0");
    let settings = Settings::from_env();
    assert_eq!(settings.encryption_key.as_deref(), Some("primary"));
    assert_eq!(settings.default_timeout_ms, network::TIMEOUT_API_REQUEST_MS.min(5000));
    assert!(!settings.allow_private_networks);

    restore_env(previous);
}
