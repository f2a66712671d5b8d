#![allow(dead_code)]

use once_cell::sync::Lazy;
use std::sync::Arc;
use tokio::sync::Mutex;
use wiremock::{MockServer, Request};

use callgate::services::settings::Settings;
use callgate::services::url_guard::StaticResolver;
use callgate::stores::{MemoryStore, SqliteStore};
use callgate::App;

pub static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub const TEST_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";
pub const TEST_HOST: &str = "api.test";

pub fn tmp_path(prefix: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("{}-{}", prefix, uuid::Uuid::new_v4()))
}

/// `http://api.test:<port>` for a mock listening on 127.0.0.1; the static
/// resolver maps the name back to loopback.
pub fn base_url(server: &MockServer) -> String {
    format!("http://{}:{}", TEST_HOST, server.address().port())
}

pub fn port(server: &MockServer) -> u16 {
    server.address().port()
}

pub async fn requests(server: &MockServer) -> Vec<Request> {
    server.received_requests().await.unwrap_or_default()
}

pub fn header_value(request: &Request, name: &str) -> Option<String> {
    request
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}

pub fn target(request: &Request) -> String {
    match request.url.query() {
        Some(query) => format!("{}?{}", request.url.path(), query),
        None => request.url.path().to_string(),
    }
}

pub fn resolver() -> StaticResolver {
    StaticResolver::new().with_host(TEST_HOST, vec!["127.0.0.1".parse().expect("ip")])
}

/// In-memory app whose guard lets `api.test` reach the local mock.
pub fn local_app() -> (App, Arc<MemoryStore>) {
    app_with(Settings::default().with_private_networks(true))
}

pub fn app_with(settings: Settings) -> (App, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let app = App::with_stores(
        settings.with_encryption_key(TEST_KEY),
        store.clone(),
        store.clone(),
        Arc::new(resolver()),
    );
    (app, store)
}

/// Same as `local_app`, backed by SQLite.
pub fn sqlite_app(store: SqliteStore) -> (App, Arc<SqliteStore>) {
    let store = Arc::new(store);
    let app = App::with_stores(
        Settings::default()
            .with_private_networks(true)
            .with_encryption_key(TEST_KEY),
        store.clone(),
        store.clone(),
        Arc::new(resolver()),
    );
    (app, store)
}
