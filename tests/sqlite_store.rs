mod common;
use common::{sqlite_app, tmp_path, TEST_KEY};

use callgate::models::{
    AuthDetail, AuthMethod, AuthPlacement, CallSpec, CredentialType, DeliveryStatus,
    NewConfiguration, UsageLog, WebhookAction, WebhookEndpointSpec,
};
use callgate::services::settings::Settings;
use callgate::stores::{ConfigStore, LogStore, SqliteStore};
use callgate::App;
use chrono::{Duration, Utc};
use futures::future::join_all;
use std::collections::BTreeMap;
use uuid::Uuid;

fn usage(owner: &str, configuration_id: Uuid, status: u16, age: Duration) -> UsageLog {
    UsageLog {
        id: Uuid::new_v4(),
        owner_id: owner.to_string(),
        configuration_id,
        action_id: None,
        method: "GET".to_string(),
        endpoint: "/ping".to_string(),
        status_code: status,
        response_time_ms: 10,
        error_message: None,
        request_bytes: 0,
        response_bytes: 4,
        created_at: Utc::now() - age,
    }
}

#[tokio::test]
async fn state_survives_reopening_the_database() {
    let path = tmp_path("callgate-sqlite").with_extension("db");
    let settings = Settings::default()
        .with_encryption_key(TEST_KEY)
        .with_database_path(&path);

    let (config_id, endpoint_id, webhook_path) = {
        let app = App::initialize(settings.clone()).expect("open");
        let mut headers = BTreeMap::new();
        headers.insert("Accept".to_string(), "application/json".to_string());
        let config = app
            .create_configuration(
                "alice",
                NewConfiguration {
                    name: "crm".to_string(),
                    base_url: "https://api.example.com/v1".to_string(),
                    default_headers: headers,
                    auth_method: AuthMethod::ApiKey,
                    auth_detail: AuthDetail {
                        placement: AuthPlacement::Query,
                        key_name: Some("token".to_string()),
                    },
                    rate_limit_per_minute: Some(5),
                },
            )
            .await
            .unwrap();
        app.store_credential("alice", config.id, CredentialType::ApiKey, "k1", None)
            .await
            .unwrap();
        app.store_credential("alice", config.id, CredentialType::ApiKey, "k2", None)
            .await
            .unwrap();

        let mut spec = WebhookEndpointSpec::new("events");
        spec.signed = false;
        spec.target_action = Some(WebhookAction {
            configuration_id: config.id,
            call: CallSpec::new("POST", "/sync"),
        });
        let created = app.create_webhook_endpoint("alice", spec).await.unwrap();
        (config.id, created.id, created.path)
    };

    let app = App::initialize(settings).expect("reopen");
    let config = app.get_configuration("alice", config_id).await.unwrap();
    assert_eq!(config.rate_limit_per_minute, 5);
    assert_eq!(config.auth_method, AuthMethod::ApiKey);
    assert_eq!(config.auth_detail.placement, AuthPlacement::Query);
    assert_eq!(config.auth_detail.key_name.as_deref(), Some("token"));
    assert_eq!(config.default_headers["Accept"], "application/json");
    assert_eq!(
        app.get_credential("alice", config_id, CredentialType::ApiKey)
            .await
            .unwrap()
            .as_deref(),
        Some("k2")
    );

    let endpoints = app.list_webhook_endpoints("alice").await.unwrap();
    assert_eq!(endpoints.len(), 1);
    assert_eq!(endpoints[0].id, endpoint_id);
    assert_eq!(endpoints[0].endpoint_path, webhook_path);
    let action = endpoints[0].target_action.as_ref().expect("action");
    assert_eq!(action.configuration_id, config_id);
    assert_eq!(action.call.endpoint, "/sync");

    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn deactivated_rows_stay_on_disk() {
    let store = SqliteStore::open_in_memory().unwrap();
    let settings = Settings::default().with_encryption_key(TEST_KEY);
    let store = std::sync::Arc::new(store);
    let app = App::with_stores(
        settings,
        store.clone(),
        store.clone(),
        std::sync::Arc::new(common::resolver()),
    );
    let config = app
        .create_configuration(
            "alice",
            NewConfiguration {
                name: "crm".to_string(),
                base_url: "https://api.example.com".to_string(),
                ..NewConfiguration::default()
            },
        )
        .await
        .unwrap();
    app.deactivate_configuration("alice", config.id).await.unwrap();

    assert!(app.list_configurations("alice").await.unwrap().is_empty());
    let row = store
        .get_configuration("alice", config.id)
        .await
        .unwrap()
        .expect("row kept");
    assert!(!row.is_active);
    assert!(store.get_configuration("bob", config.id).await.unwrap().is_none());
}

#[tokio::test]
async fn deliveries_come_back_newest_first() {
    let store = std::sync::Arc::new(SqliteStore::open_in_memory().unwrap());
    let app = App::with_stores(
        Settings::default().with_encryption_key(TEST_KEY),
        store.clone(),
        store.clone(),
        std::sync::Arc::new(common::resolver()),
    );
    let mut spec = WebhookEndpointSpec::new("events");
    spec.signed = false;
    let created = app.create_webhook_endpoint("alice", spec).await.unwrap();
    for n in 0..3 {
        app.receive_webhook(
            &created.path,
            &BTreeMap::new(),
            format!(r#"{{"n":{}}}"#, n).as_bytes(),
            Some("198.51.100.7"),
        )
        .await
        .unwrap();
    }

    let deliveries = app
        .list_webhook_deliveries("alice", created.id, Some(2))
        .await
        .unwrap();
    assert_eq!(deliveries.len(), 2);
    assert_eq!(deliveries[0].payload["n"], 2);
    assert_eq!(deliveries[1].payload["n"], 1);
    assert_eq!(deliveries[0].status, DeliveryStatus::Success);
    assert_eq!(deliveries[0].source_ip.as_deref(), Some("198.51.100.7"));

    let endpoint = store
        .find_webhook_by_path(&created.path)
        .await
        .unwrap()
        .expect("endpoint");
    assert!(endpoint.last_triggered_at.is_some());
}

#[tokio::test]
async fn usage_window_filters_by_age_owner_and_configuration() {
    let store = SqliteStore::open_in_memory().unwrap();
    let config = Uuid::new_v4();
    let other = Uuid::new_v4();
    for entry in [
        usage("alice", config, 200, Duration::seconds(5)),
        usage("alice", config, 500, Duration::seconds(30)),
        usage("alice", config, 200, Duration::minutes(5)),
        usage("alice", other, 200, Duration::seconds(5)),
        usage("bob", config, 200, Duration::seconds(5)),
    ] {
        store.append_usage(&entry).await.unwrap();
    }

    let minute_ago = Utc::now() - Duration::minutes(1);
    assert_eq!(
        store
            .count_usage_since("alice", config, minute_ago)
            .await
            .unwrap(),
        2
    );
    let recent = store
        .list_usage_since("alice", Some(config), minute_ago)
        .await
        .unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].status_code, 200);
    assert_eq!(recent[1].status_code, 500);

    let all = store
        .list_usage_since("alice", None, Utc::now() - Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(all.len(), 4);
}

#[tokio::test]
async fn concurrent_stores_leave_one_active_credential() {
    let path = tmp_path("callgate-credentials").with_extension("db");
    let (app, _store) = sqlite_app(SqliteStore::open(&path).unwrap());
    let config = app
        .create_configuration(
            "alice",
            NewConfiguration {
                name: "crm".to_string(),
                base_url: "https://api.example.com".to_string(),
                auth_method: AuthMethod::Bearer,
                ..NewConfiguration::default()
            },
        )
        .await
        .unwrap()
        .id;

    let values: Vec<String> = (0..8).map(|n| format!("tok_{}", n)).collect();
    let stored = join_all(values.iter().map(|value| {
        app.store_credential("alice", config, CredentialType::Bearer, value, None)
    }))
    .await;
    assert!(stored.iter().all(|r| r.is_ok()), "{:?}", stored);

    let conn = rusqlite::Connection::open(&path).unwrap();
    let (total, active): (i64, i64) = conn
        .query_row(
            "SELECT COUNT(*), COALESCE(SUM(is_active), 0) FROM credentials \
             WHERE configuration_id = ?1",
            [config.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(total, 8);
    assert_eq!(active, 1);

    let current = app
        .get_credential("alice", config, CredentialType::Bearer)
        .await
        .unwrap()
        .expect("one active value");
    assert!(values.contains(&current));
    drop(conn);
    let _ = std::fs::remove_file(&path);
}
