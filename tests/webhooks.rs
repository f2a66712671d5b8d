mod common;
use common::{base_url, local_app, requests};

use async_trait::async_trait;
use callgate::models::{
    AuthMethod, CallResult, CallSpec, DeliveryStatus, NewConfiguration, WebhookAction,
    WebhookEndpoint, WebhookEndpointSpec,
};
use callgate::services::webhook::{sign_webhook_payload, ActionDispatcher};
use callgate::{ErrorKind, IntegrationError};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PAYLOAD: &[u8] = br#"{"event":"invoice.paid","amount":42,"customer":{"id":"c_1"}}"#;

fn signed_headers(header: &str, signature: &str) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    headers.insert("Content-Type".to_string(), "application/json".to_string());
    headers.insert(header.to_string(), signature.to_string());
    headers
}

fn flip_last_char(signature: &str) -> String {
    let mut chars: Vec<char> = signature.chars().collect();
    let last = chars.len() - 1;
    chars[last] = if chars[last] == '0' { '1' } else { '0' };
    chars.into_iter().collect()
}

#[tokio::test]
async fn correct_signature_is_accepted_and_recorded() {
    let (app, _store) = local_app();
    let created = app
        .create_webhook_endpoint("alice", WebhookEndpointSpec::new("billing"))
        .await
        .unwrap();
    assert!(created.path.starts_with("wh_"));
    let secret = created.secret.clone().expect("signed endpoint has a secret");
    assert!(secret.starts_with("whsec_"));

    let signature = sign_webhook_payload(&secret, PAYLOAD).unwrap();
    for header in ["X-Webhook-Signature", "x-signature-256", "X-Hub-Signature-256"] {
        let result = app
            .receive_webhook(
                &created.path,
                &signed_headers(header, &signature),
                PAYLOAD,
                Some("203.0.113.9"),
            )
            .await
            .expect("valid delivery");
        assert_eq!(result.status, DeliveryStatus::Success);
        assert!(result.action.is_none());
    }

    let deliveries = app
        .list_webhook_deliveries("alice", created.id, None)
        .await
        .unwrap();
    assert_eq!(deliveries.len(), 3);
    assert_eq!(deliveries[0].source_ip.as_deref(), Some("203.0.113.9"));
    assert_eq!(deliveries[0].payload["amount"], json!(42));

    let endpoints = app.list_webhook_endpoints("alice").await.unwrap();
    assert!(endpoints[0].last_triggered_at.is_some());
}

#[tokio::test]
async fn one_flipped_character_is_an_invalid_signature() {
    let (app, _store) = local_app();
    let created = app
        .create_webhook_endpoint("alice", WebhookEndpointSpec::new("billing"))
        .await
        .unwrap();
    let signature = sign_webhook_payload(created.secret.as_deref().unwrap(), PAYLOAD).unwrap();
    let err = app
        .receive_webhook(
            &created.path,
            &signed_headers("X-Webhook-Signature", &flip_last_char(&signature)),
            PAYLOAD,
            None,
        )
        .await
        .expect_err("tampered signature");
    assert_eq!(err.kind, ErrorKind::InvalidSignature);

    let deliveries = app
        .list_webhook_deliveries("alice", created.id, None)
        .await
        .unwrap();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].status, DeliveryStatus::Failed);
    let endpoints = app.list_webhook_endpoints("alice").await.unwrap();
    assert!(endpoints[0].last_triggered_at.is_none());
}

#[tokio::test]
async fn signature_over_different_bytes_is_rejected() {
    let (app, _store) = local_app();
    let created = app
        .create_webhook_endpoint("alice", WebhookEndpointSpec::new("billing"))
        .await
        .unwrap();
    let signature = sign_webhook_payload(created.secret.as_deref().unwrap(), PAYLOAD).unwrap();
    let reformatted = serde_json::to_vec_pretty(&serde_json::from_slice::<Value>(PAYLOAD).unwrap())
        .unwrap();
    let err = app
        .receive_webhook(
            &created.path,
            &signed_headers("X-Webhook-Signature", &signature),
            &reformatted,
            None,
        )
        .await
        .expect_err("payload changed");
    assert_eq!(err.kind, ErrorKind::InvalidSignature);
}

#[tokio::test]
async fn missing_signature_on_secret_endpoint_is_rejected() {
    let (app, _store) = local_app();
    let created = app
        .create_webhook_endpoint("alice", WebhookEndpointSpec::new("billing"))
        .await
        .unwrap();
    let err = app
        .receive_webhook(&created.path, &BTreeMap::new(), PAYLOAD, None)
        .await
        .expect_err("unsigned");
    assert_eq!(err.kind, ErrorKind::MissingSignature);
    let deliveries = app
        .list_webhook_deliveries("alice", created.id, None)
        .await
        .unwrap();
    assert_eq!(deliveries[0].status, DeliveryStatus::Failed);
}

#[tokio::test]
async fn unsigned_endpoint_accepts_plain_deliveries() {
    let (app, _store) = local_app();
    let mut spec = WebhookEndpointSpec::new("open");
    spec.signed = false;
    let created = app.create_webhook_endpoint("alice", spec).await.unwrap();
    assert!(created.secret.is_none());
    let result = app
        .receive_webhook(&created.path, &BTreeMap::new(), b"not json", None)
        .await
        .unwrap();
    assert_eq!(result.status, DeliveryStatus::Success);
    let deliveries = app
        .list_webhook_deliveries("alice", created.id, Some(10))
        .await
        .unwrap();
    assert_eq!(deliveries[0].payload, json!("not json"));
}

#[tokio::test]
async fn unknown_or_deactivated_paths_are_not_found() {
    let (app, _store) = local_app();
    let err = app
        .receive_webhook("wh_missing", &BTreeMap::new(), PAYLOAD, None)
        .await
        .expect_err("unknown path");
    assert_eq!(err.kind, ErrorKind::NotFound);

    let created = app
        .create_webhook_endpoint("alice", WebhookEndpointSpec::new("billing"))
        .await
        .unwrap();
    assert!(app
        .deactivate_webhook_endpoint("mallory", created.id)
        .await
        .is_err());
    app.deactivate_webhook_endpoint("alice", created.id)
        .await
        .unwrap();
    let err = app
        .receive_webhook(&created.path, &BTreeMap::new(), PAYLOAD, None)
        .await
        .expect_err("inactive");
    assert_eq!(err.kind, ErrorKind::NotFound);
    assert!(app
        .list_webhook_deliveries("mallory", created.id, None)
        .await
        .is_err());
}

#[tokio::test]
async fn bound_action_runs_through_the_invoker() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/events/invoice.paid"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"queued": true})))
        .expect(1)
        .mount(&server)
        .await;
    let (app, _store) = local_app();
    let config = app
        .create_configuration(
            "alice",
            NewConfiguration {
                name: "ledger".to_string(),
                base_url: base_url(&server),
                auth_method: AuthMethod::None,
                ..NewConfiguration::default()
            },
        )
        .await
        .unwrap();
    let mut spec = WebhookEndpointSpec::new("billing");
    spec.target_action = Some(WebhookAction {
        configuration_id: config.id,
        call: CallSpec::new("POST", "/events/{event}").with_body(json!({
            "amount": "{{step.webhook.amount}}",
            "customer": "{{step.webhook.customer.id}}"
        })),
    });
    let created = app.create_webhook_endpoint("alice", spec).await.unwrap();
    let signature = sign_webhook_payload(created.secret.as_deref().unwrap(), PAYLOAD).unwrap();

    let result = app
        .receive_webhook(
            &created.path,
            &signed_headers("X-Hub-Signature-256", &signature),
            PAYLOAD,
            None,
        )
        .await
        .unwrap();
    assert_eq!(result.status, DeliveryStatus::Success);
    let action = result.action.expect("action result");
    assert_eq!(action.data, json!({"queued": true}));

    let request = &requests(&server).await[0];
    let sent: Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(sent, json!({"amount": 42, "customer": "c_1"}));

    let logs = app.list_usage_logs("alice", Some(config.id), 1).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(
        logs[0].action_id.as_deref(),
        Some(format!("webhook:{}", created.id).as_str())
    );
}

#[tokio::test]
async fn action_bound_to_foreign_configuration_is_refused() {
    let (app, _store) = local_app();
    let config = app
        .create_configuration(
            "bob",
            NewConfiguration {
                name: "bob".to_string(),
                base_url: "https://api.example.com".to_string(),
                ..NewConfiguration::default()
            },
        )
        .await
        .unwrap();
    let mut spec = WebhookEndpointSpec::new("steal");
    spec.target_action = Some(WebhookAction {
        configuration_id: config.id,
        call: CallSpec::default(),
    });
    let err = app
        .create_webhook_endpoint("alice", spec)
        .await
        .expect_err("foreign configuration");
    assert_eq!(err.kind, ErrorKind::NotFound);
}

struct FailingDispatcher {
    seen: Mutex<Vec<Value>>,
}

#[async_trait]
impl ActionDispatcher for FailingDispatcher {
    async fn dispatch(
        &self,
        _endpoint: &WebhookEndpoint,
        _action: &WebhookAction,
        payload: &Value,
    ) -> Result<CallResult, IntegrationError> {
        self.seen.lock().unwrap().push(payload.clone());
        Err(IntegrationError::network("downstream unavailable"))
    }
}

#[tokio::test]
async fn dispatch_failure_is_a_failed_delivery_not_an_error() {
    let (app, _store) = local_app();
    let dispatcher = Arc::new(FailingDispatcher {
        seen: Mutex::new(Vec::new()),
    });
    let app = app.with_action_dispatcher(dispatcher.clone());
    let config = app
        .create_configuration(
            "alice",
            NewConfiguration {
                name: "ledger".to_string(),
                base_url: "https://api.example.com".to_string(),
                ..NewConfiguration::default()
            },
        )
        .await
        .unwrap();
    let mut spec = WebhookEndpointSpec::new("billing");
    spec.signed = false;
    spec.target_action = Some(WebhookAction {
        configuration_id: config.id,
        call: CallSpec::new("POST", "/events"),
    });
    let created = app.create_webhook_endpoint("alice", spec).await.unwrap();

    let result = app
        .receive_webhook(&created.path, &BTreeMap::new(), PAYLOAD, None)
        .await
        .unwrap();
    assert_eq!(result.status, DeliveryStatus::Failed);
    assert_eq!(result.error.as_deref(), Some("downstream unavailable"));
    assert_eq!(dispatcher.seen.lock().unwrap().len(), 1);

    let endpoints = app.list_webhook_endpoints("alice").await.unwrap();
    assert!(endpoints[0].last_triggered_at.is_none());
}
