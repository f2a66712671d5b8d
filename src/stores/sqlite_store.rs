use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::{ConfigStore, LogStore};
use crate::errors::StoreError;
use crate::models::{
    AuthMethod, Configuration, Credential, CredentialType, DeliveryStatus, UsageLog,
    WebhookDelivery, WebhookEndpoint,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS configurations (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    name TEXT NOT NULL,
    base_url TEXT NOT NULL,
    default_headers TEXT NOT NULL,
    auth_method TEXT NOT NULL,
    auth_detail TEXT NOT NULL,
    rate_limit_per_minute INTEGER NOT NULL,
    is_active INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS configurations_owner ON configurations(owner_id);

CREATE TABLE IF NOT EXISTS credentials (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    configuration_id TEXT NOT NULL,
    credential_type TEXT NOT NULL,
    encrypted_value TEXT NOT NULL,
    expires_at INTEGER,
    is_active INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS credentials_one_active
    ON credentials(configuration_id, credential_type) WHERE is_active = 1;

CREATE TABLE IF NOT EXISTS webhook_endpoints (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    name TEXT NOT NULL,
    endpoint_path TEXT NOT NULL UNIQUE,
    secret TEXT,
    target_action TEXT,
    is_active INTEGER NOT NULL,
    last_triggered_at INTEGER,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS usage_logs (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    configuration_id TEXT NOT NULL,
    action_id TEXT,
    method TEXT NOT NULL,
    endpoint TEXT NOT NULL,
    status_code INTEGER NOT NULL,
    response_time_ms INTEGER NOT NULL,
    error_message TEXT,
    request_bytes INTEGER NOT NULL,
    response_bytes INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS usage_logs_window
    ON usage_logs(owner_id, configuration_id, created_at);

CREATE TABLE IF NOT EXISTS webhook_deliveries (
    id TEXT PRIMARY KEY,
    endpoint_id TEXT NOT NULL REFERENCES webhook_endpoints(id),
    source_ip TEXT,
    headers TEXT NOT NULL,
    payload TEXT NOT NULL,
    status TEXT NOT NULL,
    error_message TEXT,
    processing_time_ms INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS webhook_deliveries_endpoint
    ON webhook_deliveries(endpoint_id, created_at);
"#;

const CONFIG_COLUMNS: &str = "id, owner_id, name, base_url, default_headers, auth_method, \
     auth_detail, rate_limit_per_minute, is_active, created_at, updated_at";
const CREDENTIAL_COLUMNS: &str = "id, owner_id, configuration_id, credential_type, \
     encrypted_value, expires_at, is_active, created_at";
const WEBHOOK_COLUMNS: &str = "id, owner_id, name, endpoint_path, secret, target_action, \
     is_active, last_triggered_at, created_at";
const USAGE_COLUMNS: &str = "id, owner_id, configuration_id, action_id, method, endpoint, \
     status_code, response_time_ms, error_message, request_bytes, response_bytes, created_at";
const DELIVERY_COLUMNS: &str = "id, endpoint_id, source_ip, headers, payload, status, \
     error_message, processing_time_ms, created_at";

/// SQLite-backed store. The connection is serialized behind a mutex and used
/// from the blocking pool.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut guard)
        })
        .await?
    }
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp {}", ms)))
}

fn parse_uuid(raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|_| StoreError::Corrupt(format!("uuid {}", raw)))
}

fn read_configuration(row: &Row<'_>) -> Result<Configuration, StoreError> {
    let id: String = row.get(0)?;
    let headers: String = row.get(4)?;
    let auth_method: String = row.get(5)?;
    let auth_detail: String = row.get(6)?;
    let rate_limit: i64 = row.get(7)?;
    Ok(Configuration {
        id: parse_uuid(&id)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        base_url: row.get(3)?,
        default_headers: serde_json::from_str(&headers)?,
        auth_method: AuthMethod::parse(&auth_method)
            .ok_or_else(|| StoreError::Corrupt(format!("auth_method {}", auth_method)))?,
        auth_detail: serde_json::from_str(&auth_detail)?,
        rate_limit_per_minute: rate_limit.max(0) as u32,
        is_active: row.get(8)?,
        created_at: from_millis(row.get(9)?)?,
        updated_at: from_millis(row.get(10)?)?,
    })
}

fn read_credential(row: &Row<'_>) -> Result<Credential, StoreError> {
    let id: String = row.get(0)?;
    let configuration_id: String = row.get(2)?;
    let credential_type: String = row.get(3)?;
    let expires_at: Option<i64> = row.get(5)?;
    Ok(Credential {
        id: parse_uuid(&id)?,
        owner_id: row.get(1)?,
        configuration_id: parse_uuid(&configuration_id)?,
        credential_type: CredentialType::parse(&credential_type)
            .ok_or_else(|| StoreError::Corrupt(format!("credential_type {}", credential_type)))?,
        encrypted_value: row.get(4)?,
        expires_at: expires_at.map(from_millis).transpose()?,
        is_active: row.get(6)?,
        created_at: from_millis(row.get(7)?)?,
    })
}

fn read_webhook(row: &Row<'_>) -> Result<WebhookEndpoint, StoreError> {
    let id: String = row.get(0)?;
    let target_action: Option<String> = row.get(5)?;
    let last_triggered_at: Option<i64> = row.get(7)?;
    Ok(WebhookEndpoint {
        id: parse_uuid(&id)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        endpoint_path: row.get(3)?,
        secret: row.get(4)?,
        target_action: target_action
            .map(|raw| serde_json::from_str(&raw))
            .transpose()?,
        is_active: row.get(6)?,
        last_triggered_at: last_triggered_at.map(from_millis).transpose()?,
        created_at: from_millis(row.get(8)?)?,
    })
}

fn read_usage(row: &Row<'_>) -> Result<UsageLog, StoreError> {
    let id: String = row.get(0)?;
    let configuration_id: String = row.get(2)?;
    let status_code: i64 = row.get(6)?;
    let response_time_ms: i64 = row.get(7)?;
    let request_bytes: i64 = row.get(9)?;
    let response_bytes: i64 = row.get(10)?;
    Ok(UsageLog {
        id: parse_uuid(&id)?,
        owner_id: row.get(1)?,
        configuration_id: parse_uuid(&configuration_id)?,
        action_id: row.get(3)?,
        method: row.get(4)?,
        endpoint: row.get(5)?,
        status_code: status_code.clamp(0, u16::MAX as i64) as u16,
        response_time_ms: response_time_ms.max(0) as u64,
        error_message: row.get(8)?,
        request_bytes: request_bytes.max(0) as u64,
        response_bytes: response_bytes.max(0) as u64,
        created_at: from_millis(row.get(11)?)?,
    })
}

fn read_delivery(row: &Row<'_>) -> Result<WebhookDelivery, StoreError> {
    let id: String = row.get(0)?;
    let endpoint_id: String = row.get(1)?;
    let headers: String = row.get(3)?;
    let payload: String = row.get(4)?;
    let status: String = row.get(5)?;
    let processing_time_ms: i64 = row.get(7)?;
    Ok(WebhookDelivery {
        id: parse_uuid(&id)?,
        endpoint_id: parse_uuid(&endpoint_id)?,
        source_ip: row.get(2)?,
        headers: serde_json::from_str(&headers)?,
        payload: serde_json::from_str(&payload)?,
        status: DeliveryStatus::parse(&status)
            .ok_or_else(|| StoreError::Corrupt(format!("delivery status {}", status)))?,
        error_message: row.get(6)?,
        processing_time_ms: processing_time_ms.max(0) as u64,
        created_at: from_millis(row.get(8)?)?,
    })
}

fn write_configuration(conn: &Connection, config: &Configuration) -> Result<(), StoreError> {
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO configurations ({}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            CONFIG_COLUMNS
        ),
        params![
            config.id.to_string(),
            config.owner_id,
            config.name,
            config.base_url,
            serde_json::to_string(&config.default_headers)?,
            config.auth_method.as_str(),
            serde_json::to_string(&config.auth_detail)?,
            config.rate_limit_per_minute as i64,
            config.is_active,
            millis(config.created_at),
            millis(config.updated_at),
        ],
    )?;
    Ok(())
}

fn write_webhook(conn: &Connection, endpoint: &WebhookEndpoint) -> Result<(), StoreError> {
    let target_action = endpoint
        .target_action
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO webhook_endpoints ({}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            WEBHOOK_COLUMNS
        ),
        params![
            endpoint.id.to_string(),
            endpoint.owner_id,
            endpoint.name,
            endpoint.endpoint_path,
            endpoint.secret,
            target_action,
            endpoint.is_active,
            endpoint.last_triggered_at.map(millis),
            millis(endpoint.created_at),
        ],
    )?;
    Ok(())
}

#[async_trait]
impl ConfigStore for SqliteStore {
    async fn insert_configuration(&self, config: &Configuration) -> Result<(), StoreError> {
        let config = config.clone();
        self.with_conn(move |conn| write_configuration(conn, &config))
            .await
    }

    async fn get_configuration(
        &self,
        owner_id: &str,
        id: Uuid,
    ) -> Result<Option<Configuration>, StoreError> {
        let owner_id = owner_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM configurations WHERE id = ?1 AND owner_id = ?2",
                CONFIG_COLUMNS
            ))?;
            let mut rows = stmt.query(params![id.to_string(), owner_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(read_configuration(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn list_configurations(&self, owner_id: &str) -> Result<Vec<Configuration>, StoreError> {
        let owner_id = owner_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM configurations WHERE owner_id = ?1 ORDER BY created_at DESC",
                CONFIG_COLUMNS
            ))?;
            let mut rows = stmt.query(params![owner_id])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(read_configuration(row)?);
            }
            Ok(out)
        })
        .await
    }

    async fn save_configuration(&self, config: &Configuration) -> Result<(), StoreError> {
        let config = config.clone();
        self.with_conn(move |conn| write_configuration(conn, &config))
            .await
    }

    async fn replace_active_credential(&self, credential: &Credential) -> Result<u64, StoreError> {
        let credential = credential.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let deactivated = tx.execute(
                "UPDATE credentials SET is_active = 0 \
                 WHERE configuration_id = ?1 AND credential_type = ?2 AND is_active = 1",
                params![
                    credential.configuration_id.to_string(),
                    credential.credential_type.as_str()
                ],
            )?;
            tx.execute(
                &format!(
                    "INSERT INTO credentials ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    CREDENTIAL_COLUMNS
                ),
                params![
                    credential.id.to_string(),
                    credential.owner_id,
                    credential.configuration_id.to_string(),
                    credential.credential_type.as_str(),
                    credential.encrypted_value,
                    credential.expires_at.map(millis),
                    credential.is_active,
                    millis(credential.created_at),
                ],
            )?;
            tx.commit()?;
            Ok(deactivated as u64)
        })
        .await
    }

    async fn active_credential(
        &self,
        configuration_id: Uuid,
        credential_type: CredentialType,
    ) -> Result<Option<Credential>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM credentials \
                 WHERE configuration_id = ?1 AND credential_type = ?2 AND is_active = 1 \
                 ORDER BY created_at DESC, rowid DESC LIMIT 1",
                CREDENTIAL_COLUMNS
            ))?;
            let mut rows = stmt.query(params![
                configuration_id.to_string(),
                credential_type.as_str()
            ])?;
            match rows.next()? {
                Some(row) => Ok(Some(read_credential(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn deactivate_credential(&self, id: Uuid) -> Result<bool, StoreError> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE credentials SET is_active = 0 WHERE id = ?1 AND is_active = 1",
                params![id.to_string()],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn insert_webhook_endpoint(&self, endpoint: &WebhookEndpoint) -> Result<(), StoreError> {
        let endpoint = endpoint.clone();
        self.with_conn(move |conn| write_webhook(conn, &endpoint))
            .await
    }

    async fn find_webhook_by_path(
        &self,
        path: &str,
    ) -> Result<Option<WebhookEndpoint>, StoreError> {
        let path = path.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM webhook_endpoints WHERE endpoint_path = ?1 AND is_active = 1",
                WEBHOOK_COLUMNS
            ))?;
            let mut rows = stmt.query(params![path])?;
            match rows.next()? {
                Some(row) => Ok(Some(read_webhook(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn get_webhook_endpoint(
        &self,
        owner_id: &str,
        id: Uuid,
    ) -> Result<Option<WebhookEndpoint>, StoreError> {
        let owner_id = owner_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM webhook_endpoints WHERE id = ?1 AND owner_id = ?2",
                WEBHOOK_COLUMNS
            ))?;
            let mut rows = stmt.query(params![id.to_string(), owner_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(read_webhook(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn list_webhook_endpoints(
        &self,
        owner_id: &str,
    ) -> Result<Vec<WebhookEndpoint>, StoreError> {
        let owner_id = owner_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM webhook_endpoints WHERE owner_id = ?1 ORDER BY created_at DESC",
                WEBHOOK_COLUMNS
            ))?;
            let mut rows = stmt.query(params![owner_id])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(read_webhook(row)?);
            }
            Ok(out)
        })
        .await
    }

    async fn save_webhook_endpoint(&self, endpoint: &WebhookEndpoint) -> Result<(), StoreError> {
        let endpoint = endpoint.clone();
        self.with_conn(move |conn| write_webhook(conn, &endpoint))
            .await
    }

    async fn touch_webhook_endpoint(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE webhook_endpoints SET last_triggered_at = ?1 WHERE id = ?2",
                params![millis(at), id.to_string()],
            )?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl LogStore for SqliteStore {
    async fn append_usage(&self, entry: &UsageLog) -> Result<(), StoreError> {
        let entry = entry.clone();
        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO usage_logs ({}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                    USAGE_COLUMNS
                ),
                params![
                    entry.id.to_string(),
                    entry.owner_id,
                    entry.configuration_id.to_string(),
                    entry.action_id,
                    entry.method,
                    entry.endpoint,
                    entry.status_code as i64,
                    entry.response_time_ms as i64,
                    entry.error_message,
                    entry.request_bytes as i64,
                    entry.response_bytes as i64,
                    millis(entry.created_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn count_usage_since(
        &self,
        owner_id: &str,
        configuration_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let owner_id = owner_id.to_string();
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM usage_logs \
                 WHERE owner_id = ?1 AND configuration_id = ?2 AND created_at >= ?3",
                params![owner_id, configuration_id.to_string(), millis(since)],
                |row| row.get(0),
            )?;
            Ok(count.max(0) as u64)
        })
        .await
    }

    async fn list_usage_since(
        &self,
        owner_id: &str,
        configuration_id: Option<Uuid>,
        since: DateTime<Utc>,
    ) -> Result<Vec<UsageLog>, StoreError> {
        let owner_id = owner_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM usage_logs \
                 WHERE owner_id = ?1 AND (?2 IS NULL OR configuration_id = ?2) \
                 AND created_at >= ?3 \
                 ORDER BY created_at DESC, rowid DESC",
                USAGE_COLUMNS
            ))?;
            let mut rows = stmt.query(params![
                owner_id,
                configuration_id.map(|id| id.to_string()),
                millis(since)
            ])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(read_usage(row)?);
            }
            Ok(out)
        })
        .await
    }

    async fn append_delivery(&self, delivery: &WebhookDelivery) -> Result<(), StoreError> {
        let delivery = delivery.clone();
        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO webhook_deliveries ({}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    DELIVERY_COLUMNS
                ),
                params![
                    delivery.id.to_string(),
                    delivery.endpoint_id.to_string(),
                    delivery.source_ip,
                    serde_json::to_string(&delivery.headers)?,
                    serde_json::to_string(&delivery.payload)?,
                    delivery.status.as_str(),
                    delivery.error_message,
                    delivery.processing_time_ms as i64,
                    millis(delivery.created_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_deliveries(
        &self,
        endpoint_id: Uuid,
        limit: usize,
    ) -> Result<Vec<WebhookDelivery>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM webhook_deliveries WHERE endpoint_id = ?1 \
                 ORDER BY created_at DESC, rowid DESC LIMIT ?2",
                DELIVERY_COLUMNS
            ))?;
            let mut rows = stmt.query(params![endpoint_id.to_string(), limit as i64])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(read_delivery(row)?);
            }
            Ok(out)
        })
        .await
    }
}
