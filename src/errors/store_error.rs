use super::IntegrationError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("store lock poisoned")]
    Poisoned,
}

impl From<StoreError> for IntegrationError {
    fn from(err: StoreError) -> Self {
        IntegrationError::storage(err.to_string())
    }
}
