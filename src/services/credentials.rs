use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::IntegrationError;
use crate::models::{Credential, CredentialType};
use crate::services::logger::Logger;
use crate::services::vault::Vault;
use crate::stores::ConfigStore;

#[derive(Clone)]
pub struct CredentialService {
    logger: Logger,
    vault: Arc<Vault>,
    store: Arc<dyn ConfigStore>,
}

impl CredentialService {
    pub fn new(logger: Logger, vault: Arc<Vault>, store: Arc<dyn ConfigStore>) -> Self {
        Self {
            logger: logger.child("credentials"),
            vault,
            store,
        }
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    async fn ensure_configuration(
        &self,
        owner_id: &str,
        configuration_id: Uuid,
    ) -> Result<(), IntegrationError> {
        match self
            .store
            .get_configuration(owner_id, configuration_id)
            .await?
        {
            Some(config) if config.is_active => Ok(()),
            _ => Err(IntegrationError::configuration_not_found()),
        }
    }

    /// Encrypts and stores `plaintext`, deactivating any previously active
    /// credential of the same type for the configuration.
    pub async fn store_credential(
        &self,
        owner_id: &str,
        configuration_id: Uuid,
        credential_type: CredentialType,
        plaintext: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Credential, IntegrationError> {
        if plaintext.is_empty() {
            return Err(IntegrationError::validation("Credential value must not be empty"));
        }
        if credential_type == CredentialType::Basic && !plaintext.contains(':') {
            return Err(IntegrationError::validation(
                "Basic credentials must be stored as \"username:password\"",
            ));
        }
        let now = Utc::now();
        if expires_at.map(|at| at <= now).unwrap_or(false) {
            return Err(IntegrationError::validation("Credential expiry must be in the future"));
        }
        self.ensure_configuration(owner_id, configuration_id).await?;

        let credential = Credential {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            configuration_id,
            credential_type,
            encrypted_value: self.vault.encrypt(plaintext)?,
            expires_at,
            is_active: true,
            created_at: now,
        };
        let replaced = self.store.replace_active_credential(&credential).await?;
        self.logger.info(
            "Credential stored",
            Some(&serde_json::json!({
                "configuration_id": configuration_id,
                "credential_type": credential_type.as_str(),
                "replaced": replaced,
            })),
        );
        Ok(credential)
    }

    /// Active, unexpired credential for the pair. Expired rows are
    /// deactivated here and reported as absent.
    pub async fn active_credential(
        &self,
        configuration_id: Uuid,
        credential_type: CredentialType,
    ) -> Result<Option<Credential>, IntegrationError> {
        let Some(credential) = self
            .store
            .active_credential(configuration_id, credential_type)
            .await?
        else {
            return Ok(None);
        };
        if credential.is_expired(Utc::now()) {
            self.store.deactivate_credential(credential.id).await?;
            self.logger.info(
                "Expired credential deactivated",
                Some(&serde_json::json!({
                    "configuration_id": configuration_id,
                    "credential_type": credential_type.as_str(),
                })),
            );
            return Ok(None);
        }
        Ok(Some(credential))
    }

    /// Decrypted value for the caller's own configuration, or `None`.
    pub async fn get_credential(
        &self,
        owner_id: &str,
        configuration_id: Uuid,
        credential_type: CredentialType,
    ) -> Result<Option<String>, IntegrationError> {
        self.ensure_configuration(owner_id, configuration_id).await?;
        self.decrypt_active(configuration_id, credential_type).await
    }

    pub(crate) async fn decrypt_active(
        &self,
        configuration_id: Uuid,
        credential_type: CredentialType,
    ) -> Result<Option<String>, IntegrationError> {
        match self
            .active_credential(configuration_id, credential_type)
            .await?
        {
            Some(credential) => self.vault.decrypt(&credential.encrypted_value).map(Some),
            None => Ok(None),
        }
    }

    pub async fn delete_credential(
        &self,
        owner_id: &str,
        configuration_id: Uuid,
        credential_type: CredentialType,
    ) -> Result<bool, IntegrationError> {
        self.ensure_configuration(owner_id, configuration_id).await?;
        let Some(credential) = self
            .store
            .active_credential(configuration_id, credential_type)
            .await?
        else {
            return Ok(false);
        };
        Ok(self.store.deactivate_credential(credential.id).await?)
    }
}
