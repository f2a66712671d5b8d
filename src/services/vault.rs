use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::Aes256Gcm;
use once_cell::sync::OnceCell;
use rand::RngCore;
use std::fmt;

use crate::constants::buffers::{CRYPTO_IV_SIZE, CRYPTO_KEY_SIZE, CRYPTO_TAG_SIZE};
use crate::errors::IntegrationError;

fn decode_key(raw: &str) -> Result<Vec<u8>, IntegrationError> {
    let trimmed = raw.trim();
    if trimmed.len() != CRYPTO_KEY_SIZE * 2 {
        return Err(IntegrationError::misconfigured(format!(
            "Encryption key must be {} hex characters",
            CRYPTO_KEY_SIZE * 2
        ))
        .with_hint("Generate one with `callgate gen-key` and set CALLGATE_ENCRYPTION_KEY."));
    }
    hex::decode(trimmed).map_err(|_| {
        IntegrationError::misconfigured("Encryption key must be hex encoded")
            .with_hint("Generate one with `callgate gen-key` and set CALLGATE_ENCRYPTION_KEY.")
    })
}

/// AES-256-GCM envelope for third-party secrets.
///
/// The key is only checked the first time something is encrypted or
/// decrypted, so processes that never touch credentials start without it.
#[derive(Clone)]
pub struct Vault {
    raw_key: Option<String>,
    cipher: OnceCell<Aes256Gcm>,
}

impl fmt::Debug for Vault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vault")
            .field("key_present", &self.raw_key.is_some())
            .field("initialized", &self.cipher.get().is_some())
            .finish()
    }
}

impl Vault {
    pub fn new(raw_key: Option<String>) -> Self {
        Self {
            raw_key: raw_key.filter(|k| !k.trim().is_empty()),
            cipher: OnceCell::new(),
        }
    }

    pub fn generate_key() -> String {
        let mut key = vec![0u8; CRYPTO_KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        hex::encode(key)
    }

    fn cipher(&self) -> Result<&Aes256Gcm, IntegrationError> {
        self.cipher.get_or_try_init(|| {
            let raw = self.raw_key.as_deref().ok_or_else(|| {
                IntegrationError::misconfigured("Encryption key is not configured")
                    .with_hint("Set CALLGATE_ENCRYPTION_KEY to 64 hex characters.")
            })?;
            let key = decode_key(raw)?;
            Ok(Aes256Gcm::new(aes_gcm::Key::<Aes256Gcm>::from_slice(&key)))
        })
    }

    /// Returns `<iv_hex>:<tag_hex>:<data_hex>` with a fresh nonce per call.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, IntegrationError> {
        let cipher = self.cipher()?;
        let mut iv = [0u8; CRYPTO_IV_SIZE];
        OsRng.fill_bytes(&mut iv);
        let nonce = aes_gcm::Nonce::from_slice(&iv);
        let mut ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| IntegrationError::internal("Failed to encrypt credential"))?;
        if ciphertext.len() < CRYPTO_TAG_SIZE {
            return Err(IntegrationError::internal("Failed to encrypt credential"));
        }
        let tag = ciphertext.split_off(ciphertext.len() - CRYPTO_TAG_SIZE);
        Ok(format!(
            "{}:{}:{}",
            hex::encode(iv),
            hex::encode(tag),
            hex::encode(ciphertext)
        ))
    }

    pub fn decrypt(&self, blob: &str) -> Result<String, IntegrationError> {
        let parts: Vec<&str> = blob.split(':').collect();
        if parts.len() != 3 || parts.iter().take(2).any(|p| p.is_empty()) {
            return Err(IntegrationError::credential_format(
                "Encrypted credential is missing a segment",
            ));
        }
        let iv = hex::decode(parts[0])
            .map_err(|_| IntegrationError::credential_format("Invalid IV encoding"))?;
        let tag = hex::decode(parts[1])
            .map_err(|_| IntegrationError::credential_format("Invalid auth tag encoding"))?;
        let data = hex::decode(parts[2])
            .map_err(|_| IntegrationError::credential_format("Invalid ciphertext encoding"))?;
        if iv.len() != CRYPTO_IV_SIZE {
            return Err(IntegrationError::credential_format("Invalid IV length"));
        }
        if tag.len() != CRYPTO_TAG_SIZE {
            return Err(IntegrationError::credential_format("Invalid auth tag length"));
        }
        let cipher = self.cipher()?;
        let mut combined = Vec::with_capacity(data.len() + tag.len());
        combined.extend_from_slice(&data);
        combined.extend_from_slice(&tag);
        let nonce = aes_gcm::Nonce::from_slice(&iv);
        let decrypted = cipher
            .decrypt(nonce, combined.as_ref())
            .map_err(|_| IntegrationError::credential_auth())?;
        String::from_utf8(decrypted)
            .map_err(|_| IntegrationError::credential_format("Decrypted credential is not UTF-8"))
    }
}
