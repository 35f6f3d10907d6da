// src/services/encryption.rs
//! At-rest protection for provider tokens (AES-256-GCM)

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::RngCore;
use thiserror::Error;

/// Prefix marking a sealed value, so plaintext rows written before a key was
/// configured can still be told apart.
const SEALED_PREFIX: &str = "enc:v1:";

const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("Invalid encryption key format")]
    InvalidKeyFormat,

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Invalid encrypted data format")]
    InvalidDataFormat,
}

pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCipher")
            .field("cipher", &"<redacted>")
            .finish()
    }
}

impl TokenCipher {
    /// Build from a base64-encoded 32-byte key (`ENCRYPTION_MASTER_KEY`)
    pub fn from_key(key_str: &str) -> Result<Self, EncryptionError> {
        let key_bytes = BASE64
            .decode(key_str.trim().as_bytes())
            .map_err(|_| EncryptionError::InvalidKeyFormat)?;

        if key_bytes.len() != 32 {
            return Err(EncryptionError::InvalidKeyFormat);
        }

        let cipher =
            Aes256Gcm::new_from_slice(&key_bytes).map_err(|_| EncryptionError::InvalidKeyFormat)?;

        Ok(Self { cipher })
    }

    /// Generate a new random key (base64-encoded)
    pub fn generate_key() -> String {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        BASE64.encode(key)
    }

    /// Seal `plaintext` as `enc:v1:<base64(nonce || ciphertext)>`
    pub fn seal(&self, plaintext: &str) -> Result<String, EncryptionError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| EncryptionError::EncryptionFailed(e.to_string()))?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend_from_slice(&ciphertext);

        Ok(format!("{}{}", SEALED_PREFIX, BASE64.encode(combined)))
    }

    /// Reverse of [`seal`](Self::seal). Values without the prefix are
    /// returned unchanged.
    pub fn open(&self, stored: &str) -> Result<String, EncryptionError> {
        let Some(encoded) = stored.strip_prefix(SEALED_PREFIX) else {
            return Ok(stored.to_string());
        };

        let combined = BASE64
            .decode(encoded.as_bytes())
            .map_err(|_| EncryptionError::InvalidDataFormat)?;

        if combined.len() < NONCE_LEN {
            return Err(EncryptionError::InvalidDataFormat);
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| EncryptionError::DecryptionFailed(e.to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|_| EncryptionError::DecryptionFailed("invalid UTF-8".to_string()))
    }
}

/// Seal when a cipher is configured, store as-is otherwise
pub fn seal_optional(
    cipher: Option<&TokenCipher>,
    value: Option<&str>,
) -> Result<Option<String>, EncryptionError> {
    match (cipher, value) {
        (_, None) => Ok(None),
        (Some(c), Some(v)) => c.seal(v).map(Some),
        (None, Some(v)) => Ok(Some(v.to_string())),
    }
}

/// Inverse of [`seal_optional`]
pub fn open_optional(
    cipher: Option<&TokenCipher>,
    value: Option<&str>,
) -> Result<Option<String>, EncryptionError> {
    match (cipher, value) {
        (_, None) => Ok(None),
        (Some(c), Some(v)) => c.open(v).map(Some),
        (None, Some(v)) => Ok(Some(v.to_string())),
    }
}
