//! Шифрование секретов в настройках шлюзов и SMTP.
//!
//! AES-256-GCM, ключ выводится как SHA-256 от секрета оператора.
//! Формат значения: `enc:v1:<base64(nonce || ciphertext)>`.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose, Engine as _};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;

const PREFIX: &str = "enc:v1:";
const NONCE_LEN: usize = 12;

/// Поля `config`, которые никогда не хранятся в открытом виде.
pub const SECRET_FIELDS: &[&str] = &["secret_key", "webhook_secret", "password", "client_secret"];

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("value is not an encrypted secret")]
    NotEncrypted,
    #[error("encrypted secret is malformed")]
    Malformed,
    #[error("secret could not be decrypted")]
    Decrypt,
    #[error("secret could not be encrypted")]
    Encrypt,
}

#[derive(Clone)]
pub struct SecretCipher {
    cipher: Arc<Aes256Gcm>,
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretCipher(..)")
    }
}

impl SecretCipher {
    pub fn from_secret(operator_secret: &str) -> Self {
        let key = Sha256::digest(operator_secret.as_bytes());
        Self {
            cipher: Arc::new(Aes256Gcm::new(&key)),
        }
    }

    pub fn is_encrypted(value: &str) -> bool {
        value.starts_with(PREFIX)
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::Encrypt)?;

        let mut packed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        packed.extend_from_slice(&nonce);
        packed.extend_from_slice(&ciphertext);
        Ok(format!("{}{}", PREFIX, general_purpose::STANDARD.encode(packed)))
    }

    pub fn decrypt(&self, value: &str) -> Result<String, CryptoError> {
        let encoded = value.strip_prefix(PREFIX).ok_or(CryptoError::NotEncrypted)?;
        let packed = general_purpose::STANDARD
            .decode(encoded)
            .map_err(|_| CryptoError::Malformed)?;
        if packed.len() <= NONCE_LEN {
            return Err(CryptoError::Malformed);
        }

        let (nonce, ciphertext) = packed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Decrypt)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::Malformed)
    }

    /// Шифрует секретные поля конфигурации шлюза. Уже зашифрованные значения
    /// не трогает, так что повторное сохранение безопасно.
    pub fn seal_config(&self, config: &mut Value) -> Result<(), CryptoError> {
        if let Value::Object(map) = config {
            for field in SECRET_FIELDS {
                if let Some(Value::String(raw)) = map.get_mut(*field) {
                    if !Self::is_encrypted(raw) {
                        *raw = self.encrypt(raw)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Возвращает копию конфигурации с расшифрованными секретами.
    pub fn open_config(&self, config: &Value) -> Result<Value, CryptoError> {
        let mut opened = config.clone();
        if let Value::Object(map) = &mut opened {
            for field in SECRET_FIELDS {
                if let Some(Value::String(sealed)) = map.get_mut(*field) {
                    if Self::is_encrypted(sealed) {
                        *sealed = self.decrypt(sealed)?;
                    }
                }
            }
        }
        Ok(opened)
    }
}
