//! Authenticated encryption for session blobs.

use std::fmt;

use aes_gcm::{
    Aes256Gcm, Key, Nonce, Tag,
    aead::{AeadInPlace, KeyInit},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rand::{RngCore, rngs::OsRng};
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::{
    Envelope,
    config::{ConfigError, CryptoConfig},
};

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;
/// GCM nonce length in bytes.
pub const IV_LEN: usize = 12;
/// GCM tag length in bytes.
pub const TAG_LEN: usize = 16;

/// Crypto error.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Encryption failed")]
    Encrypt,
    #[error("Malformed envelope: {0}")]
    Malformed(String),
    #[error("Authentication failed")]
    Authentication,
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

/// Symmetric authenticated encryption of opaque session blobs.
///
/// The key is read-only after construction; clones share nothing mutable.
#[derive(Clone)]
pub struct CryptoBox {
    cipher: Aes256Gcm,
    ephemeral: bool,
}

impl fmt::Debug for CryptoBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoBox")
            .field("ephemeral", &self.ephemeral)
            .finish_non_exhaustive()
    }
}

impl CryptoBox {
    /// Create a box from raw key material.
    #[must_use]
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
            ephemeral: false,
        }
    }

    /// Create a box with a freshly generated key.
    ///
    /// Anything encrypted with it is unreadable after the process exits.
    #[must_use]
    pub fn ephemeral() -> Self {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self {
            ephemeral: true,
            ..Self::new(key)
        }
    }

    /// Build from configuration.
    ///
    /// # Errors
    /// Returns `MissingEncryptionKey` when no key is configured and the
    /// ephemeral opt-in is off, or `Invalid` when the key does not parse.
    pub fn from_config(config: &CryptoConfig) -> Result<Self, ConfigError> {
        match config.encryption_key.as_deref() {
            Some(raw) => {
                let key = parse_key(raw).map_err(|e| ConfigError::Invalid {
                    name: "encryption_key",
                    reason: e.to_string(),
                })?;
                Ok(Self::new(key))
            }
            None if config.allow_ephemeral_key => {
                tracing::warn!(
                    "No session encryption key configured: generated an EPHEMERAL key. \
                     Sessions saved by this process cannot be decrypted after a restart."
                );
                Ok(Self::ephemeral())
            }
            None => Err(ConfigError::MissingEncryptionKey),
        }
    }

    /// Whether the key was generated for this process only.
    #[must_use]
    pub const fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    /// Serialize and encrypt a value with a fresh random IV.
    ///
    /// # Errors
    /// Returns error if the value cannot be serialized or encryption fails.
    pub fn encrypt<T: Serialize + ?Sized>(&self, value: &T) -> Result<Envelope, CryptoError> {
        let mut buffer = serde_json::to_vec(value)?;
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let tag = self
            .cipher
            .encrypt_in_place_detached(Nonce::from_slice(&iv), b"", &mut buffer)
            .map_err(|_| CryptoError::Encrypt)?;

        Ok(Envelope {
            ciphertext: hex::encode(&buffer),
            iv: hex::encode(iv),
            auth_tag: hex::encode(tag),
        })
    }

    /// Verify and decrypt an envelope.
    ///
    /// Any failure (corruption, tampering, wrong key, unexpected shape) is
    /// logged and yields `None`.
    #[must_use]
    pub fn decrypt<T: DeserializeOwned>(&self, envelope: &Envelope) -> Option<T> {
        match self.try_decrypt(envelope) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, "Session envelope could not be decrypted");
                None
            }
        }
    }

    /// Verify and decrypt an envelope, reporting why it failed.
    ///
    /// # Errors
    /// Returns error if the envelope is malformed, fails authentication,
    /// or the plaintext does not deserialize into `T`.
    pub fn try_decrypt<T: DeserializeOwned>(&self, envelope: &Envelope) -> Result<T, CryptoError> {
        let iv = decode_field("iv", &envelope.iv, Some(IV_LEN))?;
        let tag = decode_field("authTag", &envelope.auth_tag, Some(TAG_LEN))?;
        let mut buffer = decode_field("ciphertext", &envelope.ciphertext, None)?;

        self.cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(&iv),
                b"",
                &mut buffer,
                Tag::from_slice(&tag),
            )
            .map_err(|_| CryptoError::Authentication)?;

        Ok(serde_json::from_slice(&buffer)?)
    }
}

/// Parse a 32-byte key given as 64 hex characters or standard base64.
///
/// # Errors
/// Returns error if the input decodes to anything other than 32 bytes.
pub fn parse_key(raw: &str) -> Result<[u8; KEY_LEN], CryptoError> {
    let raw = raw.trim();
    let bytes = if raw.len() == KEY_LEN * 2 && raw.bytes().all(|b| b.is_ascii_hexdigit()) {
        hex::decode(raw).map_err(|e| CryptoError::InvalidKey(e.to_string()))?
    } else {
        BASE64
            .decode(raw)
            .map_err(|e| CryptoError::InvalidKey(format!("neither hex nor base64: {e}")))?
    };

    <[u8; KEY_LEN]>::try_from(bytes.as_slice()).map_err(|_| {
        CryptoError::InvalidKey(format!("expected {KEY_LEN} bytes, got {}", bytes.len()))
    })
}

fn decode_field(name: &str, value: &str, len: Option<usize>) -> Result<Vec<u8>, CryptoError> {
    let bytes = hex::decode(value).map_err(|e| CryptoError::Malformed(format!("{name}: {e}")))?;
    match len {
        Some(expected) if bytes.len() != expected => Err(CryptoError::Malformed(format!(
            "{name}: expected {expected} bytes, got {}",
            bytes.len()
        ))),
        _ => Ok(bytes),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;

    fn test_box() -> CryptoBox {
        CryptoBox::new([7u8; KEY_LEN])
    }

    fn flip_hex_byte(field: &str, index: usize) -> String {
        let mut bytes = hex::decode(field).unwrap();
        bytes[index] ^= 0x01;
        hex::encode(bytes)
    }

    #[test]
    fn test_roundtrip() {
        let crypto = test_box();
        let session = json!({
            "token": "abc",
            "wid": {"server": "c.us", "user": "391234567890"},
            "keys": [1, 2, 3],
        });

        let envelope = crypto.encrypt(&session).unwrap();
        let decrypted: Value = crypto.decrypt(&envelope).unwrap();
        assert_eq!(decrypted, session);
    }

    #[test]
    fn test_fresh_iv_per_call() {
        let crypto = test_box();
        let a = crypto.encrypt(&json!({"token": "abc"})).unwrap();
        let b = crypto.encrypt(&json!({"token": "abc"})).unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
        assert_eq!(a.iv.len(), IV_LEN * 2);
        assert_eq!(a.auth_tag.len(), TAG_LEN * 2);
    }

    #[test]
    fn test_tampered_ciphertext_is_rejected() {
        let crypto = test_box();
        let envelope = crypto.encrypt(&json!({"token": "abc"})).unwrap();
        let len = hex::decode(&envelope.ciphertext).unwrap().len();

        for index in 0..len {
            let tampered = Envelope {
                ciphertext: flip_hex_byte(&envelope.ciphertext, index),
                ..envelope.clone()
            };
            assert!(crypto.decrypt::<Value>(&tampered).is_none());
        }
    }

    #[test]
    fn test_tampered_tag_is_rejected() {
        let crypto = test_box();
        let envelope = crypto.encrypt(&json!({"token": "abc"})).unwrap();

        for index in 0..TAG_LEN {
            let tampered = Envelope {
                auth_tag: flip_hex_byte(&envelope.auth_tag, index),
                ..envelope.clone()
            };
            assert!(crypto.decrypt::<Value>(&tampered).is_none());
        }
    }

    #[test]
    fn test_wrong_key_is_rejected() {
        let envelope = test_box().encrypt(&json!({"token": "abc"})).unwrap();
        let other = CryptoBox::new([9u8; KEY_LEN]);
        assert!(matches!(
            other.try_decrypt::<Value>(&envelope),
            Err(CryptoError::Authentication)
        ));
    }

    #[test]
    fn test_malformed_fields_do_not_panic() {
        let crypto = test_box();
        let envelope = Envelope {
            ciphertext: "zz".to_string(),
            iv: "00".to_string(),
            auth_tag: String::new(),
        };
        assert!(crypto.decrypt::<Value>(&envelope).is_none());
    }

    #[test]
    fn test_parse_key_formats() {
        let hex_key = "11".repeat(KEY_LEN);
        assert_eq!(parse_key(&hex_key).unwrap(), [0x11; KEY_LEN]);

        let b64_key = BASE64.encode([0x22u8; KEY_LEN]);
        assert_eq!(parse_key(&b64_key).unwrap(), [0x22; KEY_LEN]);

        assert!(parse_key("too-short").is_err());
        assert!(parse_key(&BASE64.encode([0u8; 16])).is_err());
    }

    #[test]
    fn test_from_config_key_policy() {
        let missing = CryptoConfig::default();
        assert!(matches!(
            CryptoBox::from_config(&missing),
            Err(ConfigError::MissingEncryptionKey)
        ));

        let dev = CryptoConfig {
            encryption_key: None,
            allow_ephemeral_key: true,
        };
        assert!(CryptoBox::from_config(&dev).unwrap().is_ephemeral());

        let configured = CryptoConfig {
            encryption_key: Some("ab".repeat(KEY_LEN)),
            allow_ephemeral_key: false,
        };
        assert!(!CryptoBox::from_config(&configured).unwrap().is_ephemeral());
    }
}
