//! Encrypted message envelope
//!
//! Every synced text travels as a JSON transport message:
//!
//! ```text
//! { "type": "text", "data": "<inner>", "timestamp": 1700000000000, "id": "<uuid v4>" }
//!
//! inner = { "iv": "<12 bytes hex>", "data": "<AES-256-GCM ciphertext ‖ tag, hex>" }
//! ```
//!
//! The inner object is itself serialized to a string before being placed in
//! the outer `data` field, so peers built against the original browser
//! extension can read our messages and we can read theirs.
//!
//! Decryption never errors. Anything that fails to parse or authenticate
//! decrypts to `None` and must be dropped by the caller.

use super::keyring::GroupKey;
use crate::time::{now_millis, Timestamp};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// GCM nonce length in bytes
pub const NONCE_LEN: usize = 12;

/// Errors on the sealing side. Opening reports failure as `None`.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),
}

/// Inner encrypted payload: hex nonce and hex ciphertext-with-tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedPayload {
    pub iv: String,
    pub data: String,
}

impl SealedPayload {
    pub fn to_json(&self) -> Result<String, EnvelopeError> {
        serde_json::to_string(self).map_err(|e| EnvelopeError::SerializationFailed(e.to_string()))
    }

    pub fn from_json(json: &str) -> Option<Self> {
        serde_json::from_str(json).ok()
    }
}

fn cipher(key: &GroupKey) -> Option<LessSafeKey> {
    UnboundKey::new(&AES_256_GCM, key.as_bytes())
        .ok()
        .map(LessSafeKey::new)
}

/// Encrypt `plaintext` under `key` with a fresh random nonce.
pub fn encrypt(plaintext: &str, key: &GroupKey) -> Result<SealedPayload, EnvelopeError> {
    let mut nonce_bytes = [0u8; NONCE_LEN];
    SystemRandom::new()
        .fill(&mut nonce_bytes)
        .map_err(|_| EnvelopeError::EncryptionFailed("RNG failure".to_string()))?;
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let key = cipher(key)
        .ok_or_else(|| EnvelopeError::EncryptionFailed("Key creation failed".to_string()))?;

    let mut in_out = plaintext.as_bytes().to_vec();
    key.seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
        .map_err(|e| EnvelopeError::EncryptionFailed(e.to_string()))?;

    Ok(SealedPayload {
        iv: hex::encode(nonce_bytes),
        data: hex::encode(in_out),
    })
}

/// Decrypt a sealed payload. `None` on any malformed or forged input.
pub fn decrypt(payload: &SealedPayload, key: &GroupKey) -> Option<String> {
    let nonce_bytes = hex::decode(&payload.iv).ok()?;
    let nonce = Nonce::try_assume_unique_for_key(&nonce_bytes).ok()?;
    let mut in_out = hex::decode(&payload.data).ok()?;

    let key = cipher(key)?;
    let plaintext = key.open_in_place(nonce, Aad::empty(), &mut in_out).ok()?;
    String::from_utf8(plaintext.to_vec()).ok()
}

/// Decrypt the serialized inner payload string.
pub fn decrypt_json(inner: &str, key: &GroupKey) -> Option<String> {
    decrypt(&SealedPayload::from_json(inner)?, key)
}

/// Transport message kinds. Only text is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
}

/// Outer transport message carrying one encrypted text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub data: String,
    pub timestamp: Timestamp,
    pub id: Uuid,
}

impl WireMessage {
    /// Encrypt `text` and stamp it with a new id and the current time.
    pub fn seal(text: &str, key: &GroupKey) -> Result<Self, EnvelopeError> {
        let payload = encrypt(text, key)?;
        Ok(Self {
            kind: MessageKind::Text,
            data: payload.to_json()?,
            timestamp: now_millis(),
            id: Uuid::new_v4(),
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(|e| EnvelopeError::SerializationFailed(e.to_string()))
    }

    /// Parse inbound bytes. Unknown message types and garbage yield `None`.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }

    /// Decrypt the carried text.
    pub fn open(&self, key: &GroupKey) -> Option<String> {
        match self.kind {
            MessageKind::Text => decrypt_json(&self.data, key),
        }
    }
}
