//! Group key derivation from a shared sync code
//!
//! Both outputs come from SHA-256 over the code, separated by domain:
//!
//! ```text
//! SharedCode
//!     │
//!     ├─► SHA-256(code)              → group id (hex, public rendezvous label)
//!     └─► SHA-256(code ‖ "clipsync") → AES-256-GCM group key (never leaves memory)
//! ```
//!
//! The group id is safe to hand to a rendezvous directory. Knowing it does
//! not reveal the key, because the key is a hash of a different input.

use super::code::SharedCode;
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Domain separation suffix appended to the code before hashing key material.
pub const KEY_DOMAIN_SUFFIX: &str = "clipsync";

/// Key length for AES-256-GCM
pub const KEY_LEN: usize = 32;

/// Public group label derived one-way from a sync code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupIdentity {
    group_id: String,
}

impl GroupIdentity {
    /// Wrap an already-derived hex group id.
    pub fn from_hex(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.group_id
    }

    /// First 8 hex characters, for logs and status lines.
    pub fn short(&self) -> &str {
        let end = self.group_id.len().min(8);
        &self.group_id[..end]
    }
}

impl fmt::Display for GroupIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.group_id)
    }
}

/// Symmetric group key. Zeroized on drop and redacted from debug output.
#[derive(Zeroize, ZeroizeOnDrop, PartialEq, Eq)]
pub struct GroupKey([u8; KEY_LEN]);

impl GroupKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("GroupKey(<redacted>)")
    }
}

/// Derive the public group identity and private group key for a code.
///
/// Pure and deterministic: the same code always yields the same pair.
pub fn derive(code: &SharedCode) -> (GroupIdentity, GroupKey) {
    let group_hash = Sha256::digest(code.as_str().as_bytes());
    let identity = GroupIdentity::from_hex(hex::encode(group_hash));

    let mut hasher = Sha256::new();
    hasher.update(code.as_str().as_bytes());
    hasher.update(KEY_DOMAIN_SUFFIX.as_bytes());
    let key = GroupKey::from_bytes(hasher.finalize().into());

    (identity, key)
}
