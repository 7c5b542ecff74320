//! Group secrets and payload encryption
//!
//! - `code`: the shared sync code and its generator
//! - `keyring`: group id and group key derivation
//! - `envelope`: AES-256-GCM message envelope and wire format
pub mod code;
pub mod envelope;
pub mod keyring;

#[cfg(test)]
mod proptests;

pub use code::{CodeError, SharedCode};
pub use envelope::{decrypt, encrypt, EnvelopeError, MessageKind, SealedPayload, WireMessage};
pub use keyring::{derive, GroupIdentity, GroupKey};
