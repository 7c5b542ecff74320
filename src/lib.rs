//! clipmesh - end-to-end encrypted clipboard sync for small device groups
//!
//! Devices that share a human-readable sync code form a group of up to ten
//! members. Each device claims a numbered slot on a rendezvous network, dials
//! every sibling slot, and exchanges AES-256-GCM sealed clipboard texts over
//! the resulting full mesh. The rendezvous never sees plaintext or the key.
//!
//! - [`crypto`]: sync codes, group id and key derivation, the sealed envelope
//! - [`transport`]: rendezvous/link abstraction and an in-memory network
//! - [`sync`]: slot claiming, the mesh, reconnection and the session actor
//! - [`history`]: bounded, deduplicated clipboard history and its state file

pub mod crypto;
pub mod history;
pub mod sync;
pub mod time;
pub mod transport;

pub use sync::{generate_code, SyncError, SyncHandle, SyncResult, SyncSession};
