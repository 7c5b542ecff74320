//! Sync engine errors surfaced at the session boundary.

use crate::transport::TransportError;
use thiserror::Error;

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("Group is full: all {max_slots} device slots are taken")]
    GroupFull { max_slots: u8 },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Not connected")]
    NotConnected,

    #[error("Connect cancelled by a newer connect request")]
    Cancelled,

    #[error("Reconnection exhausted, manual restart required")]
    ReconnectExhausted,

    #[error("Invalid sync code: {0}")]
    InvalidCode(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Sync session has shut down")]
    SessionClosed,
}
