//! Transport trait abstractions
//!
//! The sync engine sits on a "register a unique name, connect by name"
//! transport. A WebRTC signalling library, the in-memory network in
//! [`super::memory`], or anything else offering the same guarantees can be
//! plugged in behind these traits:
//!
//! - `register` is atomic per name: at most one holder system-wide.
//! - A link is a reliable, ordered byte stream between two registered names.
//! - Links report `Open`, `Data`, `Close` and `Error` events.
//! - Registrations report inbound links and rendezvous loss.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Transport errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Name already taken: {0}")]
    NameTaken(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Registration destroyed")]
    Destroyed,

    #[error("Connection closed")]
    Closed,
}

/// Lifecycle event of one peer link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Open,
    Data(Vec<u8>),
    Close,
    Error(String),
}

/// Outbound half of a peer link.
pub trait LinkSink: Send + Sync {
    fn send(&self, bytes: Vec<u8>) -> TransportResult<()>;

    /// Close the link. Both ends observe `LinkEvent::Close`.
    fn close(&self);
}

/// A dialed or accepted link to a remote name.
pub struct PeerLink {
    peer: String,
    sink: Arc<dyn LinkSink>,
    events: mpsc::UnboundedReceiver<LinkEvent>,
}

impl PeerLink {
    pub fn new(
        peer: impl Into<String>,
        sink: Arc<dyn LinkSink>,
        events: mpsc::UnboundedReceiver<LinkEvent>,
    ) -> Self {
        Self {
            peer: peer.into(),
            sink,
            events,
        }
    }

    /// Remote registered name.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn into_parts(
        self,
    ) -> (
        String,
        Arc<dyn LinkSink>,
        mpsc::UnboundedReceiver<LinkEvent>,
    ) {
        (self.peer, self.sink, self.events)
    }
}

impl fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerLink").field("peer", &self.peer).finish()
    }
}

/// Events concerning the local registration.
#[derive(Debug)]
pub enum RegistrationEvent {
    /// A remote name dialed us.
    Incoming(PeerLink),
    /// Lost the rendezvous link; the name is still reserved and can be restored.
    Disconnected,
    /// Registration destroyed; unrecoverable.
    Closed,
    Error(String),
}

/// A successful registration: its handle plus its event stream.
pub struct Registered {
    pub handle: Arc<dyn Registration>,
    pub events: mpsc::UnboundedReceiver<RegistrationEvent>,
}

/// A name held at the rendezvous directory.
#[async_trait]
pub trait Registration: Send + Sync {
    /// The registered name.
    fn name(&self) -> &str;

    /// Begin dialing `peer`.
    ///
    /// Returns immediately with a pending link. The link reports `Open` once
    /// the remote accepts; a name with no listener never opens.
    fn dial(&self, peer: &str) -> TransportResult<PeerLink>;

    /// Ask the transport to restore a lost rendezvous link for the same name.
    ///
    /// Completion only means the request was issued. Check
    /// [`Registration::is_disconnected`] afterwards.
    async fn reconnect(&self) -> TransportResult<()>;

    fn is_disconnected(&self) -> bool;

    fn is_destroyed(&self) -> bool;

    /// Release the name. Idempotent.
    fn destroy(&self);
}

/// Rendezvous transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Atomically claim `name`.
    ///
    /// Fails with [`TransportError::NameTaken`] when another holder has it.
    async fn register(&self, name: &str) -> TransportResult<Registered>;
}
