//! In-memory rendezvous network
//!
//! A shared [`MemoryNetwork`] acts as both rendezvous directory and link
//! fabric for any number of in-process devices. Tests use its knobs to take
//! names, inject registration failures and drop rendezvous links.

use super::traits::*;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// Shared in-memory network. Clone it to give each device access.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

#[derive(Default)]
struct NetworkState {
    names: HashMap<String, NameEntry>,
    register_failures: HashMap<String, TransportError>,
    reconnect_failures: HashMap<String, u32>,
    register_log: Vec<String>,
    next_id: u64,
}

struct NameEntry {
    id: u64,
    events: mpsc::UnboundedSender<RegistrationEvent>,
    flags: Arc<RegistrationFlags>,
}

#[derive(Default)]
struct RegistrationFlags {
    disconnected: AtomicBool,
    destroyed: AtomicBool,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take `name` with a holder that never answers dials.
    pub fn occupy(&self, name: &str) {
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        let (events, _) = mpsc::unbounded_channel();
        state.names.insert(
            name.to_string(),
            NameEntry {
                id,
                events,
                flags: Arc::default(),
            },
        );
    }

    /// Make every future registration of `name` fail with `error`.
    pub fn fail_registration(&self, name: &str, error: TransportError) {
        self.lock()
            .register_failures
            .insert(name.to_string(), error);
    }

    /// Make the next `count` reconnect requests for `name` leave it disconnected.
    pub fn fail_reconnects(&self, name: &str, count: u32) {
        self.lock()
            .reconnect_failures
            .insert(name.to_string(), count);
    }

    /// Names passed to `register`, in call order.
    pub fn registration_attempts(&self) -> Vec<String> {
        self.lock().register_log.clone()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.lock().names.contains_key(name)
    }

    /// Drop the rendezvous link of `name`, keeping the name reserved.
    pub fn drop_rendezvous(&self, name: &str) {
        let state = self.lock();
        if let Some(entry) = state.names.get(name) {
            entry.flags.disconnected.store(true, Ordering::SeqCst);
            let _ = entry.events.send(RegistrationEvent::Disconnected);
        }
    }

    fn release(&self, name: &str, id: u64) {
        let mut state = self.lock();
        if state.names.get(name).map(|e| e.id) == Some(id) {
            state.names.remove(name);
        }
    }
}

#[async_trait]
impl Transport for MemoryNetwork {
    async fn register(&self, name: &str) -> TransportResult<Registered> {
        let mut state = self.lock();
        state.register_log.push(name.to_string());

        if let Some(error) = state.register_failures.get(name) {
            return Err(error.clone());
        }
        if name.is_empty() {
            return Err(TransportError::InvalidName(name.to_string()));
        }
        if state.names.contains_key(name) {
            return Err(TransportError::NameTaken(name.to_string()));
        }

        let id = state.next_id;
        state.next_id += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        let flags = Arc::new(RegistrationFlags::default());
        state.names.insert(
            name.to_string(),
            NameEntry {
                id,
                events: tx.clone(),
                flags: flags.clone(),
            },
        );

        let handle = MemoryRegistration {
            name: name.to_string(),
            id,
            network: self.clone(),
            flags,
            events: tx,
        };

        Ok(Registered {
            handle: Arc::new(handle),
            events: rx,
        })
    }
}

/// A name held on a [`MemoryNetwork`].
pub struct MemoryRegistration {
    name: String,
    id: u64,
    network: MemoryNetwork,
    flags: Arc<RegistrationFlags>,
    events: mpsc::UnboundedSender<RegistrationEvent>,
}

#[async_trait]
impl Registration for MemoryRegistration {
    fn name(&self) -> &str {
        &self.name
    }

    fn dial(&self, peer: &str) -> TransportResult<PeerLink> {
        if self.is_destroyed() {
            return Err(TransportError::Destroyed);
        }
        if self.is_disconnected() {
            return Err(TransportError::Network(
                "not connected to rendezvous".to_string(),
            ));
        }

        let (local_tx, local_rx) = mpsc::unbounded_channel();
        let (remote_tx, remote_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let local = PeerLink::new(
            peer,
            Arc::new(ChannelSink {
                remote: remote_tx.clone(),
                local: local_tx.clone(),
                closed: closed.clone(),
            }),
            local_rx,
        );

        let state = self.network.lock();
        let Some(entry) = state.names.get(peer) else {
            return Ok(local);
        };
        if entry.flags.disconnected.load(Ordering::SeqCst)
            || entry.flags.destroyed.load(Ordering::SeqCst)
        {
            return Ok(local);
        }

        let remote = PeerLink::new(
            self.name.clone(),
            Arc::new(ChannelSink {
                remote: local_tx.clone(),
                local: remote_tx.clone(),
                closed,
            }),
            remote_rx,
        );
        if entry.events.send(RegistrationEvent::Incoming(remote)).is_ok() {
            let _ = remote_tx.send(LinkEvent::Open);
            let _ = local_tx.send(LinkEvent::Open);
        }

        Ok(local)
    }

    async fn reconnect(&self) -> TransportResult<()> {
        if self.is_destroyed() {
            return Err(TransportError::Destroyed);
        }

        let mut state = self.network.lock();
        if let Some(remaining) = state.reconnect_failures.get_mut(&self.name) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(());
            }
        }
        self.flags.disconnected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_disconnected(&self) -> bool {
        self.flags.disconnected.load(Ordering::SeqCst)
    }

    fn is_destroyed(&self) -> bool {
        self.flags.destroyed.load(Ordering::SeqCst)
    }

    fn destroy(&self) {
        if self.flags.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.network.release(&self.name, self.id);
        let _ = self.events.send(RegistrationEvent::Closed);
    }
}

/// Outbound half of an in-memory link pair.
struct ChannelSink {
    remote: mpsc::UnboundedSender<LinkEvent>,
    local: mpsc::UnboundedSender<LinkEvent>,
    closed: Arc<AtomicBool>,
}

impl LinkSink for ChannelSink {
    fn send(&self, bytes: Vec<u8>) -> TransportResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.remote
            .send(LinkEvent::Data(bytes))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.remote.send(LinkEvent::Close);
        let _ = self.local.send(LinkEvent::Close);
    }
}
