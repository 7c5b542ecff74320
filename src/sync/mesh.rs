//! Mesh connection manager
//!
//! Keeps a direct link to every other slot of the group. After acquiring a
//! slot the device dials all `MAX_SLOTS - 1` sibling names; unoccupied slots
//! simply never open. Inbound links are accepted unconditionally: knowing the
//! group id is enough to connect, and payload encryption is what keeps
//! outsiders out.
//!
//! Link lifecycle events are pumped into one channel and applied through
//! [`Mesh::apply`], so every connection-set mutation happens on the owner's
//! task and state transitions can be driven directly in tests.
//!
//! Per-link lifecycle: `pending → open → closed`. Closed or errored links are
//! forgotten. Single-link drops are not redialed here; the whole mesh is
//! redialed after the reconnection supervisor restores the registration.

use super::error::{SyncError, SyncResult};
use super::slot::{slot_name, MAX_SLOTS};
use crate::crypto::{GroupIdentity, GroupKey, WireMessage};
use crate::time::Timestamp;
use crate::transport::{LinkEvent, LinkSink, PeerLink, Registration};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Identifies one link within a mesh.
pub type LinkId = u64;

/// A link event tagged with the session epoch that created the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshEvent {
    pub epoch: u64,
    pub link: LinkId,
    pub event: LinkEvent,
}

/// Which side initiated a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    Inbound,
}

/// Connection-set view: one entry per remote name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConnection {
    pub peer: String,
    pub open: bool,
}

/// A decrypted text received from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedText {
    pub id: Uuid,
    pub text: String,
    pub timestamp: Timestamp,
    pub from: String,
}

/// Metadata of a broadcast message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broadcast {
    pub id: Uuid,
    pub timestamp: Timestamp,
    /// Peers the message was handed to.
    pub delivered: usize,
}

struct LinkEntry {
    peer: String,
    sink: Arc<dyn LinkSink>,
    direction: Direction,
    open: bool,
    pump: AbortHandle,
}

impl LinkEntry {
    fn shutdown(&self) {
        self.pump.abort();
        self.sink.close();
    }
}

pub struct Mesh {
    epoch: u64,
    group: GroupIdentity,
    local_slot: u8,
    links: HashMap<LinkId, LinkEntry>,
    next_link: LinkId,
    events: mpsc::UnboundedSender<MeshEvent>,
}

impl Mesh {
    pub fn new(
        epoch: u64,
        group: GroupIdentity,
        local_slot: u8,
        events: mpsc::UnboundedSender<MeshEvent>,
    ) -> Self {
        Self {
            epoch,
            group,
            local_slot,
            links: HashMap::new(),
            next_link: 0,
            events,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn local_slot(&self) -> u8 {
        self.local_slot
    }

    /// Dial every sibling slot that has no open link yet.
    ///
    /// Stale pending dials to the same name are replaced. Returns the number
    /// of dials issued; dial failures are logged and skipped.
    pub fn dial_all(&mut self, registration: &dyn Registration) -> usize {
        let open: HashSet<String> = self.open_peers().into_iter().collect();
        let local_slot = self.local_slot;
        let mut issued = 0;

        for slot in (1..=MAX_SLOTS).filter(|s| *s != local_slot) {
            let name = slot_name(&self.group, slot);
            if open.contains(&name) {
                continue;
            }

            let stale: Vec<LinkId> = self
                .links
                .iter()
                .filter(|(_, e)| e.peer == name && !e.open && e.direction == Direction::Outbound)
                .map(|(id, _)| *id)
                .collect();
            for id in stale {
                if let Some(entry) = self.links.remove(&id) {
                    entry.shutdown();
                }
            }

            match registration.dial(&name) {
                Ok(link) => {
                    debug!(slot, "dialing peer");
                    self.track(link, Direction::Outbound);
                    issued += 1;
                }
                Err(e) => debug!(slot, error = %e, "dial failed"),
            }
        }

        issued
    }

    /// Take ownership of an inbound link.
    pub fn accept(&mut self, link: PeerLink) -> LinkId {
        info!(peer = %short_name(link.peer()), "incoming connection");
        self.track(link, Direction::Inbound)
    }

    fn track(&mut self, link: PeerLink, direction: Direction) -> LinkId {
        let id = self.next_link;
        self.next_link += 1;

        let (peer, sink, mut events) = link.into_parts();
        let tx = self.events.clone();
        let epoch = self.epoch;

        let pump = tokio::spawn(async move {
            loop {
                let event = events.recv().await.unwrap_or(LinkEvent::Close);
                let terminal = matches!(event, LinkEvent::Close | LinkEvent::Error(_));
                let delivered = tx
                    .send(MeshEvent {
                        epoch,
                        link: id,
                        event,
                    })
                    .is_ok();
                if terminal || !delivered {
                    break;
                }
            }
        });

        self.links.insert(
            id,
            LinkEntry {
                peer,
                sink,
                direction,
                open: false,
                pump: pump.abort_handle(),
            },
        );
        id
    }

    /// Apply one link event. Returns the decrypted text for inbound data.
    ///
    /// Events from other epochs or unknown links are ignored. Data that does
    /// not parse or authenticate under `key` is dropped silently.
    pub fn apply(&mut self, event: MeshEvent, key: &GroupKey) -> Option<ReceivedText> {
        if event.epoch != self.epoch {
            debug!(link = event.link, "ignoring event from previous session");
            return None;
        }

        match event.event {
            LinkEvent::Open => {
                let entry = self.links.get_mut(&event.link)?;
                entry.open = true;
                let peer = entry.peer.clone();
                let duplicates = self
                    .links
                    .values()
                    .filter(|e| e.open && e.peer == peer)
                    .count();
                if duplicates > 1 {
                    debug!(peer = %short_name(&peer), "redundant link opened");
                } else {
                    info!(peer = %short_name(&peer), "connection opened");
                }
                None
            }
            LinkEvent::Data(bytes) => {
                let entry = self.links.get(&event.link)?;
                let Some(message) = WireMessage::from_bytes(&bytes) else {
                    debug!(peer = %short_name(&entry.peer), "dropping unrecognized message");
                    return None;
                };
                let Some(text) = message.open(key) else {
                    debug!(peer = %short_name(&entry.peer), "dropping undecryptable message");
                    return None;
                };
                Some(ReceivedText {
                    id: message.id,
                    text,
                    timestamp: message.timestamp,
                    from: entry.peer.clone(),
                })
            }
            LinkEvent::Close => {
                if let Some(entry) = self.links.remove(&event.link) {
                    if entry.open {
                        info!(peer = %short_name(&entry.peer), "connection closed");
                    }
                    entry.pump.abort();
                }
                None
            }
            LinkEvent::Error(error) => {
                if let Some(entry) = self.links.remove(&event.link) {
                    warn!(peer = %short_name(&entry.peer), %error, "connection error");
                    entry.shutdown();
                }
                None
            }
        }
    }

    /// Encrypt `text` once and send it to every open peer.
    ///
    /// Links that are still pending are skipped; nothing is queued.
    pub fn broadcast(&self, text: &str, key: &GroupKey) -> SyncResult<Broadcast> {
        let message =
            WireMessage::seal(text, key).map_err(|e| SyncError::Encryption(e.to_string()))?;
        let bytes = message
            .to_bytes()
            .map_err(|e| SyncError::Encryption(e.to_string()))?;

        let mut delivered = 0;
        for entry in self.primary_links() {
            match entry.sink.send(bytes.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(peer = %short_name(&entry.peer), error = %e, "send failed"),
            }
        }

        debug!(delivered, "broadcast sent");
        Ok(Broadcast {
            id: message.id,
            timestamp: message.timestamp,
            delivered,
        })
    }

    // One open link per peer, lowest link id first.
    fn primary_links(&self) -> Vec<&LinkEntry> {
        let mut ids: Vec<&LinkId> = self.links.keys().collect();
        ids.sort();

        let mut seen = HashSet::new();
        ids.into_iter()
            .filter_map(|id| self.links.get(id))
            .filter(|e| e.open && seen.insert(e.peer.as_str()))
            .collect()
    }

    /// Names with at least one open link.
    pub fn open_peers(&self) -> Vec<String> {
        self.connections()
            .into_iter()
            .filter(|c| c.open)
            .map(|c| c.peer)
            .collect()
    }

    /// Every remote name with a live or pending link, sorted by name.
    pub fn connections(&self) -> Vec<PeerConnection> {
        let mut by_peer: BTreeMap<&str, bool> = BTreeMap::new();
        for entry in self.links.values() {
            *by_peer.entry(entry.peer.as_str()).or_default() |= entry.open;
        }
        by_peer
            .into_iter()
            .map(|(peer, open)| PeerConnection {
                peer: peer.to_string(),
                open,
            })
            .collect()
    }

    /// Close every link and stop their pumps.
    pub fn close_all(&mut self) {
        for (_, entry) in self.links.drain() {
            entry.shutdown();
        }
    }
}

impl Drop for Mesh {
    fn drop(&mut self) {
        self.close_all();
    }
}

// Rendezvous names are 64 hex chars plus a slot; logs only need the tail.
fn short_name(name: &str) -> &str {
    match name.rfind('-') {
        Some(i) if i >= 8 => name.get(i - 8..).unwrap_or(name),
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{derive, SharedCode};
    use crate::transport::{MemoryNetwork, Transport, TransportResult};
    use std::sync::Mutex;

    fn keys(code: &str) -> (GroupIdentity, GroupKey) {
        derive(&SharedCode::new(code).unwrap())
    }

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<Vec<u8>>>,
        closed: Mutex<bool>,
    }

    impl LinkSink for RecordingSink {
        fn send(&self, bytes: Vec<u8>) -> TransportResult<()> {
            self.sent.lock().unwrap().push(bytes);
            Ok(())
        }

        fn close(&self) {
            *self.closed.lock().unwrap() = true;
        }
    }

    fn fake_link(peer: &str) -> (PeerLink, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let (_tx, rx) = mpsc::unbounded_channel();
        (PeerLink::new(peer, sink.clone(), rx), sink)
    }

    fn event(link: LinkId, event: LinkEvent) -> MeshEvent {
        MeshEvent {
            epoch: 1,
            link,
            event,
        }
    }

    #[tokio::test]
    async fn test_open_is_idempotent_per_peer() {
        let (group, key) = keys("happy-cat-482");
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut mesh = Mesh::new(1, group.clone(), 1, tx);
        let peer = slot_name(&group, 2);

        let (first, _) = fake_link(&peer);
        let (second, _) = fake_link(&peer);
        let a = mesh.accept(first);
        let b = mesh.accept(second);
        assert_eq!(
            mesh.connections(),
            vec![PeerConnection {
                peer: peer.clone(),
                open: false
            }]
        );

        mesh.apply(event(a, LinkEvent::Open), &key);
        mesh.apply(event(b, LinkEvent::Open), &key);
        assert_eq!(mesh.open_peers(), vec![peer.clone()]);

        // Closing the redundant link keeps the peer reachable
        mesh.apply(event(a, LinkEvent::Close), &key);
        assert_eq!(mesh.open_peers(), vec![peer]);

        mesh.apply(event(b, LinkEvent::Error("reset".to_string())), &key);
        assert!(mesh.connections().is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_skips_pending_and_dedups_peers() {
        let (group, key) = keys("happy-cat-482");
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut mesh = Mesh::new(1, group.clone(), 1, tx);

        let (open_a, sink_a) = fake_link(&slot_name(&group, 2));
        let (open_a2, sink_a2) = fake_link(&slot_name(&group, 2));
        let (pending, sink_pending) = fake_link(&slot_name(&group, 3));
        let a = mesh.accept(open_a);
        let a2 = mesh.accept(open_a2);
        mesh.accept(pending);
        mesh.apply(event(a, LinkEvent::Open), &key);
        mesh.apply(event(a2, LinkEvent::Open), &key);

        let sent = mesh.broadcast("copied text", &key).unwrap();
        assert_eq!(sent.delivered, 1);
        assert_eq!(sink_a.sent.lock().unwrap().len(), 1);
        assert!(sink_a2.sent.lock().unwrap().is_empty());
        assert!(sink_pending.sent.lock().unwrap().is_empty());

        let message = WireMessage::from_bytes(&sink_a.sent.lock().unwrap()[0]).unwrap();
        assert_eq!(message.id, sent.id);
        assert_eq!(message.timestamp, sent.timestamp);
        assert_eq!(message.open(&key).as_deref(), Some("copied text"));
    }

    #[tokio::test]
    async fn test_receive_decrypts_and_drops_foreign_traffic() {
        let (group, key) = keys("happy-cat-482");
        let (_, other_key) = keys("sunny-dog-111");
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut mesh = Mesh::new(1, group.clone(), 1, tx);
        let peer = slot_name(&group, 2);
        let (link, _) = fake_link(&peer);
        let id = mesh.accept(link);

        let good = WireMessage::seal("hello", &key).unwrap();
        let received = mesh
            .apply(event(id, LinkEvent::Data(good.to_bytes().unwrap())), &key)
            .unwrap();
        assert_eq!(received.text, "hello");
        assert_eq!(received.id, good.id);
        assert_eq!(received.timestamp, good.timestamp);
        assert_eq!(received.from, peer);

        let forged = WireMessage::seal("hello", &other_key).unwrap();
        assert!(mesh
            .apply(event(id, LinkEvent::Data(forged.to_bytes().unwrap())), &key)
            .is_none());
        assert!(mesh
            .apply(event(id, LinkEvent::Data(b"garbage".to_vec())), &key)
            .is_none());
    }

    #[tokio::test]
    async fn test_stale_epoch_ignored() {
        let (group, key) = keys("happy-cat-482");
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut mesh = Mesh::new(2, group.clone(), 1, tx);
        let (link, _) = fake_link(&slot_name(&group, 2));
        let id = mesh.accept(link);

        let stale = MeshEvent {
            epoch: 1,
            link: id,
            event: LinkEvent::Open,
        };
        mesh.apply(stale, &key);
        assert!(mesh.open_peers().is_empty());
    }

    #[tokio::test]
    async fn test_close_all_closes_sinks() {
        let (group, _key) = keys("happy-cat-482");
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut mesh = Mesh::new(1, group.clone(), 1, tx);
        let (link, sink) = fake_link(&slot_name(&group, 2));
        mesh.accept(link);

        mesh.close_all();
        assert!(*sink.closed.lock().unwrap());
        assert!(mesh.connections().is_empty());
    }

    #[tokio::test]
    async fn test_dial_all_skips_own_slot_and_open_peers() {
        let (group, key) = keys("happy-cat-482");
        let network = MemoryNetwork::new();
        let me = network.register(&slot_name(&group, 3)).await.unwrap();
        let _peer = network.register(&slot_name(&group, 1)).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut mesh = Mesh::new(1, group.clone(), 3, tx);
        assert_eq!(mesh.dial_all(me.handle.as_ref()), (MAX_SLOTS - 1) as usize);
        assert!(mesh
            .connections()
            .iter()
            .all(|c| c.peer != slot_name(&group, 3)));

        let opened = rx.recv().await.unwrap();
        assert_eq!(opened.event, LinkEvent::Open);
        mesh.apply(opened, &key);
        assert_eq!(mesh.open_peers(), vec![slot_name(&group, 1)]);

        // Redial replaces pending dials and leaves the open link alone
        assert_eq!(mesh.dial_all(me.handle.as_ref()), (MAX_SLOTS - 2) as usize);
        assert_eq!(mesh.connections().len(), (MAX_SLOTS - 1) as usize);
    }

    #[test]
    fn test_short_name() {
        assert_eq!(short_name("0123456789abcdef-4"), "89abcdef-4");
        assert_eq!(short_name("ab-4"), "ab-4");
        assert_eq!(short_name("€€€-1"), "€€€-1");
        assert_eq!(short_name("ü0123456789-2"), "23456789-2");
    }

    #[tokio::test]
    async fn test_accept_non_ascii_peer_name() {
        let (group, key) = keys("happy-cat-482");
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut mesh = Mesh::new(1, group, 1, tx);

        let (link, _) = fake_link("€€€-1");
        let id = mesh.accept(link);
        mesh.apply(event(id, LinkEvent::Open), &key);
        assert_eq!(mesh.open_peers(), vec!["€€€-1".to_string()]);
    }
}
