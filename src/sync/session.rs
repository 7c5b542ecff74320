//! Sync session coordinator
//!
//! One actor task owns all mutable sync state: the active group and key, the
//! claimed slot, the mesh and the history. Everything else talks to it
//! through a cloneable [`SyncHandle`]:
//!
//! - `connect(code)`: tear down any previous group, derive the new one,
//!   claim a slot and dial the mesh.
//! - `sync(text)`: encrypt and broadcast to open peers, record locally.
//! - `status()`, history access, and a subscription for incoming texts.
//!
//! Slot acquisition and the reconnection supervisor run in their own tasks
//! and report back over an internal channel, so inbound traffic keeps
//! flowing while they wait. Every report and link event carries the session
//! epoch; a newer `connect` bumps the epoch and everything from before it is
//! discarded.

use super::error::{SyncError, SyncResult};
use super::mesh::{Broadcast, Mesh, MeshEvent};
use super::reconnect::{
    restore_registration, BackoffPolicy, RegistrationState, Sleeper, TokioSleeper,
};
use super::slot::{acquire_slot_until, AcquiredSlot};
use crate::crypto::{derive, GroupIdentity, GroupKey, SharedCode};
use crate::history::{History, HistoryItem, Source, Upsert};
use crate::time::Timestamp;
use crate::transport::{Registration, RegistrationEvent, Transport};
use futures::Stream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::AbortHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

const COMMAND_BUFFER: usize = 64;
const INCOMING_BUFFER: usize = 64;

/// Propose a new sync code.
pub fn generate_code() -> SharedCode {
    SharedCode::generate()
}

/// Result of a successful connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectInfo {
    pub group: GroupIdentity,
    pub slot: u8,
    pub name: String,
}

/// Snapshot of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    /// Slot held and rendezvous link up.
    pub connected: bool,
    pub group: Option<GroupIdentity>,
    pub slot: Option<u8>,
    /// `None` while no slot is held.
    pub registration: Option<RegistrationState>,
    /// Names of peers with an open link.
    pub peers: Vec<String>,
}

/// A text received from a peer, after reconciliation into history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingText {
    pub id: Uuid,
    pub text: String,
    pub timestamp: Timestamp,
    pub from: String,
    /// `false` when the text was already in history and only refreshed.
    pub inserted: bool,
}

enum Command {
    Connect {
        code: SharedCode,
        reply: oneshot::Sender<SyncResult<ConnectInfo>>,
    },
    Sync {
        text: String,
        reply: oneshot::Sender<SyncResult<Broadcast>>,
    },
    RecordLocal {
        text: String,
        reply: oneshot::Sender<Upsert>,
    },
    Status {
        reply: oneshot::Sender<SyncStatus>,
    },
    History {
        reply: oneshot::Sender<Vec<HistoryItem>>,
    },
    DeleteHistory {
        id: Uuid,
        reply: oneshot::Sender<bool>,
    },
    ClearHistory {
        reply: oneshot::Sender<()>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

enum Internal {
    Acquired {
        epoch: u64,
        result: SyncResult<AcquiredSlot>,
    },
    Registration {
        epoch: u64,
        event: RegistrationEvent,
    },
    Supervisor {
        epoch: u64,
        state: RegistrationState,
    },
}

/// Builder for a sync session actor.
pub struct SyncSession {
    transport: Arc<dyn Transport>,
    sleeper: Arc<dyn Sleeper>,
    policy: BackoffPolicy,
    history: History,
}

impl SyncSession {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            sleeper: Arc::new(TokioSleeper),
            policy: BackoffPolicy::default(),
            history: History::new(),
        }
    }

    pub fn with_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Start from previously persisted history.
    pub fn with_history(mut self, history: History) -> Self {
        self.history = history;
        self
    }

    /// Spawn the actor on the current tokio runtime.
    pub fn spawn(self) -> SyncHandle {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (mesh_tx, mesh_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (incoming, _) = broadcast::channel(INCOMING_BUFFER);

        let actor = Actor {
            transport: self.transport,
            sleeper: self.sleeper,
            policy: self.policy,
            history: self.history,
            epoch: Arc::new(AtomicU64::new(0)),
            phase: Phase::Idle,
            mesh_tx,
            internal_tx,
            incoming: incoming.clone(),
        };
        tokio::spawn(actor.run(commands_rx, mesh_rx, internal_rx));

        SyncHandle {
            commands: commands_tx,
            incoming,
        }
    }
}

/// Cloneable control surface of a running session.
#[derive(Clone)]
pub struct SyncHandle {
    commands: mpsc::Sender<Command>,
    incoming: broadcast::Sender<IncomingText>,
}

impl SyncHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> SyncResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| SyncError::SessionClosed)?;
        rx.await.map_err(|_| SyncError::SessionClosed)
    }

    /// Join the group identified by `code`, replacing any current group.
    pub async fn connect(&self, code: &str) -> SyncResult<ConnectInfo> {
        let code = SharedCode::new(code).map_err(|e| SyncError::InvalidCode(e.to_string()))?;
        self.request(|reply| Command::Connect { code, reply }).await?
    }

    /// Broadcast `text` to the group and record it as a local history item.
    pub async fn sync(&self, text: &str) -> SyncResult<Broadcast> {
        let text = text.to_string();
        self.request(|reply| Command::Sync { text, reply }).await?
    }

    /// Record a local copy in history without broadcasting it.
    pub async fn record_local(&self, text: &str) -> SyncResult<Upsert> {
        let text = text.to_string();
        self.request(|reply| Command::RecordLocal { text, reply }).await
    }

    pub async fn status(&self) -> SyncResult<SyncStatus> {
        self.request(|reply| Command::Status { reply }).await
    }

    pub async fn is_connected(&self) -> bool {
        self.status().await.map(|s| s.connected).unwrap_or(false)
    }

    /// History, newest first.
    pub async fn history(&self) -> SyncResult<Vec<HistoryItem>> {
        self.request(|reply| Command::History { reply }).await
    }

    pub async fn delete_history(&self, id: Uuid) -> SyncResult<bool> {
        self.request(|reply| Command::DeleteHistory { id, reply }).await
    }

    pub async fn clear_history(&self) -> SyncResult<()> {
        self.request(|reply| Command::ClearHistory { reply }).await
    }

    /// Leave the group and release the slot. History is kept.
    pub async fn disconnect(&self) -> SyncResult<()> {
        self.request(|reply| Command::Disconnect { reply }).await
    }

    /// Leave the group and stop the actor.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    /// Subscribe to incoming texts.
    pub fn subscribe(&self) -> broadcast::Receiver<IncomingText> {
        self.incoming.subscribe()
    }

    /// Incoming texts as a stream. Lagged notifications are skipped.
    pub fn incoming(&self) -> impl Stream<Item = IncomingText> + Send + Unpin {
        BroadcastStream::new(self.incoming.subscribe()).filter_map(|item| item.ok())
    }
}

struct Active {
    group: GroupIdentity,
    key: GroupKey,
    slot: u8,
    name: String,
    registration: Arc<dyn Registration>,
    mesh: Mesh,
    state: RegistrationState,
    events_pump: AbortHandle,
    supervisor: Option<AbortHandle>,
}

enum Phase {
    Idle,
    Acquiring {
        epoch: u64,
        group: GroupIdentity,
        key: GroupKey,
        reply: oneshot::Sender<SyncResult<ConnectInfo>>,
    },
    Active(Box<Active>),
}

struct Actor {
    transport: Arc<dyn Transport>,
    sleeper: Arc<dyn Sleeper>,
    policy: BackoffPolicy,
    history: History,
    epoch: Arc<AtomicU64>,
    phase: Phase,
    mesh_tx: mpsc::UnboundedSender<MeshEvent>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    incoming: broadcast::Sender<IncomingText>,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut mesh_rx: mpsc::UnboundedReceiver<MeshEvent>,
        mut internal_rx: mpsc::UnboundedReceiver<Internal>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.teardown();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.on_command(command),
                    None => {
                        self.teardown();
                        break;
                    }
                },
                Some(event) = mesh_rx.recv() => self.on_mesh_event(event),
                Some(message) = internal_rx.recv() => self.on_internal(message),
            }
        }
        // An acquisition may have finished after the last teardown.
        internal_rx.close();
        while let Ok(message) = internal_rx.try_recv() {
            if let Internal::Acquired {
                result: Ok(acquired),
                ..
            } = message
            {
                release_stale_slot(acquired);
            }
        }
        debug!("sync session stopped");
    }

    fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Connect { code, reply } => self.connect(code, reply),
            Command::Sync { text, reply } => {
                let _ = reply.send(self.sync(&text));
            }
            Command::RecordLocal { text, reply } => {
                let _ = reply.send(self.history.upsert(&text, Source::Local, None));
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Command::History { reply } => {
                let _ = reply.send(self.history.items().to_vec());
            }
            Command::DeleteHistory { id, reply } => {
                let _ = reply.send(self.history.remove(id));
            }
            Command::ClearHistory { reply } => {
                self.history.clear();
                let _ = reply.send(());
            }
            Command::Disconnect { reply } => {
                self.teardown();
                let _ = reply.send(());
            }
            Command::Shutdown { reply } => {
                self.teardown();
                let _ = reply.send(());
            }
        }
    }

    fn connect(&mut self, code: SharedCode, reply: oneshot::Sender<SyncResult<ConnectInfo>>) {
        self.teardown();

        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let (group, key) = derive(&code);
        info!(group = %group.short(), "connecting");

        let transport = self.transport.clone();
        let current = self.epoch.clone();
        let internal = self.internal_tx.clone();
        let acquire_group = group.clone();
        tokio::spawn(async move {
            let result = acquire_slot_until(transport.as_ref(), &acquire_group, || {
                current.load(Ordering::SeqCst) != epoch
            })
            .await;

            // Nobody will adopt a slot claimed for a superseded or stopped session.
            let result = match result {
                Ok(acquired) if current.load(Ordering::SeqCst) != epoch => {
                    release_stale_slot(acquired);
                    return;
                }
                result => result,
            };
            if let Err(mpsc::error::SendError(Internal::Acquired {
                result: Ok(acquired),
                ..
            })) = internal.send(Internal::Acquired { epoch, result })
            {
                release_stale_slot(acquired);
            }
        });

        self.phase = Phase::Acquiring {
            epoch,
            group,
            key,
            reply,
        };
    }

    /// Drop the current group entirely: connections, key, slot, pending connect.
    fn teardown(&mut self) {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle => {}
            Phase::Acquiring { reply, .. } => {
                // Invalidate the in-flight acquisition so it stops at the next slot.
                self.epoch.fetch_add(1, Ordering::SeqCst);
                let _ = reply.send(Err(SyncError::Cancelled));
            }
            Phase::Active(mut active) => {
                self.epoch.fetch_add(1, Ordering::SeqCst);
                if let Some(supervisor) = active.supervisor.take() {
                    supervisor.abort();
                }
                active.events_pump.abort();
                active.mesh.close_all();
                active.registration.destroy();
                info!(group = %active.group.short(), slot = active.slot, "left group");
            }
        }
    }

    fn sync(&mut self, text: &str) -> SyncResult<Broadcast> {
        let Phase::Active(active) = &self.phase else {
            return Err(SyncError::NotConnected);
        };

        if active.state == RegistrationState::Failed {
            return Err(SyncError::ReconnectExhausted);
        }

        let sent = active.mesh.broadcast(text, &active.key)?;
        self.history.upsert(text, Source::Local, Some(sent.timestamp));
        Ok(sent)
    }

    fn status(&self) -> SyncStatus {
        match &self.phase {
            Phase::Active(active) => SyncStatus {
                connected: active.state == RegistrationState::Registered
                    && !active.registration.is_destroyed(),
                group: Some(active.group.clone()),
                slot: Some(active.slot),
                registration: Some(active.state),
                peers: active.mesh.open_peers(),
            },
            Phase::Acquiring { group, .. } => SyncStatus {
                connected: false,
                group: Some(group.clone()),
                slot: None,
                registration: None,
                peers: Vec::new(),
            },
            Phase::Idle => SyncStatus {
                connected: false,
                group: None,
                slot: None,
                registration: None,
                peers: Vec::new(),
            },
        }
    }

    fn on_mesh_event(&mut self, event: MeshEvent) {
        let Phase::Active(active) = &mut self.phase else {
            return;
        };
        let Some(received) = active.mesh.apply(event, &active.key) else {
            return;
        };

        let outcome = self
            .history
            .upsert(&received.text, Source::Synced, Some(received.timestamp));
        debug!(inserted = outcome.inserted, "received text");

        // No subscribers is fine.
        let _ = self.incoming.send(IncomingText {
            id: received.id,
            text: received.text,
            timestamp: received.timestamp,
            from: received.from,
            inserted: outcome.inserted,
        });
    }

    fn on_internal(&mut self, message: Internal) {
        match message {
            Internal::Acquired { epoch, result } => self.on_acquired(epoch, result),
            Internal::Registration { epoch, event } => {
                if epoch == self.current_epoch() {
                    self.on_registration_event(event);
                } else if let RegistrationEvent::Incoming(link) = event {
                    link.into_parts().1.close();
                }
            }
            Internal::Supervisor { epoch, state } => {
                if epoch == self.current_epoch() {
                    self.on_supervisor_state(state);
                }
            }
        }
    }

    fn on_acquired(&mut self, epoch: u64, result: SyncResult<AcquiredSlot>) {
        let pending = matches!(&self.phase, Phase::Acquiring { epoch: e, .. } if *e == epoch);
        if !pending || epoch != self.current_epoch() {
            if let Ok(stale) = result {
                release_stale_slot(stale);
            }
            return;
        }

        let Phase::Acquiring {
            group, key, reply, ..
        } = std::mem::replace(&mut self.phase, Phase::Idle)
        else {
            return;
        };

        let acquired = match result {
            Ok(acquired) => acquired,
            Err(e) => {
                warn!(group = %group.short(), error = %e, "connect failed");
                let _ = reply.send(Err(e));
                return;
            }
        };

        let registration = acquired.registered.handle;
        let mut events = acquired.registered.events;
        let internal = self.internal_tx.clone();
        let events_pump = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if internal
                    .send(Internal::Registration { epoch, event })
                    .is_err()
                {
                    break;
                }
            }
        })
        .abort_handle();

        let mut mesh = Mesh::new(epoch, group.clone(), acquired.slot, self.mesh_tx.clone());
        let dialed = mesh.dial_all(registration.as_ref());
        info!(group = %group.short(), slot = acquired.slot, dialed, "connected");

        let info = ConnectInfo {
            group: group.clone(),
            slot: acquired.slot,
            name: acquired.name.clone(),
        };

        self.phase = Phase::Active(Box::new(Active {
            group,
            key,
            slot: acquired.slot,
            name: acquired.name,
            registration,
            mesh,
            state: RegistrationState::Registered,
            events_pump,
            supervisor: None,
        }));
        let _ = reply.send(Ok(info));
    }

    fn on_registration_event(&mut self, event: RegistrationEvent) {
        let Phase::Active(active) = &mut self.phase else {
            return;
        };

        match event {
            RegistrationEvent::Incoming(link) => {
                active.mesh.accept(link);
            }
            RegistrationEvent::Disconnected => {
                if active.state != RegistrationState::Registered {
                    return;
                }
                warn!(name = %active.name, "lost rendezvous connection");
                active.state = RegistrationState::Disconnected;
                active.supervisor = Some(spawn_supervisor(
                    self.epoch.load(Ordering::SeqCst),
                    active.registration.clone(),
                    self.sleeper.clone(),
                    self.policy,
                    self.internal_tx.clone(),
                ));
            }
            RegistrationEvent::Closed => {
                warn!(slot = active.slot, "registration closed");
                self.teardown();
            }
            RegistrationEvent::Error(error) => {
                warn!(slot = active.slot, %error, "registration error");
            }
        }
    }

    fn on_supervisor_state(&mut self, state: RegistrationState) {
        let Phase::Active(active) = &mut self.phase else {
            return;
        };
        active.state = state;

        match state {
            RegistrationState::Registered => {
                active.supervisor = None;
                let dialed = active.mesh.dial_all(active.registration.as_ref());
                info!(slot = active.slot, dialed, "redialing mesh after reconnect");
            }
            RegistrationState::Failed => {
                active.supervisor = None;
            }
            RegistrationState::Disconnected | RegistrationState::Reconnecting { .. } => {}
        }
    }
}

fn release_stale_slot(acquired: AcquiredSlot) {
    debug!(slot = acquired.slot, "releasing slot from superseded connect");
    acquired.registered.handle.destroy();
}

fn spawn_supervisor(
    epoch: u64,
    registration: Arc<dyn Registration>,
    sleeper: Arc<dyn Sleeper>,
    policy: BackoffPolicy,
    internal: mpsc::UnboundedSender<Internal>,
) -> AbortHandle {
    tokio::spawn(async move {
        restore_registration(registration.as_ref(), &policy, sleeper.as_ref(), |state| {
            let _ = internal.send(Internal::Supervisor { epoch, state });
        })
        .await;
    })
    .abort_handle()
}
