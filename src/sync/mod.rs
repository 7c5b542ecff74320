//! Group sync engine: slot claiming, the peer mesh, rendezvous supervision
//! and the session actor that ties them together.

pub mod error;
pub mod mesh;
pub mod reconnect;
pub mod session;
pub mod slot;

pub use error::{SyncError, SyncResult};
pub use mesh::{Broadcast, Direction, LinkId, Mesh, MeshEvent, PeerConnection, ReceivedText};
pub use reconnect::{
    restore_registration, BackoffPolicy, RegistrationState, RestoreOutcome, Sleeper,
    TokioSleeper,
};
pub use session::{
    generate_code, ConnectInfo, IncomingText, SyncHandle, SyncSession, SyncStatus,
};
pub use slot::{acquire_slot, acquire_slot_until, parse_slot, slot_name, AcquiredSlot, MAX_SLOTS};
