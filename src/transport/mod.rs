//! Rendezvous transport abstraction
//!
//! See `traits` for the contract the sync engine relies on, and `memory`
//! for the in-process implementation used by tests and the demo command.
pub mod memory;
pub mod traits;

pub use memory::MemoryNetwork;
pub use traits::{
    LinkEvent, LinkSink, PeerLink, Registered, Registration, RegistrationEvent, Transport,
    TransportError, TransportResult,
};
