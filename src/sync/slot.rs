//! Slot acquisition
//!
//! A device joins a group by claiming the smallest free rendezvous name of the
//! form `<group id>-<N>` for `N` in `1..=MAX_SLOTS`. The transport's atomic
//! name registration is the only synchronization: no coordinator decides who
//! gets which slot.
//!
//! Per attempt:
//! - registered → done
//! - name taken → try the next slot
//! - any other transport failure → abort the whole acquisition
//!
//! Running out of slots is a user-facing "group full" error.

use super::error::{SyncError, SyncResult};
use crate::crypto::GroupIdentity;
use crate::transport::{Registered, Transport, TransportError};
use tracing::{debug, info, warn};

/// Maximum number of devices per group.
pub const MAX_SLOTS: u8 = 10;

/// Rendezvous name for `slot` within `group`.
pub fn slot_name(group: &GroupIdentity, slot: u8) -> String {
    format!("{}-{}", group.as_str(), slot)
}

/// Recover the slot number from a rendezvous name of `group`.
pub fn parse_slot(group: &GroupIdentity, name: &str) -> Option<u8> {
    let suffix = name.strip_prefix(group.as_str())?.strip_prefix('-')?;
    let slot: u8 = suffix.parse().ok()?;
    (1..=MAX_SLOTS).contains(&slot).then_some(slot)
}

/// A claimed slot and its live registration.
pub struct AcquiredSlot {
    pub slot: u8,
    pub name: String,
    pub registered: Registered,
}

/// Claim the smallest free slot in `group`.
pub async fn acquire_slot<T>(transport: &T, group: &GroupIdentity) -> SyncResult<AcquiredSlot>
where
    T: Transport + ?Sized,
{
    acquire_slot_until(transport, group, || false).await
}

/// Claim the smallest free slot, checking `cancelled` before every attempt.
///
/// A cancelled acquisition returns [`SyncError::Cancelled`] without issuing
/// further registrations. A registration that completes after cancellation
/// is still returned; the caller decides whether to keep or destroy it.
pub async fn acquire_slot_until<T, C>(
    transport: &T,
    group: &GroupIdentity,
    cancelled: C,
) -> SyncResult<AcquiredSlot>
where
    T: Transport + ?Sized,
    C: Fn() -> bool,
{
    for slot in 1..=MAX_SLOTS {
        if cancelled() {
            debug!(group = %group.short(), slot, "slot acquisition cancelled");
            return Err(SyncError::Cancelled);
        }

        let name = slot_name(group, slot);
        debug!(group = %group.short(), slot, "probing slot");

        match transport.register(&name).await {
            Ok(registered) => {
                info!(group = %group.short(), slot, "acquired slot");
                return Ok(AcquiredSlot {
                    slot,
                    name,
                    registered,
                });
            }
            // A failed registration holds nothing on our side, so there is
            // nothing to release before moving on.
            Err(TransportError::NameTaken(_)) => {
                debug!(group = %group.short(), slot, "slot taken");
            }
            Err(e) => {
                warn!(group = %group.short(), slot, error = %e, "slot acquisition aborted");
                return Err(SyncError::Transport(e));
            }
        }
    }

    warn!(group = %group.short(), "group full");
    Err(SyncError::GroupFull {
        max_slots: MAX_SLOTS,
    })
}
