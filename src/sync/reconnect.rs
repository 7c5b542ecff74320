//! Rendezvous reconnection with exponential backoff.
//!
//! When the local registration loses its rendezvous link (the name stays
//! reserved), the supervisor asks the transport to restore it:
//!
//! ```text
//! Registered ─► Disconnected ─► Reconnecting(0) ─► … ─► Reconnecting(4) ─► Failed
//!      ▲                               │
//!      └──────── restored ─────────────┘
//! ```
//!
//! - Attempt `n` waits `base_delay * 2^n` (1s, 2s, 4s, 8s, 16s), requests a
//!   reconnect, then waits the confirmation window (2s) before checking.
//! - After `max_attempts` failures the state is `Failed`. This is terminal and
//!   needs a manual reconnect.
//! - A destroyed registration ends supervision immediately.
//!
//! Individual peer links are not supervised here; the caller redials the
//! mesh once the registration is restored.

use crate::transport::Registration;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{error, info, warn};

/// Default delay before the first attempt.
pub const BASE_DELAY: Duration = Duration::from_secs(1);

/// Default number of attempts before giving up.
pub const MAX_ATTEMPTS: u32 = 5;

/// Default wait between a reconnect request and checking its result.
pub const CONFIRM_WINDOW: Duration = Duration::from_secs(2);

/// Connectivity of the local registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationState {
    Registered,
    Disconnected,
    Reconnecting { attempt: u32 },
    Failed,
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registered => write!(f, "registered"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {})", attempt + 1),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
    pub confirm_window: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: BASE_DELAY,
            max_attempts: MAX_ATTEMPTS,
            confirm_window: CONFIRM_WINDOW,
        }
    }
}

impl BackoffPolicy {
    /// Delay before attempt `attempt` (0-based): `base_delay * 2^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Injectable delay so tests can run backoff without waiting.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Wall-clock sleeper backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// How supervision ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// Registration restored after `attempts` requests.
    Restored { attempts: u32 },
    /// All attempts used without success.
    Exhausted,
    /// Registration was destroyed while waiting.
    Destroyed,
}

/// Restore a disconnected registration, reporting each state transition.
///
/// `on_state` sees `Reconnecting { attempt }` before every attempt, then
/// `Registered` or `Failed` at the end. Nothing is reported when the
/// registration is destroyed mid-way.
pub async fn restore_registration<S, F>(
    registration: &dyn Registration,
    policy: &BackoffPolicy,
    sleeper: &S,
    mut on_state: F,
) -> RestoreOutcome
where
    S: Sleeper + ?Sized,
    F: FnMut(RegistrationState),
{
    for attempt in 0..policy.max_attempts {
        let delay = policy.delay_for(attempt);
        on_state(RegistrationState::Reconnecting { attempt });
        info!(
            attempt = attempt + 1,
            max_attempts = policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "scheduling rendezvous reconnect"
        );

        sleeper.sleep(delay).await;
        if registration.is_destroyed() {
            return RestoreOutcome::Destroyed;
        }

        if let Err(e) = registration.reconnect().await {
            warn!(attempt = attempt + 1, error = %e, "reconnect request failed");
        }

        sleeper.sleep(policy.confirm_window).await;
        if registration.is_destroyed() {
            return RestoreOutcome::Destroyed;
        }
        if !registration.is_disconnected() {
            info!(attempt = attempt + 1, "rendezvous reconnected");
            on_state(RegistrationState::Registered);
            return RestoreOutcome::Restored {
                attempts: attempt + 1,
            };
        }
    }

    error!(
        max_attempts = policy.max_attempts,
        "reconnection exhausted, manual restart required"
    );
    on_state(RegistrationState::Failed);
    RestoreOutcome::Exhausted
}
