//! Session Lifecycle
//!
//! A single provider session is kept alive for the whole process. The
//! [`SessionManager`] owns the handle and drives it through pairing, readiness,
//! disconnects and resets; [`StoreCleaner`] wipes the on-disk credentials when a
//! reset calls for it.

pub mod cleaner;
mod manager;

pub use cleaner::{DirRemover, FsRemover, StoreCleaner, is_busy_error};
pub use manager::SessionManager;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where the provider session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    AwaitingPairing,
    Authenticated,
    Ready,
    Disconnected,
    AuthFailed,
    Destroying,
}

impl SessionState {
    /// Only a ready session may be used for provider calls.
    pub fn is_usable(self) -> bool {
        self == Self::Ready
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::AwaitingPairing => "awaiting_pairing",
            Self::Authenticated => "authenticated",
            Self::Ready => "ready",
            Self::Disconnected => "disconnected",
            Self::AuthFailed => "auth_failed",
            Self::Destroying => "destroying",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub state: SessionState,
    pub pairing_code: Option<String>,
    pub ready: bool,
    pub resetting: bool,
}

/// Lifecycle notifications relayed to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    PairingCode { code: String },
    Authenticated,
    Ready,
    Disconnected { reason: String },
    AuthFailure { message: String },
    /// The store could not be cleaned; an explicit reset request is needed
    ResetFailed { message: String },
    /// Automatic resets gave up; an explicit reset request is needed
    RecoveryExhausted { attempts: u32 },
}

impl LifecycleEvent {
    /// Event name on the push channel.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PairingCode { .. } => "pairing_code",
            Self::Authenticated => "authenticated",
            Self::Ready => "ready",
            Self::Disconnected { .. } => "disconnected",
            Self::AuthFailure { .. } => "auth_failure",
            Self::ResetFailed { .. } => "reset_failed",
            Self::RecoveryExhausted { .. } => "recovery_exhausted",
        }
    }
}

/// Result of a logout, force-reset or pairing refresh request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetOutcome {
    /// The handle was torn down and a fresh one is starting.
    Completed,
    /// Another reset was already running; this request was ignored.
    AlreadyInProgress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_ready_is_usable() {
        let states = [
            SessionState::Uninitialized,
            SessionState::AwaitingPairing,
            SessionState::Authenticated,
            SessionState::Ready,
            SessionState::Disconnected,
            SessionState::AuthFailed,
            SessionState::Destroying,
        ];
        for state in states {
            assert_eq!(state.is_usable(), state == SessionState::Ready, "{state}");
            assert_eq!(
                serde_json::to_string(&state).unwrap(),
                format!("\"{}\"", state.as_str())
            );
        }
    }

    #[test]
    fn test_event_names_match_wire_tag() {
        let event = LifecycleEvent::Disconnected {
            reason: "NAVIGATION".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.name());
        assert_eq!(json["reason"], "NAVIGATION");
    }
}
