//! Gitspace instance lifecycle state machine.
//!
//! This module defines the valid state transitions for instances, the busy and
//! terminal classifications the action guards rely on, and how the config-level
//! state is derived from the latest instance.
//!
//! # State Machine
//!
//! ```text
//!     ┌───────────────┐
//!     │ Uninitialized │
//!     └───────┬───────┘
//!             │ (start)
//!             ▼
//!     ┌───────────────┐ (provisioned) ┌─────────┐ (stop)  ┌──────────┐
//!     │   Starting    │──────────────▶│ Running │────────▶│ Stopping │
//!     └───────────────┘               └─────────┘         └────┬─────┘
//!             │                            │                    │ (stopped)
//!             │ (failure / stuck)          │                    ▼
//!             ▼                            │               ┌─────────┐
//!     ┌───────────────┐                    │               │ Stopped │
//!     │     Error     │◀───────────────────┘               └────┬────┘
//!     └───────┬───────┘                                         │
//!             │ (delete)                                        │ (delete)
//!             ▼                                                 ▼
//!     ┌───────────────┐ (destroyed)  ┌─────────┐ (cleanup) ┌─────────┐
//!     │   Deleting    │─────────────▶│ Deleted │──────────▶│ Cleaned │
//!     └───────────────┘              └─────────┘           └─────────┘
//! ```
//!
//! A new Start on a terminal instance creates a fresh instance rather than
//! moving the old one.

use std::time::Duration;

use chrono::{DateTime, Utc};
use gitspace_store::{GitspaceInstanceState, GitspaceState};

use crate::error::{ControlError, Result};

/// Validates a state transition and returns the target state if valid.
///
/// # Errors
///
/// Returns `ControlError::InvalidState` if the transition is not allowed.
pub fn validate_transition(
    identifier: &str,
    from: GitspaceInstanceState,
    to: GitspaceInstanceState,
) -> Result<GitspaceInstanceState> {
    if is_valid_transition(from, to) {
        Ok(to)
    } else {
        Err(ControlError::InvalidState {
            identifier: identifier.to_string(),
            from,
            to,
        })
    }
}

/// Check if a state transition is valid according to the state machine.
#[must_use]
pub const fn is_valid_transition(from: GitspaceInstanceState, to: GitspaceInstanceState) -> bool {
    use GitspaceInstanceState::{
        Cleaned, Deleted, Deleting, Error, Running, Starting, Stopped, Stopping, Uninitialized,
    };

    matches!(
        (from, to),
        (Uninitialized, Starting)
            | (Starting, Running)
            | (Running, Stopping)
            | (Stopping, Stopped)
            // A stuck instance forced to Error may still be stopped
            | (Error, Stopping)
            | (Uninitialized | Starting | Running | Stopping | Deleting, Error)
            | (Uninitialized | Starting | Running | Stopping | Stopped | Error, Deleting)
            | (Deleting, Deleted)
            | (Stopped | Error | Deleted, Cleaned)
    )
}

/// Returns true if the instance is in a terminal state.
///
/// A Start on a terminal instance creates a new instance.
#[must_use]
pub const fn is_terminal(state: GitspaceInstanceState) -> bool {
    matches!(
        state,
        GitspaceInstanceState::Stopped
            | GitspaceInstanceState::Error
            | GitspaceInstanceState::Deleted
            | GitspaceInstanceState::Cleaned
    )
}

/// Returns true if an action is in flight on the instance.
#[must_use]
pub const fn is_busy(state: GitspaceInstanceState) -> bool {
    matches!(
        state,
        GitspaceInstanceState::Uninitialized
            | GitspaceInstanceState::Starting
            | GitspaceInstanceState::Stopping
            | GitspaceInstanceState::Deleting
    )
}

/// Derive the config-level state from the latest instance state.
#[must_use]
pub const fn config_state(instance: Option<GitspaceInstanceState>) -> GitspaceState {
    match instance {
        None | Some(GitspaceInstanceState::Uninitialized) => GitspaceState::Uninitialized,
        Some(GitspaceInstanceState::Starting) => GitspaceState::Starting,
        Some(GitspaceInstanceState::Running) => GitspaceState::Running,
        Some(GitspaceInstanceState::Stopping | GitspaceInstanceState::Deleting) => {
            GitspaceState::Stopping
        }
        Some(
            GitspaceInstanceState::Stopped
            | GitspaceInstanceState::Deleted
            | GitspaceInstanceState::Cleaned,
        ) => GitspaceState::Stopped,
        Some(GitspaceInstanceState::Error) => GitspaceState::Error,
    }
}

/// Returns true if `updated` is further in the past than `window`.
///
/// Timestamps in the future are never stale.
#[must_use]
pub fn is_stale(updated: DateTime<Utc>, window: Duration) -> bool {
    (Utc::now() - updated)
        .to_std()
        .is_ok_and(|age| age > window)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transitions() {
        use GitspaceInstanceState::*;

        assert!(is_valid_transition(Uninitialized, Starting));
        assert!(is_valid_transition(Starting, Running));
        assert!(is_valid_transition(Running, Stopping));
        assert!(is_valid_transition(Stopping, Stopped));
        assert!(is_valid_transition(Error, Stopping));
        assert!(is_valid_transition(Stopped, Deleting));
        assert!(is_valid_transition(Deleting, Deleted));
        assert!(is_valid_transition(Deleted, Cleaned));
    }

    #[test]
    fn invalid_transitions() {
        use GitspaceInstanceState::*;

        assert!(!is_valid_transition(Stopped, Running));
        assert!(!is_valid_transition(Deleted, Starting));
        assert!(!is_valid_transition(Running, Starting));
        assert!(!is_valid_transition(Cleaned, Deleting));
    }

    #[test]
    fn validate_transition_reports_states() {
        let err = validate_transition(
            "ws-abc123",
            GitspaceInstanceState::Deleted,
            GitspaceInstanceState::Stopping,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ControlError::InvalidState {
                from: GitspaceInstanceState::Deleted,
                to: GitspaceInstanceState::Stopping,
                ..
            }
        ));
    }

    #[test]
    fn busy_and_terminal_are_disjoint() {
        use GitspaceInstanceState::*;

        for state in [
            Uninitialized, Starting, Running, Stopping, Stopped, Error, Deleting, Deleted, Cleaned,
        ] {
            assert!(!(is_busy(state) && is_terminal(state)), "{state}");
        }
        assert!(!is_busy(Running));
        assert!(!is_terminal(Running));
    }

    #[test]
    fn config_state_follows_instance() {
        assert_eq!(config_state(None), GitspaceState::Uninitialized);
        assert_eq!(
            config_state(Some(GitspaceInstanceState::Running)),
            GitspaceState::Running
        );
        assert_eq!(
            config_state(Some(GitspaceInstanceState::Deleting)),
            GitspaceState::Stopping
        );
        assert_eq!(
            config_state(Some(GitspaceInstanceState::Cleaned)),
            GitspaceState::Stopped
        );
    }

    #[test]
    fn staleness() {
        let window = Duration::from_secs(300);
        assert!(!is_stale(Utc::now(), window));
        assert!(is_stale(Utc::now() - chrono::Duration::minutes(6), window));
        assert!(!is_stale(Utc::now() + chrono::Duration::minutes(6), window));
    }
}
