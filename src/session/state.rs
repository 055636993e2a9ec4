// SPDX-License-Identifier: GPL-3.0-only

//! Session state machine
//!
//! ```text
//! idle ─▶ starting ─▶ active ─▶ stopping ─▶ idle
//!            │  │        │
//!            │  └────────┴──▶ error ─▶ idle
//!            └──▶ stopping (stop while starting)
//! ```

use crate::detection::BackendKind;
use serde::Serialize;
use std::fmt;

/// Lifecycle state of a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No camera, no surfaces, no loop
    #[default]
    Idle,
    /// Acquiring the camera and binding surfaces
    Starting,
    /// Detection Loop running
    Active,
    /// Teardown in progress
    Stopping,
    /// Failed, teardown in progress
    Error,
}

impl SessionState {
    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Starting)
                | (Starting, Active)
                | (Starting, Stopping)
                | (Starting, Error)
                | (Active, Stopping)
                | (Active, Error)
                | (Stopping, Idle)
                | (Error, Idle)
        )
    }

    /// Starting or active
    pub fn is_running(self) -> bool {
        matches!(self, SessionState::Starting | SessionState::Active)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Active => "active",
            SessionState::Stopping => "stopping",
            SessionState::Error => "error",
        };
        write!(f, "{}", name)
    }
}

/// Snapshot returned by [`CaptureSession::status`]
///
/// [`CaptureSession::status`]: super::CaptureSession::status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    /// A Detection Loop task exists and has not finished
    pub loop_running: bool,
    pub backend: BackendKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        use SessionState::*;
        let path = [Idle, Starting, Active, Stopping, Idle];
        assert!(path.windows(2).all(|w| w[0].can_transition_to(w[1])));
    }

    #[test]
    fn test_error_always_returns_to_idle() {
        use SessionState::*;
        assert!(Starting.can_transition_to(Error));
        assert!(Active.can_transition_to(Error));
        assert!(Error.can_transition_to(Idle));
        assert!(!Error.can_transition_to(Active));
        assert!(!Idle.can_transition_to(Error));
    }

    #[test]
    fn test_no_restart_without_idle() {
        use SessionState::*;
        assert!(!Active.can_transition_to(Starting));
        assert!(!Stopping.can_transition_to(Starting));
        assert!(!Idle.can_transition_to(Active));
    }

    #[test]
    fn test_display_is_lowercase() {
        assert_eq!(SessionState::Stopping.to_string(), "stopping");
        assert!(SessionState::Starting.is_running());
        assert!(!SessionState::Error.is_running());
    }
}
