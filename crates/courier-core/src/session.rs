//! Connection status state machine.

use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Connection status as seen by the control plane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// No live connection (initial state).
    #[default]
    Disconnected,
    /// Waiting for a pairing code to be scanned.
    Scanning,
    /// Connected and authenticated.
    Connected,
    /// The remote side revoked this device.
    LoggedOut,
}

impl ConnectionStatus {
    /// Wire name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Scanning => "scanning",
            Self::Connected => "connected",
            Self::LoggedOut => "logged_out",
        }
    }

    /// Whether moving from `self` to `next` is a legal edge.
    ///
    /// Any state may fall back to `Disconnected`, and self-transitions are
    /// idempotent (pairing codes rotate while scanning).
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (_, Self::Disconnected)
                | (Self::Disconnected, Self::Scanning | Self::Connected)
                | (Self::Scanning, Self::Scanning | Self::Connected)
                | (Self::Connected, Self::Connected | Self::LoggedOut)
                | (Self::LoggedOut, Self::LoggedOut)
        )
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected state change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Illegal status transition: {from} -> {to}")]
    Illegal {
        from: ConnectionStatus,
        to: ConnectionStatus,
    },
    #[error("Pairing artifact rejected while {0}")]
    NotScanning(ConnectionStatus),
}

/// Consistent view of the session at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub status: ConnectionStatus,
    pub pairing_artifact: Option<String>,
}

/// Shared session record.
///
/// Status and pairing artifact live behind one lock so a snapshot never
/// pairs a status with another state's artifact. The artifact is only ever
/// stored while scanning.
#[derive(Debug, Default)]
pub struct SessionState {
    inner: Mutex<SessionSnapshot>,
}

impl SessionState {
    /// Create a session in the `Disconnected` state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Move to `next`, clearing the artifact unless `next` is `Scanning`.
    ///
    /// Returns the previous status.
    ///
    /// # Errors
    /// Returns [`TransitionError::Illegal`] and leaves the session untouched
    /// if the edge is not allowed.
    pub fn set_status(&self, next: ConnectionStatus) -> Result<ConnectionStatus, TransitionError> {
        let mut inner = self.inner.lock();
        let previous = inner.status;
        if !previous.can_transition_to(next) {
            return Err(TransitionError::Illegal {
                from: previous,
                to: next,
            });
        }
        inner.status = next;
        if next != ConnectionStatus::Scanning {
            inner.pairing_artifact = None;
        }
        drop(inner);

        if previous != next {
            tracing::debug!(%previous, %next, "Session status changed");
        }
        Ok(previous)
    }

    /// Publish the current pairing artifact.
    ///
    /// # Errors
    /// Returns [`TransitionError::NotScanning`] if the session is not
    /// scanning; the artifact is discarded.
    pub fn set_pairing_artifact(&self, payload: impl Into<String>) -> Result<(), TransitionError> {
        let mut inner = self.inner.lock();
        if inner.status != ConnectionStatus::Scanning {
            let status = inner.status;
            drop(inner);
            tracing::warn!(%status, "Discarding pairing artifact outside of scanning");
            return Err(TransitionError::NotScanning(status));
        }
        inner.pairing_artifact = Some(payload.into());
        Ok(())
    }

    /// Force `Disconnected` with no artifact, whatever the current state.
    pub fn reset(&self) {
        *self.inner.lock() = SessionSnapshot::default();
    }

    /// Atomic read of status and artifact.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.lock().clone()
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.inner.lock().status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ConnectionStatus::{Connected, Disconnected, LoggedOut, Scanning};

    const ALL: [ConnectionStatus; 4] = [Disconnected, Scanning, Connected, LoggedOut];

    #[test]
    fn test_initial_state() {
        let session = SessionState::new();
        assert_eq!(session.snapshot(), SessionSnapshot::default());
        assert_eq!(session.status(), Disconnected);
    }

    #[test]
    fn test_pairing_then_connect_clears_artifact() {
        let session = SessionState::new();
        session.set_status(Scanning).unwrap();
        session.set_pairing_artifact("data:image/png;base64,AAAA").unwrap();
        assert_eq!(
            session.snapshot().pairing_artifact.as_deref(),
            Some("data:image/png;base64,AAAA")
        );

        assert_eq!(session.set_status(Connected).unwrap(), Scanning);
        let snapshot = session.snapshot();
        assert_eq!(snapshot.status, Connected);
        assert!(snapshot.pairing_artifact.is_none());
    }

    #[test]
    fn test_artifact_rejected_outside_scanning() {
        let session = SessionState::new();
        let err = session.set_pairing_artifact("data:image/png;base64,AAAA").unwrap_err();
        assert_eq!(err, TransitionError::NotScanning(Disconnected));
        assert!(session.snapshot().pairing_artifact.is_none());
    }

    #[test]
    fn test_illegal_transition_leaves_state() {
        let session = SessionState::new();
        let err = session.set_status(LoggedOut).unwrap_err();
        assert_eq!(
            err,
            TransitionError::Illegal {
                from: Disconnected,
                to: LoggedOut
            }
        );
        assert_eq!(session.status(), Disconnected);
    }

    #[test]
    fn test_every_state_can_disconnect() {
        for from in ALL {
            assert!(from.can_transition_to(Disconnected), "{from} -> disconnected");
        }
    }

    #[test]
    fn test_edge_table() {
        assert!(Disconnected.can_transition_to(Scanning));
        assert!(Disconnected.can_transition_to(Connected));
        assert!(Scanning.can_transition_to(Connected));
        assert!(Connected.can_transition_to(LoggedOut));
        assert!(!Scanning.can_transition_to(LoggedOut));
        assert!(!LoggedOut.can_transition_to(Connected));
        assert!(!LoggedOut.can_transition_to(Scanning));
        assert!(!Connected.can_transition_to(Scanning));
    }

    #[test]
    fn test_reset_from_any_state() {
        let session = SessionState::new();
        session.set_status(Scanning).unwrap();
        session.set_pairing_artifact("payload").unwrap();
        session.reset();
        assert_eq!(session.snapshot(), SessionSnapshot::default());

        session.set_status(Connected).unwrap();
        session.set_status(LoggedOut).unwrap();
        session.reset();
        assert_eq!(session.snapshot(), SessionSnapshot::default());
    }

    #[test]
    fn test_artifact_only_while_scanning_under_any_walk() {
        // Walk every status sequence of length 4 and check the invariant after each step.
        for a in ALL {
            for b in ALL {
                for c in ALL {
                    let session = SessionState::new();
                    for next in [a, b, c] {
                        let _ = session.set_status(next);
                        let _ = session.set_pairing_artifact("payload");
                        let snapshot = session.snapshot();
                        assert_eq!(
                            snapshot.pairing_artifact.is_some(),
                            snapshot.status == Scanning,
                            "walk {a} {b} {c}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_concurrent_snapshots_are_consistent() {
        let session = SessionState::new();

        std::thread::scope(|scope| {
            for writer in 0..2 {
                let session = &session;
                scope.spawn(move || {
                    for i in 0..2_000 {
                        let _ = session.set_status(Scanning);
                        let _ = session.set_pairing_artifact(format!("code-{writer}-{i}"));
                        let _ = session.set_status(Connected);
                        let _ = session.set_status(Disconnected);
                    }
                });
            }
            for _ in 0..2 {
                let session = &session;
                scope.spawn(move || {
                    for _ in 0..5_000 {
                        let snapshot = session.snapshot();
                        assert!(
                            snapshot.pairing_artifact.is_none() || snapshot.status == Scanning,
                            "artifact seen while {}",
                            snapshot.status
                        );
                    }
                });
            }
        });

        assert!(session.snapshot().pairing_artifact.is_none());
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&LoggedOut).unwrap(), "\"logged_out\"");
        let parsed: ConnectionStatus = serde_json::from_str("\"scanning\"").unwrap();
        assert_eq!(parsed, Scanning);
        assert_eq!(Connected.to_string(), "connected");
    }
}
