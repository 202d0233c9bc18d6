//! First-time pairing: codes in, artifacts out.

use std::sync::Arc;

use courier_core::{
    CodeRenderer, ConnectionStatus, LogBuffer, PairingEvent, SessionState, TransitionError,
};
use tokio::sync::mpsc;

/// Republishes each pairing code as the session's pairing artifact.
pub struct PairingFlow {
    session: Arc<SessionState>,
    logs: Arc<LogBuffer>,
    renderer: Arc<dyn CodeRenderer>,
}

impl PairingFlow {
    /// Create a new pairing flow.
    #[must_use]
    pub fn new(
        session: Arc<SessionState>,
        logs: Arc<LogBuffer>,
        renderer: Arc<dyn CodeRenderer>,
    ) -> Self {
        Self {
            session,
            logs,
            renderer,
        }
    }

    /// Consume the code stream until the client closes it.
    pub async fn run(&self, mut codes: mpsc::Receiver<PairingEvent>) {
        while let Some(event) = codes.recv().await {
            self.handle(event);
        }
        tracing::debug!("Pairing stream closed");
    }

    /// Handle one pairing event.
    pub fn handle(&self, event: PairingEvent) {
        match event {
            PairingEvent::Code { code } => self.on_code(&code),
            PairingEvent::Other { event } => self.logs.append(format!("Pairing event: {event}")),
        }
    }

    fn on_code(&self, code: &str) {
        self.logs.append("Pairing code received - scan with WhatsApp");

        if let Err(e) = self.session.set_status(ConnectionStatus::Scanning) {
            self.logs.append(format!("Ignoring pairing code: {e}"));
            return;
        }

        // A failed render keeps the session scanning; the next code will retry.
        let payload = match self.renderer.render(code) {
            Ok(payload) => payload,
            Err(e) => {
                self.logs.append(format!("Failed to generate QR image: {e}"));
                return;
            }
        };

        match self.session.set_pairing_artifact(payload) {
            Ok(()) => {}
            // Connected raced ahead of the render; the code is stale.
            Err(TransitionError::NotScanning(status)) => {
                tracing::debug!(%status, "Dropping rendered pairing code");
            }
            Err(e) => self.logs.append(format!("Failed to publish pairing code: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingRenderer, StaticRenderer};

    fn flow(renderer: Arc<dyn CodeRenderer>) -> (PairingFlow, Arc<SessionState>, Arc<LogBuffer>) {
        let session = Arc::new(SessionState::new());
        let logs = Arc::new(LogBuffer::new());
        let flow = PairingFlow::new(Arc::clone(&session), Arc::clone(&logs), renderer);
        (flow, session, logs)
    }

    #[test]
    fn test_code_enters_scanning_with_artifact() {
        let (flow, session, logs) = flow(Arc::new(StaticRenderer));
        flow.handle(PairingEvent::Code {
            code: "ABC123".to_string(),
        });

        let snapshot = session.snapshot();
        assert_eq!(snapshot.status, ConnectionStatus::Scanning);
        assert_eq!(
            snapshot.pairing_artifact.as_deref(),
            Some("data:image/png;base64,ABC123")
        );
        assert!(logs.read_all()[0].message.contains("Pairing code received"));
    }

    #[test]
    fn test_rotation_replaces_artifact() {
        let (flow, session, _logs) = flow(Arc::new(StaticRenderer));
        flow.handle(PairingEvent::Code {
            code: "FIRST".to_string(),
        });
        flow.handle(PairingEvent::Code {
            code: "SECOND".to_string(),
        });

        assert_eq!(
            session.snapshot().pairing_artifact.as_deref(),
            Some("data:image/png;base64,SECOND")
        );
    }

    #[test]
    fn test_render_failure_stays_scanning() {
        let (flow, session, logs) = flow(Arc::new(FailingRenderer));
        flow.handle(PairingEvent::Code {
            code: "ABC123".to_string(),
        });

        let snapshot = session.snapshot();
        assert_eq!(snapshot.status, ConnectionStatus::Scanning);
        assert!(snapshot.pairing_artifact.is_none());
        assert!(logs.read_all()[0].message.starts_with("Failed to generate QR image"));
    }

    #[test]
    fn test_other_event_only_logs() {
        let (flow, session, logs) = flow(Arc::new(StaticRenderer));
        flow.handle(PairingEvent::Other {
            event: "timeout".to_string(),
        });

        assert_eq!(session.status(), ConnectionStatus::Disconnected);
        assert_eq!(logs.read_all()[0].message, "Pairing event: timeout");
    }

    #[test]
    fn test_code_ignored_once_connected() {
        let (flow, session, _logs) = flow(Arc::new(StaticRenderer));
        session.set_status(ConnectionStatus::Connected).unwrap();
        session.set_status(ConnectionStatus::LoggedOut).unwrap();
        flow.handle(PairingEvent::Code {
            code: "LATE".to_string(),
        });

        let snapshot = session.snapshot();
        assert_eq!(snapshot.status, ConnectionStatus::LoggedOut);
        assert!(snapshot.pairing_artifact.is_none());
    }

    #[tokio::test]
    async fn test_run_ends_when_stream_closes() {
        let (flow, session, _logs) = flow(Arc::new(StaticRenderer));
        let (tx, rx) = mpsc::channel(4);
        tx.send(PairingEvent::Code {
            code: "ABC123".to_string(),
        })
        .await
        .unwrap();
        drop(tx);

        flow.run(rx).await;
        assert_eq!(session.status(), ConnectionStatus::Scanning);
    }
}
