//! Routes protocol client events to session state and the reply policy.

use std::sync::Arc;

use courier_core::{
    AutoResponder, ClientEvent, ConnectionStatus, InboundMessage, LogBuffer, ProtocolClient,
    SessionState,
};
use tokio::sync::mpsc;

/// Single consumer of a client's event stream.
pub struct EventDispatcher {
    session: Arc<SessionState>,
    logs: Arc<LogBuffer>,
    client: Arc<dyn ProtocolClient>,
    responder: Arc<dyn AutoResponder>,
}

impl EventDispatcher {
    /// Create a dispatcher replying through `client`.
    #[must_use]
    pub fn new(
        session: Arc<SessionState>,
        logs: Arc<LogBuffer>,
        client: Arc<dyn ProtocolClient>,
        responder: Arc<dyn AutoResponder>,
    ) -> Self {
        Self {
            session,
            logs,
            client,
            responder,
        }
    }

    /// Drain `events` in order until the client drops its sender.
    pub async fn run(self, mut events: mpsc::Receiver<ClientEvent>) {
        while let Some(event) = events.recv().await {
            self.dispatch(event).await;
        }
        tracing::debug!("Client event stream closed");
    }

    /// Handle one event.
    pub async fn dispatch(&self, event: ClientEvent) {
        match event {
            ClientEvent::Connected => {
                self.logs.append("Connected to WhatsApp!");
                self.transition(ConnectionStatus::Connected);
            }
            ClientEvent::Disconnected => {
                self.logs.append("Disconnected from WhatsApp");
                self.transition(ConnectionStatus::Disconnected);
            }
            ClientEvent::LoggedOut => {
                self.logs.append("Logged out from WhatsApp");
                self.transition(ConnectionStatus::LoggedOut);
            }
            ClientEvent::Message(msg) => self.on_message(msg).await,
            ClientEvent::Other { name } => {
                tracing::debug!(event = %name, "Unhandled client event");
            }
        }
    }

    fn transition(&self, next: ConnectionStatus) {
        if let Err(e) = self.session.set_status(next) {
            self.logs.append(format!("Ignoring status change: {e}"));
        }
    }

    async fn on_message(&self, msg: InboundMessage) {
        if msg.is_from_me {
            return;
        }
        let text = msg.text();
        if text.is_empty() {
            tracing::debug!(sender = %msg.sender, "Skipping message without text");
            return;
        }

        self.logs
            .append(format!("Message received from {}: {text}", msg.sender));

        let Some(reply) = self.responder.reply(text) else {
            return;
        };

        match self.client.send_text(&msg.chat, &reply).await {
            Ok(()) => self.logs.append(format!("Reply sent to {}", msg.sender)),
            Err(e) => self
                .logs
                .append(format!("Error sending reply to {}: {e}", msg.chat)),
        }
    }
}
