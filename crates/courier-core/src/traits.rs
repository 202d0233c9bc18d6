//! Collaborator traits: protocol client, identity store and code renderer.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::event::{ClientEvent, PairingEvent};

/// Paired device identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Device address on the network (JID).
    pub id: String,
    /// Display name reported at pairing time.
    pub push_name: Option<String>,
    /// Pairing timestamp (Unix epoch seconds).
    pub paired_at: i64,
}

/// Storage error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to open store: {0}")]
    Open(String),
    #[error("Storage error: {0}")]
    Internal(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Durable home of the device identity.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// First paired device, if any.
    async fn first_identity(&self) -> Result<Option<Identity>, StoreError>;

    /// Persist a freshly paired device.
    async fn save_identity(&self, identity: &Identity) -> Result<(), StoreError>;

    /// Delete every persisted artifact, forcing the next start to pair.
    async fn wipe(&self) -> Result<(), StoreError>;
}

/// Protocol client error.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Client not connected")]
    NotConnected,
    #[error("Pairing channel unavailable: {0}")]
    PairingUnavailable(String),
    #[error("Failed to spawn client: {0}")]
    Spawn(String),
    #[error("Send failed: {0}")]
    Send(String),
    #[error("Client closed")]
    Closed,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Handle onto the remote messaging network.
///
/// Events are delivered on the receiver returned alongside the client by
/// [`ClientFactory::build`].
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Open the pairing-code stream. Must be called before [`connect`].
    ///
    /// The stream closes once pairing succeeds or the client shuts down.
    ///
    /// [`connect`]: ProtocolClient::connect
    async fn pairing_codes(&self) -> Result<mpsc::Receiver<PairingEvent>, ClientError>;

    /// Start connecting. Completion is reported as [`ClientEvent::Connected`].
    async fn connect(&self) -> Result<(), ClientError>;

    /// Drop the connection. Idempotent.
    async fn disconnect(&self);

    /// Send a plain text message to `chat`.
    async fn send_text(&self, chat: &str, text: &str) -> Result<(), ClientError>;

    /// Whether the underlying connection is live.
    fn is_connected(&self) -> bool;
}

/// A built client together with its ordered event stream.
pub struct ClientHandle {
    pub client: Arc<dyn ProtocolClient>,
    pub events: mpsc::Receiver<ClientEvent>,
}

/// Builds protocol clients bound to a stored identity.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// Build a client; `None` means the client must pair first.
    async fn build(&self, identity: Option<&Identity>) -> Result<ClientHandle, ClientError>;
}

/// Pairing code rendering error.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Failed to encode pairing code: {0}")]
    Encode(String),
    #[error("Failed to write image: {0}")]
    Image(String),
}

/// Turns a raw pairing code into a displayable payload.
pub trait CodeRenderer: Send + Sync {
    /// Render `code`, typically as a `data:` URI.
    fn render(&self, code: &str) -> Result<String, RenderError>;
}
