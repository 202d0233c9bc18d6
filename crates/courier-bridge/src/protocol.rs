//! Bridge sidecar wire protocol: one JSON object per line in each direction.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use courier_core::InboundMessage;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    sync::{mpsc, oneshot},
};
use uuid::Uuid;

/// Protocol error.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Bridge closed")]
    Closed,
    #[error("Bridge did not answer within {0:?}")]
    Timeout(Duration),
    #[error("Bridge rejected request: {0}")]
    Rejected(String),
}

/// Message from the bridge to us.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeMessage {
    /// Fresh pairing code.
    Qr { code: String },
    /// Other pairing notice (`timeout`, `error`, ...).
    Pairing { event: String },
    /// Pairing completed; the bridge persisted its key material.
    PairSuccess {
        id: String,
        #[serde(default)]
        push_name: Option<String>,
    },
    Connected,
    Disconnected,
    LoggedOut,
    /// Inbound chat message.
    Message(InboundMessage),
    /// Outcome of a `send` command.
    SendResult {
        request_id: Uuid,
        #[serde(default)]
        error: Option<String>,
    },
    /// Bridge-side diagnostics.
    Log {
        #[serde(default)]
        level: String,
        text: String,
    },
    #[serde(other)]
    Unknown,
}

/// Command from us to the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeCommand {
    Connect,
    Disconnect,
    Send {
        request_id: Uuid,
        to: String,
        text: String,
    },
}

/// Receives everything the bridge says except send results, one at a time.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one decoded message.
    async fn on_message(&self, msg: BridgeMessage);

    /// The bridge closed its output.
    async fn on_closed(&self);
}

type Pending = Arc<Mutex<HashMap<Uuid, oneshot::Sender<Result<(), String>>>>>;

/// Handles bidirectional communication with the bridge.
#[derive(Clone)]
pub struct ProtocolPeer {
    writer: Arc<tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>>,
    pending: Pending,
}

impl ProtocolPeer {
    /// Spawn a new protocol peer.
    ///
    /// This starts a background task reading bridge output. Send results are
    /// matched to their waiting requests right there; everything else is
    /// queued to a second task that hands it to `handler` in order, so a slow
    /// handler never holds up send results.
    #[must_use]
    pub fn spawn<R, W>(reader: R, writer: W, handler: Arc<dyn MessageHandler>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(writer);
        let peer = Self {
            writer: Arc::new(tokio::sync::Mutex::new(writer)),
            pending: Arc::new(Mutex::new(HashMap::new())),
        };

        let (inbox_tx, mut inbox_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(msg) = inbox_rx.recv().await {
                handler.on_message(msg).await;
            }
            handler.on_closed().await;
        });

        let reader_peer = peer.clone();
        tokio::spawn(async move {
            if let Err(e) = reader_peer.read_loop(reader, &inbox_tx).await {
                tracing::error!("Bridge reader loop error: {e}");
            }
            // Fail whoever is still waiting on a send.
            reader_peer.pending.lock().clear();
        });

        peer
    }

    async fn read_loop<R>(
        &self,
        reader: R,
        inbox: &mpsc::UnboundedSender<BridgeMessage>,
    ) -> Result<(), PeerError>
    where
        R: AsyncRead + Unpin,
    {
        let mut reader = BufReader::new(reader);
        let mut buffer = String::new();

        loop {
            buffer.clear();
            if reader.read_line(&mut buffer).await? == 0 {
                break; // EOF
            }
            let line = buffer.trim();
            if line.is_empty() {
                continue;
            }

            match serde_json::from_str::<BridgeMessage>(line) {
                Ok(BridgeMessage::SendResult { request_id, error }) => {
                    let waiter = self.pending.lock().remove(&request_id);
                    match waiter {
                        Some(tx) => {
                            let _ = tx.send(error.map_or(Ok(()), Err));
                        }
                        None => tracing::debug!(%request_id, "Send result without waiter"),
                    }
                }
                Ok(msg) => {
                    if inbox.send(msg).is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!("Invalid bridge message: {e}"),
            }
        }
        Ok(())
    }

    async fn send_json<T: Serialize + Sync>(&self, message: &T) -> Result<(), PeerError> {
        let json = serde_json::to_string(message)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    /// Send a command that has no reply.
    ///
    /// # Errors
    /// Returns error if write fails.
    pub async fn command(&self, command: &BridgeCommand) -> Result<(), PeerError> {
        self.send_json(command).await
    }

    /// Send a text message and wait for the bridge's verdict.
    ///
    /// # Errors
    /// Returns error if the write fails, the bridge rejects the message,
    /// closes, or stays silent past `timeout`.
    pub async fn send_text(&self, to: &str, text: &str, timeout: Duration) -> Result<(), PeerError> {
        let request_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id, tx);

        let command = BridgeCommand::Send {
            request_id,
            to: to.to_string(),
            text: text.to_string(),
        };
        if let Err(e) = self.send_json(&command).await {
            self.pending.lock().remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(message))) => Err(PeerError::Rejected(message)),
            Ok(Err(_)) => Err(PeerError::Closed),
            Err(_) => {
                self.pending.lock().remove(&request_id);
                Err(PeerError::Timeout(timeout))
            }
        }
    }

    /// Close our side of the pipe.
    ///
    /// # Errors
    /// Returns error if shutdown fails.
    pub async fn close(&self) -> Result<(), PeerError> {
        self.writer.lock().await.shutdown().await?;
        Ok(())
    }
}
