//! Bridge-backed protocol client.

use std::{
    path::PathBuf,
    process::Stdio,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use command_group::{AsyncCommandGroup, AsyncGroupChild};
use courier_core::{
    ClientError, ClientEvent, ClientFactory, ClientHandle, Identity, PairingEvent, ProtocolClient,
    SessionStore,
};
use parking_lot::Mutex;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
};

use crate::{
    command::{CommandBuildError, CommandBuilder},
    protocol::{BridgeCommand, BridgeMessage, MessageHandler, PeerError, ProtocolPeer},
};

/// How long a send may wait for the bridge's verdict.
const SEND_TIMEOUT: Duration = Duration::from_secs(30);

impl From<PeerError> for ClientError {
    fn from(e: PeerError) -> Self {
        match e {
            PeerError::Io(e) => Self::Io(e),
            PeerError::Closed => Self::Closed,
            other => Self::Send(other.to_string()),
        }
    }
}

impl From<CommandBuildError> for ClientError {
    fn from(e: CommandBuildError) -> Self {
        Self::Spawn(e.to_string())
    }
}

/// State the reader task shares with the client.
struct ClientState {
    events: mpsc::Sender<ClientEvent>,
    pairing: Mutex<Option<mpsc::Sender<PairingEvent>>>,
    connected: AtomicBool,
    store: Arc<dyn SessionStore>,
}

impl ClientState {
    async fn forward_pairing(&self, event: PairingEvent) {
        let tx = self.pairing.lock().clone();
        if let Some(tx) = tx {
            if tx.send(event).await.is_err() {
                tracing::debug!("Pairing consumer gone");
            }
        }
    }

    fn close_pairing(&self) {
        self.pairing.lock().take();
    }

    async fn emit(&self, event: ClientEvent) {
        // Waiting for capacity holds back later events, never send results.
        if self.events.send(event).await.is_err() {
            tracing::debug!("Event consumer gone");
        }
    }
}

#[async_trait]
impl MessageHandler for ClientState {
    async fn on_message(&self, msg: BridgeMessage) {
        match msg {
            BridgeMessage::Qr { code } => self.forward_pairing(PairingEvent::Code { code }).await,
            BridgeMessage::Pairing { event } => {
                self.forward_pairing(PairingEvent::Other { event }).await;
            }
            BridgeMessage::PairSuccess { id, push_name } => {
                let identity = Identity {
                    id,
                    push_name,
                    paired_at: chrono::Utc::now().timestamp(),
                };
                if let Err(e) = self.store.save_identity(&identity).await {
                    tracing::error!("Failed to persist paired identity: {e}");
                }
                self.forward_pairing(PairingEvent::Other {
                    event: "success".to_string(),
                })
                .await;
                self.close_pairing();
            }
            BridgeMessage::Connected => {
                self.connected.store(true, Ordering::SeqCst);
                self.close_pairing();
                self.emit(ClientEvent::Connected).await;
            }
            BridgeMessage::Disconnected => {
                self.connected.store(false, Ordering::SeqCst);
                self.emit(ClientEvent::Disconnected).await;
            }
            BridgeMessage::LoggedOut => {
                self.connected.store(false, Ordering::SeqCst);
                self.close_pairing();
                self.emit(ClientEvent::LoggedOut).await;
            }
            BridgeMessage::Message(msg) => self.emit(ClientEvent::Message(msg)).await,
            BridgeMessage::Log { level, text } => match level.as_str() {
                "error" => tracing::error!(target: "bridge", "{text}"),
                "warn" => tracing::warn!(target: "bridge", "{text}"),
                "debug" => tracing::debug!(target: "bridge", "{text}"),
                _ => tracing::info!(target: "bridge", "{text}"),
            },
            BridgeMessage::SendResult { request_id, .. } => {
                tracing::debug!(%request_id, "Unexpected send result");
            }
            BridgeMessage::Unknown => {
                self.emit(ClientEvent::Other {
                    name: "unknown".to_string(),
                })
                .await;
            }
        }
    }

    async fn on_closed(&self) {
        self.close_pairing();
        if self.connected.swap(false, Ordering::SeqCst) {
            self.emit(ClientEvent::Disconnected).await;
        }
        tracing::info!("Bridge output closed");
    }
}

/// Protocol client talking to a bridge sidecar.
pub struct BridgeClient {
    peer: ProtocolPeer,
    state: Arc<ClientState>,
    child: tokio::sync::Mutex<Option<AsyncGroupChild>>,
}

impl BridgeClient {
    /// Wire a client to an already running bridge's pipes.
    ///
    /// Bridge output is read on a background task; decoded events arrive on
    /// the returned handle's receiver, which holds at most `buffer` events.
    pub fn from_io<R, W>(
        reader: R,
        writer: W,
        store: Arc<dyn SessionStore>,
        buffer: usize,
    ) -> ClientHandle
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::with_child(reader, writer, None, store, buffer)
    }

    fn with_child<R, W>(
        reader: R,
        writer: W,
        child: Option<AsyncGroupChild>,
        store: Arc<dyn SessionStore>,
        buffer: usize,
    ) -> ClientHandle
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (events_tx, events_rx) = mpsc::channel(buffer.max(1));
        let state = Arc::new(ClientState {
            events: events_tx,
            pairing: Mutex::new(None),
            connected: AtomicBool::new(false),
            store,
        });
        let peer = ProtocolPeer::spawn(reader, writer, Arc::clone(&state) as Arc<dyn MessageHandler>);

        let client = Arc::new(Self {
            peer,
            state,
            child: tokio::sync::Mutex::new(child),
        });
        ClientHandle {
            client,
            events: events_rx,
        }
    }
}

#[async_trait]
impl ProtocolClient for BridgeClient {
    async fn pairing_codes(&self) -> Result<mpsc::Receiver<PairingEvent>, ClientError> {
        if self.is_connected() {
            return Err(ClientError::PairingUnavailable(
                "client already connected".to_string(),
            ));
        }
        let (tx, rx) = mpsc::channel(8);
        *self.state.pairing.lock() = Some(tx);
        Ok(rx)
    }

    async fn connect(&self) -> Result<(), ClientError> {
        self.peer.command(&BridgeCommand::Connect).await?;
        Ok(())
    }

    async fn disconnect(&self) {
        if let Err(e) = self.peer.command(&BridgeCommand::Disconnect).await {
            tracing::debug!("Bridge disconnect command failed: {e}");
        }
        if let Err(e) = self.peer.close().await {
            tracing::debug!("Failed to close bridge input: {e}");
        }
        self.state.connected.store(false, Ordering::SeqCst);
        self.state.close_pairing();

        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            if let Err(e) = child.kill().await {
                tracing::warn!("Failed to stop bridge process: {e}");
            }
        }
    }

    async fn send_text(&self, chat: &str, text: &str) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        self.peer.send_text(chat, text, SEND_TIMEOUT).await?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }
}

/// Spawns one bridge sidecar per client.
pub struct BridgeFactory {
    command: CommandBuilder,
    store_path: PathBuf,
    store: Arc<dyn SessionStore>,
    event_buffer: usize,
}

impl BridgeFactory {
    /// Create a factory launching `command` against the store at `store_path`.
    #[must_use]
    pub fn new(
        command: CommandBuilder,
        store_path: impl Into<PathBuf>,
        store: Arc<dyn SessionStore>,
        event_buffer: usize,
    ) -> Self {
        Self {
            command,
            store_path: store_path.into(),
            store,
            event_buffer,
        }
    }

    fn launch_args(&self, identity: Option<&Identity>) -> Vec<String> {
        let mut args = vec![
            "--store".to_string(),
            self.store_path.display().to_string(),
        ];
        if let Some(identity) = identity {
            args.push("--device".to_string());
            args.push(identity.id.clone());
        }
        args
    }
}

#[async_trait]
impl ClientFactory for BridgeFactory {
    async fn build(&self, identity: Option<&Identity>) -> Result<ClientHandle, ClientError> {
        let (program, args) = self
            .command
            .build(&self.launch_args(identity))?
            .into_resolved()
            .await?;

        let mut child = tokio::process::Command::new(&program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .group_spawn()?;

        let stdin = child
            .inner()
            .stdin
            .take()
            .ok_or_else(|| ClientError::Spawn("bridge stdin unavailable".to_string()))?;
        let stdout = child
            .inner()
            .stdout
            .take()
            .ok_or_else(|| ClientError::Spawn("bridge stdout unavailable".to_string()))?;

        tracing::info!(program = %program.display(), ?args, "Spawned bridge");
        Ok(BridgeClient::with_child(
            stdout,
            stdin,
            Some(child),
            Arc::clone(&self.store),
            self.event_buffer,
        ))
    }
}
