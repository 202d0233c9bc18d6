//! In-process doubles for the protocol client, factory and renderer.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use courier_core::{
    ClientError, ClientEvent, ClientFactory, ClientHandle, CodeRenderer, Identity, PairingEvent,
    ProtocolClient, RenderError,
};
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};

/// Protocol client that records sends and lets tests push pairing codes.
#[derive(Default)]
pub struct FakeClient {
    connected: AtomicBool,
    fail_connect: AtomicBool,
    fail_pairing: AtomicBool,
    fail_sends: AtomicBool,
    disconnects: AtomicUsize,
    pairing_tx: Mutex<Option<mpsc::Sender<PairingEvent>>>,
    sent: Mutex<Vec<(String, String)>>,
    send_gate: Mutex<Option<Arc<Notify>>>,
    held_sends: AtomicUsize,
}

impl FakeClient {
    /// Create a disconnected client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `send_text` fail.
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Make the next `connect` fail.
    pub fn fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Park every subsequent `send_text` until the returned gate is notified.
    pub fn hold_sends(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.send_gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    /// Sends currently parked on the gate.
    #[must_use]
    pub fn held_sends(&self) -> usize {
        self.held_sends.load(Ordering::SeqCst)
    }

    /// Make `pairing_codes` fail.
    pub fn fail_pairing(&self, fail: bool) {
        self.fail_pairing.store(fail, Ordering::SeqCst);
    }

    /// `(chat, text)` pairs sent so far.
    #[must_use]
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }

    /// How often `disconnect` was called.
    #[must_use]
    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Push a pairing code; `false` if no pairing stream is open.
    pub async fn emit_code(&self, code: &str) -> bool {
        let tx = self.pairing_tx.lock().clone();
        match tx {
            Some(tx) => tx
                .send(PairingEvent::Code {
                    code: code.to_string(),
                })
                .await
                .is_ok(),
            None => false,
        }
    }

    /// Close the pairing stream, as a successful pairing would.
    pub fn close_pairing(&self) {
        self.pairing_tx.lock().take();
    }
}

#[async_trait]
impl ProtocolClient for FakeClient {
    async fn pairing_codes(&self) -> Result<mpsc::Receiver<PairingEvent>, ClientError> {
        if self.fail_pairing.load(Ordering::SeqCst) {
            return Err(ClientError::PairingUnavailable("bridge refused".to_string()));
        }
        let (tx, rx) = mpsc::channel(8);
        *self.pairing_tx.lock() = Some(tx);
        Ok(rx)
    }

    async fn connect(&self) -> Result<(), ClientError> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(ClientError::Spawn("connection refused".to_string()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        self.close_pairing();
    }

    async fn send_text(&self, chat: &str, text: &str) -> Result<(), ClientError> {
        let gate = self.send_gate.lock().clone();
        if let Some(gate) = gate {
            self.held_sends.fetch_add(1, Ordering::SeqCst);
            gate.notified().await;
            self.held_sends.fetch_sub(1, Ordering::SeqCst);
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ClientError::Send("network unreachable".to_string()));
        }
        self.sent.lock().push((chat.to_string(), text.to_string()));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// One client handed out by [`FakeFactory`].
#[derive(Clone)]
pub struct FakeBuild {
    pub client: Arc<FakeClient>,
    pub events: mpsc::Sender<ClientEvent>,
    pub identity: Option<Identity>,
}

/// Factory producing [`FakeClient`]s and keeping their event senders.
#[derive(Default)]
pub struct FakeFactory {
    builds: Mutex<Vec<FakeBuild>>,
    fail_builds: AtomicBool,
    fail_connect: AtomicBool,
    fail_pairing: AtomicBool,
}

impl FakeFactory {
    /// Create a factory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent builds fail.
    pub fn fail_builds(&self, fail: bool) {
        self.fail_builds.store(fail, Ordering::SeqCst);
    }

    /// Hand out clients whose `connect` fails.
    pub fn fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Hand out clients whose `pairing_codes` fails.
    pub fn fail_pairing(&self, fail: bool) {
        self.fail_pairing.store(fail, Ordering::SeqCst);
    }

    /// Number of clients built so far.
    #[must_use]
    pub fn build_count(&self) -> usize {
        self.builds.lock().len()
    }

    /// Most recently built client.
    #[must_use]
    pub fn last(&self) -> Option<FakeBuild> {
        self.builds.lock().last().cloned()
    }
}

#[async_trait]
impl ClientFactory for FakeFactory {
    async fn build(&self, identity: Option<&Identity>) -> Result<ClientHandle, ClientError> {
        if self.fail_builds.load(Ordering::SeqCst) {
            return Err(ClientError::Spawn("bridge not found".to_string()));
        }
        let client = Arc::new(FakeClient::new());
        client.fail_connect(self.fail_connect.load(Ordering::SeqCst));
        client.fail_pairing(self.fail_pairing.load(Ordering::SeqCst));
        let (tx, rx) = mpsc::channel(16);
        self.builds.lock().push(FakeBuild {
            client: Arc::clone(&client),
            events: tx,
            identity: identity.cloned(),
        });
        Ok(ClientHandle {
            client,
            events: rx,
        })
    }
}

/// Renders `code` verbatim into a PNG data URI shell.
#[derive(Debug, Default, Clone)]
pub struct StaticRenderer;

impl CodeRenderer for StaticRenderer {
    fn render(&self, code: &str) -> Result<String, RenderError> {
        Ok(format!("data:image/png;base64,{code}"))
    }
}

/// Always fails to render.
#[derive(Debug, Default, Clone)]
pub struct FailingRenderer;

impl CodeRenderer for FailingRenderer {
    fn render(&self, _code: &str) -> Result<String, RenderError> {
        Err(RenderError::Encode("data too long".to_string()))
    }
}
