//! Lifecycle manager: startup, reset and restart supervision.

use std::{sync::Arc, time::Duration};

use courier_core::{
    AutoResponder, ClientError, ClientFactory, ClientHandle, CodeRenderer, ConnectionStatus,
    EchoResponder, LogBuffer, ProtocolClient, SessionState, SessionStore, StoreError,
    config::DEFAULT_RESTART_DELAY,
};
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::{EventDispatcher, PairingFlow, QrPngRenderer};

/// Startup attempt failure. Terminal for the attempt; recovery is a reset.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Failed to load session: {0}")]
    Store(#[from] StoreError),
    #[error("Failed to create client: {0}")]
    Client(ClientError),
    #[error("Failed to open pairing stream: {0}")]
    Pairing(ClientError),
    #[error("Failed to connect: {0}")]
    Connect(ClientError),
}

/// Outbound send request error.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("Bot not initialized")]
    NotInitialized,
}

/// Supervised background tasks.
#[derive(Default)]
struct Tasks {
    startup: Option<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
    restart: Option<JoinHandle<()>>,
}

impl Tasks {
    fn take_all(&mut self) -> [Option<JoinHandle<()>>; 3] {
        [self.restart.take(), self.startup.take(), self.dispatcher.take()]
    }
}

/// Owns the connection lifecycle.
///
/// Runs the startup sequence (load identity, build client, pair or
/// reconnect), keeps the current client handle for the control API, and
/// supervises the dispatcher and restart tasks.
pub struct LifecycleManager {
    session: Arc<SessionState>,
    logs: Arc<LogBuffer>,
    store: Arc<dyn SessionStore>,
    factory: Arc<dyn ClientFactory>,
    renderer: Arc<dyn CodeRenderer>,
    responder: Arc<dyn AutoResponder>,
    restart_delay: Duration,
    client: RwLock<Option<Arc<dyn ProtocolClient>>>,
    tasks: Mutex<Tasks>,
}

/// Builder for [`LifecycleManager`].
pub struct ManagerBuilder {
    session: Arc<SessionState>,
    logs: Arc<LogBuffer>,
    store: Arc<dyn SessionStore>,
    factory: Arc<dyn ClientFactory>,
    renderer: Arc<dyn CodeRenderer>,
    responder: Arc<dyn AutoResponder>,
    restart_delay: Duration,
}

impl ManagerBuilder {
    /// Override the pairing code renderer.
    #[must_use]
    pub fn renderer(mut self, renderer: Arc<dyn CodeRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Override the reply policy.
    #[must_use]
    pub fn responder(mut self, responder: Arc<dyn AutoResponder>) -> Self {
        self.responder = responder;
        self
    }

    /// Override the delay between a reset and the next startup.
    #[must_use]
    pub const fn restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    /// Share externally created session and log handles.
    #[must_use]
    pub fn shared_state(mut self, session: Arc<SessionState>, logs: Arc<LogBuffer>) -> Self {
        self.session = session;
        self.logs = logs;
        self
    }

    /// Build the manager. Nothing runs until [`LifecycleManager::start`].
    #[must_use]
    pub fn build(self) -> Arc<LifecycleManager> {
        Arc::new(LifecycleManager {
            session: self.session,
            logs: self.logs,
            store: self.store,
            factory: self.factory,
            renderer: self.renderer,
            responder: self.responder,
            restart_delay: self.restart_delay,
            client: RwLock::new(None),
            tasks: Mutex::new(Tasks::default()),
        })
    }
}

impl LifecycleManager {
    /// Start building a manager around a store and a client factory.
    #[must_use]
    pub fn builder(store: Arc<dyn SessionStore>, factory: Arc<dyn ClientFactory>) -> ManagerBuilder {
        ManagerBuilder {
            session: Arc::new(SessionState::new()),
            logs: Arc::new(LogBuffer::new()),
            store,
            factory,
            renderer: Arc::new(QrPngRenderer::new()),
            responder: Arc::new(EchoResponder),
            restart_delay: DEFAULT_RESTART_DELAY,
        }
    }

    /// Shared session state.
    #[must_use]
    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    /// Shared log buffer.
    #[must_use]
    pub fn logs(&self) -> &Arc<LogBuffer> {
        &self.logs
    }

    /// Whether a protocol client currently exists.
    #[must_use]
    pub fn has_client(&self) -> bool {
        self.client.read().is_some()
    }

    /// Spawn the startup sequence in the background.
    ///
    /// A startup that is still pairing is superseded.
    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            if let Err(e) = this.run_startup().await {
                this.logs.append(e.to_string());
            }
        });

        if let Some(previous) = self.tasks.lock().startup.replace(handle) {
            previous.abort();
        }
    }

    async fn run_startup(&self) -> Result<(), StartupError> {
        self.logs.append("Starting WhatsApp connection...");

        let identity = self.store.first_identity().await?;
        let ClientHandle { client, events } = self
            .factory
            .build(identity.as_ref())
            .await
            .map_err(StartupError::Client)?;

        *self.client.write() = Some(Arc::clone(&client));
        let dispatcher = EventDispatcher::new(
            Arc::clone(&self.session),
            Arc::clone(&self.logs),
            Arc::clone(&client),
            Arc::clone(&self.responder),
        );
        let handle = tokio::spawn(dispatcher.run(events));
        if let Some(previous) = self.tasks.lock().dispatcher.replace(handle) {
            previous.abort();
        }

        match identity {
            None => {
                self.logs.append("No session found, generating QR code...");
                let codes = client
                    .pairing_codes()
                    .await
                    .map_err(StartupError::Pairing)?;
                self.connect(client.as_ref()).await?;

                PairingFlow::new(
                    Arc::clone(&self.session),
                    Arc::clone(&self.logs),
                    Arc::clone(&self.renderer),
                )
                .run(codes)
                .await;
            }
            Some(identity) => {
                self.logs
                    .append(format!("Session found for {}, connecting...", identity.id));
                self.connect(client.as_ref()).await?;
            }
        }
        Ok(())
    }

    async fn connect(&self, client: &dyn ProtocolClient) -> Result<(), StartupError> {
        if let Err(e) = client.connect().await {
            // Any state may fall back to disconnected.
            let _ = self.session.set_status(ConnectionStatus::Disconnected);
            return Err(StartupError::Connect(e));
        }
        Ok(())
    }

    /// Disconnect, wipe the stored identity and schedule a fresh start.
    ///
    /// The session is `Disconnected` with no artifact when this returns; the
    /// restart runs after the configured delay. A later reset supersedes a
    /// restart that has not fired yet.
    ///
    /// # Errors
    /// Returns error if the store could not be wiped. The restart is
    /// scheduled regardless.
    pub async fn reset(self: &Arc<Self>) -> Result<(), StoreError> {
        self.logs.append("Manual reset requested...");

        // Stop everything that could still write to the session first.
        self.abort_tasks().await;
        self.session.reset();

        let client = self.client.write().take();
        if let Some(client) = client {
            client.disconnect().await;
        }

        let wiped = self.store.wipe().await;
        if let Err(e) = &wiped {
            self.logs.append(format!("Failed to wipe session store: {e}"));
        }

        self.schedule_restart();
        wiped
    }

    fn schedule_restart(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let delay = self.restart_delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.start();
        });

        if let Some(previous) = self.tasks.lock().restart.replace(handle) {
            previous.abort();
        }
    }

    async fn abort_tasks(&self) {
        // A startup being cancelled may have registered a dispatcher in the
        // meantime, so drain until nothing is left.
        loop {
            let handles: Vec<_> = self.tasks.lock().take_all().into_iter().flatten().collect();
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                handle.abort();
                // Wait for cancellation so no stale write lands after this point.
                let _ = handle.await;
            }
        }
    }

    /// Validate an outbound send request.
    ///
    /// Sending is not wired yet: the request is accepted once a client
    /// exists and nothing goes out on the wire.
    ///
    /// # Errors
    /// Returns [`SendError::NotInitialized`] if no client exists.
    pub fn send(&self, to: &str, text: &str) -> Result<(), SendError> {
        if !self.has_client() {
            return Err(SendError::NotInitialized);
        }
        tracing::debug!(%to, len = text.len(), "Outbound send accepted");
        Ok(())
    }

    /// Abort background work and disconnect the client.
    pub async fn shutdown(&self) {
        self.abort_tasks().await;
        let client = self.client.write().take();
        if let Some(client) = client {
            client.disconnect().await;
        }
        tracing::info!("Lifecycle manager stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;

    use courier_core::{ClientEvent, Identity, InboundMessage, MessageContent};

    use super::*;
    use crate::{
        storage::MemoryStore,
        testing::{FakeFactory, StaticRenderer},
    };

    struct Fixture {
        manager: Arc<LifecycleManager>,
        factory: Arc<FakeFactory>,
        store: Arc<MemoryStore>,
    }

    fn fixture(store: MemoryStore) -> Fixture {
        let store = Arc::new(store);
        let factory = Arc::new(FakeFactory::new());
        let manager = LifecycleManager::builder(
            Arc::clone(&store) as Arc<dyn SessionStore>,
            Arc::clone(&factory) as Arc<dyn ClientFactory>,
        )
        .renderer(Arc::new(StaticRenderer))
        .restart_delay(Duration::from_millis(50))
        .build();
        Fixture {
            manager,
            factory,
            store,
        }
    }

    fn paired() -> Identity {
        Identity {
            id: "15550001111@s.whatsapp.net".to_string(),
            push_name: None,
            paired_at: 1_700_000_000,
        }
    }

    async fn eventually<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        for _ in 0..200 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    fn has_log(manager: &LifecycleManager, needle: &str) -> bool {
        manager
            .logs()
            .read_all()
            .iter()
            .any(|e| e.message.contains(needle))
    }

    #[tokio::test]
    async fn test_pairing_path() {
        let f = fixture(MemoryStore::new());
        f.manager.start();

        eventually(|| async { f.factory.build_count() == 1 }).await;
        let build = f.factory.last().unwrap();
        assert!(build.identity.is_none());

        eventually(|| {
            let client = Arc::clone(&build.client);
            async move { client.emit_code("ABC123").await }
        })
        .await;
        eventually(|| async { f.manager.session().snapshot().pairing_artifact.is_some() })
            .await;

        let snapshot = f.manager.session().snapshot();
        assert_eq!(snapshot.status, ConnectionStatus::Scanning);
        assert_eq!(
            snapshot.pairing_artifact.as_deref(),
            Some("data:image/png;base64,ABC123")
        );
        assert!(f.manager.logs().read_all()[0].message.contains("Pairing code received"));

        build.events.send(ClientEvent::Connected).await.unwrap();
        build.client.close_pairing();
        eventually(|| async { f.manager.session().status() == ConnectionStatus::Connected })
            .await;
        assert!(f.manager.session().snapshot().pairing_artifact.is_none());
    }

    #[tokio::test]
    async fn test_reconnect_path() {
        let f = fixture(MemoryStore::with_identity(paired()));
        f.manager.start();

        eventually(|| async { has_log(&f.manager, "Session found") }).await;
        let build = f.factory.last().unwrap();
        assert_eq!(build.identity, Some(paired()));
        assert!(build.client.is_connected());

        build.events.send(ClientEvent::Connected).await.unwrap();
        eventually(|| async { f.manager.session().status() == ConnectionStatus::Connected })
            .await;
    }

    #[tokio::test]
    async fn test_build_failure_is_logged() {
        let f = fixture(MemoryStore::new());
        f.factory.fail_builds(true);
        f.manager.start();

        eventually(|| async { has_log(&f.manager, "Failed to create client") }).await;
        assert!(!f.manager.has_client());
        assert_eq!(f.manager.session().status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_pairing_stream_failure_is_logged() {
        let f = fixture(MemoryStore::new());
        f.factory.fail_pairing(true);
        f.manager.start();

        eventually(|| async { has_log(&f.manager, "Failed to open pairing stream") }).await;
        assert!(!has_log(&f.manager, "Failed to create client"));
        assert_eq!(f.manager.session().status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_failure_stays_disconnected() {
        let f = fixture(MemoryStore::with_identity(paired()));
        f.factory.fail_connect(true);
        f.manager.start();

        eventually(|| async { has_log(&f.manager, "Failed to connect") }).await;
        assert_eq!(f.manager.session().status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_reset_clears_state_and_restarts() {
        let f = fixture(MemoryStore::with_identity(paired()));
        f.manager.start();
        eventually(|| async { f.factory.build_count() == 1 }).await;
        let first = f.factory.last().unwrap();
        first.events.send(ClientEvent::Connected).await.unwrap();
        eventually(|| async { f.manager.session().status() == ConnectionStatus::Connected })
            .await;

        f.manager.reset().await.unwrap();

        let snapshot = f.manager.session().snapshot();
        assert_eq!(snapshot.status, ConnectionStatus::Disconnected);
        assert!(snapshot.pairing_artifact.is_none());
        assert_eq!(first.client.disconnects(), 1);
        assert!(f.store.first_identity().await.unwrap().is_none());

        // Restart pairs from scratch.
        eventually(|| async { f.factory.build_count() == 2 }).await;
        assert!(f.factory.last().unwrap().identity.is_none());
    }

    #[tokio::test]
    async fn test_reset_ignores_stale_events() {
        let f = fixture(MemoryStore::with_identity(paired()));
        f.manager.start();
        eventually(|| async { f.factory.build_count() == 1 }).await;
        let first = f.factory.last().unwrap();
        first.events.send(ClientEvent::Connected).await.unwrap();
        eventually(|| async { f.manager.session().status() == ConnectionStatus::Connected })
            .await;

        f.manager.reset().await.unwrap();
        // The old dispatcher is gone, so its events go nowhere.
        assert!(
            first
                .events
                .send(ClientEvent::Message(InboundMessage {
                    sender: "u1".to_string(),
                    chat: "c1".to_string(),
                    is_from_me: false,
                    content: MessageContent::Conversation {
                        text: "hi".to_string(),
                    },
                }))
                .await
                .is_err()
        );
        assert_eq!(f.manager.session().status(), ConnectionStatus::Disconnected);
        assert!(first.client.sent().is_empty());
    }

    #[tokio::test]
    async fn test_reset_during_inflight_reply() {
        let f = fixture(MemoryStore::with_identity(paired()));
        f.manager.start();
        eventually(|| async { f.factory.build_count() == 1 }).await;
        let first = f.factory.last().unwrap();
        let gate = first.client.hold_sends();

        first.events.send(ClientEvent::Connected).await.unwrap();
        first
            .events
            .send(ClientEvent::Message(InboundMessage {
                sender: "u1".to_string(),
                chat: "c1".to_string(),
                is_from_me: false,
                content: MessageContent::Conversation {
                    text: "hi".to_string(),
                },
            }))
            .await
            .unwrap();
        eventually(|| async { first.client.held_sends() == 1 }).await;

        tokio::time::timeout(Duration::from_secs(1), f.manager.reset())
            .await
            .expect("reset waited on the pending reply")
            .unwrap();

        let snapshot = f.manager.session().snapshot();
        assert_eq!(snapshot.status, ConnectionStatus::Disconnected);
        assert!(snapshot.pairing_artifact.is_none());

        // Releasing the old send must not produce a late outcome.
        gate.notify_waiters();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(has_log(&f.manager, "Message received from u1"));
        assert!(!has_log(&f.manager, "Reply sent"));
        assert!(!has_log(&f.manager, "Error sending reply"));
        assert!(first.client.sent().is_empty());
    }

    #[tokio::test]
    async fn test_second_reset_supersedes_pending_restart() {
        let f = fixture(MemoryStore::new());
        f.manager.reset().await.unwrap();
        f.manager.reset().await.unwrap();

        eventually(|| async { f.factory.build_count() >= 1 }).await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(f.factory.build_count(), 1);
    }

    #[tokio::test]
    async fn test_send_requires_client() {
        let f = fixture(MemoryStore::with_identity(paired()));
        assert!(matches!(
            f.manager.send("15550002222", "hello"),
            Err(SendError::NotInitialized)
        ));

        f.manager.start();
        eventually(|| async { f.manager.has_client() }).await;
        tokio_test::assert_ok!(f.manager.send("15550002222", "hello"));
    }

    #[tokio::test]
    async fn test_shutdown_disconnects() {
        let f = fixture(MemoryStore::with_identity(paired()));
        f.manager.start();
        eventually(|| async { f.manager.has_client() }).await;
        let build = f.factory.last().unwrap();

        f.manager.shutdown().await;
        assert!(!f.manager.has_client());
        assert_eq!(build.client.disconnects(), 1);
    }
}
