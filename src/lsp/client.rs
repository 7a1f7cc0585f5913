//! LSP client lifecycle
//!
//! [`LspClient`] owns the connection to one language server endpoint:
//! opening the socket, running the handshake, watching its health and
//! reconnecting with backoff when it goes away. Providers registered with
//! the editor never capture a session; they ask the client for the current
//! one on every request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::health::HealthMonitor;
use super::providers::{ProviderRegistrations, Snippet};
use super::reconnect::{Backoff, ReconnectScheduler, RetryToken};
use super::session::{RpcSession, SessionOptions};
use super::transport::{Connector, Socket};
use super::types::{LspError, ServerCapabilities};
use crate::editor::{EditorSurface, SignatureHelpResult};

/// Callback invoked with every signature help result handed to the editor
pub type SignatureHelpObserver = Arc<dyn Fn(&SignatureHelpResult) + Send + Sync>;

/// Timing and document settings for a client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Language the providers register for and didOpen announces
    pub language_id: String,
    /// URI of the single in-memory document
    pub document_uri: String,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Delay used when recovery is forced by a stale session
    pub force_reconnect_delay: Duration,
    pub health_check_interval: Duration,
    pub handshake_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            language_id: "python".to_string(),
            document_uri: "inmemory://model.py".to_string(),
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            force_reconnect_delay: Duration::from_millis(500),
            health_check_interval: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
        }
    }
}

pub(crate) struct ClientState {
    endpoint: Option<String>,
    /// Bumped by every connect and by destroy; events from older
    /// connections compare against it and drop out.
    generation: u64,
    socket: Option<Socket>,
    pub(crate) current: Option<Arc<RpcSession>>,
    /// (session id, generation) of the last session installed as current
    installed: Option<(u64, u64)>,
    scheduler: ReconnectScheduler,
    health: Option<HealthMonitor>,
    registrations: Option<ProviderRegistrations>,
    connection_task: Option<JoinHandle<()>>,
}

impl ClientState {
    /// Whether `session` belongs to the newest connection attempt
    pub(crate) fn is_latest(&self, session: &RpcSession) -> bool {
        self.installed == Some((session.id(), self.generation))
    }
}

pub(crate) struct ClientInner {
    pub(crate) config: ClientConfig,
    connector: Arc<dyn Connector>,
    surface: Arc<dyn EditorSurface>,
    destroyed: AtomicBool,
    preamble: RwLock<Option<String>>,
    snippets: RwLock<Arc<Vec<Snippet>>>,
    signature_observer: RwLock<Option<SignatureHelpObserver>>,
    state: Mutex<ClientState>,
}

/// Handle to a language server client. Cheap to clone.
#[derive(Clone)]
pub struct LspClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for LspClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LspClient")
            .field("endpoint", &self.endpoint())
            .field("session", &self.current_session().map(|s| s.id()))
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl LspClient {
    pub fn new(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        surface: Arc<dyn EditorSurface>,
    ) -> Self {
        let scheduler = ReconnectScheduler::new(
            Backoff::new(config.base_delay, config.max_delay),
            config.force_reconnect_delay,
        );

        Self {
            inner: Arc::new(ClientInner {
                config,
                connector,
                surface,
                destroyed: AtomicBool::new(false),
                preamble: RwLock::new(None),
                snippets: RwLock::new(Arc::new(Vec::new())),
                signature_observer: RwLock::new(None),
                state: Mutex::new(ClientState {
                    endpoint: None,
                    generation: 0,
                    socket: None,
                    current: None,
                    installed: None,
                    scheduler,
                    health: None,
                    registrations: None,
                    connection_task: None,
                }),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Open a connection to `endpoint` (`host:port`), superseding any
    /// existing one. No-op after [`destroy`](Self::destroy).
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self, endpoint: &str) {
        self.inner.connect(endpoint.to_string());
    }

    /// Switch to a new endpoint: cancel any pending retry, drop the current
    /// session, reset the attempt counter and connect.
    pub fn set_endpoint(&self, endpoint: &str) {
        if self.inner.is_destroyed() {
            warn!(endpoint, "set_endpoint on destroyed client ignored");
            return;
        }

        let previous = {
            let mut state = self.inner.lock_state();
            state.scheduler.cancel();
            state.scheduler.reset();
            state.current.take()
        };
        if let Some(session) = previous {
            session.dispose();
        }

        self.inner.connect(endpoint.to_string());
    }

    /// Tear everything down. Idempotent; afterwards no timer, monitor or
    /// pending retry does anything.
    pub fn destroy(&self) {
        self.inner.destroy();
    }

    /// True iff the current session passes the validity check and its
    /// socket is open
    pub fn is_connected(&self) -> bool {
        self.inner
            .valid_session()
            .map(|session| session.socket().is_open())
            .unwrap_or(false)
    }

    pub fn current_session(&self) -> Option<Arc<RpcSession>> {
        self.inner.current_session()
    }

    /// Text prepended to the visible document before it is sent to the
    /// server. `None` clears it.
    pub fn set_preamble(&self, preamble: Option<String>) {
        let mut slot = self.inner.preamble.write().unwrap_or_else(|e| e.into_inner());
        *slot = preamble;
    }

    pub fn preamble(&self) -> Option<String> {
        self.inner.preamble_snapshot()
    }

    pub fn set_snippets(&self, snippets: Vec<Snippet>) {
        let mut slot = self.inner.snippets.write().unwrap_or_else(|e| e.into_inner());
        *slot = Arc::new(snippets);
    }

    /// Install the callback that sees every signature help result
    pub fn on_signature_help<F>(&self, observer: F)
    where
        F: Fn(&SignatureHelpResult) + Send + Sync + 'static,
    {
        let mut slot = self
            .inner
            .signature_observer
            .write()
            .unwrap_or_else(|e| e.into_inner());
        *slot = Some(Arc::new(observer));
    }

    /// Push settings to the server via workspace/didChangeConfiguration
    pub fn update_server_settings(&self, settings: Value) -> Result<(), LspError> {
        if self.inner.is_destroyed() {
            return Err(LspError::Destroyed);
        }
        let session = self.inner.valid_session().ok_or(LspError::NotConnected)?;
        session.did_change_configuration(settings).map_err(|e| {
            self.inner.handle_request_failure(&session, &e);
            e
        })
    }

    /// Consecutive failed attempts since the last successful handshake
    pub fn attempt_count(&self) -> u32 {
        self.inner.lock_state().scheduler.attempts()
    }

    pub fn has_pending_retry(&self) -> bool {
        self.inner.lock_state().scheduler.has_pending()
    }

    pub fn endpoint(&self) -> Option<String> {
        self.inner.lock_state().endpoint.clone()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.is_destroyed()
    }

    /// Capabilities of the current session, if any
    pub fn server_capabilities(&self) -> Option<ServerCapabilities> {
        self.inner.current_session().map(|s| s.capabilities())
    }
}

impl ClientInner {
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub(crate) fn current_session(&self) -> Option<Arc<RpcSession>> {
        self.lock_state().current.clone()
    }

    pub(crate) fn preamble_snapshot(&self) -> Option<String> {
        self.preamble
            .read()
            .map(|p| p.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    pub(crate) fn snippets(&self) -> Arc<Vec<Snippet>> {
        self.snippets
            .read()
            .map(|s| Arc::clone(&s))
            .unwrap_or_else(|e| Arc::clone(&e.into_inner()))
    }

    pub(crate) fn signature_observer(&self) -> Option<SignatureHelpObserver> {
        self.signature_observer
            .read()
            .map(|o| o.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    pub(crate) fn connect(self: &Arc<Self>, endpoint: String) {
        if self.is_destroyed() {
            debug!(%endpoint, "connect on destroyed client ignored");
            return;
        }

        let (generation, previous_session, previous_socket) = {
            let mut state = self.lock_state();
            state.generation += 1;
            state.endpoint = Some(endpoint.clone());
            // A retry that already fired has claimed its slot; anything still
            // pending belongs to the connection being replaced.
            state.scheduler.cancel();
            if let Some(task) = state.connection_task.take() {
                task.abort();
            }
            if let Some(monitor) = state.health.take() {
                monitor.stop();
            }
            (state.generation, state.current.take(), state.socket.take())
        };

        if let Some(session) = previous_session {
            session.dispose();
        }
        if let Some(socket) = previous_socket {
            socket.close();
        }

        info!(%endpoint, generation, "connecting to language server");
        let task = tokio::spawn(run_connection(
            Arc::downgrade(self),
            Arc::clone(&self.connector),
            endpoint,
            generation,
        ));

        let mut state = self.lock_state();
        if state.generation == generation {
            state.connection_task = Some(task);
        } else {
            task.abort();
        }
    }

    /// Record the socket of a fresh connection. Returns the session options
    /// to use, or `None` when the connection was superseded meanwhile.
    fn adopt_socket(&self, generation: u64, socket: &Socket) -> Option<SessionOptions> {
        let mut state = self.lock_state();
        if self.is_destroyed() || state.generation != generation {
            return None;
        }
        state.socket = Some(socket.clone());
        Some(SessionOptions {
            language_id: self.config.language_id.clone(),
            request_timeout: self.config.request_timeout,
        })
    }

    /// Install a freshly initialized session. Returns false when the
    /// connection was superseded or the client destroyed during the
    /// handshake.
    fn on_session_ready(
        self: &Arc<Self>,
        generation: u64,
        session: &Arc<RpcSession>,
        capabilities: &ServerCapabilities,
    ) -> bool {
        {
            let mut state = self.lock_state();
            if self.is_destroyed() || state.generation != generation {
                return false;
            }
            state.scheduler.cancel();
            state.scheduler.reset();
            state.current = Some(Arc::clone(session));
            state.installed = Some((session.id(), generation));
            if let Some(monitor) = state.health.take() {
                monitor.stop();
            }
            state.health = Some(self.spawn_health_monitor());
        }

        info!(
            session = session.id(),
            completion = capabilities.completion,
            hover = capabilities.hover,
            signature_help = capabilities.signature_help,
            "language server session ready"
        );

        // New set first: the surface replaces each slot, and disposing the
        // superseded handles afterwards leaves the new ones in place.
        let fresh = ProviderRegistrations::register(
            self.surface.as_ref(),
            &self.config.language_id,
            Arc::downgrade(self),
        );
        let stale = {
            let mut state = self.lock_state();
            if self.is_destroyed() {
                Some(fresh)
            } else {
                state.registrations.replace(fresh)
            }
        };
        if let Some(stale) = stale {
            stale.dispose();
        }
        true
    }

    /// Socket close (or failed open) for connection `generation`
    fn handle_close(self: &Arc<Self>, generation: u64) {
        let weak = Arc::downgrade(self);
        let (session, attempt, delay) = {
            let mut state = self.lock_state();
            if state.generation != generation {
                debug!(generation, "close of superseded connection ignored");
                return;
            }

            let session = state.current.take();
            state.socket = None;
            if let Some(monitor) = state.health.take() {
                monitor.stop();
            }
            if self.is_destroyed() {
                (session, None, Duration::ZERO)
            } else {
                let attempt = state.scheduler.attempts();
                let delay = state
                    .scheduler
                    .schedule_retry(move |token| retry_fired(weak, token));
                (session, Some(attempt), delay)
            }
        };

        if let Some(session) = session {
            session.dispose();
        }
        if let Some(attempt) = attempt {
            info!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "connection closed, reconnect scheduled"
            );
        }
    }

    /// Arm the short fixed-delay reconnect. No-op when destroyed.
    pub(crate) fn force_reconnect(self: &Arc<Self>) {
        if self.is_destroyed() {
            return;
        }

        let weak = Arc::downgrade(self);
        let mut state = self.lock_state();
        if state.endpoint.is_none() {
            debug!("forced reconnect without endpoint ignored");
            return;
        }
        let delay = state
            .scheduler
            .schedule_forced(move |token| retry_fired(weak, token));
        drop(state);

        info!(delay_ms = delay.as_millis() as u64, "forced reconnect scheduled");
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        let (registrations, session, socket) = {
            let mut state = self.lock_state();
            state.generation += 1;
            state.scheduler.cancel();
            if let Some(task) = state.connection_task.take() {
                task.abort();
            }
            if let Some(monitor) = state.health.take() {
                monitor.stop();
            }
            (
                state.registrations.take(),
                state.current.take(),
                state.socket.take(),
            )
        };

        if let Some(registrations) = registrations {
            registrations.dispose();
        }
        if let Some(session) = session {
            session.dispose();
        }
        if let Some(socket) = socket {
            socket.close();
        }
        if let Ok(mut observer) = self.signature_observer.write() {
            observer.take();
        }

        info!("LSP client destroyed");
    }
}

/// Drive one connection attempt from open to close
async fn run_connection(
    weak: Weak<ClientInner>,
    connector: Arc<dyn Connector>,
    endpoint: String,
    generation: u64,
) {
    let transport = match connector.connect(&endpoint).await {
        Ok(transport) => transport,
        Err(e) => {
            warn!(%endpoint, "failed to open connection: {}", e);
            if let Some(client) = weak.upgrade() {
                client.handle_close(generation);
            }
            return;
        }
    };

    let socket = transport.socket.clone();
    let adopted = weak.upgrade().and_then(|client| {
        client
            .adopt_socket(generation, &socket)
            .map(|options| (options, client.config.handshake_timeout))
    });
    let Some((options, handshake_timeout)) = adopted else {
        socket.close();
        return;
    };

    let session = RpcSession::start(transport, options);
    match session.initialize(handshake_timeout).await {
        Ok(capabilities) => {
            let installed = weak
                .upgrade()
                .map(|client| client.on_session_ready(generation, &session, &capabilities))
                .unwrap_or(false);
            if !installed {
                session.dispose();
                socket.close();
                return;
            }
        }
        Err(e) => {
            warn!(%endpoint, "handshake failed: {}", e);
            session.dispose();
            socket.close();
            if let Some(client) = weak.upgrade() {
                client.handle_close(generation);
            }
            return;
        }
    }

    socket.closed().await;
    debug!(%endpoint, session = session.id(), "socket closed");
    if let Some(client) = weak.upgrade() {
        client.handle_close(generation);
    }
}

/// Body of every retry timer, backoff or forced
async fn retry_fired(weak: Weak<ClientInner>, token: RetryToken) {
    let Some(client) = weak.upgrade() else { return };

    let endpoint = {
        let mut state = client.lock_state();
        if !state.scheduler.complete(token) {
            return;
        }
        state.endpoint.clone()
    };

    if client.is_destroyed() {
        debug!("retry fired after destroy ignored");
        return;
    }

    match endpoint {
        Some(endpoint) => client.connect(endpoint),
        None => warn!("retry fired without an endpoint"),
    }
}
