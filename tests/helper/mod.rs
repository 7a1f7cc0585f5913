//! In-memory language server for integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::Instant;

use lsp_bridge::editor::ProviderRegistry;
use lsp_bridge::lsp::{
    pair, ClientConfig, Connector, LspClient, LspError, Outbound, PeerEnd, SocketState, Transport,
};

/// How the server answers one method
#[derive(Debug, Clone)]
pub enum Reply {
    Result(Value),
    Error { code: i32, message: String },
    /// Never answer
    Silent,
}

#[derive(Debug, Clone, Copy)]
enum Control {
    Kill,
    HalfClose,
}

#[derive(Default)]
struct ServerState {
    connect_times: Vec<Instant>,
    endpoints: Vec<String>,
    failures_remaining: usize,
    capabilities: Option<Value>,
    replies: HashMap<String, Reply>,
    received: Vec<Value>,
    connections: Vec<mpsc::UnboundedSender<Control>>,
}

/// Fake language server that doubles as the client's connector
#[derive(Clone, Default)]
pub struct FakeServer {
    state: Arc<Mutex<ServerState>>,
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ServerState> {
        self.state.lock().unwrap()
    }

    /// Refuse the next `n` connection attempts
    pub fn fail_next(&self, n: usize) {
        self.lock().failures_remaining = n;
    }

    pub fn set_capabilities(&self, capabilities: Value) {
        self.lock().capabilities = Some(capabilities);
    }

    pub fn reply(&self, method: &str, reply: Reply) {
        self.lock().replies.insert(method.to_string(), reply);
    }

    pub fn attempts(&self) -> usize {
        self.lock().connect_times.len()
    }

    pub fn connect_times(&self) -> Vec<Instant> {
        self.lock().connect_times.clone()
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.lock().endpoints.clone()
    }

    /// Every message received with the given method, oldest first
    pub fn received(&self, method: &str) -> Vec<Value> {
        self.lock()
            .received
            .iter()
            .filter(|m| m["method"] == method)
            .cloned()
            .collect()
    }

    /// Drop every live connection, as if the server went away
    pub fn kill_connections(&self) {
        self.broadcast(Control::Kill);
    }

    /// Leave connections half-closed: no longer open, never finished closing
    pub fn half_close_connections(&self) {
        self.broadcast(Control::HalfClose);
    }

    fn broadcast(&self, control: Control) {
        let mut state = self.lock();
        state.connections.retain(|tx| tx.send(control).is_ok());
    }
}

#[async_trait]
impl Connector for FakeServer {
    async fn connect(&self, endpoint: &str) -> Result<Transport, LspError> {
        let control_rx = {
            let mut state = self.lock();
            state.connect_times.push(Instant::now());
            state.endpoints.push(endpoint.to_string());
            if state.failures_remaining > 0 {
                state.failures_remaining -= 1;
                return Err(LspError::ConnectFailed(format!("{} refused", endpoint)));
            }
            let (tx, rx) = mpsc::unbounded_channel();
            state.connections.push(tx);
            rx
        };

        let (transport, peer) = pair(SocketState::Open);
        tokio::spawn(serve(peer, Arc::clone(&self.state), control_rx));
        Ok(transport)
    }
}

async fn serve(
    mut peer: PeerEnd,
    state: Arc<Mutex<ServerState>>,
    mut control: mpsc::UnboundedReceiver<Control>,
) {
    loop {
        tokio::select! {
            command = control.recv() => match command {
                Some(Control::HalfClose) => peer.set_state(SocketState::Closing),
                Some(Control::Kill) | None => break,
            },
            frame = peer.outbound.recv() => match frame {
                Some(Outbound::Text(text)) => {
                    let message: Value = serde_json::from_str(&text).unwrap();
                    let response = respond(&state, &message);
                    state.lock().unwrap().received.push(message);
                    if let Some(response) = response {
                        let _ = peer.incoming.send(response.to_string());
                    }
                }
                Some(Outbound::Close) | None => break,
            },
        }
    }
}

fn respond(state: &Mutex<ServerState>, message: &Value) -> Option<Value> {
    let id = message.get("id")?.clone();
    let method = message["method"].as_str()?;
    let state = state.lock().unwrap();

    let reply = match state.replies.get(method) {
        Some(reply) => reply.clone(),
        None if method == "initialize" => Reply::Result(json!({
            "capabilities": state.capabilities.clone().unwrap_or_else(default_capabilities)
        })),
        None => Reply::Result(Value::Null),
    };

    match reply {
        Reply::Result(result) => Some(json!({"jsonrpc": "2.0", "id": id, "result": result})),
        Reply::Error { code, message } => Some(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": code, "message": message}
        })),
        Reply::Silent => None,
    }
}

pub fn default_capabilities() -> Value {
    json!({
        "completionProvider": {"triggerCharacters": ["."]},
        "hoverProvider": true,
        "signatureHelpProvider": {"triggerCharacters": ["(", ","]}
    })
}

pub fn test_config() -> ClientConfig {
    ClientConfig::default()
}

/// Client wired to `server` and a fresh provider registry
pub fn create_client(server: &FakeServer) -> (LspClient, ProviderRegistry) {
    create_client_with(server, test_config())
}

pub fn create_client_with(server: &FakeServer, config: ClientConfig) -> (LspClient, ProviderRegistry) {
    let registry = ProviderRegistry::new();
    let client = LspClient::new(config, Arc::new(server.clone()), Arc::new(registry.clone()));
    (client, registry)
}

/// Let spawned tasks run without moving the paused clock meaningfully
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Poll `condition` every 10ms of (paused) time, up to `limit`
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Connect and wait for the handshake to finish
pub async fn connected_client(server: &FakeServer) -> (LspClient, ProviderRegistry) {
    let (client, registry) = create_client(server);
    client.connect("fake:2087");
    assert!(
        wait_until(Duration::from_secs(1), || client.is_connected()).await,
        "client never connected"
    );
    (client, registry)
}
