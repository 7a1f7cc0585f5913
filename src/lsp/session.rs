//! One JSON-RPC conversation with the server
//!
//! Handles JSON-RPC 2.0 request/notification/response multiplexing over a
//! single [`Socket`]. A session is bound to exactly one socket and is never
//! reused once that socket closes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::transport::{Socket, SocketState, Transport};
use super::types::{LspError, Position, ServerCapabilities};

pub type RequestId = i64;

type PendingMap = HashMap<RequestId, oneshot::Sender<Result<Value, LspError>>>;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Settings a session needs from its owner
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Sent as `languageId` on every didOpen
    pub language_id: String,
    pub request_timeout: Duration,
}

/// An RPC session over one socket
pub struct RpcSession {
    id: u64,
    socket: Socket,
    options: SessionOptions,
    next_request_id: AtomicI64,
    pending: Arc<Mutex<PendingMap>>,
    disposed: Arc<watch::Sender<bool>>,
    capabilities: RwLock<ServerCapabilities>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for RpcSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcSession")
            .field("id", &self.id)
            .field("socket", &self.socket.state())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl RpcSession {
    /// Bind a session to `transport` and start routing its inbound frames.
    pub fn start(transport: Transport, options: SessionOptions) -> Arc<Self> {
        let Transport { socket, incoming } = transport;
        let pending: Arc<Mutex<PendingMap>> = Arc::new(Mutex::new(HashMap::new()));
        let (disposed_tx, _) = watch::channel(false);
        let disposed = Arc::new(disposed_tx);

        let session = Arc::new(Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            socket: socket.clone(),
            options,
            next_request_id: AtomicI64::new(1),
            pending: Arc::clone(&pending),
            disposed: Arc::clone(&disposed),
            capabilities: RwLock::new(ServerCapabilities::default()),
            reader: Mutex::new(None),
        });

        let reader = tokio::spawn(read_loop(session.id, incoming, socket, pending, disposed));
        if let Ok(mut slot) = session.reader.lock() {
            *slot = Some(reader);
        }

        session
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn socket(&self) -> &Socket {
        &self.socket
    }

    pub fn is_disposed(&self) -> bool {
        *self.disposed.borrow()
    }

    /// Resolves once the session has been disposed, for any reason.
    pub async fn disposed(&self) {
        let mut rx = self.disposed.subscribe();
        let _ = rx.wait_for(|disposed| *disposed).await;
    }

    /// Report why the session cannot be used, if it cannot.
    pub fn inspect(&self) -> Result<(), LspError> {
        if self.is_disposed() {
            return Err(LspError::SessionDisposed);
        }
        match self.socket.state() {
            SocketState::Closing | SocketState::Closed => Err(LspError::ConnectionClosed),
            SocketState::Connecting | SocketState::Open => {
                // A poisoned tracker means the reader panicked mid-dispatch.
                self.pending
                    .lock()
                    .map(|_| ())
                    .map_err(|_| LspError::Io("pending request table poisoned".to_string()))
            }
        }
    }

    pub fn capabilities(&self) -> ServerCapabilities {
        self.capabilities
            .read()
            .map(|caps| caps.clone())
            .unwrap_or_default()
    }

    /// `initialize` followed by `initialized`; returns what the server advertised
    pub async fn initialize(&self, timeout: Duration) -> Result<ServerCapabilities, LspError> {
        let params = json!({
            "processId": std::process::id(),
            "rootUri": null,
            "capabilities": {
                "textDocument": {
                    "completion": {
                        "completionItem": {
                            "snippetSupport": true,
                            "documentationFormat": ["markdown", "plaintext"]
                        }
                    },
                    "hover": {
                        "contentFormat": ["markdown", "plaintext"]
                    },
                    "signatureHelp": {
                        "signatureInformation": {
                            "documentationFormat": ["markdown", "plaintext"],
                            "parameterInformation": {
                                "labelOffsetSupport": true
                            }
                        }
                    },
                    "synchronization": {
                        "didSave": false,
                        "dynamicRegistration": false
                    }
                },
                "workspace": {
                    "configuration": true,
                    "didChangeConfiguration": {
                        "dynamicRegistration": false
                    }
                }
            },
            "workspaceFolders": null
        });

        let response = tokio::time::timeout(timeout, self.send_request("initialize", params))
            .await
            .map_err(|_| LspError::InitializationFailed("initialize timed out".to_string()))?
            .map_err(|e| LspError::InitializationFailed(e.to_string()))?;

        let capabilities = ServerCapabilities::from_initialize_result(&response);
        if let Ok(mut caps) = self.capabilities.write() {
            *caps = capabilities.clone();
        }

        self.send_notification("initialized", json!({}))?;

        Ok(capabilities)
    }

    /// Send a request and wait for its response or the request timeout
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, LspError> {
        match tokio::time::timeout(self.options.request_timeout, self.send_request(method, params))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(LspError::Timeout),
        }
    }

    async fn send_request(&self, method: &str, params: Value) -> Result<Value, LspError> {
        self.inspect()?;

        let id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params
        });

        // Register before touching the wire so a fast response finds its slot
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .map_err(|_| LspError::SessionDisposed)?
            .insert(id, tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        debug!(session = self.id, id, method, "request");
        self.socket.send(serde_json::to_string(&request)?)?;

        rx.await.map_err(|_| LspError::SessionDisposed)?
    }

    pub fn send_notification(&self, method: &str, params: Value) -> Result<(), LspError> {
        self.inspect()?;

        let notification = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params
        });

        debug!(session = self.id, method, "notification");
        self.socket.send(serde_json::to_string(&notification)?)
    }

    /// Full-text didOpen, sent before every feature request
    pub fn did_open(&self, uri: &str, content: &str) -> Result<(), LspError> {
        self.send_notification(
            "textDocument/didOpen",
            json!({
                "textDocument": {
                    "uri": uri,
                    "languageId": self.options.language_id,
                    "version": 1,
                    "text": content
                }
            }),
        )
    }

    pub async fn completion(&self, uri: &str, position: Position) -> Result<Value, LspError> {
        self.request("textDocument/completion", position_params(uri, position))
            .await
    }

    pub async fn hover(&self, uri: &str, position: Position) -> Result<Value, LspError> {
        self.request("textDocument/hover", position_params(uri, position))
            .await
    }

    pub async fn signature_help(&self, uri: &str, position: Position) -> Result<Value, LspError> {
        self.request("textDocument/signatureHelp", position_params(uri, position))
            .await
    }

    /// Push new server settings
    pub fn did_change_configuration(&self, settings: Value) -> Result<(), LspError> {
        self.send_notification(
            "workspace/didChangeConfiguration",
            json!({ "settings": settings }),
        )
    }

    /// Stop routing responses and fail everything still waiting. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.send_replace(true) {
            return;
        }
        debug!(session = self.id, "session disposed");

        if let Ok(mut reader) = self.reader.lock() {
            if let Some(handle) = reader.take() {
                handle.abort();
            }
        }
        fail_pending(&self.pending, LspError::SessionDisposed);
    }
}

impl Drop for RpcSession {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Removes a request's slot when the caller stops waiting (timeout or drop)
struct PendingGuard<'a> {
    pending: &'a Mutex<PendingMap>,
    id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&self.id);
        }
    }
}

fn position_params(uri: &str, position: Position) -> Value {
    json!({
        "textDocument": { "uri": uri },
        "position": position
    })
}

fn fail_pending(pending: &Mutex<PendingMap>, error: LspError) {
    let drained: Vec<_> = match pending.lock() {
        Ok(mut pending) => pending.drain().collect(),
        Err(_) => return,
    };
    for (_, tx) in drained {
        let _ = tx.send(Err(error.clone()));
    }
}

/// Route inbound frames until the socket stops producing them.
async fn read_loop(
    session_id: u64,
    mut incoming: mpsc::UnboundedReceiver<String>,
    socket: Socket,
    pending: Arc<Mutex<PendingMap>>,
    disposed: Arc<watch::Sender<bool>>,
) {
    while let Some(text) = incoming.recv().await {
        let message: Value = match serde_json::from_str(&text) {
            Ok(message) => message,
            Err(e) => {
                warn!(session = session_id, "unparseable frame from server: {}", e);
                continue;
            }
        };
        dispatch(session_id, message, &socket, &pending);
    }

    debug!(session = session_id, "inbound stream ended");
    disposed.send_replace(true);
    fail_pending(&pending, LspError::ConnectionClosed);
}

fn dispatch(session_id: u64, message: Value, socket: &Socket, pending: &Mutex<PendingMap>) {
    let id = message.get("id").cloned().filter(|id| !id.is_null());
    let method = message.get("method").and_then(|m| m.as_str());

    match (id, method) {
        // Response to one of our requests
        (Some(id), None) => {
            let Some(id) = id.as_i64() else {
                debug!(session = session_id, "response with foreign id {}", id);
                return;
            };
            let waiter = pending.lock().ok().and_then(|mut p| p.remove(&id));
            let Some(waiter) = waiter else {
                debug!(session = session_id, id, "response for unknown request");
                return;
            };

            let result = match message.get("error") {
                Some(error) => {
                    let code = error.get("code").and_then(|v| v.as_i64()).unwrap_or(-1) as i32;
                    let message = error
                        .get("message")
                        .and_then(|v| v.as_str())
                        .unwrap_or("Unknown error")
                        .to_string();
                    Err(LspError::Rpc { code, message })
                }
                None => Ok(message.get("result").cloned().unwrap_or(Value::Null)),
            };
            let _ = waiter.send(result);
        }
        // Server-to-client request: answer so the server does not stall
        (Some(id), Some(method)) => {
            debug!(session = session_id, method, "answering server request with null");
            let reply = json!({ "jsonrpc": "2.0", "id": id, "result": null });
            if let Err(e) = socket.send(reply.to_string()) {
                debug!(session = session_id, "could not answer server request: {}", e);
            }
        }
        (None, Some(method)) => match method {
            "window/logMessage" | "window/showMessage" => {
                let text = message
                    .pointer("/params/message")
                    .and_then(|m| m.as_str())
                    .unwrap_or_default();
                debug!(session = session_id, "server: {}", text);
            }
            _ => debug!(session = session_id, method, "notification from server"),
        },
        (None, None) => debug!(session = session_id, "ignoring malformed message"),
    }
}
