//! LSP client for the editor bridge
//!
//! Speaks JSON-RPC to a language server over a WebSocket and keeps that
//! connection alive: handshake, health checks, backoff reconnects. The
//! editor's completion, hover and signature help providers sit on top and
//! always go through whichever session is current.

mod client;
mod health;
pub mod providers;
mod reconnect;
pub mod session;
pub mod transport;
pub mod types;
mod validity;
pub mod ws;

pub use client::{ClientConfig, LspClient, SignatureHelpObserver};
pub use health::HealthMonitor;
pub use providers::{CompletionProvider, HoverProvider, SignatureHelpProvider, Snippet};
pub use reconnect::{Backoff, ReconnectScheduler, RetryToken};
pub use session::{RpcSession, SessionOptions};
pub use transport::{pair, Connector, Outbound, PeerEnd, Socket, SocketState, Transport};
pub use types::{LspError, Position, ServerCapabilities};
pub use ws::WsConnector;
