//! Duplex text transport to a language server
//!
//! A [`Socket`] is the client-side handle of one connection attempt. The
//! other half, [`PeerEnd`], is driven by whatever actually moves the bytes
//! (the WebSocket pump in production, an in-memory server in tests).

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use super::types::LspError;

/// Lifecycle of a single socket. Never goes backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Frames queued for the peer
#[derive(Debug)]
pub enum Outbound {
    Text(String),
    Close,
}

/// Client-side handle of one connection
#[derive(Clone)]
pub struct Socket {
    outbound: mpsc::UnboundedSender<Outbound>,
    state: Arc<watch::Sender<SocketState>>,
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket").field("state", &self.state()).finish()
    }
}

impl Socket {
    pub fn state(&self) -> SocketState {
        *self.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == SocketState::Open
    }

    /// Queue a text frame. Fails once the socket has left the open state.
    pub fn send(&self, text: String) -> Result<(), LspError> {
        if !self.is_open() {
            return Err(LspError::ConnectionClosed);
        }
        self.outbound
            .send(Outbound::Text(text))
            .map_err(|_| LspError::ConnectionClosed)
    }

    /// Ask the peer to close. Safe to call repeatedly.
    pub fn close(&self) {
        let requested = self.state.send_if_modified(|state| match state {
            SocketState::Connecting | SocketState::Open => {
                *state = SocketState::Closing;
                true
            }
            SocketState::Closing | SocketState::Closed => false,
        });
        if requested {
            let _ = self.outbound.send(Outbound::Close);
        }
    }

    /// Resolves once the socket reaches [`SocketState::Closed`].
    pub async fn closed(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| *state == SocketState::Closed).await;
    }
}

/// Peer half of a socket: receives what the client sends, feeds what the
/// server answers. Dropping it closes the socket.
pub struct PeerEnd {
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
    pub incoming: mpsc::UnboundedSender<String>,
    state: Arc<watch::Sender<SocketState>>,
}

impl PeerEnd {
    pub fn state(&self) -> SocketState {
        *self.state.borrow()
    }

    pub fn set_state(&self, next: SocketState) {
        self.state.send_if_modified(|state| {
            if *state == SocketState::Closed || *state == next {
                return false;
            }
            *state = next;
            true
        });
    }

    pub fn mark_open(&self) {
        self.set_state(SocketState::Open);
    }

    pub fn mark_closed(&self) {
        self.set_state(SocketState::Closed);
    }
}

impl Drop for PeerEnd {
    fn drop(&mut self) {
        self.mark_closed();
    }
}

/// A connected socket plus the stream of frames the server sends
pub struct Transport {
    pub socket: Socket,
    pub incoming: mpsc::UnboundedReceiver<String>,
}

/// Create a linked transport / peer pair starting in `initial` state.
pub fn pair(initial: SocketState) -> (Transport, PeerEnd) {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
    let (state_tx, _) = watch::channel(initial);
    let state = Arc::new(state_tx);

    let transport = Transport {
        socket: Socket {
            outbound: outbound_tx,
            state: Arc::clone(&state),
        },
        incoming: incoming_rx,
    };
    let peer = PeerEnd {
        outbound: outbound_rx,
        incoming: incoming_tx,
        state,
    };
    (transport, peer)
}

/// Opens transports to a `host:port` endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &str) -> Result<Transport, LspError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_requires_open_socket() {
        let (transport, mut peer) = pair(SocketState::Connecting);
        assert!(transport.socket.send("x".to_string()).is_err());

        peer.mark_open();
        transport.socket.send("hello".to_string()).unwrap();
        match peer.outbound.recv().await {
            Some(Outbound::Text(text)) => assert_eq!(text, "hello"),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn close_is_requested_once_and_closed_resolves() {
        let (transport, mut peer) = pair(SocketState::Open);
        transport.socket.close();
        transport.socket.close();
        assert_eq!(transport.socket.state(), SocketState::Closing);

        assert!(matches!(peer.outbound.recv().await, Some(Outbound::Close)));
        assert!(peer.outbound.try_recv().is_err());

        drop(peer);
        transport.socket.closed().await;
        assert_eq!(transport.socket.state(), SocketState::Closed);
    }

    #[test]
    fn closed_state_is_terminal() {
        let (transport, peer) = pair(SocketState::Open);
        peer.mark_closed();
        peer.mark_open();
        assert_eq!(transport.socket.state(), SocketState::Closed);
    }
}
