//! WebSocket connector
//!
//! Each JSON-RPC message travels as one text frame; there is no
//! Content-Length framing on this transport.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::{Message, WebSocketConfig};
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::transport::{pair, Connector, Outbound, PeerEnd, SocketState, Transport};
use super::types::LspError;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Build the socket URL for a `host:port` endpoint.
pub fn endpoint_url(endpoint: &str) -> String {
    let endpoint = endpoint.trim();
    if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
        endpoint.to_string()
    } else {
        format!("ws://{}", endpoint)
    }
}

/// Opens language-server sockets over WebSocket
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, endpoint: &str) -> Result<Transport, LspError> {
        let url = endpoint_url(endpoint);
        let (transport, peer) = pair(SocketState::Connecting);

        // Large completion lists and hover docs can exceed the 16MB default
        let ws_config = WebSocketConfig {
            max_message_size: Some(64 * 1024 * 1024),
            max_frame_size: Some(64 * 1024 * 1024),
            ..Default::default()
        };

        let (stream, _) = connect_async_with_config(url.as_str(), Some(ws_config), false)
            .await
            .map_err(|e| {
                peer.mark_closed();
                LspError::ConnectFailed(format!("{}: {}", url, e))
            })?;

        info!(%url, "websocket open");
        peer.mark_open();
        tokio::spawn(pump(stream, peer));

        Ok(transport)
    }
}

/// Move frames between the WebSocket and the peer half until either side
/// goes away. The socket is marked closed when this returns.
async fn pump(stream: WsStream, mut peer: PeerEnd) {
    let (mut sink, mut source) = stream.split();

    loop {
        tokio::select! {
            frame = source.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if peer.incoming.send(text).is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => {
                            if peer.incoming.send(text).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("dropping non-utf8 binary frame: {}", e),
                    },
                    Some(Ok(Message::Close(_))) => {
                        debug!("server sent close frame");
                        break;
                    }
                    Some(Ok(_)) => {
                        // Ping/Pong - tungstenite answers pings itself
                    }
                    Some(Err(e)) => {
                        warn!("websocket read error: {}", e);
                        break;
                    }
                    None => {
                        debug!("websocket stream ended");
                        break;
                    }
                }
            }

            outbound = peer.outbound.recv() => {
                match outbound {
                    Some(Outbound::Text(text)) => {
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            warn!("websocket write error: {}", e);
                            break;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let _ = sink.send(Message::Close(None)).await;
                        let _ = sink.close().await;
                        break;
                    }
                }
            }
        }
    }

    peer.mark_closed();
    debug!("websocket pump exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_gets_ws_scheme() {
        assert_eq!(endpoint_url("localhost:2087"), "ws://localhost:2087");
        assert_eq!(endpoint_url(" 127.0.0.1:9000 "), "ws://127.0.0.1:9000");
        assert_eq!(endpoint_url("wss://lsp.example:443"), "wss://lsp.example:443");
    }

    #[tokio::test]
    async fn unreachable_endpoint_fails_to_connect() {
        // Port 9 (discard) on loopback is not expected to speak WebSocket.
        let result = WsConnector::new().connect("127.0.0.1:9").await;
        assert!(matches!(result, Err(LspError::ConnectFailed(_))));
    }
}
