//! WebSocket server and connection handling
//!
//! Accepts incoming peer connections, opens outgoing ones and pumps text
//! frames between each socket and the node's message channel.

use crate::network::peer::{
    ConnectionId, PeerError, PeerManager, PeerMessage, Role, PEER_CHANNEL_CAPACITY,
};
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// TCP listener for peer WebSocket connections
pub struct Server {
    listener: TcpListener,
}

impl Server {
    /// Bind to a port and create the server
    pub async fn bind(port: u16) -> Result<Self, std::io::Error> {
        let addr = format!("0.0.0.0:{}", port);
        let listener = TcpListener::bind(&addr).await?;
        log::info!("Peer server listening on {}", addr);
        Ok(Self { listener })
    }

    /// Actual listening address (useful when bound to port 0)
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    /// Accept one TCP connection and complete the WebSocket handshake
    pub async fn accept(&self) -> Result<(WebSocketStream<TcpStream>, SocketAddr), PeerError> {
        let (stream, addr) = self.listener.accept().await?;
        let ws = tokio_tungstenite::accept_async(stream).await?;
        Ok((ws, addr))
    }
}

/// Normalize a peer address into a `ws://` URL
pub fn peer_url(addr: &str) -> String {
    let addr = addr.trim();
    if addr.starts_with("ws://") || addr.starts_with("wss://") {
        addr.to_string()
    } else {
        format!("ws://{}", addr)
    }
}

/// Connect to a peer's WebSocket server
pub async fn connect_to_peer(
    url: &str,
) -> Result<WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>, PeerError> {
    let (ws, _response) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| PeerError::ConnectionFailed(format!("{}: {}", url, e)))?;
    Ok(ws)
}

/// Register a connection and spawn its reader and writer tasks.
///
/// Received text frames are forwarded to `message_tx`; frames queued for
/// the returned connection id are written to the socket. The connection
/// is removed from `peer_manager` when either side closes.
pub async fn handle_connection<S>(
    ws: WebSocketStream<S>,
    addr: String,
    role: Role,
    peer_manager: Arc<PeerManager>,
    message_tx: mpsc::Sender<PeerMessage>,
) -> Result<ConnectionId, PeerError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut writer, mut reader) = ws.split();

    // Channel for sending to this peer
    let (tx, mut rx) = mpsc::channel::<String>(PEER_CHANNEL_CAPACITY);
    let id = peer_manager.add_peer(addr.clone(), role, tx).await?;

    let mut write_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if writer.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = writer.close().await;
    });

    let read_addr = addr.clone();
    let mut read_task = tokio::spawn(async move {
        while let Some(frame) = reader.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    let message = PeerMessage {
                        from: id,
                        role,
                        text: text.as_str().to_owned(),
                    };
                    if message_tx.send(message).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(other) => {
                    log::trace!("Ignoring non-text frame from {}: {:?}", read_addr, other);
                }
                Err(e) => {
                    log::warn!("Error reading from {}: {}", read_addr, e);
                    break;
                }
            }
        }
    });

    tokio::spawn(async move {
        tokio::select! {
            _ = &mut write_task => read_task.abort(),
            _ = &mut read_task => write_task.abort(),
        }
        log::info!("Peer {} disconnected", addr);
        peer_manager.remove_peer(id).await;
    });

    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_peer_url() {
        assert_eq!(peer_url("10.0.0.1:8181"), "ws://10.0.0.1:8181");
        assert_eq!(peer_url(" ws://host:1 "), "ws://host:1");
    }

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let server = Server::bind(0).await.unwrap();
        let port = server.local_addr().unwrap().port();

        let server_peers = Arc::new(PeerManager::new());
        let (server_tx, mut server_rx) = mpsc::channel(8);
        let accept_peers = Arc::clone(&server_peers);
        let accept = tokio::spawn(async move {
            let (ws, addr) = server.accept().await.unwrap();
            handle_connection(ws, addr.to_string(), Role::Inbound, accept_peers, server_tx)
                .await
                .unwrap()
        });

        let client_peers = Arc::new(PeerManager::new());
        let (client_tx, mut client_rx) = mpsc::channel(8);
        let ws = connect_to_peer(&peer_url(&format!("127.0.0.1:{port}")))
            .await
            .unwrap();
        let client_id = handle_connection(
            ws,
            "server".into(),
            Role::Outbound,
            Arc::clone(&client_peers),
            client_tx,
        )
        .await
        .unwrap();
        let server_id = accept.await.unwrap();

        client_peers
            .send_to(client_id, r#"{"message":"summary"}"#.into())
            .await
            .unwrap();
        let received = tokio::time::timeout(Duration::from_secs(5), server_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.role, Role::Inbound);
        assert_eq!(received.text, r#"{"message":"summary"}"#);

        server_peers.broadcast("pong".into()).await;
        let received = tokio::time::timeout(Duration::from_secs(5), client_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.from, client_id);
        assert_eq!(received.role, Role::Outbound);
        assert_eq!(received.text, "pong");
        let peers = server_peers.get_all_peer_info().await;
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].id, server_id);
        assert_eq!(peers[0].role, Role::Inbound);
    }
}
