//! Peer management for P2P networking
//!
//! Tracks open WebSocket connections and routes outgoing text frames to
//! them.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};

/// Maximum number of connected peers
pub const MAX_PEERS: usize = 16;

/// Outgoing frames buffered per peer before senders wait
pub const PEER_CHANNEL_CAPACITY: usize = 100;

/// Peer connection errors
#[derive(Error, Debug)]
pub enum PeerError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Peer disconnected")]
    Disconnected,
    #[error("Max peers reached")]
    MaxPeersReached,
}

/// Identifier of one open connection
pub type ConnectionId = u64;

/// Which side opened the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The peer connected to our server
    Inbound,
    /// We connected to the peer
    Outbound,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Inbound => write!(f, "inbound"),
            Role::Outbound => write!(f, "outbound"),
        }
    }
}

/// A text frame received from a peer
#[derive(Debug, Clone)]
pub struct PeerMessage {
    pub from: ConnectionId,
    pub role: Role,
    pub text: String,
}

/// Information about a connected peer
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub id: ConnectionId,
    pub addr: String,
    pub role: Role,
}

/// Handle for sending frames to a peer
#[derive(Clone)]
pub struct PeerHandle {
    pub info: PeerInfo,
    tx: mpsc::Sender<String>,
}

impl PeerHandle {
    pub async fn send(&self, text: String) -> Result<(), PeerError> {
        self.tx.send(text).await.map_err(|_| PeerError::Disconnected)
    }
}

/// Manages all peer connections
#[derive(Default)]
pub struct PeerManager {
    handles: RwLock<HashMap<ConnectionId, PeerHandle>>,
    next_id: AtomicU64,
}

impl PeerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection whose writer drains `tx`
    pub async fn add_peer(
        &self,
        addr: String,
        role: Role,
        tx: mpsc::Sender<String>,
    ) -> Result<ConnectionId, PeerError> {
        let mut handles = self.handles.write().await;
        if handles.len() >= MAX_PEERS {
            return Err(PeerError::MaxPeersReached);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        log::info!("Added peer {} ({}, connection {})", addr, role, id);
        handles.insert(
            id,
            PeerHandle {
                info: PeerInfo { id, addr, role },
                tx,
            },
        );
        Ok(id)
    }

    pub async fn remove_peer(&self, id: ConnectionId) {
        if let Some(handle) = self.handles.write().await.remove(&id) {
            log::info!("Removed peer {} (connection {})", handle.info.addr, id);
        }
    }

    pub async fn peer_count(&self) -> usize {
        self.handles.read().await.len()
    }

    pub async fn get_all_peer_info(&self) -> Vec<PeerInfo> {
        let handles = self.handles.read().await;
        let mut peers: Vec<_> = handles.values().map(|h| h.info.clone()).collect();
        peers.sort_by_key(|p| p.id);
        peers
    }

    /// Send a frame to one connection
    pub async fn send_to(&self, id: ConnectionId, text: String) -> Result<(), PeerError> {
        let handle = self.handles.read().await.get(&id).cloned();
        match handle {
            Some(handle) => handle.send(text).await,
            None => Err(PeerError::Disconnected),
        }
    }

    /// Send a frame to every connection
    pub async fn broadcast(&self, text: String) {
        let handles: Vec<PeerHandle> = self.handles.read().await.values().cloned().collect();
        for handle in handles {
            if let Err(e) = handle.send(text.clone()).await {
                log::warn!("Failed to send to {}: {}", handle.info.addr, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_and_broadcast() {
        let manager = PeerManager::new();
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);

        let a = manager
            .add_peer("127.0.0.1:1".into(), Role::Inbound, tx_a)
            .await
            .unwrap();
        let b = manager
            .add_peer("127.0.0.1:2".into(), Role::Outbound, tx_b)
            .await
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(manager.peer_count().await, 2);

        manager.send_to(a, "direct".into()).await.unwrap();
        manager.broadcast("all".into()).await;

        assert_eq!(rx_a.recv().await.unwrap(), "direct");
        assert_eq!(rx_a.recv().await.unwrap(), "all");
        assert_eq!(rx_b.recv().await.unwrap(), "all");
    }

    #[tokio::test]
    async fn test_removed_peer_is_disconnected() {
        let manager = PeerManager::new();
        let (tx, _rx) = mpsc::channel(4);
        let id = manager
            .add_peer("127.0.0.1:1".into(), Role::Inbound, tx)
            .await
            .unwrap();

        manager.remove_peer(id).await;
        assert_eq!(manager.peer_count().await, 0);
        assert!(matches!(
            manager.send_to(id, "x".into()).await,
            Err(PeerError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_max_peers() {
        let manager = PeerManager::new();
        let mut receivers = Vec::new();
        for i in 0..MAX_PEERS {
            let (tx, rx) = mpsc::channel(1);
            receivers.push(rx);
            manager
                .add_peer(format!("127.0.0.1:{i}"), Role::Inbound, tx)
                .await
                .unwrap();
        }
        let (tx, _rx) = mpsc::channel(1);
        assert!(matches!(
            manager.add_peer("127.0.0.1:99".into(), Role::Inbound, tx).await,
            Err(PeerError::MaxPeersReached)
        ));
    }
}
