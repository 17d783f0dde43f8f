//! P2P Networking module
//!
//! Peers exchange JSON text frames over WebSocket connections. A node
//! announces its chain summary and pulls block ranges from peers with a
//! heavier chain.

pub mod message;
pub mod node;
pub mod peer;
pub mod server;
pub mod sync;

pub use message::{BlockRange, EnvelopeError, Frame, Request, Response};
pub use node::{Node, NodeConfig, NodeStatus};
pub use peer::{ConnectionId, PeerError, PeerInfo, PeerManager, PeerMessage, Role, MAX_PEERS};
pub use server::{connect_to_peer, handle_connection, peer_url, Server};
pub use sync::{ReconcileOutcome, Reconciler, SummaryAction};
