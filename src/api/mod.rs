//! REST API module
//!
//! # Endpoints
//!
//! ## Node
//! - `GET /` - Node status
//! - `GET /startMining`, `GET /stopMining` - Toggle the mining loop
//! - `GET /quit` - Shut the node down
//!
//! ## Blocks
//! - `GET /block-idx/{index}` - Block by index
//! - `GET /block-idx/{index}/details` - Block with resolved inputs
//!
//! ## Peers
//! - `GET /addPeer/{address}` - Connect to a peer
//! - `GET /peers` - Connected peers
//!
//! ## Accounts
//! - `GET /api/balance/{address}`, `GET /api/ledger/{address}`,
//!   `GET /api/unspent/{address}`
//! - `GET /api/transactions/{txid}` - Locate a mined transaction
//! - `POST /api/transactions` - Build and queue a transaction

pub mod handlers;
pub mod routes;

pub use handlers::ApiState;
pub use routes::create_router;
