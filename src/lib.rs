//! ashchain: a minimal proof-of-work cryptocurrency node
//!
//! This crate provides:
//! - A chain store with hash-linked, proof-of-work blocks and periodic
//!   difficulty retargeting
//! - A positional UTXO model with ledgers, balances and a greedy
//!   transaction builder
//! - An abortable miner driven by a background mining loop
//! - Weight-based reconciliation with peers over WebSocket
//! - A file-per-block JSON store and a REST API
//!
//! # Example
//!
//! ```rust
//! use ashchain::core::{create_transaction, Blockchain};
//! use ashchain::crypto::KeyPair;
//! use ashchain::mining::{MineOutcome, Miner};
//!
//! let mut chain = Blockchain::new();
//! let key = KeyPair::generate();
//!
//! // Mine a block paying the key's address
//! let miner = Miner::new("doc-miner", 4);
//! let tail = chain.tail().unwrap().clone();
//! let txs = chain.drain_for_next_block(tail.index + 1, &key.address());
//! if let MineOutcome::Mined(block, stats) = miner.mine_block(tail.index + 1, txs, tail.hash) {
//!     println!("Mined block {} in {}ms", block.index, stats.time_ms);
//!     chain.append(block).unwrap();
//! }
//!
//! // Spend part of the reward
//! let tx = create_transaction(&chain, &key.private_key_hex(), "receiver", 20.0).unwrap();
//! chain.queue_transaction(tx);
//! println!("Balance: {} coins", chain.balance_of(&key.address()));
//! ```

pub mod api;
pub mod config;
pub mod core;
pub mod crypto;
pub mod mining;
pub mod network;
pub mod storage;

// Re-export commonly used types
pub use api::{create_router, ApiState};
pub use config::Settings;
pub use core::{
    create_transaction, Block, Blockchain, Transaction, TxError, UnspentTxOut, COINBASE_REWARD,
    DEFAULT_DIFFICULTY,
};
pub use crypto::KeyPair;
pub use mining::{MineOutcome, Miner};
pub use network::{Node, NodeConfig};
pub use storage::{ChainDatabase, JsonStore};
