//! Core ledger components
//!
//! This module contains the fundamental building blocks:
//! - Transactions (UTXO model with positional output pointers)
//! - Blocks (with proof of work)
//! - Blockchain (chain store, validation, difficulty retargeting)
//! - UTXO index (unspent outputs, ledgers, balances)
//! - Transaction builder (coin selection and signing)

pub mod block;
pub mod blockchain;
pub mod builder;
pub mod transaction;
mod utxo;

pub use block::{now_millis, Block, GENESIS_MINER_ID, GENESIS_TIMESTAMP};
pub use blockchain::{
    is_valid_sequence, Blockchain, ChainError, Replacement, BLOCK_INTERVAL, DEFAULT_DIFFICULTY,
    TARGET_TIMESPAN,
};
pub use builder::{create_transaction, TxError};
pub use transaction::{
    LedgerEntry, OutPoint, Transaction, TxIn, TxOut, UnspentTxOut, COINBASE_REWARD,
};
