//! Block implementation
//!
//! A block carries its position in the chain, the link to its predecessor,
//! the proof-of-work fields and an ordered list of transactions. The order
//! of transactions is part of the hashed content.

use crate::core::transaction::Transaction;
use crate::crypto::{hex_meets_difficulty, sha256_hex};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Fixed creation time of the genesis block (2020-01-01T00:00:00Z)
pub const GENESIS_TIMESTAMP: u64 = 1_577_836_800_000;

/// Miner id recorded in the genesis block
pub const GENESIS_MINER_ID: &str = "genesis";

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default()
}

/// A block in the chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub index: u64,
    /// Empty for the genesis block
    pub previous_hash: String,
    pub hash: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
    /// Leading zero bits required of `hash`
    pub difficulty: u32,
    pub nonce: u64,
    pub miner_id: String,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Create an unmined block stamped with the current time
    pub fn new(
        index: u64,
        previous_hash: String,
        transactions: Vec<Transaction>,
        difficulty: u32,
        miner_id: &str,
    ) -> Self {
        Self::with_timestamp(
            index,
            previous_hash,
            now_millis(),
            transactions,
            difficulty,
            miner_id,
        )
    }

    /// Create a block with an explicit timestamp and nonce 0.
    ///
    /// The hash is consistent with the content but is not checked against
    /// `difficulty`, so with a non-zero difficulty this only yields a valid
    /// block once mined.
    pub fn with_timestamp(
        index: u64,
        previous_hash: String,
        timestamp: u64,
        transactions: Vec<Transaction>,
        difficulty: u32,
        miner_id: &str,
    ) -> Self {
        let mut block = Self {
            index,
            previous_hash,
            hash: String::new(),
            timestamp,
            difficulty,
            nonce: 0,
            miner_id: miner_id.to_string(),
            transactions,
        };
        block.hash = block.calculate_hash();
        block
    }

    /// The genesis block, identical on every node
    pub fn genesis() -> Self {
        Self::with_timestamp(0, String::new(), GENESIS_TIMESTAMP, vec![], 0, GENESIS_MINER_ID)
    }

    /// Digest of the ordered transaction list.
    /// Constant while mining, so the miner computes it once per candidate.
    pub fn transactions_digest(&self) -> String {
        let mut payload = String::new();
        for tx in &self.transactions {
            tx.write_hash_payload(&mut payload);
        }
        sha256_hex(payload.as_bytes())
    }

    /// Hash of the block for a given nonce and transaction digest
    pub fn hash_with(&self, nonce: u64, transactions_digest: &str) -> String {
        let data = format!(
            "{}:{}:{}:{}:{}:{}",
            self.index,
            self.previous_hash,
            self.timestamp,
            self.difficulty,
            nonce,
            transactions_digest
        );
        sha256_hex(data.as_bytes())
    }

    pub fn calculate_hash(&self) -> String {
        self.hash_with(self.nonce, &self.transactions_digest())
    }

    /// Check that the stored hash matches the content
    pub fn verify_hash(&self) -> bool {
        self.hash == self.calculate_hash()
    }

    /// Check that the stored hash has enough leading zero bits
    pub fn is_valid_pow(&self) -> bool {
        hex_meets_difficulty(&self.hash, self.difficulty)
    }
}
