//! Transaction handling for the ledger
//!
//! Implements the UTXO transaction model. Inputs point at earlier outputs by
//! position, `(blockIndex, txIndex, txOutIndex)`, rather than by transaction
//! id, so a transaction id only has to be unique inside its block.

use crate::crypto::sha256_hex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Write as _;

/// Amount minted by every coinbase transaction
pub const COINBASE_REWARD: f64 = 57.00;

// =============================================================================
// Output pointer
// =============================================================================

/// Position of an output inside the chain; the identity of an unspent output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutPoint {
    pub block_index: u64,
    pub tx_index: u64,
    pub tx_out_index: u64,
}

impl OutPoint {
    pub fn new(block_index: u64, tx_index: u64, tx_out_index: u64) -> Self {
        Self {
            block_index,
            tx_index,
            tx_out_index,
        }
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.block_index, self.tx_index, self.tx_out_index)
    }
}

// =============================================================================
// Transaction Input
// =============================================================================

/// Transaction input (reference to a previous output)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxIn {
    pub block_index: u64,
    pub tx_index: u64,
    pub tx_out_index: u64,
    /// Authorizes the spend; empty only for coinbase inputs
    pub signature: String,
    /// Address of the spent output, filled in by block detail resolution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Amount of the spent output, filled in by block detail resolution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
}

impl TxIn {
    pub fn new(out_point: OutPoint, signature: impl Into<String>) -> Self {
        Self {
            block_index: out_point.block_index,
            tx_index: out_point.tx_index,
            tx_out_index: out_point.tx_out_index,
            signature: signature.into(),
            address: None,
            amount: None,
        }
    }

    pub fn out_point(&self) -> OutPoint {
        OutPoint::new(self.block_index, self.tx_index, self.tx_out_index)
    }
}

// =============================================================================
// Transaction Output
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxOut {
    /// Recipient's address (derived from a public key)
    pub address: String,
    pub amount: f64,
}

impl TxOut {
    pub fn new(address: impl Into<String>, amount: f64) -> Self {
        Self {
            address: address.into(),
            amount,
        }
    }
}

// =============================================================================
// Transaction
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Hash of the inputs, outputs and containing block index
    pub id: String,
    pub tx_ins: Vec<TxIn>,
    pub tx_outs: Vec<TxOut>,
}

impl Transaction {
    pub fn new(tx_ins: Vec<TxIn>, tx_outs: Vec<TxOut>) -> Self {
        Self {
            id: String::new(),
            tx_ins,
            tx_outs,
        }
    }

    /// Create the reward transaction for block `block_index`.
    ///
    /// Its single input points at its own output and carries no signature.
    pub fn coinbase(block_index: u64, address: &str) -> Self {
        let mut tx = Self::new(
            vec![TxIn::new(OutPoint::new(block_index, 0, 0), "")],
            vec![TxOut::new(address, COINBASE_REWARD)],
        );
        tx.assign_id(block_index);
        tx
    }

    /// Exactly one unsigned input and exactly one output
    pub fn is_coinbase(&self) -> bool {
        self.tx_outs.len() == 1 && self.tx_ins.len() == 1 && self.tx_ins[0].signature.is_empty()
    }

    pub fn calculate_id(&self, block_index: u64) -> String {
        let mut payload = block_index.to_string();
        for txin in &self.tx_ins {
            let _ = write!(payload, "|{}", txin.out_point());
        }
        for txout in &self.tx_outs {
            let _ = write!(payload, "|{}:{}", txout.address, txout.amount);
        }
        sha256_hex(payload.as_bytes())
    }

    /// Give the transaction an id scoped to the block that will contain it
    pub fn assign_id(&mut self, block_index: u64) {
        self.id = self.calculate_id(block_index);
    }

    /// Canonical content fed into the containing block's hash
    pub(crate) fn write_hash_payload(&self, payload: &mut String) {
        let _ = write!(payload, "[{}", self.id);
        for txin in &self.tx_ins {
            let _ = write!(payload, "|{}:{}", txin.out_point(), txin.signature);
        }
        for txout in &self.tx_outs {
            let _ = write!(payload, "|{}:{}", txout.address, txout.amount);
        }
        payload.push(']');
    }
}

// =============================================================================
// Derived values
// =============================================================================

/// A currently unspent output, materialized by the UTXO index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnspentTxOut {
    pub block_index: u64,
    pub tx_index: u64,
    pub tx_out_index: u64,
    pub address: String,
    pub amount: f64,
}

impl UnspentTxOut {
    pub fn out_point(&self) -> OutPoint {
        OutPoint::new(self.block_index, self.tx_index, self.tx_out_index)
    }
}

/// One accounting line for an address.
/// Positive amounts are credits, negative amounts are net debits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub txid: String,
    pub block_index: u64,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
    pub amount: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coinbase_transaction() {
        let tx = Transaction::coinbase(7, "miner");
        assert!(tx.is_coinbase());
        assert_eq!(tx.tx_ins[0].out_point(), OutPoint::new(7, 0, 0));
        assert_eq!(tx.tx_outs[0].amount, COINBASE_REWARD);
        assert_eq!(tx.id, tx.calculate_id(7));
    }

    #[test]
    fn test_signed_input_is_not_coinbase() {
        let tx = Transaction::new(
            vec![TxIn::new(OutPoint::new(1, 0, 0), "sig")],
            vec![TxOut::new("bob", 5.0)],
        );
        assert!(!tx.is_coinbase());

        let two_outputs = Transaction::new(
            vec![TxIn::new(OutPoint::new(1, 0, 0), "")],
            vec![TxOut::new("bob", 5.0), TxOut::new("alice", 1.0)],
        );
        assert!(!two_outputs.is_coinbase());
    }

    #[test]
    fn test_id_depends_on_block_index() {
        let tx = Transaction::new(
            vec![TxIn::new(OutPoint::new(1, 0, 0), "sig")],
            vec![TxOut::new("bob", 5.0)],
        );
        assert_ne!(tx.calculate_id(2), tx.calculate_id(3));
        assert_eq!(tx.calculate_id(2), tx.calculate_id(2));
    }

    #[test]
    fn test_unresolved_fields_are_omitted_from_json() {
        let txin = TxIn::new(OutPoint::new(3, 1, 0), "sig");
        let json = serde_json::to_string(&txin).unwrap();
        assert_eq!(
            json,
            r#"{"blockIndex":3,"txIndex":1,"txOutIndex":0,"signature":"sig"}"#
        );
        let decoded: TxIn = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, txin);
    }

    #[test]
    fn test_out_point_ordering_follows_chain_position() {
        let mut points = vec![
            OutPoint::new(2, 0, 0),
            OutPoint::new(1, 1, 0),
            OutPoint::new(1, 0, 1),
        ];
        points.sort();
        assert_eq!(points[0], OutPoint::new(1, 0, 1));
        assert_eq!(points[2], OutPoint::new(2, 0, 0));
    }
}
