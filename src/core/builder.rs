//! Transaction construction
//!
//! Turns a payment request into a signed transaction by selecting unspent
//! outputs of the sender in chain scan order.

use crate::core::blockchain::Blockchain;
use crate::core::transaction::{Transaction, TxIn, TxOut, UnspentTxOut};
use crate::crypto::{KeyError, KeyPair};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TxError {
    #[error("Sender and receiver are the same address")]
    NoopTransaction,
    #[error("No unspent outputs for {address}")]
    NoFunds { address: String },
    #[error("Insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: f64, available: f64 },
    #[error("Amount must be a positive number, got {0}")]
    InvalidAmount(f64),
    #[error("Invalid private key: {0}")]
    InvalidKey(#[from] KeyError),
}

/// Build a transaction paying `amount` from the owner of
/// `sender_private_key` to `receiver`.
///
/// Outputs are consumed greedily in the order [`Blockchain::compute_unspent`]
/// returns them. Any surplus goes back to the sender as a change output.
/// The transaction id is left empty; it is assigned once the transaction
/// is placed in a block.
pub fn create_transaction(
    chain: &Blockchain,
    sender_private_key: &str,
    receiver: &str,
    amount: f64,
) -> Result<Transaction, TxError> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(TxError::InvalidAmount(amount));
    }

    let key_pair = KeyPair::from_private_key_hex(sender_private_key)?;
    let sender = key_pair.address();
    if receiver.eq_ignore_ascii_case(&sender) {
        return Err(TxError::NoopTransaction);
    }

    let unspent = chain.compute_unspent(&sender);
    if unspent.is_empty() {
        return Err(TxError::NoFunds { address: sender });
    }

    let (selected, accumulated) = select_outputs(&unspent, amount);
    if accumulated < amount {
        return Err(TxError::InsufficientFunds {
            requested: amount,
            available: accumulated,
        });
    }

    let mut tx_ins = Vec::with_capacity(selected.len());
    for utxo in selected {
        let point = utxo.out_point();
        let signature = key_pair.sign(point.to_string().as_bytes())?;
        tx_ins.push(TxIn::new(point, hex::encode(signature)));
    }

    let mut tx_outs = vec![TxOut::new(receiver, amount)];
    if accumulated > amount {
        tx_outs.push(TxOut::new(sender.as_str(), accumulated - amount));
    }

    log::debug!(
        "Built transaction {} -> {} for {} using {} input(s)",
        sender,
        receiver,
        amount,
        tx_ins.len()
    );

    Ok(Transaction::new(tx_ins, tx_outs))
}

/// Take outputs in order until their total reaches `amount`.
/// Returns everything when the total never gets there.
fn select_outputs(unspent: &[UnspentTxOut], amount: f64) -> (&[UnspentTxOut], f64) {
    let mut accumulated = 0.0;
    for (i, utxo) in unspent.iter().enumerate() {
        accumulated += utxo.amount;
        if accumulated >= amount {
            return (&unspent[..=i], accumulated);
        }
    }
    (unspent, accumulated)
}
