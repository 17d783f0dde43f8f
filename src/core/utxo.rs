//! UTXO index
//!
//! Unspent outputs, address ledgers and balances are derived by replaying
//! the chain on every query. Nothing is cached between mutations, so the
//! results can never go stale. The cost is linear in the number of
//! transactions in the chain.

use crate::core::block::Block;
use crate::core::blockchain::Blockchain;
use crate::core::transaction::{LedgerEntry, OutPoint, UnspentTxOut};
use std::collections::BTreeMap;

impl Blockchain {
    /// Every currently unspent output paying `address_filter`, or every
    /// unspent output when the filter is empty.
    ///
    /// Results come back in chain scan order, which is also the order the
    /// transaction builder consumes them in.
    pub fn compute_unspent(&self, address_filter: &str) -> Vec<UnspentTxOut> {
        // Keyed by chain position, so iteration order is scan order
        let mut outs: BTreeMap<OutPoint, UnspentTxOut> = BTreeMap::new();

        for block in self.blocks() {
            for (tx_index, tx) in block.transactions.iter().enumerate() {
                for (tx_out_index, txout) in tx.tx_outs.iter().enumerate() {
                    if !address_filter.is_empty() && txout.address != address_filter {
                        continue;
                    }

                    let utxo = UnspentTxOut {
                        block_index: block.index,
                        tx_index: tx_index as u64,
                        tx_out_index: tx_out_index as u64,
                        address: txout.address.clone(),
                        amount: txout.amount,
                    };
                    if let Some(existing) = outs.insert(utxo.out_point(), utxo) {
                        log::error!(
                            "Duplicate output {} in chain, chain may be corrupt",
                            existing.out_point()
                        );
                    }
                }

                // Coinbase inputs do not spend anything
                if tx.is_coinbase() {
                    continue;
                }

                for txin in &tx.tx_ins {
                    outs.remove(&txin.out_point());
                }
            }
        }

        outs.into_values().collect()
    }

    /// Copy of block `index` with every input's spent address and amount
    /// filled in. Returns `None` when `index` is not in the chain.
    ///
    /// # Panics
    ///
    /// Panics when an input points outside the chain, which means the chain
    /// is corrupt.
    pub fn block_details(&self, index: u64) -> Option<Block> {
        let mut block = self.get(index)?.clone();

        for tx in &mut block.transactions {
            for txin in &mut tx.tx_ins {
                let point = txin.out_point();
                let txout = self
                    .get(point.block_index)
                    .and_then(|b| b.transactions.get(usize::try_from(point.tx_index).ok()?))
                    .and_then(|t| t.tx_outs.get(usize::try_from(point.tx_out_index).ok()?))
                    .unwrap_or_else(|| {
                        panic!(
                            "input {} of block {} points outside the chain",
                            point, index
                        )
                    });

                txin.address = Some(txout.address.clone());
                txin.amount = Some(txout.amount);
            }
        }

        Some(block)
    }

    /// Accounting lines for `address` in chain order.
    ///
    /// A transaction paying the address yields a credit of the matching
    /// outputs. A transaction spent by the address (its first input
    /// belongs to the address) yields a single debit of the inputs spent
    /// minus any change paid back.
    pub fn ledger_for(&self, address: &str) -> Vec<LedgerEntry> {
        let mut ledger = Vec::new();

        for index in self.blocks().iter().map(|b| b.index) {
            let Some(block) = self.block_details(index) else {
                continue;
            };

            for tx in &block.transactions {
                let credit = tx
                    .tx_outs
                    .iter()
                    .filter(|o| o.address == address)
                    .map(|o| o.amount)
                    .reduce(|a, b| a + b);

                let spent_by_address = !tx.is_coinbase()
                    && tx
                        .tx_ins
                        .first()
                        .and_then(|i| i.address.as_deref())
                        .is_some_and(|a| a == address);

                let amount = if spent_by_address {
                    let inputs: f64 = tx.tx_ins.iter().filter_map(|i| i.amount).sum();
                    -(inputs - credit.unwrap_or(0.0))
                } else if let Some(credit) = credit {
                    credit
                } else {
                    continue;
                };

                ledger.push(LedgerEntry {
                    txid: tx.id.clone(),
                    block_index: block.index,
                    timestamp: block.timestamp,
                    amount,
                });
            }
        }

        ledger
    }

    /// Sum of the address's ledger
    pub fn balance_of(&self, address: &str) -> f64 {
        self.ledger_for(address).iter().map(|e| e.amount).sum()
    }

    /// Position `(blockIndex, txIndex)` of the transaction with id `txid`
    pub fn find_transaction(&self, txid: &str) -> Option<(u64, u64)> {
        self.blocks().iter().find_map(|block| {
            block
                .transactions
                .iter()
                .position(|tx| tx.id == txid)
                .map(|tx_index| (block.index, tx_index as u64))
        })
    }
}
