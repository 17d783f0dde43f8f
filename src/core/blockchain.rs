//! Chain store
//!
//! Owns the ordered sequence of blocks and the queue of pending
//! transactions, and enforces the chain-validity rules.

use crate::core::block::Block;
use crate::core::transaction::Transaction;
use std::collections::VecDeque;
use thiserror::Error;

/// Default mining difficulty for the first mined block (leading zero bits)
pub const DEFAULT_DIFFICULTY: u32 = 5;

/// Number of blocks between difficulty adjustments
pub const BLOCK_INTERVAL: u64 = 10;

/// Expected duration of one adjustment interval, in seconds
pub const TARGET_TIMESPAN: u64 = 60;

/// Rejections from [`Blockchain::append`]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChainError {
    #[error("Invalid hash for block {index}")]
    InvalidHash { index: u64 },
    #[error("Block {index} does not link to tail {tail_index}")]
    InvalidLink { index: u64, tail_index: u64 },
}

/// A change to the chain decided by reconciliation, applied under the
/// same exclusion as the mining loop
#[derive(Debug, Clone, PartialEq)]
pub enum Replacement {
    /// Swap in a complete chain starting at genesis
    Full(Vec<Block>),
    /// Truncate to `from` and append `blocks` in order
    Splice { from: u64, blocks: Vec<Block> },
}

impl Replacement {
    pub fn blocks(&self) -> &[Block] {
        match self {
            Replacement::Full(blocks) => blocks,
            Replacement::Splice { blocks, .. } => blocks,
        }
    }
}

/// Check adjacent pairs: consecutive indices, matching links and
/// recomputed hashes. Sequences of length 0 or 1 are trivially valid.
pub fn is_valid_sequence(blocks: &[Block]) -> bool {
    blocks.windows(2).all(|pair| {
        let (prev, current) = (&pair[0], &pair[1]);
        current.index == prev.index + 1
            && current.previous_hash == prev.hash
            && current.verify_hash()
    })
}

/// The chain of blocks plus the pending transaction queue
#[derive(Debug, Clone, Default)]
pub struct Blockchain {
    blocks: Vec<Block>,
    tx_queue: VecDeque<Transaction>,
}

impl Blockchain {
    /// Create a chain holding only the genesis block
    pub fn new() -> Self {
        Self::from_blocks(vec![Block::genesis()])
    }

    /// An empty chain; the persistence layer seeds it
    pub fn empty() -> Self {
        Self::default()
    }

    /// Wrap blocks as-is, without validation
    pub fn from_blocks(blocks: Vec<Block>) -> Self {
        Self {
            blocks,
            tx_queue: VecDeque::new(),
        }
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn genesis(&self) -> Option<&Block> {
        self.blocks.first()
    }

    pub fn tail(&self) -> Option<&Block> {
        self.blocks.last()
    }

    /// Get a block by index
    pub fn get(&self, index: u64) -> Option<&Block> {
        let block = self.blocks.get(usize::try_from(index).ok()?)?;
        (block.index == index).then_some(block)
    }

    /// Blocks with index in `first..=last`, or `None` when `first` is not
    /// in the chain
    pub fn range(&self, first: u64, last: u64) -> Option<Vec<Block>> {
        let start = self.blocks.iter().position(|b| b.index == first)?;
        Some(
            self.blocks[start..]
                .iter()
                .take_while(|b| b.index <= last)
                .cloned()
                .collect(),
        )
    }

    /// Append a block to the tail.
    ///
    /// The block's hash must match its content and satisfy its difficulty,
    /// and it must link to the current tail.
    pub fn append(&mut self, block: Block) -> Result<(), ChainError> {
        self.append_checked(block, true)
    }

    /// Append without the link check. Only used while rebuilding a chain
    /// from an already validated sequence.
    fn append_unlinked(&mut self, block: Block) -> Result<(), ChainError> {
        self.append_checked(block, false)
    }

    fn append_checked(&mut self, block: Block, check_link: bool) -> Result<(), ChainError> {
        if !block.verify_hash() || !block.is_valid_pow() {
            return Err(ChainError::InvalidHash { index: block.index });
        }

        if check_link {
            if let Some(tail) = self.tail() {
                if block.previous_hash != tail.hash || block.index != tail.index + 1 {
                    return Err(ChainError::InvalidLink {
                        index: block.index,
                        tail_index: tail.index,
                    });
                }
            }
        }

        self.blocks.push(block);
        Ok(())
    }

    /// Validate the entire chain
    pub fn is_valid_chain(&self) -> bool {
        is_valid_sequence(&self.blocks)
    }

    /// Sum of `2^difficulty` over the blocks strictly before `upto_index`
    pub fn cumulative_difficulty(&self, upto_index: u64) -> u64 {
        self.blocks
            .iter()
            .take_while(|b| b.index < upto_index)
            .map(|b| 1u64.checked_shl(b.difficulty).unwrap_or(u64::MAX))
            .fold(0u64, u64::saturating_add)
    }

    /// Fork-choice weight of the whole chain, tail included
    pub fn total_difficulty(&self) -> u64 {
        match self.tail() {
            Some(tail) => self.cumulative_difficulty(tail.index + 1),
            None => 0,
        }
    }

    /// Difficulty the block after the tail must carry.
    ///
    /// Every `BLOCK_INTERVAL`-th block the elapsed time of the last
    /// interval is compared to `TARGET_TIMESPAN`; in between, the tail's
    /// difficulty carries over.
    pub fn adjusted_difficulty(&self) -> u32 {
        let Some(last_block) = self.tail() else {
            return 0;
        };

        if (last_block.index + 1) % BLOCK_INTERVAL != 0 {
            return last_block.difficulty;
        }

        let Some(first_block) = self
            .blocks
            .len()
            .checked_sub(BLOCK_INTERVAL as usize)
            .and_then(|pos| self.blocks.get(pos))
        else {
            return last_block.difficulty;
        };

        let timespan = last_block.timestamp.saturating_sub(first_block.timestamp) / 1000;

        if timespan < TARGET_TIMESPAN / 2 {
            log::debug!(
                "Interval took {}s (target {}s), raising difficulty",
                timespan,
                TARGET_TIMESPAN
            );
            last_block.difficulty.saturating_add(1)
        } else if timespan > TARGET_TIMESPAN * 2 {
            log::debug!(
                "Interval took {}s (target {}s), lowering difficulty",
                timespan,
                TARGET_TIMESPAN
            );
            last_block.difficulty.saturating_sub(1)
        } else {
            last_block.difficulty
        }
    }

    /// Difficulty for the next mined block. A chain holding only genesis
    /// starts at `initial`.
    pub fn next_difficulty(&self, initial: u32) -> u32 {
        match self.tail() {
            Some(tail) if tail.index > 0 => self.adjusted_difficulty(),
            _ => initial,
        }
    }

    // =========================================================================
    // Pending transactions
    // =========================================================================

    pub fn queue_transaction(&mut self, tx: Transaction) {
        self.tx_queue.push_back(tx);
    }

    pub fn pending(&self) -> impl Iterator<Item = &Transaction> {
        self.tx_queue.iter()
    }

    pub fn pending_len(&self) -> usize {
        self.tx_queue.len()
    }

    /// Empty the queue into the transaction list of block `block_index`.
    ///
    /// The coinbase paying `coinbase_address` comes first, followed by the
    /// queued transactions in FIFO order, each with an id scoped to
    /// `block_index`.
    pub fn drain_for_next_block(
        &mut self,
        block_index: u64,
        coinbase_address: &str,
    ) -> Vec<Transaction> {
        let mut txs = Vec::with_capacity(self.tx_queue.len() + 1);
        txs.push(Transaction::coinbase(block_index, coinbase_address));

        for mut tx in self.tx_queue.drain(..) {
            if tx.is_coinbase() {
                continue;
            }
            tx.assign_id(block_index);
            txs.push(tx);
        }

        txs
    }

    /// Put the non-coinbase transactions of an abandoned candidate back at
    /// the head of the queue, keeping their order
    pub fn requeue(&mut self, txs: Vec<Transaction>) -> usize {
        let mut count = 0;
        for tx in txs.into_iter().rev().filter(|tx| !tx.is_coinbase()) {
            self.tx_queue.push_front(tx);
            count += 1;
        }
        count
    }

    // =========================================================================
    // Replacement
    // =========================================================================

    /// Apply a staged replacement and return the number of blocks taken
    /// from it.
    ///
    /// A full replacement is all-or-nothing. A splice keeps every block
    /// appended before the first rejected one; when its first block is
    /// rejected the chain is left as it was.
    pub fn apply_replacement(&mut self, replacement: Replacement) -> Result<usize, ChainError> {
        match replacement {
            Replacement::Full(blocks) => {
                if blocks.is_empty() {
                    return Ok(0);
                }
                if let Some(bad) = blocks.iter().find(|b| !b.verify_hash() || !b.is_valid_pow()) {
                    return Err(ChainError::InvalidHash { index: bad.index });
                }
                if !is_valid_sequence(&blocks) {
                    let index = blocks.first().map(|b| b.index).unwrap_or_default();
                    return Err(ChainError::InvalidLink {
                        index,
                        tail_index: index,
                    });
                }

                let count = blocks.len();
                self.blocks.clear();
                for block in blocks {
                    self.append_unlinked(block)?;
                }
                Ok(count)
            }
            Replacement::Splice { from, blocks } => {
                let keep = self.blocks.iter().take_while(|b| b.index < from).count();
                let replaced = self.blocks.split_off(keep);

                let mut appended = 0;
                for block in blocks {
                    let index = block.index;
                    if let Err(e) = self.append(block) {
                        log::warn!("Splice stopped at block {}: {}", index, e);
                        if appended == 0 {
                            self.blocks.extend(replaced);
                            return Err(e);
                        }
                        break;
                    }
                    appended += 1;
                }
                Ok(appended)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn next_block(chain: &Blockchain, timestamp: u64, difficulty: u32) -> Block {
        let tail = chain.tail().unwrap();
        let index = tail.index + 1;
        Block::with_timestamp(
            index,
            tail.hash.clone(),
            timestamp,
            vec![Transaction::coinbase(index, "miner")],
            difficulty,
            "test",
        )
    }

    /// Chain of `len` blocks whose timestamps are `spacing_ms` apart
    fn chain_with_spacing(len: usize, spacing_ms: u64, difficulty: u32) -> Blockchain {
        let mut chain = Blockchain::new();
        let start = chain.tail().unwrap().timestamp;
        for i in 1..len {
            let block = next_block(&chain, start + i as u64 * spacing_ms, difficulty);
            chain.append(block).unwrap();
        }
        chain
    }

    #[test]
    fn test_new_blockchain() {
        let chain = Blockchain::new();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.tail().unwrap().index, 0);
        assert!(chain.is_valid_chain());
        assert!(Blockchain::empty().is_valid_chain());
    }

    #[test]
    fn test_append_links_to_tail() {
        let mut chain = Blockchain::new();
        let block = next_block(&chain, 1, 0);
        chain.append(block.clone()).unwrap();
        assert_eq!(chain.tail().unwrap(), &block);

        // Same block again no longer links to the new tail
        assert_eq!(
            chain.append(block),
            Err(ChainError::InvalidLink {
                index: 1,
                tail_index: 1
            })
        );
    }

    #[test]
    fn test_append_rejects_bad_hash() {
        let mut chain = Blockchain::new();
        let mut block = next_block(&chain, 1, 0);
        block.nonce += 1;
        assert_eq!(
            chain.append(block),
            Err(ChainError::InvalidHash { index: 1 })
        );
    }

    #[test]
    fn test_append_rejects_unmet_difficulty() {
        let mut chain = Blockchain::new();
        // 200 leading zero bits are never found at nonce 0
        let block = next_block(&chain, 1, 200);
        assert_eq!(
            chain.append(block),
            Err(ChainError::InvalidHash { index: 1 })
        );
    }

    #[test]
    fn test_tampering_invalidates_chain() {
        let chain = chain_with_spacing(5, 1000, 0);
        assert!(chain.is_valid_chain());

        let mut blocks = chain.blocks().to_vec();
        blocks[2].hash = "00".repeat(32);
        assert!(!is_valid_sequence(&blocks));

        let mut blocks = chain.blocks().to_vec();
        blocks[2].previous_hash = "ff".into();
        assert!(!is_valid_sequence(&blocks));

        let mut blocks = chain.blocks().to_vec();
        blocks[2].index = 9;
        assert!(!is_valid_sequence(&blocks));

        let mut blocks = chain.blocks().to_vec();
        blocks[2].transactions[0].tx_outs[0].amount = 1000.0;
        assert!(!is_valid_sequence(&blocks));
    }

    #[test]
    fn test_cumulative_difficulty() {
        // Built without mining, so higher difficulties are only declared
        let mut blocks = vec![Block::genesis()];
        for (index, difficulty) in [(1u64, 0u32), (2, 1), (3, 2)] {
            let prev = blocks.last().unwrap();
            blocks.push(Block::with_timestamp(
                index,
                prev.hash.clone(),
                prev.timestamp + 1000,
                vec![Transaction::coinbase(index, "miner")],
                difficulty,
                "test",
            ));
        }
        let chain = Blockchain::from_blocks(blocks);

        // 2^0 (genesis) + 2^0 + 2^1, block 3 excluded
        assert_eq!(chain.cumulative_difficulty(3), 4);
        assert_eq!(chain.cumulative_difficulty(0), 0);
        assert_eq!(chain.total_difficulty(), 8);
    }

    /// Ten linked blocks, genesis through index 9, the last one stamped
    /// `elapsed_ms` after genesis. Proof of work is not checked here.
    fn retarget_fixture(elapsed_ms: u64, difficulty: u32) -> Blockchain {
        let genesis = Block::genesis();
        let start = genesis.timestamp;
        let mut blocks = vec![genesis];
        for i in 1..10u64 {
            let timestamp = if i == 9 { start + elapsed_ms } else { start + i * 1000 };
            let prev = blocks.last().unwrap().hash.clone();
            blocks.push(Block::with_timestamp(i, prev, timestamp, vec![], difficulty, "test"));
        }
        let chain = Blockchain::from_blocks(blocks);
        assert!(chain.is_valid_chain());
        chain
    }

    #[test]
    fn test_difficulty_increases_when_interval_too_fast() {
        let chain = retarget_fixture(20_000, 4);
        assert_eq!(chain.tail().unwrap().index, 9);
        assert_eq!(chain.adjusted_difficulty(), 5);
    }

    #[test]
    fn test_difficulty_decreases_when_interval_too_slow() {
        let chain = retarget_fixture(130_000, 4);
        assert_eq!(chain.adjusted_difficulty(), 3);
    }

    #[test]
    fn test_difficulty_unchanged_on_target() {
        let chain = retarget_fixture(60_000, 4);
        assert_eq!(chain.adjusted_difficulty(), 4);
    }

    #[test]
    fn test_difficulty_never_drops_below_zero() {
        let chain = retarget_fixture(600_000, 0);
        assert_eq!(chain.adjusted_difficulty(), 0);
    }

    #[test]
    fn test_off_interval_inherits_tail_difficulty() {
        let chain = chain_with_spacing(5, 1, 0);
        assert_eq!(chain.adjusted_difficulty(), 0);
        assert_eq!(chain.next_difficulty(7), 0);
        assert_eq!(Blockchain::new().next_difficulty(7), 7);
    }

    #[test]
    fn test_drain_for_next_block() {
        let mut chain = Blockchain::new();
        let mut first = Transaction::new(
            vec![crate::core::TxIn::new(crate::core::OutPoint::new(0, 0, 0), "sig")],
            vec![crate::core::TxOut::new("bob", 1.0)],
        );
        first.id = "stale".into();
        let second = Transaction::new(
            vec![crate::core::TxIn::new(crate::core::OutPoint::new(0, 0, 0), "sig")],
            vec![crate::core::TxOut::new("carol", 2.0)],
        );
        chain.queue_transaction(first.clone());
        chain.queue_transaction(second.clone());

        let txs = chain.drain_for_next_block(1, "miner");
        assert_eq!(chain.pending_len(), 0);
        assert_eq!(txs.len(), 3);
        assert!(txs[0].is_coinbase());
        assert_eq!(txs[0].tx_outs[0].address, "miner");
        assert_eq!(txs[1].tx_outs, first.tx_outs);
        assert_eq!(txs[1].id, first.calculate_id(1));
        assert_eq!(txs[2].tx_outs, second.tx_outs);

        assert_eq!(chain.requeue(txs), 2);
        let pending: Vec<_> = chain.pending().map(|tx| tx.tx_outs.clone()).collect();
        assert_eq!(pending, vec![first.tx_outs, second.tx_outs]);
    }

    #[test]
    fn test_range() {
        let chain = chain_with_spacing(6, 1, 0);
        let blocks = chain.range(2, 4).unwrap();
        assert_eq!(blocks.iter().map(|b| b.index).collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(chain.range(4, 100).unwrap().len(), 2);
        assert!(chain.range(9, 10).is_none());
    }

    #[test]
    fn test_full_replacement() {
        let mut chain = chain_with_spacing(3, 1, 0);
        let other = chain_with_spacing(6, 2, 0);

        let applied = chain
            .apply_replacement(Replacement::Full(other.blocks().to_vec()))
            .unwrap();
        assert_eq!(applied, 6);
        assert_eq!(chain.blocks(), other.blocks());
    }

    #[test]
    fn test_full_replacement_rejects_invalid_candidate() {
        let mut chain = chain_with_spacing(3, 1, 0);
        let before = chain.blocks().to_vec();
        let mut blocks = chain_with_spacing(6, 2, 0).blocks().to_vec();
        blocks[4].nonce += 1;

        assert!(chain.apply_replacement(Replacement::Full(blocks)).is_err());
        assert_eq!(chain.blocks(), &before[..]);
    }

    #[test]
    fn test_splice_keeps_blocks_before_failure() {
        let mut chain = chain_with_spacing(4, 1, 0);
        let fork = chain_with_spacing(7, 5, 0);

        let mut blocks = fork.range(1, 6).unwrap();
        blocks[3].nonce += 1; // block 4 is corrupt

        let applied = chain
            .apply_replacement(Replacement::Splice { from: 1, blocks })
            .unwrap();
        assert_eq!(applied, 3);
        assert_eq!(chain.tail().unwrap().index, 3);
        assert_eq!(chain.blocks(), &fork.blocks()[..4]);
    }

    #[test]
    fn test_rejected_splice_leaves_chain_intact() {
        let mut chain = chain_with_spacing(5, 1, 0);
        let before = chain.blocks().to_vec();

        // Links to block 1 but carries no work for its declared difficulty
        let parent = chain.get(1).unwrap().clone();
        let forged = Block::with_timestamp(
            2,
            parent.hash,
            parent.timestamp + 1,
            vec![Transaction::coinbase(2, "forger")],
            40,
            "forger",
        );

        let result = chain.apply_replacement(Replacement::Splice {
            from: 2,
            blocks: vec![forged],
        });
        assert_eq!(result, Err(ChainError::InvalidHash { index: 2 }));
        assert_eq!(chain.blocks(), &before[..]);
        assert!(chain.is_valid_chain());
    }
}
