//! Chain synchronization with peers
//!
//! Decides what to do with a peer's chain summary and with block ranges
//! the peer sends back. Pure extensions are appended on the spot; anything
//! that rewrites existing blocks is returned as a [`Replacement`] for the
//! node to apply under the same exclusion as the mining loop.

use crate::core::{is_valid_sequence, Block, Blockchain, Replacement};
use crate::network::message::BlockRange;

/// Reaction to a peer's chain summary
#[derive(Debug, Clone, PartialEq)]
pub enum SummaryAction {
    Ignore,
    /// Ask for the peer's whole chain
    RequestFull,
    RequestRange(BlockRange),
}

/// Result of processing one candidate range
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    Discarded,
    /// Blocks appended to the local tail
    Extended(usize),
    /// Rewrite of local blocks, to be staged
    Replace(Replacement),
    RequestRange(BlockRange),
}

/// Chain reconciliation state machine
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    /// Adopt chains whose genesis differs from ours
    allow_reset: bool,
}

impl Reconciler {
    pub fn new(allow_reset: bool) -> Self {
        Self { allow_reset }
    }

    /// Compare a peer's `(genesis, tail, cumdiff)` with the local chain
    pub fn on_summary(
        &self,
        chain: &Blockchain,
        genesis: &Block,
        tail: &Block,
        cumdiff: u64,
    ) -> SummaryAction {
        let (Some(local_genesis), Some(local_tail)) = (chain.genesis(), chain.tail()) else {
            return SummaryAction::RequestFull;
        };

        if local_genesis.hash != genesis.hash {
            log::warn!("Peer reported an unknown chain (genesis {})", genesis.hash);
            if self.allow_reset {
                log::info!("Requesting full remote chain");
                return SummaryAction::RequestFull;
            }
            return SummaryAction::Ignore;
        }

        let local_weight = chain.total_difficulty();
        if cumdiff <= local_weight {
            log::debug!(
                "Peer chain weight {} does not exceed ours ({})",
                cumdiff,
                local_weight
            );
            return SummaryAction::Ignore;
        }

        // A heavier chain that is not longer forks below our tail; start
        // from its tail and walk back
        let first = (local_tail.index + 1).min(tail.index);
        log::info!(
            "Peer chain is heavier ({} > {}), requesting blocks {}..={}",
            cumdiff,
            local_weight,
            first,
            tail.index
        );
        SummaryAction::RequestRange(BlockRange::new(first, tail.index))
    }

    /// Classify a candidate range against the local chain.
    ///
    /// Pure extensions are appended directly to `chain`; every other
    /// outcome leaves `chain` untouched.
    pub fn reconcile(&self, chain: &mut Blockchain, candidate: Vec<Block>) -> ReconcileOutcome {
        let (Some(first), Some(last)) = (candidate.first(), candidate.last()) else {
            log::debug!("Discarding empty candidate");
            return ReconcileOutcome::Discarded;
        };
        let (first_index, last_index) = (first.index, last.index);

        if !is_valid_sequence(&candidate) {
            log::info!(
                "Discarding invalid candidate {}..={}",
                first_index,
                last_index
            );
            return ReconcileOutcome::Discarded;
        }

        let Some(tail) = chain.tail() else {
            if first_index == 0 {
                return ReconcileOutcome::Replace(Replacement::Full(candidate));
            }
            return ReconcileOutcome::RequestRange(BlockRange::new(0, last_index));
        };
        let tail_index = tail.index;

        let known = candidate
            .iter()
            .all(|b| chain.get(b.index).is_some_and(|local| local.hash == b.hash));
        if known {
            log::debug!("Candidate {}..={} is already in the chain", first_index, last_index);
            return ReconcileOutcome::Discarded;
        }

        if first_index == 0 {
            log::info!("Staging full chain of {} blocks", candidate.len());
            return ReconcileOutcome::Replace(Replacement::Full(candidate));
        }

        let anchor_hash = chain.get(first_index - 1).map(|b| b.hash.as_str());
        let links = anchor_hash == Some(first.previous_hash.as_str());

        if first_index <= tail_index + 1 && !links {
            log::info!(
                "Candidate {}..={} is misaligned, walking back",
                first_index,
                last_index
            );
            return ReconcileOutcome::RequestRange(BlockRange::new(first_index - 1, last_index));
        }

        if first_index <= tail_index {
            log::info!(
                "Staging splice of {} blocks from {}",
                candidate.len(),
                first_index
            );
            return ReconcileOutcome::Replace(Replacement::Splice {
                from: first_index,
                blocks: candidate,
            });
        }

        if first_index == tail_index + 1 {
            let mut appended = 0;
            for block in candidate {
                let index = block.index;
                if let Err(e) = chain.append(block) {
                    log::warn!("Extension stopped at block {}: {}", index, e);
                    break;
                }
                appended += 1;
            }
            log::info!("Extended chain by {} blocks", appended);
            return ReconcileOutcome::Extended(appended);
        }

        log::info!(
            "Gap between tail {} and candidate {}, requesting missing blocks",
            tail_index,
            first_index
        );
        ReconcileOutcome::RequestRange(BlockRange::new(tail_index + 1, last_index))
    }
}
