//! Fork choice and reorg support: cumulative-work comparison and common
//! ancestor discovery over the block lists the engine hands it.

use crate::block::Block;
use shared::Hash256;
use std::collections::HashMap;

/// Work contributed by a single block: `2^difficulty_bits`.
#[must_use]
pub fn block_work(difficulty_bits: u32) -> u128 {
    1u128 << difficulty_bits.min(127)
}

/// Total work across an ordered list of blocks from genesis.
#[must_use]
pub fn cumulative_work(blocks: &[Block]) -> u128 {
    blocks.iter().map(|b| block_work(b.header.difficulty_bits)).sum()
}

/// Fork-choice comparison: greater cumulative work wins; ties break by
/// longer chain, then by lexicographically smaller tip hash, purely for
/// determinism across independently-operated nodes.
#[must_use]
pub fn is_heavier(
    candidate_work: u128,
    candidate_len: usize,
    candidate_tip: Hash256,
    current_work: u128,
    current_len: usize,
    current_tip: Hash256,
) -> bool {
    match candidate_work.cmp(&current_work) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => match candidate_len.cmp(&current_len) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => candidate_tip.to_string() < current_tip.to_string(),
        },
    }
}

/// Buffers blocks whose parent is not yet attachable to the main chain,
/// and tracks competing branches hanging off a known ancestor so their
/// cumulative work can be compared against the main tip.
#[derive(Default)]
pub struct ForkManager {
    /// Syntactically valid blocks whose `previous_hash` is unknown, keyed
    /// by that missing hash so arrival of the parent can release them.
    orphans: HashMap<Hash256, Vec<Block>>,
    /// Validated side branches, keyed by their own tip hash. Each entry is
    /// the sequence of blocks from (but not including) the fork point to
    /// the branch tip.
    side_branches: HashMap<Hash256, Vec<Block>>,
}

impl ForkManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer_orphan(&mut self, block: Block) {
        self.orphans
            .entry(block.header.previous_hash)
            .or_default()
            .push(block);
    }

    /// Removes and returns every orphan whose parent is `parent_hash`, so
    /// the caller can attempt to attach them now that the parent is known.
    pub fn take_orphans_of(&mut self, parent_hash: &Hash256) -> Vec<Block> {
        self.orphans.remove(parent_hash).unwrap_or_default()
    }

    /// Extends or creates a side branch rooted after some known ancestor.
    /// Returns the full side-branch block list (including the new block)
    /// for the caller to evaluate against the main chain's work.
    pub fn extend_side_branch(&mut self, parent_hash: Hash256, block: Block) -> Vec<Block> {
        let mut branch = self.side_branches.remove(&parent_hash).unwrap_or_default();
        branch.push(block.clone());
        self.side_branches.insert(block.hash(), branch.clone());
        branch
    }

    pub fn drop_side_branch(&mut self, tip_hash: &Hash256) {
        self.side_branches.remove(tip_hash);
    }

    /// Whether `hash` is the current tip of some buffered side branch —
    /// i.e. a block the engine already knows about, even though it isn't on
    /// the main chain. Lets `submit_block` recognize a new block extending
    /// a multi-block side branch instead of buffering it as an orphan.
    #[must_use]
    pub fn is_side_branch_tip(&self, hash: &Hash256) -> bool {
        self.side_branches.contains_key(hash)
    }

    /// The main-chain height the side branch ending at `tip_hash` forked
    /// from, found via the branch's first block's `previous_hash` (the
    /// fork point itself, which is always a main-chain block).
    #[must_use]
    pub fn side_branch_fork_height(&self, tip_hash: &Hash256, block_index: &HashMap<Hash256, u64>) -> Option<u64> {
        let branch = self.side_branches.get(tip_hash)?;
        let fork_parent = branch.first()?.header.previous_hash;
        block_index.get(&fork_parent).copied()
    }
}

/// Walks `main_chain` and `side_branch` back from their tips to find the
/// height of their common ancestor, given each main-chain block's hash is
/// present in `block_index`.
#[must_use]
pub fn common_ancestor_height(
    main_chain: &[Block],
    block_index: &HashMap<Hash256, u64>,
    side_branch_root_parent: Hash256,
) -> Option<u64> {
    if side_branch_root_parent == Hash256::zero() && main_chain.is_empty() {
        return Some(0);
    }
    block_index.get(&side_branch_root_parent).copied().or_else(|| {
        main_chain
            .iter()
            .find(|b| b.hash() == side_branch_root_parent)
            .map(Block::height)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_work_ties_break_on_chain_length() {
        assert!(is_heavier(100, 6, Hash256::zero(), 100, 5, Hash256::zero()));
        assert!(!is_heavier(100, 4, Hash256::zero(), 100, 5, Hash256::zero()));
    }

    #[test]
    fn greater_work_always_wins_regardless_of_length() {
        assert!(is_heavier(200, 3, Hash256::zero(), 100, 10, Hash256::zero()));
    }

    #[test]
    fn cumulative_work_sums_powers_of_two() {
        assert_eq!(block_work(1) + block_work(1), block_work(2));
    }

    #[test]
    fn orphan_buffer_releases_by_parent_hash() {
        let mut manager = ForkManager::new();
        let parent = Hash256::sha256(b"parent");
        assert!(manager.take_orphans_of(&parent).is_empty());
    }
}
