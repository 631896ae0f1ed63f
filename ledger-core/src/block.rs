//! Block header, body, hashing, and application to the UTXO set.

use crate::encoding::canonical_bytes;
use crate::transaction::{merkle_root, Transaction};
use serde::{Deserialize, Serialize};
use shared::types::{BlockHeight, Timestamp};
use shared::{Address, Hash256};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockHeader {
    pub index: BlockHeight,
    pub timestamp: Timestamp,
    pub previous_hash: Hash256,
    pub merkle_root: Hash256,
    pub difficulty_bits: u32,
    pub nonce: u64,
    pub miner: Address,
}

impl BlockHeader {
    #[must_use]
    pub fn hash(&self) -> Hash256 {
        Hash256::sha256(&canonical_bytes(self))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    #[must_use]
    pub fn genesis(miner: Address, coinbase: Transaction, timestamp: Timestamp) -> Self {
        let txid = coinbase.txid();
        let header = BlockHeader {
            index: 0,
            timestamp,
            previous_hash: Hash256::zero(),
            merkle_root: merkle_root(&[txid]),
            difficulty_bits: 1,
            nonce: 0,
            miner,
        };
        Self {
            header,
            transactions: vec![coinbase],
        }
    }

    #[must_use]
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    #[must_use]
    pub fn height(&self) -> BlockHeight {
        self.header.index
    }

    #[must_use]
    pub fn txids(&self) -> Vec<Hash256> {
        self.transactions.iter().map(Transaction::txid).collect()
    }

    #[must_use]
    pub fn computed_merkle_root(&self) -> Hash256 {
        merkle_root(&self.txids())
    }

    #[must_use]
    pub fn size_bytes(&self) -> usize {
        canonical_bytes(&self.transactions).len()
    }

    #[must_use]
    pub fn exceeds_max_size(&self, max_bytes: usize) -> bool {
        self.size_bytes() > max_bytes
    }

    #[must_use]
    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first().filter(|tx| tx.is_coinbase())
    }

    /// True if the header's claimed hash, recomputed, satisfies its own
    /// difficulty target.
    #[must_use]
    pub fn meets_proof_of_work(&self) -> bool {
        self.hash().meets_difficulty(self.header.difficulty_bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{KeyPair, Network};

    fn sample_block() -> Block {
        let miner = KeyPair::generate().public_key.to_address(Network::Devnet);
        let coinbase = Transaction::coinbase(
            0,
            miner.clone(),
            12 * crate::params::UNIT,
            Network::Devnet,
            1_700_000_000,
        );
        Block::genesis(miner, coinbase, 1_700_000_000)
    }

    #[test]
    fn header_hash_is_stable_for_same_content() {
        let block = sample_block();
        assert_eq!(block.hash(), block.hash());
    }

    #[test]
    fn merkle_root_matches_recomputation() {
        let block = sample_block();
        assert_eq!(block.header.merkle_root, block.computed_merkle_root());
    }

    #[test]
    fn genesis_height_is_zero() {
        let block = sample_block();
        assert_eq!(block.height(), 0);
    }

    #[test]
    fn block_within_default_size_budget() {
        let block = sample_block();
        assert!(!block.exceeds_max_size(4_000_000));
    }
}
