//! Block assembly and proof-of-work search.

use crate::block::{Block, BlockHeader};
use crate::mempool::Mempool;
use crate::params::ConsensusParams;
use crate::transaction::{merkle_root, Transaction};
use shared::types::{BlockHeight, Timestamp};
#[cfg(test)]
use shared::types::MempoolConfig;
use shared::{Address, Hash256, Network};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

pub struct MinerConfig {
    pub miner_address: Address,
    pub network: Network,
    pub threads: usize,
    pub max_block_size_bytes: usize,
}

impl MinerConfig {
    #[must_use]
    pub fn new(miner_address: Address, network: Network) -> Self {
        Self {
            miner_address,
            network,
            threads: std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get),
            max_block_size_bytes: 4_000_000,
        }
    }
}

pub struct AssembledBlock {
    pub header_without_pow: BlockHeader,
    pub transactions: Vec<Transaction>,
}

/// Selects transactions, builds the coinbase, and computes the Merkle root.
/// Returns a header with `nonce = 0`; the caller mines it separately so the
/// abort flag can be shared across the process's miner loop.
pub fn assemble_block(
    mempool: &Mempool,
    params: &ConsensusParams,
    config: &MinerConfig,
    height: BlockHeight,
    previous_hash: Hash256,
    difficulty_bits: u32,
    timestamp: Timestamp,
) -> AssembledBlock {
    let reward = params.reward_at(height);
    let mut txs = mempool.select_for_block(config.max_block_size_bytes / 2);
    let fees: u64 = txs.iter().map(|tx| tx.fee).sum();

    let coinbase = Transaction::coinbase(
        height,
        config.miner_address.clone(),
        reward + fees,
        config.network,
        timestamp,
    );
    txs.insert(0, coinbase);

    let txids: Vec<Hash256> = txs.iter().map(Transaction::txid).collect();
    let header = BlockHeader {
        index: height,
        timestamp,
        previous_hash,
        merkle_root: merkle_root(&txids),
        difficulty_bits,
        nonce: 0,
        miner: config.miner_address.clone(),
    };

    AssembledBlock {
        header_without_pow: header,
        transactions: txs,
    }
}

/// Searches for a `nonce` satisfying the header's difficulty target,
/// dividing the nonce space across `threads` OS threads. Each worker
/// checks `abort` between iterations so a heavier block arriving at the
/// same height can preempt the search without waiting for it to exhaust
/// its range.
pub fn mine(assembled: AssembledBlock, threads: usize, abort: Arc<AtomicBool>) -> Option<Block> {
    let threads = threads.max(1) as u64;
    let found = Arc::new(std::sync::Mutex::new(None::<(u64, Hash256)>));
    let header_template = assembled.header_without_pow.clone();

    thread::scope(|scope| {
        for worker_id in 0..threads {
            let abort = Arc::clone(&abort);
            let found = Arc::clone(&found);
            let mut header = header_template.clone();
            scope.spawn(move || {
                let mut nonce = worker_id;
                loop {
                    if abort.load(Ordering::Relaxed) {
                        return;
                    }
                    if found.lock().unwrap().is_some() {
                        return;
                    }
                    header.nonce = nonce;
                    let hash = header.hash();
                    if hash.meets_difficulty(header.difficulty_bits) {
                        *found.lock().unwrap() = Some((nonce, hash));
                        abort.store(true, Ordering::Relaxed);
                        return;
                    }
                    nonce = nonce.wrapping_add(threads);
                    if nonce < worker_id {
                        // Wrapped the full u64 space without success.
                        return;
                    }
                }
            });
        }
    });

    let (nonce, _hash) = found.lock().unwrap().take()?;
    let mut header = assembled.header_without_pow;
    header.nonce = nonce;
    Some(Block {
        header,
        transactions: assembled.transactions,
    })
}

/// Recomputes difficulty every `difficulty_retarget_period` blocks so the
/// median time per block matches `target_block_time_secs`, clamped to a
/// factor of `difficulty_clamp_factor` per window.
pub fn next_difficulty(
    params: &ConsensusParams,
    current_bits: u32,
    window_start_timestamp: Timestamp,
    window_end_timestamp: Timestamp,
) -> u32 {
    let elapsed = (window_end_timestamp - window_start_timestamp).max(1) as f64;
    let expected =
        (params.target_block_time_secs as f64) * (params.difficulty_retarget_period as f64);
    let ratio = (expected / elapsed).clamp(
        1.0 / params.difficulty_clamp_factor as f64,
        params.difficulty_clamp_factor as f64,
    );

    // difficulty_bits behaves log2-like; approximate the adjustment in
    // bit-space via log2(ratio) so doubling the ratio adds one bit.
    let delta_bits = ratio.log2().round() as i64;
    let new_bits = i64::from(current_bits) + delta_bits;
    new_bits.clamp(1, 255) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mempool::Mempool;
    use shared::KeyPair;

    #[test]
    fn assemble_block_places_coinbase_first() {
        let params = ConsensusParams::mainnet();
        let mempool = Mempool::new(MempoolConfig::default());
        let miner = KeyPair::generate().public_key.to_address(Network::Devnet);
        let config = MinerConfig::new(miner, Network::Devnet);
        let assembled = assemble_block(&mempool, &params, &config, 1, Hash256::zero(), 1, 1_700_000_100);
        assert!(assembled.transactions[0].is_coinbase());
    }

    #[test]
    fn mine_finds_a_nonce_satisfying_low_difficulty() {
        let params = ConsensusParams::mainnet();
        let mempool = Mempool::new(MempoolConfig::default());
        let miner = KeyPair::generate().public_key.to_address(Network::Devnet);
        let config = MinerConfig::new(miner, Network::Devnet);
        let assembled = assemble_block(&mempool, &params, &config, 1, Hash256::zero(), 1, 1_700_000_100);
        let abort = Arc::new(AtomicBool::new(false));
        let block = mine(assembled, 1, abort).expect("difficulty 1 should be found quickly");
        assert!(block.meets_proof_of_work());
    }

    #[test]
    fn abort_flag_stops_the_search() {
        let params = ConsensusParams::mainnet();
        let mempool = Mempool::new(MempoolConfig::default());
        let miner = KeyPair::generate().public_key.to_address(Network::Devnet);
        let config = MinerConfig::new(miner, Network::Devnet);
        let assembled = assemble_block(&mempool, &params, &config, 1, Hash256::zero(), 250, 1_700_000_100);
        let abort = Arc::new(AtomicBool::new(true));
        assert!(mine(assembled, 1, abort).is_none());
    }

    #[test]
    fn difficulty_adjustment_is_clamped_to_factor_of_four() {
        let params = ConsensusParams::mainnet();
        let fast_bits = next_difficulty(&params, 20, 0, 1);
        assert!(fast_bits <= 22);
        let slow_bits = next_difficulty(&params, 20, 0, 1_000_000_000);
        assert!(slow_bits >= 18);
    }
}
