//! The blockchain engine: applies blocks to state, enforces consensus
//! rules, tracks competing tips, and exposes read queries.

use crate::block::Block;
use crate::error::{EngineError, EngineResult, ValidationError};
use crate::fork::{self, ForkManager};
use crate::mempool::Mempool;
use crate::mining;
use crate::nonce::NonceTracker;
use crate::params::ConsensusParams;
use crate::transaction::Transaction;
use crate::utxo::{Utxo, UtxoSet};
use crate::validator::ProtectedAddresses;
use shared::types::{Amount, BlockHeight, MempoolConfig, OutPoint};
use shared::{Address, Hash256, Network};
use std::collections::HashMap;

/// Observable engine events, the small event interface auxiliary modules
/// (gossip relay, stats, future governance/DEX callers) register against
/// instead of reaching into engine internals.
pub enum EngineEvent<'a> {
    BlockApplied(&'a Block),
    TxAccepted(&'a Transaction),
    Reorged { old_tip: Hash256, new_tip: Hash256 },
}

type Observer = Box<dyn Fn(&EngineEvent<'_>) + Send + Sync>;

pub struct Engine {
    pub params: ConsensusParams,
    pub network: Network,
    chain: Vec<Block>,
    block_index: HashMap<Hash256, BlockHeight>,
    utxo_set: UtxoSet,
    nonce_tracker: NonceTracker,
    mempool: Mempool,
    protected: ProtectedAddresses,
    fork_manager: ForkManager,
    /// Blocks at or below this height are never reorged.
    checkpoint_floor: BlockHeight,
    observers: Vec<Observer>,
}

impl Engine {
    #[must_use]
    pub fn new(
        genesis: Block,
        params: ConsensusParams,
        network: Network,
        protected: ProtectedAddresses,
        mempool_config: MempoolConfig,
    ) -> Self {
        let mut engine = Self {
            params,
            network,
            chain: Vec::new(),
            block_index: HashMap::new(),
            utxo_set: UtxoSet::new(),
            nonce_tracker: NonceTracker::new(),
            mempool: Mempool::new(mempool_config),
            protected,
            fork_manager: ForkManager::new(),
            checkpoint_floor: 0,
            observers: Vec::new(),
        };
        engine
            .apply_block_unchecked(genesis)
            .expect("genesis block must apply cleanly at startup");
        engine
    }

    pub fn on_event(&mut self, observer: Observer) {
        self.observers.push(observer);
    }

    fn emit(&self, event: EngineEvent<'_>) {
        for observer in &self.observers {
            observer(&event);
        }
    }

    #[must_use]
    pub fn height(&self) -> BlockHeight {
        self.tip().height()
    }

    #[must_use]
    pub fn tip(&self) -> &Block {
        self.chain.last().expect("engine always holds at least genesis")
    }

    #[must_use]
    pub fn block_by_height(&self, height: BlockHeight) -> Option<&Block> {
        self.chain.get(height as usize)
    }

    #[must_use]
    pub fn block_by_hash(&self, hash: &Hash256) -> Option<&Block> {
        self.block_index.get(hash).and_then(|h| self.block_by_height(*h))
    }

    #[must_use]
    pub fn balance(&self, address: &Address) -> Amount {
        self.utxo_set.balance(address)
    }

    #[must_use]
    pub fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    pub fn set_checkpoint_floor(&mut self, height: BlockHeight) {
        self.checkpoint_floor = height.max(self.checkpoint_floor);
    }

    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }

    /// Runs the transaction through the validator and, on success, admits
    /// it to the mempool.
    pub fn submit_transaction(&mut self, tx: Transaction) -> Result<(), ValidationError> {
        let validator = crate::validator::Validator::new(&self.params, self.network, &self.protected);
        let now = self.now();
        self.mempool
            .add(tx, &validator, &self.utxo_set, &self.nonce_tracker, now)
    }

    /// Validates `block` against the *current* state (structure, proof of
    /// work, timestamp, coinbase accounting, and every contained
    /// transaction), without mutating anything.
    pub fn validate_block(&self, block: &Block, parent: &Block) -> EngineResult<()> {
        if !block.meets_proof_of_work() {
            return Err(EngineError::BadProofOfWork);
        }
        if block.header.previous_hash != parent.hash() {
            return Err(EngineError::OrphanBlock);
        }
        if block.header.index != parent.height() + 1 {
            return Err(EngineError::InvalidBlock("height does not follow parent".into()));
        }
        let now = self.now();
        if block.header.timestamp <= parent.header.timestamp
            || block.header.timestamp > now + self.params.max_future_drift_secs
        {
            return Err(EngineError::BadTimestamp);
        }
        if block.header.merkle_root != block.computed_merkle_root() {
            return Err(EngineError::BadMerkleRoot);
        }
        if block.exceeds_max_size(4_000_000) {
            return Err(EngineError::InvalidBlock("block exceeds maximum size".into()));
        }

        let coinbase_count = block.transactions.iter().filter(|tx| tx.is_coinbase()).count();
        if coinbase_count != 1 || !block.transactions[0].is_coinbase() {
            return Err(EngineError::BadCoinbase);
        }
        let fees: u64 = block.transactions[1..].iter().map(|tx| tx.fee).sum();
        let expected_reward = self.params.reward_at(block.header.index) + fees;
        if block.transactions[0].declared_output_total() != expected_reward {
            return Err(EngineError::BadCoinbase);
        }

        // Re-run every non-coinbase transaction against pre-application
        // state, with a local conflict set tracking intra-block spends so
        // two transactions in the same block cannot double-spend each
        // other.
        let validator = crate::validator::Validator::new(&self.params, self.network, &self.protected);
        let mut intra_block_spent: std::collections::HashSet<OutPoint> = std::collections::HashSet::new();
        struct IntraBlock<'a>(&'a std::collections::HashSet<OutPoint>);
        impl<'a> crate::validator::PendingConflicts for IntraBlock<'a> {
            fn contains_txid(&self, _txid: &Hash256) -> bool {
                false
            }
            fn spends(&self, outpoint: &OutPoint) -> bool {
                self.0.contains(outpoint)
            }
        }
        for tx in &block.transactions[1..] {
            let pending = IntraBlock(&intra_block_spent);
            validator
                .validate(tx, &self.utxo_set, &self.nonce_tracker, now, &pending)
                .map_err(|e| EngineError::RejectedTransaction(tx.txid().to_string(), e))?;
            for input in &tx.inputs {
                intra_block_spent.insert(input.previous_output);
            }
        }

        Ok(())
    }

    /// Spends inputs, creates outputs, bumps nonces, and advances the tip.
    /// Does not validate; callers must have already validated the block.
    fn apply_block_unchecked(&mut self, block: Block) -> EngineResult<()> {
        for tx in &block.transactions {
            for input in &tx.inputs {
                self.utxo_set.spend(&input.previous_output);
            }
            let txid = tx.txid();
            for (index, output) in tx.outputs.iter().enumerate() {
                self.utxo_set.create(
                    OutPoint::new(txid, index as u32),
                    Utxo::new(output.clone(), block.height(), tx.is_coinbase()),
                );
            }
            if !tx.is_coinbase() {
                if let Some(nonce) = tx.nonce {
                    self.nonce_tracker.record(tx.sender.clone(), nonce);
                }
            }
            self.emit(EngineEvent::TxAccepted(tx));
        }

        let hash = block.hash();
        let height = block.height();
        self.block_index.insert(hash, height);
        self.chain.push(block);
        let applied = self.chain.last().expect("just pushed");
        self.mempool.on_block_applied(applied);
        self.emit(EngineEvent::BlockApplied(self.chain.last().expect("just pushed")));
        Ok(())
    }

    /// Entry point for a block received from a miner or a peer. Handles
    /// orphan buffering, validation, application, fork detection, and
    /// cascading attachment of any now-attachable orphans.
    pub fn submit_block(&mut self, block: Block) -> EngineResult<()> {
        let parent_hash = block.header.previous_hash;

        if parent_hash == self.tip().hash() {
            self.validate_block(&block, self.tip())?;
            let attached_hash = block.hash();
            self.apply_block_unchecked(block)?;
            self.attach_orphans_of(attached_hash);
            return Ok(());
        }

        if let Some(&parent_height) = self.block_index.get(&parent_hash) {
            // Extends a known-but-not-current-tip main-chain ancestor: a
            // new competing side branch.
            let branch = self.fork_manager.extend_side_branch(parent_hash, block);
            return self.consider_side_branch(branch, parent_height);
        }

        if self.fork_manager.is_side_branch_tip(&parent_hash) {
            // Extends an already-buffered side branch by another block.
            let fork_height = self
                .fork_manager
                .side_branch_fork_height(&parent_hash, &self.block_index)
                .expect("side branch tip's fork point is always indexed");
            let branch = self.fork_manager.extend_side_branch(parent_hash, block);
            return self.consider_side_branch(branch, fork_height);
        }

        // Parent unknown entirely: buffer as an orphan.
        self.fork_manager.buffer_orphan(block);
        Err(EngineError::OrphanBlock)
    }

    fn attach_orphans_of(&mut self, parent_hash: Hash256) {
        let mut to_attach = self.fork_manager.take_orphans_of(&parent_hash);
        while let Some(next) = to_attach.pop() {
            let grandchildren_parent = next.hash();
            if self.submit_block(next).is_ok() {
                to_attach.extend(self.fork_manager.take_orphans_of(&grandchildren_parent));
            }
        }
    }

    fn consider_side_branch(&mut self, branch: Vec<Block>, fork_height: BlockHeight) -> EngineResult<()> {
        let suffix_start = (fork_height as usize + 1).min(self.chain.len());
        let main_suffix_work = fork::cumulative_work(&self.chain[suffix_start..]);
        let side_work = fork::cumulative_work(&branch);
        let main_len = self.chain.len();
        let side_len = fork_height as usize + branch.len();
        let side_tip = branch.last().map(Block::hash).unwrap_or_else(Hash256::zero);

        if fork::is_heavier(
            side_work,
            side_len,
            side_tip,
            main_suffix_work,
            main_len,
            self.tip().hash(),
        ) {
            self.reorg_to(branch, fork_height)
        } else {
            Ok(())
        }
    }

    /// Rolls the main chain back to `fork_height` and replays `branch`
    /// (the new blocks, in order) on top. Aborts and restores the
    /// original tip if any block in `branch` fails to revalidate.
    fn reorg_to(&mut self, branch: Vec<Block>, fork_height: BlockHeight) -> EngineResult<()> {
        if fork_height < self.checkpoint_floor {
            return Err(EngineError::BelowCheckpointFloor);
        }

        let old_tip = self.tip().hash();
        let chain_snapshot = self.chain.clone();
        let index_snapshot = self.block_index.clone();
        let utxo_snapshot = self.utxo_set.snapshot();
        let nonce_snapshot = self.nonce_tracker.snapshot();

        let mut disconnected_txs = Vec::new();
        while self.chain.len() > fork_height as usize + 1 {
            if let Some(removed) = self.chain.pop() {
                self.block_index.remove(&removed.hash());
                disconnected_txs.extend(removed.transactions.into_iter().filter(|tx| !tx.is_coinbase()));
            }
        }
        self.utxo_set = Self::rebuild_utxo_set(&self.chain);
        self.nonce_tracker = Self::rebuild_nonce_tracker(&self.chain);

        let mut reorg_failed = false;
        for block in branch {
            let parent = self.tip();
            match self.validate_block(&block, parent) {
                Ok(()) => {
                    if self.apply_block_unchecked(block).is_err() {
                        reorg_failed = true;
                        break;
                    }
                }
                Err(_) => {
                    reorg_failed = true;
                    break;
                }
            }
        }

        if reorg_failed {
            self.chain = chain_snapshot;
            self.block_index = index_snapshot;
            self.utxo_set.rollback(utxo_snapshot);
            self.nonce_tracker.rollback(nonce_snapshot);
            return Err(EngineError::ReorgAborted);
        }

        let validator = crate::validator::Validator::new(&self.params, self.network, &self.protected);
        let now = self.now();
        self.mempool.reinsert_if_valid(
            disconnected_txs,
            &validator,
            &self.utxo_set,
            &self.nonce_tracker,
            now,
        );
        self.emit(EngineEvent::Reorged {
            old_tip,
            new_tip: self.tip().hash(),
        });
        Ok(())
    }

    fn rebuild_utxo_set(chain: &[Block]) -> UtxoSet {
        let mut utxo_set = UtxoSet::new();
        for block in chain {
            for tx in &block.transactions {
                for input in &tx.inputs {
                    utxo_set.spend(&input.previous_output);
                }
                let txid = tx.txid();
                for (index, output) in tx.outputs.iter().enumerate() {
                    utxo_set.create(
                        OutPoint::new(txid, index as u32),
                        Utxo::new(output.clone(), block.height(), tx.is_coinbase()),
                    );
                }
            }
        }
        utxo_set
    }

    fn rebuild_nonce_tracker(chain: &[Block]) -> NonceTracker {
        let mut tracker = NonceTracker::new();
        for block in chain {
            for tx in &block.transactions {
                if !tx.is_coinbase() {
                    if let Some(nonce) = tx.nonce {
                        tracker.record(tx.sender.clone(), nonce);
                    }
                }
            }
        }
        tracker
    }

    /// Assembles and mines the next block on top of the current tip.
    #[must_use]
    pub fn mine_next_block(
        &self,
        config: &mining::MinerConfig,
        difficulty_bits: u32,
        timestamp: i64,
        abort: std::sync::Arc<std::sync::atomic::AtomicBool>,
    ) -> Option<Block> {
        let assembled = mining::assemble_block(
            &self.mempool,
            &self.params,
            config,
            self.height() + 1,
            self.tip().hash(),
            difficulty_bits,
            timestamp,
        );
        mining::mine(assembled, config.threads, abort)
    }

    #[must_use]
    pub fn next_difficulty(&self, window_start_timestamp: i64) -> u32 {
        mining::next_difficulty(
            &self.params,
            self.tip().header.difficulty_bits,
            window_start_timestamp,
            self.tip().header.timestamp,
        )
    }

    #[must_use]
    pub fn stats(&self) -> shared::types::ChainStats {
        shared::types::ChainStats {
            height: self.height(),
            tip_hash: self.tip().hash(),
            total_transactions: self.chain.iter().map(|b| b.transactions.len() as u64).sum(),
            total_utxos: self.utxo_set.len() as u64,
            current_difficulty_bits: self.tip().header.difficulty_bits,
            last_block_time: self.tip().header.timestamp,
            estimated_hash_rate: 0.0,
            mempool_size: self.mempool.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{TxInput, TxOutput, TxType};
    use shared::KeyPair;
    use std::collections::BTreeMap;

    fn genesis_with_allocation(recipient: Address, amount: Amount) -> (Engine, Hash256) {
        let miner = KeyPair::generate().public_key.to_address(Network::Devnet);
        let genesis_coinbase = Transaction::coinbase(0, recipient, amount, Network::Devnet, 1_700_000_000);
        let txid = genesis_coinbase.txid();
        let genesis = Block::genesis(miner, genesis_coinbase, 1_700_000_000);
        let engine = Engine::new(
            genesis,
            ConsensusParams::mainnet(),
            Network::Devnet,
            ProtectedAddresses::new(),
            MempoolConfig::default(),
        );
        (engine, txid)
    }

    #[test]
    fn genesis_allocation_is_spendable() {
        let sender = KeyPair::generate();
        let sender_address = sender.public_key.to_address(Network::Devnet);
        let (engine, _) = genesis_with_allocation(sender_address.clone(), 100 * crate::params::UNIT);
        assert_eq!(engine.balance(&sender_address), 100 * crate::params::UNIT);
    }

    #[test]
    fn scenario_genesis_then_first_spend() {
        let sender = KeyPair::generate();
        let sender_address = sender.public_key.to_address(Network::Devnet);
        let recipient_address = KeyPair::generate().public_key.to_address(Network::Devnet);
        let (mut engine, genesis_txid) = genesis_with_allocation(sender_address.clone(), 100 * crate::params::UNIT);

        let amount = 10 * crate::params::UNIT;
        let fee = crate::params::UNIT / 10;
        let change = 100 * crate::params::UNIT - amount - fee;
        let mut tx = Transaction {
            sender: sender_address.clone(),
            recipient: recipient_address.clone(),
            amount,
            fee,
            nonce: Some(1),
            timestamp: 1_700_000_100,
            public_key: None,
            signature: None,
            tx_type: TxType::Transfer,
            inputs: vec![TxInput::new(OutPoint::new(genesis_txid, 0))],
            outputs: vec![
                TxOutput::new(recipient_address.clone(), amount),
                TxOutput::new(sender_address.clone(), change),
            ],
            metadata: BTreeMap::new(),
        };
        tx.sign(&sender).unwrap();
        engine.submit_transaction(tx).unwrap();

        let miner_address = KeyPair::generate().public_key.to_address(Network::Devnet);
        let miner_config = mining::MinerConfig::new(miner_address, Network::Devnet);
        let abort = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let block = engine
            .mine_next_block(&miner_config, 1, 1_700_000_200, abort)
            .expect("difficulty 1 mines instantly");
        engine.submit_block(block).unwrap();

        assert_eq!(engine.balance(&sender_address), change);
        assert_eq!(engine.balance(&recipient_address), amount);
    }

    #[test]
    fn bad_proof_of_work_is_rejected() {
        let sender_address = KeyPair::generate().public_key.to_address(Network::Devnet);
        let (mut engine, _) = genesis_with_allocation(sender_address, 100 * crate::params::UNIT);
        let miner_address = KeyPair::generate().public_key.to_address(Network::Devnet);
        let miner_config = mining::MinerConfig::new(miner_address, Network::Devnet);
        let abort = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let mut block = engine
            .mine_next_block(&miner_config, 1, 1_700_000_200, abort)
            .unwrap();
        block.header.difficulty_bits = 250;
        assert!(matches!(engine.submit_block(block), Err(EngineError::BadProofOfWork)));
    }

    #[test]
    fn orphan_block_is_buffered_until_parent_arrives() {
        let sender_address = KeyPair::generate().public_key.to_address(Network::Devnet);
        let (mut engine, _) = genesis_with_allocation(sender_address, 100 * crate::params::UNIT);
        let miner_address = KeyPair::generate().public_key.to_address(Network::Devnet);
        let miner_config = mining::MinerConfig::new(miner_address, Network::Devnet);

        let abort1 = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let height1 = engine
            .mine_next_block(&miner_config, 1, 1_700_000_200, abort1)
            .unwrap();

        let fake_height2 = Block {
            header: crate::block::BlockHeader {
                index: 2,
                timestamp: 1_700_000_300,
                previous_hash: height1.hash(),
                merkle_root: height1.header.merkle_root,
                difficulty_bits: 1,
                nonce: 0,
                miner: height1.header.miner.clone(),
            },
            transactions: height1.transactions.clone(),
        };
        assert!(matches!(engine.submit_block(fake_height2), Err(EngineError::OrphanBlock)));
        engine.submit_block(height1).unwrap();
        assert_eq!(engine.height(), 1);
    }

    #[test]
    fn halving_boundary_changes_coinbase_reward() {
        let params = ConsensusParams::mainnet();
        assert_eq!(params.reward_at(params.halving_interval - 1), params.initial_reward);
        assert_eq!(params.reward_at(params.halving_interval), params.initial_reward / 2);
    }

    fn spend_tx(sender: &KeyPair, sender_address: Address, recipient: Address, input: Hash256, nonce: u64) -> Transaction {
        let amount = 10 * crate::params::UNIT;
        let fee = crate::params::UNIT / 10;
        let change = 100 * crate::params::UNIT - amount - fee;
        let mut tx = Transaction {
            sender: sender_address.clone(),
            recipient: recipient.clone(),
            amount,
            fee,
            nonce: Some(nonce),
            timestamp: 1_700_000_100,
            public_key: None,
            signature: None,
            tx_type: TxType::Transfer,
            inputs: vec![TxInput::new(OutPoint::new(input, 0))],
            outputs: vec![TxOutput::new(recipient, amount), TxOutput::new(sender_address, change)],
            metadata: BTreeMap::new(),
        };
        tx.sign(sender).unwrap();
        tx
    }

    #[test]
    fn scenario_double_spend_second_transaction_rejected() {
        let sender = KeyPair::generate();
        let sender_address = sender.public_key.to_address(Network::Devnet);
        let recipient_a = KeyPair::generate().public_key.to_address(Network::Devnet);
        let recipient_b = KeyPair::generate().public_key.to_address(Network::Devnet);
        let (mut engine, genesis_txid) = genesis_with_allocation(sender_address.clone(), 100 * crate::params::UNIT);

        let first = spend_tx(&sender, sender_address.clone(), recipient_a, genesis_txid, 1);
        let second = spend_tx(&sender, sender_address, recipient_b, genesis_txid, 2);

        engine.submit_transaction(first).unwrap();
        let err = engine.submit_transaction(second).unwrap_err();
        assert!(matches!(err, ValidationError::ConflictingInput | ValidationError::DoubleSpend(_)));
        assert_eq!(engine.mempool().len(), 1);
    }

    #[test]
    fn scenario_heavier_side_branch_triggers_reorg() {
        let sender_address = KeyPair::generate().public_key.to_address(Network::Devnet);
        let (mut engine, _) = genesis_with_allocation(sender_address, 100 * crate::params::UNIT);
        let miner_address = KeyPair::generate().public_key.to_address(Network::Devnet);
        let miner_config = mining::MinerConfig::new(miner_address, Network::Devnet);

        let abort = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let main_block_1 = engine
            .mine_next_block(&miner_config, 1, 1_700_000_200, abort)
            .unwrap();
        let original_tip = main_block_1.hash();
        engine.submit_block(main_block_1).unwrap();

        // A two-block side branch forking off genesis outweighs the one-block
        // main chain and should be adopted.
        let fork_block_1 = Block {
            header: crate::block::BlockHeader {
                index: 1,
                timestamp: 1_700_000_250,
                previous_hash: engine.block_by_height(0).unwrap().hash(),
                merkle_root: engine.block_by_height(0).unwrap().header.merkle_root,
                difficulty_bits: 1,
                nonce: 0,
                miner: engine.block_by_height(0).unwrap().header.miner.clone(),
            },
            transactions: engine.block_by_height(0).unwrap().transactions.clone(),
        };
        let fork_hash_1 = fork_block_1.hash();
        assert!(engine.submit_block(fork_block_1.clone()).is_ok());

        let fork_block_2 = Block {
            header: crate::block::BlockHeader {
                index: 2,
                timestamp: 1_700_000_260,
                previous_hash: fork_hash_1,
                merkle_root: fork_block_1.header.merkle_root,
                difficulty_bits: 1,
                nonce: 0,
                miner: fork_block_1.header.miner.clone(),
            },
            transactions: fork_block_1.transactions.clone(),
        };
        let fork_tip = fork_block_2.hash();
        engine.submit_block(fork_block_2).unwrap();

        assert_eq!(engine.height(), 2);
        assert_eq!(engine.tip().hash(), fork_tip);
        assert_ne!(engine.tip().hash(), original_tip);
    }
}
