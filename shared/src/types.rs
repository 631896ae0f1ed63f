//! Small shared type aliases and the node-wide configuration surface.

use crate::crypto::Network;
use serde::{Deserialize, Serialize};

/// Alias for a transaction id.
pub type TxId = crate::Hash256;

/// Alias for a block hash.
pub type BlockId = crate::Hash256;

/// Monetary amount in the smallest unit (1e-8 of the base unit), matching
/// the 8 fixed decimal places required for every `amount`/`fee` field.
pub type Amount = u64;

/// Unix timestamp, seconds, UTC.
pub type Timestamp = i64;

/// Block height.
pub type BlockHeight = u64;

/// Index of an output within its transaction.
pub type OutputIndex = u32;

/// Reference to a transaction output: `(txid, output_index)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: TxId,
    pub index: OutputIndex,
}

impl OutPoint {
    #[must_use]
    pub const fn new(txid: TxId, index: OutputIndex) -> Self {
        Self { txid, index }
    }
}

/// Network a node operates on. Distinct address version bytes per network
/// (see `crypto::Network`) make cross-network address reuse fail the
/// checksum check rather than silently succeeding.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkType {
    Mainnet,
    Testnet,
    #[default]
    Devnet,
    Regtest,
}

impl From<NetworkType> for Network {
    fn from(value: NetworkType) -> Self {
        match value {
            NetworkType::Mainnet => Self::Mainnet,
            NetworkType::Testnet => Self::Testnet,
            NetworkType::Devnet => Self::Devnet,
            NetworkType::Regtest => Self::Regtest,
        }
    }
}

/// Operator-tunable mempool knobs (the closed set named in the mempool
/// component design: max transactions, max per sender, minimum fee rate,
/// expiry seconds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MempoolConfig {
    pub max_transactions: usize,
    pub max_per_sender: usize,
    pub min_fee_rate: u64,
    pub expiry_seconds: i64,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_transactions: 50_000,
            max_per_sender: 64,
            min_fee_rate: 0,
            expiry_seconds: 3 * 60 * 60,
        }
    }
}

/// Node-wide configuration: network selection, bind addresses, bootstrap
/// peers, data directory, and the operator-tunable knobs that sit above the
/// fixed consensus parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub network: NetworkType,
    pub p2p_port: u16,
    pub rpc_port: u16,
    pub bind_address: String,
    pub bootstrap_peers: Vec<String>,
    pub data_dir: String,
    pub mempool: MempoolConfig,
    pub max_block_size_bytes: usize,
    /// Hex-encoded compressed public key pinned as the checkpoint trust
    /// root. `None` disables checkpoint bootstrap (full sync from genesis).
    pub checkpoint_trust_root: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: NetworkType::Devnet,
            p2p_port: 8333,
            rpc_port: 8332,
            bind_address: "127.0.0.1".to_string(),
            bootstrap_peers: vec![],
            data_dir: "./data".to_string(),
            mempool: MempoolConfig::default(),
            max_block_size_bytes: 4_000_000,
            checkpoint_trust_root: None,
        }
    }
}

/// Read-only snapshot of chain statistics, exposed as a query (not a
/// façade) per the supplemented hashrate/stats introspection feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainStats {
    pub height: BlockHeight,
    pub tip_hash: BlockId,
    pub total_transactions: u64,
    pub total_utxos: u64,
    pub current_difficulty_bits: u32,
    pub last_block_time: Timestamp,
    pub estimated_hash_rate: f64,
    pub mempool_size: usize,
}

impl Default for ChainStats {
    fn default() -> Self {
        Self {
            height: 0,
            tip_hash: crate::Hash256::zero(),
            total_transactions: 0,
            total_utxos: 0,
            current_difficulty_bits: 1,
            last_block_time: 0,
            estimated_hash_rate: 0.0,
            mempool_size: 0,
        }
    }
}

/// Gossip-layer peer metadata, including the reputation fields needed for
/// eviction and eclipse-resistance bucketing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerInfo {
    pub peer_id: String,
    pub address: String,
    pub height: BlockHeight,
    pub protocol_version: u32,
    pub last_seen: Timestamp,
    pub connected: bool,
}
