pub mod block;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod fork;
pub mod mempool;
pub mod mining;
pub mod nonce;
pub mod params;
pub mod transaction;
pub mod utxo;
pub mod validator;

pub use block::{Block, BlockHeader};
pub use engine::{Engine, EngineEvent};
pub use error::{EngineError, EngineResult, ValidationError, ValidationResult};
pub use fork::ForkManager;
pub use mempool::Mempool;
pub use mining::{assemble_block, mine, next_difficulty, AssembledBlock, MinerConfig};
pub use nonce::NonceTracker;
pub use params::ConsensusParams;
pub use transaction::{merkle_root, Transaction, TxInput, TxOutput, TxType};
pub use utxo::{Utxo, UtxoSet};
pub use validator::{ProtectedAddresses, Validator};

pub use shared::{Address, CryptoError, Hash256, KeyPair, Network, PublicKey, Signature};
