use shared::CryptoError;
use thiserror::Error;

/// Transaction admission failures, in the taxonomy the validator returns.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("malformed transaction: {0}")]
    MalformedTx(String),

    #[error("timestamp out of bounds")]
    TimestampOutOfBounds,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("sender does not match public key")]
    SenderKeyMismatch,

    #[error("bad nonce: expected {expected}, got {actual}")]
    BadNonce { expected: u64, actual: u64 },

    #[error("insufficient funds: inputs cover {available}, need {required}")]
    InsufficientFunds { available: u64, required: u64 },

    #[error("double spend on input {0:?}")]
    DoubleSpend(shared::types::OutPoint),

    #[error("sender is protected and may not originate this tx_type")]
    ProtectedSender,

    #[error("transaction already present")]
    AlreadyKnown,

    #[error("conflicts with a pending transaction on the same input")]
    ConflictingInput,

    #[error("unrecognized tx_type")]
    UnrecognizedTxType,
}

impl From<CryptoError> for ValidationError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::InvalidSignature | CryptoError::NonCanonicalSignature => {
                Self::InvalidSignature
            }
            other => Self::MalformedTx(other.to_string()),
        }
    }
}

/// Block-application failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("invalid block: {0}")]
    InvalidBlock(String),

    #[error("block hash does not meet the claimed difficulty target")]
    BadProofOfWork,

    #[error("merkle root mismatch")]
    BadMerkleRoot,

    #[error("previous_hash is unknown, buffered as orphan")]
    OrphanBlock,

    #[error("timestamp is not strictly greater than parent or exceeds future drift")]
    BadTimestamp,

    #[error("coinbase transaction is missing, duplicated, or mispriced")]
    BadCoinbase,

    #[error("transaction {0} rejected during block validation: {1}")]
    RejectedTransaction(String, ValidationError),

    #[error("reorg failed to replay cleanly, tip restored to previous value")]
    ReorgAborted,

    #[error("refusing to reorg below the checkpoint floor")]
    BelowCheckpointFloor,

    #[error("fatal chain-state corruption detected at startup: {0}")]
    FatalCorruption(String),
}

pub type ValidationResult<T> = std::result::Result<T, ValidationError>;
pub type EngineResult<T> = std::result::Result<T, EngineError>;
