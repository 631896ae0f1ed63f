use thiserror::Error;

/// Errors surfaced by the crypto, hashing, and address-encoding primitives.
///
/// Downstream crates (`ledger-core`, `gossip-core`) define their own error
/// enums for admission and application failures and convert a `CryptoError`
/// into their local variant via `#[from]` rather than reusing this type
/// directly, keeping validator errors distinct from engine errors distinct
/// from peer errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid signature encoding or verification failure")]
    InvalidSignature,

    #[error("signature is not in canonical low-S form")]
    NonCanonicalSignature,

    #[error("invalid key size: expected {expected}, got {actual}")]
    InvalidKeySize { expected: usize, actual: usize },

    #[error("malformed secp256k1 key or signature material")]
    InvalidKeyMaterial,

    #[error("malformed hex or byte encoding")]
    InvalidEncoding,

    #[error("address checksum mismatch")]
    BadChecksum,

    #[error("address network prefix mismatch")]
    WrongNetworkPrefix,

    #[error("address payload has the wrong length")]
    WrongAddressLength,

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
