pub mod crypto;
pub mod error;
pub mod hash;
pub mod types;

pub use crypto::{Address, KeyPair, Network, PrivateKey, PublicKey, Signature};
pub use error::CryptoError;
pub use hash::Hash256;

pub type Result<T> = std::result::Result<T, CryptoError>;
