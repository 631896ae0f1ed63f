use crate::error::CryptoError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// 256-bit hash used for every consensus commitment: transaction ids, block
/// hashes, Merkle nodes, and canonical-encoding digests.
///
/// The core uses a single hash function throughout; nothing here substitutes
/// another digest for SHA-256.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hash256([u8; 32]);

impl Hash256 {
    #[must_use]
    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Computes SHA-256 of the given bytes.
    #[must_use]
    pub fn sha256(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let result = hasher.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&result);
        Self(hash)
    }

    /// Computes SHA-256(SHA-256(data)), the double-hash used for address
    /// checksums and the Merkle tree.
    #[must_use]
    pub fn double_sha256(data: &[u8]) -> Self {
        Self::sha256(Self::sha256(data).as_bytes())
    }

    /// True if, interpreted as a big-endian 256-bit integer, the hash is
    /// less than `2^(256 - difficulty_bits)` — equivalently, the hash has at
    /// least `difficulty_bits` leading zero bits.
    #[must_use]
    pub fn meets_difficulty(&self, difficulty_bits: u32) -> bool {
        self.leading_zero_bits() >= difficulty_bits
    }

    #[must_use]
    pub fn leading_zero_bits(&self) -> u32 {
        let mut zeros = 0;
        for &byte in &self.0 {
            if byte == 0 {
                zeros += 8;
            } else {
                zeros += byte.leading_zeros();
                break;
            }
        }
        zeros
    }

    /// Interprets the hash as a big-endian 256-bit integer for comparison
    /// against a difficulty target.
    #[must_use]
    pub fn as_uint_be(&self) -> [u8; 32] {
        self.0
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for Hash256 {
    type Err = CryptoError;

    fn from_str(hex_string: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(hex_string).map_err(|_| CryptoError::InvalidEncoding)?;
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidEncoding);
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes);
        Ok(Self(hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_hash_displays_as_64_zero_chars() {
        let hash = Hash256::zero();
        assert_eq!(hash.to_string(), "0".repeat(64));
    }

    #[test]
    fn sha256_of_known_input_is_stable_and_nonzero() {
        let hash = Hash256::sha256(b"hello world");
        assert_ne!(hash, Hash256::zero());
        assert_eq!(hash, Hash256::sha256(b"hello world"));
    }

    #[test]
    fn difficulty_check_against_leading_zero_bytes() {
        let mut bytes = [0xffu8; 32];
        bytes[0] = 0;
        bytes[1] = 0;
        bytes[2] = 1;
        let easy_hash = Hash256::from_bytes(bytes);
        assert!(easy_hash.meets_difficulty(16));
        assert!(!easy_hash.meets_difficulty(17));
    }

    #[test]
    fn leading_zero_bits_counts_partial_byte() {
        let mut bytes = [0u8; 32];
        bytes[3] = 0b1000_0000;
        let hash = Hash256::from_bytes(bytes);
        assert_eq!(hash.leading_zero_bits(), 24);
    }

    #[test]
    fn round_trips_through_hex_string() {
        let hash = Hash256::sha256(b"round trip");
        let parsed: Hash256 = hash.to_string().parse().unwrap();
        assert_eq!(hash, parsed);
    }

    #[test]
    fn rejects_malformed_hex() {
        assert!("not-hex".parse::<Hash256>().is_err());
        assert!("aa".parse::<Hash256>().is_err());
    }
}
