//! Transaction data model, canonical encoding, and signing.

use crate::encoding::canonical_bytes;
use crate::params::ConsensusParams;
use serde::{Deserialize, Serialize};
use shared::types::{Amount, OutPoint, OutputIndex, Timestamp};
use shared::{Address, Hash256, KeyPair, PublicKey, Signature};
use std::collections::BTreeMap;

/// The closed set of recognized transaction kinds. Unrecognized kinds are a
/// hard structural-validation failure, never silently ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxType {
    Transfer,
    Coinbase,
    Refund,
    Airdrop,
    TimeLockedRelease,
    /// Reserved for account-model smart-contract hooks. The string names a
    /// sub-kind (e.g. `"deploy"`, `"call"`); the core does not interpret it
    /// beyond structural checks, leaving execution to a pluggable,
    /// per-block-deterministic executor.
    Contract(String),
}

impl TxType {
    #[must_use]
    pub fn is_coinbase(&self) -> bool {
        matches!(self, Self::Coinbase)
    }
}

/// A reference to a prior output this transaction spends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub previous_output: OutPoint,
}

impl TxInput {
    #[must_use]
    pub const fn new(previous_output: OutPoint) -> Self {
        Self { previous_output }
    }
}

/// A value assignment to an address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub address: Address,
    pub amount: Amount,
}

impl TxOutput {
    #[must_use]
    pub const fn new(address: Address, amount: Amount) -> Self {
        Self { address, amount }
    }
}

/// A canonical-encoding-derived, signed value transfer or auxiliary
/// consensus-observable operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub sender: Address,
    pub recipient: Address,
    pub amount: Amount,
    pub fee: Amount,
    pub nonce: Option<u64>,
    pub timestamp: Timestamp,
    pub public_key: Option<PublicKey>,
    pub signature: Option<Signature>,
    pub tx_type: TxType,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub metadata: BTreeMap<String, String>,
}

/// Fields used to compute `txid` and the signing digest: every field except
/// `signature` itself. `txid` is derived, not stored, so it cannot drift
/// from the content it commits to.
#[derive(Serialize)]
struct SignableTransaction<'a> {
    sender: &'a Address,
    recipient: &'a Address,
    amount: Amount,
    fee: Amount,
    nonce: Option<u64>,
    timestamp: Timestamp,
    public_key: Option<&'a PublicKey>,
    tx_type: &'a TxType,
    inputs: &'a [TxInput],
    outputs: &'a [TxOutput],
    metadata: &'a BTreeMap<String, String>,
}

impl Transaction {
    /// Builds the coinbase transaction for a given block height: sender is
    /// the coinbase sentinel, no signature, a single output paying the
    /// miner `reward(height) + fees`.
    #[must_use]
    pub fn coinbase(height: u64, miner: Address, reward_plus_fees: Amount, network: shared::Network, timestamp: Timestamp) -> Self {
        let sender = Address::coinbase_sentinel(network);
        let mut metadata = BTreeMap::new();
        metadata.insert("height".to_string(), height.to_string());
        Self {
            sender,
            recipient: miner.clone(),
            amount: reward_plus_fees,
            fee: 0,
            nonce: None,
            timestamp,
            public_key: None,
            signature: None,
            tx_type: TxType::Coinbase,
            inputs: vec![],
            outputs: vec![TxOutput::new(miner, reward_plus_fees)],
            metadata,
        }
    }

    fn signable(&self) -> SignableTransaction<'_> {
        SignableTransaction {
            sender: &self.sender,
            recipient: &self.recipient,
            amount: self.amount,
            fee: self.fee,
            nonce: self.nonce,
            timestamp: self.timestamp,
            public_key: self.public_key.as_ref(),
            tx_type: &self.tx_type,
            inputs: &self.inputs,
            outputs: &self.outputs,
            metadata: &self.metadata,
        }
    }

    /// `txid`: SHA-256 of the canonical encoding, excluding `txid` and
    /// `signature`.
    #[must_use]
    pub fn txid(&self) -> Hash256 {
        Hash256::sha256(&canonical_bytes(&self.signable()))
    }

    /// Signs the transaction in place using the canonical-encoding digest.
    pub fn sign(&mut self, keypair: &KeyPair) -> shared::Result<()> {
        self.public_key = Some(keypair.public_key);
        let digest = self.txid();
        self.signature = Some(keypair.sign(&digest)?);
        Ok(())
    }

    /// Verifies `signature` against `public_key` over the canonical digest,
    /// and that `public_key` hashes to `sender`.
    pub fn verify_signature(&self, network: shared::Network) -> shared::Result<bool> {
        let (public_key, signature) = match (&self.public_key, &self.signature) {
            (Some(pk), Some(sig)) => (pk, sig),
            _ => return Ok(false),
        };
        if public_key.to_address(network) != self.sender {
            return Ok(false);
        }
        let digest = self.txid();
        signature.verify(&digest, public_key)
    }

    #[must_use]
    pub fn is_coinbase(&self) -> bool {
        self.tx_type.is_coinbase()
    }

    /// Sum of the referenced inputs' values must be checked by the caller
    /// (it needs the UTXO set); this only checks the declared arithmetic
    /// the transaction itself asserts: `amount + fee + change`.
    #[must_use]
    pub fn declared_output_total(&self) -> Amount {
        self.outputs.iter().map(|o| o.amount).sum()
    }

    /// Rough byte size for fee-rate and block-budget accounting.
    #[must_use]
    pub fn estimated_size(&self) -> usize {
        canonical_bytes(&self.signable()).len()
            + self.signature.as_ref().map_or(0, |_| 64)
            + self.public_key.as_ref().map_or(0, |_| 33)
    }

    #[must_use]
    pub fn fee_rate(&self) -> u64 {
        let size = self.estimated_size().max(1) as u64;
        self.fee / size
    }

    /// Structural checks only: field presence/typing, string length bounds,
    /// amount ranges, tx_type recognition. Does not touch the UTXO set,
    /// nonce tracker, or signature verification — those are the validator's
    /// stateful checks.
    pub fn validate_structure(&self, params: &ConsensusParams) -> Result<(), String> {
        if self.fee > params.max_supply || self.amount > params.max_supply {
            return Err("amount or fee exceeds max supply".to_string());
        }
        if !self.is_coinbase() && self.amount == 0 {
            return Err("amount must be > 0 for non-coinbase transfers".to_string());
        }
        if !self.is_coinbase() && self.nonce.is_none() {
            return Err("nonce is required for non-coinbase transactions".to_string());
        }
        if let TxType::Contract(sub_kind) = &self.tx_type {
            if sub_kind.len() > params.max_string_field_len {
                return Err("contract sub-kind exceeds max string length".to_string());
            }
        }
        for (key, value) in &self.metadata {
            if key.len() > params.max_string_field_len || value.len() > params.max_string_field_len {
                return Err("metadata field exceeds max string length".to_string());
            }
        }
        if self.metadata.len() > 32 {
            return Err("metadata map too large".to_string());
        }
        let input_set: std::collections::HashSet<_> =
            self.inputs.iter().map(|i| &i.previous_output).collect();
        if input_set.len() != self.inputs.len() {
            return Err("duplicate inputs within a single transaction".to_string());
        }
        Ok(())
    }
}

/// Merkle root over an ordered list of txids, duplicating the last node at
/// any level with an odd count.
#[must_use]
pub fn merkle_root(txids: &[Hash256]) -> Hash256 {
    if txids.is_empty() {
        return Hash256::zero();
    }
    let mut level: Vec<Hash256> = txids.to_vec();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            level.push(*level.last().unwrap());
        }
        level = level
            .chunks(2)
            .map(|pair| {
                let mut buf = Vec::with_capacity(64);
                buf.extend_from_slice(pair[0].as_bytes());
                buf.extend_from_slice(pair[1].as_bytes());
                Hash256::sha256(&buf)
            })
            .collect();
    }
    level[0]
}
