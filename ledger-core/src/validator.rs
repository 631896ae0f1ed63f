//! Stateless and stateful transaction admission checks, run in the fixed
//! order the component design prescribes.

use crate::error::ValidationError;
use crate::nonce::NonceTracker;
use crate::params::ConsensusParams;
use crate::transaction::{Transaction, TxType};
use crate::utxo::UtxoSet;
use shared::types::OutPoint;
use shared::{Address, Network};
use std::collections::HashSet;

/// Consensus-enforced restriction on which `tx_type`s a given address may
/// originate. Lives in the validator, not any higher layer, per design
/// notes — pre-mine reserves are a consensus rule.
#[derive(Debug, Clone, Default)]
pub struct ProtectedAddresses {
    allowed_kinds: std::collections::HashMap<Address, HashSet<&'static str>>,
}

impl ProtectedAddresses {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn protect(&mut self, address: Address, allowed: &[&'static str]) {
        self.allowed_kinds
            .insert(address, allowed.iter().copied().collect());
    }

    fn is_authorized(&self, address: &Address, tx_type: &TxType) -> bool {
        match self.allowed_kinds.get(address) {
            None => true,
            Some(allowed) => allowed.contains(tx_type_tag(tx_type)),
        }
    }
}

fn tx_type_tag(tx_type: &TxType) -> &'static str {
    match tx_type {
        TxType::Transfer => "transfer",
        TxType::Coinbase => "coinbase",
        TxType::Refund => "refund",
        TxType::Airdrop => "airdrop",
        TxType::TimeLockedRelease => "time_locked_release",
        TxType::Contract(_) => "contract",
    }
}

/// A read-only view over whatever pool of already-admitted transactions the
/// caller wants conflicts checked against (the mempool, or a block's
/// preceding transactions during block validation).
pub trait PendingConflicts {
    fn contains_txid(&self, txid: &shared::Hash256) -> bool;
    fn spends(&self, outpoint: &OutPoint) -> bool;
}

pub struct NoPendingConflicts;

impl PendingConflicts for NoPendingConflicts {
    fn contains_txid(&self, _txid: &shared::Hash256) -> bool {
        false
    }
    fn spends(&self, _outpoint: &OutPoint) -> bool {
        false
    }
}

pub struct Validator<'a> {
    pub params: &'a ConsensusParams,
    pub network: Network,
    pub protected: &'a ProtectedAddresses,
}

impl<'a> Validator<'a> {
    #[must_use]
    pub const fn new(params: &'a ConsensusParams, network: Network, protected: &'a ProtectedAddresses) -> Self {
        Self {
            params,
            network,
            protected,
        }
    }

    /// Admits `tx` against `utxo_set`/`nonce_tracker` as they stand
    /// *before* this transaction is applied, plus whatever `pending`
    /// reports as already committed to (mempool contents, or earlier
    /// transactions in the same candidate block).
    pub fn validate(
        &self,
        tx: &Transaction,
        utxo_set: &UtxoSet,
        nonce_tracker: &NonceTracker,
        now: i64,
        pending: &dyn PendingConflicts,
    ) -> Result<(), ValidationError> {
        // 1. Structural checks.
        tx.validate_structure(self.params)
            .map_err(ValidationError::MalformedTx)?;

        // 2. Timestamp bounds.
        if tx.timestamp > now + self.params.max_future_drift_secs {
            return Err(ValidationError::TimestampOutOfBounds);
        }
        let expiry_floor = now - self.params.max_future_drift_secs * 12;
        if tx.timestamp < expiry_floor {
            return Err(ValidationError::TimestampOutOfBounds);
        }

        if tx.is_coinbase() {
            return Ok(());
        }

        // 3. Identity: sender must hash from public_key.
        let public_key = tx.public_key.ok_or_else(|| {
            ValidationError::MalformedTx("non-coinbase transaction missing public_key".into())
        })?;
        if public_key.to_address(self.network) != tx.sender {
            return Err(ValidationError::SenderKeyMismatch);
        }

        // 4. Signature, with low-S enforced inside `verify_signature`.
        if !tx
            .verify_signature(self.network)
            .map_err(ValidationError::from)?
        {
            return Err(ValidationError::InvalidSignature);
        }

        // 5. Nonce.
        let expected = nonce_tracker.expected_next(&tx.sender);
        let actual = tx.nonce.ok_or_else(|| {
            ValidationError::MalformedTx("non-coinbase transaction missing nonce".into())
        })?;
        if actual != expected {
            return Err(ValidationError::BadNonce { expected, actual });
        }

        // 6. Coverage: inputs exist, are unspent, and cover amount+fee.
        let mut input_total: u128 = 0;
        for input in &tx.inputs {
            let utxo = utxo_set
                .get(&input.previous_output)
                .ok_or(ValidationError::InsufficientFunds {
                    available: 0,
                    required: tx.amount + tx.fee,
                })?;
            if utxo.output.address != tx.sender {
                return Err(ValidationError::MalformedTx(
                    "input is not owned by sender".into(),
                ));
            }
            input_total += u128::from(utxo.output.amount);
        }
        let required = u128::from(tx.amount) + u128::from(tx.fee);
        if !tx.is_coinbase() && input_total < required {
            return Err(ValidationError::InsufficientFunds {
                available: input_total as u64,
                required: required as u64,
            });
        }
        if tx.declared_output_total() as u128 > input_total {
            return Err(ValidationError::InsufficientFunds {
                available: input_total as u64,
                required: tx.declared_output_total(),
            });
        }

        // 7. Protected-address policy.
        if !self.protected.is_authorized(&tx.sender, &tx.tx_type) {
            return Err(ValidationError::ProtectedSender);
        }

        // 8. Replay & conflicts.
        if pending.contains_txid(&tx.txid()) {
            return Err(ValidationError::AlreadyKnown);
        }
        for input in &tx.inputs {
            if pending.spends(&input.previous_output) {
                return Err(ValidationError::ConflictingInput);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TxOutput;
    use shared::types::OutPoint;
    use shared::{Hash256, KeyPair};
    use std::collections::BTreeMap;

    fn setup() -> (ConsensusParams, ProtectedAddresses) {
        (ConsensusParams::mainnet(), ProtectedAddresses::new())
    }

    fn fund(utxo_set: &mut UtxoSet, address: &Address, amount: u64) -> OutPoint {
        let outpoint = OutPoint::new(Hash256::sha256(address.as_str().as_bytes()), 0);
        utxo_set.create(
            outpoint,
            crate::utxo::Utxo::new(TxOutput::new(address.clone(), amount), 1, false),
        );
        outpoint
    }

    fn signed_transfer(sender: &KeyPair, recipient: Address, amount: u64, fee: u64, nonce: u64, input: OutPoint, change_back: u64) -> Transaction {
        let sender_addr = sender.public_key.to_address(Network::Devnet);
        let mut tx = Transaction {
            sender: sender_addr.clone(),
            recipient: recipient.clone(),
            amount,
            fee,
            nonce: Some(nonce),
            timestamp: 1_700_000_000,
            public_key: None,
            signature: None,
            tx_type: TxType::Transfer,
            inputs: vec![crate::transaction::TxInput::new(input)],
            outputs: vec![
                TxOutput::new(recipient, amount),
                TxOutput::new(sender_addr, change_back),
            ],
            metadata: BTreeMap::new(),
        };
        tx.sign(sender).unwrap();
        tx
    }

    #[test]
    fn well_formed_transfer_is_admitted() {
        let (params, protected) = setup();
        let validator = Validator::new(&params, Network::Devnet, &protected);
        let sender = KeyPair::generate();
        let recipient = KeyPair::generate().public_key.to_address(Network::Devnet);
        let mut utxo_set = UtxoSet::new();
        let input = fund(&mut utxo_set, &sender.public_key.to_address(Network::Devnet), 1000);
        let tx = signed_transfer(&sender, recipient, 900, 10, 1, input, 90);
        let nonce_tracker = NonceTracker::new();
        assert!(validator
            .validate(&tx, &utxo_set, &nonce_tracker, 1_700_000_100, &NoPendingConflicts)
            .is_ok());
    }

    #[test]
    fn wrong_nonce_is_rejected() {
        let (params, protected) = setup();
        let validator = Validator::new(&params, Network::Devnet, &protected);
        let sender = KeyPair::generate();
        let recipient = KeyPair::generate().public_key.to_address(Network::Devnet);
        let mut utxo_set = UtxoSet::new();
        let input = fund(&mut utxo_set, &sender.public_key.to_address(Network::Devnet), 1000);
        let tx = signed_transfer(&sender, recipient, 900, 10, 5, input, 90);
        let nonce_tracker = NonceTracker::new();
        let err = validator
            .validate(&tx, &utxo_set, &nonce_tracker, 1_700_000_100, &NoPendingConflicts)
            .unwrap_err();
        assert!(matches!(err, ValidationError::BadNonce { expected: 1, actual: 5 }));
    }

    #[test]
    fn spending_missing_input_is_rejected() {
        let (params, protected) = setup();
        let validator = Validator::new(&params, Network::Devnet, &protected);
        let sender = KeyPair::generate();
        let recipient = KeyPair::generate().public_key.to_address(Network::Devnet);
        let utxo_set = UtxoSet::new();
        let ghost_input = OutPoint::new(Hash256::zero(), 99);
        let tx = signed_transfer(&sender, recipient, 900, 10, 1, ghost_input, 90);
        let nonce_tracker = NonceTracker::new();
        assert!(validator
            .validate(&tx, &utxo_set, &nonce_tracker, 1_700_000_100, &NoPendingConflicts)
            .is_err());
    }

    #[test]
    fn protected_sender_restricted_to_authorized_tx_type() {
        let params = ConsensusParams::mainnet();
        let mut protected = ProtectedAddresses::new();
        let sender = KeyPair::generate();
        let sender_addr = sender.public_key.to_address(Network::Devnet);
        protected.protect(sender_addr.clone(), &["refund"]);
        let validator = Validator::new(&params, Network::Devnet, &protected);
        let recipient = KeyPair::generate().public_key.to_address(Network::Devnet);
        let mut utxo_set = UtxoSet::new();
        let input = fund(&mut utxo_set, &sender_addr, 1000);
        let tx = signed_transfer(&sender, recipient, 900, 10, 1, input, 90);
        let nonce_tracker = NonceTracker::new();
        let err = validator
            .validate(&tx, &utxo_set, &nonce_tracker, 1_700_000_100, &NoPendingConflicts)
            .unwrap_err();
        assert_eq!(err, ValidationError::ProtectedSender);
    }

    struct MempoolStub {
        spent: Vec<OutPoint>,
    }
    impl PendingConflicts for MempoolStub {
        fn contains_txid(&self, _txid: &shared::Hash256) -> bool {
            false
        }
        fn spends(&self, outpoint: &OutPoint) -> bool {
            self.spent.contains(outpoint)
        }
    }

    #[test]
    fn double_spend_against_pending_pool_is_rejected() {
        let (params, protected) = setup();
        let validator = Validator::new(&params, Network::Devnet, &protected);
        let sender = KeyPair::generate();
        let recipient = KeyPair::generate().public_key.to_address(Network::Devnet);
        let mut utxo_set = UtxoSet::new();
        let input = fund(&mut utxo_set, &sender.public_key.to_address(Network::Devnet), 1000);
        let tx = signed_transfer(&sender, recipient, 900, 10, 1, input, 90);
        let nonce_tracker = NonceTracker::new();
        let pending = MempoolStub { spent: vec![input] };
        let err = validator
            .validate(&tx, &utxo_set, &nonce_tracker, 1_700_000_100, &pending)
            .unwrap_err();
        assert_eq!(err, ValidationError::ConflictingInput);
    }
}
