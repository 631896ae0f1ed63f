//! Per-address nonce tracker: prevents replay of auxiliary (non-UTXO)
//! transactions by requiring strictly incrementing nonces per sender.

use serde::{Deserialize, Serialize};
use shared::Address;
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceTracker {
    last_used: HashMap<Address, u64>,
}

impl NonceTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The nonce a transaction from `sender` must carry to be admitted: one
    /// past whatever was last recorded, or `1` for a never-seen sender.
    #[must_use]
    pub fn expected_next(&self, sender: &Address) -> u64 {
        self.last_used.get(sender).map_or(1, |n| n + 1)
    }

    /// Records that `nonce` was used by `sender`. Callers must have already
    /// checked it equals `expected_next`.
    pub fn record(&mut self, sender: Address, nonce: u64) {
        self.last_used.insert(sender, nonce);
    }

    #[must_use]
    pub fn snapshot(&self) -> Self {
        self.clone()
    }

    pub fn rollback(&mut self, snapshot: Self) {
        *self = snapshot;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{KeyPair, Network};

    fn addr() -> Address {
        KeyPair::generate().public_key.to_address(Network::Devnet)
    }

    #[test]
    fn unseen_sender_expects_nonce_one() {
        let tracker = NonceTracker::new();
        assert_eq!(tracker.expected_next(&addr()), 1);
    }

    #[test]
    fn recorded_nonce_advances_expectation() {
        let mut tracker = NonceTracker::new();
        let sender = addr();
        tracker.record(sender.clone(), 1);
        assert_eq!(tracker.expected_next(&sender), 2);
    }

    #[test]
    fn snapshot_rollback_restores_prior_counts() {
        let mut tracker = NonceTracker::new();
        let sender = addr();
        let snapshot = tracker.snapshot();
        tracker.record(sender.clone(), 1);
        tracker.rollback(snapshot);
        assert_eq!(tracker.expected_next(&sender), 1);
    }
}
