//! The UTXO store: the authoritative record of spendable value.

use crate::transaction::TxOutput;
use serde::{Deserialize, Serialize};
use shared::types::{Amount, OutPoint};
use shared::Address;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub output: TxOutput,
    pub height: u64,
    pub is_coinbase: bool,
}

impl Utxo {
    #[must_use]
    pub const fn new(output: TxOutput, height: u64, is_coinbase: bool) -> Self {
        Self {
            output,
            height,
            is_coinbase,
        }
    }

}

/// `(txid, output_index) -> unspent output` with atomic snapshot/rollback
/// for reorg support.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoSet {
    entries: HashMap<OutPoint, Utxo>,
}

impl UtxoSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a new unspent output. Caller guarantees `outpoint` is not
    /// already present (block application never mints the same outpoint
    /// twice within a validated chain).
    pub fn create(&mut self, outpoint: OutPoint, utxo: Utxo) {
        self.entries.insert(outpoint, utxo);
    }

    /// Removes and returns the output at `outpoint`, or `None` if it is
    /// missing or already spent.
    pub fn spend(&mut self, outpoint: &OutPoint) -> Option<Utxo> {
        self.entries.remove(outpoint)
    }

    #[must_use]
    pub fn get(&self, outpoint: &OutPoint) -> Option<&Utxo> {
        self.entries.get(outpoint)
    }

    #[must_use]
    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.entries.contains_key(outpoint)
    }

    /// Sum of unspent value addressed to `address`, regardless of maturity.
    #[must_use]
    pub fn balance(&self, address: &Address) -> Amount {
        self.entries
            .values()
            .filter(|utxo| &utxo.output.address == address)
            .map(|utxo| utxo.output.amount)
            .sum()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Atomic point-in-time copy used before applying a block, so a failed
    /// application or a reorg can roll back to it in O(1) swap.
    #[must_use]
    pub fn snapshot(&self) -> Self {
        self.clone()
    }

    pub fn rollback(&mut self, snapshot: Self) {
        *self = snapshot;
    }
}
