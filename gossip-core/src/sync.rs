//! Checkpoint-bootstrapped sync: a trusted checkpoint tuple accepted only
//! under signature, quorum, and work thresholds, followed by ordinary
//! header-then-body sync forward from it.

use crate::error::{GossipError, GossipResult};
use serde::{Deserialize, Serialize};
use shared::types::BlockHeight;
use shared::{Hash256, PublicKey, Signature};
use std::collections::{HashMap, HashSet};

/// A checkpoint: a height/hash/work/state-root tuple signed by the trust
/// root key. `state_root` stands in for whatever snapshot-identity scheme a
/// given deployment uses; this core only ever compares it for equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointData {
    pub height: BlockHeight,
    pub hash: Hash256,
    pub cumulative_work: u128,
    pub state_root: Hash256,
    pub signature: Signature,
}

impl CheckpointData {
    fn signable_digest(height: BlockHeight, hash: Hash256, cumulative_work: u128, state_root: Hash256) -> Hash256 {
        let mut bytes = Vec::with_capacity(32 + 32 + 16 + 8);
        bytes.extend_from_slice(&height.to_be_bytes());
        bytes.extend_from_slice(hash.as_bytes());
        bytes.extend_from_slice(&cumulative_work.to_be_bytes());
        bytes.extend_from_slice(state_root.as_bytes());
        Hash256::sha256(&bytes)
    }

    #[must_use]
    pub fn digest(&self) -> Hash256 {
        Self::signable_digest(self.height, self.hash, self.cumulative_work, self.state_root)
    }
}

/// The pinned trust root a checkpoint's signature must verify against, and
/// the local minimum cumulative work a checkpoint must clear.
pub struct TrustRoot {
    pub public_key: PublicKey,
    pub minimum_work: u128,
}

impl TrustRoot {
    /// Verifies a checkpoint's signature and work floor. Quorum is tracked
    /// separately via `QuorumTracker`, since it depends on how many distinct
    /// peers echoed the same tuple, not on the tuple alone.
    pub fn verify(&self, checkpoint: &CheckpointData) -> GossipResult<()> {
        let ok = checkpoint
            .signature
            .verify(&checkpoint.digest(), &self.public_key)
            .map_err(|_| GossipError::UntrustedCheckpoint)?;
        if !ok {
            return Err(GossipError::UntrustedCheckpoint);
        }
        if checkpoint.cumulative_work < self.minimum_work {
            return Err(GossipError::InsufficientWork {
                actual: checkpoint.cumulative_work,
                minimum: self.minimum_work,
            });
        }
        Ok(())
    }
}

/// Tracks which distinct peers have echoed a given checkpoint tuple, so a
/// single malicious or duplicate peer cannot manufacture trust on its own.
pub struct QuorumTracker {
    echoes: HashMap<Hash256, HashSet<String>>,
    required: usize,
}

impl QuorumTracker {
    #[must_use]
    pub fn new(required: usize) -> Self {
        Self {
            echoes: HashMap::new(),
            required: required.max(1),
        }
    }

    /// Records that `peer_id` echoed `checkpoint` and returns whether a
    /// quorum of distinct peers now agree on this exact tuple.
    pub fn record(&mut self, peer_id: &str, checkpoint: &CheckpointData) -> bool {
        let entry = self.echoes.entry(checkpoint.digest()).or_default();
        entry.insert(peer_id.to_string());
        entry.len() >= self.required
    }

    #[must_use]
    pub fn echo_count(&self, checkpoint: &CheckpointData) -> usize {
        self.echoes.get(&checkpoint.digest()).map_or(0, HashSet::len)
    }

    pub fn require_quorum(&self, checkpoint: &CheckpointData) -> GossipResult<()> {
        let got = self.echo_count(checkpoint);
        if got < self.required {
            return Err(GossipError::NoQuorum { got, needed: self.required });
        }
        Ok(())
    }
}

/// The node's sync progress relative to its peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    /// No sync in progress; the node believes it is near the network tip.
    Idle,
    /// Waiting for a trusted, quorum-confirmed checkpoint before syncing.
    AwaitingCheckpoint,
    /// Fetching headers from `from` up to `target`.
    HeaderSync { from: BlockHeight, target: BlockHeight },
    /// Fetching full block bodies for already-accepted headers.
    BodySync { from: BlockHeight, target: BlockHeight },
    /// Caught up with the best known peer height.
    Synced,
}

/// Drives the sync state machine. Blocks at or below the checkpoint height
/// are applied without full historical transaction replay validation and
/// are never reorged beneath it (the engine enforces the latter via its own
/// checkpoint floor).
pub struct SyncManager {
    pub state: SyncState,
    trust_root: Option<TrustRoot>,
}

impl SyncManager {
    #[must_use]
    pub fn new(trust_root: Option<TrustRoot>) -> Self {
        let state = if trust_root.is_some() {
            SyncState::AwaitingCheckpoint
        } else {
            SyncState::Idle
        };
        Self { state, trust_root }
    }

    /// Attempts to adopt `checkpoint`, given it has already cleared quorum.
    /// On success moves into header sync starting at the checkpoint height;
    /// on failure the caller should discard the checkpoint and fall back to
    /// a full sync from genesis per the failure-mode contract.
    pub fn try_adopt_checkpoint(&mut self, checkpoint: &CheckpointData, quorum: &QuorumTracker) -> GossipResult<()> {
        let trust_root = self.trust_root.as_ref().ok_or(GossipError::ConflictingTrustRoot)?;
        trust_root.verify(checkpoint)?;
        quorum.require_quorum(checkpoint)?;
        self.state = SyncState::HeaderSync {
            from: checkpoint.height,
            target: checkpoint.height,
        };
        Ok(())
    }

    pub fn advance_header_sync(&mut self, new_target: BlockHeight) {
        if let SyncState::HeaderSync { from, .. } = self.state {
            self.state = SyncState::HeaderSync { from, target: new_target };
        } else {
            self.state = SyncState::HeaderSync { from: 0, target: new_target };
        }
    }

    pub fn begin_body_sync(&mut self, target: BlockHeight) {
        let from = match self.state {
            SyncState::HeaderSync { from, .. } => from,
            _ => 0,
        };
        self.state = SyncState::BodySync { from, target };
    }

    pub fn mark_synced(&mut self) {
        self.state = SyncState::Synced;
    }
}
