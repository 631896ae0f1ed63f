//! Wire message shapes and the relay discipline applied to them: dedup,
//! no echo-back-to-sender, and a bounded priority outbound queue.

use ledger_core::{Block, Transaction};
use serde::{Deserialize, Serialize};
use shared::types::{BlockHeight, PeerInfo, Timestamp};
use shared::Hash256;
use std::collections::{HashMap, VecDeque};

/// Maximum serialized message size accepted from a peer. Oversize messages
/// are rejected before deserialization is even attempted.
pub const MAX_MESSAGE_BYTES: usize = 4_000_000 + 4_096;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GossipMessage {
    Tx(Transaction),
    Block(Block),
    GetBlocks { since_height: BlockHeight, limit: u32 },
    Blocks(Vec<Block>),
    GetPeers,
    Peers(Vec<PeerInfo>),
    Announce(String),
    GetCheckpoint { height: BlockHeight },
    Checkpoint(crate::sync::CheckpointData),
}

impl GossipMessage {
    /// Identity used for relay dedup. Request-style messages (`GetBlocks`,
    /// `GetPeers`, `GetCheckpoint`) have no stable identity worth deduping
    /// and are never cached.
    #[must_use]
    pub fn relay_key(&self) -> Option<Hash256> {
        match self {
            Self::Tx(tx) => Some(tx.txid()),
            Self::Block(block) => Some(block.hash()),
            Self::Announce(text) => Some(Hash256::sha256(text.as_bytes())),
            _ => None,
        }
    }

    /// Relative broadcast priority: blocks before transactions before
    /// everything else, since a late block costs a reorg while a late
    /// transaction only costs a confirmation delay.
    #[must_use]
    pub fn priority(&self) -> u8 {
        match self {
            Self::Block(_) => 0,
            Self::Checkpoint(_) => 1,
            Self::Tx(_) => 2,
            Self::Peers(_) | Self::GetPeers => 3,
            Self::Blocks(_) | Self::GetBlocks { .. } => 3,
            Self::GetCheckpoint { .. } => 3,
            Self::Announce(_) => 4,
        }
    }
}

/// Dedup cache for relayed message identities, keyed by `relay_key()` with
/// TTL-based eviction so the map doesn't grow without bound.
pub struct RelayCache {
    seen: HashMap<Hash256, Timestamp>,
    ttl_secs: i64,
}

impl RelayCache {
    #[must_use]
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            seen: HashMap::new(),
            ttl_secs,
        }
    }

    /// Records `key` as seen and returns whether it had already been seen
    /// within the TTL window (i.e. whether relay should be suppressed).
    pub fn already_relayed(&mut self, key: Hash256, now: Timestamp) -> bool {
        if let Some(&seen_at) = self.seen.get(&key) {
            if now - seen_at <= self.ttl_secs {
                return true;
            }
        }
        self.seen.insert(key, now);
        false
    }

    pub fn evict_expired(&mut self, now: Timestamp) {
        self.seen.retain(|_, &mut seen_at| now - seen_at <= self.ttl_secs);
    }
}

#[derive(Debug, Clone)]
struct QueuedMessage {
    to_peer: String,
    message: GossipMessage,
}

/// Bounded outbound broadcast queue. When full, the lowest-priority queued
/// item is dropped to make room rather than blocking the caller or growing
/// unbounded — a late peer-list refresh is an acceptable loss, a late block
/// is not.
pub struct OutboundQueue {
    items: VecDeque<QueuedMessage>,
    capacity: usize,
}

impl OutboundQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::new(),
            capacity,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&mut self, to_peer: String, message: GossipMessage) {
        if self.items.len() >= self.capacity {
            if let Some(drop_index) = self.lowest_priority_index(message.priority()) {
                self.items.remove(drop_index);
            } else {
                // Every queued item already outranks the new one; drop it.
                return;
            }
        }
        self.items.push_back(QueuedMessage { to_peer, message });
    }

    /// Index of the queued item whose priority is no better than
    /// `incoming_priority`, if one exists — the eviction candidate.
    fn lowest_priority_index(&self, incoming_priority: u8) -> Option<usize> {
        self.items
            .iter()
            .enumerate()
            .filter(|(_, q)| q.message.priority() >= incoming_priority)
            .max_by_key(|(_, q)| q.message.priority())
            .map(|(i, _)| i)
    }

    pub fn pop(&mut self) -> Option<(String, GossipMessage)> {
        self.items.pop_front().map(|q| (q.to_peer, q.message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_cache_suppresses_repeat_within_ttl() {
        let mut cache = RelayCache::new(60);
        let key = Hash256::sha256(b"tx-1");
        assert!(!cache.already_relayed(key, 1000));
        assert!(cache.already_relayed(key, 1010));
    }

    #[test]
    fn relay_cache_allows_replay_after_ttl_expires() {
        let mut cache = RelayCache::new(60);
        let key = Hash256::sha256(b"tx-1");
        assert!(!cache.already_relayed(key, 1000));
        cache.evict_expired(1100);
        assert!(!cache.already_relayed(key, 1100));
    }

    #[test]
    fn outbound_queue_drops_lowest_priority_when_full() {
        let mut queue = OutboundQueue::new(2);
        queue.push("peer-a".into(), GossipMessage::Announce("hello".into()));
        queue.push("peer-b".into(), GossipMessage::GetPeers);
        queue.push("peer-c".into(), GossipMessage::Tx(sample_tx()));
        assert_eq!(queue.len(), 2);
        let (_, first) = queue.pop().unwrap();
        assert!(matches!(first, GossipMessage::Tx(_)));
    }

    fn sample_tx() -> Transaction {
        let network = shared::Network::Devnet;
        let address = shared::KeyPair::generate().public_key.to_address(network);
        Transaction::coinbase(0, address, 100, network, 1_700_000_000)
    }
}
