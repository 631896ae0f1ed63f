//! Peer reputation tracking and eclipse-resistant peer-set management.

use crate::error::{GossipError, GossipResult};
use shared::types::{BlockHeight, PeerInfo, Timestamp};

/// Maximum share of the peer book a single `/16` address bucket may occupy.
/// Keeps a single network operator from filling the table and surrounding a
/// node with sockpuppet peers (an eclipse attack).
const MAX_BUCKET_SHARE: f64 = 0.2;

/// A peer's standing, tracked independently of whether it is currently
/// connected so a flaky-but-useful peer isn't discarded on first drop.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub peer_id: String,
    pub address: String,
    pub bucket: String,
    pub successes: u64,
    pub failures: u64,
    pub latency_ms_ema: f64,
    pub last_seen: Timestamp,
    pub height: BlockHeight,
    pub connected: bool,
}

impl PeerRecord {
    fn new(peer_id: String, address: String, now: Timestamp) -> Self {
        let bucket = bucket_of(&address);
        Self {
            peer_id,
            address,
            bucket,
            successes: 0,
            failures: 0,
            latency_ms_ema: 0.0,
            last_seen: now,
            height: 0,
            connected: true,
        }
    }

    /// Reputation score used for both ranking and eviction. Pure failure
    /// counts would punish a peer forever for one bad message; the ratio
    /// recovers as successes accumulate, while the latency term still
    /// favors responsive peers among otherwise-equal ones.
    #[must_use]
    pub fn score(&self) -> f64 {
        let total = (self.successes + self.failures).max(1) as f64;
        let reliability = self.successes as f64 / total;
        let latency_penalty = (self.latency_ms_ema / 1000.0).min(1.0);
        reliability - 0.1 * latency_penalty
    }

    pub fn record_success(&mut self, latency_ms: f64, now: Timestamp) {
        self.successes += 1;
        self.last_seen = now;
        self.connected = true;
        // Exponential moving average; weights the most recent sample at 20%.
        self.latency_ms_ema = if self.latency_ms_ema == 0.0 {
            latency_ms
        } else {
            0.8 * self.latency_ms_ema + 0.2 * latency_ms
        };
    }

    pub fn record_failure(&mut self, now: Timestamp) {
        self.failures += 1;
        self.last_seen = now;
    }

    fn to_info(&self) -> PeerInfo {
        PeerInfo {
            peer_id: self.peer_id.clone(),
            address: self.address.clone(),
            height: self.height,
            protocol_version: 1,
            last_seen: self.last_seen,
            connected: self.connected,
        }
    }
}

/// Buckets an address by its first two octets (a `/16`-equivalent) so peer
/// diversity can be enforced without a real GeoIP/ASN database. Addresses
/// that don't parse as `a.b.c.d:port` fall back to the whole string, which
/// simply disables bucket sharing for that entry rather than panicking.
fn bucket_of(address: &str) -> String {
    let host = address.split(':').next().unwrap_or(address);
    let octets: Vec<&str> = host.split('.').collect();
    if octets.len() == 4 {
        format!("{}.{}", octets[0], octets[1])
    } else {
        host.to_string()
    }
}

/// Bounded, reputation-ranked peer set with eclipse-resistance bucketing.
pub struct PeerBook {
    peers: std::collections::HashMap<String, PeerRecord>,
    max_peers: usize,
}

impl PeerBook {
    #[must_use]
    pub fn new(max_peers: usize) -> Self {
        Self {
            peers: std::collections::HashMap::new(),
            max_peers,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    #[must_use]
    pub fn get(&self, peer_id: &str) -> Option<&PeerRecord> {
        self.peers.get(peer_id)
    }

    /// Admits a newly discovered peer, enforcing both the table size cap
    /// and the per-bucket diversity share. Rejects the peer outright rather
    /// than evicting a diverse peer to make room for a less diverse one.
    pub fn admit(&mut self, peer_id: String, address: String, now: Timestamp) -> GossipResult<()> {
        if self.peers.contains_key(&peer_id) {
            return Ok(());
        }

        let bucket = bucket_of(&address);
        if self.peers.len() >= self.max_peers {
            if let Some(worst) = self.worst_evictable(&bucket) {
                self.peers.remove(&worst);
            } else {
                return Err(GossipError::PeerBookFull);
            }
        }

        let bucket_count = self.peers.values().filter(|p| p.bucket == bucket).count();
        let limit = (self.max_peers as f64 * MAX_BUCKET_SHARE).ceil() as usize;
        if bucket_count >= limit.max(1) {
            return Err(GossipError::DiversityRejected(peer_id));
        }

        self.peers.insert(peer_id.clone(), PeerRecord::new(peer_id, address, now));
        Ok(())
    }

    /// The lowest-score peer whose bucket is *not* `protect_bucket`, so
    /// eviction to make room never drains diversity out of the book.
    fn worst_evictable(&self, protect_bucket: &str) -> Option<String> {
        self.peers
            .values()
            .filter(|p| p.bucket != protect_bucket)
            .min_by(|a, b| a.score().partial_cmp(&b.score()).unwrap())
            .map(|p| p.peer_id.clone())
    }

    pub fn record_success(&mut self, peer_id: &str, latency_ms: f64, now: Timestamp) {
        if let Some(peer) = self.peers.get_mut(peer_id) {
            peer.record_success(latency_ms, now);
        }
    }

    pub fn record_failure(&mut self, peer_id: &str, now: Timestamp) {
        if let Some(peer) = self.peers.get_mut(peer_id) {
            peer.record_failure(now);
        }
    }

    pub fn set_height(&mut self, peer_id: &str, height: BlockHeight) {
        if let Some(peer) = self.peers.get_mut(peer_id) {
            peer.height = height;
        }
    }

    pub fn disconnect(&mut self, peer_id: &str) {
        if let Some(peer) = self.peers.get_mut(peer_id) {
            peer.connected = false;
        }
    }

    /// Drops peers unseen for longer than `max_idle_secs`, making room for a
    /// periodic refresh discovery round to replace them.
    pub fn prune_stale(&mut self, now: Timestamp, max_idle_secs: i64) {
        self.peers.retain(|_, p| now - p.last_seen <= max_idle_secs);
    }

    /// The `count` highest-reputation connected peers, the set gossip and
    /// sync requests fan out to.
    #[must_use]
    pub fn best_peers(&self, count: usize) -> Vec<String> {
        let mut ranked: Vec<&PeerRecord> = self.peers.values().filter(|p| p.connected).collect();
        ranked.sort_by(|a, b| b.score().partial_cmp(&a.score()).unwrap());
        ranked.into_iter().take(count).map(|p| p.peer_id.clone()).collect()
    }

    /// Number of distinct address buckets currently represented, the signal
    /// used to decide whether a discovery quorum is diverse enough to trust.
    #[must_use]
    pub fn distinct_buckets(&self) -> usize {
        self.peers.values().map(|p| p.bucket.clone()).collect::<std::collections::HashSet<_>>().len()
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<PeerInfo> {
        self.peers.values().map(PeerRecord::to_info).collect()
    }
}
