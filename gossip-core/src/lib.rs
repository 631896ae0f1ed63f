//! Peer reputation, gossip relay, and checkpoint sync for the node's P2P
//! layer. Transport-agnostic: this crate has no socket or libp2p code of its
//! own — it defines the message shapes, relay discipline, peer-set policy,
//! and sync state machine that a transport layer drives.

pub mod error;
pub mod gossip;
pub mod peer;
pub mod sync;

pub use error::{GossipError, GossipResult};
pub use gossip::{GossipMessage, OutboundQueue, RelayCache, MAX_MESSAGE_BYTES};
pub use peer::{PeerBook, PeerRecord};
pub use sync::{CheckpointData, QuorumTracker, SyncManager, SyncState, TrustRoot};
