use thiserror::Error;

/// Errors surfaced by peer bookkeeping, gossip relay, and checkpoint sync.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GossipError {
    #[error("peer book is full and no lower-reputation peer could be evicted")]
    PeerBookFull,

    #[error("peer {0} rejected: insufficient network diversity in its address bucket")]
    DiversityRejected(String),

    #[error("message exceeds the maximum allowed size ({actual} > {max})")]
    OversizeMessage { actual: usize, max: usize },

    #[error("peer {0} exceeded its rate limit")]
    RateLimited(String),

    #[error("checkpoint signature does not verify against the pinned trust root")]
    UntrustedCheckpoint,

    #[error("checkpoint conflicts with the hardcoded trust root")]
    ConflictingTrustRoot,

    #[error("checkpoint cumulative work {actual} is below the pinned minimum {minimum}")]
    InsufficientWork { actual: u128, minimum: u128 },

    #[error("checkpoint lacks quorum: {got} of {needed} required distinct peers")]
    NoQuorum { got: usize, needed: usize },
}

pub type GossipResult<T> = std::result::Result<T, GossipError>;
