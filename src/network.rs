//! libp2p transport wiring. This module owns the swarm and the wire-level
//! gossipsub and request/response protocols; all message shapes, relay
//! discipline, peer reputation, and sync-state decisions live in
//! `gossip-core` and are only invoked here.

use futures::StreamExt;
use gossip_core::{GossipMessage, OutboundQueue, PeerBook, RelayCache};
use ledger_core::Engine;
use libp2p::gossipsub::{self, IdentTopic, MessageAuthenticity};
use libp2p::kad::{self, store::MemoryStore};
use libp2p::swarm::{NetworkBehaviour, SwarmEvent};
use libp2p::{identify, mdns, ping, request_response};
use libp2p::{Multiaddr, PeerId, StreamProtocol, Swarm};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

const BLOCK_TOPIC: &str = "pow-node/blocks/1";
const TX_TOPIC: &str = "pow-node/txs/1";
const ANNOUNCE_TOPIC: &str = "pow-node/announce/1";

/// Node-level P2P configuration: listen port, bootstrap set, and the
/// peer-book sizing `gossip_core::PeerBook` enforces.
#[derive(Debug, Clone)]
pub struct P2PConfig {
    pub listen_port: u16,
    pub bootstrap_peers: Vec<Multiaddr>,
    pub max_peers: usize,
    pub relay_ttl_secs: i64,
    pub outbound_queue_capacity: usize,
}

impl Default for P2PConfig {
    fn default() -> Self {
        Self {
            listen_port: 0,
            bootstrap_peers: Vec::new(),
            max_peers: 125,
            relay_ttl_secs: 120,
            outbound_queue_capacity: 4_096,
        }
    }
}

#[derive(NetworkBehaviour)]
pub struct PowNodeBehaviour {
    gossipsub: gossipsub::Behaviour,
    mdns: mdns::tokio::Behaviour,
    identify: identify::Behaviour,
    ping: ping::Behaviour,
    kademlia: kad::Behaviour<MemoryStore>,
    request_response: request_response::cbor::Behaviour<SyncRequest, SyncResponse>,
}

/// Direct request/response pairs: point-to-point queries that don't fit
/// gossipsub's broadcast-to-everyone model.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum SyncRequest {
    GetBlocks { since_height: u64, limit: u32 },
    GetPeers,
    GetCheckpoint { height: u64 },
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum SyncResponse {
    Blocks(Vec<ledger_core::Block>),
    Peers(Vec<shared::types::PeerInfo>),
    Checkpoint(Option<gossip_core::CheckpointData>),
}

/// Owns the swarm, the shared consensus engine, and the gossip-core policy
/// state (peer reputation, relay dedup, outbound queue).
pub struct P2PNode {
    swarm: Swarm<PowNodeBehaviour>,
    engine: Arc<Mutex<Engine>>,
    peer_book: PeerBook,
    relay_cache: RelayCache,
    outbound: OutboundQueue,
    peer_addresses: HashMap<PeerId, String>,
}

impl P2PNode {
    pub fn new(config: P2PConfig, engine: Arc<Mutex<Engine>>) -> shared::Result<Self> {
        let keypair = libp2p::identity::Keypair::generate_ed25519();
        let local_peer_id = PeerId::from(keypair.public());
        info!(peer_id = %local_peer_id, "generated local libp2p identity");

        let to_net_err = |e: Box<dyn std::error::Error + Send + Sync>| {
            shared::error::CryptoError::Serialization(e.to_string())
        };

        let gossipsub_config = gossipsub::ConfigBuilder::default()
            .heartbeat_interval(Duration::from_secs(5))
            .validation_mode(gossipsub::ValidationMode::Strict)
            .max_transmit_size(gossip_core::MAX_MESSAGE_BYTES)
            .build()
            .map_err(|e| shared::error::CryptoError::Serialization(e.to_string()))?;
        let mut gossipsub = gossipsub::Behaviour::new(MessageAuthenticity::Signed(keypair.clone()), gossipsub_config)
            .map_err(|e| shared::error::CryptoError::Serialization(e.to_string()))?;
        for topic in [BLOCK_TOPIC, TX_TOPIC, ANNOUNCE_TOPIC] {
            gossipsub
                .subscribe(&IdentTopic::new(topic))
                .map_err(|e| shared::error::CryptoError::Serialization(e.to_string()))?;
        }

        let mdns = mdns::tokio::Behaviour::new(mdns::Config::default(), local_peer_id)
            .map_err(|e| to_net_err(Box::new(e)))?;
        let identify = identify::Behaviour::new(identify::Config::new(
            "/pow-node/1.0.0".to_string(),
            keypair.public(),
        ));
        let ping = ping::Behaviour::default();
        let kademlia = kad::Behaviour::new(local_peer_id, MemoryStore::new(local_peer_id));
        let request_response = request_response::cbor::Behaviour::new(
            [(StreamProtocol::new("/pow-node/sync/1"), request_response::ProtocolSupport::Full)],
            request_response::Config::default(),
        );

        let behaviour = PowNodeBehaviour {
            gossipsub,
            mdns,
            identify,
            ping,
            kademlia,
            request_response,
        };

        let mut swarm = libp2p::SwarmBuilder::with_existing_identity(keypair)
            .with_tokio()
            .with_tcp(
                libp2p::tcp::Config::default(),
                libp2p::noise::Config::new,
                libp2p::yamux::Config::default,
            )
            .map_err(|e| to_net_err(Box::new(e)))?
            .with_behaviour(|_| behaviour)
            .map_err(|e| shared::error::CryptoError::Serialization(e.to_string()))?
            .with_swarm_config(|c| c.with_idle_connection_timeout(Duration::from_secs(60)))
            .build();

        let listen_addr: Multiaddr = format!("/ip4/0.0.0.0/tcp/{}", config.listen_port)
            .parse()
            .map_err(|_| shared::error::CryptoError::InvalidEncoding)?;
        swarm
            .listen_on(listen_addr)
            .map_err(|e| shared::error::CryptoError::Serialization(e.to_string()))?;

        for addr in &config.bootstrap_peers {
            if let Err(e) = swarm.dial(addr.clone()) {
                warn!(%addr, error = %e, "failed to dial bootstrap peer");
            }
        }

        Ok(Self {
            swarm,
            engine,
            peer_book: PeerBook::new(config.max_peers),
            relay_cache: RelayCache::new(config.relay_ttl_secs),
            outbound: OutboundQueue::new(config.outbound_queue_capacity),
            peer_addresses: HashMap::new(),
        })
    }

    #[must_use]
    pub fn local_peer_id(&self) -> PeerId {
        *self.swarm.local_peer_id()
    }

    #[must_use]
    pub fn connected_peer_count(&self) -> usize {
        self.peer_book.len()
    }

    /// Queues a gossip message for broadcast, after the relay-dedup check:
    /// a message this node already relayed within the TTL window is
    /// dropped silently rather than re-broadcast. Request/response kinds go
    /// out over the direct protocol elsewhere and are rejected here.
    pub fn queue_broadcast(&mut self, now: i64, message: GossipMessage) {
        if let Some(key) = message.relay_key() {
            if self.relay_cache.already_relayed(key, now) {
                return;
            }
        }
        if !matches!(message, GossipMessage::Block(_) | GossipMessage::Tx(_) | GossipMessage::Announce(_)) {
            return;
        }
        for peer in self.peer_book.best_peers(usize::MAX) {
            self.outbound.push(peer, message.clone());
        }
        self.drain_outbound();
    }

    fn drain_outbound(&mut self) {
        while let Some((_, message)) = self.outbound.pop() {
            let topic = match &message {
                GossipMessage::Block(_) => BLOCK_TOPIC,
                GossipMessage::Tx(_) => TX_TOPIC,
                GossipMessage::Announce(_) => ANNOUNCE_TOPIC,
                _ => continue,
            };
            let bytes = match serde_json::to_vec(&message) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(error = %e, "failed to encode gossip message");
                    continue;
                }
            };
            if let Err(e) = self.swarm.behaviour_mut().gossipsub.publish(IdentTopic::new(topic), bytes) {
                debug!(error = %e, "gossipsub publish failed (likely no subscribed peers yet)");
            }
        }
    }

    /// Drives the swarm event loop. Runs until cancelled by the caller
    /// (normally a ctrl-c handler racing this future with `tokio::select!`).
    pub async fn run(&mut self) {
        loop {
            match self.swarm.select_next_some().await {
                SwarmEvent::Behaviour(PowNodeBehaviourEvent::Gossipsub(gossipsub::Event::Message {
                    propagation_source,
                    message,
                    ..
                })) => {
                    self.handle_gossip_bytes(&propagation_source, &message.data);
                }
                SwarmEvent::Behaviour(PowNodeBehaviourEvent::Mdns(mdns::Event::Discovered(peers))) => {
                    for (peer_id, addr) in peers {
                        self.admit_discovered_peer(peer_id, addr);
                    }
                }
                SwarmEvent::Behaviour(PowNodeBehaviourEvent::Mdns(mdns::Event::Expired(peers))) => {
                    for (peer_id, _) in peers {
                        self.peer_book.disconnect(&peer_id.to_string());
                    }
                }
                SwarmEvent::Behaviour(PowNodeBehaviourEvent::RequestResponse(
                    request_response::Event::Message { peer, message, .. },
                )) => {
                    self.handle_sync_message(peer, message);
                }
                SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                    self.peer_book.record_success(&peer_id.to_string(), 0.0, now());
                }
                SwarmEvent::ConnectionClosed { peer_id, .. } => {
                    self.peer_book.disconnect(&peer_id.to_string());
                }
                SwarmEvent::NewListenAddr { address, .. } => {
                    info!(%address, "listening");
                }
                _ => {}
            }
        }
    }

    fn admit_discovered_peer(&mut self, peer_id: PeerId, addr: Multiaddr) {
        let address = addr.to_string();
        self.peer_addresses.insert(peer_id, address.clone());
        if let Err(e) = self.peer_book.admit(peer_id.to_string(), address, now()) {
            debug!(%peer_id, error = %e, "peer not admitted");
            return;
        }
        self.swarm.behaviour_mut().kademlia.add_address(&peer_id, addr.clone());
        if let Err(e) = self.swarm.dial(addr) {
            debug!(%peer_id, error = %e, "dial to discovered peer failed");
        }
    }

    fn handle_gossip_bytes(&mut self, source: &PeerId, bytes: &[u8]) {
        if bytes.len() > gossip_core::MAX_MESSAGE_BYTES {
            self.peer_book.record_failure(&source.to_string(), now());
            return;
        }
        let message: GossipMessage = match serde_json::from_slice(bytes) {
            Ok(m) => m,
            Err(_) => {
                self.peer_book.record_failure(&source.to_string(), now());
                return;
            }
        };
        self.peer_book.record_success(&source.to_string(), 0.0, now());

        match message {
            GossipMessage::Tx(tx) => {
                let accepted = self.engine.lock().unwrap().submit_transaction(tx.clone());
                match accepted {
                    Ok(()) => self.queue_broadcast(now(), GossipMessage::Tx(tx)),
                    Err(e) => debug!(error = %e, "rejected gossiped transaction"),
                }
            }
            GossipMessage::Block(block) => {
                let result = self.engine.lock().unwrap().submit_block(block.clone());
                match result {
                    Ok(()) => self.queue_broadcast(now(), GossipMessage::Block(block)),
                    Err(ledger_core::EngineError::OrphanBlock) => {
                        self.request_blocks_from(*source, block.header.index.saturating_sub(1));
                    }
                    Err(e) => debug!(error = %e, "rejected gossiped block"),
                }
            }
            GossipMessage::Announce(text) => info!(%text, peer = %source, "peer announcement"),
            _ => {} // request/response kinds never arrive over gossipsub.
        }
    }

    fn request_blocks_from(&mut self, peer: PeerId, since_height: u64) {
        self.swarm
            .behaviour_mut()
            .request_response
            .send_request(&peer, SyncRequest::GetBlocks { since_height, limit: 500 });
    }

    fn handle_sync_message(&mut self, peer: PeerId, message: request_response::Message<SyncRequest, SyncResponse>) {
        match message {
            request_response::Message::Request { request, channel, .. } => {
                let response = self.answer_sync_request(request);
                let _ = self.swarm.behaviour_mut().request_response.send_response(channel, response);
            }
            request_response::Message::Response { response, .. } => {
                if let SyncResponse::Blocks(blocks) = response {
                    let mut engine = self.engine.lock().unwrap();
                    for block in blocks {
                        if let Err(e) = engine.submit_block(block) {
                            debug!(error = %e, %peer, "sync block rejected");
                        }
                    }
                }
            }
        }
    }

    fn answer_sync_request(&self, request: SyncRequest) -> SyncResponse {
        let engine = self.engine.lock().unwrap();
        match request {
            SyncRequest::GetBlocks { since_height, limit } => {
                let blocks = (since_height..=engine.height())
                    .take(limit as usize)
                    .filter_map(|h| engine.block_by_height(h).cloned())
                    .collect();
                SyncResponse::Blocks(blocks)
            }
            SyncRequest::GetPeers => SyncResponse::Peers(self.peer_book.snapshot()),
            SyncRequest::GetCheckpoint { .. } => SyncResponse::Checkpoint(None),
        }
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
