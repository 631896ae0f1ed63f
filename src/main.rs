mod network;

use clap::Parser;
use ledger_core::{mining, Block, ConsensusParams, Engine, EngineEvent, Transaction};
use network::{P2PConfig, P2PNode};
use shared::types::NodeConfig;
use shared::{KeyPair, Network};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "pow-node")]
#[command(about = "Permissionless proof-of-work cryptocurrency node")]
#[command(version)]
struct Cli {
    /// Path to a TOML configuration file. CLI flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// P2P listen port (0 = random).
    #[arg(long)]
    p2p_port: Option<u16>,

    /// Bootstrap peer multiaddrs to dial on startup.
    #[arg(long)]
    bootstrap: Vec<String>,

    /// Mine blocks with this many worker threads (0 disables mining).
    #[arg(long, default_value = "0")]
    mining_threads: usize,

    /// Hex-encoded compressed public key the miner's reward address derives from.
    /// A fresh keypair is generated if omitted.
    #[arg(long)]
    miner_key: Option<String>,

    /// Log level (trace, debug, info, warn, error); falls back to RUST_LOG.
    #[arg(long)]
    log_level: Option<String>,
}

fn load_config(cli: &Cli) -> shared::Result<NodeConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| shared::error::CryptoError::Serialization(e.to_string()))?;
            toml::from_str(&text).map_err(|e| shared::error::CryptoError::Serialization(e.to_string()))?
        }
        None => NodeConfig::default(),
    };
    if let Some(port) = cli.p2p_port {
        config.p2p_port = port;
    }
    if !cli.bootstrap.is_empty() {
        config.bootstrap_peers = cli.bootstrap.clone();
    }
    Ok(config)
}

fn init_logging(cli: &Cli) {
    let filter = cli
        .log_level
        .clone()
        .map(tracing_subscriber::EnvFilter::new)
        .unwrap_or_else(|| tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse().unwrap()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> shared::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let node_config = load_config(&cli)?;
    let network: Network = node_config.network.into();
    info!(?network, p2p_port = node_config.p2p_port, "starting node");

    let miner_address = match &cli.miner_key {
        Some(hex_key) => {
            let public_key: shared::PublicKey =
                hex_key.parse().map_err(|_| shared::error::CryptoError::InvalidEncoding)?;
            public_key.to_address(network)
        }
        None => KeyPair::generate().public_key.to_address(network),
    };

    let params = ConsensusParams::mainnet();
    let genesis_coinbase =
        Transaction::coinbase(0, miner_address.clone(), params.initial_reward, network, 1_700_000_000);
    let genesis = Block::genesis(miner_address.clone(), genesis_coinbase, 1_700_000_000);

    let mut protected = ledger_core::ProtectedAddresses::new();
    protected.protect(shared::crypto::Address::burn_sentinel(network), &["refund", "time_locked_release"]);

    let engine = Engine::new(genesis, params, network, protected, node_config.mempool.clone());
    let engine = Arc::new(Mutex::new(engine));

    engine.lock().unwrap().on_event(Box::new(|event| match event {
        EngineEvent::BlockApplied(block) => info!(height = block.height(), hash = %block.hash(), "block applied"),
        EngineEvent::TxAccepted(tx) => info!(txid = %tx.txid(), "transaction applied"),
        EngineEvent::Reorged { old_tip, new_tip } => warn!(%old_tip, %new_tip, "chain reorganized"),
    }));

    let bootstrap_peers: Vec<libp2p::Multiaddr> = node_config
        .bootstrap_peers
        .iter()
        .filter_map(|addr| match addr.parse() {
            Ok(multiaddr) => Some(multiaddr),
            Err(e) => {
                warn!(%addr, error = %e, "skipping unparsable bootstrap peer");
                None
            }
        })
        .collect();
    let p2p_config = P2PConfig {
        listen_port: node_config.p2p_port,
        bootstrap_peers,
        ..P2PConfig::default()
    };
    let mut node = P2PNode::new(p2p_config, Arc::clone(&engine))?;
    info!(peer_id = %node.local_peer_id(), "p2p node ready");

    if cli.mining_threads > 0 {
        spawn_miner(Arc::clone(&engine), miner_address, network, cli.mining_threads, node_config.max_block_size_bytes);
    }

    tokio::select! {
        () = node.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
    }
    Ok(())
}

/// Runs the mining loop on a dedicated OS thread: assemble, mine, submit,
/// repeat. An abort flag lets a heavier externally-received block preempt
/// the in-flight search; `submit_block` acts as that preemption signal by
/// virtue of replacing the tip the next round assembles against.
fn spawn_miner(
    engine: Arc<Mutex<Engine>>,
    miner_address: shared::Address,
    network: Network,
    threads: usize,
    max_block_size_bytes: usize,
) {
    std::thread::spawn(move || {
        let mut config = mining::MinerConfig::new(miner_address, network);
        config.threads = threads;
        config.max_block_size_bytes = max_block_size_bytes;
        loop {
            let (difficulty_bits, height) = {
                let engine = engine.lock().unwrap();
                (engine.next_difficulty(engine.tip().header.timestamp - 7200), engine.height())
            };
            let timestamp = chrono::Utc::now().timestamp();
            let abort = Arc::new(AtomicBool::new(false));
            let mined = {
                let engine = engine.lock().unwrap();
                engine.mine_next_block(&config, difficulty_bits, timestamp, Arc::clone(&abort))
            };
            match mined {
                Some(block) => {
                    let mut engine = engine.lock().unwrap();
                    if let Err(e) = engine.submit_block(block) {
                        error!(error = %e, height, "mined block rejected by own engine");
                    }
                }
                None => std::thread::sleep(std::time::Duration::from_millis(200)),
            }
        }
    });
}
