//! braid-node — the full-node binary.
//!
//! Startup sequence:
//!   1. Open (or initialise) the state database
//!   2. Apply genesis if the DB is fresh
//!   3. Start the P2P network (libp2p GossipSub + Kademlia)
//!   4. Start the JSON-RPC 2.0 server
//!   5. Run the main loop: admit inbound joints, advance the main chain

mod locks;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use braid_consensus::MainChainEngine;
use braid_core::types::{Address, Mci};
use braid_crypto::KeyPair;
use braid_genesis::{apply_genesis, GenesisParams};
use braid_p2p::{P2pConfig, P2pMessage, P2pNetwork};
use braid_rpc::{RpcServer, RpcServerState};
use braid_storage::{StateDb, StorageEngine};
use braid_sync::{chain, hashtree, HashTreeEntry};
use braid_validator::{UnitValidator, ValidationOutcome};

use locks::LockRegistry;

#[derive(Parser, Debug)]
#[command(name = "braid-node", version, about = "braid full node")]
struct Args {
    #[arg(long, default_value = "~/.braid/data")]
    data_dir: PathBuf,
    #[arg(long, default_value = "/ip4/0.0.0.0/tcp/6789")]
    p2p_listen: String,
    #[arg(long, default_value = "127.0.0.1:6545")]
    rpc_addr: SocketAddr,
    #[arg(long, value_delimiter = ',')]
    bootstrap: Vec<String>,
    #[arg(long)]
    genesis_params: Option<PathBuf>,
    #[arg(long, default_value_t = u64::MAX)]
    witness_list_lock_mci: Mci,
}

/// Bundled genesis inputs: the witness list plus the issuer keypair that
/// signs the founding unit. Serialized to disk so a fresh node can be
/// pointed at the same genesis as its peers instead of minting its own.
#[derive(Serialize, Deserialize)]
struct GenesisCeremony {
    params: GenesisParams,
    issuer_public_key: Vec<u8>,
    issuer_secret_key: Vec<u8>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,braid=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    info!("braid node starting");

    let data_dir = expand_tilde(&args.data_dir);
    std::fs::create_dir_all(&data_dir).with_context(|| format!("creating data dir {}", data_dir.display()))?;
    let db = Arc::new(StateDb::open(&data_dir).context("opening state database")?);
    let storage = Arc::new(StorageEngine::new(db));

    let witnesses: Vec<Address> = if storage.list_tips()?.is_empty() {
        info!("fresh database — applying genesis");
        let ceremony = load_or_generate_genesis(args.genesis_params.as_deref())?;
        let issuer = KeyPair::from_raw(ceremony.issuer_public_key, ceremony.issuer_secret_key);
        apply_genesis(&storage, &issuer, &ceremony.params).context("applying genesis")?;
        ceremony.params.witnesses
    } else {
        info!("existing database found — skipping genesis");
        let genesis_id = storage.unit_at_mci(0)?.context("database has tips but no unit at mci 0")?;
        let genesis = storage.read_unit_props(&genesis_id)?.context("genesis unit missing from storage")?;
        genesis.witnesses.context("genesis unit declares no witness list")?
    };

    let validator = UnitValidator::new(storage.clone(), args.witness_list_lock_mci);
    let mc_engine = MainChainEngine::new(storage.clone());
    let locks = Arc::new(LockRegistry::new());

    let p2p_config = P2pConfig {
        listen_addr: args.p2p_listen.clone(),
        bootstrap_peers: args.bootstrap.clone(),
        protocol_version: "/braid/1.0.0".into(),
        joint_topic: "braid-joints".into(),
    };
    let (p2p_network, mut p2p_handle) = P2pNetwork::new(&p2p_config).map_err(|e| anyhow::anyhow!("building P2P network: {e}"))?;
    info!(peer_id = %p2p_handle.local_peer_id, "P2P identity");

    let peer_multiaddr = format!("{}/p2p/{}", p2p_config.listen_addr, p2p_handle.local_peer_id);
    tokio::spawn(async move { p2p_network.run().await });

    let rpc_state = Arc::new(RpcServerState {
        storage: storage.clone(),
        witnesses: witnesses.clone(),
        peer_multiaddr: Some(peer_multiaddr),
    });
    let _rpc_handle = RpcServer::new(rpc_state).start(args.rpc_addr).await.context("starting RPC server")?;

    info!("node ready");

    while let Some(msg) = p2p_handle.inbound_rx.recv().await {
        if let Err(e) = handle_message(msg, &storage, &validator, &mc_engine, &witnesses, &locks).await {
            warn!(error = %e, "error handling inbound p2p message");
        }
    }

    Ok(())
}

/// Dispatches one inbound gossip message. The transport is pure broadcast —
/// there is no directed reply channel, so `CatchupRequest`/`GetHashTree`
/// responses are produced and logged locally rather than sent back to a
/// specific peer; wiring a real reply path is a transport-layer concern.
async fn handle_message(
    msg: P2pMessage,
    storage: &Arc<StorageEngine>,
    validator: &UnitValidator,
    mc_engine: &MainChainEngine,
    witnesses: &[Address],
    locks: &Arc<LockRegistry>,
) -> anyhow::Result<()> {
    match msg {
        P2pMessage::NewJoint { unit } => {
            let _hj = locks.guarded("handle_joint", &locks.handle_joint).await;
            let id = unit.compute_unit_id()?;
            let outcome = {
                let _w = locks.guarded("write", &locks.write).await;
                validator.validate(&id, &unit)?
            };
            match outcome {
                ValidationOutcome::Accepted(effects) => {
                    info!(unit = %id, "unit accepted");
                    let _w = locks.guarded("write", &locks.write).await;
                    let update = mc_engine.recompute(witnesses)?;
                    if !update.added.is_empty() || !update.stabilization.steps.is_empty() {
                        debug!(added = update.added.len(), stabilized = update.stabilization.steps.len(), "main chain advanced");
                    }
                    let _ = effects;
                }
                ValidationOutcome::Rejected(e) => warn!(unit = %id, error = %e, "unit rejected"),
                ValidationOutcome::NeedParents(missing) => debug!(unit = %id, missing = missing.len(), "unit needs parents, dropping until resynced"),
                ValidationOutcome::NeedHashTree => debug!(unit = %id, "unit awaits hash-tree confirmation"),
                ValidationOutcome::Transient(reason, _) => debug!(unit = %id, reason, "transient validation failure"),
            }
        }

        P2pMessage::CatchupRequest { last_stable_mci, witnesses: requester_witnesses, .. } => {
            let _g = locks.guarded("catchup_request", &locks.catchup_request).await;
            let request = chain::CatchupRequest { last_stable_mci, witnesses: requester_witnesses };
            let response = chain::build_response(storage, &request)?;
            debug!(joints = response.witness_proof_joints.len(), balls = response.ball_chain.len(), "served catchup request");
        }

        P2pMessage::GetHashTree { from_mci, to_mci } => {
            let _g = locks.guarded("get_history_request", &locks.get_history_request).await;
            let entries = hashtree::produce_hash_tree(storage, from_mci, to_mci)?;
            debug!(entries = entries.len(), from_mci, to_mci, "served hash-tree request");
        }

        P2pMessage::HashTreeBatch { entries } => {
            let batch: Vec<HashTreeEntry> = entries.into_iter().map(|(unit, ball_id, ball)| HashTreeEntry { unit, ball_id, ball }).collect();
            let accepted = hashtree::receive_batch(storage, &batch)?;
            debug!(accepted, "staged inbound hash-tree batch");
        }

        P2pMessage::LightGetHistory(request) => {
            if let Some(requested) = request.requested_joints {
                let found: Vec<_> = requested.iter().filter_map(|id| storage.read_unit_props(id).ok().flatten()).collect();
                debug!(requested = requested.len(), found = found.len(), "served light history request for named joints");
            }
        }

        P2pMessage::CatchupChain { .. }
        | P2pMessage::HistoryPayload { .. }
        | P2pMessage::LightGetAaResponses(_)
        | P2pMessage::AaResponses { .. }
        | P2pMessage::Error { .. } => {
            debug!("received response-shaped message over the broadcast channel; no directed request to correlate it with");
        }
    }
    Ok(())
}

fn load_or_generate_genesis(path: Option<&Path>) -> anyhow::Result<GenesisCeremony> {
    if let Some(p) = path {
        let json = std::fs::read_to_string(p).with_context(|| format!("reading genesis ceremony from {}", p.display()))?;
        return serde_json::from_str(&json).context("parsing genesis ceremony JSON");
    }
    warn!("no --genesis-params provided, generating ephemeral witnesses and issuer key — do not use in production");
    let issuer = KeyPair::generate();
    let witnesses: Vec<Address> = (0..braid_core::constants::WITNESS_COUNT).map(|_| KeyPair::generate().address.clone()).collect();
    Ok(GenesisCeremony {
        params: GenesisParams { witnesses, initial_issue: 1_000_000_000_000_000, genesis_timestamp: chrono::Utc::now().timestamp() },
        issuer_public_key: issuer.public_key.0.clone(),
        issuer_secret_key: issuer.secret_key_bytes().to_vec(),
    })
}

fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
