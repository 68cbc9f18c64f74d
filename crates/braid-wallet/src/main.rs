//! braid-wallet — a thin external client: generates keys, signs payment
//! units against a running node's read-only RPC surface, and broadcasts the
//! signed joint over the same gossip topic the node itself publishes to.
//!
//! There is no submit-transaction RPC method: replication is a peer-gossip
//! concern, not an RPC one, so a freshly signed unit goes out over a
//! short-lived `braid-p2p` connection instead of a direct call to the node.

mod rpc_client;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use braid_core::types::{Address, UnitId};
use braid_crypto::keypair::sig_definition;
use braid_crypto::KeyPair;
use braid_dag::{Author, Input, Message, MessagePayload, Output, Unit};
use braid_p2p::{P2pConfig, P2pMessage, P2pNetwork};

use rpc_client::WalletRpcClient;

#[derive(Parser, Debug)]
#[command(name = "braid-wallet", version, about = "braid wallet CLI")]
struct Args {
    #[arg(long, default_value = "~/.braid/wallet.json")]
    keyfile: PathBuf,
    #[arg(long, default_value = "http://127.0.0.1:6545")]
    rpc_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a fresh keypair and write it to the keyfile.
    Keygen,
    /// Print the address derived from the keyfile.
    Address,
    /// Query node / network / main-chain status.
    Info,
    /// Sum spendable outputs paid to the keyfile's address.
    Balance {
        #[arg(long)]
        asset: Option<String>,
    },
    /// Build, sign, and broadcast a payment unit.
    Send {
        /// Recipient address, base58.
        to: String,
        /// Amount in the asset's smallest unit.
        amount: u64,
        #[arg(long)]
        asset: Option<String>,
        /// Override the bootstrap multiaddr instead of asking the node for its own.
        #[arg(long)]
        bootstrap: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".parse().unwrap()))
        .init();

    let args = Args::parse();
    let keyfile = expand_tilde(&args.keyfile);

    match args.command {
        Command::Keygen => cmd_keygen(&keyfile),
        Command::Address => cmd_address(&keyfile),
        Command::Info => cmd_info(&args.rpc_url).await,
        Command::Balance { asset } => cmd_balance(&keyfile, &args.rpc_url, asset).await,
        Command::Send { to, amount, asset, bootstrap } => cmd_send(&keyfile, &args.rpc_url, &to, amount, asset, bootstrap).await,
    }
}

fn cmd_keygen(keyfile: &std::path::Path) -> anyhow::Result<()> {
    if keyfile.exists() {
        bail!("{} already exists, refusing to overwrite", keyfile.display());
    }
    let kp = KeyPair::generate();
    if let Some(parent) = keyfile.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(keyfile, serde_json::to_string_pretty(&kp)?).with_context(|| format!("writing {}", keyfile.display()))?;
    println!("generated address {}", kp.address);
    println!("keyfile written to {}", keyfile.display());
    Ok(())
}

fn cmd_address(keyfile: &std::path::Path) -> anyhow::Result<()> {
    let kp = load_keypair(keyfile)?;
    println!("{}", kp.address);
    Ok(())
}

async fn cmd_info(rpc_url: &str) -> anyhow::Result<()> {
    let rpc = WalletRpcClient::new(rpc_url);
    let version = rpc.get_version().await?;
    let network = rpc.get_network_info().await?;
    let mc_state = rpc.get_mc_state().await?;
    let witnesses = rpc.get_witness_list().await?;

    println!("node version:     {}", version.node_version);
    println!("protocol version: {}", version.protocol_version);
    println!("api version:      {}", version.api_version);
    println!("peer multiaddr:   {}", network.peer_multiaddr);
    println!("last stable mci:  {}", mc_state.last_stable_mci);
    println!("free tips:        {}", mc_state.tips.len());
    println!("witnesses:        {}", witnesses.len());
    Ok(())
}

async fn cmd_balance(keyfile: &std::path::Path, rpc_url: &str, asset: Option<String>) -> anyhow::Result<()> {
    let kp = load_keypair(keyfile)?;
    let rpc = WalletRpcClient::new(rpc_url);
    let outputs = rpc.get_spendable_outputs(&kp.address.to_b58()).await?;

    let total: u64 = outputs.iter().filter(|o| o.asset == asset).map(|o| o.amount).sum();
    let label = asset.as_deref().unwrap_or("base");
    println!("{} {} across {} unspent outputs", total, label, outputs.iter().filter(|o| o.asset == asset).count());
    Ok(())
}

async fn cmd_send(
    keyfile: &std::path::Path,
    rpc_url: &str,
    to: &str,
    amount: u64,
    asset: Option<String>,
    bootstrap: Option<String>,
) -> anyhow::Result<()> {
    let kp = load_keypair(keyfile)?;
    let to_address = Address::from_b58(to).context("parsing recipient address")?;
    let rpc = WalletRpcClient::new(rpc_url);

    let mc_state = rpc.get_mc_state().await?;
    if mc_state.tips.is_empty() {
        bail!("node reports no free tips to build on");
    }
    let parent_units: Vec<UnitId> = mc_state.tips.iter().map(|s| UnitId::from_b64(s)).collect::<Result<_, _>>().context("parsing tip unit ids")?;

    let genesis_b64 = rpc.get_unit_at_mci(0).await?.context("node has no unit at mci 0")?;
    let witness_list_unit = UnitId::from_b64(&genesis_b64).context("parsing genesis unit id")?;

    let last_ball_unit_b64 = rpc.get_unit_at_mci(mc_state.last_stable_mci).await?.context("no stable unit at last_stable_mci")?;
    let last_ball_unit = UnitId::from_b64(&last_ball_unit_b64).context("parsing last-ball unit id")?;
    let last_ball_rpc = rpc.get_ball(&last_ball_unit_b64).await?.context("last-ball unit has no committed ball")?;
    let last_ball = braid_core::types::BallId::from_b64(&last_ball_rpc.ball).context("parsing last-ball id")?;

    let spendable = rpc.get_spendable_outputs(&kp.address.to_b58()).await?;
    let (inputs, input_total) = select_coins(&spendable, &asset, amount)?;
    if input_total < amount {
        bail!("insufficient spendable balance: have {}, need {}", input_total, amount);
    }

    let mut outputs = vec![Output { address: to_address, asset: asset.clone(), amount, is_spent: false, blinding: None }];
    let change = input_total - amount;
    if change > 0 {
        outputs.push(Output { address: kp.address.clone(), asset: asset.clone(), amount: change, is_spent: false, blinding: None });
    }

    let payload = MessagePayload::Payment { inputs, outputs };
    let payload_hash = hex::encode(braid_crypto::hash_value(&serde_json::to_value(&payload)?)?);

    let mut unit = Unit {
        version: "1.0".into(),
        alt: "1".into(),
        parent_units,
        last_ball_unit: Some(last_ball_unit),
        last_ball: Some(last_ball),
        witness_list_unit: Some(witness_list_unit),
        witnesses: None,
        authors: vec![Author { address: kp.address.clone(), definition: Some(sig_definition(&kp.public_key)), authentifiers: Default::default() }],
        messages: vec![Message { app: "payment".into(), payload_hash, payload: Some(payload) }],
        headers_commission: 0,
        payload_commission: 0,
        timestamp: chrono::Utc::now().timestamp(),
        content_hash: None,
    };

    let unit_id = unit.compute_unit_id()?;
    let signature = kp.sign(unit_id.as_bytes());
    unit.authors[0].authentifiers.insert("r".into(), hex::encode(&signature.0));

    println!("built unit {unit_id}, broadcasting...");
    broadcast_joint(unit, rpc_url, bootstrap).await?;
    println!("broadcast sent for unit {unit_id}");
    Ok(())
}

/// Greedy coin selection: consume outputs of the requested asset until
/// `target` is covered. No dust consolidation, no change-minimizing — the
/// simplest rule that still produces a valid, sufficient input set.
fn select_coins(spendable: &[braid_rpc::RpcSpendableOutput], asset: &Option<String>, target: u64) -> anyhow::Result<(Vec<Input>, u64)> {
    let mut inputs = Vec::new();
    let mut total = 0u64;
    for output in spendable.iter().filter(|o| &o.asset == asset) {
        if total >= target {
            break;
        }
        let unit = UnitId::from_b64(&output.unit).context("parsing spendable output's unit id")?;
        inputs.push(Input::Transfer { unit, message_index: output.message_index, output_index: output.output_index });
        total += output.amount;
    }
    Ok((inputs, total))
}

async fn broadcast_joint(unit: Unit, rpc_url: &str, bootstrap: Option<String>) -> anyhow::Result<()> {
    let bootstrap_addr = match bootstrap {
        Some(addr) => addr,
        None => WalletRpcClient::new(rpc_url).get_network_info().await?.peer_multiaddr,
    };

    let config = P2pConfig {
        listen_addr: "/ip4/0.0.0.0/tcp/0".into(),
        bootstrap_peers: vec![bootstrap_addr],
        protocol_version: "/braid/1.0.0".into(),
        joint_topic: "braid-joints".into(),
    };
    let (network, handle) = P2pNetwork::new(&config).map_err(|e| anyhow::anyhow!("building P2P network: {e}"))?;
    tokio::spawn(async move { network.run().await });

    // Give gossipsub time to establish the mesh with the bootstrap peer
    // before publishing; a publish before mesh formation is silently dropped.
    tokio::time::sleep(Duration::from_secs(2)).await;
    handle.outbound_tx.send(P2pMessage::NewJoint { unit }).await.context("sending joint to local P2P task")?;
    tokio::time::sleep(Duration::from_secs(1)).await;
    Ok(())
}

fn load_keypair(keyfile: &std::path::Path) -> anyhow::Result<KeyPair> {
    let json = std::fs::read_to_string(keyfile).with_context(|| format!("reading keyfile {}", keyfile.display()))?;
    serde_json::from_str(&json).context("parsing keyfile")
}

fn expand_tilde(path: &std::path::Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
