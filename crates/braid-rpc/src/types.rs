use serde::{Deserialize, Serialize};

/// P2P network identity returned by `braid_getNetworkInfo`. The
/// `peer_multiaddr` is the full libp2p multiaddress (including
/// `/p2p/<PeerId>`) that other nodes should pass as `--bootstrap` to
/// connect to this node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcNetworkInfo {
    pub peer_multiaddr: String,
}

/// A single message on a unit, flattened for JSON display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcMessage {
    pub app: String,
    pub payload_hash: String,
}

/// JSON-serializable unit (joint) summary returned by `braid_getUnit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcUnit {
    pub unit: String,
    pub parent_units: Vec<String>,
    pub last_ball_unit: Option<String>,
    pub authors: Vec<String>,
    pub messages: Vec<RpcMessage>,
    pub timestamp: i64,
    pub is_stable: bool,
    pub is_on_main_chain: bool,
    pub main_chain_index: Option<u64>,
    pub level: Option<u64>,
    pub witnessed_level: Option<u64>,
    pub sequence: String,
}

/// JSON-serializable ball returned by `braid_getBall`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcBall {
    pub ball: String,
    pub unit: String,
    pub parent_balls: Vec<String>,
    pub skiplist_balls: Vec<String>,
    pub is_nonserial: bool,
}

/// Main-chain state summary returned by `braid_getMcState`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcMcState {
    pub last_stable_mci: u64,
    pub tips: Vec<String>,
}

/// One unspent output, with its spend coordinates, returned by
/// `braid_getSpendableOutputs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcSpendableOutput {
    pub unit: String,
    pub message_index: u32,
    pub output_index: u32,
    pub asset: Option<String>,
    pub amount: u64,
}

/// Node / protocol version information returned by `braid_getVersion`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcVersionInfo {
    pub node_version: String,
    pub protocol_version: String,
    pub api_version: String,
}
