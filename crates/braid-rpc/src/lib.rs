//! JSON-RPC 2.0 server for braid nodes: the operator/light-client read
//! surface carried alongside the peer gossip contract, pointed at DAG/MC
//! state instead of accounts.
//!
//! Namespace: "braid"
//! Methods:
//!   braid_getUnit              — a unit (joint) by base64 unit id
//!   braid_getBall              — the committed ball for a stable unit
//!   braid_getMcState           — last_stable_mci and the current free-tip set
//!   braid_getUnitAtMci         — the unit stabilized at a given MCI
//!   braid_getWitnessList       — the configured witness list
//!   braid_getSpendableOutputs  — unspent outputs paid to an address
//!   braid_getNetworkInfo       — this node's P2P bootstrap address
//!   braid_getVersion           — node / protocol version info

pub mod api;
pub mod server;
pub mod types;

pub use server::RpcServer;
pub use server::RpcServerState;
pub use types::{RpcBall, RpcMcState, RpcNetworkInfo, RpcSpendableOutput, RpcUnit, RpcVersionInfo};
