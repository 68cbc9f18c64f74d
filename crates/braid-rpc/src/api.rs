use jsonrpsee::core::RpcResult;
use jsonrpsee::proc_macros::rpc;

use crate::types::{RpcBall, RpcMcState, RpcNetworkInfo, RpcSpendableOutput, RpcUnit, RpcVersionInfo};

/// Read-only JSON-RPC 2.0 surface for a braid node: replication itself runs
/// over the peer gossip contract, this is the operator/light-client
/// debugging surface carried alongside it.
///
/// All method names are prefixed with "braid_" via `namespace = "braid"`.
#[rpc(server, namespace = "braid")]
pub trait BraidApi {
    /// Look up a unit (joint) by its base64 unit id.
    #[method(name = "getUnit")]
    async fn get_unit(&self, unit_id: String) -> RpcResult<Option<RpcUnit>>;

    /// Look up the committed ball for a stable unit, by base64 unit id.
    #[method(name = "getBall")]
    async fn get_ball(&self, unit_id: String) -> RpcResult<Option<RpcBall>>;

    /// Return the current main-chain state: `last_stable_mci` and free tips.
    #[method(name = "getMcState")]
    async fn get_mc_state(&self) -> RpcResult<RpcMcState>;

    /// Return the unit id at a given main-chain index, if stabilized there.
    #[method(name = "getUnitAtMci")]
    async fn get_unit_at_mci(&self, mci: u64) -> RpcResult<Option<String>>;

    /// Return the configured witness list, as base58 addresses.
    #[method(name = "getWitnessList")]
    async fn get_witness_list(&self) -> RpcResult<Vec<String>>;

    /// Return the unspent outputs paid to a base58 address, for a wallet's
    /// coin selection.
    #[method(name = "getSpendableOutputs")]
    async fn get_spendable_outputs(&self, address: String) -> RpcResult<Vec<RpcSpendableOutput>>;

    /// Return the node's P2P identity (peer multiaddress). Other nodes pass
    /// this as `--bootstrap` to connect.
    #[method(name = "getNetworkInfo")]
    async fn get_network_info(&self) -> RpcResult<RpcNetworkInfo>;

    /// Return node and protocol version information.
    #[method(name = "getVersion")]
    async fn get_version(&self) -> RpcResult<RpcVersionInfo>;
}
