use std::net::SocketAddr;
use std::sync::Arc;

use jsonrpsee::core::{async_trait, RpcResult};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObject;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use braid_core::types::{Address, UnitId};
use braid_dag::Unit;
use braid_storage::StorageEngine;

use crate::api::BraidApiServer;
use crate::types::{RpcBall, RpcMcState, RpcMessage, RpcNetworkInfo, RpcSpendableOutput, RpcUnit, RpcVersionInfo};

fn rpc_err(code: i32, msg: impl Into<String>) -> ErrorObject<'static> {
    ErrorObject::owned(code, msg.into(), None::<()>)
}

/// Shared state passed to the RPC server.
pub struct RpcServerState {
    pub storage: Arc<StorageEngine>,
    pub witnesses: Vec<Address>,
    /// Full libp2p multiaddress of this node (e.g.
    /// `/ip4/127.0.0.1/tcp/6789/p2p/<PeerId>`). Used by peers to bootstrap;
    /// returned by `braid_getNetworkInfo`.
    pub peer_multiaddr: Option<String>,
}

/// The RPC server implementation.
pub struct RpcServer {
    state: Arc<RpcServerState>,
}

impl RpcServer {
    pub fn new(state: Arc<RpcServerState>) -> Self {
        Self { state }
    }

    /// Start the JSON-RPC server on `addr` with permissive CORS headers. Returns a handle to stop it.
    pub async fn start(self, addr: SocketAddr) -> anyhow::Result<ServerHandle> {
        let cors = CorsLayer::new()
            .allow_methods(Any)
            .allow_origin(Any)
            .allow_headers(Any);

        let server = Server::builder()
            .set_http_middleware(tower::ServiceBuilder::new().layer(cors))
            .build(addr)
            .await?;

        let module = self.into_rpc();
        let handle = server.start(module);
        info!(%addr, "RPC server started");
        Ok(handle)
    }
}

fn unit_to_rpc(storage: &StorageEngine, id: &UnitId, unit: Unit) -> RpcUnit {
    let derived = storage.db.get_derived(id).ok().flatten();
    let static_props = storage.read_static_props(id).ok().flatten();
    let sequence = derived
        .as_ref()
        .map(|d| format!("{:?}", d.sequence))
        .unwrap_or_else(|| "Good".to_string());

    RpcUnit {
        unit: id.to_b64(),
        parent_units: unit.parent_units.iter().map(|p| p.to_b64()).collect(),
        last_ball_unit: unit.last_ball_unit.as_ref().map(|b| b.to_b64()),
        authors: unit.authors.iter().map(|a| a.address.to_b58()).collect(),
        messages: unit
            .messages
            .iter()
            .map(|m| RpcMessage { app: m.app.clone(), payload_hash: m.payload_hash.clone() })
            .collect(),
        timestamp: unit.timestamp,
        is_stable: derived.as_ref().map(|d| d.is_stable).unwrap_or(false),
        is_on_main_chain: derived.as_ref().map(|d| d.is_on_main_chain).unwrap_or(false),
        main_chain_index: derived.as_ref().and_then(|d| d.main_chain_index),
        level: static_props.as_ref().map(|p| p.level),
        witnessed_level: static_props.as_ref().map(|p| p.witnessed_level),
        sequence,
    }
}

#[async_trait]
impl BraidApiServer for RpcServer {
    async fn get_unit(&self, unit_id: String) -> RpcResult<Option<RpcUnit>> {
        let id = UnitId::from_b64(&unit_id).map_err(|e| rpc_err(-32602, format!("invalid unit id: {e}")))?;

        let unit = self.state.storage.read_unit_props(&id).map_err(|e| rpc_err(-32603, e.to_string()))?;

        Ok(unit.map(|u| unit_to_rpc(&self.state.storage, &id, u)))
    }

    async fn get_ball(&self, unit_id: String) -> RpcResult<Option<RpcBall>> {
        let id = UnitId::from_b64(&unit_id).map_err(|e| rpc_err(-32602, format!("invalid unit id: {e}")))?;

        let ball = self.state.storage.get_ball(&id).map_err(|e| rpc_err(-32603, e.to_string()))?;

        let Some(ball) = ball else { return Ok(None) };
        let ball_id = ball.compute_ball_id().map_err(|e| rpc_err(-32603, e.to_string()))?;

        Ok(Some(RpcBall {
            ball: ball_id.to_b64(),
            unit: ball.unit.to_b64(),
            parent_balls: ball.parent_balls.iter().map(|b| b.to_b64()).collect(),
            skiplist_balls: ball.skiplist_balls.iter().map(|b| b.to_b64()).collect(),
            is_nonserial: ball.is_nonserial,
        }))
    }

    async fn get_mc_state(&self) -> RpcResult<RpcMcState> {
        let last_stable_mci = self.state.storage.last_stable_mci().map_err(|e| rpc_err(-32603, e.to_string()))?;
        let tips = self.state.storage.list_tips().map_err(|e| rpc_err(-32603, e.to_string()))?;

        Ok(RpcMcState { last_stable_mci, tips: tips.iter().map(|t| t.to_b64()).collect() })
    }

    async fn get_unit_at_mci(&self, mci: u64) -> RpcResult<Option<String>> {
        let unit = self.state.storage.unit_at_mci(mci).map_err(|e| rpc_err(-32603, e.to_string()))?;
        Ok(unit.map(|u| u.to_b64()))
    }

    async fn get_witness_list(&self) -> RpcResult<Vec<String>> {
        Ok(self.state.witnesses.iter().map(|w| w.to_b58()).collect())
    }

    async fn get_spendable_outputs(&self, address: String) -> RpcResult<Vec<RpcSpendableOutput>> {
        let address = Address::from_b58(&address).map_err(|e| rpc_err(-32602, format!("invalid address: {e}")))?;

        let outputs = self
            .state
            .storage
            .spendable_outputs_by_address(&address)
            .map_err(|e| rpc_err(-32603, e.to_string()))?;

        Ok(outputs
            .into_iter()
            .map(|(unit, message_index, output_index, output)| RpcSpendableOutput {
                unit: unit.to_b64(),
                message_index,
                output_index,
                asset: output.asset,
                amount: output.amount,
            })
            .collect())
    }

    async fn get_network_info(&self) -> RpcResult<RpcNetworkInfo> {
        Ok(RpcNetworkInfo { peer_multiaddr: self.state.peer_multiaddr.clone().unwrap_or_default() })
    }

    async fn get_version(&self) -> RpcResult<RpcVersionInfo> {
        Ok(RpcVersionInfo {
            node_version: env!("CARGO_PKG_VERSION").to_string(),
            protocol_version: "1".to_string(),
            api_version: "1".to_string(),
        })
    }
}
