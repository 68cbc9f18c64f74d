use anyhow::{bail, Context};

use braid_rpc::{RpcBall, RpcMcState, RpcNetworkInfo, RpcSpendableOutput, RpcUnit, RpcVersionInfo};

/// Thin JSON-RPC 2.0 client the wallet uses to talk to a running node.
///
/// Uses raw HTTP POST with serde_json rather than the full jsonrpsee client
/// to keep the wallet binary lean and dependency-minimal.
pub struct WalletRpcClient {
    url: String,
    client: reqwest::Client,
}

impl WalletRpcClient {
    pub fn new(url: &str) -> Self {
        Self { url: url.to_string(), client: reqwest::Client::new() }
    }

    /// Call a JSON-RPC method and return the `result` field.
    async fn call(&self, method: &str, params: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        let body = serde_json::json!({ "jsonrpc": "2.0", "method": method, "params": params, "id": 1 });

        let resp = self.client.post(&self.url).json(&body).send().await.with_context(|| format!("connecting to node at {}", self.url))?;
        let json: serde_json::Value = resp.json().await.context("parsing RPC response")?;

        if let Some(err) = json.get("error") {
            bail!("RPC error: {}", err);
        }
        Ok(json["result"].clone())
    }

    pub async fn get_unit(&self, unit_id: &str) -> anyhow::Result<Option<RpcUnit>> {
        let result = self.call("braid_getUnit", serde_json::json!([unit_id])).await?;
        Ok(serde_json::from_value(result).context("parsing getUnit response")?)
    }

    pub async fn get_ball(&self, unit_id: &str) -> anyhow::Result<Option<RpcBall>> {
        let result = self.call("braid_getBall", serde_json::json!([unit_id])).await?;
        Ok(serde_json::from_value(result).context("parsing getBall response")?)
    }

    pub async fn get_mc_state(&self) -> anyhow::Result<RpcMcState> {
        let result = self.call("braid_getMcState", serde_json::json!([])).await?;
        Ok(serde_json::from_value(result).context("parsing getMcState response")?)
    }

    pub async fn get_unit_at_mci(&self, mci: u64) -> anyhow::Result<Option<String>> {
        let result = self.call("braid_getUnitAtMci", serde_json::json!([mci])).await?;
        Ok(serde_json::from_value(result).context("parsing getUnitAtMci response")?)
    }

    pub async fn get_witness_list(&self) -> anyhow::Result<Vec<String>> {
        let result = self.call("braid_getWitnessList", serde_json::json!([])).await?;
        Ok(serde_json::from_value(result).context("parsing getWitnessList response")?)
    }

    pub async fn get_spendable_outputs(&self, address: &str) -> anyhow::Result<Vec<RpcSpendableOutput>> {
        let result = self.call("braid_getSpendableOutputs", serde_json::json!([address])).await?;
        Ok(serde_json::from_value(result).context("parsing getSpendableOutputs response")?)
    }

    pub async fn get_network_info(&self) -> anyhow::Result<RpcNetworkInfo> {
        let result = self.call("braid_getNetworkInfo", serde_json::json!([])).await?;
        Ok(serde_json::from_value(result).context("parsing getNetworkInfo response")?)
    }

    pub async fn get_version(&self) -> anyhow::Result<RpcVersionInfo> {
        let result = self.call("braid_getVersion", serde_json::json!([])).await?;
        Ok(serde_json::from_value(result).context("parsing getVersion response")?)
    }
}
