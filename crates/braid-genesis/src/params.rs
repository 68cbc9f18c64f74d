use braid_core::types::{Address, Balance, Timestamp};
use serde::{Deserialize, Serialize};

/// Parameters for constructing the genesis unit and its witness list.
///
/// In production the witness list and issuer keypair are fixed before any
/// node starts, via a coordinated launch ceremony; in tests, fresh keypairs
/// and an ephemeral witness list are generated.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenesisParams {
    /// Initial witness list (§3.2: `WITNESS_COUNT=12` addresses).
    pub witnesses: Vec<Address>,
    /// Total base-asset supply issued at genesis, split evenly across witnesses.
    pub initial_issue: Balance,
    /// Genesis unit timestamp.
    pub genesis_timestamp: Timestamp,
}
