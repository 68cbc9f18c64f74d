//! Catchup-chain protocol (§4.7.1), peer side: given a lagger's cursor
//! and witness list, build the witness-proof, the stable-last-ball cursor,
//! and a bounded proof-chain of balls.

use braid_core::constants::L_CHAIN;
use braid_core::error::BraidError;
use braid_core::types::{Address, Mci, UnitId};
use braid_dag::{Ball, Unit};
use braid_storage::StorageEngine;

/// What a lagging node sends to request catchup.
#[derive(Debug, Clone)]
pub struct CatchupRequest {
    pub last_stable_mci: Mci,
    pub witnesses: Vec<Address>,
}

/// What the peer returns in response (§4.7.1).
#[derive(Debug, Clone)]
pub struct CatchupResponse {
    pub witness_proof_joints: Vec<Unit>,
    pub stable_last_ball_unit: Option<UnitId>,
    pub ball_chain: Vec<Ball>,
}

/// Builds a `CatchupResponse` for `request` from this peer's own chain
/// state. Walks back from the current MC tip, collecting unstable joints
/// until a witness majority is observed, then walks the ball chain from
/// that point back toward `request.last_stable_mci`.
pub fn build_response(storage: &StorageEngine, request: &CatchupRequest) -> Result<CatchupResponse, BraidError> {
    let witness_proof_joints = collect_witness_proof_joints(storage, &request.witnesses)?;

    let stable_last_ball_unit = witness_proof_joints
        .iter()
        .rev()
        .find_map(|j| j.last_ball_unit.clone());

    let ball_chain = match &stable_last_ball_unit {
        Some(cursor_unit) => collect_ball_chain(storage, cursor_unit, request.last_stable_mci)?,
        None => Vec::new(),
    };

    Ok(CatchupResponse { witness_proof_joints, stable_last_ball_unit, ball_chain })
}

/// Walks MC units from the tip downward, in tip-first order, until a
/// majority of `witnesses` has authored a joint in the walked set.
fn collect_witness_proof_joints(storage: &StorageEngine, witnesses: &[Address]) -> Result<Vec<Unit>, BraidError> {
    let mut joints = Vec::new();
    let mut seen = std::collections::HashSet::new();
    let witness_set: std::collections::HashSet<&Address> = witnesses.iter().collect();

    let last_stable = storage.last_stable_mci()?;
    let mut mci = last_stable;
    // Walk forward from the stable frontier to the latest MC unit the peer
    // knows about; this is the unstable suffix the lagger is missing.
    let mut cursor_units = Vec::new();
    loop {
        match storage.unit_at_mci(mci)? {
            Some(u) => {
                cursor_units.push(u);
                mci += 1;
            }
            None => break,
        }
    }

    for unit_id in cursor_units.into_iter().rev() {
        let Some(unit) = storage.read_unit_props(&unit_id)? else {
            continue;
        };
        for author in &unit.authors {
            if witness_set.contains(&author.address) {
                seen.insert(author.address.clone());
            }
        }
        joints.push(unit);
        if seen.len() >= braid_core::constants::MAJORITY_WITNESSES {
            break;
        }
    }
    Ok(joints)
}

/// Proof-chain of balls from `cursor_unit` back to `floor_mci`, bounded by
/// `L_CHAIN` MCIs.
fn collect_ball_chain(storage: &StorageEngine, cursor_unit: &UnitId, floor_mci: Mci) -> Result<Vec<Ball>, BraidError> {
    let mut chain = Vec::new();
    let mut cursor = cursor_unit.clone();
    loop {
        let Some(ball) = storage.get_ball(&cursor)? else {
            break;
        };
        let Some(derived) = storage.db.get_derived(&cursor)? else {
            break;
        };
        let this_mci = derived.main_chain_index.unwrap_or(floor_mci);
        chain.push(ball);
        if this_mci <= floor_mci || chain.len() as u64 >= L_CHAIN {
            break;
        }
        let Some(parent) = derived.best_parent_unit else {
            break;
        };
        cursor = parent;
    }
    Ok(chain)
}
