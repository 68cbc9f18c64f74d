//! Hash-tree protocol (§4.7.3): receives batches of balls ahead of the
//! units that justify them, verifying each against its declared parent/
//! skiplist balls before admitting it to the pending set.

use braid_core::constants::{B_BALLS, B_MAX};
use braid_core::error::BraidError;
use braid_core::types::{BallId, UnitId};
use braid_dag::{Ball, Unit, UnitDerived};
use braid_storage::StorageEngine;
use tracing::warn;

/// One entry in a hash-tree batch, as sent by the peer. `ball_id` is the
/// peer's claimed id for `ball` — carried separately on the wire so
/// `verify_entry` has something to check the recomputed hash against,
/// rather than recomputing a hash from the same fields it would be compared
/// to.
#[derive(Debug, Clone)]
pub struct HashTreeEntry {
    pub unit: UnitId,
    pub ball_id: BallId,
    pub ball: Ball,
}

/// Receives a batch of hash-tree entries, committing to the pending table
/// in chunks of `B_BALLS` to bound transaction size, and refusing to exceed
/// `B_MAX` outstanding pending entries.
pub fn receive_batch(storage: &StorageEngine, entries: &[HashTreeEntry]) -> Result<usize, BraidError> {
    let mut accepted = 0;
    for chunk in entries.chunks(B_BALLS) {
        for entry in chunk {
            if storage.pending_hash_tree_count() >= B_MAX {
                warn!("hash-tree pending set at capacity ({B_MAX}); further entries dropped");
                return Ok(accepted);
            }
            verify_entry(storage, entry)?;
            storage.put_pending_ball(&entry.unit, &entry.ball)?;
            accepted += 1;
        }
    }
    Ok(accepted)
}

/// Re-hashes the ball locally, confirms it matches the peer's claimed
/// `ball_id`, and confirms every referenced parent ball is already known,
/// either committed or itself pending.
fn verify_entry(storage: &StorageEngine, entry: &HashTreeEntry) -> Result<(), BraidError> {
    let recomputed = entry.ball.compute_ball_id()?;
    if recomputed != entry.ball_id {
        return Err(BraidError::Malformed(format!(
            "hash-tree entry ball id mismatch: claimed {}, recomputed {}",
            entry.ball_id, recomputed
        )));
    }
    if entry.ball.unit != entry.unit {
        return Err(BraidError::Malformed("hash-tree entry unit id mismatch".into()));
    }
    for parent_ball in &entry.ball.parent_balls {
        let known = storage.find_unit_by_ball_id(parent_ball)?.is_some()
            || storage.find_pending_by_ball_id(parent_ball)?;
        if !known {
            return Err(BraidError::Malformed("hash-tree entry references unknown parent ball".into()));
        }
    }
    Ok(())
}

/// Peer side of `GetHashTree`: collects the committed balls of every
/// main-chain unit in `[from_mci, to_mci]`, in MCI order, for a lagger to
/// verify and stage as pending entries via `receive_batch`.
pub fn produce_hash_tree(storage: &StorageEngine, from_mci: braid_core::types::Mci, to_mci: braid_core::types::Mci) -> Result<Vec<HashTreeEntry>, BraidError> {
    let mut entries = Vec::new();
    let mut mci = from_mci;
    while mci <= to_mci {
        let Some(unit) = storage.unit_at_mci(mci)? else { break; };
        if let Some(ball) = storage.get_ball(&unit)? {
            let ball_id = ball.compute_ball_id()?;
            entries.push(HashTreeEntry { unit, ball_id, ball });
        }
        mci += 1;
    }
    Ok(entries)
}

/// Once the actual unit behind a pending ball is received and validated,
/// promotes it from pending to committed if its *actual* `is_nonserial`
/// (derived from `sequence`) matches what was pending. On mismatch, evicts
/// the pending entry — the peer that sent it misrepresented the unit.
pub fn confirm_unit(storage: &StorageEngine, unit_id: &UnitId, unit: &Unit, derived: &UnitDerived) -> Result<bool, BraidError> {
    let Some(pending) = storage.get_pending_ball(unit_id)? else {
        return Ok(false);
    };
    let actual_is_nonserial = !matches!(derived.sequence, braid_core::types::Sequence::Good);
    if pending.is_nonserial != actual_is_nonserial {
        storage.evict_pending_ball(unit_id)?;
        return Err(BraidError::Malformed(format!(
            "pending ball for {unit_id} claimed is_nonserial={}, actual sequence says {}",
            pending.is_nonserial, actual_is_nonserial
        )));
    }
    storage.commit_ball(unit_id, &pending)?;
    storage.evict_pending_ball(unit_id)?;
    let _ = unit;
    Ok(true)
}
