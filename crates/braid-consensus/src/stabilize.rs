//! Advancing stability (§4.6.3): once a unit passes the stability test,
//! walk `last_stable_mci+1 ..= mci(u)` one step at a time, computing and
//! committing each step's ball atomically.

use braid_core::constants::S_STEP;
use braid_core::error::BraidError;
use braid_core::types::{BallId, Mci, Sequence, UnitId};
use braid_dag::{Ball, UnitDerived};
use tracing::{debug, info};

use braid_storage::StorageEngine;

use crate::commissions;

/// One stabilized step of a batch: the unit, its newly committed ball, and
/// the commission payouts minted in the same step.
#[derive(Debug, Clone)]
pub struct StabilizedStep {
    pub unit: UnitId,
    pub mci: Mci,
    pub ball_id: BallId,
    pub commission_outputs: usize,
}

/// Report returned by `advance_stability` describing what moved.
#[derive(Debug, Clone, Default)]
pub struct StabilizationReport {
    pub steps: Vec<StabilizedStep>,
}

/// Finds the mci that is the largest power of ten strictly less than `mci`,
/// used for the skiplist entry at every `S_STEP`-th index. Must stay
/// strictly less: at `mci` itself being a power of ten, the unit at `mci`
/// is the one currently being stabilized, whose ball isn't committed yet,
/// so `<=` would point the skiplist at its own not-yet-existing ball.
fn previous_power_of_ten(mci: Mci) -> Option<Mci> {
    if mci < 10 {
        return None;
    }
    let mut p = 1;
    while p * 10 < mci {
        p *= 10;
    }
    Some(p)
}

/// Runs the stabilization batch from `last_stable_mci+1` through `mc_path`
/// (the freshly assigned main-chain units, in mci order), stopping once a
/// unit fails to qualify. `mc_path` must already be ordered by ascending
/// mci, contiguous from `last_stable_mci+1`.
pub fn advance_stability(
    storage: &StorageEngine,
    mc_path: &[(UnitId, Mci)],
    witnesses: &[braid_core::types::Address],
) -> Result<StabilizationReport, BraidError> {
    let mut report = StabilizationReport::default();

    for (unit_id, mci) in mc_path {
        if !crate::stability::is_stable(unit_id, storage)? {
            break;
        }

        let unit = storage
            .read_unit_props(unit_id)?
            .ok_or_else(|| BraidError::Storage(format!("stabilizing unknown unit {unit_id}")))?;
        let derived = storage
            .db
            .get_derived(unit_id)?
            .ok_or_else(|| BraidError::Storage(format!("stabilizing unit {unit_id} with no derived state")))?;

        let mut parent_balls = Vec::with_capacity(unit.parent_units.len());
        for parent in &unit.parent_units {
            let ball = storage
                .get_ball(parent)?
                .ok_or_else(|| BraidError::Storage(format!("parent {parent} of {unit_id} has no ball yet")))?;
            parent_balls.push(ball.compute_ball_id()?);
        }
        parent_balls.sort();

        let mut skiplist_balls = Vec::new();
        if *mci % S_STEP == 0 {
            if let Some(skip_mci) = previous_power_of_ten(*mci) {
                if let Some(skip_unit) = storage.unit_at_mci(skip_mci)? {
                    if let Some(ball) = storage.get_ball(&skip_unit)? {
                        skiplist_balls.push(ball.compute_ball_id()?);
                    }
                }
            }
        }
        skiplist_balls.sort();

        let is_nonserial = !matches!(derived.sequence, Sequence::Good);
        let ball = Ball { unit: unit_id.clone(), parent_balls, skiplist_balls, is_nonserial };
        let ball_id = ball.compute_ball_id()?;

        if unit.messages.iter().any(|m| matches!(m.payload, Some(braid_dag::MessagePayload::AgentTrigger { .. }))) {
            debug!(unit = %unit_id, "AA trigger reaches stabilization; response execution deferred to the agent runtime");
        }

        storage.commit_ball(unit_id, &ball)?;
        storage.set_mc_position(unit_id, *mci, true)?;
        let new_derived = UnitDerived {
            is_stable: true,
            is_on_main_chain: true,
            main_chain_index: Some(*mci),
            ..derived
        };
        storage.db.put_derived(unit_id, &new_derived)?;
        storage.advance_last_stable_mci(*mci, &[])?;

        let payouts = commissions::pay_commissions(storage, unit_id, &unit, witnesses)?;

        info!(unit = %unit_id, mci, payouts = payouts.len(), "unit stabilized");
        report.steps.push(StabilizedStep {
            unit: unit_id.clone(),
            mci: *mci,
            ball_id,
            commission_outputs: payouts.len(),
        });
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn previous_power_of_ten_is_strictly_smaller_at_exact_powers() {
        assert_eq!(previous_power_of_ten(10), Some(1));
        assert_eq!(previous_power_of_ten(100), Some(10));
        assert_eq!(previous_power_of_ten(1000), Some(100));
    }

    #[test]
    fn previous_power_of_ten_rounds_down_between_powers() {
        assert_eq!(previous_power_of_ten(11), Some(10));
        assert_eq!(previous_power_of_ten(999), Some(100));
    }

    #[test]
    fn previous_power_of_ten_none_below_ten() {
        assert_eq!(previous_power_of_ten(9), None);
        assert_eq!(previous_power_of_ten(0), None);
    }
}
