//! Headers-commission recalculation after catchup (§4.7.4): a node that
//! jumped its stable frontier forward via witness-proof catchup adopted a
//! range of ancestors as stable without ever running them through the normal
//! step-by-step `advance_stability` path, so their commission payouts were
//! never minted. This walks that range in MCI-keyed batches of `B_COMM` and
//! pays out whatever is still missing, without loading the whole range into
//! memory at once.

use braid_core::constants::B_COMM;
use braid_core::error::BraidError;
use braid_core::types::{Address, Mci};
use tracing::{debug, info};

use braid_storage::StorageEngine;

/// Recomputes commissions for every stable unit in `from_mci..=to_mci`,
/// skipping any ancestor that already has commission outputs. Returns the
/// number of ancestors that were paid.
pub fn recalc_commissions(storage: &StorageEngine, from_mci: Mci, to_mci: Mci, witnesses: &[Address]) -> Result<usize, BraidError> {
    let mut paid = 0;
    let mut batch_start = from_mci;

    while batch_start <= to_mci {
        let batch_end = (batch_start + B_COMM - 1).min(to_mci);
        paid += recalc_batch(storage, batch_start, batch_end, witnesses)?;
        batch_start = batch_end + 1;
    }

    info!(from_mci, to_mci, paid, "headers-commission recalculation complete");
    Ok(paid)
}

fn recalc_batch(storage: &StorageEngine, start: Mci, end: Mci, witnesses: &[Address]) -> Result<usize, BraidError> {
    let mut paid = 0;
    for mci in start..=end {
        let Some(unit_id) = storage.unit_at_mci(mci)? else {
            continue;
        };
        if braid_consensus::commissions::has_commission_outputs(storage, &unit_id)? {
            continue;
        }
        let Some(unit) = storage.read_unit_props(&unit_id)? else {
            continue;
        };
        let payouts = braid_consensus::commissions::pay_commissions(storage, &unit_id, &unit, witnesses)?;
        if !payouts.is_empty() {
            paid += 1;
        } else {
            debug!(unit = %unit_id, mci, "recalc found nothing payable yet (no best-child recorded)");
        }
    }
    Ok(paid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_storage::StateDb;
    use std::sync::Arc;

    fn open_engine(name: &str) -> Arc<StorageEngine> {
        let dir = std::env::temp_dir().join(format!("braid_recalc_test_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        Arc::new(StorageEngine::new(Arc::new(StateDb::open(&dir).unwrap())))
    }

    #[test]
    fn recalc_over_empty_range_pays_nothing() {
        let storage = open_engine("empty_range");
        let witnesses: Vec<Address> = Vec::new();
        let paid = recalc_commissions(&storage, 1, 5, &witnesses).unwrap();
        assert_eq!(paid, 0);
    }
}
