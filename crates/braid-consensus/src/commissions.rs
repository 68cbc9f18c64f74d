//! Commissions (§4.6.4): paid at the moment the ancestor they are owed
//! on becomes stable, as new outputs on synthetic commission message slots.
//!
//! Real transaction messages occupy `message_index` `0..M_MAX`; commission
//! payouts are written at `u32::MAX` (headers) and `u32::MAX - 1`
//! (witnessing) on the ancestor unit itself, a message slot no real unit can
//! ever populate, so the two never collide.

use braid_core::error::BraidError;
use braid_core::types::{Address, Balance, UnitId};
use braid_dag::{Output, Unit};
use tracing::debug;

use braid_storage::StorageEngine;

const HEADERS_COMMISSION_SLOT: u32 = u32::MAX;
const WITNESSING_COMMISSION_SLOT: u32 = u32::MAX - 1;

/// Splits `total` into `n` shares as evenly as possible, remainder going to
/// the first shares so the sum always equals `total` exactly.
fn split_evenly(total: Balance, n: usize) -> Vec<Balance> {
    if n == 0 {
        return Vec::new();
    }
    let base = total / n as u64;
    let mut remainder = total % n as u64;
    (0..n)
        .map(|_| {
            if remainder > 0 {
                remainder -= 1;
                base + 1
            } else {
                base
            }
        })
        .collect()
}

fn pay_slot(
    storage: &StorageEngine,
    ancestor: &UnitId,
    message_index: u32,
    recipients: &[Address],
    total: Balance,
) -> Result<Vec<(Address, Balance)>, BraidError> {
    if recipients.is_empty() || total == 0 {
        return Ok(Vec::new());
    }
    let shares = split_evenly(total, recipients.len());
    let mut paid = Vec::new();
    for (i, (addr, amount)) in recipients.iter().zip(shares).enumerate() {
        if amount == 0 {
            continue;
        }
        let output = Output { address: addr.clone(), asset: None, amount, is_spent: false, blinding: None };
        storage.db.insert_output(ancestor, message_index, i as u32, &output)?;
        paid.push((addr.clone(), amount));
    }
    Ok(paid)
}

/// True if `ancestor` already has commission outputs recorded, i.e. it was
/// stabilized through the normal step-by-step path rather than adopted
/// wholesale via catchup.
pub fn has_commission_outputs(storage: &StorageEngine, ancestor: &UnitId) -> Result<bool, BraidError> {
    Ok(!storage.read_outputs(ancestor, HEADERS_COMMISSION_SLOT)?.is_empty()
        || !storage.read_outputs(ancestor, WITNESSING_COMMISSION_SLOT)?.is_empty())
}

/// Pays out `ancestor`'s headers and witnessing commissions now that it has
/// just become stable. Returns the outputs actually written.
pub fn pay_commissions(
    storage: &StorageEngine,
    ancestor: &UnitId,
    ancestor_unit: &Unit,
    witnesses: &[Address],
) -> Result<Vec<(Address, Balance)>, BraidError> {
    let mut written = Vec::new();

    let best_children = storage.children_of(ancestor)?;
    if let Some(winner) = best_children.iter().min_by(|a, b| a.as_bytes().cmp(b.as_bytes())) {
        if let Some(winner_unit) = storage.read_unit_props(winner)? {
            let recipients: Vec<Address> = winner_unit.authors.iter().map(|a| a.address.clone()).collect();
            written.extend(pay_slot(storage, ancestor, HEADERS_COMMISSION_SLOT, &recipients, ancestor_unit.headers_commission)?);
        }
    } else {
        debug!(unit = %ancestor, "no best-child yet; headers commission stays unclaimed");
    }

    written.extend(pay_slot(storage, ancestor, WITNESSING_COMMISSION_SLOT, witnesses, ancestor_unit.payload_commission)?);

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_evenly_distributes_remainder_to_first_shares() {
        assert_eq!(split_evenly(10, 3), vec![4, 3, 3]);
        assert_eq!(split_evenly(0, 3), vec![0, 0, 0]);
        assert_eq!(split_evenly(5, 0), Vec::<Balance>::new());
    }
}
