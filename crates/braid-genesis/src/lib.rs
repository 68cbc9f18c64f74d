//! Builds the genesis unit and witness list, writing directly into a
//! `StorageEngine` without going through the normal validator pipeline —
//! the genesis unit has no parents and no prior state to validate against;
//! it is the founding joint every other unit ultimately descends from.

pub mod params;

pub use params::GenesisParams;

use std::collections::BTreeMap;

use braid_core::error::BraidError;
use braid_core::types::Mci;
use braid_crypto::keypair::sig_definition;
use braid_crypto::KeyPair;
use braid_dag::{Author, Ball, Input, Message, MessagePayload, Output, Unit, UnitDerived};
use braid_storage::StorageEngine;
use tracing::info;

const GENESIS_MCI: Mci = 0;

/// Splits `total` into `n` shares as evenly as possible, remainder to the
/// first shares, so the sum always equals `total` exactly.
fn split_evenly(total: u64, n: usize) -> Vec<u64> {
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

/// Builds the genesis unit: a single `Issue` input minting `initial_issue`
/// of the base asset, split evenly across `params.witnesses` as outputs,
/// authored and self-signed by `issuer`, carrying the witness list inline
/// (there is no prior `witness_list_unit` to point to).
///
/// Writes the unit, its ball, and all derived/main-chain state directly —
/// no PoW, no parent lookups, no conflict detection. This is the one place
/// in the protocol where a unit is admitted without running the validator.
///
/// # Panics
/// Panics if `storage` is not empty (genesis may only be applied once).
pub fn apply_genesis(storage: &StorageEngine, issuer: &KeyPair, params: &GenesisParams) -> Result<braid_core::types::UnitId, BraidError> {
    assert!(storage.list_tips()?.is_empty(), "genesis may only be applied to an empty storage engine");

    info!(witnesses = params.witnesses.len(), amount = params.initial_issue, "applying genesis");

    let outputs: Vec<Output> = split_evenly(params.initial_issue, params.witnesses.len())
        .into_iter()
        .zip(params.witnesses.iter())
        .map(|(amount, address)| Output { address: address.clone(), asset: None, amount, is_spent: false, blinding: None })
        .collect();

    let payload = MessagePayload::Payment { inputs: vec![Input::Issue { serial_number: 0, amount: params.initial_issue }], outputs: outputs.clone() };
    let payload_hash = hex::encode(braid_crypto::hash_value(&serde_json::to_value(&payload).map_err(|e| BraidError::Malformed(e.to_string()))?)?);

    let mut unit = Unit {
        version: "1.0".into(),
        alt: "1".into(),
        parent_units: vec![],
        last_ball_unit: None,
        last_ball: None,
        witness_list_unit: None,
        witnesses: Some(params.witnesses.clone()),
        authors: vec![Author { address: issuer.address.clone(), definition: Some(sig_definition(&issuer.public_key)), authentifiers: BTreeMap::new() }],
        messages: vec![Message { app: "payment".into(), payload_hash, payload: Some(payload) }],
        headers_commission: 0,
        payload_commission: 0,
        timestamp: params.genesis_timestamp,
        content_hash: None,
    };

    let unit_id = unit.compute_unit_id()?;
    let signature = issuer.sign(unit_id.as_bytes());
    unit.authors[0].authentifiers.insert("r".into(), hex::encode(&signature.0));

    let derived = UnitDerived {
        level: 0,
        witnessed_level: 0,
        best_parent_unit: None,
        limci: GENESIS_MCI,
        main_chain_index: Some(GENESIS_MCI),
        is_on_main_chain: true,
        is_stable: true,
        sequence: braid_core::types::Sequence::Good,
    };

    let ball = Ball { unit: unit_id.clone(), parent_balls: vec![], skiplist_balls: vec![], is_nonserial: false };

    storage.db.put_unit(&unit_id, &unit)?;
    storage.db.put_derived(&unit_id, &derived)?;
    storage.db.index_author(&issuer.address, &unit_id)?;
    for (i, output) in outputs.iter().enumerate() {
        storage.db.insert_output(&unit_id, 0, i as u32, output)?;
    }
    storage.commit_ball(&unit_id, &ball)?;
    storage.set_mc_position(&unit_id, GENESIS_MCI, true)?;
    storage.db.record_tip_transition(&unit_id, &[])?;
    storage.db.set_last_stable_mci(GENESIS_MCI)?;
    storage.db.flush()?;

    info!(unit = %unit_id, "genesis unit committed");
    Ok(unit_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_storage::StateDb;
    use std::sync::Arc;

    fn open_engine(name: &str) -> StorageEngine {
        let dir = std::env::temp_dir().join(format!("braid_genesis_test_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        StorageEngine::new(Arc::new(StateDb::open(&dir).unwrap()))
    }

    fn test_params(witnesses: Vec<braid_core::types::Address>) -> GenesisParams {
        GenesisParams { witnesses, initial_issue: 1_200_000_000, genesis_timestamp: 1_767_225_599 }
    }

    #[test]
    fn genesis_distributes_full_supply_across_witnesses() {
        let storage = open_engine("full_supply");
        let issuer = KeyPair::generate();
        let witnesses: Vec<_> = (0..12).map(|_| KeyPair::generate().address.clone()).collect();
        let params = test_params(witnesses.clone());

        let unit_id = apply_genesis(&storage, &issuer, &params).unwrap();

        let unit = storage.read_unit_props(&unit_id).unwrap().unwrap();
        assert!(unit.is_genesis());

        let total: u64 = witnesses.iter().enumerate().map(|(i, _)| storage.read_output(&unit_id, 0, i as u32).unwrap().unwrap().amount).sum();
        assert_eq!(total, params.initial_issue);
    }

    #[test]
    fn genesis_unit_is_stable_and_on_main_chain_at_mci_zero() {
        let storage = open_engine("stable_at_zero");
        let issuer = KeyPair::generate();
        let witnesses: Vec<_> = (0..12).map(|_| KeyPair::generate().address.clone()).collect();
        let params = test_params(witnesses);

        let unit_id = apply_genesis(&storage, &issuer, &params).unwrap();

        assert_eq!(storage.last_stable_mci().unwrap(), 0);
        assert_eq!(storage.unit_at_mci(0).unwrap(), Some(unit_id.clone()));
        assert_eq!(storage.list_tips().unwrap(), vec![unit_id]);
    }

    #[test]
    fn split_evenly_distributes_remainder_to_first_shares() {
        assert_eq!(split_evenly(10, 3), vec![4, 3, 3]);
        assert_eq!(split_evenly(0, 3), vec![0, 0, 0]);
    }
}
