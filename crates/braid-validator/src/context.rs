//! `EvalContext` implementation bridging the script evaluator (C4) to the
//! storage abstraction (C2): resolves definitions, signatures, and the
//! `has`/`sum`/`seen` filter operators against a unit's `last_ball_mci`
//! horizon.

use std::collections::HashSet;
use std::sync::Arc;

use braid_core::types::{Address, Mci, PublicKey, Signature, Timestamp};
use braid_script::{Definition, EvalContext, Filter};
use braid_storage::StorageEngine;

/// Read-only view handed to `braid_script::evaluate` for one author of one
/// unit under validation.
///
/// `cosigners` is the set of this unit's author addresses whose own
/// authentifiers have already been confirmed valid; the validator computes
/// it in a first pass before any definition referencing `cosigned_by` can
/// be resolved, since "cosigned by" only makes sense relative to sibling
/// authors on the same unit.
pub struct UnitEvalContext {
    pub storage: Arc<StorageEngine>,
    pub this_address: Address,
    pub unit_id_bytes: Vec<u8>,
    pub timestamp: Timestamp,
    pub horizon_mci: Mci,
    pub cosigners: HashSet<Address>,
}

fn filter_matches(filter: &Filter, output_address: &Address, asset: &Option<String>, amount: u64) -> bool {
    if let Some(addr) = &filter.address {
        if addr != output_address {
            return false;
        }
    }
    if let Some(want_asset) = &filter.asset {
        match asset {
            Some(a) if a == want_asset => {}
            None if want_asset == "base" => {}
            _ => return false,
        }
    }
    if let Some(lo) = filter.amount_at_least {
        if amount < lo {
            return false;
        }
    }
    if let Some(hi) = filter.amount_at_most {
        if amount > hi {
            return false;
        }
    }
    true
}

impl EvalContext for UnitEvalContext {
    fn last_ball_mci(&self) -> Mci {
        self.horizon_mci
    }

    fn this_address(&self) -> &Address {
        &self.this_address
    }

    fn unit_timestamp(&self) -> Timestamp {
        self.timestamp
    }

    fn unit_id_bytes(&self) -> &[u8] {
        &self.unit_id_bytes
    }

    fn resolve_definition(&self, addr: &Address, horizon_mci: Mci) -> Option<Definition> {
        let value = self.storage.read_definition_by_address(addr, horizon_mci).ok().flatten()?;
        serde_json::from_value(value).ok()
    }

    fn data_feed_value(&self, _oracle: &Address, _feed_name: &str, _horizon_mci: Mci) -> Option<serde_json::Value> {
        // No oracle data-feed relation is part of the storage abstraction
        // (§6.3 persistence invariants do not name one); definitions
        // that depend on one never evaluate true here.
        None
    }

    fn merkle_proof_valid(&self, _oracle: &Address, _feed_name: &str, _element: &str, _horizon_mci: Mci) -> bool {
        false
    }

    fn sum_matching(&self, filter: &Filter, _horizon_mci: Mci) -> u64 {
        let Some(addr) = &filter.address else { return 0 };
        self.storage
            .outputs_by_address(addr)
            .unwrap_or_default()
            .into_iter()
            .filter(|o| !o.is_spent && filter_matches(filter, &o.address, &o.asset, o.amount))
            .map(|o| o.amount)
            .sum()
    }

    fn has_matching(&self, filter: &Filter, _horizon_mci: Mci) -> bool {
        let Some(addr) = &filter.address else { return false };
        self.storage
            .outputs_by_address(addr)
            .unwrap_or_default()
            .into_iter()
            .any(|o| !o.is_spent && filter_matches(filter, &o.address, &o.asset, o.amount))
    }

    fn has_equal_matching(&self, equal_fields: &[String], filter: &Filter, _horizon_mci: Mci) -> bool {
        let Some(addr) = &filter.address else { return false };
        let matches: Vec<_> = self
            .storage
            .outputs_by_address(addr)
            .unwrap_or_default()
            .into_iter()
            .filter(|o| filter_matches(filter, &o.address, &o.asset, o.amount))
            .collect();
        if matches.len() < 2 {
            return false;
        }
        equal_fields.iter().all(|field| match field.as_str() {
            "amount" => matches.windows(2).all(|w| w[0].amount == w[1].amount),
            "asset" => matches.windows(2).all(|w| w[0].asset == w[1].asset),
            _ => false,
        })
    }

    fn seen_matching(&self, filter: &Filter, _horizon_mci: Mci) -> bool {
        let Some(addr) = &filter.address else { return false };
        self.storage
            .outputs_by_address(addr)
            .unwrap_or_default()
            .into_iter()
            .any(|o| filter_matches(filter, &o.address, &o.asset, o.amount))
    }

    fn attested(&self, _attestors: &[Address], _fields: &serde_json::Value, _horizon_mci: Mci) -> bool {
        false
    }

    fn cosigned_by(&self, address: &Address) -> bool {
        self.cosigners.contains(address)
    }

    fn verify_sig(&self, pubkey: &str, authentifier: &str, message: &[u8]) -> bool {
        let (Ok(pk_bytes), Ok(sig_bytes)) = (hex::decode(pubkey), hex::decode(authentifier)) else {
            return false;
        };
        braid_crypto::verify_signature(&PublicKey(pk_bytes), message, &Signature(sig_bytes)).is_ok()
    }
}
