//! Witness-proof validation (§4.7.2), run by a lagging node against an
//! untrusted peer's response before any per-unit hash work: a cheap
//! preliminary scan rejects proofs that could never reach majority, so a
//! hostile peer cannot burn the lagger's CPU with garbage joints.

use std::collections::BTreeMap;
use std::collections::HashSet;

use braid_core::constants::MAJORITY_WITNESSES;
use braid_core::error::BraidError;
use braid_core::types::{Address, Timestamp, UnitId};
use braid_dag::Unit;
use braid_script::{evaluate, validate_definition, Budget, Definition, EvalContext};

/// Evaluation context for a joint under witness-proof validation. Definition
/// trees here run under `bNoReferences`, so every state-dependent operator
/// is statically forbidden by `validate_definition` before `evaluate` is
/// ever called — the stub bodies below only exist to satisfy the trait.
struct NoRefEvalContext<'a> {
    this_address: &'a Address,
    unit_id_bytes: &'a [u8],
    timestamp: Timestamp,
}

impl<'a> EvalContext for NoRefEvalContext<'a> {
    fn last_ball_mci(&self) -> braid_core::types::Mci {
        0
    }
    fn this_address(&self) -> &Address {
        self.this_address
    }
    fn unit_timestamp(&self) -> Timestamp {
        self.timestamp
    }
    fn unit_id_bytes(&self) -> &[u8] {
        self.unit_id_bytes
    }
    fn resolve_definition(&self, _addr: &Address, _horizon_mci: braid_core::types::Mci) -> Option<Definition> {
        None
    }
    fn data_feed_value(
        &self,
        _oracle: &Address,
        _feed_name: &str,
        _horizon_mci: braid_core::types::Mci,
    ) -> Option<serde_json::Value> {
        None
    }
    fn merkle_proof_valid(&self, _oracle: &Address, _feed_name: &str, _element: &str, _horizon_mci: braid_core::types::Mci) -> bool {
        false
    }
    fn sum_matching(&self, _filter: &braid_script::Filter, _horizon_mci: braid_core::types::Mci) -> u64 {
        0
    }
    fn has_matching(&self, _filter: &braid_script::Filter, _horizon_mci: braid_core::types::Mci) -> bool {
        false
    }
    fn has_equal_matching(&self, _equal_fields: &[String], _filter: &braid_script::Filter, _horizon_mci: braid_core::types::Mci) -> bool {
        false
    }
    fn seen_matching(&self, _filter: &braid_script::Filter, _horizon_mci: braid_core::types::Mci) -> bool {
        false
    }
    fn attested(&self, _attestors: &[Address], _fields: &serde_json::Value, _horizon_mci: braid_core::types::Mci) -> bool {
        false
    }
    fn cosigned_by(&self, _address: &Address) -> bool {
        false
    }
    fn verify_sig(&self, pubkey: &str, authentifier: &str, message: &[u8]) -> bool {
        let (Ok(pk_bytes), Ok(sig_bytes)) = (hex::decode(pubkey), hex::decode(authentifier)) else {
            return false;
        };
        braid_crypto::verify_signature(
            &braid_core::types::PublicKey(pk_bytes),
            message,
            &braid_core::types::Signature(sig_bytes),
        )
        .is_ok()
    }
}

/// Outcome of a successful witness-proof scan: the cursor the lagger should
/// jump its stable frontier to, and the accumulated witness authors seen.
#[derive(Debug, Clone)]
pub struct WitnessProofOutcome {
    pub pinned_last_ball_unit: UnitId,
    pub witnesses_seen: HashSet<Address>,
}

/// O(n) pass over the claimed joints: counts distinct witness authors
/// without doing any hashing or signature work. If this can't reach
/// majority, the full validation in `validate_chain` is never attempted.
pub fn preliminary_witness_scan(joints: &[Unit], witnesses: &[Address]) -> bool {
    let witness_set: HashSet<&Address> = witnesses.iter().collect();
    let mut seen: HashSet<&Address> = HashSet::new();
    for joint in joints {
        for author in &joint.authors {
            if witness_set.contains(&author.address) {
                seen.insert(&author.address);
            }
        }
        if seen.len() >= MAJORITY_WITNESSES {
            return true;
        }
    }
    false
}

/// Full witness-proof validation (§4.7.2 steps 1-4), run only after
/// `preliminary_witness_scan` passes. `joints` MUST be ordered from the
/// peer's tip down toward the lagger's cursor, as the protocol specifies.
pub fn validate_chain(joints: &[Unit], witnesses: &[Address]) -> Result<WitnessProofOutcome, BraidError> {
    if !preliminary_witness_scan(joints, witnesses) {
        return Err(BraidError::Malformed("witness proof does not reach majority".into()));
    }

    let witness_set: HashSet<&Address> = witnesses.iter().collect();
    let mut seen: HashSet<Address> = HashSet::new();
    let mut by_id: BTreeMap<UnitId, &Unit> = BTreeMap::new();

    for joint in joints {
        // Step 1: unit-id hash.
        let computed = joint.compute_unit_id()?;
        by_id.insert(computed, joint);
    }

    for (idx, joint) in joints.iter().enumerate() {
        let claimed_id = joint.compute_unit_id()?;

        // Step 2: author signatures under bNoReferences.
        for author in &joint.authors {
            let Some(def_value) = &author.definition else {
                continue; // bound definitions are assumed already known and are not re-validated here
            };
            let def: Definition =
                serde_json::from_value(def_value.clone()).map_err(|e| BraidError::DefinitionMalformed(e.to_string()))?;
            validate_definition(&def, 0, true)?;
            let ctx = NoRefEvalContext {
                this_address: &author.address,
                unit_id_bytes: claimed_id.as_bytes(),
                timestamp: joint.timestamp,
            };
            let mut budget = Budget::new();
            if !evaluate(&def, "r", &author.authentifiers, &ctx, &mut budget)? {
                return Err(BraidError::EvaluatedFalse);
            }
        }

        // Step 3: declared parent links resolve. A joint may legitimately
        // point past the end of the batch (its parent is already stable on
        // the lagger's side), but only the last joint in the ordered chain
        // is allowed to do so for *every* parent — anything earlier with no
        // parent inside the batch is a disconnected joint the peer slipped
        // in to pad the witness count without actually linking it into the
        // chain that leads back to the pinned cursor.
        let is_tail = idx == joints.len() - 1;
        if !joint.parent_units.is_empty() && !is_tail {
            let linked = joint.parent_units.iter().any(|p| by_id.contains_key(p));
            if !linked {
                return Err(BraidError::Malformed(format!(
                    "joint {claimed_id} declares only parents outside the supplied witness-proof batch, breaking the chain"
                )));
            }
        }

        // Step 4: accumulate witness authors, stop at majority + pinned last_ball_unit.
        for author in &joint.authors {
            if witness_set.contains(&author.address) {
                seen.insert(author.address.clone());
            }
        }
        if seen.len() >= MAJORITY_WITNESSES {
            let pinned = joint
                .last_ball_unit
                .clone()
                .ok_or_else(|| BraidError::Malformed("majority-witnessed joint carries no last_ball_unit".into()))?;
            return Ok(WitnessProofOutcome { pinned_last_ball_unit: pinned, witnesses_seen: seen });
        }
    }

    Err(BraidError::Malformed("witness proof never pinned a last_ball_unit".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_dag::Author;
    use std::collections::BTreeMap as Map;

    fn addr(b: u8) -> Address {
        Address::from_bytes([b; 24])
    }

    fn joint(authors: Vec<Address>, last_ball_unit: Option<UnitId>) -> Unit {
        joint_with_parents(authors, last_ball_unit, vec![])
    }

    fn joint_with_parents(authors: Vec<Address>, last_ball_unit: Option<UnitId>, parent_units: Vec<UnitId>) -> Unit {
        Unit {
            version: "1.0".into(),
            alt: "1".into(),
            parent_units,
            last_ball_unit,
            last_ball: None,
            witness_list_unit: None,
            witnesses: None,
            authors: authors
                .into_iter()
                .map(|address| Author { address, definition: None, authentifiers: Map::new() })
                .collect(),
            messages: vec![],
            headers_commission: 0,
            payload_commission: 0,
            timestamp: 0,
            content_hash: None,
        }
    }

    #[test]
    fn preliminary_scan_rejects_below_majority() {
        let witnesses: Vec<Address> = (0..12).map(addr).collect();
        let joints = vec![joint(vec![witnesses[0].clone(), witnesses[1].clone()], None)];
        assert!(!preliminary_witness_scan(&joints, &witnesses));
    }

    #[test]
    fn preliminary_scan_accepts_majority() {
        let witnesses: Vec<Address> = (0..12).map(addr).collect();
        let joints: Vec<Unit> = witnesses[..7].iter().map(|w| joint(vec![w.clone()], None)).collect();
        assert!(preliminary_witness_scan(&joints, &witnesses));
    }

    #[test]
    fn validate_chain_rejects_without_pinned_last_ball() {
        let witnesses: Vec<Address> = (0..12).map(addr).collect();
        let joints: Vec<Unit> = witnesses[..7].iter().map(|w| joint(vec![w.clone()], None)).collect();
        assert!(validate_chain(&joints, &witnesses).is_err());
    }

    #[test]
    fn validate_chain_pins_cursor_at_majority() {
        let witnesses: Vec<Address> = (0..12).map(addr).collect();
        let pin = UnitId::from_bytes([0xAB; 32]);
        let mut joints: Vec<Unit> = witnesses[..6].iter().map(|w| joint(vec![w.clone()], None)).collect();
        joints.push(joint(vec![witnesses[6].clone()], Some(pin.clone())));
        let outcome = validate_chain(&joints, &witnesses).unwrap();
        assert_eq!(outcome.pinned_last_ball_unit, pin);
        assert_eq!(outcome.witnesses_seen.len(), 7);
    }

    #[test]
    fn validate_chain_rejects_joint_disconnected_from_the_batch() {
        let witnesses: Vec<Address> = (0..12).map(addr).collect();
        let pin = UnitId::from_bytes([0xAB; 32]);
        // Every joint but the tail declares a parent that isn't any other
        // supplied joint's id — a batch of otherwise-valid but unlinked
        // single-witness joints, which should never reach the majority step.
        let stray_parent = UnitId::from_bytes([0x77; 32]);
        let mut joints: Vec<Unit> =
            witnesses[..6].iter().map(|w| joint_with_parents(vec![w.clone()], None, vec![stray_parent.clone()])).collect();
        joints.push(joint(vec![witnesses[6].clone()], Some(pin)));
        assert!(validate_chain(&joints, &witnesses).is_err());
    }
}
