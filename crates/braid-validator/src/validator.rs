//! The unit validator (§4.5): an ordered sequence of phases, each a
//! precondition for the next, turning a parsed unit into one of the five
//! `ValidationOutcome`s.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use braid_core::constants::{A_MAX, M_MAX, P_MAX, WITNESS_COUNT};
use braid_core::error::BraidError;
use braid_core::types::{Address, Mci, UnitId};
use braid_dag::{queries, Author, GraphView, Input, MessagePayload, Output, Unit, UnitDerived};
use braid_script::{evaluate, validate_definition, Budget, Definition};
use braid_storage::{StagedUnitWrite, StorageEngine};
use tracing::{debug, warn};

use crate::context::UnitEvalContext;
use crate::outcome::{SideEffects, ValidationOutcome};

/// Turns a parsed `Unit` into an admission decision against a `StorageEngine`.
///
/// Phases 1–7 only read storage; phase 8 onward is expected to run under the
/// caller's `write` lock (§4.8) — this type does not itself take any
/// lock, since lock discipline belongs to the concurrency arbiter (C8), not
/// to the validator.
pub struct UnitValidator {
    storage: Arc<StorageEngine>,
    /// Last-stable MCI after which inline `witnesses` lists are no longer
    /// accepted and every unit must reference a `witness_list_unit` instead
    /// (§4.5.1 phase 3: "only before a protocol-defined MCI").
    witness_list_lock_mci: Mci,
}

impl UnitValidator {
    pub fn new(storage: Arc<StorageEngine>, witness_list_lock_mci: Mci) -> Self {
        Self { storage, witness_list_lock_mci }
    }

    pub fn validate(&self, claimed_id: &UnitId, unit: &Unit) -> Result<ValidationOutcome, BraidError> {
        match self.run(claimed_id, unit) {
            Ok(outcome) => Ok(outcome),
            Err(BraidError::ParentUnknown(ids)) => Ok(ValidationOutcome::NeedParents(
                ids.into_iter().filter_map(|s| UnitId::from_b64(&s).ok()).collect(),
            )),
            Err(BraidError::HashTreeMissing) => Ok(ValidationOutcome::NeedHashTree),
            Err(e) if e.is_retriable() => Ok(ValidationOutcome::Transient(e.to_string(), true)),
            Err(e) => Ok(ValidationOutcome::Rejected(e)),
        }
    }

    fn run(&self, claimed_id: &UnitId, unit: &Unit) -> Result<ValidationOutcome, BraidError> {
        self.check_shape(claimed_id, unit)?;
        self.check_parents(unit)?;
        let witnesses = self.resolve_witness_list(unit)?;
        self.check_witness_definitions(unit, &witnesses)?;
        let last_ball_mci = self.check_last_ball(unit)?;
        self.check_hash_tree_gate(claimed_id)?;

        let mut bound_definitions = Vec::new();
        self.check_authors(claimed_id, unit, &witnesses, last_ball_mci, &mut bound_definitions)?;

        let view = &*self.storage;
        let unit_level = queries::level(&unit.parent_units, view);
        let unit_limci = queries::limci(&unit.parent_units, view);
        let best_parent = queries::determine_best_parent(&unit.parent_units, view);
        let witnessed_level = best_parent
            .as_ref()
            .map(|bp| queries::witnessed_level(bp, &witnesses, view))
            .unwrap_or(0);

        let (sequence, siblings_marked_temp_bad, sibling_derived_updates) =
            self.detect_conflicts(claimed_id, unit, unit_level, unit_limci, view)?;

        let mut outputs_staged = Vec::new();
        let mut spent_outputs = Vec::new();
        let mut asset_definitions = Vec::new();
        self.check_messages_and_payment(
            claimed_id,
            unit,
            &mut outputs_staged,
            &mut spent_outputs,
            &mut asset_definitions,
        )?;

        let aa_triggered = unit
            .messages
            .iter()
            .any(|m| matches!(m.payload, Some(MessagePayload::AgentTrigger { .. })));
        if aa_triggered {
            debug!(unit = %claimed_id, "unit carries an AA trigger; execution deferred to MC advancement");
        }

        let derived = UnitDerived {
            level: unit_level,
            witnessed_level,
            best_parent_unit: best_parent,
            limci: unit_limci,
            main_chain_index: None,
            is_on_main_chain: false,
            is_stable: false,
            sequence,
        };

        let author_index_entries: Vec<(Address, UnitId)> =
            unit.authors.iter().map(|a| (a.address.clone(), claimed_id.clone())).collect();

        let best_child_entries: Vec<(UnitId, UnitId)> = derived
            .best_parent_unit
            .as_ref()
            .map(|bp| vec![(bp.clone(), claimed_id.clone())])
            .unwrap_or_default();

        let new_outputs: Vec<Output> = outputs_staged.iter().map(|(_, _, _, o)| o.clone()).collect();

        let staged = StagedUnitWrite {
            unit: Some((claimed_id.clone(), unit.clone(), derived.clone())),
            outputs: outputs_staged,
            spent_outputs,
            bound_definitions,
            sibling_derived_updates,
            author_index_entries,
            asset_definitions,
            best_child_entries,
        };
        self.storage.commit_staged_write(staged)?;

        Ok(ValidationOutcome::Accepted(SideEffects {
            unit_id: claimed_id.clone(),
            derived,
            new_outputs,
            siblings_marked_temp_bad,
        }))
    }

    // ── Phase 1: Shape ───────────────────────────────────────────────────────

    fn check_shape(&self, claimed_id: &UnitId, unit: &Unit) -> Result<(), BraidError> {
        if unit.parent_units.len() > P_MAX {
            return Err(BraidError::Malformed(format!("{} parent_units exceeds P_MAX", unit.parent_units.len())));
        }
        if unit.authors.is_empty() || unit.authors.len() > A_MAX {
            return Err(BraidError::Malformed(format!("{} authors out of range", unit.authors.len())));
        }
        if unit.messages.len() > M_MAX {
            return Err(BraidError::Malformed(format!("{} messages exceeds M_MAX", unit.messages.len())));
        }
        let computed = unit.compute_unit_id()?;
        if computed != *claimed_id {
            return Err(BraidError::Malformed("declared unit id does not match its hash".into()));
        }
        Ok(())
    }

    // ── Phase 2: Parents ─────────────────────────────────────────────────────

    fn check_parents(&self, unit: &Unit) -> Result<(), BraidError> {
        if unit.is_genesis() {
            return Ok(());
        }
        if unit.parent_units.windows(2).any(|w| w[0] >= w[1]) {
            return Err(BraidError::Malformed("parent_units not sorted ascending or contains duplicates".into()));
        }

        let mut missing = Vec::new();
        for parent in &unit.parent_units {
            match self.storage.db.get_derived(parent)? {
                Some(derived) => {
                    if matches!(derived.sequence, braid_core::types::Sequence::FinalBad) {
                        return Err(BraidError::Malformed(format!("parent {} is final-bad", parent)));
                    }
                }
                None => missing.push(parent.to_b64()),
            }
        }
        if !missing.is_empty() {
            return Err(BraidError::ParentUnknown(missing));
        }
        Ok(())
    }

    // ── Phase 3: Witness list ────────────────────────────────────────────────

    fn resolve_witness_list(&self, unit: &Unit) -> Result<Vec<Address>, BraidError> {
        if let Some(wlu) = &unit.witness_list_unit {
            let declaring = self
                .storage
                .read_unit_props(wlu)?
                .ok_or_else(|| BraidError::Malformed("witness_list_unit not found".into()))?;
            let derived = self
                .storage
                .db
                .get_derived(wlu)?
                .ok_or_else(|| BraidError::Malformed("witness_list_unit has no derived state".into()))?;
            if !derived.is_stable {
                return Err(BraidError::Malformed("witness_list_unit is not stable".into()));
            }
            let witnesses = declaring
                .witnesses
                .ok_or_else(|| BraidError::Malformed("witness_list_unit declares no witnesses".into()))?;
            if witnesses.len() != WITNESS_COUNT {
                return Err(BraidError::Malformed("witness list has wrong length".into()));
            }
            return Ok(witnesses);
        }
        if let Some(witnesses) = &unit.witnesses {
            if self.storage.last_stable_mci()? >= self.witness_list_lock_mci {
                return Err(BraidError::Malformed("inline witness list is locked at this MCI".into()));
            }
            if witnesses.len() != WITNESS_COUNT {
                return Err(BraidError::Malformed("inline witness list has wrong length".into()));
            }
            return Ok(witnesses.clone());
        }
        Err(BraidError::Malformed("unit declares neither witness_list_unit nor witnesses".into()))
    }

    // ── Phase 4: Witness-definition constraint ──────────────────────────────

    fn check_witness_definitions(&self, unit: &Unit, witnesses: &[Address]) -> Result<(), BraidError> {
        let witness_set: HashSet<&Address> = witnesses.iter().collect();
        for author in &unit.authors {
            if witness_set.contains(&author.address) {
                if let Some(def_value) = &author.definition {
                    let def: Definition = serde_json::from_value(def_value.clone())
                        .map_err(|e| BraidError::DefinitionMalformed(e.to_string()))?;
                    validate_definition(&def, 0, true)?;
                }
            }
        }
        Ok(())
    }

    // ── Phase 5: Last ball ───────────────────────────────────────────────────

    fn check_last_ball(&self, unit: &Unit) -> Result<Mci, BraidError> {
        if unit.is_genesis() {
            return Ok(0);
        }
        let last_ball_unit = unit
            .last_ball_unit
            .as_ref()
            .ok_or_else(|| BraidError::Malformed("missing last_ball_unit".into()))?;
        let derived = self
            .storage
            .db
            .get_derived(last_ball_unit)?
            .ok_or_else(|| BraidError::Malformed("last_ball_unit unknown".into()))?;
        if !derived.is_stable || !derived.is_on_main_chain {
            return Err(BraidError::Malformed("last_ball_unit is not a stable MC unit".into()));
        }
        let mci = derived
            .main_chain_index
            .ok_or_else(|| BraidError::Fatal("stable unit missing main_chain_index".into()))?;
        let ball = self
            .storage
            .db
            .get_ball(last_ball_unit)?
            .ok_or_else(|| BraidError::Malformed("last_ball_unit has no committed ball".into()))?;
        let ball_id = ball.compute_ball_id()?;
        if unit.last_ball.as_ref() != Some(&ball_id) {
            return Err(BraidError::Malformed("last_ball does not match last_ball_unit's committed ball".into()));
        }
        Ok(mci)
    }

    // ── Phase 6: Hash-tree gate (catchup only) ──────────────────────────────

    fn check_hash_tree_gate(&self, claimed_id: &UnitId) -> Result<(), BraidError> {
        // Full cross-checking against parent balls happens when the unit's
        // own ball is computed at stabilization (C6); here we only confirm
        // the reservation, if any, names this unit.
        if let Some(pending) = self.storage.db.get_pending_ball(claimed_id)? {
            if pending.unit != *claimed_id {
                self.storage.db.evict_pending_ball(claimed_id)?;
                return Err(BraidError::Malformed("hash-tree reservation names a different unit".into()));
            }
        }
        Ok(())
    }

    // ── Phase 7: Authors ─────────────────────────────────────────────────────

    fn check_authors(
        &self,
        claimed_id: &UnitId,
        unit: &Unit,
        witnesses: &[Address],
        horizon_mci: Mci,
        bound_definitions: &mut Vec<(Address, serde_json::Value)>,
    ) -> Result<(), BraidError> {
        let witness_set: HashSet<&Address> = witnesses.iter().collect();
        let mut resolved: Vec<(Author, Definition)> = Vec::with_capacity(unit.authors.len());

        for author in &unit.authors {
            let def_value = match &author.definition {
                Some(v) => {
                    if !braid_crypto::verify_chash(v, &author.address)? {
                        return Err(BraidError::DefinitionMalformed(format!(
                            "definition does not chash to address {}",
                            author.address
                        )));
                    }
                    if self.storage.read_definition_by_address(&author.address, horizon_mci)?.is_none() {
                        bound_definitions.push((author.address.clone(), v.clone()));
                    }
                    v.clone()
                }
                None => self
                    .storage
                    .read_definition_by_address(&author.address, horizon_mci)?
                    .ok_or_else(|| BraidError::UnresolvedInnerAddress(author.address.to_string()))?,
            };
            let def: Definition = serde_json::from_value(def_value)
                .map_err(|e| BraidError::DefinitionMalformed(e.to_string()))?;
            let b_no_references = witness_set.contains(&author.address);
            validate_definition(&def, 0, b_no_references)?;
            resolved.push((author.clone(), def));
        }

        // First pass: evaluate every author with no cosigners assumed, to
        // discover which authors independently authenticate.
        let mut cosigners = HashSet::new();
        for (author, def) in &resolved {
            let ctx = UnitEvalContext {
                storage: self.storage.clone(),
                this_address: author.address.clone(),
                unit_id_bytes: claimed_id.as_bytes().to_vec(),
                timestamp: unit.timestamp,
                horizon_mci,
                cosigners: HashSet::new(),
            };
            let mut budget = Budget::new();
            if evaluate(def, "r", &author.authentifiers, &ctx, &mut budget).unwrap_or(false) {
                cosigners.insert(author.address.clone());
            }
        }

        // Second pass: authoritative result with the full cosigner set.
        for (author, def) in &resolved {
            let ctx = UnitEvalContext {
                storage: self.storage.clone(),
                this_address: author.address.clone(),
                unit_id_bytes: claimed_id.as_bytes().to_vec(),
                timestamp: unit.timestamp,
                horizon_mci,
                cosigners: cosigners.clone(),
            };
            let mut budget = Budget::new();
            if !evaluate(def, "r", &author.authentifiers, &ctx, &mut budget)? {
                return Err(BraidError::EvaluatedFalse);
            }
        }
        Ok(())
    }

    // ── Phase 8: Conflict detection ──────────────────────────────────────────

    fn detect_conflicts(
        &self,
        claimed_id: &UnitId,
        unit: &Unit,
        unit_level: braid_core::types::Level,
        unit_limci: Mci,
        view: &impl GraphView,
    ) -> Result<(braid_core::types::Sequence, Vec<UnitId>, Vec<(UnitId, UnitDerived)>), BraidError> {
        use braid_core::types::Sequence;

        let mut self_becomes_temp_bad = false;
        let mut siblings_marked_temp_bad = Vec::new();
        let mut sibling_derived_updates = Vec::new();
        let mut already_flipped: HashSet<UnitId> = HashSet::new();

        for author in &unit.authors {
            let candidates = self.storage.units_by_author(&author.address)?;
            for candidate in candidates {
                if candidate == *claimed_id || already_flipped.contains(&candidate) {
                    continue;
                }
                let Some(candidate_derived) = self.storage.db.get_derived(&candidate)? else { continue };
                let is_beyond_limci = candidate_derived.main_chain_index.map_or(true, |mci| mci > unit_limci);
                if !is_beyond_limci {
                    continue;
                }
                if queries::determine_if_included(&candidate, &unit.parent_units, view) {
                    continue;
                }
                warn!(unit = %claimed_id, sibling = %candidate, "conflicting sibling unit detected");

                let candidate_is_earlier = candidate_derived.level < unit_level
                    || (candidate_derived.level == unit_level && candidate.as_bytes() < claimed_id.as_bytes());

                if candidate_is_earlier {
                    self_becomes_temp_bad = true;
                } else {
                    let mut flipped = candidate_derived.clone();
                    flipped.sequence = Sequence::TempBad;
                    sibling_derived_updates.push((candidate.clone(), flipped));
                    siblings_marked_temp_bad.push(candidate.clone());
                    already_flipped.insert(candidate);
                }
            }
        }

        let sequence = if self_becomes_temp_bad { Sequence::TempBad } else { Sequence::Good };
        Ok((sequence, siblings_marked_temp_bad, sibling_derived_updates))
    }

    // ── Phase 9: Messages & payment ──────────────────────────────────────────

    fn check_messages_and_payment(
        &self,
        claimed_id: &UnitId,
        unit: &Unit,
        outputs_staged: &mut Vec<(UnitId, u32, u32, Output)>,
        spent_outputs: &mut Vec<(UnitId, u32, u32)>,
        asset_definitions: &mut Vec<(String, braid_dag::Asset)>,
    ) -> Result<(), BraidError> {
        let author_addresses: HashSet<&Address> = unit.authors.iter().map(|a| &a.address).collect();

        for (message_index, message) in unit.messages.iter().enumerate() {
            let message_index = message_index as u32;
            match &message.payload {
                Some(MessagePayload::Payment { inputs, outputs }) => {
                    let mut in_by_asset: HashMap<Option<String>, u64> = HashMap::new();
                    let mut out_by_asset: HashMap<Option<String>, u64> = HashMap::new();

                    for input in inputs {
                        match input {
                            Input::Transfer { unit: src_unit, message_index: src_msg, output_index: src_out } => {
                                let output = self
                                    .storage
                                    .read_output(src_unit, *src_msg, *src_out)?
                                    .ok_or_else(|| BraidError::Malformed("input references unknown output".into()))?;
                                if output.is_spent {
                                    return Err(BraidError::DoubleSpend {
                                        unit: src_unit.to_b64(),
                                        message_index: *src_msg,
                                        output_index: *src_out,
                                    });
                                }
                                if !author_addresses.contains(&output.address) {
                                    return Err(BraidError::Malformed("input not owned by any author of this unit".into()));
                                }
                                *in_by_asset.entry(output.asset.clone()).or_default() += output.amount;
                                spent_outputs.push((src_unit.clone(), *src_msg, *src_out));
                            }
                            Input::HeadersCommission { .. } | Input::Witnessing { .. } => {
                                // Commission payouts are minted by the main-chain
                                // engine at stabilization (§4.6.4), which is
                                // not yet reachable from here; accepted without
                                // contributing to the fee balance.
                            }
                            Input::Issue { amount, .. } => {
                                let asset_id = outputs.first().and_then(|o| o.asset.clone());
                                if let Some(aid) = &asset_id {
                                    if let Some(asset) = self.storage.read_asset(aid)? {
                                        if !asset.fixed_denominations.is_empty()
                                            && !asset.fixed_denominations.contains(amount)
                                        {
                                            return Err(BraidError::AssetPolicyViolation(
                                                "issue amount is not a fixed denomination".into(),
                                            ));
                                        }
                                        if let Some(cap) = asset.cap {
                                            if *amount > cap {
                                                return Err(BraidError::AssetPolicyViolation(
                                                    "issue amount exceeds asset cap".into(),
                                                ));
                                            }
                                        }
                                    }
                                }
                                *in_by_asset.entry(asset_id).or_default() += *amount;
                            }
                        }
                    }

                    for (output_index, output) in outputs.iter().enumerate() {
                        if output.amount == 0 {
                            return Err(BraidError::Malformed("output amount must be positive".into()));
                        }
                        if output.is_spent {
                            return Err(BraidError::Malformed("freshly created output cannot start spent".into()));
                        }
                        *out_by_asset.entry(output.asset.clone()).or_default() += output.amount;
                        outputs_staged.push((
                            claimed_id.clone(),
                            message_index,
                            output_index as u32,
                            output.clone(),
                        ));
                    }

                    for (asset, out_total) in &out_by_asset {
                        let in_total = in_by_asset.get(asset).copied().unwrap_or(0);
                        if *out_total > in_total {
                            return Err(BraidError::InsufficientInputs { need: *out_total, have: in_total });
                        }
                    }
                }
                Some(MessagePayload::Asset { asset }) => {
                    asset_definitions.push((format!("{}:{}", claimed_id.to_b64(), message_index), asset.clone()));
                }
                Some(MessagePayload::Data { fields }) => {
                    braid_crypto::canonical_serialize(fields, 0)?;
                }
                Some(MessagePayload::Definition { .. }) | Some(MessagePayload::Text { .. }) => {}
                Some(MessagePayload::AgentTrigger { data, .. }) => {
                    braid_crypto::canonical_serialize(data, 0)?;
                }
                None => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_core::types::Sequence;
    use braid_dag::{Author, Unit};
    use braid_storage::StateDb;
    use std::collections::BTreeMap;

    fn make_validator(name: &str) -> UnitValidator {
        let dir = std::env::temp_dir().join(format!("braid_validator_test_{}", name));
        let _ = std::fs::remove_dir_all(&dir);
        let db = Arc::new(StateDb::open(&dir).unwrap());
        UnitValidator::new(Arc::new(StorageEngine::new(db)), 1_000_000)
    }

    fn genesis_with_author(address: Address) -> Unit {
        Unit {
            version: "4.0".into(),
            alt: "1".into(),
            parent_units: vec![],
            last_ball_unit: None,
            last_ball: None,
            witness_list_unit: None,
            witnesses: Some((0..WITNESS_COUNT as u8).map(|b| Address::from_bytes([b; 24])).collect()),
            authors: vec![Author {
                address: address.clone(),
                definition: Some(serde_json::json!(["sig", {"pubkey": "00"}])),
                authentifiers: BTreeMap::new(),
            }],
            messages: vec![],
            headers_commission: 0,
            payload_commission: 0,
            timestamp: 0,
            content_hash: None,
        }
    }

    #[test]
    fn genesis_rejected_without_matching_authentifier() {
        let validator = make_validator("genesis_no_sig");
        let address = braid_crypto::chash_address(&serde_json::json!(["sig", {"pubkey": "00"}])).unwrap();
        let unit = genesis_with_author(address);
        let id = unit.compute_unit_id().unwrap();
        let outcome = validator.validate(&id, &unit).unwrap();
        assert!(matches!(outcome, ValidationOutcome::Rejected(_)));
    }

    #[test]
    fn unknown_parent_requests_need_parents() {
        let validator = make_validator("need_parents");
        let address = braid_crypto::chash_address(&serde_json::json!(["sig", {"pubkey": "00"}])).unwrap();
        let mut unit = genesis_with_author(address);
        unit.parent_units = vec![UnitId::from_bytes([9; 32])];
        unit.witnesses = None;
        unit.witness_list_unit = Some(UnitId::from_bytes([1; 32]));
        unit.last_ball_unit = Some(UnitId::from_bytes([2; 32]));
        unit.last_ball = Some(braid_core::types::BallId::from_bytes([3; 32]));
        let id = unit.compute_unit_id().unwrap();
        let outcome = validator.validate(&id, &unit).unwrap();
        assert!(matches!(outcome, ValidationOutcome::NeedParents(_)));
    }

    #[test]
    fn malformed_unit_id_is_rejected() {
        let validator = make_validator("bad_id");
        let address = braid_crypto::chash_address(&serde_json::json!(["sig", {"pubkey": "00"}])).unwrap();
        let unit = genesis_with_author(address);
        let wrong_id = UnitId::from_bytes([0xAB; 32]);
        let outcome = validator.validate(&wrong_id, &unit).unwrap();
        assert!(matches!(outcome, ValidationOutcome::Rejected(BraidError::Malformed(_))));
    }

    #[test]
    fn sequence_defaults_to_good_absent_conflicts() {
        assert_eq!(UnitDerived::default().sequence, Sequence::Good);
    }
}
