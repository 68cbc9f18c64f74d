use braid_core::constants::{C_MAX, Q_MAX};
use braid_core::error::BraidError;
use braid_core::types::{Address, Mci, Timestamp};
use std::collections::BTreeMap;

use crate::definition::{Comparison, Definition, Filter};

/// Read-only view of chain state at a unit's `last_ball_mci` horizon,
/// supplied by the validator to `evaluate` (spec C4: "a read-only view of
/// state at the unit's last_ball_mci horizon").
pub trait EvalContext {
    fn last_ball_mci(&self) -> Mci;
    fn this_address(&self) -> &Address;
    fn unit_timestamp(&self) -> Timestamp;
    fn unit_id_bytes(&self) -> &[u8];

    fn resolve_definition(&self, addr: &Address, horizon_mci: Mci) -> Option<Definition>;
    fn data_feed_value(&self, oracle: &Address, feed_name: &str, horizon_mci: Mci) -> Option<serde_json::Value>;
    fn merkle_proof_valid(&self, oracle: &Address, feed_name: &str, element: &str, horizon_mci: Mci) -> bool;
    fn sum_matching(&self, filter: &Filter, horizon_mci: Mci) -> u64;
    fn has_matching(&self, filter: &Filter, horizon_mci: Mci) -> bool;
    fn has_equal_matching(&self, equal_fields: &[String], filter: &Filter, horizon_mci: Mci) -> bool;
    fn seen_matching(&self, filter: &Filter, horizon_mci: Mci) -> bool;
    fn attested(&self, attestors: &[Address], fields: &serde_json::Value, horizon_mci: Mci) -> bool;
    fn cosigned_by(&self, address: &Address) -> bool;
    fn verify_sig(&self, pubkey: &str, authentifier: &str, message: &[u8]) -> bool;
}

/// Tracks the complexity/query budget across one `evaluate` call (spec C4).
pub struct Budget {
    pub complexity: u32,
    pub queries: u32,
}

impl Budget {
    pub fn new() -> Self {
        Self { complexity: 0, queries: 0 }
    }

    fn charge(&mut self, complexity: u32) -> Result<(), BraidError> {
        self.complexity += complexity;
        if self.complexity > C_MAX {
            return Err(BraidError::ComplexityExceeded { cap: C_MAX });
        }
        Ok(())
    }

    fn charge_query(&mut self, extra_complexity: u32) -> Result<(), BraidError> {
        self.queries += 1;
        if self.queries > Q_MAX {
            return Err(BraidError::ComplexityExceeded { cap: Q_MAX });
        }
        self.charge(2 + extra_complexity)
    }
}

impl Default for Budget {
    fn default() -> Self {
        Self::new()
    }
}

/// Deterministically evaluate `def` against `authentifiers` at `path`,
/// charging `budget` as sub-expressions are visited (spec C4 `evaluate`).
pub fn evaluate(
    def: &Definition,
    path: &str,
    authentifiers: &BTreeMap<String, String>,
    ctx: &impl EvalContext,
    budget: &mut Budget,
) -> Result<bool, BraidError> {
    budget.charge(1)?;

    match def {
        Definition::Sig { pubkey } => {
            let proof = authentifiers
                .get(path)
                .ok_or(BraidError::EvaluatedFalse)?;
            Ok(ctx.verify_sig(pubkey, proof, ctx.unit_id_bytes()))
        }
        Definition::Hash { hash } => {
            let proof = authentifiers.get(path).ok_or(BraidError::EvaluatedFalse)?;
            let digest = braid_crypto::sha256(proof.as_bytes());
            Ok(hex::encode(digest) == *hash)
        }
        Definition::Address { address } => {
            budget.charge_query(0)?;
            let horizon = ctx.last_ball_mci();
            let inner = ctx
                .resolve_definition(address, horizon)
                .ok_or_else(|| BraidError::UnresolvedInnerAddress(address.to_string()))?;
            evaluate(&inner, path, authentifiers, ctx, budget)
        }
        Definition::ROfSet { required, set } => {
            let mut satisfied = 0u32;
            for (i, d) in set.iter().enumerate() {
                let sub_path = format!("{path}.{i}");
                if evaluate(d, &sub_path, authentifiers, ctx, budget)? {
                    satisfied += 1;
                }
            }
            Ok(satisfied >= *required)
        }
        Definition::WeightedAnd { required_weight, set } => {
            let mut weight = 0u32;
            for (i, (w, d)) in set.iter().enumerate() {
                let sub_path = format!("{path}.{i}");
                if evaluate(d, &sub_path, authentifiers, ctx, budget)? {
                    weight += w;
                }
            }
            Ok(weight >= *required_weight)
        }
        Definition::And { set } => {
            for (i, d) in set.iter().enumerate() {
                let sub_path = format!("{path}.{i}");
                if !evaluate(d, &sub_path, authentifiers, ctx, budget)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Definition::Or { set } => {
            let mut any = false;
            for (i, d) in set.iter().enumerate() {
                let sub_path = format!("{path}.{i}");
                if evaluate(d, &sub_path, authentifiers, ctx, budget)? {
                    any = true;
                }
            }
            Ok(any)
        }
        Definition::Not { inner } => Ok(!evaluate(inner, path, authentifiers, ctx, budget)?),
        Definition::InDataFeed { oracles, feed_name, comparison, value } => {
            budget.charge_query(0)?;
            let horizon = ctx.last_ball_mci();
            Ok(oracles.iter().any(|o| {
                ctx.data_feed_value(o, feed_name, horizon)
                    .map(|v| compare_json(&v, *comparison, value))
                    .unwrap_or(false)
            }))
        }
        Definition::InMerkle { oracles, feed_name, element } => {
            budget.charge_query(0)?;
            let horizon = ctx.last_ball_mci();
            Ok(oracles.iter().any(|o| ctx.merkle_proof_valid(o, feed_name, element, horizon)))
        }
        Definition::Has { filter } => {
            budget.charge_query(0)?;
            Ok(ctx.has_matching(filter, ctx.last_ball_mci()))
        }
        Definition::HasEqual { equal_fields, filter } => {
            budget.charge_query(0)?;
            Ok(ctx.has_equal_matching(equal_fields, filter, ctx.last_ball_mci()))
        }
        Definition::Sum { filter, at_least, at_most, equals } => {
            budget.charge_query(0)?;
            let total = ctx.sum_matching(filter, ctx.last_ball_mci());
            Ok(match (at_least, at_most, equals) {
                (_, _, Some(eq)) => total == *eq,
                (lo, hi, None) => lo.map_or(true, |lo| total >= lo) && hi.map_or(true, |hi| total <= hi),
            })
        }
        Definition::Seen { filter } => {
            budget.charge_query(0)?;
            Ok(ctx.seen_matching(filter, ctx.last_ball_mci()))
        }
        Definition::Attested { attestors, fields } => {
            budget.charge_query(0)?;
            Ok(ctx.attested(attestors, fields, ctx.last_ball_mci()))
        }
        Definition::CosignedBy { address } => {
            budget.charge_query(0)?;
            Ok(ctx.cosigned_by(address))
        }
        Definition::Mci { comparison, value } => Ok(compare_u64(ctx.last_ball_mci(), *comparison, *value)),
        Definition::Timestamp { comparison, value } => {
            Ok(compare_i64(ctx.unit_timestamp(), *comparison, *value))
        }
        Definition::ThisAddress => Ok(true),
        Definition::AutonomousAgent { address } => {
            budget.charge_query(0)?;
            Ok(address == ctx.this_address())
        }
    }
}

fn compare_u64(lhs: u64, cmp: Comparison, rhs: u64) -> bool {
    match cmp {
        Comparison::Lt => lhs < rhs,
        Comparison::Lte => lhs <= rhs,
        Comparison::Gt => lhs > rhs,
        Comparison::Gte => lhs >= rhs,
        Comparison::Eq => lhs == rhs,
    }
}

fn compare_i64(lhs: i64, cmp: Comparison, rhs: i64) -> bool {
    match cmp {
        Comparison::Lt => lhs < rhs,
        Comparison::Lte => lhs <= rhs,
        Comparison::Gt => lhs > rhs,
        Comparison::Gte => lhs >= rhs,
        Comparison::Eq => lhs == rhs,
    }
}

fn compare_json(lhs: &serde_json::Value, cmp: Comparison, rhs: &serde_json::Value) -> bool {
    match (lhs.as_f64(), rhs.as_f64()) {
        (Some(a), Some(b)) => match cmp {
            Comparison::Lt => a < b,
            Comparison::Lte => a <= b,
            Comparison::Gt => a > b,
            Comparison::Gte => a >= b,
            Comparison::Eq => (a - b).abs() < f64::EPSILON,
        },
        _ => cmp == Comparison::Eq && lhs == rhs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    struct FakeCtx {
        this_address: Address,
        unit_id: Vec<u8>,
        timestamp: Timestamp,
        mci: Mci,
        accept_sigs: bool,
    }

    impl EvalContext for FakeCtx {
        fn last_ball_mci(&self) -> Mci {
            self.mci
        }
        fn this_address(&self) -> &Address {
            &self.this_address
        }
        fn unit_timestamp(&self) -> Timestamp {
            self.timestamp
        }
        fn unit_id_bytes(&self) -> &[u8] {
            &self.unit_id
        }
        fn resolve_definition(&self, _addr: &Address, _horizon_mci: Mci) -> Option<Definition> {
            None
        }
        fn data_feed_value(&self, _o: &Address, _f: &str, _h: Mci) -> Option<serde_json::Value> {
            None
        }
        fn merkle_proof_valid(&self, _o: &Address, _f: &str, _e: &str, _h: Mci) -> bool {
            false
        }
        fn sum_matching(&self, _filter: &Filter, _h: Mci) -> u64 {
            0
        }
        fn has_matching(&self, _filter: &Filter, _h: Mci) -> bool {
            false
        }
        fn has_equal_matching(&self, _fields: &[String], _filter: &Filter, _h: Mci) -> bool {
            false
        }
        fn seen_matching(&self, _filter: &Filter, _h: Mci) -> bool {
            false
        }
        fn attested(&self, _a: &[Address], _f: &serde_json::Value, _h: Mci) -> bool {
            false
        }
        fn cosigned_by(&self, _address: &Address) -> bool {
            false
        }
        fn verify_sig(&self, _pubkey: &str, _authentifier: &str, _message: &[u8]) -> bool {
            self.accept_sigs
        }
    }

    fn ctx(accept_sigs: bool) -> FakeCtx {
        FakeCtx {
            this_address: Address::from_bytes([0; 24]),
            unit_id: vec![1, 2, 3],
            timestamp: 1000,
            mci: 42,
            accept_sigs,
        }
    }

    #[test]
    fn sig_passes_with_valid_authentifier() {
        let def = Definition::Sig { pubkey: "pk".into() };
        let mut auth = BTreeMap::new();
        auth.insert("r".to_string(), "sig-bytes".to_string());
        let mut budget = Budget::new();
        assert!(evaluate(&def, "r", &auth, &ctx(true), &mut budget).unwrap());
    }

    #[test]
    fn sig_fails_with_missing_authentifier() {
        let def = Definition::Sig { pubkey: "pk".into() };
        let auth = BTreeMap::new();
        let mut budget = Budget::new();
        assert!(evaluate(&def, "r", &auth, &ctx(true), &mut budget).is_err());
    }

    #[test]
    fn r_of_set_requires_threshold_satisfied() {
        let def = Definition::ROfSet {
            required: 2,
            set: vec![
                Definition::Sig { pubkey: "a".into() },
                Definition::Sig { pubkey: "b".into() },
                Definition::Sig { pubkey: "c".into() },
            ],
        };
        let mut auth = BTreeMap::new();
        auth.insert("r.0".to_string(), "s".into());
        auth.insert("r.1".to_string(), "s".into());
        let mut budget = Budget::new();
        assert!(evaluate(&def, "r", &auth, &ctx(true), &mut budget).unwrap());
    }

    #[test]
    fn complexity_cap_exceeded_by_many_unit_reads() {
        let set: Vec<Definition> = (0..21)
            .map(|i| Definition::Has {
                filter: Filter { what: Some(format!("w{i}")), ..Default::default() },
            })
            .collect();
        let def = Definition::And { set };
        let auth = BTreeMap::new();
        let mut budget = Budget::new();
        assert!(matches!(
            evaluate(&def, "r", &auth, &ctx(true), &mut budget),
            Err(BraidError::ComplexityExceeded { .. })
        ));
    }

    #[test]
    fn twenty_unit_reads_accepted() {
        let set: Vec<Definition> = (0..20)
            .map(|i| Definition::Has {
                filter: Filter { what: Some(format!("w{i}")), ..Default::default() },
            })
            .collect();
        let def = Definition::And { set };
        let auth = BTreeMap::new();
        let mut budget = Budget::new();
        assert!(!evaluate(&def, "r", &auth, &ctx(true), &mut budget).unwrap());
    }
}
