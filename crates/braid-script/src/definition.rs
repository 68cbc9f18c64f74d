use braid_core::types::{Address, Mci, Timestamp};
use serde::{Deserialize, Serialize};

/// A filter clause shared by `has`, `has_equal`, `sum`, and `seen` (spec C4).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Filter {
    pub what: Option<String>,
    pub asset: Option<String>,
    pub address: Option<Address>,
    pub amount_at_least: Option<u64>,
    pub amount_at_most: Option<u64>,
}

impl Default for Filter {
    fn default() -> Self {
        Self {
            what: None,
            asset: None,
            address: None,
            amount_at_least: None,
            amount_at_most: None,
        }
    }
}

/// A comparison operator used by `mci` and `timestamp` leaves.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
}

/// The tagged tree of script operators (spec C4). `Address` definitions are
/// resolved recursively through `EvalContext::resolve_definition`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Definition {
    Sig { pubkey: String },
    Hash { hash: String },
    Address { address: Address },
    ROfSet { required: u32, set: Vec<Definition> },
    WeightedAnd { required_weight: u32, set: Vec<(u32, Definition)> },
    Or { set: Vec<Definition> },
    And { set: Vec<Definition> },
    InDataFeed { oracles: Vec<Address>, feed_name: String, comparison: Comparison, value: serde_json::Value },
    InMerkle { oracles: Vec<Address>, feed_name: String, element: String },
    Has { filter: Filter },
    HasEqual { equal_fields: Vec<String>, filter: Filter },
    Sum { filter: Filter, at_least: Option<u64>, at_most: Option<u64>, equals: Option<u64> },
    Seen { filter: Filter },
    Attested { attestors: Vec<Address>, fields: serde_json::Value },
    CosignedBy { address: Address },
    Not { inner: Box<Definition> },
    Mci { comparison: Comparison, value: Mci },
    Timestamp { comparison: Comparison, value: Timestamp },
    ThisAddress,
    AutonomousAgent { address: Address },
}

/// Operators that read chain state other than the unit under evaluation
/// itself; rejected under `bNoReferences` (spec C4, witness-author path).
fn is_reference_operator(def: &Definition) -> bool {
    matches!(
        def,
        Definition::Address { .. }
            | Definition::InDataFeed { .. }
            | Definition::InMerkle { .. }
            | Definition::Has { .. }
            | Definition::HasEqual { .. }
            | Definition::Seen { .. }
            | Definition::Attested { .. }
            | Definition::CosignedBy { .. }
            | Definition::AutonomousAgent { .. }
    )
}

fn filter_range_ok(filter: &Filter) -> bool {
    match (filter.amount_at_least, filter.amount_at_most) {
        (Some(lo), Some(hi)) => lo <= hi,
        _ => true,
    }
}

/// Statically validate definition structure (spec C4 `validate_definition`).
pub fn validate_definition(def: &Definition, depth: usize, b_no_references: bool) -> Result<(), braid_core::error::BraidError> {
    use braid_core::error::BraidError;

    if depth > braid_core::constants::D_MAX {
        return Err(BraidError::NestingTooDeep { max: braid_core::constants::D_MAX });
    }
    if b_no_references && is_reference_operator(def) {
        return Err(BraidError::ReferenceNotAllowed);
    }

    match def {
        Definition::Sig { pubkey } if pubkey.is_empty() => {
            Err(BraidError::DefinitionMalformed("sig: empty pubkey".into()))
        }
        Definition::Hash { hash } if hash.is_empty() => {
            Err(BraidError::DefinitionMalformed("hash: empty hash".into()))
        }
        Definition::ROfSet { required, set } => {
            if *required == 0 || *required as usize > set.len() {
                return Err(BraidError::DefinitionMalformed(format!(
                    "r_of_set: required={} out of range for set of {}",
                    required,
                    set.len()
                )));
            }
            set.iter().try_for_each(|d| validate_definition(d, depth + 1, b_no_references))
        }
        Definition::WeightedAnd { required_weight, set } => {
            if set.is_empty() {
                return Err(BraidError::DefinitionMalformed("weighted_and: empty set".into()));
            }
            let total: u32 = set.iter().map(|(w, _)| *w).sum();
            if *required_weight == 0 || *required_weight > total {
                return Err(BraidError::DefinitionMalformed(
                    "weighted_and: required_weight exceeds total weight".into(),
                ));
            }
            set.iter().try_for_each(|(_, d)| validate_definition(d, depth + 1, b_no_references))
        }
        Definition::Or { set } | Definition::And { set } => {
            if set.is_empty() {
                return Err(BraidError::DefinitionMalformed("empty operand set".into()));
            }
            set.iter().try_for_each(|d| validate_definition(d, depth + 1, b_no_references))
        }
        Definition::Not { inner } => validate_definition(inner, depth + 1, b_no_references),
        Definition::Has { filter } | Definition::HasEqual { filter, .. } | Definition::Seen { filter } => {
            if !filter_range_ok(filter) {
                return Err(BraidError::DefinitionMalformed(
                    "filter: amount_at_least > amount_at_most".into(),
                ));
            }
            Ok(())
        }
        Definition::Sum { filter, at_least, at_most, equals } => {
            if !filter_range_ok(filter) {
                return Err(BraidError::DefinitionMalformed(
                    "sum: amount_at_least > amount_at_most".into(),
                ));
            }
            if equals.is_some() && (at_least.is_some() || at_most.is_some()) {
                return Err(BraidError::DefinitionMalformed(
                    "sum: equals cannot combine with at_least/at_most".into(),
                ));
            }
            if let (Some(lo), Some(hi)) = (at_least, at_most) {
                if lo > hi {
                    return Err(BraidError::DefinitionMalformed("sum: at_least > at_most".into()));
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_rejects_at_least_greater_than_at_most() {
        let def = Definition::Sum {
            filter: Filter::default(),
            at_least: Some(100),
            at_most: Some(50),
            equals: None,
        };
        assert!(matches!(
            validate_definition(&def, 0, false),
            Err(braid_core::error::BraidError::DefinitionMalformed(_))
        ));
    }

    #[test]
    fn sum_rejects_equals_with_range() {
        let def = Definition::Sum {
            filter: Filter::default(),
            at_least: Some(10),
            at_most: None,
            equals: Some(10),
        };
        assert!(validate_definition(&def, 0, false).is_err());
    }

    #[test]
    fn reference_operator_rejected_under_no_references() {
        let def = Definition::Seen { filter: Filter::default() };
        assert!(matches!(
            validate_definition(&def, 0, true),
            Err(braid_core::error::BraidError::ReferenceNotAllowed)
        ));
        assert!(validate_definition(&def, 0, false).is_ok());
    }

    #[test]
    fn r_of_set_rejects_required_above_set_size() {
        let def = Definition::ROfSet {
            required: 3,
            set: vec![Definition::ThisAddress, Definition::ThisAddress],
        };
        assert!(validate_definition(&def, 0, false).is_err());
    }

    #[test]
    fn nesting_past_d_max_rejected() {
        let mut def = Definition::ThisAddress;
        for _ in 0..(braid_core::constants::D_MAX + 2) {
            def = Definition::Not { inner: Box::new(def) };
        }
        assert!(matches!(
            validate_definition(&def, 0, false),
            Err(braid_core::error::BraidError::NestingTooDeep { .. })
        ));
    }
}
