use braid_core::types::{Address, Balance, Level, Mci, Sequence, Timestamp, UnitId, WitnessedLevel};
use serde::{Deserialize, Serialize};

/// One typed payload entry inside a unit (§3.1).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "app", rename_all = "snake_case")]
pub enum MessagePayload {
    Payment { inputs: Vec<Input>, outputs: Vec<Output> },
    Data { fields: serde_json::Value },
    Definition { address: Address, definition: serde_json::Value },
    Text { text: String },
    Asset { asset: Asset },
    AgentTrigger { agent_address: Address, data: serde_json::Value },
}

/// A message on a unit. `payload_hash` is what actually enters the unit-id
/// preimage; `payload` is carried for local processing and stripped when
/// computing the canonical unit hash.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub app: String,
    pub payload_hash: String,
    pub payload: Option<MessagePayload>,
}

/// A UTXO reference or issuance slot consumed by a payment message.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Input {
    Transfer { unit: UnitId, message_index: u32, output_index: u32 },
    HeadersCommission { unit: UnitId },
    Witnessing { unit: UnitId },
    Issue { serial_number: u64, amount: Balance },
}

/// A UTXO produced by a payment message.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Output {
    pub address: Address,
    pub asset: Option<String>,
    pub amount: Balance,
    pub is_spent: bool,
    pub blinding: Option<String>,
}

/// An issuance policy tying a unit to an asset (§3.1).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Asset {
    pub cap: Option<Balance>,
    pub is_private: bool,
    pub is_transferrable: bool,
    pub fixed_denominations: Vec<Balance>,
    pub issue_condition: Option<serde_json::Value>,
    pub transfer_condition: Option<serde_json::Value>,
}

/// One author entry: the address acting, its optional freshly-revealed
/// definition, and the authentifiers proving the right to act as it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Author {
    pub address: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<serde_json::Value>,
    pub authentifiers: std::collections::BTreeMap<String, String>,
}

/// The atomic DAG vertex (§3.1).
///
/// Derived fields (`level`, `witnessed_level`, `best_parent_unit`, `limci`,
/// `main_chain_index`, `is_on_main_chain`, `is_stable`, `sequence`) are not
/// part of the hash preimage and are carried alongside (`UnitDerived`)
/// rather than inline, so a `Unit` converts to its naked hashing view
/// without stripping fields by hand at every call site.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Unit {
    pub version: String,
    pub alt: String,
    pub parent_units: Vec<UnitId>,
    pub last_ball_unit: Option<UnitId>,
    pub last_ball: Option<braid_core::types::BallId>,
    pub witness_list_unit: Option<UnitId>,
    pub witnesses: Option<Vec<Address>>,
    pub authors: Vec<Author>,
    pub messages: Vec<Message>,
    pub headers_commission: u64,
    pub payload_commission: u64,
    pub timestamp: Timestamp,
    /// Present only for archived units, retained in the hash preimage.
    pub content_hash: Option<String>,
}

/// Derived graph metadata computed on insertion; not part of any hash preimage.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct UnitDerived {
    pub level: Level,
    pub witnessed_level: WitnessedLevel,
    pub best_parent_unit: Option<UnitId>,
    pub limci: Mci,
    pub main_chain_index: Option<Mci>,
    pub is_on_main_chain: bool,
    pub is_stable: bool,
    pub sequence: Sequence,
}

impl Unit {
    pub fn is_genesis(&self) -> bool {
        self.parent_units.is_empty()
    }

    /// The canonical JSON preimage used for unit-id hashing: derived/volatile
    /// fields stripped, each message's `payload` replaced by `payload_hash`.
    pub fn hashable_view(&self) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = self
            .messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "app": m.app,
                    "payload_hash": m.payload_hash,
                })
            })
            .collect();

        let mut obj = serde_json::json!({
            "version": self.version,
            "alt": self.alt,
            "authors": self.authors,
            "headers_commission": self.headers_commission,
            "payload_commission": self.payload_commission,
            "timestamp": self.timestamp,
        });

        let map = obj.as_object_mut().expect("constructed as object");
        if !self.parent_units.is_empty() {
            map.insert(
                "parent_units".into(),
                serde_json::json!(self.parent_units.iter().map(|u| u.to_b64()).collect::<Vec<_>>()),
            );
        }
        if let Some(lbu) = &self.last_ball_unit {
            map.insert("last_ball_unit".into(), serde_json::json!(lbu.to_b64()));
        }
        if let Some(lb) = &self.last_ball {
            map.insert("last_ball".into(), serde_json::json!(lb.to_b64()));
        }
        if let Some(wlu) = &self.witness_list_unit {
            map.insert("witness_list_unit".into(), serde_json::json!(wlu.to_b64()));
        }
        if let Some(w) = &self.witnesses {
            map.insert(
                "witnesses".into(),
                serde_json::json!(w.iter().map(|a| a.to_b58()).collect::<Vec<_>>()),
            );
        }
        if !messages.is_empty() {
            map.insert("messages".into(), serde_json::json!(messages));
        }
        if let Some(ch) = &self.content_hash {
            map.insert("content_hash".into(), serde_json::json!(ch));
        }
        obj
    }

    pub fn compute_unit_id(&self) -> Result<UnitId, braid_core::error::BraidError> {
        let digest = braid_crypto::hash_value(&self.hashable_view())?;
        Ok(UnitId::from_bytes(digest))
    }
}

/// The identity of a unit once stable (§3.1, §4.1).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Ball {
    pub unit: UnitId,
    pub parent_balls: Vec<braid_core::types::BallId>,
    pub skiplist_balls: Vec<braid_core::types::BallId>,
    pub is_nonserial: bool,
}

impl Ball {
    /// `H({unit, parent_balls (sorted, omitted if empty), skiplist_balls
    /// (sorted, omitted if empty), is_nonserial (present iff != good)})`.
    pub fn compute_ball_id(&self) -> Result<braid_core::types::BallId, braid_core::error::BraidError> {
        let mut obj = serde_json::json!({ "unit": self.unit.to_b64() });
        let map = obj.as_object_mut().expect("constructed as object");

        if !self.parent_balls.is_empty() {
            let mut sorted: Vec<String> = self.parent_balls.iter().map(|b| b.to_b64()).collect();
            sorted.sort();
            map.insert("parent_balls".into(), serde_json::json!(sorted));
        }
        if !self.skiplist_balls.is_empty() {
            let mut sorted: Vec<String> = self.skiplist_balls.iter().map(|b| b.to_b64()).collect();
            sorted.sort();
            map.insert("skiplist_balls".into(), serde_json::json!(sorted));
        }
        if self.is_nonserial {
            map.insert("is_nonserial".into(), serde_json::json!(true));
        }

        let digest = braid_crypto::hash_value(&obj)?;
        Ok(braid_core::types::BallId::from_bytes(digest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_unit() -> Unit {
        Unit {
            version: "4.0".into(),
            alt: "1".into(),
            parent_units: vec![],
            last_ball_unit: None,
            last_ball: None,
            witness_list_unit: None,
            witnesses: None,
            authors: vec![Author {
                address: Address::from_bytes([7; 24]),
                definition: None,
                authentifiers: std::collections::BTreeMap::from([("r".to_string(), "sig".to_string())]),
            }],
            messages: vec![],
            headers_commission: 0,
            payload_commission: 0,
            timestamp: 0,
            content_hash: None,
        }
    }

    #[test]
    fn genesis_has_no_parents() {
        assert!(sample_unit().is_genesis());
    }

    #[test]
    fn unit_id_is_deterministic() {
        let u = sample_unit();
        assert_eq!(u.compute_unit_id().unwrap(), u.compute_unit_id().unwrap());
    }

    #[test]
    fn ball_id_omits_empty_skiplists() {
        let b1 = Ball {
            unit: UnitId::from_bytes([1; 32]),
            parent_balls: vec![],
            skiplist_balls: vec![],
            is_nonserial: false,
        };
        let b2 = Ball {
            unit: UnitId::from_bytes([1; 32]),
            parent_balls: vec![braid_core::types::BallId::from_bytes([2; 32])],
            skiplist_balls: vec![],
            is_nonserial: false,
        };
        assert_ne!(b1.compute_ball_id().unwrap(), b2.compute_ball_id().unwrap());
    }
}
