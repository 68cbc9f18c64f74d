use std::sync::{Arc, Mutex};

use braid_core::error::BraidError;
use braid_core::types::{Address, Mci, UnitId};
use braid_dag::{Asset, Ball, GraphView, Output, Unit, UnitDerived};
use tracing::info;

use crate::cache::LruCache;
use crate::db::StateDb;

/// Bounded size for the parsed-unit and static-props caches: an LRU holding
/// at least 1000 entries.
const CACHE_CAPACITY: usize = 4_096;

/// `{best_parent_unit, level, witnessed_level}` as returned by
/// `read_static_props`.
#[derive(Clone, Debug)]
pub struct StaticProps {
    pub best_parent_unit: Option<UnitId>,
    pub level: braid_core::types::Level,
    pub witnessed_level: braid_core::types::WitnessedLevel,
}

/// All state a single unit's admission may mutate, staged before the
/// all-or-nothing commit: every write within a single received unit's
/// processing must be atomic.
#[derive(Default)]
pub struct StagedUnitWrite {
    pub unit: Option<(UnitId, Unit, UnitDerived)>,
    pub outputs: Vec<(UnitId, u32, u32, Output)>,
    pub spent_outputs: Vec<(UnitId, u32, u32)>,
    pub bound_definitions: Vec<(Address, serde_json::Value)>,
    pub sibling_derived_updates: Vec<(UnitId, UnitDerived)>,
    pub author_index_entries: Vec<(Address, UnitId)>,
    pub asset_definitions: Vec<(String, Asset)>,
    pub best_child_entries: Vec<(UnitId, UnitId)>,
}

/// The storage engine: read operations that never block writers
/// longer than a point lookup, plus atomic writes invoked only under the
/// caller's write lock (held by `braid-node`'s concurrency arbiter, not by
/// this engine itself — this layer only guarantees that one `StagedUnitWrite`
/// either fully commits or fully rolls back its speculative caches).
pub struct StorageEngine {
    pub db: Arc<StateDb>,
    unit_cache: Mutex<LruCache<UnitId, Unit>>,
    static_props_cache: Mutex<LruCache<UnitId, StaticProps>>,
}

impl StorageEngine {
    pub fn new(db: Arc<StateDb>) -> Self {
        Self {
            db,
            unit_cache: Mutex::new(LruCache::new(CACHE_CAPACITY)),
            static_props_cache: Mutex::new(LruCache::new(CACHE_CAPACITY)),
        }
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    pub fn read_unit_props(&self, id: &UnitId) -> Result<Option<Unit>, BraidError> {
        if let Some(unit) = self.unit_cache.lock().unwrap().get(id) {
            return Ok(Some(unit.clone()));
        }
        let unit = self.db.get_unit(id)?;
        if let Some(u) = &unit {
            self.unit_cache.lock().unwrap().put(id.clone(), u.clone());
        }
        Ok(unit)
    }

    pub fn read_unit_authors(&self, id: &UnitId) -> Result<Vec<Address>, BraidError> {
        Ok(self
            .read_unit_props(id)?
            .map(|u| u.authors.into_iter().map(|a| a.address).collect())
            .unwrap_or_default())
    }

    pub fn read_stable_unit_props(&self, id: &UnitId) -> Result<Option<Unit>, BraidError> {
        match self.db.get_derived(id)? {
            Some(d) if d.is_stable => self.read_unit_props(id),
            _ => Ok(None),
        }
    }

    pub fn read_last_ball_mci_of_mci(&self, mci: Mci) -> Result<Option<Mci>, BraidError> {
        let Some(unit_id) = self.db.unit_at_mci(mci)? else {
            return Ok(None);
        };
        let Some(unit) = self.read_unit_props(&unit_id)? else {
            return Ok(None);
        };
        let Some(last_ball_unit) = unit.last_ball_unit else {
            return Ok(None);
        };
        Ok(self.db.get_derived(&last_ball_unit)?.and_then(|d| d.main_chain_index))
    }

    pub fn read_static_props(&self, id: &UnitId) -> Result<Option<StaticProps>, BraidError> {
        if let Some(props) = self.static_props_cache.lock().unwrap().get(id) {
            return Ok(Some(props.clone()));
        }
        let Some(derived) = self.db.get_derived(id)? else {
            return Ok(None);
        };
        let props = StaticProps {
            best_parent_unit: derived.best_parent_unit,
            level: derived.level,
            witnessed_level: derived.witnessed_level,
        };
        self.static_props_cache.lock().unwrap().put(id.clone(), props.clone());
        Ok(Some(props))
    }

    pub fn read_definition_by_address(
        &self,
        addr: &Address,
        _horizon_mci: Mci,
    ) -> Result<Option<serde_json::Value>, BraidError> {
        // Definitions bind once at stabilization and never change afterward,
        // so the horizon parameter only documents intent at the call site;
        // any binding found is valid at every horizon after it was written.
        self.db.get_definition(addr)
    }

    pub fn read_aa_definition(&self, addr: &Address) -> Result<Option<serde_json::Value>, BraidError> {
        self.db.get_aa_definition(addr)
    }

    pub fn read_outputs(&self, unit: &UnitId, message_index: u32) -> Result<Vec<Output>, BraidError> {
        self.db.read_outputs(unit, message_index)
    }

    pub fn read_output(
        &self,
        unit: &UnitId,
        message_index: u32,
        output_index: u32,
    ) -> Result<Option<Output>, BraidError> {
        self.db.get_output(unit, message_index, output_index)
    }

    pub fn read_asset(&self, asset_id: &str) -> Result<Option<Asset>, BraidError> {
        self.db.get_asset(asset_id)
    }

    pub fn read_inputs(&self, unit: &UnitId) -> Result<Vec<braid_dag::Input>, BraidError> {
        Ok(self
            .read_unit_props(unit)?
            .map(|u| {
                u.messages
                    .into_iter()
                    .filter_map(|m| match m.payload {
                        Some(braid_dag::MessagePayload::Payment { inputs, .. }) => Some(inputs),
                        _ => None,
                    })
                    .flatten()
                    .collect()
            })
            .unwrap_or_default())
    }

    // ── Atomic writes ────────────────────────────────────────────────────────

    /// Persist a fully-staged unit admission. The nine trees it may touch
    /// are written inside a single sled transaction (`StateDb::commit_unit_admission`),
    /// so either every row lands or (on error) none does; no speculative
    /// cache entry is populated until after that transaction commits.
    pub fn commit_staged_write(&self, staged: StagedUnitWrite) -> Result<(), BraidError> {
        self.db.commit_unit_admission(
            staged.unit.as_ref().map(|(id, u, d)| (id, u, d)),
            &staged.outputs,
            &staged.spent_outputs,
            &staged.bound_definitions,
            &staged.sibling_derived_updates,
            &staged.author_index_entries,
            &staged.asset_definitions,
            &staged.best_child_entries,
        )?;

        // Only now, after the transaction has committed, publish to the caches —
        // readers must never observe a torn mix of pre- and post-commit state.
        if let Some((id, unit, _)) = &staged.unit {
            self.unit_cache.lock().unwrap().put(id.clone(), unit.clone());
            self.static_props_cache.lock().unwrap().remove(id);
        }
        for (id, derived) in &staged.sibling_derived_updates {
            self.static_props_cache.lock().unwrap().put(
                id.clone(),
                StaticProps {
                    best_parent_unit: derived.best_parent_unit.clone(),
                    level: derived.level,
                    witnessed_level: derived.witnessed_level,
                },
            );
        }
        Ok(())
    }

    pub fn commit_ball(&self, id: &UnitId, ball: &Ball) -> Result<(), BraidError> {
        self.db.commit_ball(id, ball)
    }

    pub fn set_mc_position(&self, unit: &UnitId, mci: Mci, is_on_mc: bool) -> Result<(), BraidError> {
        self.db.set_mc_position(unit, mci, is_on_mc)
    }

    pub fn advance_last_stable_mci(&self, new_mci: Mci, batch_of_balls: &[(UnitId, Ball)]) -> Result<(), BraidError> {
        self.db.advance_last_stable_mci(new_mci, batch_of_balls)?;
        info!(new_mci, balls = batch_of_balls.len(), "advanced last_stable_mci");
        Ok(())
    }

    pub fn last_stable_mci(&self) -> Result<Mci, BraidError> {
        self.db.last_stable_mci()
    }

    /// Units authored by `address`, bounded by `N_CONF` (§4.5.1 phase 8).
    pub fn units_by_author(&self, address: &Address) -> Result<Vec<UnitId>, BraidError> {
        self.db.units_by_author(address, braid_core::constants::N_CONF)
    }

    /// Outputs paid to `address`, bounded by `N_CONF`, for the `has`/`sum`/`seen` script operators.
    pub fn outputs_by_address(&self, address: &Address) -> Result<Vec<Output>, BraidError> {
        self.db.outputs_by_address(address, braid_core::constants::N_CONF)
    }

    /// Unspent outputs paid to `address`, with their spend coordinates, for
    /// coin selection by an external wallet — the RPC surface's one write-
    /// adjacent concession, still read-only on this side of the boundary.
    pub fn spendable_outputs_by_address(&self, address: &Address) -> Result<Vec<(UnitId, u32, u32, Output)>, BraidError> {
        self.db.spendable_outputs_by_address(address, braid_core::constants::N_CONF)
    }

    /// Units whose `best_parent_unit` is `parent` (§4.6.2 alternative-branch search).
    pub fn children_of(&self, parent: &UnitId) -> Result<Vec<UnitId>, BraidError> {
        self.db.best_children_of(parent)
    }

    /// Units with no known child yet (§4.6.1 MC selection starting set).
    pub fn list_tips(&self) -> Result<Vec<UnitId>, BraidError> {
        self.db.list_tips()
    }

    pub fn get_ball(&self, id: &UnitId) -> Result<Option<Ball>, BraidError> {
        self.db.get_ball(id)
    }

    pub fn unit_at_mci(&self, mci: Mci) -> Result<Option<UnitId>, BraidError> {
        self.db.unit_at_mci(mci)
    }

    // ── Hash-tree pending set (§4.7.3) ────────────────────────────────

    pub fn put_pending_ball(&self, id: &UnitId, ball: &Ball) -> Result<(), BraidError> {
        self.db.put_pending_ball(id, ball)
    }

    pub fn get_pending_ball(&self, id: &UnitId) -> Result<Option<Ball>, BraidError> {
        self.db.get_pending_ball(id)
    }

    pub fn evict_pending_ball(&self, id: &UnitId) -> Result<(), BraidError> {
        self.db.evict_pending_ball(id)
    }

    pub fn clear_pending_balls(&self) -> Result<(), BraidError> {
        self.db.clear_pending_balls()
    }

    pub fn pending_hash_tree_count(&self) -> usize {
        self.db.pending_hash_tree_count()
    }

    pub fn find_unit_by_ball_id(&self, ball_id: &braid_core::types::BallId) -> Result<Option<UnitId>, BraidError> {
        self.db.find_unit_by_ball_id(ball_id)
    }

    pub fn find_pending_by_ball_id(&self, ball_id: &braid_core::types::BallId) -> Result<bool, BraidError> {
        self.db.find_pending_by_ball_id(ball_id)
    }
}

impl GraphView for StorageEngine {
    fn parent_units(&self, unit: &UnitId) -> Option<Vec<UnitId>> {
        self.read_unit_props(unit).ok().flatten().map(|u| u.parent_units)
    }

    fn best_parent_unit(&self, unit: &UnitId) -> Option<UnitId> {
        self.read_static_props(unit).ok().flatten().and_then(|p| p.best_parent_unit)
    }

    fn level(&self, unit: &UnitId) -> Option<braid_core::types::Level> {
        self.read_static_props(unit).ok().flatten().map(|p| p.level)
    }

    fn witnessed_level(&self, unit: &UnitId) -> Option<braid_core::types::WitnessedLevel> {
        self.read_static_props(unit).ok().flatten().map(|p| p.witnessed_level)
    }

    fn limci(&self, unit: &UnitId) -> Option<Mci> {
        self.db.get_derived(unit).ok().flatten().map(|d| d.limci)
    }

    fn main_chain_index(&self, unit: &UnitId) -> Option<Mci> {
        self.db.get_derived(unit).ok().flatten().and_then(|d| d.main_chain_index)
    }

    fn is_stable(&self, unit: &UnitId) -> Option<bool> {
        self.db.get_derived(unit).ok().flatten().map(|d| d.is_stable)
    }

    fn author_addresses(&self, unit: &UnitId) -> Option<Vec<Address>> {
        let addrs = self.read_unit_authors(unit).ok()?;
        if addrs.is_empty() {
            None
        } else {
            Some(addrs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_dag::{Author, Unit};

    fn make_db(name: &str) -> Arc<StateDb> {
        let dir = std::env::temp_dir().join(format!("braid_storage_test_{}", name));
        let _ = std::fs::remove_dir_all(&dir);
        Arc::new(StateDb::open(&dir).unwrap())
    }

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
                address: Address::from_bytes([1; 24]),
                definition: None,
                authentifiers: std::collections::BTreeMap::from([("r".to_string(), "sig".into())]),
            }],
            messages: vec![],
            headers_commission: 0,
            payload_commission: 0,
            timestamp: 0,
            content_hash: None,
        }
    }

    #[test]
    fn round_trips_unit_through_cache_and_db() {
        let engine = StorageEngine::new(make_db("round_trip"));
        let unit = sample_unit();
        let id = unit.compute_unit_id().unwrap();
        let mut staged = StagedUnitWrite::default();
        staged.unit = Some((id.clone(), unit.clone(), UnitDerived::default()));
        engine.commit_staged_write(staged).unwrap();

        let read_back = engine.read_unit_props(&id).unwrap().unwrap();
        assert_eq!(read_back, unit);
    }

    #[test]
    fn last_stable_mci_defaults_to_zero_and_advances() {
        let engine = StorageEngine::new(make_db("mci"));
        assert_eq!(engine.last_stable_mci().unwrap(), 0);
        engine.advance_last_stable_mci(5, &[]).unwrap();
        assert_eq!(engine.last_stable_mci().unwrap(), 5);
    }
}
