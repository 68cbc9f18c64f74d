//! The main-chain engine (spec C6): recomputes MC membership against the
//! current set of free tips and advances stability as far as it will go.

use braid_core::error::BraidError;
use braid_core::types::{Address, Mci, UnitId};
use braid_dag::queries::GraphView;
use tracing::info;

use braid_storage::StorageEngine;

use crate::mc;
use crate::stabilize::{self, StabilizationReport};

/// Report of one `recompute` call: units that newly joined or left the
/// main chain, and the stabilization batch that followed (if any).
#[derive(Debug, Clone, Default)]
pub struct McUpdate {
    pub added: Vec<(UnitId, Mci)>,
    pub removed: Vec<UnitId>,
    pub stabilization: StabilizationReport,
}

pub struct MainChainEngine {
    storage: std::sync::Arc<StorageEngine>,
}

impl MainChainEngine {
    pub fn new(storage: std::sync::Arc<StorageEngine>) -> Self {
        Self { storage }
    }

    /// Re-derives main-chain membership from the current tip set and, for
    /// any newly-qualifying prefix, runs the stabilization batch.
    ///
    /// `witnesses` is the witness list to use for commission payouts and the
    /// stability test's `witnessed_level` lookups; the caller (braid-node)
    /// tracks which witness list is currently in force.
    pub fn recompute(&self, witnesses: &[Address]) -> Result<McUpdate, BraidError> {
        let tips = self.storage.list_tips()?;
        let Some(best_tip) = mc::select_best_tip(&tips, &*self.storage) else {
            return Ok(McUpdate::default());
        };

        let last_stable_mci = self.storage.last_stable_mci()?;
        let stable_frontier = self.storage.unit_at_mci(last_stable_mci)?;
        let path = mc::walk_best_parent_chain(&best_tip, stable_frontier.as_ref(), &*self.storage);

        let mut removed = Vec::new();
        for (unit, mci) in self.previously_on_chain_above(last_stable_mci)? {
            if !path.contains(&unit) {
                self.storage.set_mc_position(&unit, mci, false)?;
                if let Some(mut derived) = self.storage.db.get_derived(&unit)? {
                    derived.is_on_main_chain = false;
                    derived.main_chain_index = None;
                    self.storage.db.put_derived(&unit, &derived)?;
                }
                removed.push(unit);
            }
        }

        let assigned = mc::assign_mcis(&path, last_stable_mci + 1, &*self.storage);
        let mut added = Vec::new();
        for (unit, mci) in &assigned {
            if self.storage.is_stable(unit) == Some(true) {
                continue; // already final, nothing to (re)assign
            }
            self.storage.set_mc_position(unit, *mci, true)?;
            if let Some(mut derived) = self.storage.db.get_derived(unit)? {
                derived.is_on_main_chain = true;
                derived.main_chain_index = Some(*mci);
                self.storage.db.put_derived(unit, &derived)?;
            }
            added.push((unit.clone(), *mci));
        }

        let stabilization = stabilize::advance_stability(&self.storage, &assigned, witnesses)?;
        if !stabilization.steps.is_empty() {
            info!(steps = stabilization.steps.len(), "main chain advanced stability");
        }

        Ok(McUpdate { added, removed, stabilization })
    }

    fn previously_on_chain_above(&self, last_stable_mci: Mci) -> Result<Vec<(UnitId, Mci)>, BraidError> {
        let mut out = Vec::new();
        let mut mci = last_stable_mci + 1;
        while let Some(unit) = self.storage.unit_at_mci(mci)? {
            out.push((unit, mci));
            mci += 1;
        }
        Ok(out)
    }
}
