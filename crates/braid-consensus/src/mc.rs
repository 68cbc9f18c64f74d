//! Main-chain selection (§4.6.1): among the current free tips, pick the
//! one with the highest `witnessed_level` (ties by `level`, then by smallest
//! unit id) and walk its best-parent chain back toward the stable frontier.

use braid_core::types::{Level, Mci, UnitId, WitnessedLevel};
use braid_dag::queries::GraphView;

/// Ordering used both to pick the best tip and, in `stability`, to decide
/// whether an alternative branch could ever outrank the incumbent MC unit.
/// Matches `braid_dag::queries::determine_best_parent`'s tie-break exactly,
/// since both answer "which of these branches does the network prefer".
pub fn preferred(a: (WitnessedLevel, Level, &UnitId), b: (WitnessedLevel, Level, &UnitId)) -> std::cmp::Ordering {
    a.0.cmp(&b.0).then(a.1.cmp(&b.1)).then(b.2 .0.cmp(&a.2 .0)) // smaller id wins full ties
}

/// Picks the globally preferred free tip, or `None` if there are no tips
/// (only possible before genesis is admitted).
pub fn select_best_tip(tips: &[UnitId], view: &impl GraphView) -> Option<UnitId> {
    tips.iter()
        .map(|t| {
            let wl = view.witnessed_level(t).unwrap_or(0);
            let lvl = view.level(t).unwrap_or(0);
            (wl, lvl, t)
        })
        .max_by(|a, b| preferred(*a, *b))
        .map(|(_, _, id)| id.clone())
}

/// Walks `best_parent_unit` edges from `tip` down to genesis, returning the
/// path in root-first order (genesis first, `tip` last). Stops early at
/// `stop_below`, a unit already known to be on the stable chain, so callers
/// never re-walk the part of history that cannot change.
pub fn walk_best_parent_chain(tip: &UnitId, stop_at: Option<&UnitId>, view: &impl GraphView) -> Vec<UnitId> {
    let mut path = vec![tip.clone()];
    let mut cursor = tip.clone();
    loop {
        if Some(&cursor) == stop_at {
            break;
        }
        match view.best_parent_unit(&cursor) {
            Some(parent) => {
                path.push(parent.clone());
                cursor = parent;
            }
            None => break, // reached genesis
        }
    }
    path.reverse();
    path
}

/// Assigns the next free MCI to each element of `path` that is not already
/// stable, starting at `from_mci`. Stable units keep the MCI they were
/// given at stabilization (spec: "MCI of stable units never changes").
pub fn assign_mcis(path: &[UnitId], from_mci: Mci, view: &impl GraphView) -> Vec<(UnitId, Mci)> {
    let mut next = from_mci;
    let mut out = Vec::with_capacity(path.len());
    for unit in path {
        if view.is_stable(unit) == Some(true) {
            if let Some(mci) = view.main_chain_index(unit) {
                out.push((unit.clone(), mci));
                continue;
            }
        }
        out.push((unit.clone(), next));
        next += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeView {
        best_parent: HashMap<UnitId, UnitId>,
        levels: HashMap<UnitId, Level>,
        witnessed_levels: HashMap<UnitId, WitnessedLevel>,
        stable: HashMap<UnitId, bool>,
        mci: HashMap<UnitId, Mci>,
    }

    impl GraphView for FakeView {
        fn parent_units(&self, _unit: &UnitId) -> Option<Vec<UnitId>> {
            None
        }
        fn best_parent_unit(&self, unit: &UnitId) -> Option<UnitId> {
            self.best_parent.get(unit).cloned()
        }
        fn level(&self, unit: &UnitId) -> Option<Level> {
            self.levels.get(unit).copied()
        }
        fn witnessed_level(&self, unit: &UnitId) -> Option<WitnessedLevel> {
            self.witnessed_levels.get(unit).copied()
        }
        fn limci(&self, _unit: &UnitId) -> Option<Mci> {
            None
        }
        fn main_chain_index(&self, unit: &UnitId) -> Option<Mci> {
            self.mci.get(unit).copied()
        }
        fn is_stable(&self, unit: &UnitId) -> Option<bool> {
            self.stable.get(unit).copied()
        }
        fn author_addresses(&self, _unit: &UnitId) -> Option<Vec<braid_core::types::Address>> {
            None
        }
    }

    fn uid(b: u8) -> UnitId {
        UnitId::from_bytes([b; 32])
    }

    #[test]
    fn best_tip_picked_by_witnessed_level() {
        let mut v = FakeView::default();
        let (a, b) = (uid(1), uid(2));
        v.witnessed_levels.insert(a.clone(), 3);
        v.witnessed_levels.insert(b.clone(), 9);
        assert_eq!(select_best_tip(&[a, b.clone()], &v), Some(b));
    }

    #[test]
    fn walk_stops_at_known_stable_unit() {
        let mut v = FakeView::default();
        let (genesis, mid, tip) = (uid(1), uid(2), uid(3));
        v.best_parent.insert(mid.clone(), genesis.clone());
        v.best_parent.insert(tip.clone(), mid.clone());
        let path = walk_best_parent_chain(&tip, Some(&mid), &v);
        assert_eq!(path, vec![mid, tip]);
    }

    #[test]
    fn assign_mcis_skips_already_stable() {
        let mut v = FakeView::default();
        let (a, b) = (uid(1), uid(2));
        v.stable.insert(a.clone(), true);
        v.mci.insert(a.clone(), 5);
        let assigned = assign_mcis(&[a.clone(), b.clone()], 6, &v);
        assert_eq!(assigned, vec![(a, 5), (b, 6)]);
    }
}
