//! Graph queries over the DAG (spec C3).
//!
//! These are pure functions over a `GraphView`: anything that can answer
//! "what is this unit's level/witnessed_level/best_parent" for already-known
//! units. `braid-storage` implements `GraphView` against its persisted
//! static-props cache; `braid-consensus` and `braid-validator` consume these
//! functions without depending on the storage backend directly.

use braid_core::constants::MAJORITY_WITNESSES;
use braid_core::types::{Address, Level, Mci, UnitId, WitnessedLevel};
use std::collections::{HashSet, VecDeque};

/// Read-only view of already-admitted units' derived graph metadata.
pub trait GraphView {
    fn parent_units(&self, unit: &UnitId) -> Option<Vec<UnitId>>;
    fn best_parent_unit(&self, unit: &UnitId) -> Option<UnitId>;
    fn level(&self, unit: &UnitId) -> Option<Level>;
    fn witnessed_level(&self, unit: &UnitId) -> Option<WitnessedLevel>;
    fn limci(&self, unit: &UnitId) -> Option<Mci>;
    fn main_chain_index(&self, unit: &UnitId) -> Option<Mci>;
    fn is_stable(&self, unit: &UnitId) -> Option<bool>;
    /// Addresses of the unit's authors, in author order.
    fn author_addresses(&self, unit: &UnitId) -> Option<Vec<Address>>;
}

/// `determine_best_parent`: highest `witnessed_level`, ties by highest
/// `level`, ties by smallest unit id (bytewise).
pub fn determine_best_parent(parents: &[UnitId], view: &impl GraphView) -> Option<UnitId> {
    parents
        .iter()
        .map(|p| {
            let wl = view.witnessed_level(p).unwrap_or(0);
            let lvl = view.level(p).unwrap_or(0);
            (p, wl, lvl)
        })
        .max_by(|a, b| {
            a.1.cmp(&b.1)
                .then(a.2.cmp(&b.2))
                .then(b.0 .0.cmp(&a.0 .0)) // smallest id wins on a full tie
        })
        .map(|(p, _, _)| p.clone())
}

/// `level(unit) = 1 + max(level of parents)`; genesis = 0.
pub fn level(parents: &[UnitId], view: &impl GraphView) -> Level {
    if parents.is_empty() {
        return 0;
    }
    1 + parents
        .iter()
        .filter_map(|p| view.level(p))
        .max()
        .unwrap_or(0)
}

/// `limci(unit) = max mci of any stable ancestor`, i.e. the max over parents
/// of (their own `mci` if stable, else their `limci`).
pub fn limci(parents: &[UnitId], view: &impl GraphView) -> Mci {
    parents
        .iter()
        .map(|p| match view.is_stable(p) {
            Some(true) => view.main_chain_index(p).unwrap_or(0),
            _ => view.limci(p).unwrap_or(0),
        })
        .max()
        .unwrap_or(0)
}

/// Walk the best-parent chain starting at `best_parent`, collecting distinct
/// witness authors until `MAJORITY_WITNESSES` of `witnesses` have been seen.
/// Returns the `level` of the unit that sealed the majority, or the chain's
/// own level if genesis is hit first (majority never reached: wl = 0).
pub fn witnessed_level(best_parent: &UnitId, witnesses: &[Address], view: &impl GraphView) -> WitnessedLevel {
    let witness_set: HashSet<&Address> = witnesses.iter().collect();
    let mut seen: HashSet<Address> = HashSet::new();
    let mut cursor = best_parent.clone();

    loop {
        if let Some(authors) = view.author_addresses(&cursor) {
            for addr in authors {
                if witness_set.contains(&addr) {
                    seen.insert(addr);
                }
            }
        }
        if seen.len() >= MAJORITY_WITNESSES {
            return view.level(&cursor).unwrap_or(0);
        }
        match view.best_parent_unit(&cursor) {
            Some(next) => cursor = next,
            None => return 0, // reached genesis without a majority
        }
    }
}

/// `determine_if_included(ancestor, descendants)`: true iff `ancestor` lies
/// on some parent path from every unit in `descendants`. Implemented as a
/// bounded BFS per descendant with a shared visited set so repeated
/// ancestors across descendants are not rescanned (O(n) amortized, not
/// O(n^2) from rescanning shared ancestry per descendant).
pub fn determine_if_included(ancestor: &UnitId, descendants: &[UnitId], view: &impl GraphView) -> bool {
    let mut memo: HashSet<UnitId> = HashSet::new();
    let mut includes_ancestor: HashSet<UnitId> = HashSet::new();
    includes_ancestor.insert(ancestor.clone());

    for start in descendants {
        if includes_ancestor.contains(start) {
            continue;
        }
        let mut queue = VecDeque::new();
        let mut local_visited = HashSet::new();
        queue.push_back(start.clone());
        local_visited.insert(start.clone());
        let mut found = false;

        while let Some(cur) = queue.pop_front() {
            if includes_ancestor.contains(&cur) {
                found = true;
                break;
            }
            if memo.contains(&cur) {
                continue;
            }
            memo.insert(cur.clone());
            if let Some(parents) = view.parent_units(&cur) {
                for p in parents {
                    if local_visited.insert(p.clone()) {
                        queue.push_back(p);
                    }
                }
            }
        }

        if found {
            includes_ancestor.insert(start.clone());
        } else {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeView {
        parents: HashMap<UnitId, Vec<UnitId>>,
        best_parent: HashMap<UnitId, UnitId>,
        levels: HashMap<UnitId, Level>,
        witnessed_levels: HashMap<UnitId, WitnessedLevel>,
        authors: HashMap<UnitId, Vec<Address>>,
        stable: HashMap<UnitId, bool>,
        mci: HashMap<UnitId, Mci>,
        limcis: HashMap<UnitId, Mci>,
    }

    impl GraphView for FakeView {
        fn parent_units(&self, unit: &UnitId) -> Option<Vec<UnitId>> {
            self.parents.get(unit).cloned()
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
        fn limci(&self, unit: &UnitId) -> Option<Mci> {
            self.limcis.get(unit).copied()
        }
        fn main_chain_index(&self, unit: &UnitId) -> Option<Mci> {
            self.mci.get(unit).copied()
        }
        fn is_stable(&self, unit: &UnitId) -> Option<bool> {
            self.stable.get(unit).copied()
        }
        fn author_addresses(&self, unit: &UnitId) -> Option<Vec<Address>> {
            self.authors.get(unit).cloned()
        }
    }

    fn uid(b: u8) -> UnitId {
        UnitId::from_bytes([b; 32])
    }
    fn addr(b: u8) -> Address {
        Address::from_bytes([b; 24])
    }

    #[test]
    fn best_parent_picks_highest_witnessed_level() {
        let mut v = FakeView::default();
        let (a, b) = (uid(1), uid(2));
        v.witnessed_levels.insert(a.clone(), 5);
        v.witnessed_levels.insert(b.clone(), 9);
        v.levels.insert(a.clone(), 5);
        v.levels.insert(b.clone(), 5);
        assert_eq!(determine_best_parent(&[a, b.clone()], &v), Some(b));
    }

    #[test]
    fn best_parent_ties_break_on_smallest_id() {
        let mut v = FakeView::default();
        let (a, b) = (uid(1), uid(2));
        v.witnessed_levels.insert(a.clone(), 5);
        v.witnessed_levels.insert(b.clone(), 5);
        v.levels.insert(a.clone(), 5);
        v.levels.insert(b.clone(), 5);
        assert_eq!(determine_best_parent(&[b, a.clone()], &v), Some(a));
    }

    #[test]
    fn level_is_one_plus_max_parent_level() {
        let mut v = FakeView::default();
        let (a, b) = (uid(1), uid(2));
        v.levels.insert(a.clone(), 3);
        v.levels.insert(b.clone(), 7);
        assert_eq!(level(&[a, b], &v), 8);
        assert_eq!(level(&[], &v), 0);
    }

    #[test]
    fn witnessed_level_stops_at_majority() {
        let mut v = FakeView::default();
        let witnesses: Vec<Address> = (0..12).map(addr).collect();
        // Chain u0 <- u1 <- ... <- u6, each authored by a distinct witness.
        let chain: Vec<UnitId> = (0..7).map(uid).collect();
        for i in 0..chain.len() {
            v.authors.insert(chain[i].clone(), vec![witnesses[i].clone()]);
            v.levels.insert(chain[i].clone(), i as Level);
            if i > 0 {
                v.best_parent.insert(chain[i].clone(), chain[i - 1].clone());
            }
        }
        // MAJORITY_WITNESSES=7, chain has exactly 7 distinct witness authors.
        let wl = witnessed_level(&chain[6], &witnesses, &v);
        assert_eq!(wl, 6);
    }

    #[test]
    fn determine_if_included_true_for_direct_ancestor() {
        let mut v = FakeView::default();
        let (genesis, child, grandchild) = (uid(1), uid(2), uid(3));
        v.parents.insert(child.clone(), vec![genesis.clone()]);
        v.parents.insert(grandchild.clone(), vec![child.clone()]);
        assert!(determine_if_included(&genesis, &[grandchild], &v));
    }

    #[test]
    fn determine_if_included_false_for_unrelated_branch() {
        let mut v = FakeView::default();
        let (genesis, other_root, descendant) = (uid(1), uid(9), uid(3));
        v.parents.insert(descendant.clone(), vec![other_root.clone()]);
        assert!(!determine_if_included(&genesis, &[descendant], &v));
    }
}
