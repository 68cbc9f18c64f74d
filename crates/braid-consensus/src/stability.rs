//! Stability test (§4.6.2): an MC unit becomes stable once no
//! alternative branch off its best parent can ever accumulate enough
//! witnessed level to outrank it.

use std::collections::{HashSet, VecDeque};

use braid_core::types::{Level, UnitId, WitnessedLevel};
use braid_dag::queries::GraphView;
use braid_storage::StorageEngine;

use crate::mc::preferred;

/// Walks forward through the best-children index starting at every
/// best-child of `best_parent` other than `u`, tracking the single most
/// preferred `(witnessed_level, level, id)` triple seen. The "removed best
/// children" frontier is a `HashSet` (membership, not list difference), per
/// spec's complexity requirement.
fn max_alternative_branch(
    u: &UnitId,
    best_parent: &UnitId,
    storage: &StorageEngine,
) -> Result<Option<(WitnessedLevel, Level, UnitId)>, braid_core::error::BraidError> {
    let mut visited: HashSet<UnitId> = HashSet::new();
    let mut frontier: VecDeque<UnitId> = VecDeque::new();
    for child in storage.children_of(best_parent)? {
        if &child != u && visited.insert(child.clone()) {
            frontier.push_back(child);
        }
    }

    let mut best: Option<(WitnessedLevel, Level, UnitId)> = None;
    while let Some(cur) = frontier.pop_front() {
        let wl = storage.witnessed_level(&cur).unwrap_or(0);
        let lvl = storage.level(&cur).unwrap_or(0);
        let candidate = (wl, lvl, cur.clone());
        best = Some(match best {
            None => candidate,
            Some(incumbent) => {
                if preferred(
                    (candidate.0, candidate.1, &candidate.2),
                    (incumbent.0, incumbent.1, &incumbent.2),
                ) == std::cmp::Ordering::Greater
                {
                    candidate
                } else {
                    incumbent
                }
            }
        });
        for child in storage.children_of(&cur)? {
            if visited.insert(child.clone()) {
                frontier.push_back(child);
            }
        }
    }
    Ok(best)
}

/// `true` iff `u` (an MC unit with known `best_parent`) cannot be overtaken
/// by any currently-visible alternative branch.
pub fn is_stable(u: &UnitId, storage: &StorageEngine) -> Result<bool, braid_core::error::BraidError> {
    let Some(best_parent) = storage.best_parent_unit(u) else {
        return Ok(true); // genesis: no alternative branches are possible
    };
    let u_wl = storage.witnessed_level(u).unwrap_or(0);
    let u_level = storage.level(u).unwrap_or(0);

    match max_alternative_branch(u, &best_parent, storage)? {
        None => Ok(true), // no alternative branch exists yet
        Some((alt_wl, alt_level, alt_id)) => {
            let cmp = preferred((alt_wl, alt_level, &alt_id), (u_wl, u_level, u));
            Ok(cmp != std::cmp::Ordering::Greater)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_core::types::{Level, Sequence, Timestamp, WitnessedLevel};
    use braid_dag::{Unit, UnitDerived};
    use braid_storage::StorageEngine;
    use std::sync::Arc;

    fn unit(parents: Vec<UnitId>) -> Unit {
        Unit {
            version: "1.0".into(),
            alt: "1".into(),
            parent_units: parents,
            last_ball_unit: None,
            last_ball: None,
            witness_list_unit: None,
            witnesses: None,
            authors: vec![],
            messages: vec![],
            headers_commission: 0,
            payload_commission: 0,
            timestamp: 0 as Timestamp,
            content_hash: None,
        }
    }

    fn open_engine(name: &str) -> (Arc<StorageEngine>, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("braid_stability_test_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        let db = braid_storage::StateDb::open(&dir).unwrap();
        (Arc::new(StorageEngine::new(Arc::new(db))), dir)
    }

    fn admit(
        storage: &StorageEngine,
        id: UnitId,
        parents: Vec<UnitId>,
        best_parent: Option<UnitId>,
        level: Level,
        wl: WitnessedLevel,
    ) {
        let u = unit(parents.clone());
        let derived = UnitDerived {
            level,
            witnessed_level: wl,
            best_parent_unit: best_parent.clone(),
            limci: 0,
            main_chain_index: None,
            is_on_main_chain: false,
            is_stable: false,
            sequence: Sequence::Good,
        };
        let staged = braid_storage::StagedUnitWrite {
            unit: Some((id.clone(), u, derived)),
            best_child_entries: best_parent.map(|bp| vec![(bp, id.clone())]).unwrap_or_default(),
            ..Default::default()
        };
        storage.commit_staged_write(staged).unwrap();
    }

    fn uid(b: u8) -> UnitId {
        UnitId::from_bytes([b; 32])
    }

    #[test]
    fn stable_when_no_alternative_branch_exists() {
        let (storage, dir) = open_engine("no_alt");
        let genesis = uid(0);
        admit(&storage, genesis.clone(), vec![], None, 0, 0);
        let u = uid(1);
        admit(&storage, u.clone(), vec![genesis.clone()], Some(genesis), 1, 1);

        assert!(is_stable(&u, &storage).unwrap());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn unstable_when_alternative_branch_can_outrank() {
        let (storage, dir) = open_engine("with_alt");
        let genesis = uid(0);
        admit(&storage, genesis.clone(), vec![], None, 0, 0);
        let u = uid(1);
        admit(&storage, u.clone(), vec![genesis.clone()], Some(genesis.clone()), 1, 1);
        let rival = uid(2);
        admit(&storage, rival.clone(), vec![genesis.clone()], Some(genesis), 1, 5);

        assert!(!is_stable(&u, &storage).unwrap());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
