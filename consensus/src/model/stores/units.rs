use crate::model::unit::Unit;
use ethereal_consensus_core::{unit::UnitCoord, EpochId, Level, ProcId, UnitHashMap};
use ethereal_hashes::Hash;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::Arc;

/// Append-only in-memory store of the situated units of one epoch.
///
/// Forks are retained so that the views of different processes converge: more
/// than one unit may occupy the same (creator, height) coordinates, and the
/// creator is flagged as forking once that happens. Units are never evicted
/// during the epoch's lifetime.
pub struct UnitStore {
    epoch: EpochId,
    by_hash: UnitHashMap<Arc<Unit>>,
    by_coord: HashMap<UnitCoord, SmallVec<[Arc<Unit>; 1]>>,
    by_level: Vec<Vec<Arc<Unit>>>,
    arena: Vec<Arc<Unit>>,
    forking: Vec<bool>,
}

impl UnitStore {
    pub fn new(epoch: EpochId, n_proc: ProcId) -> Self {
        Self {
            epoch,
            by_hash: UnitHashMap::default(),
            by_coord: HashMap::new(),
            by_level: Vec::new(),
            arena: Vec::new(),
            forking: vec![false; n_proc as usize],
        }
    }

    pub fn epoch(&self) -> EpochId {
        self.epoch
    }

    /// Inserts a situated unit. Returns true when this insertion newly marks
    /// the unit's creator as forking.
    pub fn insert(&mut self, unit: Arc<Unit>) -> bool {
        debug_assert_eq!(unit.epoch(), self.epoch);
        self.by_hash.insert(unit.hash(), unit.clone());

        let slot = self.by_coord.entry(unit.coord()).or_default();
        let fork = !slot.is_empty();
        slot.push(unit.clone());

        let level = unit.level() as usize;
        if self.by_level.len() <= level {
            self.by_level.resize_with(level + 1, Vec::new);
        }
        self.by_level[level].push(unit.clone());
        self.arena.push(unit.clone());

        let creator = unit.creator() as usize;
        let newly_forking = fork && !self.forking[creator];
        if newly_forking {
            self.forking[creator] = true;
        }
        newly_forking
    }

    pub fn unit(&self, hash: &Hash) -> Option<&Arc<Unit>> {
        self.by_hash.get(hash)
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.by_hash.contains_key(hash)
    }

    /// All units at the given coordinates; a set because forks are permitted.
    pub fn units_on(&self, coord: UnitCoord) -> &[Arc<Unit>] {
        self.by_coord.get(&coord).map_or(&[], |slot| slot.as_slice())
    }

    pub fn on_level(&self, level: Level) -> &[Arc<Unit>] {
        self.by_level.get(level as usize).map_or(&[], |units| units.as_slice())
    }

    pub fn max_level(&self) -> Option<Level> {
        self.by_level.len().checked_sub(1).map(|level| level as Level)
    }

    pub fn is_forking(&self, creator: ProcId) -> bool {
        self.forking[creator as usize]
    }

    /// All units in insertion order.
    pub fn units(&self) -> &[Arc<Unit>] {
        &self.arena
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }
}
