use crate::model::{stores::units::UnitStore, unit::Unit};
use ethereal_consensus_core::{
    config::Params,
    errors::unit::{RuleError, UnitProcessResult},
    hashing,
    unit::{PreUnit, UnitCoord},
    EpochId, Level, ProcId,
};
use ethereal_hashes::{DigestAlgorithm, Hash};
use parking_lot::Mutex;
use std::sync::Arc;

/// Post-insert listener, invoked synchronously under the DAG mutex so that
/// derived state is always consistent with DAG contents. Observers must not
/// call back into the DAG or block; they offer work onto unbounded queues.
pub type DagObserver = Box<dyn Fn(&Arc<Unit>) + Send + Sync>;

/// Upper bound on the fork combinations examined while matching a crown's
/// control hash against coordinates occupied by more than one unit.
const MAX_FORK_COMBINATIONS: usize = 16;

/// The result of a successful [`Dag::add`].
#[derive(Debug)]
pub struct Added {
    pub unit: Arc<Unit>,
    /// Set when this insertion was the first to reveal its creator as forking.
    pub newly_forking: bool,
}

/// The structural store of one epoch's units: resolves parents by
/// (creator, height), enforces the crown/height/quorum invariants, computes
/// level and floor, and reports additions to registered observers.
///
/// A single mutex protects the store; all inserts and observer callbacks run
/// inside it.
pub struct Dag {
    epoch: EpochId,
    n_proc: ProcId,
    quorum: usize,
    algo: DigestAlgorithm,
    store: Mutex<UnitStore>,
    observers: Vec<DagObserver>,
}

impl Dag {
    pub fn new(params: &Params, epoch: EpochId, observers: Vec<DagObserver>) -> Self {
        Self {
            epoch,
            n_proc: params.n_proc,
            quorum: params.quorum(),
            algo: params.digest_algorithm,
            store: Mutex::new(UnitStore::new(epoch, params.n_proc)),
            observers,
        }
    }

    pub fn epoch(&self) -> EpochId {
        self.epoch
    }

    #[inline]
    pub fn is_quorum(&self, k: usize) -> bool {
        k >= self.quorum
    }

    /// Inserts a pre-unit received from a peer: resolves its parents from the
    /// crown, verifies the structural invariants, computes level and floor and
    /// stores the situated result. Units with unknown parents are rejected
    /// with [`RuleError::MissingParents`]; buffering them is the controller's
    /// concern.
    pub fn add(&self, pu: &PreUnit) -> UnitProcessResult<Added> {
        let mut store = self.store.lock();
        self.validate_in_isolation(pu)?;
        if store.contains(&pu.hash) {
            return Err(RuleError::DuplicateUnit(pu.hash));
        }
        let parents = self.resolve_parents(&store, pu)?;
        Self::validate_parent_consistency(&parents)?;
        let unit = Unit::situate(pu.clone(), parents, self.quorum);
        Ok(self.commit(&mut store, unit))
    }

    /// Inserts an already situated unit built by the local creator. Its parent
    /// links are store residents by construction, so no re-resolution happens.
    pub fn add_unit(&self, unit: Arc<Unit>) -> UnitProcessResult<Added> {
        let mut store = self.store.lock();
        if unit.epoch() != self.epoch {
            return Err(RuleError::WrongEpoch(unit.epoch(), self.epoch));
        }
        if store.contains(&unit.hash()) {
            return Err(RuleError::DuplicateUnit(unit.hash()));
        }
        Ok(self.commit(&mut store, unit))
    }

    pub fn unit(&self, hash: &Hash) -> Option<Arc<Unit>> {
        self.store.lock().unit(hash).cloned()
    }

    pub fn units_on(&self, coord: UnitCoord) -> Vec<Arc<Unit>> {
        self.store.lock().units_on(coord).to_vec()
    }

    pub fn max_level(&self) -> Option<Level> {
        self.store.lock().max_level()
    }

    pub fn is_forking(&self, creator: ProcId) -> bool {
        self.store.lock().is_forking(creator)
    }

    /// Runs a closure over the locked store. Used by the orderer to evaluate
    /// timing decisions against a consistent snapshot.
    pub fn read<R>(&self, f: impl FnOnce(&UnitStore) -> R) -> R {
        f(&self.store.lock())
    }

    fn commit(&self, store: &mut UnitStore, unit: Arc<Unit>) -> Added {
        let newly_forking = store.insert(unit.clone());
        for observer in &self.observers {
            observer(&unit);
        }
        Added { unit, newly_forking }
    }

    fn validate_in_isolation(&self, pu: &PreUnit) -> UnitProcessResult<()> {
        if pu.epoch != self.epoch {
            return Err(RuleError::WrongEpoch(pu.epoch, self.epoch));
        }
        if pu.creator >= self.n_proc {
            return Err(RuleError::CreatorOutOfRange(pu.creator, self.n_proc));
        }
        if pu.crown.member_count() != self.n_proc as usize {
            return Err(RuleError::WrongCrownSize(pu.crown.member_count(), self.n_proc as usize));
        }
        let self_height = pu.crown.heights()[pu.creator as usize];
        if self_height != pu.height as i32 - 1 {
            return Err(RuleError::InconsistentCrown(self_height, pu.height));
        }
        if pu.is_dealing() {
            if pu.crown.parent_count() != 0 {
                return Err(RuleError::DealingWithParents);
            }
        } else if pu.crown.parent_count() < self.quorum {
            return Err(RuleError::NotEnoughParents(pu.crown.parent_count(), self.quorum));
        }
        let computed = hashing::unit::hash(self.algo, pu.id(), &pu.crown, &pu.data, &pu.rs_data);
        if computed != pu.hash {
            return Err(RuleError::WrongHash(pu.hash, computed));
        }
        Ok(())
    }

    /// Resolves each committed parent slot by (creator, height). When forks
    /// make a slot ambiguous, the (tiny) cartesian product of candidates is
    /// searched for the combination matching the crown's control hash.
    fn resolve_parents(&self, store: &UnitStore, pu: &PreUnit) -> UnitProcessResult<Vec<Option<Arc<Unit>>>> {
        let mut missing = Vec::new();
        let mut slots: Vec<Option<&[Arc<Unit>]>> = Vec::with_capacity(self.n_proc as usize);
        for creator in 0..self.n_proc {
            match pu.crown.parent_height(creator) {
                None => slots.push(None),
                Some(height) => {
                    let coord = UnitCoord::new(creator, height);
                    let units = store.units_on(coord);
                    if units.is_empty() {
                        missing.push(coord);
                    }
                    slots.push(Some(units));
                }
            }
        }
        if !missing.is_empty() {
            return Err(RuleError::MissingParents(missing));
        }

        let combinations: usize = slots.iter().flatten().map(|units| units.len()).product();
        if combinations <= MAX_FORK_COMBINATIONS {
            let mut indices = vec![0usize; slots.len()];
            loop {
                let control =
                    hashing::crown::combine(self.algo, slots.iter().zip(&indices).map(|(slot, &i)| slot.map(|units| units[i].hash())));
                if control == pu.crown.control_hash() {
                    return Ok(slots.iter().zip(&indices).map(|(slot, &i)| slot.map(|units| units[i].clone())).collect());
                }
                // Advance the mixed-radix combination counter.
                let mut pos = 0;
                loop {
                    if pos == slots.len() {
                        return Err(RuleError::UnknownControlHash(pu.crown.control_hash()));
                    }
                    if let Some(units) = slots[pos] {
                        indices[pos] += 1;
                        if indices[pos] < units.len() {
                            break;
                        }
                        indices[pos] = 0;
                    }
                    pos += 1;
                }
            }
        }
        Err(RuleError::UnknownControlHash(pu.crown.control_hash()))
    }

    /// Invariant: `parents[i].level ≥ parents[j].parents[i].level` whenever
    /// both sides exist.
    fn validate_parent_consistency(parents: &[Option<Arc<Unit>>]) -> UnitProcessResult<()> {
        for via in parents.iter().flatten() {
            for (i, slot) in parents.iter().enumerate() {
                let (Some(indirect), Some(direct)) = (via.parent(i as ProcId), slot.as_ref()) else {
                    continue;
                };
                if direct.level() < indirect.level() {
                    return Err(RuleError::InconsistentParents(via.hash(), i as ProcId));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethereal_consensus_core::crown::Crown;

    fn params(n_proc: ProcId) -> Params {
        Params::new(n_proc, 0)
    }

    fn dealing_preunit(creator: ProcId, n_proc: ProcId, algo: DigestAlgorithm) -> PreUnit {
        PreUnit::new(creator, 0, 0, Crown::empty(n_proc, algo), vec![], vec![], algo).unwrap()
    }

    #[test]
    fn test_add_resolves_parents_and_levels() {
        let params = params(4);
        let algo = params.digest_algorithm;
        let dag = Dag::new(&params, 0, vec![]);

        let dealings: Vec<_> =
            (0..4).map(|c| dag.add(&dealing_preunit(c, 4, algo)).unwrap().unit).collect();
        assert_eq!(dag.max_level(), Some(0));

        let parents: Vec<_> = dealings.iter().cloned().map(Some).collect();
        let child = Unit::new_free(0, 0, parents, vec![], vec![], algo, params.quorum()).unwrap();

        // Re-add through the peer path: the crown alone must resolve the parents.
        let added = dag.add(&child.to_preunit()).unwrap();
        assert_eq!(added.unit.level(), 1);
        assert_eq!(added.unit.parent(3).unwrap().hash(), dealings[3].hash());
        assert!(!added.newly_forking);
        assert_eq!(dag.max_level(), Some(1));

        assert_eq!(dag.add(&child.to_preunit()).unwrap_err(), RuleError::DuplicateUnit(child.hash()));
    }

    #[test]
    fn test_missing_parents_are_reported_not_buffered() {
        let params = params(4);
        let algo = params.digest_algorithm;
        let dag = Dag::new(&params, 0, vec![]);

        let dealings: Vec<_> = (0..4).map(|c| dealing_preunit(c, 4, algo)).collect();
        let units: Vec<_> =
            dealings.iter().map(|pu| Unit::situate(pu.clone(), vec![None; 4], params.quorum())).collect();
        let child =
            Unit::new_free(1, 0, units.into_iter().map(Some).collect(), vec![], vec![], algo, params.quorum()).unwrap();

        // Only creator 1's dealing unit is known; the rest are missing.
        dag.add(&dealings[1]).unwrap();
        let err = dag.add(&child.to_preunit()).unwrap_err();
        let expected: Vec<_> = [0u16, 2, 3].into_iter().map(|c| UnitCoord::new(c, 0)).collect();
        assert_eq!(err, RuleError::MissingParents(expected));

        // After the parents arrive the same pre-unit is accepted.
        for pu in [&dealings[0], &dealings[2], &dealings[3]] {
            dag.add(pu).unwrap();
        }
        assert_eq!(dag.add(&child.to_preunit()).unwrap().unit.level(), 1);
    }

    #[test]
    fn test_fork_is_accepted_and_flagged() {
        let params = params(4);
        let algo = params.digest_algorithm;
        let dag = Dag::new(&params, 0, vec![]);

        dag.add(&dealing_preunit(2, 4, algo)).unwrap();
        let fork = PreUnit::new(2, 0, 0, Crown::empty(4, algo), b"forked".to_vec(), vec![], algo).unwrap();
        let added = dag.add(&fork).unwrap();
        assert!(added.newly_forking);
        assert!(dag.is_forking(2));
        assert_eq!(dag.units_on(UnitCoord::new(2, 0)).len(), 2);
    }

    #[test]
    fn test_structural_rejects() {
        let params = params(4);
        let algo = params.digest_algorithm;
        let dag = Dag::new(&params, 0, vec![]);

        // Wrong epoch.
        let wrong_epoch = PreUnit::new(0, 1, 0, Crown::empty(4, algo), vec![], vec![], algo).unwrap();
        assert_eq!(dag.add(&wrong_epoch).unwrap_err(), RuleError::WrongEpoch(1, 0));

        // Crown sized for a different committee.
        let wrong_size = PreUnit::new(0, 0, 0, Crown::empty(5, algo), vec![], vec![], algo).unwrap();
        assert_eq!(dag.add(&wrong_size).unwrap_err(), RuleError::WrongCrownSize(5, 4));

        // Tampered payload no longer matches the declared hash.
        let mut tampered = dealing_preunit(0, 4, algo);
        tampered.data = b"tampered".to_vec();
        assert!(matches!(dag.add(&tampered).unwrap_err(), RuleError::WrongHash(..)));
    }

    #[test]
    fn test_observers_fire_under_insert() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let params = params(4);
        let algo = params.digest_algorithm;
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let dag = Dag::new(&params, 0, vec![Box::new(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        })]);

        dag.add(&dealing_preunit(0, 4, algo)).unwrap();
        dag.add(&dealing_preunit(1, 4, algo)).unwrap();
        assert_eq!(seen.load(Ordering::Relaxed), 2);
    }
}
