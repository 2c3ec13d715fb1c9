use crate::model::unit::Unit;
use ethereal_consensus_core::{
    api::{DataSource, EpochProof, EpochProofFactory, RandomSource},
    config::Params,
    errors::unit::UnitProcessResult,
    EpochId, Level, ProcId,
};
use crossbeam_channel::Receiver;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::Arc;

/// Assembles this process's own units from the current parent candidates and
/// the data source, and drives the epoch lifecycle: finishing units carry
/// threshold shares, a completed proof advances the epoch, and a verified
/// next-epoch dealing unit makes the creator follow.
///
/// The creator is a pure state machine owned by its processor thread; units it
/// returns are emitted by the caller (outbound callback plus self-insertion).
pub struct Creator {
    params: Params,
    data_source: Box<dyn DataSource>,
    random_source: Arc<dyn RandomSource>,
    proof_factory: EpochProofFactory,
    proof: Box<dyn EpochProof>,
    /// Decided timing units, fed by the orderer and drained while building
    /// finishing units.
    timing_rx: Receiver<Arc<Unit>>,
    /// Timing units drained from the channel but not consumed yet. Entries of
    /// a future epoch wait here until the creator follows, so that the first
    /// timing unit of every epoch is the same on every process.
    stashed_timings: VecDeque<Arc<Unit>>,

    /// Best known parent per creator.
    candidates: Vec<Option<Arc<Unit>>>,
    /// Target level for the next local unit, maintained by `recompute_level`.
    level: Level,
    /// Creators excluded forever after a fork was detected.
    frozen: Vec<bool>,
    epoch: EpochId,
    epoch_done: bool,
    share_built: bool,
    first_timing: Option<Arc<Unit>>,
    /// Set once the final configured epoch is sealed; the creator then ignores
    /// all further input.
    done: bool,
}

impl Creator {
    pub fn new(
        params: Params,
        data_source: Box<dyn DataSource>,
        random_source: Arc<dyn RandomSource>,
        proof_factory: EpochProofFactory,
        timing_rx: Receiver<Arc<Unit>>,
    ) -> Self {
        let n_proc = params.n_proc as usize;
        let proof = (proof_factory)(0);
        Self {
            params,
            data_source,
            random_source,
            proof_factory,
            proof,
            timing_rx,
            stashed_timings: VecDeque::new(),
            candidates: vec![None; n_proc],
            level: 0,
            frozen: vec![false; n_proc],
            epoch: 0,
            epoch_done: false,
            share_built: false,
            first_timing: None,
            done: false,
        }
    }

    pub fn epoch(&self) -> EpochId {
        self.epoch
    }

    /// Seeds the creator with its own epoch-0 dealing unit. Must run before
    /// the belt is consumed: the parent-selection path relies on the own
    /// candidate being present.
    pub fn bootstrap(&mut self) -> Vec<Arc<Unit>> {
        self.new_epoch(0, Vec::new())
    }

    /// Permanently excludes a forking creator from the parent candidates. Its
    /// units remain in the DAG for ordering purposes.
    pub fn freeze(&mut self, creator: ProcId) {
        let slot = creator as usize;
        if self.frozen[slot] {
            return;
        }
        warn!("creator {}: freezing forking creator {}", self.params.pid, creator);
        self.frozen[slot] = true;
        self.candidates[slot] = None;
        self.recompute_level();
    }

    /// Consumes one unit from the belt: bookkeeping and epoch switching only.
    /// Returns local units created by an epoch switch (the new dealing unit).
    /// Callers run [`Creator::create_ready`] once the available belt batch has
    /// been absorbed, so that a batch of peers' units yields one unit over the
    /// widest parent set rather than a cascade of narrower ones.
    pub fn absorb(&mut self, u: &Arc<Unit>) -> Vec<Arc<Unit>> {
        if self.done || u.epoch() < self.epoch || self.frozen[u.creator() as usize] {
            return Vec::new();
        }

        if u.epoch() > self.epoch {
            // Only the direct successor epoch can be opened, by a dealing unit
            // whose data is a valid seal of the current epoch.
            if u.epoch() != self.epoch + 1 || u.epoch() >= self.params.number_of_epochs || !self.proof.verify(u.data()) {
                debug!("creator {}: dropping unverified unit {} of epoch {}", self.params.pid, u, u.epoch());
                return Vec::new();
            }
            let created = self.new_epoch(u.epoch(), u.data().to_vec());
            self.update_candidates(u);
            return created;
        }

        // Finishing units of the current epoch carry threshold shares; a
        // completed proof advances the epoch with the seal as dealing data.
        if u.level() > self.params.last_level && !u.is_dealing() {
            if let Some(seal) = self.proof.try_building(u.creator(), u.data()) {
                if self.epoch + 1 < self.params.number_of_epochs {
                    return self.new_epoch(self.epoch + 1, seal);
                }
                info!("creator {}: final epoch {} sealed", self.params.pid, self.epoch);
                self.done = true;
                return Vec::new();
            }
        }

        self.update_candidates(u);
        Vec::new()
    }

    /// Absorbs one unit and immediately creates whatever became ready.
    pub fn update(&mut self, u: &Arc<Unit>) -> Vec<Arc<Unit>> {
        let mut created = self.absorb(u);
        created.extend(self.create_ready());
        created
    }

    fn new_epoch(&mut self, epoch: EpochId, data: Vec<u8>) -> Vec<Arc<Unit>> {
        debug_assert!(epoch < self.params.number_of_epochs);
        info!("creator {}: entering epoch {}", self.params.pid, epoch);
        self.epoch = epoch;
        self.proof = (self.proof_factory)(epoch);
        self.epoch_done = false;
        self.share_built = false;
        self.first_timing = None;
        self.candidates.fill(None);
        self.level = 0;

        let mut created = Vec::new();
        let rs_data = self.random_source.data_to_include(self.params.pid, 0);
        let parents = vec![None; self.params.n_proc as usize];
        match Unit::new_free(self.params.pid, epoch, parents, data, rs_data, self.params.digest_algorithm, self.params.quorum()) {
            Ok(dealing) => {
                self.update_candidates(&dealing);
                created.push(dealing);
            }
            Err(e) => warn!("creator {}: dealing unit creation failed: {}", self.params.pid, e),
        }
        created
    }

    fn update_candidates(&mut self, u: &Arc<Unit>) {
        debug_assert_eq!(u.epoch(), self.epoch);
        let slot = u.creator() as usize;
        if self.frozen[slot] {
            return;
        }
        if self.candidates[slot].as_ref().is_none_or(|cur| u.level() > cur.level()) {
            self.candidates[slot] = Some(u.clone());
            self.recompute_level();
        }
    }

    fn recompute_level(&mut self) {
        let Some(max_lvl) = self.candidates.iter().flatten().map(|u| u.level()).max() else {
            self.level = 0;
            return;
        };
        let on_max_lvl = self.candidates.iter().flatten().filter(|u| u.level() == max_lvl).count();
        self.level = if self.params.is_quorum(on_max_lvl) { max_lvl + 1 } else { max_lvl };
    }

    /// The creator produces whenever the target level is above its own top
    /// unit, the epoch is still open, and the finishing margin (within which
    /// every timing decision resolves) has not been exhausted.
    fn ready(&self) -> bool {
        !self.epoch_done
            && self.candidates[self.params.pid as usize].as_ref().is_some_and(|own| self.level > own.level())
            && self.level <= self.params.last_level + self.params.popularity_cap
    }

    /// Builds and returns new local units while the target level sits above
    /// this process's own top unit.
    pub fn create_ready(&mut self) -> Vec<Arc<Unit>> {
        let mut created = Vec::new();
        while self.ready() {
            let own_before = self.own_top_hash();
            match self.create_unit() {
                Ok(unit) => {
                    if self.own_top_hash() == own_before {
                        // The parent walk did not reach the target level, so the
                        // unit would fork its own chain; discard and wait for
                        // better candidates.
                        warn!("creator {}: discarding unit {} below the target level {}", self.params.pid, unit, self.level);
                        break;
                    }
                    created.push(unit);
                }
                Err(e) => {
                    warn!("creator {}: unit creation failed: {}", self.params.pid, e);
                    break;
                }
            }
        }
        created
    }

    fn own_top_hash(&self) -> Option<ethereal_hashes::Hash> {
        self.candidates[self.params.pid as usize].as_ref().map(|u| u.hash())
    }

    fn create_unit(&mut self) -> UnitProcessResult<Arc<Unit>> {
        let parents = self.build_parents();
        let data = self.select_data(self.level);
        let rs_data = self.random_source.data_to_include(self.params.pid, self.level);
        let unit =
            Unit::new_free(self.params.pid, self.epoch, parents, data, rs_data, self.params.digest_algorithm, self.params.quorum())?;
        self.update_candidates(&unit);
        Ok(unit)
    }

    /// Parent selection: either the candidates as they stand, or, when level
    /// skipping is disabled, their ancestors right below the target level. The
    /// make-consistent rule is applied either way.
    fn build_parents(&self) -> Vec<Option<Arc<Unit>>> {
        let mut parents = if self.params.can_skip_level {
            self.candidates.clone()
        } else {
            let own = self.candidates[self.params.pid as usize]
                .as_ref()
                .expect("the creator is seeded with its own dealing unit before the belt opens");
            let target = own.level() + 1;
            self.candidates
                .iter()
                .map(|slot| {
                    slot.as_ref().and_then(|candidate| {
                        let mut walk = candidate;
                        while walk.level() >= target {
                            walk = walk.predecessor()?;
                        }
                        Some(walk.clone())
                    })
                })
                .collect()
        };
        Self::make_consistent(&mut parents);
        parents
    }

    /// Parent consistency: raise `parents[i]` to the maximum of `parents[i]`
    /// and `parents[j].parents[i]` for every j.
    fn make_consistent(parents: &mut [Option<Arc<Unit>>]) {
        let n_proc = parents.len();
        for i in 0..n_proc {
            for j in 0..n_proc {
                let Some(via) = parents[j].clone() else {
                    continue;
                };
                let Some(lifted) = via.parent(i as ProcId) else {
                    continue;
                };
                if parents[i].as_ref().is_none_or(|cur| cur.level() < lifted.level()) {
                    parents[i] = Some(lifted.clone());
                }
            }
        }
    }

    /// Data selection: levels up to `last_level` fetch one item from the data
    /// source; finishing units above it drain the timing queue and carry this
    /// process's threshold share once the first timing unit of the epoch is
    /// known (empty data in the final epoch, which nothing needs to prove).
    fn select_data(&mut self, level: Level) -> Vec<u8> {
        if level <= self.params.last_level {
            return self.data_source.get_data().unwrap_or_default();
        }

        self.stashed_timings.extend(self.timing_rx.try_iter());
        while let Some(timing) = self.stashed_timings.front() {
            if timing.epoch() > self.epoch {
                // The channel is ordered by (epoch, level); everything behind
                // this entry belongs to the future as well.
                break;
            }
            let timing = self.stashed_timings.pop_front().expect("the front entry was just peeked");
            if timing.epoch() < self.epoch {
                continue;
            }
            if self.first_timing.is_none() {
                self.first_timing = Some(timing.clone());
            }
            if timing.level() >= self.params.last_level {
                // The epoch is fully ordered; nothing is left to vote for.
                self.epoch_done = true;
            }
        }

        if self.epoch + 1 >= self.params.number_of_epochs {
            return Vec::new();
        }
        if !self.share_built {
            if let Some(timing) = self.first_timing.clone() {
                self.share_built = true;
                return self.proof.build_share(timing.hash());
            }
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processes::epoch_proof::deterministic_proof_factory;
    use crate::processes::random_source::DeterministicRandomSource;
    use crossbeam_channel::{unbounded, Sender};

    struct NoData;

    impl DataSource for NoData {
        fn get_data(&mut self) -> Option<Vec<u8>> {
            None
        }
    }

    fn test_creator(n_proc: ProcId, pid: ProcId) -> (Creator, Sender<Arc<Unit>>) {
        let params = Params::new(n_proc, pid);
        let (timing_tx, timing_rx) = unbounded();
        let creator = Creator::new(
            params.clone(),
            Box::new(NoData),
            Arc::new(DeterministicRandomSource::new(params.digest_algorithm)),
            deterministic_proof_factory(pid, params.quorum(), params.digest_algorithm),
            timing_rx,
        );
        (creator, timing_tx)
    }

    fn foreign_dealing(creator: ProcId, n_proc: ProcId, quorum: usize) -> Arc<Unit> {
        Unit::new_free(creator, 0, vec![None; n_proc as usize], vec![], vec![], Default::default(), quorum).unwrap()
    }

    #[test]
    fn test_single_level_handoff() {
        let (mut creator, _timing_tx) = test_creator(4, 0);

        let bootstrap = creator.bootstrap();
        assert_eq!(bootstrap.len(), 1);
        let own_dealing = &bootstrap[0];
        assert_eq!((own_dealing.creator(), own_dealing.epoch(), own_dealing.height()), (0, 0, 0));

        // One belt batch with the three foreign dealing units. A single
        // absorbed dealing is below the quorum of 3 and creates nothing.
        assert!(creator.absorb(&foreign_dealing(1, 4, 3)).is_empty());
        assert!(creator.create_ready().is_empty());
        creator.absorb(&foreign_dealing(2, 4, 3));
        creator.absorb(&foreign_dealing(3, 4, 3));

        // A quorum of level-0 dealing units including our own is now present,
        // so a height-1 unit referencing all four dealings appears.
        let created = creator.create_ready();
        assert_eq!(created.len(), 1);
        let unit = &created[0];
        assert_eq!((unit.creator(), unit.epoch(), unit.height(), unit.level()), (0, 0, 1, 1));
        assert_eq!(unit.parents().iter().flatten().count(), 4);
        assert_eq!(unit.predecessor().unwrap().hash(), own_dealing.hash());
    }

    #[test]
    fn test_frozen_creators_are_never_candidates() {
        let (mut creator, _timing_tx) = test_creator(4, 0);
        creator.bootstrap();
        creator.freeze(1);

        assert!(creator.update(&foreign_dealing(1, 4, 3)).is_empty());
        assert!(creator.update(&foreign_dealing(2, 4, 3)).is_empty());
        // Without creator 1 only three dealings exist; the quorum still forms
        // from creators {0, 2, 3} and the new unit must not reference 1.
        let created = creator.update(&foreign_dealing(3, 4, 3));
        assert_eq!(created.len(), 1);
        assert!(created[0].parent(1).is_none());
        assert_eq!(created[0].parents().iter().flatten().count(), 3);
    }

    #[test]
    fn test_no_skip_parent_walk_stays_one_level_up() {
        let quorum = 3;
        let (mut creator, _timing_tx) = {
            let params = {
                let mut p = Params::new(4, 0);
                p.can_skip_level = false;
                p
            };
            let (tx, rx) = unbounded();
            (
                Creator::new(
                    params.clone(),
                    Box::new(NoData),
                    Arc::new(DeterministicRandomSource::new(params.digest_algorithm)),
                    deterministic_proof_factory(0, quorum, params.digest_algorithm),
                    rx,
                ),
                tx,
            )
        };

        creator.bootstrap();
        let dealings: Vec<_> = (1..4).map(|c| foreign_dealing(c, 4, quorum)).collect();
        for unit in &dealings {
            creator.absorb(unit);
        }
        let created = creator.create_ready();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].level(), 1);

        // Feed level-1 foreign units; the next own unit must reference parents
        // of level exactly 1 even though level skipping is off.
        for c in 1..4u16 {
            let parents: Vec<_> = std::iter::once(None).chain(dealings.iter().cloned().map(Some)).collect();
            let unit = Unit::new_free(c, 0, parents, vec![], vec![], Default::default(), quorum).unwrap();
            assert_eq!(unit.level(), 1);
            creator.absorb(&unit);
        }
        let created = creator.create_ready();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].level(), 2);
        for parent in created[0].parents().iter().flatten() {
            assert!(parent.level() <= 1);
        }
    }
}
