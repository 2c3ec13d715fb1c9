use crate::model::{stores::units::UnitStore, unit::Unit};
use crate::processes::dag::Dag;
use ethereal_consensus_core::{api::RandomSource, config::Params, preblock::PreBlock, EpochId, Level, ProcId, UnitHashSet};
use ethereal_hashes::{DigestAlgorithm, Hash, HasherBase};
use itertools::Itertools;
use log::{debug, trace};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Decision {
    Popular,
    Unpopular,
    Undecided,
}

/// One committed ordering round: the timing unit selected for a level and the
/// pre-block flattened from its past.
pub struct OrderedRound {
    pub level: Level,
    pub timing: Arc<Unit>,
    pub preblock: PreBlock,
}

/// The linear orderer of one epoch: selects a timing unit per level through
/// the deterministic popularity vote and flattens consecutive timing pasts
/// into pre-blocks. Levels `0..=last_level` produce pre-blocks; the finishing
/// levels above only vote.
///
/// Decisions are functions of DAG content alone and are stable under DAG
/// extension, which is what makes the committed prefix identical across
/// correct processes regardless of delivery order.
pub struct Extender {
    epoch: EpochId,
    n_proc: ProcId,
    quorum: usize,
    vote_delay: Level,
    popularity_cap: Level,
    last_level: Level,
    algo: DigestAlgorithm,
    random_source: Arc<dyn RandomSource>,
    dag: Arc<Dag>,

    /// Next level awaiting a timing decision.
    next_level: Level,
    last_timing: Option<Arc<Unit>>,
    /// Units already flattened into an emitted pre-block.
    committed: UnitHashSet,
    /// Memoized virtual votes for the level currently under decision, keyed
    /// by (voter, candidate creator). Votes only depend on the voter's past,
    /// so cached entries stay valid as the DAG grows.
    votes: HashMap<(Hash, ProcId), bool>,
    finished: bool,
}

impl Extender {
    pub fn new(params: &Params, epoch: EpochId, dag: Arc<Dag>, random_source: Arc<dyn RandomSource>) -> Self {
        Self {
            epoch,
            n_proc: params.n_proc,
            quorum: params.quorum(),
            vote_delay: params.vote_delay,
            popularity_cap: params.popularity_cap,
            last_level: params.last_level,
            algo: params.digest_algorithm,
            random_source,
            dag,
            next_level: 0,
            last_timing: None,
            committed: UnitHashSet::default(),
            votes: HashMap::new(),
            finished: false,
        }
    }

    pub fn epoch(&self) -> EpochId {
        self.epoch
    }

    /// Whether every level up to `last_level` has been committed.
    pub fn finished(&self) -> bool {
        self.finished
    }

    /// Attempts timing decisions for the next undecided levels against the
    /// current DAG. Returns the rounds that became final, in level order.
    pub fn advance(&mut self) -> Vec<OrderedRound> {
        let mut out = Vec::new();
        while !self.finished {
            let Some(round) = self.try_next_round() else {
                break;
            };
            out.push(round);
        }
        out
    }

    fn try_next_round(&mut self) -> Option<OrderedRound> {
        let level = self.next_level;
        let dag = self.dag.clone();
        let (timing, preblock) = dag.read(|store| {
            let timing = self.decide_timing(store, level)?;
            let preblock = self.flatten(&timing, level);
            Some((timing, preblock))
        })?;

        debug!("epoch {}: timing unit {} committed for level {}", self.epoch, timing, level);
        self.votes.clear();
        self.last_timing = Some(timing.clone());
        self.next_level += 1;
        if level >= self.last_level {
            self.finished = true;
        }
        Some(OrderedRound { level, timing, preblock })
    }

    /// Candidate creators are iterated in the permutation derived from the
    /// level's random-source output; an undecided candidate is never skipped,
    /// so every process resolves the same winner.
    fn decide_timing(&mut self, store: &UnitStore, level: Level) -> Option<Arc<Unit>> {
        let max_level = store.max_level()?;
        if max_level < level + self.vote_delay {
            return None;
        }
        let seed = self.crp_seed(level);
        let creators: Vec<ProcId> =
            (0..self.n_proc).sorted_by_key(|c| self.permuted(&seed, &c.to_le_bytes())).collect();
        let capped = max_level >= level + self.popularity_cap;

        for &c in &creators {
            match self.decide_creator(store, c, level) {
                Decision::Popular => match self.timing_unit_of(store, c, level) {
                    Some(unit) => return Some(unit),
                    None => {
                        // A popular decision is grounded in initial votes, so the
                        // unit must be present; treat the impossible as "wait".
                        debug!("epoch {}: popular candidate of creator {} at level {} not found", self.epoch, c, level);
                        return None;
                    }
                },
                Decision::Unpopular => continue,
                Decision::Undecided if capped => {
                    // Past the cap the permutation alone decides.
                    if let Some(unit) = self.timing_unit_of(store, c, level) {
                        trace!("epoch {}: cap fallback picks creator {} for level {}", self.epoch, c, level);
                        return Some(unit);
                    }
                }
                Decision::Undecided => return None,
            }
        }
        if capped {
            // Every candidate was decided unpopular; the permutation decides
            // among whatever exists at this level.
            return creators.iter().find_map(|&c| self.timing_unit_of(store, c, level));
        }
        None
    }

    fn decide_creator(&mut self, store: &UnitStore, c: ProcId, level: Level) -> Decision {
        let voting_level = level + self.vote_delay;

        // The direct popularity test: a quorum of distinct creators at the
        // voting level carrying the candidate in their past. Monotone, so a
        // positive outcome is never revoked by further units.
        let supporters =
            store.on_level(voting_level).iter().filter(|v| self.vote(v, c, level)).map(|v| v.creator()).unique().count();
        if supporters >= self.quorum {
            return Decision::Popular;
        }

        // Virtual voting on the higher levels: a unit whose parents reach a
        // quorum on the round's common vote decides it.
        let Some(max_level) = store.max_level() else {
            return Decision::Undecided;
        };
        for lv in (voting_level + 1)..=max_level.min(level + self.popularity_cap) {
            let cv = self.common_vote(lv - level);
            for v in store.on_level(lv) {
                let agreeing = v
                    .parents()
                    .iter()
                    .flatten()
                    .filter(|p| p.level() >= voting_level)
                    .filter(|p| self.vote(p, c, level) == cv)
                    .count();
                if agreeing >= self.quorum {
                    return if cv { Decision::Popular } else { Decision::Unpopular };
                }
            }
        }
        Decision::Undecided
    }

    /// The virtual vote of `v` on the candidate slot (c, level). At relative
    /// round `vote_delay` the vote is the direct past check; above it the vote
    /// follows unanimous parents and falls back to the common vote.
    fn vote(&mut self, v: &Arc<Unit>, c: ProcId, level: Level) -> bool {
        if let Some(&cached) = self.votes.get(&(v.hash(), c)) {
            return cached;
        }
        let r = v.level() - level;
        let vote = if r <= self.vote_delay {
            v.floor(c).iter().any(|w| w.ancestor_at_level(level).is_some())
        } else {
            let voting_level = level + self.vote_delay;
            let mut any = false;
            let mut all_true = true;
            let mut all_false = true;
            for p in v.parents().iter().flatten().filter(|p| p.level() >= voting_level) {
                any = true;
                if self.vote(p, c, level) {
                    all_false = false;
                } else {
                    all_true = false;
                }
            }
            match (any, all_true, all_false) {
                (false, _, _) => self.common_vote(r),
                (true, true, _) => true,
                (true, _, true) => false,
                _ => self.common_vote(r),
            }
        };
        self.votes.insert((v.hash(), c), vote);
        vote
    }

    /// The deterministic common vote: `true` right above the voting round,
    /// `false` on the next round, then alternating. Both values recur, so one
    /// of them eventually coincides with an existing quorum.
    fn common_vote(&self, r: Level) -> bool {
        if r == self.vote_delay + 1 {
            true
        } else if r == self.vote_delay + 2 {
            false
        } else {
            r % 2 == 1
        }
    }

    /// The canonical unit representing creator `c` at `level`: the lowest by
    /// height (every other one descends from it on the creator's chain), with
    /// the hash breaking ties among fork branches.
    fn timing_unit_of(&self, store: &UnitStore, c: ProcId, level: Level) -> Option<Arc<Unit>> {
        store.on_level(level).iter().filter(|u| u.creator() == c).min_by_key(|u| (u.height(), u.hash())).cloned()
    }

    /// Δ = past(timing) minus everything already committed, partitioned by
    /// level and sorted by (permuted creator id, unit hash) within each level.
    /// Payload bytes come from non-dealing units at data-carrying levels;
    /// dealing units, finishing units and empty payloads contribute structure
    /// only, but their hashes still feed the random bytes.
    fn flatten(&mut self, timing: &Arc<Unit>, level: Level) -> PreBlock {
        let mut delta: Vec<Arc<Unit>> = Vec::new();
        let mut seen = UnitHashSet::default();
        let mut stack = vec![timing.clone()];
        while let Some(u) = stack.pop() {
            if self.committed.contains(&u.hash()) || !seen.insert(u.hash()) {
                continue;
            }
            stack.extend(u.parents().iter().flatten().cloned());
            delta.push(u);
        }

        let seed: Vec<Hash> = delta.iter().filter(|u| u.level() == level).map(|u| u.hash()).sorted().collect();
        let random_bytes = self.random_source.random_bytes(self.epoch, level, &seed);

        let creator_keys: Vec<Hash> =
            (0..self.n_proc).map(|c| self.permuted(&random_bytes, &c.to_le_bytes())).collect();
        delta.sort_by(|a, b| {
            (a.level(), &creator_keys[a.creator() as usize], a.hash())
                .cmp(&(b.level(), &creator_keys[b.creator() as usize], b.hash()))
        });

        for u in &delta {
            self.committed.insert(u.hash());
        }
        let data = delta
            .iter()
            .filter(|u| !u.is_dealing() && u.level() <= self.last_level && !u.data().is_empty())
            .map(|u| u.data().to_vec())
            .collect();
        PreBlock { data, random_bytes }
    }

    fn crp_seed(&self, level: Level) -> [u8; 32] {
        let seed: Vec<Hash> = self.last_timing.iter().map(|t| t.hash()).collect();
        self.random_source.random_bytes(self.epoch, level, &seed)
    }

    fn permuted(&self, seed: &[u8; 32], payload: &[u8]) -> Hash {
        let mut hasher = self.algo.permutation_hasher();
        hasher.update(seed).update(payload);
        hasher.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processes::random_source::DeterministicRandomSource;
    use ethereal_consensus_core::unit::PreUnit;
    use ethereal_consensus_core::crown::Crown;

    fn dense_dag(params: &Params, levels: Level, payloads: bool) -> Arc<Dag> {
        let n = params.n_proc;
        let algo = params.digest_algorithm;
        let dag = Arc::new(Dag::new(params, 0, vec![]));
        let mut tops: Vec<Arc<Unit>> = (0..n)
            .map(|c| {
                let pu = PreUnit::new(c, 0, 0, Crown::empty(n, algo), vec![], vec![], algo).unwrap();
                dag.add(&pu).unwrap().unit
            })
            .collect();
        for height in 1..=levels {
            tops = (0..n)
                .map(|c| {
                    let parents: Vec<_> = tops.iter().cloned().map(Some).collect();
                    let data = if payloads { format!("{}:{}", c, height).into_bytes() } else { vec![] };
                    let unit = Unit::new_free(c, 0, parents, data, vec![], algo, params.quorum()).unwrap();
                    dag.add(&unit.to_preunit()).unwrap().unit
                })
                .collect();
        }
        dag
    }

    fn params_for_test() -> Params {
        let mut params = Params::new(4, 0);
        params.last_level = 2;
        params
    }

    #[test]
    fn test_dense_dag_orders_every_level() {
        let params = params_for_test();
        let rs = Arc::new(DeterministicRandomSource::new(params.digest_algorithm));
        let dag = dense_dag(&params, 4, true);
        let mut extender = Extender::new(&params, 0, dag, rs);

        let rounds = extender.advance();
        assert_eq!(rounds.len(), 3);
        assert!(extender.finished());
        for (i, round) in rounds.iter().enumerate() {
            assert_eq!(round.level, i as Level);
            assert_eq!(round.timing.level(), i as Level);
        }
        // Timing levels are strictly increasing and pre-blocks keep coming
        // only up to last_level.
        assert!(extender.advance().is_empty());
    }

    #[test]
    fn test_flattening_partitions_the_past() {
        let params = params_for_test();
        let rs = Arc::new(DeterministicRandomSource::new(params.digest_algorithm));
        let dag = dense_dag(&params, 4, true);
        let mut extender = Extender::new(&params, 0, dag.clone(), rs);

        let rounds = extender.advance();
        // The level-0 timing unit is a dealing unit: its past is itself and it
        // carries no payload.
        assert!(rounds[0].preblock.data.is_empty());

        // Every payload appears exactly once across the pre-blocks, and each
        // pre-block only carries payloads of data-carrying units.
        let mut seen = std::collections::HashSet::new();
        for round in &rounds {
            for data in &round.preblock.data {
                assert!(seen.insert(data.clone()), "duplicate payload across pre-blocks");
            }
        }
        assert!(!seen.is_empty());
    }

    #[test]
    fn test_identical_dags_produce_identical_orders() {
        let params = params_for_test();
        let rs = Arc::new(DeterministicRandomSource::new(params.digest_algorithm));
        let rounds_a = Extender::new(&params, 0, dense_dag(&params, 4, true), rs.clone()).advance();
        let rounds_b = Extender::new(&params, 0, dense_dag(&params, 4, true), rs).advance();

        assert_eq!(rounds_a.len(), rounds_b.len());
        for (a, b) in rounds_a.iter().zip(&rounds_b) {
            assert_eq!(a.timing.hash(), b.timing.hash());
            assert_eq!(a.preblock, b.preblock);
        }
    }

    #[test]
    fn test_undecided_without_voting_level() {
        let params = params_for_test();
        let rs = Arc::new(DeterministicRandomSource::new(params.digest_algorithm));
        // Only dealing units exist: no voting level, so nothing is decided.
        let dag = dense_dag(&params, 0, false);
        let mut extender = Extender::new(&params, 0, dag, rs);
        assert!(extender.advance().is_empty());
        assert!(!extender.finished());
    }
}
