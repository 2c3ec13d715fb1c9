use ethereal_consensus_core::{
    crown::Crown,
    errors::unit::UnitProcessResult,
    unit::{PreUnit, UnitCoord, UnitId},
    EpochId, Height, Level, ProcId,
};
use ethereal_hashes::{DigestAlgorithm, Hash};
use smallvec::SmallVec;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

/// Per-creator set of maximal ancestors. Almost always a single unit; larger
/// only below a forking creator.
pub type FloorSlot = SmallVec<[Arc<Unit>; 1]>;

/// A [`PreUnit`] situated in the DAG: parents resolved to actual units, level
/// and floor computed. Immutable after construction; the whole DAG is a web of
/// `Arc`-linked `Unit` records, acyclic by construction since parents always
/// sit at lower heights.
pub struct Unit {
    pre: PreUnit,
    parents: Vec<Option<Arc<Unit>>>,
    level: Level,
    floor: Vec<FloorSlot>,
}

impl Unit {
    /// Situates an already validated pre-unit over its resolved parents.
    pub fn situate(pre: PreUnit, parents: Vec<Option<Arc<Unit>>>, quorum: usize) -> Arc<Unit> {
        let level = Self::level_from_parents(&parents, quorum);
        let floor = Self::floor_from_parents(pre.crown.member_count(), &parents);
        Arc::new(Self { pre, parents, level, floor })
    }

    /// Builds a fresh local unit over the given parent array: constructs the
    /// crown, computes the canonical hash and situates the result. The height
    /// follows the self-parent; a fully absent parent array yields a dealing
    /// unit.
    pub fn new_free(
        creator: ProcId,
        epoch: EpochId,
        parents: Vec<Option<Arc<Unit>>>,
        data: Vec<u8>,
        rs_data: Vec<u8>,
        algo: DigestAlgorithm,
        quorum: usize,
    ) -> UnitProcessResult<Arc<Unit>> {
        let height = parents[creator as usize].as_ref().map_or(0, |p| p.height() + 1);
        let crown = Crown::from_parents(algo, parents.iter().map(|slot| slot.as_ref().map(|p| (p.height(), p.hash()))));
        let pre = PreUnit::new(creator, epoch, height, crown, data, rs_data, algo)?;
        Ok(Self::situate(pre, parents, quorum))
    }

    #[inline]
    pub fn pre(&self) -> &PreUnit {
        &self.pre
    }

    /// The wire-transportable form of this unit.
    pub fn to_preunit(&self) -> PreUnit {
        self.pre.clone()
    }

    #[inline]
    pub fn hash(&self) -> Hash {
        self.pre.hash
    }

    #[inline]
    pub fn creator(&self) -> ProcId {
        self.pre.creator
    }

    #[inline]
    pub fn epoch(&self) -> EpochId {
        self.pre.epoch
    }

    #[inline]
    pub fn height(&self) -> Height {
        self.pre.height
    }

    #[inline]
    pub fn level(&self) -> Level {
        self.level
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.pre.data
    }

    #[inline]
    pub fn rs_data(&self) -> &[u8] {
        &self.pre.rs_data
    }

    #[inline]
    pub fn crown(&self) -> &Crown {
        &self.pre.crown
    }

    #[inline]
    pub fn id(&self) -> UnitId {
        self.pre.id()
    }

    #[inline]
    pub fn coord(&self) -> UnitCoord {
        self.pre.coord()
    }

    #[inline]
    pub fn is_dealing(&self) -> bool {
        self.pre.is_dealing()
    }

    #[inline]
    pub fn parents(&self) -> &[Option<Arc<Unit>>] {
        &self.parents
    }

    #[inline]
    pub fn parent(&self, creator: ProcId) -> Option<&Arc<Unit>> {
        self.parents.get(creator as usize).and_then(|slot| slot.as_ref())
    }

    /// The self-parent `parents[creator]`.
    #[inline]
    pub fn predecessor(&self) -> Option<&Arc<Unit>> {
        self.parent(self.creator())
    }

    /// The maximal units by `creator` reachable through this unit's parents.
    #[inline]
    pub fn floor(&self, creator: ProcId) -> &[Arc<Unit>] {
        &self.floor[creator as usize]
    }

    /// DAG order: whether `other` lies in the past of this unit (inclusive).
    pub fn above(&self, other: &Unit) -> bool {
        if self.creator() == other.creator() {
            return self.above_within_creator(other);
        }
        self.floor(other.creator()).iter().any(|w| w.above_within_creator(other))
    }

    /// Walks the predecessor chain down to the unit of the given height.
    pub fn ancestor_at(&self, height: Height) -> Option<&Unit> {
        let mut current = self;
        while current.height() > height {
            current = current.predecessor()?.as_ref();
        }
        (current.height() == height).then_some(current)
    }

    /// Walks the predecessor chain down to the topmost unit of the given
    /// level, if this chain passes through it at all (levels may jump).
    pub fn ancestor_at_level(&self, level: Level) -> Option<&Unit> {
        let mut current = self;
        while current.level() > level {
            current = current.predecessor()?.as_ref();
        }
        (current.level() == level).then_some(current)
    }

    fn above_within_creator(&self, other: &Unit) -> bool {
        debug_assert_eq!(self.creator(), other.creator());
        self.height() >= other.height() && self.ancestor_at(other.height()).is_some_and(|a| a.hash() == other.hash())
    }

    /// Level 0 for dealing units; otherwise the maximum parent level,
    /// incremented when a quorum of parents sits at that maximum.
    fn level_from_parents(parents: &[Option<Arc<Unit>>], quorum: usize) -> Level {
        let Some(max_level) = parents.iter().flatten().map(|p| p.level()).max() else {
            return 0;
        };
        let on_max = parents.iter().flatten().filter(|p| p.level() == max_level).count();
        if on_max >= quorum {
            max_level + 1
        } else {
            max_level
        }
    }

    fn floor_from_parents(n_proc: usize, parents: &[Option<Arc<Unit>>]) -> Vec<FloorSlot> {
        (0..n_proc)
            .map(|c| {
                let mut slot = FloorSlot::new();
                let direct = parents[c].iter().cloned();
                let inherited = parents.iter().flatten().flat_map(|p| p.floor(c as ProcId).iter().cloned());
                for candidate in direct.chain(inherited) {
                    Self::insert_maximal(&mut slot, candidate);
                }
                slot
            })
            .collect()
    }

    fn insert_maximal(slot: &mut FloorSlot, candidate: Arc<Unit>) {
        let mut i = 0;
        while i < slot.len() {
            if slot[i].above_within_creator(&candidate) {
                return;
            }
            if candidate.above_within_creator(&slot[i]) {
                slot.swap_remove(i);
            } else {
                i += 1;
            }
        }
        slot.push(candidate);
    }
}

impl PartialEq for Unit {
    fn eq(&self, other: &Self) -> bool {
        self.hash() == other.hash()
    }
}

impl Eq for Unit {}

impl Display for Unit {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{};{};{}]", self.epoch(), self.coord(), self.level())
    }
}

// Intentionally shallow: a derived Debug would print the entire ancestor web.
impl Debug for Unit {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self, self.hash())
    }
}
