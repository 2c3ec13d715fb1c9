use crate::model::unit::Unit;
use ethereal_consensus_core::{unit::PreUnit, ProcId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub mod creator_processor;
pub mod ingest_processor;
pub mod order_processor;

/// Peer ingest channel messages. The source pid is advisory (sender id).
pub enum IngestMessage {
    Exit,
    Units(ProcId, Vec<PreUnit>),
}

/// Belt messages feeding the creator: DAG-accepted units and fork freezes.
pub enum BeltMessage {
    Exit,
    Unit(Arc<Unit>),
    Freeze(ProcId),
}

/// Ordering wake-ups: every DAG insertion flows here.
pub enum OrderMessage {
    Exit,
    Unit(Arc<Unit>),
}

#[derive(Default)]
pub struct ProcessingCounters {
    pub units_submitted: AtomicU64,
    pub units_added: AtomicU64,
    pub units_rejected: AtomicU64,
    pub units_pending: AtomicU64,
    pub units_created: AtomicU64,
    pub forks_detected: AtomicU64,
    pub preblocks_emitted: AtomicU64,
}

impl ProcessingCounters {
    pub fn snapshot(&self) -> ProcessingCountersSnapshot {
        ProcessingCountersSnapshot {
            units_submitted: self.units_submitted.load(Ordering::Relaxed),
            units_added: self.units_added.load(Ordering::Relaxed),
            units_rejected: self.units_rejected.load(Ordering::Relaxed),
            units_pending: self.units_pending.load(Ordering::Relaxed),
            units_created: self.units_created.load(Ordering::Relaxed),
            forks_detected: self.forks_detected.load(Ordering::Relaxed),
            preblocks_emitted: self.preblocks_emitted.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessingCountersSnapshot {
    pub units_submitted: u64,
    pub units_added: u64,
    pub units_rejected: u64,
    pub units_pending: u64,
    pub units_created: u64,
    pub forks_detected: u64,
    pub preblocks_emitted: u64,
}

pub type SharedCounters = Arc<ProcessingCounters>;
