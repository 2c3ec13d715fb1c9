use super::{BeltMessage, IngestMessage, SharedCounters};
use crate::consensus::epochs::EpochManager;
use ethereal_consensus_core::{
    errors::unit::RuleError,
    unit::{PreUnit, UnitCoord},
    EpochId, ProcId,
};
use crossbeam_channel::{Receiver, Sender};
use log::{debug, trace, warn};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Upper bound on pre-units parked while their parents are in flight.
const MAX_PENDING_UNITS: usize = 1 << 14;

/// Consumes peer input, inserts into the epoch DAGs, buffers units whose
/// parents have not arrived yet and retries them on each subsequent
/// insertion, and forwards every accepted unit onto the creator's belt.
pub struct IngestProcessor {
    receiver: Receiver<IngestMessage>,
    belt_sender: Sender<BeltMessage>,
    epochs: Arc<EpochManager>,
    counters: SharedCounters,
    /// Units waiting for a missing parent, keyed by the first missing
    /// coordinate. A retried unit that still misses parents is parked again
    /// under its next gap.
    pending: HashMap<(EpochId, UnitCoord), Vec<PreUnit>>,
    pending_count: usize,
}

impl IngestProcessor {
    pub fn new(
        receiver: Receiver<IngestMessage>,
        belt_sender: Sender<BeltMessage>,
        epochs: Arc<EpochManager>,
        counters: SharedCounters,
    ) -> Self {
        Self { receiver, belt_sender, epochs, counters, pending: HashMap::new(), pending_count: 0 }
    }

    pub fn worker(mut self) {
        while let Ok(msg) = self.receiver.recv() {
            match msg {
                IngestMessage::Exit => break,
                IngestMessage::Units(source, units) => {
                    for pu in units {
                        self.counters.units_submitted.fetch_add(1, Ordering::Relaxed);
                        self.handle(source, pu);
                    }
                }
            }
        }
        // Pass the exit signal on to the creator.
        let _ = self.belt_sender.send(BeltMessage::Exit);
    }

    fn handle(&mut self, source: ProcId, pu: PreUnit) {
        let mut queue = vec![pu];
        while let Some(pu) = queue.pop() {
            let epoch = pu.epoch;
            let Some(dag) = self.epochs.dag_for_ingest(epoch) else {
                trace!("dropping unit of unreachable epoch {} from {}", epoch, source);
                self.counters.units_rejected.fetch_add(1, Ordering::Relaxed);
                continue;
            };
            match dag.add(&pu) {
                Ok(added) => {
                    self.counters.units_added.fetch_add(1, Ordering::Relaxed);
                    if added.newly_forking {
                        self.counters.forks_detected.fetch_add(1, Ordering::Relaxed);
                        warn!("fork by creator {} detected in epoch {}", added.unit.creator(), epoch);
                        let _ = self.belt_sender.send(BeltMessage::Freeze(added.unit.creator()));
                    }
                    let _ = self.belt_sender.send(BeltMessage::Unit(added.unit.clone()));
                    // Whatever waited on these coordinates can be retried now.
                    if let Some(waiters) = self.pending.remove(&(epoch, added.unit.coord())) {
                        self.pending_count -= waiters.len();
                        self.counters.units_pending.store(self.pending_count as u64, Ordering::Relaxed);
                        queue.extend(waiters);
                    }
                }
                Err(RuleError::MissingParents(coords)) => {
                    if self.pending_count >= MAX_PENDING_UNITS {
                        warn!("pending pool full, dropping unit {} from {}", pu.hash, source);
                        self.counters.units_rejected.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                    trace!("parking unit {} until {} arrives", pu.hash, coords[0]);
                    self.pending.entry((epoch, coords[0])).or_default().push(pu);
                    self.pending_count += 1;
                    self.counters.units_pending.store(self.pending_count as u64, Ordering::Relaxed);
                }
                Err(RuleError::DuplicateUnit(_)) => {
                    trace!("duplicate unit from {}", source);
                }
                Err(e) => {
                    debug!("rejecting unit from {}: {}", source, e);
                    self.counters.units_rejected.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}
