use super::{OrderMessage, SharedCounters};
use crate::consensus::epochs::EpochManager;
use crate::consensus::PreBlockSink;
use crate::model::unit::Unit;
use crate::processes::extender::Extender;
use ethereal_consensus_core::{api::RandomSource, config::Params, EpochId};
use crossbeam_channel::{Receiver, Sender};
use log::{debug, info};
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// The single-threaded ordering executor: every DAG insertion wakes it, it
/// re-attempts timing decisions, and it emits pre-blocks in strictly
/// monotone (epoch, level) order. Decided timing units are also forwarded to
/// the creator for epoch-proof building.
pub struct OrderProcessor {
    receiver: Receiver<OrderMessage>,
    timing_sender: Sender<Arc<Unit>>,
    preblock_sink: PreBlockSink,
    epochs: Arc<EpochManager>,
    params: Params,
    random_source: Arc<dyn RandomSource>,
    counters: SharedCounters,
    extenders: BTreeMap<EpochId, Extender>,
    /// The epoch whose pre-blocks are currently being emitted.
    emitting: EpochId,
}

impl OrderProcessor {
    pub fn new(
        receiver: Receiver<OrderMessage>,
        timing_sender: Sender<Arc<Unit>>,
        preblock_sink: PreBlockSink,
        epochs: Arc<EpochManager>,
        params: Params,
        random_source: Arc<dyn RandomSource>,
        counters: SharedCounters,
    ) -> Self {
        Self {
            receiver,
            timing_sender,
            preblock_sink,
            epochs,
            params,
            random_source,
            counters,
            extenders: BTreeMap::new(),
            emitting: 0,
        }
    }

    pub fn worker(mut self) {
        while let Ok(msg) = self.receiver.recv() {
            match msg {
                OrderMessage::Exit => break,
                OrderMessage::Unit(unit) => {
                    self.note_epoch(unit.epoch());
                    self.drive();
                }
            }
        }
    }

    fn note_epoch(&mut self, epoch: EpochId) {
        if self.extenders.contains_key(&epoch) || epoch < self.emitting {
            return;
        }
        match self.epochs.dag(epoch) {
            Some(dag) => {
                self.extenders.insert(epoch, Extender::new(&self.params, epoch, dag, self.random_source.clone()));
            }
            None => debug!("no DAG available for epoch {}, ignoring", epoch),
        }
    }

    /// Emits whatever became decidable, never crossing into the next epoch
    /// before the current one is fully ordered.
    fn drive(&mut self) {
        while self.emitting < self.params.number_of_epochs {
            let Some(extender) = self.extenders.get_mut(&self.emitting) else {
                break;
            };
            let rounds = extender.advance();
            let finished = extender.finished();
            for round in rounds {
                self.counters.preblocks_emitted.fetch_add(1, Ordering::Relaxed);
                let _ = self.timing_sender.send(round.timing);
                (self.preblock_sink)(round.preblock);
            }
            if finished {
                info!("epoch {} fully ordered", self.emitting);
                self.extenders.remove(&self.emitting);
                self.emitting += 1;
            } else {
                break;
            }
        }
    }
}
