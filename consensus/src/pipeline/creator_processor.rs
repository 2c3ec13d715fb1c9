use super::{BeltMessage, OrderMessage, SharedCounters};
use crate::consensus::epochs::EpochManager;
use crate::consensus::UnitSink;
use crate::model::unit::Unit;
use crate::processes::creator::Creator;
use crossbeam_channel::{Receiver, Sender};
use log::warn;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Owns the [`Creator`] state machine: seeds it with its dealing unit before
/// the belt opens, then drains the belt in batches, emits every created unit
/// through the outbound sink and self-inserts it into its epoch's DAG.
pub struct CreatorProcessor {
    receiver: Receiver<BeltMessage>,
    order_sender: Sender<OrderMessage>,
    epochs: Arc<EpochManager>,
    creator: Creator,
    unit_sink: UnitSink,
    counters: SharedCounters,
}

impl CreatorProcessor {
    pub fn new(
        receiver: Receiver<BeltMessage>,
        order_sender: Sender<OrderMessage>,
        epochs: Arc<EpochManager>,
        creator: Creator,
        unit_sink: UnitSink,
        counters: SharedCounters,
    ) -> Self {
        Self { receiver, order_sender, epochs, creator, unit_sink, counters }
    }

    pub fn worker(mut self) {
        for unit in self.creator.bootstrap() {
            self.emit(unit);
        }

        // One message at a time: together with the FIFO belt this keeps unit
        // creation a deterministic function of the input order, which replay
        // determinism of the output stream rests on.
        while let Ok(msg) = self.receiver.recv() {
            let mut created = Vec::new();
            match msg {
                BeltMessage::Exit => break,
                BeltMessage::Freeze(creator) => self.creator.freeze(creator),
                BeltMessage::Unit(unit) => created.extend(self.creator.absorb(&unit)),
            }
            created.extend(self.creator.create_ready());
            for unit in created {
                self.emit(unit);
            }
        }
        // Pass the exit signal on to the orderer.
        let _ = self.order_sender.send(OrderMessage::Exit);
    }

    /// Self-insertion first (so peers can never reference a unit its own DAG
    /// does not hold yet), then the outbound callback; the DAG's observers
    /// wake the orderer.
    fn emit(&mut self, unit: Arc<Unit>) {
        self.counters.units_created.fetch_add(1, Ordering::Relaxed);
        match self.epochs.advance(unit.epoch()) {
            Some(dag) => {
                if let Err(e) = dag.add_unit(unit.clone()) {
                    warn!("self-insertion failed: {}", e);
                }
            }
            None => warn!("created unit {} has no epoch to join", unit),
        }
        (self.unit_sink)(unit);
    }
}
