pub mod epochs;

use crate::model::unit::Unit;
use crate::pipeline::{
    creator_processor::CreatorProcessor, ingest_processor::IngestProcessor, order_processor::OrderProcessor, IngestMessage,
    ProcessingCounters, ProcessingCountersSnapshot, SharedCounters,
};
use crate::processes::creator::Creator;
use crossbeam_channel::{bounded, unbounded, Sender};
use epochs::EpochManager;
use ethereal_consensus_core::{
    api::{DataSource, EpochProofFactory, RandomSource},
    config::Params,
    errors::config::ConfigResult,
    preblock::PreBlock,
    unit::PreUnit,
    ProcId,
};
use log::debug;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Outbound callback carrying this process's created units (for broadcast).
pub type UnitSink = Box<dyn FnMut(Arc<Unit>) + Send>;

/// Outbound callback carrying the flattened, totally ordered pre-blocks.
pub type PreBlockSink = Box<dyn FnMut(PreBlock) + Send>;

const INGEST_CHANNEL_SIZE: usize = 1 << 14;
const BELT_CHANNEL_SIZE: usize = 1 << 14;

/// The top-level facade of the ordering core, wired from the epoch registry,
/// the ingest/creator/order processors and the two outbound sinks.
///
/// One instance represents one committee participation; its lifetime is
/// bounded by [`Ethereal::start`] and [`Ethereal::stop`].
pub struct Ethereal {
    params: Params,
    input_sender: Sender<IngestMessage>,
    counters: SharedCounters,
    state: Mutex<State>,
    stopped: AtomicBool,
}

struct State {
    /// Built processors awaiting their threads; consumed by `start`.
    processors: Option<Processors>,
    handles: Vec<JoinHandle<()>>,
}

struct Processors {
    ingest: IngestProcessor,
    creator: CreatorProcessor,
    order: OrderProcessor,
}

impl Ethereal {
    pub fn new(
        params: Params,
        data_source: Box<dyn DataSource>,
        random_source: Arc<dyn RandomSource>,
        proof_factory: EpochProofFactory,
        unit_sink: UnitSink,
        preblock_sink: PreBlockSink,
    ) -> ConfigResult<Self> {
        params.validate()?;
        let counters: SharedCounters = Arc::new(ProcessingCounters::default());

        let (input_sender, input_receiver) = bounded(INGEST_CHANNEL_SIZE);
        let (belt_sender, belt_receiver) = bounded(BELT_CHANNEL_SIZE);
        let (order_sender, order_receiver) = unbounded();
        let (timing_sender, timing_receiver) = unbounded();

        let epochs = Arc::new(EpochManager::new(params.clone(), order_sender.clone()));
        let creator = Creator::new(params.clone(), data_source, random_source.clone(), proof_factory, timing_receiver);

        let processors = Processors {
            ingest: IngestProcessor::new(input_receiver, belt_sender, epochs.clone(), counters.clone()),
            creator: CreatorProcessor::new(belt_receiver, order_sender, epochs.clone(), creator, unit_sink, counters.clone()),
            order: OrderProcessor::new(
                order_receiver,
                timing_sender,
                preblock_sink,
                epochs,
                params.clone(),
                random_source,
                counters.clone(),
            ),
        };

        Ok(Self {
            params,
            input_sender,
            counters,
            state: Mutex::new(State { processors: Some(processors), handles: Vec::new() }),
            stopped: AtomicBool::new(false),
        })
    }

    /// Spawns the processor threads. Idempotent; the first call wins.
    pub fn start(&self) {
        let mut state = self.state.lock();
        let Some(processors) = state.processors.take() else {
            return;
        };
        let Processors { ingest, creator, order } = processors;
        state.handles = vec![
            thread::Builder::new().name("ingest-processor".to_string()).spawn(move || ingest.worker()).unwrap(),
            thread::Builder::new().name("creator-processor".to_string()).spawn(move || creator.worker()).unwrap(),
            thread::Builder::new().name("order-processor".to_string()).spawn(move || order.worker()).unwrap(),
        ];
    }

    /// Drains pending work and terminates the processors. The exit signal
    /// cascades through the pipeline, so neither sink is invoked after this
    /// returns.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let handles = {
            let mut state = self.state.lock();
            state.processors = None;
            std::mem::take(&mut state.handles)
        };
        if handles.is_empty() {
            return;
        }
        let _ = self.input_sender.send(IngestMessage::Exit);
        for handle in handles {
            let _ = handle.join();
        }
    }

    /// Accepts peer units. Units whose parents have not arrived yet are
    /// buffered and retried on each subsequent DAG addition. Blocks when the
    /// ingest queue is full (back-pressure; peer units are never dropped).
    pub fn input(&self, source: ProcId, units: Vec<PreUnit>) {
        if self.stopped.load(Ordering::SeqCst) {
            debug!("input of {} units from {} after stop, ignoring", units.len(), source);
            return;
        }
        let _ = self.input_sender.send(IngestMessage::Units(source, units));
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn processing_counters(&self) -> ProcessingCountersSnapshot {
        self.counters.snapshot()
    }
}
