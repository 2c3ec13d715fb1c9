use crate::pipeline::OrderMessage;
use crate::processes::dag::Dag;
use crossbeam_channel::Sender;
use ethereal_consensus_core::{config::Params, EpochId};
use log::debug;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// The per-epoch DAG registry. The DAG of a closed epoch is retained only
/// long enough to answer lagging insertions (one epoch back) and is then
/// discarded; the order processor keeps its own handle for as long as the
/// epoch's ordering is incomplete.
pub struct EpochManager {
    params: Params,
    order_sender: Sender<OrderMessage>,
    inner: Mutex<Inner>,
}

struct Inner {
    current: EpochId,
    dags: BTreeMap<EpochId, Arc<Dag>>,
}

impl EpochManager {
    pub fn new(params: Params, order_sender: Sender<OrderMessage>) -> Self {
        let manager = Self { params, order_sender, inner: Mutex::new(Inner { current: 0, dags: BTreeMap::new() }) };
        let dag = manager.make_dag(0);
        manager.inner.lock().dags.insert(0, dag);
        manager
    }

    pub fn current(&self) -> EpochId {
        self.inner.lock().current
    }

    /// Plain lookup with no side effects.
    pub fn dag(&self, epoch: EpochId) -> Option<Arc<Dag>> {
        self.inner.lock().dags.get(&epoch).cloned()
    }

    /// The DAG a peer unit of the given epoch inserts into. Epochs ahead of
    /// the local creator are opened lazily (the configured epoch count bounds
    /// them), so peers racing ahead never lose units here; epochs older than
    /// the retained window stay discarded.
    pub fn dag_for_ingest(&self, epoch: EpochId) -> Option<Arc<Dag>> {
        if epoch >= self.params.number_of_epochs {
            return None;
        }
        let mut inner = self.inner.lock();
        if let Some(dag) = inner.dags.get(&epoch) {
            return Some(dag.clone());
        }
        if epoch > inner.current {
            debug!("opening epoch {} ahead of the local creator", epoch);
            let dag = self.make_dag(epoch);
            inner.dags.insert(epoch, dag.clone());
            return Some(dag);
        }
        None
    }

    /// Follows the local creator into `epoch`: makes it current, keeps the
    /// previous epoch for lagging insertions and discards anything older.
    pub fn advance(&self, epoch: EpochId) -> Option<Arc<Dag>> {
        if epoch >= self.params.number_of_epochs {
            return None;
        }
        let mut inner = self.inner.lock();
        let dag = inner.dags.entry(epoch).or_insert_with(|| self.make_dag(epoch)).clone();
        if epoch > inner.current {
            inner.current = epoch;
            inner.dags.retain(|&e, _| e + 1 >= epoch);
        }
        Some(dag)
    }

    fn make_dag(&self, epoch: EpochId) -> Arc<Dag> {
        let sender = self.order_sender.clone();
        let observer: crate::processes::dag::DagObserver = Box::new(move |unit| {
            // The channel is unbounded; a send never blocks under the DAG lock.
            let _ = sender.send(OrderMessage::Unit(unit.clone()));
        });
        Arc::new(Dag::new(&self.params, epoch, vec![observer]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    fn manager(number_of_epochs: EpochId) -> (EpochManager, crossbeam_channel::Receiver<OrderMessage>) {
        let mut params = Params::new(4, 0);
        params.number_of_epochs = number_of_epochs;
        let (tx, rx) = unbounded();
        (EpochManager::new(params, tx), rx)
    }

    #[test]
    fn test_epoch_lifecycle() {
        let (manager, _rx) = manager(3);
        assert_eq!(manager.current(), 0);
        assert!(manager.dag(0).is_some());

        // Peers racing ahead open later epochs without moving `current`.
        assert!(manager.dag_for_ingest(1).is_some());
        assert!(manager.dag_for_ingest(2).is_some());
        assert_eq!(manager.current(), 0);

        // The local creator advancing drops epochs older than the previous.
        manager.advance(1);
        assert_eq!(manager.current(), 1);
        assert!(manager.dag(0).is_some());
        manager.advance(2);
        assert_eq!(manager.current(), 2);
        assert!(manager.dag(0).is_none());
        assert!(manager.dag(1).is_some());

        // Epochs beyond the configured count never open.
        assert!(manager.advance(3).is_none());
        assert!(manager.dag_for_ingest(3).is_none());
    }
}
