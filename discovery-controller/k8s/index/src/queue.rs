use crate::handler::ChainHandler;
use rudder_discovery_core::Event;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// One unit of handler work: apply the chain to an object for an event.
pub(crate) struct Task<T> {
    pub(crate) obj: T,
    pub(crate) event: Event,
    pub(crate) chain: Arc<ChainHandler<T>>,
}

/// Producer half of the bounded event queue.
pub(crate) struct EventQueue<T> {
    tx: mpsc::Sender<Task<T>>,
}

/// The queue's single consumer; tasks are applied strictly in arrival
/// order.
pub(crate) struct QueueWorker<T> {
    rx: mpsc::Receiver<Task<T>>,
}

pub(crate) fn channel<T>(capacity: usize) -> (EventQueue<T>, QueueWorker<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventQueue { tx }, QueueWorker { rx })
}

// === impl EventQueue ===

impl<T> EventQueue<T> {
    pub(crate) async fn push(&self, task: Task<T>) {
        if self.tx.send(task).await.is_err() {
            warn!("Event queue worker stopped; dropping event");
        }
    }
}

// === impl QueueWorker ===

impl<T> QueueWorker<T> {
    /// Runs until every producer is dropped and the queue is drained.
    pub(crate) async fn run(mut self) {
        while let Some(task) = self.rx.recv().await {
            task.chain.apply(&task.obj, task.event);
        }
    }
}
