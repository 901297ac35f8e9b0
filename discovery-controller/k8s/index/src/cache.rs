use crate::{
    handler::ChainHandler,
    metrics::{EventMetrics, Op},
    queue::{EventQueue, Task},
};
use rudder_discovery_core::Event;
use rudder_discovery_k8s_api::{watch::WatchEvent, Resource, SemanticEq};
use std::sync::Arc;
use tracing::{error, trace};

/// Binds a resource watcher to a handler chain via the event queue,
/// suppressing updates that carry no semantic change.
pub(crate) struct CacheHandler<T> {
    chain: Arc<ChainHandler<T>>,
    queue: EventQueue<T>,
    metrics: EventMetrics,
}

// === impl CacheHandler ===

impl<T: Resource + SemanticEq> CacheHandler<T> {
    pub(crate) fn new(queue: EventQueue<T>, metrics: EventMetrics) -> Self {
        Self {
            chain: Arc::new(ChainHandler::default()),
            queue,
            metrics,
        }
    }

    pub(crate) fn chain(&self) -> &Arc<ChainHandler<T>> {
        &self.chain
    }

    pub(crate) async fn handle(&self, event: WatchEvent<T>) {
        match event {
            WatchEvent::Added(obj) => {
                self.metrics.observe(T::KIND, Op::Add);
                self.push(obj, Event::Add).await;
            }

            WatchEvent::Updated { old, new } => {
                if old.semantic_eq(&new) {
                    self.metrics.observe(T::KIND, Op::UpdateSame);
                    trace!(kind = T::KIND, key = %new.key(), "Dropping no-op update");
                } else {
                    self.metrics.observe(T::KIND, Op::Update);
                    self.push(new, Event::Update).await;
                }
            }

            WatchEvent::Deleted(obj) => {
                self.metrics.observe(T::KIND, Op::Delete);
                self.push(obj, Event::Delete).await;
            }

            WatchEvent::Tombstone { key, last_known } => {
                self.metrics.observe(T::KIND, Op::Delete);
                match last_known {
                    Some(obj) => self.push(obj, Event::Delete).await,
                    None => {
                        error!(kind = T::KIND, %key, "Tombstone carried no object; dropping delete");
                    }
                }
            }
        }
    }

    async fn push(&self, obj: T, event: Event) {
        self.queue
            .push(Task {
                obj,
                event,
                chain: self.chain.clone(),
            })
            .await;
    }
}
