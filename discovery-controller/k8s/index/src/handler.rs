use parking_lot::RwLock;
use rudder_discovery_core::Event;
use tracing::warn;

pub(crate) type Handler<T> = Box<dyn Fn(&T, Event) -> anyhow::Result<()> + Send + Sync>;

/// An ordered chain of callbacks invoked on each observed change.
///
/// Registration is append-only and iteration order is stable. A failing
/// handler is logged; the rest of the chain still runs.
pub(crate) struct ChainHandler<T> {
    handlers: RwLock<Vec<Handler<T>>>,
}

// === impl ChainHandler ===

impl<T> Default for ChainHandler<T> {
    fn default() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }
}

impl<T> ChainHandler<T> {
    pub(crate) fn append(
        &self,
        handler: impl Fn(&T, Event) -> anyhow::Result<()> + Send + Sync + 'static,
    ) {
        self.handlers.write().push(Box::new(handler));
    }

    pub(crate) fn apply(&self, obj: &T, event: Event) {
        for (index, handler) in self.handlers.read().iter().enumerate() {
            if let Err(error) = handler(obj, event) {
                warn!(%error, handler = index, %event, "Change handler failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    #[test]
    fn an_error_does_not_abort_the_chain() {
        let chain = ChainHandler::default();
        let calls = Arc::new(AtomicUsize::new(0));

        chain.append(|_: &u32, _| anyhow::bail!("boom"));
        let c = calls.clone();
        chain.append(move |_: &u32, _| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        chain.apply(&7, Event::Add);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let chain = ChainHandler::default();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for id in 0..3 {
            let order = order.clone();
            chain.append(move |_: &u32, _| {
                order.lock().push(id);
                Ok(())
            });
        }

        chain.apply(&7, Event::Update);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }
}
