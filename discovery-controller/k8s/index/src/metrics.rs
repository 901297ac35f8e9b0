use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

/// Counts observed watch events by resource kind and operation.
///
/// Constructed against an injected registry and cloned into each cache
/// handler; there is no process-wide counter state.
#[derive(Clone, Debug)]
pub struct EventMetrics {
    events: Family<EventLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct EventLabels {
    kind: &'static str,
    op: &'static str,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Op {
    Add,
    Update,
    /// An update whose semantic payload was unchanged; dropped without a
    /// downstream push.
    UpdateSame,
    Delete,
}

// === impl EventMetrics ===

impl EventMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let events = Family::default();
        prom.register(
            "resource_events",
            "Count of resource watch events observed, by kind and operation",
            events.clone(),
        );
        Self { events }
    }

    pub(crate) fn observe(&self, kind: &'static str, op: Op) {
        self.events
            .get_or_create(&EventLabels {
                kind,
                op: op.as_str(),
            })
            .inc();
    }

    /// Current value of one counter; used by tests and diagnostics.
    pub fn value(&self, kind: &'static str, op: &'static str) -> u64 {
        self.events.get_or_create(&EventLabels { kind, op }).get()
    }
}

// === impl Op ===

impl Op {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Op::Add => "add",
            Op::Update => "update",
            Op::UpdateSame => "updatesame",
            Op::Delete => "delete",
        }
    }
}
