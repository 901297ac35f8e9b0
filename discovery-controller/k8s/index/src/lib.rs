//! Endpoint Discovery Aggregation
//!
//! The controller watches cluster-side endpoint state from exactly one of
//! two mutually exclusive representations (coarse per-service `Endpoints`
//! objects, or sharded `EndpointSlice`s) and projects it into the canonical
//! service-instance model:
//!
//! ```ignore
//! [watcher] -> [CacheHandler] -> [EventQueue] -> [ChainHandler]
//!                                                  |-> notify (push)
//!                                                  |-> appended handlers
//! ```
//!
//! Multi-threaded watcher callbacks feed a single serialized consumer via
//! the event queue, so handler logic never contends over shared indexing
//! state. Updates whose semantic payload is unchanged are suppressed before
//! they reach the queue; unrelated metadata churn would otherwise cause a
//! storm of downstream pushes.
//!
//! Read paths (`instances_by_port`, `proxy_service_instances`) are served
//! from the substrate's thread-safe stores on arbitrary threads and never
//! mutate shared state. Query results place instances from the querying
//! proxy's namespace before any other namespace: downstream consumers
//! deduplicate by `(address, port)` keeping the first occurrence, so a proxy
//! resolving its own namespace's endpoints must see them first.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod cache;
mod controller;
mod endpoint_slices;
mod endpoints;
mod handler;
pub mod metrics;
mod queue;
#[cfg(test)]
mod tests;

pub use self::{
    controller::{Controller, EndpointBackend, InstanceHandler, Params, ResourceEvent},
    metrics::EventMetrics,
};
