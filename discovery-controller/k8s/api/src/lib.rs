//! Cluster-side resource types and the seams onto the watcher substrate.
//!
//! The cluster API client and its informer fan-out live outside this
//! repository; they deliver [`watch::WatchEvent`]s and maintain the keyed
//! stores behind the [`store::Store`] and [`store::LabelIndex`] traits. This
//! crate defines the endpoint resource types in both of their cluster
//! representations, the semantic-equality rules that suppress no-op updates,
//! and the by-IP pod metadata seam.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod endpoint_slice;
mod endpoints;
mod meta;
mod pod;
pub mod store;
pub mod watch;

pub use self::{
    endpoint_slice::{EndpointSlice, SliceEndpoint, SlicePort, SERVICE_NAME_LABEL},
    endpoints::{EndpointAddress, EndpointPort, EndpointSubset, Endpoints},
    meta::{ObjectKey, ObjectMeta},
    pod::{Pod, PodCache, PodStore},
};

/// A namespaced resource delivered by the watcher substrate.
pub trait Resource {
    /// Kind label used on event counters and in diagnostics.
    const KIND: &'static str;

    fn metadata(&self) -> &ObjectMeta;

    fn name(&self) -> &str {
        &self.metadata().name
    }

    fn namespace(&self) -> &str {
        &self.metadata().namespace
    }

    fn key(&self) -> ObjectKey {
        ObjectKey {
            namespace: self.namespace().to_string(),
            name: self.name().to_string(),
        }
    }
}

/// Compares the user-visible payload of two versions of a resource.
///
/// Metadata churn (resource-version bumps from external controllers) must
/// not produce downstream events; updates whose semantic payload is
/// unchanged are dropped by the cache handler.
pub trait SemanticEq {
    fn semantic_eq(&self, newer: &Self) -> bool;
}
