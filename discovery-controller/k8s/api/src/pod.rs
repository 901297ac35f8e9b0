use ahash::AHashMap as HashMap;
use parking_lot::RwLock;
use rudder_discovery_core::Labels;
use std::{net::IpAddr, sync::Arc};

/// Pod metadata the discovery controller consumes when enriching instances.
///
/// Locality and service-account derivation happen upstream; this crate only
/// carries the results.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Pod {
    pub name: String,
    pub namespace: String,
    pub labels: Labels,
    pub locality: Option<String>,
    pub service_account: Option<String>,
    pub mtls_ready: bool,
}

/// By-IP pod metadata lookup.
///
/// A miss is not an error: instances backed by an unknown pod are emitted
/// with empty labels, locality, and service account.
pub trait PodStore: Send + Sync {
    fn pod_by_ip(&self, ip: IpAddr) -> Option<Pod>;
}

/// A shared by-IP pod cache; the watcher substrate keeps it current.
#[derive(Clone, Debug, Default)]
pub struct PodCache(Arc<RwLock<HashMap<IpAddr, Pod>>>);

// === impl PodCache ===

impl PodCache {
    pub fn insert(&self, ip: IpAddr, pod: Pod) {
        self.0.write().insert(ip, pod);
    }

    pub fn remove(&self, ip: IpAddr) -> Option<Pod> {
        self.0.write().remove(&ip)
    }
}

impl PodStore for PodCache {
    fn pod_by_ip(&self, ip: IpAddr) -> Option<Pod> {
        self.0.read().get(&ip).cloned()
    }
}
