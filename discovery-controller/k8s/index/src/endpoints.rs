use crate::{
    cache::CacheHandler,
    controller::{port_matches, resolve_port, Cx, InstanceHandler},
    metrics::EventMetrics,
    queue::EventQueue,
};
use rudder_discovery_core::{LabelFilter, Service, ServiceInstance};
use rudder_discovery_k8s_api::{store::Store, watch::WatchEvent, Endpoints, ObjectKey, Resource};
use std::sync::Arc;

/// Endpoint discovery over coarse per-service `Endpoints` objects.
///
/// One record per service, named after it; the record's subsets carry every
/// backing address.
pub(crate) struct EndpointsSource {
    store: Arc<dyn Store<Endpoints>>,
    cache: CacheHandler<Endpoints>,
}

// === impl EndpointsSource ===

impl EndpointsSource {
    pub(crate) fn new(
        store: Arc<dyn Store<Endpoints>>,
        queue: EventQueue<Endpoints>,
        metrics: EventMetrics,
    ) -> Self {
        Self {
            store,
            cache: CacheHandler::new(queue, metrics),
        }
    }

    pub(crate) async fn process(&self, event: WatchEvent<Endpoints>) {
        self.cache.handle(event).await;
    }

    /// Registers `handler` at the back of the chain, keyed by the service
    /// the record is named after.
    pub(crate) fn subscribe(&self, handler: InstanceHandler) {
        self.cache
            .chain()
            .append(move |ep: &Endpoints, event| handler(&ep.service_id(), event));
    }

    pub(crate) fn instances_by_port(
        &self,
        cx: &Cx,
        service: &Service,
        port: u16,
        filter: &LabelFilter,
    ) -> Vec<ServiceInstance> {
        let key = ObjectKey::new(&service.id.namespace, &service.id.name);
        let Some(ep) = self.store.get(&key) else {
            return Vec::new();
        };
        let Some(service_port) = service.ports.get_by_port(port) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for subset in &ep.subsets {
            for address in &subset.addresses {
                let pod = cx.pod(address.ip);
                let labels = pod.as_ref().map(|p| p.labels.clone()).unwrap_or_default();
                if !filter.matches(&labels) {
                    continue;
                }

                for ep_port in &subset.ports {
                    if port_matches(service, service_port, ep_port.name.as_deref()) {
                        out.push(cx.instance(
                            service,
                            service_port,
                            address.ip,
                            ep_port.port,
                            pod.as_ref(),
                        ));
                    }
                }
            }
        }
        out
    }

    pub(crate) fn proxy_service_instances(
        &self,
        cx: &Cx,
        proxy_namespace: &str,
    ) -> Vec<ServiceInstance> {
        let mut same_ns = Vec::new();
        let mut other_ns = Vec::new();

        for ep in self.store.list() {
            let out = if ep.namespace() == proxy_namespace {
                &mut same_ns
            } else {
                &mut other_ns
            };
            out.extend(self.record_instances(cx, &ep));
        }

        // Same-namespace records lead so that downstream (address, port)
        // dedup retains them over records from other namespaces.
        same_ns.append(&mut other_ns);
        same_ns
    }

    /// Every instance a single record yields, across all of its service's
    /// ports. Records whose service is unknown yield nothing.
    fn record_instances(&self, cx: &Cx, ep: &Endpoints) -> Vec<ServiceInstance> {
        let Some(service) = cx.service(&ep.service_id()) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for subset in &ep.subsets {
            for address in &subset.addresses {
                let pod = cx.pod(address.ip);
                for ep_port in &subset.ports {
                    if let Some(service_port) = resolve_port(&service, ep_port.name.as_deref()) {
                        out.push(cx.instance(
                            &service,
                            service_port,
                            address.ip,
                            ep_port.port,
                            pod.as_ref(),
                        ));
                    }
                }
            }
        }
        out
    }
}
