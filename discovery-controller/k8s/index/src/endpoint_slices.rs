use crate::{
    cache::CacheHandler,
    controller::{port_matches, resolve_port, Cx, InstanceHandler},
    metrics::EventMetrics,
    queue::EventQueue,
};
use rudder_discovery_core::{LabelFilter, Service, ServiceInstance};
use rudder_discovery_k8s_api::{
    store::LabelIndex, watch::WatchEvent, EndpointSlice, Resource, SERVICE_NAME_LABEL,
};
use std::sync::Arc;
use tracing::debug;

/// Endpoint discovery over sharded `EndpointSlice` objects.
///
/// One service may be backed by many slices, collected through the
/// label index on the service-name label.
pub(crate) struct SliceSource {
    store: Arc<dyn LabelIndex<EndpointSlice>>,
    cache: CacheHandler<EndpointSlice>,
}

// === impl SliceSource ===

impl SliceSource {
    pub(crate) fn new(
        store: Arc<dyn LabelIndex<EndpointSlice>>,
        queue: EventQueue<EndpointSlice>,
        metrics: EventMetrics,
    ) -> Self {
        Self {
            store,
            cache: CacheHandler::new(queue, metrics),
        }
    }

    pub(crate) async fn process(&self, event: WatchEvent<EndpointSlice>) {
        self.cache.handle(event).await;
    }

    /// Registers `handler` at the back of the chain, keyed by the service
    /// the slice's label links it to. Unlabeled slices cannot be keyed and
    /// are skipped.
    pub(crate) fn subscribe(&self, handler: InstanceHandler) {
        self.cache
            .chain()
            .append(move |slice: &EndpointSlice, event| match slice.service_id() {
                Some(id) => handler(&id, event),
                None => {
                    debug!(slice = %slice.key(), "Slice has no service label; skipping");
                    Ok(())
                }
            });
    }

    pub(crate) fn instances_by_port(
        &self,
        cx: &Cx,
        service: &Service,
        port: u16,
        filter: &LabelFilter,
    ) -> Vec<ServiceInstance> {
        let slices =
            self.store
                .list_by_label(&service.id.namespace, SERVICE_NAME_LABEL, &service.id.name);
        if slices.is_empty() {
            return Vec::new();
        }
        let Some(service_port) = service.ports.get_by_port(port) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for slice in &slices {
            for endpoint in &slice.endpoints {
                for &address in &endpoint.addresses {
                    let pod = cx.pod(address);
                    let labels = pod.as_ref().map(|p| p.labels.clone()).unwrap_or_default();
                    if !filter.matches(&labels) {
                        continue;
                    }

                    for slice_port in &slice.ports {
                        // A slice port without a number carries no traffic.
                        let Some(number) = slice_port.port else {
                            continue;
                        };
                        if port_matches(service, service_port, slice_port.name.as_deref()) {
                            out.push(cx.instance(
                                service,
                                service_port,
                                address,
                                number,
                                pod.as_ref(),
                            ));
                        }
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

        for slice in self.store.list() {
            let out = if slice.namespace() == proxy_namespace {
                &mut same_ns
            } else {
                &mut other_ns
            };
            out.extend(self.slice_instances(cx, &slice));
        }

        // Same-namespace slices lead so that downstream (address, port)
        // dedup retains them over slices from other namespaces.
        same_ns.append(&mut other_ns);
        same_ns
    }

    /// Every instance a single slice yields, across all of its service's
    /// ports. Slices without a service label or with an unknown service
    /// yield nothing.
    fn slice_instances(&self, cx: &Cx, slice: &EndpointSlice) -> Vec<ServiceInstance> {
        let Some(service) = slice.service_id().and_then(|id| cx.service(&id)) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for endpoint in &slice.endpoints {
            for &address in &endpoint.addresses {
                let pod = cx.pod(address);
                for slice_port in &slice.ports {
                    let Some(number) = slice_port.port else {
                        continue;
                    };
                    if let Some(service_port) = resolve_port(&service, slice_port.name.as_deref())
                    {
                        out.push(cx.instance(
                            &service,
                            service_port,
                            address,
                            number,
                            pod.as_ref(),
                        ));
                    }
                }
            }
        }
        out
    }
}
