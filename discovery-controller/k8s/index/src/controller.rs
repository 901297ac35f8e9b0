use crate::{
    endpoint_slices::SliceSource, endpoints::EndpointsSource, metrics::EventMetrics, queue,
};
use prometheus_client::registry::Registry;
use rudder_discovery_core::{
    Event, LabelFilter, MeshConfig, Service, ServiceId, ServiceInstance, ServicePort,
    ServiceRegistry,
};
use rudder_discovery_k8s_api::{
    store::{LabelIndex, Store},
    watch::WatchEvent,
    EndpointSlice, Endpoints, Pod, PodStore,
};
use std::{future::Future, net::IpAddr, pin::Pin, sync::Arc};
use tracing::error;

/// Tasks admitted to the event queue before producers start backing off.
const QUEUE_CAPACITY: usize = 256;

/// Callbacks appended behind the notify sink; invoked with the service a
/// change applies to.
pub type InstanceHandler = Box<dyn Fn(&ServiceId, Event) -> anyhow::Result<()> + Send + Sync>;

/// The cluster representation backing endpoint discovery, with a handle to
/// the substrate's cache for it. Exactly one variant is active per
/// controller for its lifetime.
pub enum EndpointBackend {
    Endpoints(Arc<dyn Store<Endpoints>>),
    EndpointSlices(Arc<dyn LabelIndex<EndpointSlice>>),
}

/// A watch event routed to the controller by the substrate's fan-out.
#[derive(Clone, Debug)]
pub enum ResourceEvent {
    Endpoints(WatchEvent<Endpoints>),
    EndpointSlice(WatchEvent<EndpointSlice>),
}

pub struct Params {
    pub backend: EndpointBackend,
    pub pods: Arc<dyn PodStore>,
    pub services: Arc<dyn ServiceRegistry>,
    pub mesh: MeshConfig,
    /// Triggers the downstream push on every admitted event; always the
    /// first entry of the handler chain.
    pub notify: InstanceHandler,
}

/// Orchestrates one endpoint source with the pod store and service registry,
/// producing service-instance views ordered by namespace affinity.
pub struct Controller {
    source: Source,
    cx: Arc<Cx>,
    metrics: EventMetrics,
}

pub(crate) enum Source {
    Endpoints(EndpointsSource),
    EndpointSlices(SliceSource),
}

/// Shared lookups the sources need while projecting instances. Holding
/// these apart from the controller keeps the source's handler callbacks
/// free of a reference cycle back to their owner.
pub(crate) struct Cx {
    pods: Arc<dyn PodStore>,
    services: Arc<dyn ServiceRegistry>,
    mesh: MeshConfig,
}

// === impl Controller ===

impl Controller {
    /// Builds the controller and the task that drains its event queue. The
    /// task completes once the controller (and with it every queue
    /// producer) is dropped and the queue has been drained.
    pub fn new(params: Params, prom: &mut Registry) -> (Self, impl Future<Output = ()>) {
        let Params {
            backend,
            pods,
            services,
            mesh,
            notify,
        } = params;

        let metrics = EventMetrics::register(prom);
        let cx = Arc::new(Cx {
            pods,
            services,
            mesh,
        });

        let (source, task): (_, Pin<Box<dyn Future<Output = ()> + Send>>) = match backend {
            EndpointBackend::Endpoints(store) => {
                let (queue, worker) = queue::channel(QUEUE_CAPACITY);
                let source = EndpointsSource::new(store, queue, metrics.clone());
                source.subscribe(notify);
                (Source::Endpoints(source), Box::pin(worker.run()))
            }
            EndpointBackend::EndpointSlices(store) => {
                let (queue, worker) = queue::channel(QUEUE_CAPACITY);
                let source = SliceSource::new(store, queue, metrics.clone());
                source.subscribe(notify);
                (Source::EndpointSlices(source), Box::pin(worker.run()))
            }
        };

        let controller = Self {
            source,
            cx,
            metrics,
        };
        (controller, task)
    }

    /// Routes a watch event to the active source. Events for the inactive
    /// representation are dropped; the two backends are mutually exclusive.
    pub async fn process(&self, event: ResourceEvent) {
        match (&self.source, event) {
            (Source::Endpoints(source), ResourceEvent::Endpoints(event)) => {
                source.process(event).await
            }
            (Source::EndpointSlices(source), ResourceEvent::EndpointSlice(event)) => {
                source.process(event).await
            }
            (Source::Endpoints(_), ResourceEvent::EndpointSlice(_)) => {
                error!("Dropping EndpointSlice event: this controller watches Endpoints");
            }
            (Source::EndpointSlices(_), ResourceEvent::Endpoints(_)) => {
                error!("Dropping Endpoints event: this controller watches EndpointSlices");
            }
        }
    }

    /// All instances binding backends to `service` on the service port
    /// numbered `port`, narrowed by `filter`.
    pub fn instances_by_port(
        &self,
        service: &Service,
        port: u16,
        filter: &LabelFilter,
    ) -> Vec<ServiceInstance> {
        match &self.source {
            Source::Endpoints(source) => source.instances_by_port(&self.cx, service, port, filter),
            Source::EndpointSlices(source) => {
                source.instances_by_port(&self.cx, service, port, filter)
            }
        }
    }

    /// Every known instance, with records from the proxy's own namespace
    /// ahead of all others. Within each partition, store insertion order is
    /// preserved.
    pub fn proxy_service_instances(&self, proxy_namespace: &str) -> Vec<ServiceInstance> {
        match &self.source {
            Source::Endpoints(source) => source.proxy_service_instances(&self.cx, proxy_namespace),
            Source::EndpointSlices(source) => {
                source.proxy_service_instances(&self.cx, proxy_namespace)
            }
        }
    }

    /// Registers a callback behind the notify sink and any previously
    /// appended handlers.
    pub fn append_instance_handler(&self, handler: InstanceHandler) {
        match &self.source {
            Source::Endpoints(source) => source.subscribe(handler),
            Source::EndpointSlices(source) => source.subscribe(handler),
        }
    }

    /// The event counters this controller reports through.
    pub fn event_metrics(&self) -> &EventMetrics {
        &self.metrics
    }
}

// === impl Cx ===

impl Cx {
    pub(crate) fn pod(&self, ip: IpAddr) -> Option<Pod> {
        self.pods.pod_by_ip(ip)
    }

    pub(crate) fn service(&self, id: &ServiceId) -> Option<Service> {
        self.services.service_by_id(id)
    }

    /// Projects one `(address, service port)` binding, enriched from pod
    /// metadata when the pod is known.
    pub(crate) fn instance(
        &self,
        service: &Service,
        service_port: &ServicePort,
        address: IpAddr,
        port: u16,
        pod: Option<&Pod>,
    ) -> ServiceInstance {
        let uid = pod.filter(|_| self.mesh.mixer_enabled()).map(|pod| {
            format!("kubernetes://{}.{}", pod.name, pod.namespace)
        });

        ServiceInstance {
            address,
            port,
            service_port: service_port.clone(),
            service_id: service.id.clone(),
            labels: pod.map(|p| p.labels.clone()).unwrap_or_default(),
            locality: pod.and_then(|p| p.locality.clone()),
            service_account: pod.and_then(|p| p.service_account.clone()),
            uid,
            network: self.mesh.networks.network_for(address).map(String::from),
            mtls_ready: pod.map(|p| p.mtls_ready).unwrap_or(false),
        }
    }
}

/// Whether an endpoint port named `name` carries traffic for the requested
/// service port. An unnamed endpoint port resolves only against a
/// single-port service.
pub(crate) fn port_matches(service: &Service, service_port: &ServicePort, name: Option<&str>) -> bool {
    match name {
        None | Some("") => service.ports.len() == 1,
        Some(name) => service_port.name == name,
    }
}

/// Resolves an endpoint port name to the service port it targets, applying
/// the same single-port rule for unnamed ports.
pub(crate) fn resolve_port<'s>(service: &'s Service, name: Option<&str>) -> Option<&'s ServicePort> {
    match name {
        None | Some("") => service.ports.solo(),
        Some(name) => service.ports.get_by_name(name),
    }
}
