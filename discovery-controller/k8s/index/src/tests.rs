use crate::{Controller, EndpointBackend, Params, ResourceEvent};
use ahash::AHashMap as HashMap;
use maplit::{btreemap, convert_args};
use parking_lot::{Mutex, RwLock};
use prometheus_client::registry::Registry;
use rudder_discovery_core::{
    Event, LabelFilter, MeshConfig, MeshNetworks, PortTable, Protocol, Service, ServiceId,
    ServiceInstance, ServicePort, ServiceRegistry,
};
use rudder_discovery_k8s_api::{
    store::MemStore, watch::WatchEvent, EndpointAddress, EndpointPort, EndpointSlice,
    EndpointSubset, Endpoints, ObjectKey, ObjectMeta, Pod, PodCache, SliceEndpoint, SlicePort,
    SERVICE_NAME_LABEL,
};
use std::{net::IpAddr, sync::Arc, time::Duration};

type Notified = Arc<Mutex<Vec<(ServiceId, Event)>>>;

struct TestConfig {
    controller: Controller,
    endpoints: MemStore<Endpoints>,
    slices: MemStore<EndpointSlice>,
    pods: PodCache,
    services: StaticRegistry,
    notified: Notified,
}

#[derive(Clone, Default)]
struct StaticRegistry(Arc<RwLock<HashMap<ServiceId, Service>>>);

impl ServiceRegistry for StaticRegistry {
    fn service_by_id(&self, id: &ServiceId) -> Option<Service> {
        self.0.read().get(id).cloned()
    }
}

impl StaticRegistry {
    fn insert(&self, svc: Service) {
        self.0.write().insert(svc.id.clone(), svc);
    }
}

impl TestConfig {
    fn with_endpoints(mesh: MeshConfig) -> Self {
        Self::new(mesh, false)
    }

    fn with_slices(mesh: MeshConfig) -> Self {
        Self::new(mesh, true)
    }

    fn new(mesh: MeshConfig, slices_backend: bool) -> Self {
        let endpoints = MemStore::default();
        let slices = MemStore::default();
        let pods = PodCache::default();
        let services = StaticRegistry::default();
        let notified: Notified = Default::default();

        let backend = if slices_backend {
            EndpointBackend::EndpointSlices(Arc::new(slices.clone()))
        } else {
            EndpointBackend::Endpoints(Arc::new(endpoints.clone()))
        };

        let sink = notified.clone();
        let (controller, task) = Controller::new(
            Params {
                backend,
                pods: Arc::new(pods.clone()),
                services: Arc::new(services.clone()),
                mesh,
                notify: Box::new(move |id, event| {
                    sink.lock().push((id.clone(), event));
                    Ok(())
                }),
            },
            &mut Registry::default(),
        );
        tokio::spawn(task);

        Self {
            controller,
            endpoints,
            slices,
            pods,
            services,
            notified,
        }
    }

    /// Waits until at least `count` notifications have been observed. The
    /// queue is strictly ordered, so once the `count`th notification lands,
    /// everything admitted before it has been applied.
    async fn await_notified(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.notified.lock().len() < count {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("timed out waiting for notifications");
    }

    fn counter(&self, kind: &'static str, op: &'static str) -> u64 {
        self.controller.event_metrics().value(kind, op)
    }
}

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

fn service(ns: &str, name: &str, ports: Vec<(&str, u16)>) -> Service {
    Service {
        id: ServiceId::new(name, ns),
        ports: PortTable::from_iter(ports.into_iter().map(|(name, port)| ServicePort {
            name: name.to_string(),
            port,
            protocol: Protocol::Tcp,
        })),
    }
}

fn endpoints(ns: &str, name: &str, subsets: Vec<EndpointSubset>) -> Endpoints {
    Endpoints {
        metadata: ObjectMeta {
            name: name.to_string(),
            namespace: ns.to_string(),
            ..Default::default()
        },
        subsets,
    }
}

fn subset(addresses: Vec<&str>, ports: Vec<(Option<&str>, u16)>) -> EndpointSubset {
    EndpointSubset {
        addresses: addresses
            .into_iter()
            .map(|a| EndpointAddress { ip: ip(a) })
            .collect(),
        ports: ports
            .into_iter()
            .map(|(name, port)| EndpointPort {
                name: name.map(str::to_string),
                port,
            })
            .collect(),
    }
}

fn slice(
    ns: &str,
    name: &str,
    svc: &str,
    addresses: Vec<&str>,
    ports: Vec<(Option<&str>, Option<u16>)>,
) -> EndpointSlice {
    EndpointSlice {
        metadata: ObjectMeta {
            name: name.to_string(),
            namespace: ns.to_string(),
            labels: convert_args!(btreemap!(SERVICE_NAME_LABEL => svc)),
            ..Default::default()
        },
        endpoints: vec![SliceEndpoint {
            addresses: addresses.into_iter().map(ip).collect(),
        }],
        ports: ports
            .into_iter()
            .map(|(name, port)| SlicePort {
                name: name.map(str::to_string),
                port,
            })
            .collect(),
    }
}

fn pod(ns: &str, name: &str, labels: Vec<(&str, &str)>) -> Pod {
    Pod {
        name: name.to_string(),
        namespace: ns.to_string(),
        labels: labels
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<std::collections::BTreeMap<_, _>>()
            .into(),
        locality: Some("us-east-1/a".to_string()),
        service_account: Some("default".to_string()),
        mtls_ready: true,
    }
}

fn addresses(instances: &[ServiceInstance]) -> Vec<IpAddr> {
    instances.iter().map(|i| i.address).collect()
}

#[tokio::test]
async fn metadata_churn_is_suppressed() {
    let t = TestConfig::with_endpoints(MeshConfig::default());

    let old = endpoints("a", "svc", vec![subset(vec!["10.0.0.1"], vec![(None, 8080)])]);
    t.controller
        .process(ResourceEvent::Endpoints(WatchEvent::Added(old.clone())))
        .await;
    t.await_notified(1).await;

    // Same subsets, different metadata: the update must be dropped.
    let mut new = old.clone();
    new.metadata.resource_version = Some("2".to_string());
    t.controller
        .process(ResourceEvent::Endpoints(WatchEvent::Updated {
            old: old.clone(),
            new,
        }))
        .await;

    // A sentinel add flushes the queue: once its notification lands, any
    // notification for the earlier update would have landed before it.
    let sentinel = endpoints("a", "other", vec![]);
    t.controller
        .process(ResourceEvent::Endpoints(WatchEvent::Added(sentinel)))
        .await;
    t.await_notified(2).await;

    let notified = t.notified.lock().clone();
    assert_eq!(
        notified,
        vec![
            (ServiceId::new("svc", "a"), Event::Add),
            (ServiceId::new("other", "a"), Event::Add),
        ]
    );
    assert_eq!(t.counter("Endpoints", "add"), 2);
    assert_eq!(t.counter("Endpoints", "updatesame"), 1);
    assert_eq!(t.counter("Endpoints", "update"), 0);
}

#[tokio::test]
async fn changed_subsets_are_pushed() {
    let t = TestConfig::with_endpoints(MeshConfig::default());

    let old = endpoints("a", "svc", vec![subset(vec!["10.0.0.1"], vec![(None, 8080)])]);
    let new = endpoints("a", "svc", vec![subset(vec!["10.0.0.2"], vec![(None, 8080)])]);

    t.controller
        .process(ResourceEvent::Endpoints(WatchEvent::Added(old.clone())))
        .await;
    t.controller
        .process(ResourceEvent::Endpoints(WatchEvent::Updated { old, new }))
        .await;
    t.await_notified(2).await;

    let notified = t.notified.lock().clone();
    assert_eq!(
        notified,
        vec![
            (ServiceId::new("svc", "a"), Event::Add),
            (ServiceId::new("svc", "a"), Event::Update),
        ]
    );
    assert_eq!(t.counter("Endpoints", "update"), 1);
    assert_eq!(t.counter("Endpoints", "updatesame"), 0);
}

#[tokio::test]
async fn tombstones_unwrap_to_deletes() {
    let t = TestConfig::with_endpoints(MeshConfig::default());

    let ep = endpoints("a", "svc", vec![]);
    t.controller
        .process(ResourceEvent::Endpoints(WatchEvent::Tombstone {
            key: ObjectKey::new("a", "svc"),
            last_known: Some(ep),
        }))
        .await;
    t.await_notified(1).await;

    assert_eq!(
        t.notified.lock().clone(),
        vec![(ServiceId::new("svc", "a"), Event::Delete)]
    );
    assert_eq!(t.counter("Endpoints", "delete"), 1);
}

#[tokio::test]
async fn empty_tombstones_are_dropped() {
    let t = TestConfig::with_endpoints(MeshConfig::default());

    t.controller
        .process(ResourceEvent::Endpoints(WatchEvent::Tombstone {
            key: ObjectKey::new("a", "svc"),
            last_known: None,
        }))
        .await;

    // The drop is still counted; a sentinel add proves nothing was pushed.
    t.controller
        .process(ResourceEvent::Endpoints(WatchEvent::Added(endpoints(
            "a",
            "other",
            vec![],
        ))))
        .await;
    t.await_notified(1).await;

    assert_eq!(
        t.notified.lock().clone(),
        vec![(ServiceId::new("other", "a"), Event::Add)]
    );
    assert_eq!(t.counter("Endpoints", "delete"), 1);
}

#[tokio::test]
async fn events_for_the_inactive_backend_are_dropped() {
    let t = TestConfig::with_endpoints(MeshConfig::default());

    t.controller
        .process(ResourceEvent::EndpointSlice(WatchEvent::Added(slice(
            "a",
            "svc-1",
            "svc",
            vec!["10.0.0.1"],
            vec![(None, Some(8080))],
        ))))
        .await;

    t.controller
        .process(ResourceEvent::Endpoints(WatchEvent::Added(endpoints(
            "a",
            "other",
            vec![],
        ))))
        .await;
    t.await_notified(1).await;

    assert_eq!(t.notified.lock().len(), 1);
    assert_eq!(t.counter("EndpointSlice", "add"), 0);
}

#[tokio::test]
async fn appended_handlers_run_after_notify() {
    let t = TestConfig::with_endpoints(MeshConfig::default());

    let seen: Notified = Default::default();
    let sink = seen.clone();
    t.controller
        .append_instance_handler(Box::new(move |id, event| {
            sink.lock().push((id.clone(), event));
            Ok(())
        }));

    t.controller
        .process(ResourceEvent::Endpoints(WatchEvent::Added(endpoints(
            "a",
            "svc",
            vec![],
        ))))
        .await;
    t.await_notified(1).await;

    tokio::time::timeout(Duration::from_secs(5), async {
        while seen.lock().is_empty() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("appended handler was not invoked");

    assert_eq!(
        seen.lock().clone(),
        vec![(ServiceId::new("svc", "a"), Event::Add)]
    );
}

#[tokio::test]
async fn same_namespace_instances_lead() {
    let t = TestConfig::with_endpoints(MeshConfig::default());
    t.services.insert(service("a", "svc", vec![("http", 80)]));
    t.services.insert(service("b", "svc", vec![("http", 80)]));

    t.endpoints.apply(endpoints(
        "a",
        "svc",
        vec![subset(vec!["10.0.0.1"], vec![(Some("http"), 8080)])],
    ));
    t.endpoints.apply(endpoints(
        "b",
        "svc",
        vec![subset(vec!["10.0.0.2"], vec![(Some("http"), 8080)])],
    ));

    let from_a = t.controller.proxy_service_instances("a");
    assert_eq!(addresses(&from_a), vec![ip("10.0.0.1"), ip("10.0.0.2")]);

    let from_b = t.controller.proxy_service_instances("b");
    assert_eq!(addresses(&from_b), vec![ip("10.0.0.2"), ip("10.0.0.1")]);
}

#[tokio::test]
async fn unnamed_port_requires_single_port_service() {
    let t = TestConfig::with_endpoints(MeshConfig::default());

    let svc = service("a", "svc", vec![("http", 80), ("grpc", 81)]);
    t.endpoints.apply(endpoints(
        "a",
        "svc",
        vec![subset(vec!["10.0.0.1"], vec![(Some(""), 8080)])],
    ));

    let out = t
        .controller
        .instances_by_port(&svc, 80, &LabelFilter::default());
    assert!(out.is_empty(), "unnamed port matched a multi-port service");

    // The same subset against a single-port service resolves.
    let solo = service("a", "solo", vec![("", 80)]);
    t.endpoints.apply(endpoints(
        "a",
        "solo",
        vec![subset(vec!["10.0.0.1"], vec![(Some(""), 8080)])],
    ));
    let out = t.controller.instances_by_port(&solo, 80, &LabelFilter::default());
    assert_eq!(addresses(&out), vec![ip("10.0.0.1")]);
    assert_eq!(out[0].port, 8080);
}

#[tokio::test]
async fn unknown_service_port_yields_nothing() {
    let t = TestConfig::with_endpoints(MeshConfig::default());
    let svc = service("a", "svc", vec![("http", 80)]);

    t.endpoints.apply(endpoints(
        "a",
        "svc",
        vec![subset(vec!["10.0.0.1"], vec![(Some("http"), 8080)])],
    ));

    assert!(t
        .controller
        .instances_by_port(&svc, 9999, &LabelFilter::default())
        .is_empty());
}

#[tokio::test]
async fn missing_record_yields_nothing() {
    let t = TestConfig::with_endpoints(MeshConfig::default());
    let svc = service("a", "svc", vec![("http", 80)]);

    assert!(t
        .controller
        .instances_by_port(&svc, 80, &LabelFilter::default())
        .is_empty());
}

#[tokio::test]
async fn label_filters_gate_on_pod_labels() {
    let t = TestConfig::with_endpoints(MeshConfig::default());
    let svc = service("a", "svc", vec![("http", 80)]);

    t.pods
        .insert(ip("10.0.0.1"), pod("a", "web-1", vec![("app", "web")]));
    t.endpoints.apply(endpoints(
        "a",
        "svc",
        vec![subset(
            vec!["10.0.0.1", "10.0.0.2"],
            vec![(Some("http"), 8080)],
        )],
    ));

    let filter = LabelFilter::new(Some(convert_args!(btreemap!("app" => "web"))));
    let out = t.controller.instances_by_port(&svc, 80, &filter);

    // 10.0.0.2 has no pod and thus no labels; the filter rejects it.
    assert_eq!(addresses(&out), vec![ip("10.0.0.1")]);
    assert_eq!(out[0].labels.get("app"), Some("web"));
    assert_eq!(out[0].locality.as_deref(), Some("us-east-1/a"));
    assert_eq!(out[0].service_account.as_deref(), Some("default"));
    assert!(out[0].mtls_ready);

    // Without a filter the pod-less address is still emitted, bare.
    let out = t
        .controller
        .instances_by_port(&svc, 80, &LabelFilter::default());
    assert_eq!(
        addresses(&out),
        vec![ip("10.0.0.1"), ip("10.0.0.2")]
    );
    let bare = &out[1];
    assert!(bare.labels.is_empty());
    assert_eq!(bare.locality, None);
    assert_eq!(bare.service_account, None);
    assert!(!bare.mtls_ready);
}

#[tokio::test]
async fn uid_requires_a_mixer_endpoint() {
    let svc = service("a", "svc", vec![("http", 80)]);
    let record = endpoints("a", "svc", vec![subset(vec!["10.0.0.1"], vec![(Some("http"), 8080)])]);

    let plain = TestConfig::with_endpoints(MeshConfig::default());
    plain
        .pods
        .insert(ip("10.0.0.1"), pod("a", "web-1", vec![]));
    plain.endpoints.apply(record.clone());
    let out = plain
        .controller
        .instances_by_port(&svc, 80, &LabelFilter::default());
    assert_eq!(out[0].uid, None);

    let mixer = TestConfig::with_endpoints(MeshConfig {
        mixer_check_server: Some("mixer:9091".to_string()),
        ..Default::default()
    });
    mixer
        .pods
        .insert(ip("10.0.0.1"), pod("a", "web-1", vec![]));
    mixer.endpoints.apply(record);
    let out = mixer
        .controller
        .instances_by_port(&svc, 80, &LabelFilter::default());
    assert_eq!(out[0].uid.as_deref(), Some("kubernetes://web-1.a"));
}

#[tokio::test]
async fn instances_carry_their_network() {
    let mesh = MeshConfig {
        networks: MeshNetworks::new(vec![(
            "10.0.0.0/8".parse().unwrap(),
            "east".to_string(),
        )]),
        ..Default::default()
    };
    let t = TestConfig::with_endpoints(mesh);
    let svc = service("a", "svc", vec![("http", 80)]);

    t.endpoints.apply(endpoints(
        "a",
        "svc",
        vec![subset(
            vec!["10.0.0.1", "192.168.0.1"],
            vec![(Some("http"), 8080)],
        )],
    ));

    let out = t
        .controller
        .instances_by_port(&svc, 80, &LabelFilter::default());
    assert_eq!(out[0].network.as_deref(), Some("east"));
    assert_eq!(out[1].network, None);
}

#[tokio::test]
async fn slices_concatenate_in_index_order() {
    let t = TestConfig::with_slices(MeshConfig::default());
    let svc = service("a", "svc", vec![("http", 80)]);

    t.slices.apply(slice(
        "a",
        "svc-1",
        "svc",
        vec!["10.0.0.1"],
        vec![(Some("http"), Some(8080))],
    ));
    t.slices.apply(slice(
        "a",
        "svc-2",
        "svc",
        vec!["10.0.0.2"],
        vec![(Some("http"), Some(8080))],
    ));

    let out = t
        .controller
        .instances_by_port(&svc, 80, &LabelFilter::default());
    assert_eq!(addresses(&out), vec![ip("10.0.0.1"), ip("10.0.0.2")]);
    assert_eq!(out[0].service_port.name, "http");
}

#[tokio::test]
async fn slice_metadata_churn_is_suppressed() {
    let t = TestConfig::with_slices(MeshConfig::default());

    let old = slice(
        "a",
        "svc-1",
        "svc",
        vec!["10.0.0.1"],
        vec![(Some("http"), Some(8080))],
    );
    t.controller
        .process(ResourceEvent::EndpointSlice(WatchEvent::Added(old.clone())))
        .await;
    t.await_notified(1).await;

    let mut new = old.clone();
    new.metadata.resource_version = Some("7".to_string());
    t.controller
        .process(ResourceEvent::EndpointSlice(WatchEvent::Updated {
            old,
            new,
        }))
        .await;

    assert_eq!(t.counter("EndpointSlice", "updatesame"), 1);
    assert_eq!(t.counter("EndpointSlice", "update"), 0);
}

#[tokio::test]
async fn slice_unnamed_port_requires_single_port_service() {
    let t = TestConfig::with_slices(MeshConfig::default());
    let svc = service("a", "svc", vec![("http", 80), ("grpc", 81)]);

    t.slices.apply(slice(
        "a",
        "svc-1",
        "svc",
        vec!["10.0.0.1"],
        vec![(None, Some(8080))],
    ));

    assert!(t
        .controller
        .instances_by_port(&svc, 80, &LabelFilter::default())
        .is_empty());
}

#[tokio::test]
async fn slice_same_namespace_instances_lead() {
    let t = TestConfig::with_slices(MeshConfig::default());
    t.services.insert(service("a", "svc", vec![("http", 80)]));
    t.services.insert(service("b", "svc", vec![("http", 80)]));

    t.slices.apply(slice(
        "a",
        "svc-1",
        "svc",
        vec!["10.0.0.1"],
        vec![(Some("http"), Some(8080))],
    ));
    t.slices.apply(slice(
        "b",
        "svc-1",
        "svc",
        vec!["10.0.0.2"],
        vec![(Some("http"), Some(8080))],
    ));

    assert_eq!(
        addresses(&t.controller.proxy_service_instances("a")),
        vec![ip("10.0.0.1"), ip("10.0.0.2")]
    );
    assert_eq!(
        addresses(&t.controller.proxy_service_instances("b")),
        vec![ip("10.0.0.2"), ip("10.0.0.1")]
    );
}
