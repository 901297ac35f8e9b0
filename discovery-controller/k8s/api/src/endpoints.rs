use crate::{ObjectMeta, Resource, SemanticEq};
use rudder_discovery_core::ServiceId;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// The coarse endpoint representation: one object carries every ready
/// address of its service, named after the service itself.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Endpoints {
    pub metadata: ObjectMeta,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subsets: Vec<EndpointSubset>,
}

/// A set of addresses sharing the same ports.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct EndpointSubset {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<EndpointAddress>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<EndpointPort>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct EndpointAddress {
    pub ip: IpAddr,
}

/// A port carried by a subset. The name references a service port name and
/// may be omitted only when the service defines a single port.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct EndpointPort {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub port: u16,
}

// === impl Endpoints ===

impl Endpoints {
    /// The service this record backs; coarse endpoint objects are named
    /// after their service.
    pub fn service_id(&self) -> ServiceId {
        ServiceId::new(self.name(), self.namespace())
    }
}

impl Resource for Endpoints {
    const KIND: &'static str = "Endpoints";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
}

impl SemanticEq for Endpoints {
    /// Update equality is defined on `subsets` alone; metadata-only changes
    /// are no-ops.
    fn semantic_eq(&self, newer: &Self) -> bool {
        self.subsets == newer.subsets
    }
}
