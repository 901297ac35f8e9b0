use crate::{ObjectMeta, Resource, SemanticEq};
use rudder_discovery_core::ServiceId;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Label linking a slice to the service it backs.
pub const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";

/// The sharded endpoint representation: a service's addresses are spread
/// across many slices, discovered through [`SERVICE_NAME_LABEL`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct EndpointSlice {
    pub metadata: ObjectMeta,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<SliceEndpoint>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<SlicePort>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SliceEndpoint {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<IpAddr>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SlicePort {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

// === impl EndpointSlice ===

impl EndpointSlice {
    /// The name of the service this slice backs, per its service label.
    pub fn service_name(&self) -> Option<&str> {
        self.metadata
            .labels
            .get(SERVICE_NAME_LABEL)
            .map(String::as_str)
    }

    pub fn service_id(&self) -> Option<ServiceId> {
        self.service_name()
            .map(|name| ServiceId::new(name, self.namespace()))
    }
}

impl Resource for EndpointSlice {
    const KIND: &'static str = "EndpointSlice";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
}

impl SemanticEq for EndpointSlice {
    /// The semantic payload is the full body less metadata-only fields.
    fn semantic_eq(&self, newer: &Self) -> bool {
        self.endpoints == newer.endpoints && self.ports == newer.ports
    }
}
