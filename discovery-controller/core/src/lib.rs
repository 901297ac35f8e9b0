//! Canonical service model shared by the discovery controller.
//!
//! Cluster-side endpoint state (in either of its two representations) is
//! projected into this model before it is handed to downstream consumers. A
//! [`ServiceInstance`] names one `(address, service port)` binding of a
//! backend to a service; instances are derived per query and never stored.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod labels;
mod mesh;

pub use self::{
    labels::{LabelFilter, Labels},
    mesh::{MeshConfig, MeshNetworks},
};
pub use ipnet::IpNet;

use std::{fmt, net::IpAddr, str::FromStr};

/// A change observed on a watched resource.
///
/// The lowercase display form doubles as the operation label on event
/// counters.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Event {
    Add,
    Update,
    Delete,
}

/// Identifies a service by name and namespace.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceId {
    pub name: String,
    pub namespace: String,
}

/// Transport protocol of a service port.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Sctp,
}

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown protocol: {0}")]
pub struct InvalidProtocol(String);

/// One named port exposed by a service.
///
/// Ports are unique by name within a service; the name may be empty only on
/// single-port services.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServicePort {
    pub name: String,
    pub port: u16,
    pub protocol: Protocol,
}

/// The ordered port table of a service.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PortTable(Vec<ServicePort>);

/// A service known to the registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Service {
    pub id: ServiceId,
    pub ports: PortTable,
}

/// A single `(address, service port)` binding of a backend to a service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceInstance {
    pub address: IpAddr,
    pub port: u16,
    pub service_port: ServicePort,
    pub service_id: ServiceId,
    pub labels: Labels,
    pub locality: Option<String>,
    pub service_account: Option<String>,
    /// Workload UID of the form `kubernetes://{pod}.{namespace}`; populated
    /// only when the mesh has a mixer endpoint configured.
    pub uid: Option<String>,
    pub network: Option<String>,
    pub mtls_ready: bool,
}

/// Read access to the set of services known to the mesh.
pub trait ServiceRegistry: Send + Sync {
    fn service_by_id(&self, id: &ServiceId) -> Option<Service>;
}

// === impl Event ===

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Add => "add".fmt(f),
            Event::Update => "update".fmt(f),
            Event::Delete => "delete".fmt(f),
        }
    }
}

// === impl ServiceId ===

impl ServiceId {
    pub fn new(name: impl ToString, namespace: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
        }
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.namespace)
    }
}

// === impl Protocol ===

impl FromStr for Protocol {
    type Err = InvalidProtocol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("tcp") {
            return Ok(Protocol::Tcp);
        }
        if s.eq_ignore_ascii_case("udp") {
            return Ok(Protocol::Udp);
        }
        if s.eq_ignore_ascii_case("sctp") {
            return Ok(Protocol::Sctp);
        }
        Err(InvalidProtocol(s.to_string()))
    }
}

// === impl PortTable ===

impl PortTable {
    pub fn get_by_port(&self, port: u16) -> Option<&ServicePort> {
        self.0.iter().find(|p| p.port == port)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&ServicePort> {
        self.0.iter().find(|p| p.name == name)
    }

    /// Returns the table's only port, if the table holds exactly one.
    ///
    /// An unnamed endpoint port is resolvable only against such a table.
    pub fn solo(&self) -> Option<&ServicePort> {
        match &*self.0 {
            [port] => Some(port),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServicePort> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<ServicePort> for PortTable {
    fn from_iter<T: IntoIterator<Item = ServicePort>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
