use rudder_discovery_core::labels::Map;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The subset of object metadata the discovery controller consumes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,

    #[serde(default)]
    pub namespace: String,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub labels: Map,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub annotations: Map,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
}

/// The `namespace/name` key a store indexes by.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

// === impl ObjectKey ===

impl ObjectKey {
    pub fn new(namespace: impl ToString, name: impl ToString) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
