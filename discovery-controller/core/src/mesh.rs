use ipnet::IpNet;
use std::net::IpAddr;

/// Mesh-wide settings consulted while projecting service instances.
#[derive(Clone, Debug, Default)]
pub struct MeshConfig {
    /// Address of the mixer check server, if one is deployed.
    pub mixer_check_server: Option<String>,

    /// Address of the mixer report server, if one is deployed.
    pub mixer_report_server: Option<String>,

    /// Named networks the mesh spans.
    pub networks: MeshNetworks,
}

/// Maps endpoint addresses to named mesh networks via a first-match CIDR
/// table.
#[derive(Clone, Debug, Default)]
pub struct MeshNetworks(Vec<(IpNet, String)>);

// === impl MeshConfig ===

impl MeshConfig {
    /// Instances carry a workload UID only when a mixer endpoint is
    /// configured.
    pub fn mixer_enabled(&self) -> bool {
        self.mixer_check_server.is_some() || self.mixer_report_server.is_some()
    }
}

// === impl MeshNetworks ===

impl MeshNetworks {
    pub fn new(table: impl IntoIterator<Item = (IpNet, String)>) -> Self {
        Self(table.into_iter().collect())
    }

    pub fn network_for(&self, addr: IpAddr) -> Option<&str> {
        self.0
            .iter()
            .find(|(net, _)| net.contains(&addr))
            .map(|(_, name)| name.as_str())
    }
}
