use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;

use crate::domain::vgs_system_model::discovery::selector::Selector;
use crate::error::{Error, Result};
use crate::loader::parser::load_peer_table;

fn default_probe_interval_ms() -> u64 {
    500
}

fn default_time_unit_ms() -> u64 {
    1
}

fn default_call_timeout_ms() -> u64 {
    1000
}

/// How peers of one deployment reach each other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Direct calls through an in-process directory. Addresses are plain names.
    #[default]
    Local,
    /// Framed requests over TCP. Every address must be a `host:port` to listen on.
    Tcp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerDto {
    pub id: u32,
    pub address: String,
}

/// Describes one local deployment: which peers exist, where they live and how they behave.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDto {
    #[serde(default)]
    pub resource_managers: Vec<PeerDto>,

    #[serde(default)]
    pub grid_schedulers: Vec<PeerDto>,

    /// Line-oriented `id address` table merged into `resource_managers`.
    #[serde(default)]
    pub rm_table: Option<String>,

    #[serde(default)]
    pub gs_table: Option<String>,

    pub nodes_per_resource_manager: usize,

    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,

    #[serde(default = "default_time_unit_ms")]
    pub time_unit_ms: u64,

    #[serde(default)]
    pub selector: Selector,

    #[serde(default)]
    pub statistics_file: Option<String>,

    #[serde(default)]
    pub transport: Transport,

    /// Bound on one remote call. Only used by the TCP transport.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

impl ClusterDto {
    /// A deployment with ids `0..n` and addresses `rm-<id>` / `gs-<id>`.
    pub fn generated(resource_managers: u32, grid_schedulers: u32, nodes_per_resource_manager: usize) -> Self {
        ClusterDto {
            resource_managers: (0..resource_managers).map(|id| PeerDto { id, address: format!("rm-{}", id) }).collect(),
            grid_schedulers: (0..grid_schedulers).map(|id| PeerDto { id, address: format!("gs-{}", id) }).collect(),
            rm_table: None,
            gs_table: None,
            nodes_per_resource_manager,
            probe_interval_ms: default_probe_interval_ms(),
            time_unit_ms: default_time_unit_ms(),
            selector: Selector::default(),
            statistics_file: None,
            transport: Transport::Local,
            call_timeout_ms: default_call_timeout_ms(),
        }
    }

    /// Like [`ClusterDto::generated`], but every peer listens on `127.0.0.1`. RMs take the
    /// ports from `base_port` upwards and the GSs follow right after them.
    pub fn on_loopback(resource_managers: u32, grid_schedulers: u32, nodes_per_resource_manager: usize, base_port: u16) -> Self {
        let mut dto = Self::generated(resource_managers, grid_schedulers, nodes_per_resource_manager);
        let address = |offset: u32| format!("127.0.0.1:{}", u32::from(base_port) + offset);

        for peer in dto.resource_managers.iter_mut() {
            peer.address = address(peer.id);
        }
        for peer in dto.grid_schedulers.iter_mut() {
            peer.address = address(resource_managers + peer.id);
        }

        dto.transport = Transport::Tcp;
        dto
    }

    pub fn rm_urls(&self) -> Result<BTreeMap<u32, String>> {
        merge_peers("resource manager", &self.resource_managers, self.rm_table.as_deref())
    }

    pub fn gs_urls(&self) -> Result<BTreeMap<u32, String>> {
        merge_peers("grid scheduler", &self.grid_schedulers, self.gs_table.as_deref())
    }

    pub fn validate(&self) -> Result<()> {
        if self.nodes_per_resource_manager == 0 {
            return Err(Error::InvalidConfig("nodesPerResourceManager must be at least 1".to_string()));
        }
        if self.probe_interval_ms == 0 {
            return Err(Error::InvalidConfig("probeIntervalMs must be at least 1".to_string()));
        }
        if self.transport == Transport::Tcp && self.call_timeout_ms == 0 {
            return Err(Error::InvalidConfig("callTimeoutMs must be at least 1".to_string()));
        }

        let rm_urls = self.rm_urls()?;
        let gs_urls = self.gs_urls()?;

        if rm_urls.is_empty() || gs_urls.is_empty() {
            return Err(Error::InvalidConfig("a cluster needs at least one resource manager and one grid scheduler".to_string()));
        }

        let mut addresses = HashSet::new();
        for address in rm_urls.values().chain(gs_urls.values()) {
            if !addresses.insert(address.as_str()) {
                return Err(Error::InvalidConfig(format!("address '{}' is used twice", address)));
            }
            if self.transport == Transport::Tcp && address.parse::<SocketAddr>().is_err() {
                return Err(Error::InvalidConfig(format!("address '{}' is not a host:port", address)));
            }
        }

        Ok(())
    }
}

fn merge_peers(kind: &str, peers: &[PeerDto], table: Option<&str>) -> Result<BTreeMap<u32, String>> {
    let mut urls = match table {
        Some(path) => load_peer_table(path)?,
        None => BTreeMap::new(),
    };

    for peer in peers {
        if urls.insert(peer.id, peer.address.clone()).is_some() {
            return Err(Error::InvalidConfig(format!("{} id {} is defined twice", kind, peer.id)));
        }
    }

    Ok(urls)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let json = r#"{
            "resourceManagers": [{ "id": 0, "address": "rm-0" }],
            "gridSchedulers": [{ "id": 0, "address": "gs-0" }],
            "nodesPerResourceManager": 4
        }"#;

        let dto: ClusterDto = serde_json::from_str(json).unwrap();

        assert_eq!(dto.probe_interval_ms, 500);
        assert_eq!(dto.time_unit_ms, 1);
        assert_eq!(dto.selector, Selector::InvertedWeighedRandom);
        assert_eq!(dto.transport, Transport::Local);
        assert!(dto.validate().is_ok());
    }

    #[test]
    fn tcp_deployments_need_socket_addresses() {
        let dto = ClusterDto::on_loopback(2, 2, 1, 7400);
        assert_eq!(dto.gs_urls().unwrap()[&1], "127.0.0.1:7403");
        assert!(dto.validate().is_ok());

        let mut named = ClusterDto::generated(1, 1, 1);
        named.transport = Transport::Tcp;
        assert!(matches!(named.validate(), Err(Error::InvalidConfig(_))));

        let json = r#"{ "resourceManagers": [{ "id": 0, "address": "127.0.0.1:7500" }],
            "gridSchedulers": [{ "id": 0, "address": "127.0.0.1:7501" }],
            "nodesPerResourceManager": 1, "transport": "tcp" }"#;
        let parsed: ClusterDto = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.transport, Transport::Tcp);
        assert_eq!(parsed.call_timeout_ms, 1000);
    }

    #[test]
    fn shared_addresses_are_rejected() {
        let mut dto = ClusterDto::generated(1, 1, 1);
        dto.grid_schedulers[0].address = "rm-0".to_string();

        assert!(matches!(dto.validate(), Err(Error::InvalidConfig(_))));
    }
}
