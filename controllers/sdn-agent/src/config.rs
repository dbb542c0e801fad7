//! Agent configuration.
//!
//! Two YAML files drive the agent: its own configuration (VSD, node agent,
//! etcd and health settings) and the Kubernetes master configuration it
//! shares with the API server (cluster CIDR, subnet length, etcd client
//! info). A handful of environment variables override file values.

use crate::error::ControllerError;
use ipnet::Ipv4Net;
use serde::Deserialize;
use std::path::Path;

/// Environment variable naming the agent configuration file
pub const CONFIG_ENV: &str = "SDN_AGENT_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "./sdn-agent-config.yaml";

/// Agent configuration file
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AgentConfig {
    /// Kubeconfig for the agent; in-cluster or default config when absent
    #[serde(default)]
    pub kubeconfig: Option<String>,
    /// Path of the Kubernetes master configuration
    pub master_config: String,
    pub vsd_config: VsdConfig,
    #[serde(default)]
    pub cni_config: CniConfig,
    /// Used when the master configuration lists no etcd URL
    #[serde(default = "default_etcd_server")]
    pub etcd_server: String,
    #[serde(default = "default_health_port")]
    pub health_port: u16,
    /// Expected number of agents competing for leadership
    #[serde(default = "default_nr_clients")]
    pub nr_clients: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct VsdConfig {
    pub vsd_url: String,
    #[serde(rename = "apiversion", default = "default_api_version")]
    pub api_version: String,
    pub enterprise: String,
    pub domain: String,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_organization")]
    pub organization: String,
    #[serde(rename = "certFile", default)]
    pub cert_file: Option<String>,
    #[serde(rename = "keyFile", default)]
    pub key_file: Option<String>,
}

/// Settings for reaching the node agents
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CniConfig {
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    #[serde(rename = "caFile", default = "default_ca_file")]
    pub ca_file: String,
    #[serde(rename = "certFile", default)]
    pub cert_file: Option<String>,
    #[serde(rename = "keyFile", default)]
    pub key_file: Option<String>,
}

impl Default for CniConfig {
    fn default() -> Self {
        Self {
            server_port: default_server_port(),
            ca_file: default_ca_file(),
            cert_file: None,
            key_file: None,
        }
    }
}

/// Kubernetes master configuration (only the parts the agent reads)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterConfig {
    pub network_config: NetworkConfig,
    #[serde(default)]
    pub etcd_client_info: EtcdClientInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    #[serde(rename = "clusterNetworkCIDR")]
    pub cluster_network_cidr: String,
    #[serde(rename = "hostSubnetLength")]
    pub host_subnet_length: u8,
    #[serde(rename = "serviceNetworkCIDR", default)]
    pub service_network_cidr: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EtcdClientInfo {
    #[serde(default)]
    pub ca: Option<String>,
    #[serde(rename = "certFile", default)]
    pub cert_file: Option<String>,
    #[serde(rename = "keyFile", default)]
    pub key_file: Option<String>,
    #[serde(default)]
    pub urls: Vec<String>,
}

fn default_etcd_server() -> String {
    "http://127.0.0.1:2379".to_string()
}

fn default_health_port() -> u16 {
    8099
}

fn default_nr_clients() -> u32 {
    etcd_election::election::DEFAULT_NR_CLIENTS
}

fn default_api_version() -> String {
    "v5_0".to_string()
}

fn default_username() -> String {
    "csproot".to_string()
}

fn default_organization() -> String {
    "csp".to_string()
}

fn default_server_port() -> u16 {
    7443
}

fn default_ca_file() -> String {
    "/opt/nuage/etc/ca.crt".to_string()
}

/// Fully resolved and validated settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub agent: AgentConfig,
    pub master: MasterConfig,
    pub cluster_cidr: Ipv4Net,
    pub subnet_bits: u8,
    pub etcd_endpoints: Vec<String>,
    pub identity: String,
}

impl Settings {
    /// Load both files and the environment overrides of the running process
    pub fn load() -> Result<Self, ControllerError> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let agent_yaml = read_file(&path)?;
        let agent: AgentConfig = serde_yaml::from_str(&agent_yaml)
            .map_err(|e| ControllerError::InvalidConfig(format!("{}: {}", path, e)))?;
        let master_yaml = read_file(&agent.master_config)?;
        Self::from_yaml(&agent_yaml, &master_yaml, |key| std::env::var(key).ok())
    }

    /// Build settings from file contents and an environment lookup
    pub fn from_yaml(
        agent_yaml: &str,
        master_yaml: &str,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ControllerError> {
        let mut agent: AgentConfig = serde_yaml::from_str(agent_yaml)
            .map_err(|e| ControllerError::InvalidConfig(format!("agent configuration: {}", e)))?;
        let master: MasterConfig = serde_yaml::from_str(master_yaml)
            .map_err(|e| ControllerError::InvalidConfig(format!("master configuration: {}", e)))?;

        if let Some(url) = env("VSD_URL") {
            agent.vsd_config.vsd_url = url;
        }
        if let Some(password) = env("VSD_PASSWORD") {
            agent.vsd_config.password = password;
        }

        let etcd_endpoints = match env("ETCD_ENDPOINTS") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
                .collect(),
            None if !master.etcd_client_info.urls.is_empty() => master.etcd_client_info.urls.clone(),
            None => vec![agent.etcd_server.clone()],
        };

        let identity = env("HOST_IDENTITY")
            .or_else(|| env("HOSTNAME"))
            .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
            .map(|s| s.trim().to_string())
            .unwrap_or_default();

        let cluster_cidr: Ipv4Net = master
            .network_config
            .cluster_network_cidr
            .parse()
            .map_err(|e| {
                ControllerError::InvalidConfig(format!(
                    "clusterNetworkCIDR {:?}: {}",
                    master.network_config.cluster_network_cidr, e
                ))
            })?;
        let subnet_bits = master.network_config.host_subnet_length;

        let settings = Self {
            agent,
            master,
            cluster_cidr: cluster_cidr.trunc(),
            subnet_bits,
            etcd_endpoints,
            identity,
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ControllerError> {
        let vsd = &self.agent.vsd_config;
        if vsd.vsd_url.is_empty() {
            return Err(ControllerError::InvalidConfig("vsd-url is required".to_string()));
        }
        if vsd.enterprise.is_empty() {
            return Err(ControllerError::InvalidConfig("VSD enterprise is required".to_string()));
        }
        if vsd.domain.is_empty() {
            return Err(ControllerError::InvalidConfig("VSD domain is required".to_string()));
        }
        if vsd.cert_file.is_some() != vsd.key_file.is_some() {
            return Err(ControllerError::InvalidConfig(
                "VSD certFile and keyFile must be given together".to_string(),
            ));
        }
        if u32::from(self.cluster_cidr.prefix_len()) + u32::from(self.subnet_bits) >= 32 {
            return Err(ControllerError::InvalidConfig(format!(
                "hostSubnetLength {} leaves no host addresses in {}",
                self.subnet_bits, self.cluster_cidr
            )));
        }
        if self.etcd_endpoints.is_empty() {
            return Err(ControllerError::InvalidConfig("no etcd endpoint configured".to_string()));
        }
        if self.identity.is_empty() {
            return Err(ControllerError::InvalidConfig(
                "host identity unknown; set HOST_IDENTITY or HOSTNAME".to_string(),
            ));
        }
        if self.agent.nr_clients == 0 {
            return Err(ControllerError::InvalidConfig("nr-clients must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Read a file referenced by the configuration
pub fn read_file(path: impl AsRef<Path>) -> Result<String, ControllerError> {
    let path = path.as_ref();
    std::fs::read_to_string(path)
        .map_err(|e| ControllerError::InvalidConfig(format!("cannot read {}: {}", path.display(), e)))
}

/// Read a PEM file referenced by the configuration
pub fn read_pem(path: impl AsRef<Path>) -> Result<Vec<u8>, ControllerError> {
    let path = path.as_ref();
    std::fs::read(path)
        .map_err(|e| ControllerError::InvalidConfig(format!("cannot read {}: {}", path.display(), e)))
}
