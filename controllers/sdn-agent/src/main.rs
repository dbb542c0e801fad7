//! SDN Agent
//!
//! Keeps a Kubernetes cluster's namespaces, pods and services in sync with a
//! Nuage VSD. Several agents run side by side; an etcd election picks the one
//! that acts.
//!
//! Namespaces become VSD zones, pods get a container endpoint with an address
//! from their zone's subnets (new subnets are carved out of the cluster
//! network on demand) and services become network macros. Each pod's
//! attachment is pushed to the agent on its node.

mod bootstrap;
mod config;
mod controller;
mod error;
mod health;
mod ipam;
mod metrics;
mod reconciler;
mod sdn;
mod test_utils;
mod watcher;
#[cfg(test)]
mod watcher_test;

use crate::config::{Settings, read_pem};
use crate::controller::Controller;
use crate::error::ControllerError;
use crate::health::HealthState;
use crate::ipam::{CidrPool, MAX_POOL_ENTRIES};
use crate::metrics::Metrics;
use crate::reconciler::Reconciler;
use crate::sdn::SdnCache;
use etcd_election::{ElectionConfig, ElectionError, EtcdStore, EtcdTls, LeaderElector};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use node_agent_client::{NodeAgentClient, NodeAgentTls};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use vsd_client::{VsdClient, VsdCredentials};

/// Exit status of every fatal failure
const EXIT_FAILURE: i32 = 255;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run().await {
        error!("SDN agent stopped: {}", e);
        std::process::exit(EXIT_FAILURE);
    }
}

async fn run() -> Result<(), ControllerError> {
    // Configure rustls crypto provider (required for rustls 0.23+)
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        debug!("rustls crypto provider already installed");
    }

    info!("Starting SDN agent");
    let settings = Settings::load()?;
    let vsd_config = &settings.agent.vsd_config;

    info!("Configuration:");
    info!("  Identity: {}", settings.identity);
    info!("  VSD URL: {} (API {})", vsd_config.vsd_url, vsd_config.api_version);
    info!("  Enterprise/Domain: {}/{}", vsd_config.enterprise, vsd_config.domain);
    info!("  Cluster network: {} (/{} subnets)", settings.cluster_cidr, settings.cluster_cidr.prefix_len() + settings.subnet_bits);
    info!("  etcd: {}", settings.etcd_endpoints.join(", "));
    info!("  Node agent port: {}", settings.agent.cni_config.server_port);
    info!("  Health port: {}", settings.agent.health_port);

    let metrics = Arc::new(Metrics::new()?);
    let health = HealthState::new(metrics.clone());
    {
        let health = health.clone();
        let port = settings.agent.health_port;
        tokio::spawn(async move {
            if let Err(e) = health::serve(port, health).await {
                error!("Health endpoint stopped: {}", e);
            }
        });
    }

    let store = EtcdStore::connect(&settings.etcd_endpoints, etcd_tls(&settings)?).await?;
    let mut election = ElectionConfig::new(settings.identity.clone());
    election.nr_clients = settings.agent.nr_clients;
    let ttl = election.ttl;
    let elector = LeaderElector::new(Arc::new(store), election);

    let mut host_lease = match elector.register_host().await {
        Ok(lease) => lease,
        Err(ElectionError::DuplicateIdentity(identity)) => {
            warn!("Another agent already runs as {}, standing down", identity);
            tokio::time::sleep(ttl).await;
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    info!("Registered host {}, waiting for leadership", settings.identity);

    let mut leader_lease = elector.acquire_leadership().await?;
    metrics.leader.set(1);
    info!("Acquired leadership as {}", settings.identity);

    let mut credentials = VsdCredentials::password(
        vsd_config.username.clone(),
        vsd_config.password.clone(),
        vsd_config.organization.clone(),
    );
    if let (Some(cert), Some(key)) = (&vsd_config.cert_file, &vsd_config.key_file) {
        credentials = credentials.with_identity(&read_pem(cert)?, &read_pem(key)?);
    }
    let vsd = VsdClient::new(vsd_config.vsd_url.clone(), &vsd_config.api_version, credentials)?;
    let scope = bootstrap::bootstrap(&vsd, &vsd_config.enterprise, &vsd_config.domain).await?;
    info!("Managing enterprise {} and domain {}", scope.enterprise_name, scope.domain_name);

    let pool = CidrPool::build(settings.cluster_cidr, settings.subnet_bits, MAX_POOL_ENTRIES)?;
    info!("CIDR pool holds {} prefixes", pool.len());
    let cache = SdnCache::new(Box::new(vsd), scope, pool);

    let node_agent = NodeAgentClient::new(&node_agent_tls(&settings)?, settings.agent.cni_config.server_port)?;
    let reconciler = Arc::new(Reconciler::new(cache, Box::new(node_agent), metrics.clone()));

    let kube_client = kube_client(settings.agent.kubeconfig.as_deref()).await?;
    let controller = Controller::new(kube_client, reconciler).await?;
    health.set_ready(true);

    let result = tokio::select! {
        result = controller.run() => result,
        e = host_lease.lost() => Err(e.into()),
        e = leader_lease.lost() => Err(e.into()),
    };
    health.set_ready(false);
    metrics.leader.set(0);
    result
}

/// Kubernetes client from the configured kubeconfig, or the in-cluster or
/// default one
async fn kube_client(kubeconfig: Option<&str>) -> Result<Client, ControllerError> {
    let Some(path) = kubeconfig else {
        return Ok(Client::try_default().await?);
    };
    let kubeconfig = Kubeconfig::read_from(path)
        .map_err(|e| ControllerError::InvalidConfig(format!("kubeconfig {}: {}", path, e)))?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| ControllerError::InvalidConfig(format!("kubeconfig {}: {}", path, e)))?;
    Ok(Client::try_from(config)?)
}

fn etcd_tls(settings: &Settings) -> Result<Option<EtcdTls>, ControllerError> {
    let info = &settings.master.etcd_client_info;
    if info.ca.is_none() && info.cert_file.is_none() && info.key_file.is_none() {
        return Ok(None);
    }
    Ok(Some(EtcdTls {
        ca_pem: info.ca.as_deref().map(read_pem).transpose()?,
        cert_pem: info.cert_file.as_deref().map(read_pem).transpose()?,
        key_pem: info.key_file.as_deref().map(read_pem).transpose()?,
    }))
}

fn node_agent_tls(settings: &Settings) -> Result<NodeAgentTls, ControllerError> {
    let cni = &settings.agent.cni_config;
    let identity_pem = match (&cni.cert_file, &cni.key_file) {
        (Some(cert), Some(key)) => {
            let mut pem = read_pem(cert)?;
            pem.push(b'\n');
            pem.extend(read_pem(key)?);
            Some(pem)
        }
        _ => None,
    };
    Ok(NodeAgentTls {
        ca_pem: read_pem(&cni.ca_file)?,
        identity_pem,
    })
}
