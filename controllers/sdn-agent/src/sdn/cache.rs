//! Write-through cache of the VSD objects mirroring Kubernetes resources.
//!
//! Zones, network macro groups and network macros are looked up locally,
//! then on the VSD, and created when missing. All of these check-then-create
//! sequences, and every address allocation, run under one async mutex so two
//! event handlers never race each other into duplicate creates. A create that
//! still answers "already exists" (another writer won) is followed by a
//! re-fetch instead of an error.
//!
//! Containers are not cached: pods are short lived and every lookup goes to
//! the VSD by exact name.

use crate::error::ControllerError;
use crate::ipam::CidrPool;
use crate::sdn::naming;
use crate::sdn::zone::NamespaceZone;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard, Notify};
use tokio::time::Instant;
use tracing::{debug, info};
use vsd_client::{
    AclDirection, AclEntry, EnterpriseNetwork, NetworkMacroGroup, VsdClientTrait, VsdError, Zone,
    scope,
};

/// How long a handler waits for its namespace zone
pub const NAMESPACE_WAIT: Duration = Duration::from_secs(10);
/// Re-check interval while waiting, in case a notification is missed
pub const NAMESPACE_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Priority of the rule letting a zone reach its services
pub const SERVICE_RULE_PRIORITY: i64 = 900_000;

/// Enterprise and domain the agent manages, resolved at bootstrap
#[derive(Debug, Clone, Default)]
pub struct SdnScope {
    pub enterprise_id: String,
    pub enterprise_name: String,
    pub domain_id: String,
    pub domain_name: String,
    /// Ingress ACL template carrying the per-namespace service rules
    pub ingress_template_id: Option<String>,
}

/// State guarded by the cache mutex
#[derive(Debug, Default)]
pub struct SdnState {
    /// Zones by namespace name
    pub zones: HashMap<String, NamespaceZone>,
    /// Network macro groups by name
    pub macro_groups: HashMap<String, NetworkMacroGroup>,
    /// Network macros by name
    pub macros: HashMap<String, EnterpriseNetwork>,
    pub pool: CidrPool,
}

pub struct SdnCache {
    vsd: Box<dyn VsdClientTrait>,
    scope: SdnScope,
    state: Mutex<SdnState>,
    namespace_ready: Notify,
}

impl std::fmt::Debug for SdnCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SdnCache")
            .field("vsd", &self.vsd.base_url())
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl SdnCache {
    pub fn new(vsd: Box<dyn VsdClientTrait>, scope: SdnScope, pool: CidrPool) -> Self {
        Self {
            vsd,
            scope,
            state: Mutex::new(SdnState {
                pool,
                ..Default::default()
            }),
            namespace_ready: Notify::new(),
        }
    }

    pub fn vsd(&self) -> &dyn VsdClientTrait {
        self.vsd.as_ref()
    }

    pub fn scope(&self) -> &SdnScope {
        &self.scope
    }

    /// Enter the single mutual-exclusion domain of all SDN mutations
    pub async fn lock(&self) -> MutexGuard<'_, SdnState> {
        self.state.lock().await
    }

    pub async fn has_namespace(&self, namespace: &str) -> bool {
        self.state.lock().await.zones.contains_key(namespace)
    }

    /// Find or create the zone of `namespace`, load its subnets and publish
    /// the namespace as ready. Returns the zone ID.
    pub async fn ensure_zone(&self, namespace: &str) -> Result<String, ControllerError> {
        let mut state = self.state.lock().await;
        if let Some(zone) = state.zones.get(namespace) {
            debug!("Zone {} already cached", zone.name());
            return Ok(zone.id().to_string());
        }

        let name = naming::zone_name(namespace);
        let zone = match self.fetch_zone(&name).await? {
            Some(zone) => {
                info!("Zone {} found on the VSD, caching", name);
                zone
            }
            None => {
                info!("Cannot find zone {}, creating", name);
                let wanted = Zone {
                    name: name.clone(),
                    ..Default::default()
                };
                match self.vsd.create_zone(&self.scope.domain_id, &wanted).await {
                    Ok(zone) => {
                        info!("Created zone {}", name);
                        zone
                    }
                    Err(e) if e.is_conflict() => {
                        info!("Zone {} created concurrently, fetching it", name);
                        self.fetch_zone(&name).await?.ok_or_else(|| {
                            ControllerError::Vsd(VsdError::NotFound(format!("zone {} vanished after conflict", name)))
                        })?
                    }
                    Err(e) => return Err(e.context(format!("create zone {}", name)).into()),
                }
            }
        };

        let loaded = NamespaceZone::load(self.vsd.as_ref(), namespace, zone, &mut state.pool).await?;
        let zone_id = loaded.id().to_string();
        state.zones.insert(namespace.to_string(), loaded);
        drop(state);

        self.namespace_ready.notify_waiters();
        Ok(zone_id)
    }

    /// Block until `namespace` has a zone, up to `timeout`.
    ///
    /// Wakes on every namespace publication and re-checks every
    /// [`NAMESPACE_POLL_INTERVAL`].
    pub async fn wait_for_namespace(&self, namespace: &str, timeout: Duration) -> Result<(), ControllerError> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.namespace_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.has_namespace(namespace).await {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ControllerError::NamespaceNotReady(format!(
                    "timed out after {:?} waiting for namespace {}",
                    timeout, namespace
                )));
            }
            let wait = (deadline - now).min(NAMESPACE_POLL_INTERVAL);
            let _ = tokio::time::timeout(wait, notified).await;
        }
    }

    /// Find or create the macro group of `namespace`.
    ///
    /// The flag is true when this call created the group.
    pub async fn ensure_macro_group(&self, namespace: &str) -> Result<(NetworkMacroGroup, bool), ControllerError> {
        let name = naming::macro_group_name(namespace);
        let mut state = self.state.lock().await;
        if let Some(group) = state.macro_groups.get(&name) {
            return Ok((group.clone(), false));
        }

        let (group, created) = match self.fetch_macro_group(&name).await? {
            Some(group) => {
                info!("Network macro group {} found on the VSD, caching", name);
                (group, false)
            }
            None => {
                info!("Cannot find network macro group {}, creating", name);
                let wanted = NetworkMacroGroup {
                    name: name.clone(),
                    ..Default::default()
                };
                match self
                    .vsd
                    .create_network_macro_group(&self.scope.enterprise_id, &wanted)
                    .await
                {
                    Ok(group) => (group, true),
                    Err(e) if e.is_conflict() => {
                        let group = self.fetch_macro_group(&name).await?.ok_or_else(|| {
                            ControllerError::Vsd(VsdError::NotFound(format!(
                                "network macro group {} vanished after conflict",
                                name
                            )))
                        })?;
                        (group, false)
                    }
                    Err(e) => return Err(e.context(format!("create network macro group {}", name)).into()),
                }
            }
        };

        state.macro_groups.insert(name, group.clone());
        Ok((group, created))
    }

    /// Find or create the network macro of `service` with `address`/32
    pub async fn ensure_macro(&self, service: &str, address: &str) -> Result<EnterpriseNetwork, ControllerError> {
        let name = naming::macro_name(service);
        let mut state = self.state.lock().await;
        if let Some(network) = state.macros.get(&name) {
            return Ok(network.clone());
        }

        let network = match self.vsd.find_network_macro(&self.scope.enterprise_id, &name).await {
            Ok(Some(network)) => network,
            Ok(None) => {
                info!("Cannot find network macro {}, creating", name);
                let wanted = EnterpriseNetwork {
                    name: name.clone(),
                    address: address.to_string(),
                    netmask: "255.255.255.255".to_string(),
                    ..Default::default()
                };
                match self.vsd.create_network_macro(&self.scope.enterprise_id, &wanted).await {
                    Ok(network) => network,
                    Err(e) if e.is_conflict() => self
                        .vsd
                        .find_network_macro(&self.scope.enterprise_id, &name)
                        .await
                        .map_err(|e| e.context(format!("fetch network macro {}", name)))?
                        .ok_or_else(|| {
                            ControllerError::Vsd(VsdError::NotFound(format!(
                                "network macro {} vanished after conflict",
                                name
                            )))
                        })?,
                    Err(e) => return Err(e.context(format!("create network macro {}", name)).into()),
                }
            }
            Err(e) => return Err(e.context(format!("fetch network macro {}", name)).into()),
        };

        state.macros.insert(name, network.clone());
        Ok(network)
    }

    /// Add the ingress rule letting zone `zone_id` reach macro group `group`
    pub async fn allow_zone_to_group(&self, zone_id: &str, group: &NetworkMacroGroup) -> Result<(), ControllerError> {
        let template_id = self.scope.ingress_template_id.as_deref().ok_or_else(|| {
            ControllerError::InvalidConfig("no ingress policy template was set up".to_string())
        })?;
        let entry = AclEntry::allow(
            format!("Allow traffic to {}", group.name),
            (scope::ZONE, Some(zone_id.to_string())),
            (scope::NETWORK_MACRO_GROUP, group.id.clone()),
            SERVICE_RULE_PRIORITY,
        );
        self.vsd
            .create_acl_entry(template_id, AclDirection::Ingress, &entry)
            .await
            .map_err(|e| e.context(format!("add ingress rule for {}", group.name)))?;
        Ok(())
    }

    async fn fetch_zone(&self, name: &str) -> Result<Option<Zone>, ControllerError> {
        self.vsd
            .find_zone(&self.scope.domain_id, name)
            .await
            .map_err(|e| e.context(format!("fetch zone {}", name)).into())
    }

    async fn fetch_macro_group(&self, name: &str) -> Result<Option<NetworkMacroGroup>, ControllerError> {
        let groups = self
            .vsd
            .list_network_macro_groups(&self.scope.enterprise_id)
            .await
            .map_err(|e| e.context(format!("fetch network macro group {}", name)))?;
        Ok(groups.into_iter().find(|g| g.name == name))
    }
}
