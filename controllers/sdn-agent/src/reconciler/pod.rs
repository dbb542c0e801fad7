//! Pod reconciliation.
//!
//! A new pod gets its VSD container from the first case that applies:
//!
//! 1. the container already exists on the VSD (agent restart, replayed
//!    event): its attachment is reused as is;
//! 2. the pod carries `nuage.io/` placement directives: the address comes
//!    from the named custom subnet;
//! 3. otherwise the address comes from the namespace's default subnets,
//!    adopting a new prefix from the CIDR pool when they are all full.
//!
//! The attachment is then pushed to the node agent of the pod's node, or
//! held until the pod is scheduled.

use crate::error::ControllerError;
use crate::ipam::CidrPool;
use crate::reconciler::Reconciler;
use crate::sdn::subnet::netmask_of;
use crate::sdn::{AttachmentRecord, NamespaceZone, PodSubnet, SdnState, naming};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use node_agent_client::NodeAttachment;
use std::fmt;
use std::net::Ipv4Addr;
use tracing::{debug, error, info, warn};
use vsd_client::{Container, ContainerInterface, ContainerInterfaceEntry, ORCHESTRATION_ID, Subnet};

/// Prefix of the placement directive keys
pub const DIRECTIVE_PREFIX: &str = "nuage.io/";

/// Which case produced a pod's attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodOutcome {
    AlreadyAttached,
    Custom,
    Default,
}

impl PodOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            PodOutcome::AlreadyAttached => "attached",
            PodOutcome::Custom => "custom",
            PodOutcome::Default => "default",
        }
    }
}

/// Placement directives of a pod.
///
/// Read from annotations, falling back to labels:
/// `nuage.io/Subnet`, `nuage.io/IPAddress` and `nuage.io/PolicyGroup`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Placement {
    pub subnet: Option<String>,
    pub address: Option<Ipv4Addr>,
    pub policy_group: Option<String>,
}

impl Placement {
    pub fn from_pod(pod: &Pod) -> Result<Self, ControllerError> {
        let mut placement = Self::default();
        // Annotations are applied last and win
        for map in [pod.labels(), pod.annotations()] {
            for (key, value) in map {
                let Some(directive) = key.strip_prefix(DIRECTIVE_PREFIX) else {
                    continue;
                };
                let value = value.trim();
                if value.is_empty() {
                    continue;
                }
                match directive {
                    "Subnet" => placement.subnet = Some(value.to_string()),
                    "IPAddress" => {
                        let address = value.parse().map_err(|_| {
                            ControllerError::Placement(format!("{}IPAddress {:?} is not an IPv4 address", DIRECTIVE_PREFIX, value))
                        })?;
                        placement.address = Some(address);
                    }
                    "PolicyGroup" => placement.policy_group = Some(value.to_string()),
                    other => debug!("Ignoring unknown directive {}{}", DIRECTIVE_PREFIX, other),
                }
            }
        }
        Ok(placement)
    }

    /// True if the directives constrain where the address comes from
    pub fn requests_placement(&self) -> bool {
        self.subnet.is_some() || self.address.is_some()
    }
}

/// The fields of a pod the reconciler works with
#[derive(Debug, Clone)]
pub(crate) struct PodRef {
    pub name: String,
    pub namespace: String,
    pub uid: String,
    pub node: Option<String>,
    pub container: String,
}

impl PodRef {
    pub fn new(pod: &Pod) -> Self {
        let name = pod.name_any();
        let namespace = pod.namespace().unwrap_or_else(|| "default".to_string());
        let node = pod
            .spec
            .as_ref()
            .and_then(|s| s.node_name.clone())
            .filter(|n| !n.is_empty());
        Self {
            container: naming::container_name(&name, &namespace),
            uid: pod.uid().unwrap_or_default(),
            name,
            namespace,
            node,
        }
    }
}

impl fmt::Display for PodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl Reconciler {
    /// Give a new pod its network attachment
    pub async fn pod_created(&self, pod: &Pod) -> Result<PodOutcome, ControllerError> {
        let result = self.attach_pod(pod).await;
        let outcome = result.as_ref().map_or("error", |o| o.as_str());
        self.metrics.event("pod", "add", outcome);
        result
    }

    /// Push the held attachment once a pod gets scheduled.
    ///
    /// Only the unscheduled to scheduled transition is handled.
    pub async fn pod_updated(&self, old: &Pod, new: &Pod) -> Result<(), ControllerError> {
        let before = PodRef::new(old);
        let pod = PodRef::new(new);
        let Some(node) = pod.node.as_deref() else {
            return Ok(());
        };
        if before.node.is_some() {
            return Ok(());
        }

        let held = self.pending.lock().await.get(&pod.container).cloned();
        let Some(attachment) = held else {
            debug!("Pod {} scheduled on {} with no held attachment", pod, node);
            return Ok(());
        };

        info!("Pod {} scheduled on {}, notifying its node agent", pod, node);
        match self.node_agent.put_attachment(node, &attachment).await {
            Ok(()) => {
                self.pending.lock().await.remove(&pod.container);
                self.metrics.event("pod", "update", "delivered");
                info!("Pod {}: container {} submitted to node agent on {}", pod, pod.container, node);
                Ok(())
            }
            Err(e) => {
                self.metrics.event("pod", "update", "error");
                error!(
                    "Pod {}: failed to submit container {} to node agent on {}: {}",
                    pod, pod.container, node, e
                );
                Err(e.into())
            }
        }
    }

    /// Release a deleted pod's address and clean up after it.
    ///
    /// Every step is best effort; only the local release is required for
    /// the address to be reused.
    pub async fn pod_deleted(&self, pod: &Pod) -> Result<(), ControllerError> {
        let pod = PodRef::new(pod);
        info!("Pod {} deleted", pod);

        let mut address = {
            let mut state = self.cache.lock().await;
            state
                .zones
                .get_mut(&pod.namespace)
                .and_then(|zone| zone.take_attachment(&pod.container))
                .map(|record| record.address)
        };

        let node_has_it = match pod.node.as_deref() {
            Some(node) => match self.node_agent.get_attachment(node, &pod.container).await {
                Ok(attachment) => {
                    if address.is_none() {
                        address = attachment.ip_address.parse().ok();
                    }
                    true
                }
                Err(e) => {
                    warn!(
                        "Pod {}: cannot fetch container {} from node agent on {}: {}",
                        pod, pod.container, node, e
                    );
                    false
                }
            },
            None => false,
        };

        if !node_has_it {
            let found = self.remove_container(&pod).await;
            address = address.or(found);
        }

        if let Some(address) = address {
            let released = {
                let mut state = self.cache.lock().await;
                state
                    .zones
                    .get_mut(&pod.namespace)
                    .and_then(|zone| zone.release(address))
            };
            match released {
                Some(subnet) => {
                    self.metrics.addresses_released.inc();
                    info!("Pod {}: released address {} on subnet {}", pod, address, subnet);
                }
                None => debug!("Pod {}: address {} was not allocated", pod, address),
            }
        }

        if let Some(node) = pod.node.as_deref() {
            if let Err(e) = self.node_agent.delete_attachment(node, &pod.container).await {
                debug!("Pod {}: node agent on {} did not delete {}: {}", pod, node, pod.container, e);
            }
        }
        self.pending.lock().await.remove(&pod.container);
        self.metrics.event("pod", "delete", "ok");
        Ok(())
    }

    async fn attach_pod(&self, raw: &Pod) -> Result<PodOutcome, ControllerError> {
        let pod = PodRef::new(raw);
        if pod.uid.is_empty() {
            return Err(ControllerError::MalformedObject(format!("pod {} has no UID", pod)));
        }
        info!("Pod {} created", pod);
        self.cache.wait_for_namespace(&pod.namespace, self.namespace_wait).await?;

        if let Some(attachment) = self.existing_attachment(&pod).await? {
            self.deliver(&pod, attachment).await?;
            return Ok(PodOutcome::AlreadyAttached);
        }

        let placement = Placement::from_pod(raw)?;
        if let Some(group) = placement.policy_group.as_deref() {
            info!("Pod {}: policy group {} requested, using default placement rules", pod, group);
        }
        let (outcome, attachment) = if placement.requests_placement() {
            info!("Pod {}: custom placement {:?}", pod, placement);
            (PodOutcome::Custom, self.attach_custom(&pod, &placement).await?)
        } else {
            (PodOutcome::Default, self.attach_default(&pod).await?)
        };
        self.deliver(&pod, attachment).await?;
        Ok(outcome)
    }

    /// Attachment of a container the VSD already has for this pod
    async fn existing_attachment(&self, pod: &PodRef) -> Result<Option<NodeAttachment>, ControllerError> {
        let scope = self.cache.scope();
        let container = self
            .cache
            .vsd()
            .find_container(&scope.domain_id, &pod.container)
            .await
            .map_err(|e| e.context(format!("fetch container {}", pod.container)))?;
        let Some(container) = container else {
            return Ok(None);
        };
        let iface = container.primary_interface().ok_or_else(|| {
            ControllerError::MalformedObject(format!("container {} has no interface details", container.name))
        })?;
        let address: Ipv4Addr = iface.ip_address.parse().map_err(|_| {
            ControllerError::MalformedObject(format!(
                "container {} has invalid address {:?}",
                container.name, iface.ip_address
            ))
        })?;

        let mut state = self.cache.lock().await;
        let zone = zone_of(&mut state, &pod.namespace)?;
        let subnet_name = match zone.subnets().iter().position(|s| s.id() == iface.attached_network_id) {
            Some(index) => {
                let subnet = zone.subnet_mut(index);
                if let Some(subnet) = subnet {
                    if subnet.contains(address) && !subnet.is_allocated(address) && subnet.allocate(address).is_ok() {
                        debug!("Pod {}: reserved existing address {} on {}", pod, address, subnet.name());
                    }
                }
                zone.subnet(index).map(|s| s.name().to_string())
            }
            None => iface.network_name.clone(),
        };
        zone.record_attachment(
            &pod.container,
            AttachmentRecord {
                subnet_id: iface.attached_network_id.clone(),
                address,
            },
        );
        info!(
            "Pod {} already attached: container {} ({}) with address {}/{}",
            pod, container.name, container.uuid, address, iface.netmask
        );

        Ok(Some(NodeAttachment {
            name: container.name.clone(),
            uuid: container.uuid.clone(),
            orchestration_id: container.orchestration_id.clone(),
            enterprise: scope.enterprise_name.clone(),
            domain: scope.domain_name.clone(),
            zone: zone.name().to_string(),
            subnet: subnet_name.unwrap_or_default(),
            ip_address: address.to_string(),
            netmask: iface.netmask.clone(),
            mac: iface.mac.clone(),
            gateway: iface.gateway.clone(),
        }))
    }

    async fn attach_custom(&self, pod: &PodRef, placement: &Placement) -> Result<NodeAttachment, ControllerError> {
        let Some(subnet_name) = placement.subnet.as_deref() else {
            return Err(ControllerError::Placement(format!(
                "pod {}: {}IPAddress given without {}Subnet",
                pod, DIRECTIVE_PREFIX, DIRECTIVE_PREFIX
            )));
        };

        let mut state = self.cache.lock().await;
        let zone = zone_of(&mut state, &pod.namespace)?;
        let index = zone.custom_subnet(subnet_name).ok_or_else(|| {
            ControllerError::Placement(format!(
                "pod {}: no custom subnet named {} in namespace {}",
                pod, subnet_name, pod.namespace
            ))
        })?;
        let subnet = subnet_at(zone, index)?;
        let address = match placement.address {
            Some(address) => {
                subnet.allocate(address).map_err(|e| {
                    error!("Pod {}: cannot allocate {} on custom subnet {}: {}", pod, address, subnet_name, e);
                    e
                })?;
                address
            }
            None => subnet.allocate_next().map_err(|e| {
                error!("Pod {}: no free address on custom subnet {}: {}", pod, subnet_name, e);
                e
            })?,
        };
        info!("Pod {}: allocated {} on custom subnet {}", pod, address, subnet_name);

        self.create_container(pod, zone, index, address).await
    }

    async fn attach_default(&self, pod: &PodRef) -> Result<NodeAttachment, ControllerError> {
        let mut guard = self.cache.lock().await;
        let SdnState { zones, pool, .. } = &mut *guard;
        let zone = zones.get_mut(&pod.namespace).ok_or_else(|| not_ready(&pod.namespace))?;

        let (index, address) = match zone.allocate_default() {
            Some(found) => found,
            None => {
                info!("Pod {}: default subnets of namespace {} are full", pod, pod.namespace);
                let index = self.adopt_prefix(zone, pool).await?;
                let address = subnet_at(zone, index)?.allocate_next()?;
                (index, address)
            }
        };
        if let Some(subnet) = zone.subnet(index) {
            info!("Pod {}: allocated {} on subnet {}", pod, address, subnet.name());
        }

        self.create_container(pod, zone, index, address).await
    }

    /// Turn the lowest free pool prefix into a new subnet of `zone`.
    ///
    /// Prefixes the VSD refuses as already existing are set aside in the
    /// pool and the next one is tried.
    async fn adopt_prefix(&self, zone: &mut NamespaceZone, pool: &mut CidrPool) -> Result<usize, ControllerError> {
        let mut attempt = 0;
        while let Some(prefix) = pool.first() {
            let wanted = Subnet {
                name: zone.next_subnet_name(attempt),
                address: prefix.network().to_string(),
                netmask: netmask_of(&prefix),
                description: Some(format!("Subnet of K8S namespace {}", zone.namespace())),
                ..Default::default()
            };
            match self.cache.vsd().create_subnet(zone.id(), &wanted).await {
                Ok(remote) => {
                    pool.take(&prefix);
                    let subnet = PodSubnet::from_remote(remote, false)?;
                    info!("Zone {}: adopted prefix {} as subnet {}", zone.name(), prefix, subnet.name());
                    self.metrics.subnets_adopted.inc();
                    return Ok(zone.add_subnet(subnet));
                }
                Err(e) if e.is_conflict() => {
                    warn!(
                        "Zone {}: subnet {} ({}) already exists on the VSD, setting the prefix aside: {}",
                        zone.name(),
                        wanted.name,
                        prefix,
                        e
                    );
                    pool.set_aside(&prefix);
                    attempt += 1;
                }
                Err(e) => {
                    return Err(e.context(format!("create subnet {} ({})", wanted.name, prefix)).into());
                }
            }
        }
        Err(ControllerError::PoolExhausted(format!(
            "no free prefix left in the CIDR pool for namespace {}",
            zone.namespace()
        )))
    }

    /// Create the VSD container for an allocated address; the address is
    /// released again if the VSD refuses the container
    async fn create_container(
        &self,
        pod: &PodRef,
        zone: &mut NamespaceZone,
        index: usize,
        address: Ipv4Addr,
    ) -> Result<NodeAttachment, ControllerError> {
        let subnet = zone.subnet(index).ok_or_else(|| missing_subnet(index))?;
        let (subnet_id, subnet_name) = (subnet.id().to_string(), subnet.name().to_string());
        let iface = ContainerInterface {
            ip_address: address.to_string(),
            mac: naming::random_mac(),
            netmask: subnet.netmask().to_string(),
            attached_network_id: subnet_id.clone(),
            gateway: subnet.gateway().map(ToString::to_string),
            ..Default::default()
        };
        let container = Container {
            id: None,
            name: pod.container.clone(),
            uuid: naming::container_uuid(&pod.uid),
            orchestration_id: ORCHESTRATION_ID.to_string(),
            interfaces: vec![ContainerInterfaceEntry::Detailed(iface.clone())],
        };

        if let Err(e) = self.cache.vsd().create_container(&container).await {
            if let Some(subnet) = zone.subnet_mut(index) {
                subnet.release(address);
            }
            error!("Pod {}: cannot create container {}, released {}: {}", pod, container.name, address, e);
            return Err(e.context(format!("create container {}", container.name)).into());
        }

        zone.record_attachment(&pod.container, AttachmentRecord { subnet_id, address });
        self.metrics.addresses_allocated.inc();
        info!(
            "Pod {}: created container {} with address {} on subnet {}",
            pod, container.name, address, subnet_name
        );

        let scope = self.cache.scope();
        Ok(NodeAttachment {
            name: container.name,
            uuid: container.uuid,
            orchestration_id: container.orchestration_id,
            enterprise: scope.enterprise_name.clone(),
            domain: scope.domain_name.clone(),
            zone: zone.name().to_string(),
            subnet: subnet_name,
            ip_address: iface.ip_address,
            netmask: iface.netmask,
            mac: iface.mac,
            gateway: iface.gateway,
        })
    }

    /// Push an attachment to the pod's node, or hold it until the pod is
    /// scheduled
    async fn deliver(&self, pod: &PodRef, attachment: NodeAttachment) -> Result<(), ControllerError> {
        match pod.node.as_deref() {
            Some(node) => {
                self.node_agent.put_attachment(node, &attachment).await.map_err(|e| {
                    error!(
                        "Pod {}: failed to submit container {} to node agent on {}: {}",
                        pod, attachment.name, node, e
                    );
                    e
                })?;
                info!("Pod {}: container {} submitted to node agent on {}", pod, attachment.name, node);
            }
            None => {
                info!("Pod {} is not scheduled yet, holding container {}", pod, attachment.name);
                self.pending.lock().await.insert(attachment.name.clone(), attachment);
            }
        }
        Ok(())
    }

    /// Delete whatever container the VSD still has for this pod; returns
    /// its address when known
    async fn remove_container(&self, pod: &PodRef) -> Option<Ipv4Addr> {
        let scope = self.cache.scope();
        let container = match self.cache.vsd().find_container(&scope.domain_id, &pod.container).await {
            Ok(Some(container)) => container,
            Ok(None) => return None,
            Err(e) => {
                warn!("Pod {}: cannot look up container {} on the VSD: {}", pod, pod.container, e);
                return None;
            }
        };

        info!("Pod {}: cleaning up container {} left on the VSD", pod, container.name);
        if let Some(id) = container.id.as_deref() {
            if let Err(e) = self.cache.vsd().delete_container(id).await {
                warn!("Pod {}: cannot delete container {}: {}", pod, container.name, e);
            }
        }
        container
            .primary_interface()
            .and_then(|iface| iface.ip_address.parse().ok())
    }
}

fn zone_of<'a>(state: &'a mut SdnState, namespace: &str) -> Result<&'a mut NamespaceZone, ControllerError> {
    state.zones.get_mut(namespace).ok_or_else(|| not_ready(namespace))
}

fn subnet_at(zone: &mut NamespaceZone, index: usize) -> Result<&mut PodSubnet, ControllerError> {
    zone.subnet_mut(index).ok_or_else(|| missing_subnet(index))
}

fn not_ready(namespace: &str) -> ControllerError {
    ControllerError::NamespaceNotReady(format!("namespace {} has no zone", namespace))
}

fn missing_subnet(index: usize) -> ControllerError {
    ControllerError::MalformedObject(format!("zone has no subnet #{}", index))
}
