//! Namespace zones and the subnets they own.
//!
//! Loading a zone rebuilds local state from the VSD: every subnet of the
//! zone is classified against the CIDR pool and its allocator is seeded with
//! the addresses of the container interfaces already attached to it.

use crate::error::ControllerError;
use crate::ipam::CidrPool;
use crate::sdn::naming;
use crate::sdn::subnet::{PodSubnet, parse_network};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use tracing::{debug, info, warn};
use vsd_client::{VsdClientTrait, Zone};

/// Where an attachment created or seen by this agent lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRecord {
    pub subnet_id: String,
    pub address: Ipv4Addr,
}

/// Zone of one Kubernetes namespace
#[derive(Debug)]
pub struct NamespaceZone {
    namespace: String,
    zone: Zone,
    zone_id: String,
    subnets: Vec<PodSubnet>,
    attachments: HashMap<String, AttachmentRecord>,
}

impl NamespaceZone {
    /// Build the local view of `zone` from the subnets the VSD reports.
    ///
    /// Prefixes found in `pool`, free or set aside, are adopted (removed from
    /// it); others are flagged as custom. Failures on individual subnets or addresses are
    /// logged and skipped.
    pub async fn load(
        vsd: &dyn VsdClientTrait,
        namespace: &str,
        zone: Zone,
        pool: &mut CidrPool,
    ) -> Result<Self, ControllerError> {
        let zone_id = zone
            .id
            .clone()
            .ok_or_else(|| ControllerError::MalformedObject(format!("zone {} has no ID", zone.name)))?;
        let remote_subnets = vsd
            .list_subnets(&zone_id)
            .await
            .map_err(|e| e.context(format!("list subnets of zone {}", zone.name)))?;

        let mut subnets = Vec::with_capacity(remote_subnets.len());
        for remote in remote_subnets {
            let Some(network) = parse_network(&remote.address, &remote.netmask) else {
                warn!(
                    "Zone {}: skipping subnet {} with invalid range {}/{}",
                    zone.name, remote.name, remote.address, remote.netmask
                );
                continue;
            };
            let custom = !pool.take(&network);
            if custom {
                info!("Zone {}: custom subnet {} ({}) found", zone.name, remote.name, network);
            } else {
                info!(
                    "Zone {}: subnet {} ({}) is part of the cluster network, reserving its range",
                    zone.name, remote.name, network
                );
            }

            let mut subnet = match PodSubnet::from_remote(remote, custom) {
                Ok(subnet) => subnet,
                Err(e) => {
                    warn!("Zone {}: skipping subnet: {}", zone.name, e);
                    continue;
                }
            };
            reserve_attached(vsd, &mut subnet).await;
            subnets.push(subnet);
        }

        Ok(Self {
            namespace: namespace.to_string(),
            zone,
            zone_id,
            subnets,
            attachments: HashMap::new(),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.zone.name
    }

    pub fn id(&self) -> &str {
        &self.zone_id
    }

    pub fn subnets(&self) -> &[PodSubnet] {
        &self.subnets
    }

    pub fn subnet(&self, index: usize) -> Option<&PodSubnet> {
        self.subnets.get(index)
    }

    pub fn subnet_mut(&mut self, index: usize) -> Option<&mut PodSubnet> {
        self.subnets.get_mut(index)
    }

    /// Index of the custom subnet called `name`
    pub fn custom_subnet(&self, name: &str) -> Option<usize> {
        self.subnets
            .iter()
            .position(|s| s.is_custom() && s.name() == name)
    }

    /// Allocate the lowest free address of the first non-custom subnet
    /// that still has one
    pub fn allocate_default(&mut self) -> Option<(usize, Ipv4Addr)> {
        self.subnets
            .iter_mut()
            .enumerate()
            .filter(|(_, s)| !s.is_custom())
            .find_map(|(i, s)| s.allocate_next().ok().map(|addr| (i, addr)))
    }

    /// Name for the next default subnet of this namespace, after
    /// `skipped` names the VSD already refused
    pub fn next_subnet_name(&self, skipped: usize) -> String {
        naming::subnet_name(&self.namespace, self.subnets.len() + skipped)
    }

    pub fn add_subnet(&mut self, subnet: PodSubnet) -> usize {
        self.subnets.push(subnet);
        self.subnets.len() - 1
    }

    /// Release `address` from whichever subnet holds it; returns that
    /// subnet's name if the address was allocated
    pub fn release(&mut self, address: Ipv4Addr) -> Option<String> {
        self.subnets
            .iter_mut()
            .find(|s| s.contains(address))
            .filter(|s| s.is_allocated(address))
            .map(|s| {
                s.release(address);
                s.name().to_string()
            })
    }

    pub fn record_attachment(&mut self, container: &str, record: AttachmentRecord) {
        self.attachments.insert(container.to_string(), record);
    }

    pub fn attachment(&self, container: &str) -> Option<&AttachmentRecord> {
        self.attachments.get(container)
    }

    pub fn take_attachment(&mut self, container: &str) -> Option<AttachmentRecord> {
        self.attachments.remove(container)
    }
}

/// Mark the addresses of existing container interfaces as allocated
async fn reserve_attached(vsd: &dyn VsdClientTrait, subnet: &mut PodSubnet) {
    let interfaces = match vsd.list_container_interfaces(subnet.id()).await {
        Ok(interfaces) => interfaces,
        Err(e) => {
            warn!(
                "Subnet {}: cannot list container interfaces, allocator starts empty: {}",
                subnet.name(),
                e
            );
            return;
        }
    };

    info!(
        "Subnet {}: found {} container interfaces in {}, reserving their addresses",
        subnet.name(),
        interfaces.len(),
        subnet.network()
    );
    for iface in interfaces {
        match iface.ip_address.parse::<Ipv4Addr>() {
            Ok(addr) => {
                if let Err(e) = subnet.allocate(addr) {
                    warn!("Subnet {}: cannot reserve {}: {}", subnet.name(), addr, e);
                }
            }
            Err(e) => warn!(
                "Subnet {}: skipping container interface with address {:?}: {}",
                subnet.name(),
                iface.ip_address,
                e
            ),
        }
    }
    debug!("Subnet {}: {} addresses free", subnet.name(), subnet.free());
}
