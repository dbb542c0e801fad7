//! A VSD subnet bound to a namespace zone, with its local address allocator.

use crate::error::{AllocatorError, ControllerError};
use crate::ipam::SubnetAllocator;
use ipnet::Ipv4Net;
use std::net::Ipv4Addr;
use tracing::warn;
use vsd_client::Subnet;

/// Subnet of a namespace zone.
///
/// `custom` subnets were declared by an operator outside the cluster CIDR
/// pool; pods only land on them through placement directives.
#[derive(Debug, Clone)]
pub struct PodSubnet {
    remote: Subnet,
    id: String,
    network: Ipv4Net,
    custom: bool,
    allocator: SubnetAllocator,
}

impl PodSubnet {
    /// Wrap a subnet returned by the VSD.
    ///
    /// The gateway address, when the VSD reports one inside the subnet, is
    /// reserved so it is never handed to a pod.
    pub fn from_remote(remote: Subnet, custom: bool) -> Result<Self, ControllerError> {
        let id = remote
            .id
            .clone()
            .ok_or_else(|| ControllerError::MalformedObject(format!("subnet {} has no ID", remote.name)))?;
        let network = parse_network(&remote.address, &remote.netmask)
            .ok_or_else(|| {
                ControllerError::MalformedObject(format!(
                    "subnet {} has invalid address {}/{}",
                    remote.name, remote.address, remote.netmask
                ))
            })?;

        let mut allocator = SubnetAllocator::new(network);
        if let Some(gateway) = remote.gateway.as_deref() {
            match gateway.parse::<Ipv4Addr>() {
                Ok(addr) if allocator.contains(addr) => {
                    if let Err(e) = allocator.allocate(addr) {
                        warn!("Subnet {}: cannot reserve gateway {}: {}", remote.name, addr, e);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("Subnet {}: ignoring unparsable gateway {:?}: {}", remote.name, gateway, e),
            }
        }

        Ok(Self {
            remote,
            id,
            network,
            custom,
            allocator,
        })
    }

    pub fn name(&self) -> &str {
        &self.remote.name
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn network(&self) -> Ipv4Net {
        self.network
    }

    pub fn netmask(&self) -> &str {
        &self.remote.netmask
    }

    pub fn gateway(&self) -> Option<&str> {
        self.remote.gateway.as_deref()
    }

    pub fn is_custom(&self) -> bool {
        self.custom
    }

    /// True if `address` is a host address of this subnet
    pub fn contains(&self, address: Ipv4Addr) -> bool {
        self.allocator.contains(address)
    }

    pub fn allocate_next(&mut self) -> Result<Ipv4Addr, AllocatorError> {
        self.allocator.allocate_next()
    }

    pub fn allocate(&mut self, address: Ipv4Addr) -> Result<(), AllocatorError> {
        self.allocator.allocate(address)
    }

    pub fn release(&mut self, address: Ipv4Addr) -> bool {
        self.allocator.release(address)
    }

    pub fn is_allocated(&self, address: Ipv4Addr) -> bool {
        self.allocator.is_allocated(address)
    }

    pub fn free(&self) -> u32 {
        self.allocator.free()
    }
}

/// Parse a VSD address/netmask pair into a network
pub fn parse_network(address: &str, netmask: &str) -> Option<Ipv4Net> {
    let address: Ipv4Addr = address.parse().ok()?;
    let netmask: Ipv4Addr = netmask.parse().ok()?;
    Ipv4Net::with_netmask(address, netmask).ok().map(|n| n.trunc())
}

/// Dotted netmask of a network, as the VSD expects it
pub fn netmask_of(network: &Ipv4Net) -> String {
    network.netmask().to_string()
}
