//! Pool of subnet prefixes carved out of the cluster CIDR.
//!
//! The pool is computed once at startup. A prefix leaves the pool when a
//! namespace zone adopts it, either because the VSD already has a subnet with
//! that prefix or because the agent just created one, and it never comes back.
//!
//! A prefix the VSD refuses as already in use is set aside rather than
//! forgotten: it is no longer handed out, but the zone that owns it still
//! recognises it as part of the cluster network when it loads.

use crate::error::ControllerError;
use ipnet::Ipv4Net;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use tracing::info;

/// Upper bound on the number of prefixes kept in the pool
pub const MAX_POOL_ENTRIES: usize = 2048;

/// Unused subnet prefixes, in ascending order
#[derive(Debug, Clone, Default)]
pub struct CidrPool {
    free: BTreeSet<Ipv4Net>,
    // refused by the VSD, owned by a zone not loaded yet
    claimed: BTreeSet<Ipv4Net>,
}

impl CidrPool {
    /// Split `cluster` into subnets `subnet_bits` longer than its prefix.
    ///
    /// At most `max_entries` prefixes are generated, starting from the base
    /// of the cluster CIDR. Fails when the derived prefix length leaves no
    /// room for host addresses.
    pub fn build(cluster: Ipv4Net, subnet_bits: u8, max_entries: usize) -> Result<Self, ControllerError> {
        let prefix_len = u32::from(cluster.prefix_len()) + u32::from(subnet_bits);
        if prefix_len >= 32 {
            return Err(ControllerError::InvalidConfig(format!(
                "subnet length {} of {} yields a /{} prefix",
                subnet_bits, cluster, prefix_len
            )));
        }

        let candidates = 1u64.checked_shl(u32::from(subnet_bits)).unwrap_or(u64::MAX);
        let count = candidates.min(max_entries as u64);
        let step = 1u64 << (32 - prefix_len);
        let base = u64::from(u32::from(cluster.network()));

        let mut free = BTreeSet::new();
        for i in 0..count {
            let address = u32::try_from(base + i * step).map_err(|_| {
                ControllerError::InvalidConfig(format!("{} overflows the IPv4 address space", cluster))
            })?;
            let net = Ipv4Net::new(Ipv4Addr::from(address), prefix_len as u8)
                .map_err(|e| ControllerError::InvalidConfig(e.to_string()))?;
            free.insert(net);
        }

        info!(
            "CIDR pool: {} subnets of /{} from cluster network {}",
            free.len(),
            prefix_len,
            cluster
        );
        Ok(Self {
            free,
            claimed: BTreeSet::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }

    pub fn contains(&self, prefix: &Ipv4Net) -> bool {
        self.free.contains(prefix)
    }

    /// Remove `prefix` from the pool; true if it belongs to the cluster
    /// network and no zone has adopted it yet, whether it was still free or
    /// set aside
    pub fn take(&mut self, prefix: &Ipv4Net) -> bool {
        let free = self.free.remove(prefix);
        self.claimed.remove(prefix) || free
    }

    /// Stop handing out `prefix` because a subnet elsewhere already uses it.
    /// A later [`take`](Self::take) of the same prefix still succeeds.
    pub fn set_aside(&mut self, prefix: &Ipv4Net) -> bool {
        if !self.free.remove(prefix) {
            return false;
        }
        self.claimed.insert(*prefix);
        true
    }

    /// True if `prefix` was set aside and no zone has adopted it since
    pub fn is_set_aside(&self, prefix: &Ipv4Net) -> bool {
        self.claimed.contains(prefix)
    }

    /// Lowest free prefix, left in the pool
    pub fn first(&self) -> Option<Ipv4Net> {
        self.free.first().copied()
    }

    /// Free prefixes in ascending order
    pub fn iter(&self) -> impl Iterator<Item = &Ipv4Net> {
        self.free.iter()
    }
}
