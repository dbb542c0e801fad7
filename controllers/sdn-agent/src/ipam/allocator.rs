//! Address allocator for one subnet.
//!
//! Host addresses are tracked in a bitset indexed by their offset from the
//! first usable address. Network and broadcast addresses are never handed
//! out, except in /31 and /32 subnets where every address is usable.

use crate::error::AllocatorError;
use ipnet::Ipv4Net;
use std::net::Ipv4Addr;

#[derive(Debug, Clone)]
pub struct SubnetAllocator {
    network: Ipv4Net,
    first: u32,
    size: u32,
    used: Vec<u64>,
    allocated: u32,
}

impl SubnetAllocator {
    pub fn new(network: Ipv4Net) -> Self {
        let network = network.trunc();
        let start = u32::from(network.network());
        let end = u32::from(network.broadcast());
        let (first, last) = if network.prefix_len() >= 31 {
            (start, end)
        } else {
            (start + 1, end - 1)
        };
        let size = last - first + 1;
        Self {
            network,
            first,
            size,
            used: vec![0; size.div_ceil(64) as usize],
            allocated: 0,
        }
    }

    pub fn network(&self) -> Ipv4Net {
        self.network
    }

    /// Number of host addresses
    pub fn capacity(&self) -> u32 {
        self.size
    }

    /// Number of addresses currently handed out
    pub fn allocated(&self) -> u32 {
        self.allocated
    }

    pub fn free(&self) -> u32 {
        self.size - self.allocated
    }

    /// Hand out the lowest free address
    pub fn allocate_next(&mut self) -> Result<Ipv4Addr, AllocatorError> {
        for (word_index, word) in self.used.iter_mut().enumerate() {
            if *word == u64::MAX {
                continue;
            }
            let bit = (!*word).trailing_zeros();
            let offset = word_index as u32 * 64 + bit;
            if offset >= self.size {
                break;
            }
            *word |= 1 << bit;
            self.allocated += 1;
            return Ok(Ipv4Addr::from(self.first + offset));
        }
        Err(AllocatorError::PoolExhausted(self.network))
    }

    /// Mark `address` as handed out
    pub fn allocate(&mut self, address: Ipv4Addr) -> Result<(), AllocatorError> {
        let offset = self.offset(address)?;
        let (word, mask) = Self::slot(offset);
        if self.used[word] & mask != 0 {
            return Err(AllocatorError::AlreadyAllocated(address));
        }
        self.used[word] |= mask;
        self.allocated += 1;
        Ok(())
    }

    /// Return `address` to the free set; true if it was allocated
    pub fn release(&mut self, address: Ipv4Addr) -> bool {
        let Ok(offset) = self.offset(address) else {
            return false;
        };
        let (word, mask) = Self::slot(offset);
        if self.used[word] & mask == 0 {
            return false;
        }
        self.used[word] &= !mask;
        self.allocated -= 1;
        true
    }

    pub fn is_allocated(&self, address: Ipv4Addr) -> bool {
        self.offset(address)
            .map(|offset| {
                let (word, mask) = Self::slot(offset);
                self.used[word] & mask != 0
            })
            .unwrap_or(false)
    }

    /// True if `address` is a host address of this subnet
    pub fn contains(&self, address: Ipv4Addr) -> bool {
        self.offset(address).is_ok()
    }

    fn offset(&self, address: Ipv4Addr) -> Result<u32, AllocatorError> {
        let value = u32::from(address);
        match value.checked_sub(self.first) {
            Some(offset) if offset < self.size => Ok(offset),
            _ => Err(AllocatorError::OutOfRange {
                address,
                network: self.network,
            }),
        }
    }

    fn slot(offset: u32) -> (usize, u64) {
        ((offset / 64) as usize, 1u64 << (offset % 64))
    }
}
