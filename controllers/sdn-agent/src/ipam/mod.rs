//! IP address management.
//!
//! - `cidr_pool`: subnet prefixes not yet adopted by any namespace
//! - `allocator`: address allocation inside one subnet

pub mod allocator;
#[cfg(test)]
mod allocator_test;
pub mod cidr_pool;

pub use allocator::SubnetAllocator;
pub use cidr_pool::{CidrPool, MAX_POOL_ENTRIES};
