//! Leader election over a TTL key store
//!
//! Agents register a per-host key and then compete for a shared leader key.
//! Both keys carry a TTL and are kept alive by a renewal loop; losing either
//! key is fatal to the holder.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use etcd_election::{ElectionConfig, EtcdStore, LeaderElector};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = EtcdStore::connect(&["http://127.0.0.1:2379".to_string()], None).await?;
//! let elector = LeaderElector::new(Arc::new(store), ElectionConfig::new("node-1"));
//!
//! // Fails with DuplicateIdentity if another agent already owns this host key
//! let host_lease = elector.register_host().await?;
//!
//! // Blocks until this agent holds the leader key
//! let leader_lease = elector.acquire_leadership().await?;
//! # Ok(())
//! # }
//! ```

pub mod election;
#[cfg(test)]
mod election_test;
pub mod error;
pub mod etcd;
#[path = "trait.rs"]
pub mod store_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use election::{ElectionConfig, LeaderElector, LeaseHandle};
pub use error::{ElectionError, StoreError};
pub use etcd::{EtcdStore, EtcdTls};
pub use store_trait::{CoordinationStore, KeyWatch, WatchAction, WatchNotification};
#[cfg(any(test, feature = "test-util"))]
pub use mock::MemoryStore;
