//! Node agent client
//!
//! Every cluster node runs an agent that caches the network attachment of the
//! pods scheduled on it, for consumption by the node's CNI plugin. The control
//! plane pushes attachments with `PUT`, reads them back with `GET` and drops
//! them with `DELETE`, all over mutual TLS under `/nuage/containers/`.

pub mod client;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod agent_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use agent_trait::NodeAgentTrait;
pub use client::{NodeAgentClient, NodeAgentTls};
pub use error::NodeAgentError;
pub use models::*;
#[cfg(feature = "test-util")]
pub use mock::MockNodeAgent;
