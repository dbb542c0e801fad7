//! Controller-specific error types.
//!
//! Client crates bring their own errors; this module wraps them and adds the
//! failures that only make sense inside the agent (address allocation,
//! namespace readiness, custom placement).

use etcd_election::{ElectionError, StoreError};
use ipnet::Ipv4Net;
use kube::Error as KubeError;
use node_agent_client::NodeAgentError;
use std::net::Ipv4Addr;
use thiserror::Error;
use vsd_client::VsdError;

/// Errors that can occur in the SDN agent.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// VSD API error
    #[error("VSD error: {0}")]
    Vsd(#[from] VsdError),

    /// Node agent error
    #[error("Node agent error: {0}")]
    NodeAgent(#[from] NodeAgentError),

    /// Leader election or host registration failed
    #[error("Election error: {0}")]
    Election(#[from] ElectionError),

    /// Coordination store could not be reached
    #[error("Coordination store error: {0}")]
    Store(#[from] StoreError),

    /// Address allocation failed
    #[error("Allocation failed: {0}")]
    Allocation(#[from] AllocatorError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Neither a zone subnet nor the CIDR pool has room for another pod
    #[error("No address space left: {0}")]
    PoolExhausted(String),

    /// Namespace zone did not show up in time
    #[error("Namespace not ready: {0}")]
    NamespaceNotReady(String),

    /// Pod carries placement directives that cannot be honoured
    #[error("Invalid placement directive: {0}")]
    Placement(String),

    /// Object returned by the VSD lacks a field the agent relies on
    #[error("Malformed VSD object: {0}")]
    MalformedObject(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Metric registration or encoding failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Health endpoint could not be served
    #[error("Health server error: {0}")]
    Health(#[from] std::io::Error),
}

/// Errors of a single subnet's address allocator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocatorError {
    /// Address is already handed out
    #[error("address {0} is already allocated")]
    AlreadyAllocated(Ipv4Addr),

    /// Address is not a host address of the subnet
    #[error("address {address} is out of range for {network}")]
    OutOfRange { address: Ipv4Addr, network: Ipv4Net },

    /// No free address left
    #[error("no free address left in {0}")]
    PoolExhausted(Ipv4Net),
}
