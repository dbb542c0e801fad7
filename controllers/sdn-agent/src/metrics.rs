//! Prometheus metrics of the agent.

use crate::error::ControllerError;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Metrics exported on `/metrics`
#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Registry,
    /// Handled Kubernetes events, by resource, event and outcome
    pub events: IntCounterVec,
    pub addresses_allocated: IntCounter,
    pub addresses_released: IntCounter,
    /// Cluster CIDR prefixes turned into zone subnets by this agent
    pub subnets_adopted: IntCounter,
    /// 1 while this agent holds the leader key
    pub leader: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self, ControllerError> {
        let registry = Registry::new_custom(Some("sdn_agent".to_string()), None)?;

        let events = IntCounterVec::new(
            Opts::new("events_total", "Kubernetes events handled"),
            &["resource", "event", "outcome"],
        )?;
        let addresses_allocated = IntCounter::new("addresses_allocated_total", "Pod addresses allocated")?;
        let addresses_released = IntCounter::new("addresses_released_total", "Pod addresses released")?;
        let subnets_adopted = IntCounter::new("subnets_adopted_total", "Subnets created from the cluster CIDR pool")?;
        let leader = IntGauge::new("leader", "Whether this agent is the leader")?;

        registry.register(Box::new(events.clone()))?;
        registry.register(Box::new(addresses_allocated.clone()))?;
        registry.register(Box::new(addresses_released.clone()))?;
        registry.register(Box::new(subnets_adopted.clone()))?;
        registry.register(Box::new(leader.clone()))?;

        Ok(Self {
            registry,
            events,
            addresses_allocated,
            addresses_released,
            subnets_adopted,
            leader,
        })
    }

    /// Count one handled event
    pub fn event(&self, resource: &str, event: &str, outcome: &str) {
        self.events.with_label_values(&[resource, event, outcome]).inc();
    }

    /// Text exposition of every registered metric
    pub fn encode(&self) -> Result<String, ControllerError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| ControllerError::Metrics(prometheus::Error::Msg(e.to_string())))
    }
}
