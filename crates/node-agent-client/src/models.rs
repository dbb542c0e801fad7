//! Node agent data models

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Path under which the agent serves container attachments
pub const CONTAINER_PATH: &str = "/nuage/containers/";
/// Idle connections kept per node
pub const MAX_IDLE_CONNS: usize = 256;
/// How long an idle connection is kept
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(7);

/// Attachment record pushed to a node
///
/// Carries names rather than VSD identifiers; the node checks enterprise,
/// domain, zone and subnet against its own configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeAttachment {
    /// Container name, `<pod>_<namespace>`
    pub name: String,
    #[serde(rename = "UUID")]
    pub uuid: String,
    #[serde(rename = "orchestrationID")]
    pub orchestration_id: String,
    pub enterprise: String,
    pub domain: String,
    pub zone: String,
    pub subnet: String,
    #[serde(rename = "IPAddress")]
    pub ip_address: String,
    pub netmask: String,
    #[serde(rename = "MAC")]
    pub mac: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
}

impl NodeAttachment {
    /// Prefix length derived from the dotted netmask
    pub fn prefix_len(&self) -> Option<u8> {
        let mask: std::net::Ipv4Addr = self.netmask.parse().ok()?;
        let bits = u32::from(mask);
        // Contiguous masks only
        if bits.leading_ones() + bits.trailing_zeros() != 32 {
            return None;
        }
        u8::try_from(bits.leading_ones()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names() {
        let attachment = NodeAttachment {
            name: "web_default".to_string(),
            uuid: "ab".repeat(32),
            orchestration_id: "Kubernetes".to_string(),
            enterprise: "k8s".to_string(),
            domain: "cluster".to_string(),
            zone: "K8S namespace default".to_string(),
            subnet: "default-0".to_string(),
            ip_address: "10.0.0.2".to_string(),
            netmask: "255.255.255.0".to_string(),
            mac: "02:00:00:00:00:02".to_string(),
            gateway: None,
        };
        let value = serde_json::to_value(&attachment).unwrap();
        assert_eq!(value["IPAddress"], "10.0.0.2");
        assert_eq!(value["orchestrationID"], "Kubernetes");
        assert!(value.get("gateway").is_none());
        assert_eq!(attachment.prefix_len(), Some(24));
    }

    #[test]
    fn test_prefix_len_rejects_holes() {
        let attachment = NodeAttachment {
            netmask: "255.0.255.0".to_string(),
            ..Default::default()
        };
        assert_eq!(attachment.prefix_len(), None);
    }
}
