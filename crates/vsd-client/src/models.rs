//! VSD data models
//!
//! Field names follow the VSD JSON API (`ID`, `parentID`, camelCase attributes).
//! Identifiers are `None` until the object exists on the VSD.

use serde::{Deserialize, Serialize};

/// Orchestration ID stamped on every container this agent creates
pub const ORCHESTRATION_ID: &str = "Kubernetes";

/// Session root returned by `GET /me`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Me {
    #[serde(rename = "ID", default)]
    pub id: Option<String>,
    #[serde(rename = "APIKey", default)]
    pub api_key: Option<String>,
    #[serde(rename = "userName", default)]
    pub user_name: Option<String>,
    #[serde(rename = "enterpriseID", default)]
    pub enterprise_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Enterprise {
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DomainTemplate {
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Domain {
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "templateID", default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
}

/// Zone: one Kubernetes namespace
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Zone {
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "parentID", default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

/// Subnet bound to a zone. Addresses are dotted-quad strings as on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Subnet {
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub address: String,
    pub netmask: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "parentID", default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

/// Enterprise network, used as the network macro of a Kubernetes service
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EnterpriseNetwork {
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub address: String,
    pub netmask: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkMacroGroup {
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Interface of a container endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerInterface {
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "IPAddress", default)]
    pub ip_address: String,
    #[serde(rename = "MAC", default)]
    pub mac: String,
    #[serde(default)]
    pub netmask: String,
    #[serde(rename = "attachedNetworkID", default)]
    pub attached_network_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    #[serde(rename = "zoneName", default, skip_serializing_if = "Option::is_none")]
    pub zone_name: Option<String>,
    #[serde(rename = "networkName", default, skip_serializing_if = "Option::is_none")]
    pub network_name: Option<String>,
}

/// Entry of a container's interface list
///
/// The VSD returns either full interface objects or bare interface IDs
/// depending on the API version and call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ContainerInterfaceEntry {
    Detailed(ContainerInterface),
    Id(String),
}

impl ContainerInterfaceEntry {
    pub fn detailed(&self) -> Option<&ContainerInterface> {
        match self {
            ContainerInterfaceEntry::Detailed(iface) => Some(iface),
            ContainerInterfaceEntry::Id(_) => None,
        }
    }
}

/// Container endpoint: the network identity of one pod
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Container {
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "UUID")]
    pub uuid: String,
    #[serde(rename = "orchestrationID", default)]
    pub orchestration_id: String,
    #[serde(default)]
    pub interfaces: Vec<ContainerInterfaceEntry>,
}

impl Container {
    /// The single interface carrying the container's address, if present
    pub fn primary_interface(&self) -> Option<&ContainerInterface> {
        self.interfaces.iter().find_map(ContainerInterfaceEntry::detailed)
    }
}

/// Direction of an ACL template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AclDirection {
    Ingress,
    Egress,
}

impl AclDirection {
    pub fn template_path(self) -> &'static str {
        match self {
            AclDirection::Ingress => "ingressacltemplates",
            AclDirection::Egress => "egressacltemplates",
        }
    }

    pub fn entry_path(self) -> &'static str {
        match self {
            AclDirection::Ingress => "ingressaclentrytemplates",
            AclDirection::Egress => "egressaclentrytemplates",
        }
    }
}

/// Ingress or egress ACL template of a domain
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AclTemplate {
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub active: bool,
    #[serde(rename = "defaultAllowIP", default)]
    pub default_allow_ip: bool,
    #[serde(rename = "defaultAllowNonIP", default)]
    pub default_allow_non_ip: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
}

/// Scope types used by ACL entries
pub mod scope {
    pub const ANY: &str = "ANY";
    pub const ZONE: &str = "ZONE";
    pub const ENDPOINT_ZONE: &str = "ENDPOINT_ZONE";
    pub const NETWORK_MACRO_GROUP: &str = "NETWORK_MACRO_GROUP";
}

/// One rule of an ACL template
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AclEntry {
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub description: String,
    pub action: String,
    pub location_type: String,
    #[serde(rename = "locationID", default, skip_serializing_if = "Option::is_none")]
    pub location_id: Option<String>,
    pub network_type: String,
    #[serde(rename = "networkID", default, skip_serializing_if = "Option::is_none")]
    pub network_id: Option<String>,
    pub ether_type: String,
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
}

impl AclEntry {
    /// Entry forwarding all IPv4 traffic between the given scopes
    pub fn allow(
        description: impl Into<String>,
        location: (&str, Option<String>),
        network: (&str, Option<String>),
        priority: i64,
    ) -> Self {
        Self {
            id: None,
            description: description.into(),
            action: "FORWARD".to_string(),
            location_type: location.0.to_string(),
            location_id: location.1,
            network_type: network.0.to_string(),
            network_id: network.1,
            ether_type: "0x0800".to_string(),
            protocol: "ANY".to_string(),
            priority: Some(priority),
        }
    }
}

/// VSD error body: `{"errors":[{"property":"..","descriptions":[{"title":"..","description":".."}]}]}`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub errors: Vec<ApiErrorItem>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorItem {
    #[serde(default)]
    pub property: Option<String>,
    #[serde(default)]
    pub descriptions: Vec<ApiErrorDescription>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorDescription {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl ApiErrorBody {
    /// All descriptions joined into one message
    pub fn message(&self) -> String {
        let mut parts: Vec<String> = self
            .errors
            .iter()
            .flat_map(|e| e.descriptions.iter())
            .filter_map(|d| d.description.clone().or_else(|| d.title.clone()))
            .collect();
        if let Some(d) = &self.description {
            parts.push(d.clone());
        }
        parts.join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_interfaces_accept_objects_and_ids() {
        let json = r#"{
            "ID": "c1",
            "name": "web_default",
            "UUID": "abc",
            "orchestrationID": "Kubernetes",
            "interfaces": [
                {"IPAddress": "10.0.0.5", "MAC": "02:00:00:00:00:05", "netmask": "255.255.255.0", "attachedNetworkID": "s1"},
                "iface-2"
            ]
        }"#;
        let container: Container = serde_json::from_str(json).unwrap();

        assert_eq!(container.interfaces.len(), 2);
        let primary = container.primary_interface().unwrap();
        assert_eq!(primary.ip_address, "10.0.0.5");
        assert_eq!(primary.attached_network_id, "s1");
        assert_eq!(container.interfaces[1], ContainerInterfaceEntry::Id("iface-2".to_string()));
    }

    #[test]
    fn test_new_objects_omit_id() {
        let zone = Zone {
            name: "K8S namespace default".to_string(),
            ..Default::default()
        };
        let value = serde_json::to_value(&zone).unwrap();
        assert_eq!(value, serde_json::json!({"name": "K8S namespace default"}));
    }

    #[test]
    fn test_error_body_message() {
        let body: ApiErrorBody = serde_json::from_str(
            r#"{"errors":[{"property":"name","descriptions":[{"title":"Duplicate","description":"Zone name already exists"}]}]}"#,
        )
        .unwrap();
        assert_eq!(body.message(), "Zone name already exists");
    }
}
