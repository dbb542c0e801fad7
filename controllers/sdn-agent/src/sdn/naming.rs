//! Names of the VSD objects that mirror Kubernetes resources.
//!
//! Node agents and CNI plugins derive the same names on their side, so these
//! must stay stable.

use uuid::Uuid;

pub const ZONE_PREFIX: &str = "K8S namespace ";
pub const MACRO_GROUP_PREFIX: &str = "K8S services in namespace ";
pub const MACRO_PREFIX: &str = "K8S service ";

pub const ENTERPRISE_DESCRIPTION: &str = "Automatically created Enterprise for K8S Cluster";
pub const DOMAIN_DESCRIPTION: &str = "Automatically created Domain for K8S Cluster";
pub const EGRESS_POLICY: &str = "Egress Policy for K8S";
pub const INGRESS_POLICY: &str = "Ingress Policy for K8S";
pub const INTRA_NAMESPACE_RULE: &str = "Allow intra-namespace traffic";

pub fn zone_name(namespace: &str) -> String {
    format!("{}{}", ZONE_PREFIX, namespace)
}

pub fn macro_group_name(namespace: &str) -> String {
    format!("{}{}", MACRO_GROUP_PREFIX, namespace)
}

pub fn macro_name(service: &str) -> String {
    format!("{}{}", MACRO_PREFIX, service)
}

pub fn domain_template_name(domain: &str) -> String {
    format!("Template for Domain {}", domain)
}

/// Name of the default subnet numbered `index` in a namespace
pub fn subnet_name(namespace: &str, index: usize) -> String {
    format!("{}-{}", namespace, index)
}

/// Container name of a pod: `<pod>_<namespace>`
pub fn container_name(pod: &str, namespace: &str) -> String {
    format!("{}_{}", pod, namespace)
}

/// Container UUID of a pod: its UID without dashes, twice
pub fn container_uuid(pod_uid: &str) -> String {
    let compact = pod_uid.replace('-', "");
    format!("{}{}", compact, compact)
}

/// Random unicast, locally administered MAC address
pub fn random_mac() -> String {
    let bytes = Uuid::new_v4().into_bytes();
    let mut mac = [0u8; 6];
    mac.copy_from_slice(&bytes[..6]);
    mac[0] = (mac[0] & 0xFE) | 0x02;
    mac.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_names() {
        assert_eq!(zone_name("web"), "K8S namespace web");
        assert_eq!(macro_group_name("web"), "K8S services in namespace web");
        assert_eq!(macro_name("frontend"), "K8S service frontend");
        assert_eq!(subnet_name("web", 2), "web-2");
        assert_eq!(container_name("nginx-1", "web"), "nginx-1_web");
    }

    #[test]
    fn test_container_uuid() {
        let uuid = container_uuid("0f3c8a1e-5b2d-4c6e-9a7f-1b2c3d4e5f60");
        assert_eq!(uuid.len(), 64);
        assert_eq!(&uuid[..32], "0f3c8a1e5b2d4c6e9a7f1b2c3d4e5f60");
        assert_eq!(&uuid[..32], &uuid[32..]);
    }

    #[test]
    fn test_random_mac_bits() {
        for _ in 0..32 {
            let mac = random_mac();
            let octets: Vec<u8> = mac
                .split(':')
                .map(|o| u8::from_str_radix(o, 16).unwrap())
                .collect();
            assert_eq!(octets.len(), 6);
            assert_eq!(octets[0] & 0x01, 0, "Multicast bit must be clear in {}", mac);
            assert_eq!(octets[0] & 0x02, 0x02, "Local bit must be set in {}", mac);
        }
    }
}
