//! VsdClient trait for mocking
//!
//! The concrete VsdClient implements this trait and tests use MockVsdClient.
//! Lookups by name return `Ok(None)` when nothing matches; errors are reserved
//! for transport and server failures.

use crate::error::VsdError;
use crate::models::*;

/// Trait for VSD API operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait VsdClientTrait: Send + Sync {
    /// Get the base URL
    fn base_url(&self) -> &str;

    /// Start a session and obtain the API key used by later calls
    async fn start_session(&self) -> Result<Me, VsdError>;

    // Enterprise and domain
    async fn find_enterprise(&self, name: &str) -> Result<Option<Enterprise>, VsdError>;
    async fn create_enterprise(&self, enterprise: &Enterprise) -> Result<Enterprise, VsdError>;
    async fn create_domain_template(&self, enterprise_id: &str, template: &DomainTemplate) -> Result<DomainTemplate, VsdError>;
    async fn find_domain(&self, enterprise_id: &str, name: &str) -> Result<Option<Domain>, VsdError>;
    async fn create_domain(&self, enterprise_id: &str, domain: &Domain) -> Result<Domain, VsdError>;

    // Zones and subnets
    async fn find_zone(&self, domain_id: &str, name: &str) -> Result<Option<Zone>, VsdError>;
    async fn create_zone(&self, domain_id: &str, zone: &Zone) -> Result<Zone, VsdError>;
    async fn list_subnets(&self, zone_id: &str) -> Result<Vec<Subnet>, VsdError>;
    async fn create_subnet(&self, zone_id: &str, subnet: &Subnet) -> Result<Subnet, VsdError>;
    async fn list_container_interfaces(&self, subnet_id: &str) -> Result<Vec<ContainerInterface>, VsdError>;

    // Containers
    async fn find_container(&self, domain_id: &str, name: &str) -> Result<Option<Container>, VsdError>;
    async fn create_container(&self, container: &Container) -> Result<Container, VsdError>;
    async fn delete_container(&self, container_id: &str) -> Result<(), VsdError>;

    // Network macros
    async fn find_network_macro(&self, enterprise_id: &str, name: &str) -> Result<Option<EnterpriseNetwork>, VsdError>;
    async fn create_network_macro(&self, enterprise_id: &str, network: &EnterpriseNetwork) -> Result<EnterpriseNetwork, VsdError>;
    async fn list_network_macro_groups(&self, enterprise_id: &str) -> Result<Vec<NetworkMacroGroup>, VsdError>;
    async fn create_network_macro_group(&self, enterprise_id: &str, group: &NetworkMacroGroup) -> Result<NetworkMacroGroup, VsdError>;
    async fn assign_macro_groups(&self, network_id: &str, group_ids: &[String]) -> Result<(), VsdError>;

    // Policies
    async fn list_acl_templates(&self, domain_id: &str, direction: AclDirection) -> Result<Vec<AclTemplate>, VsdError>;
    async fn create_acl_template(&self, domain_id: &str, direction: AclDirection, template: &AclTemplate) -> Result<AclTemplate, VsdError>;
    async fn create_acl_entry(&self, template_id: &str, direction: AclDirection, entry: &AclEntry) -> Result<AclEntry, VsdError>;
}
