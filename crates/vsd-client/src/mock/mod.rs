//! Mock VsdClient for unit testing
//!
//! Stores VSD objects in memory, keyed by parent ID, and answers creates of a
//! duplicate name with `VsdError::Conflict` like the real VSD does. Failures
//! can be injected per operation name (the trait method name).
//!
//! The mock is organized into domain-specific modules:
//! - `network.rs` - enterprises, domains, zones, subnets, containers
//! - `macros.rs` - network macros and macro groups
//! - `policy.rs` - ACL templates and entries

mod macros;
mod network;
mod policy;

use crate::error::VsdError;
use crate::models::*;
use crate::vsd_trait::VsdClientTrait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Kind of error an injected failure produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Conflict,
    NotFound,
    Api,
}

impl MockFailure {
    fn to_error(self, op: &str) -> VsdError {
        match self {
            MockFailure::Conflict => VsdError::Conflict(format!("{}: object already exists", op)),
            MockFailure::NotFound => VsdError::NotFound(format!("{}: no such object", op)),
            MockFailure::Api => VsdError::Api(format!("{}: injected failure", op)),
        }
    }
}

/// Action run when an injected failure fires
type FailureHook = Box<dyn FnOnce(&MockVsdClient) + Send>;

/// Mock VsdClient for testing
#[derive(Clone)]
pub struct MockVsdClient {
    pub(crate) base_url: String,
    pub(crate) enterprises: Arc<Mutex<HashMap<String, Enterprise>>>,
    pub(crate) domain_templates: Arc<Mutex<HashMap<String, (String, DomainTemplate)>>>,
    pub(crate) domains: Arc<Mutex<HashMap<String, (String, Domain)>>>,
    pub(crate) zones: Arc<Mutex<HashMap<String, Zone>>>,
    pub(crate) subnets: Arc<Mutex<HashMap<String, Subnet>>>,
    pub(crate) interfaces: Arc<Mutex<HashMap<String, Vec<ContainerInterface>>>>,
    pub(crate) containers: Arc<Mutex<HashMap<String, Container>>>,
    pub(crate) network_macros: Arc<Mutex<HashMap<String, (String, EnterpriseNetwork)>>>,
    pub(crate) macro_groups: Arc<Mutex<HashMap<String, (String, NetworkMacroGroup)>>>,
    pub(crate) group_members: Arc<Mutex<HashMap<String, Vec<String>>>>,
    pub(crate) acl_templates: Arc<Mutex<HashMap<String, (String, AclDirection, AclTemplate)>>>,
    pub(crate) acl_entries: Arc<Mutex<HashMap<String, Vec<AclEntry>>>>,
    // operation -> (failure, remaining count; None = always)
    pub(crate) failures: Arc<Mutex<HashMap<String, (MockFailure, Option<usize>)>>>,
    pub(crate) hooks: Arc<Mutex<HashMap<String, FailureHook>>>,
    pub(crate) calls: Arc<Mutex<HashMap<String, usize>>>,
    pub(crate) next_id: Arc<Mutex<u64>>,
}

impl std::fmt::Debug for MockVsdClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockVsdClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl MockVsdClient {
    /// Create a new mock client
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            enterprises: Arc::new(Mutex::new(HashMap::new())),
            domain_templates: Arc::new(Mutex::new(HashMap::new())),
            domains: Arc::new(Mutex::new(HashMap::new())),
            zones: Arc::new(Mutex::new(HashMap::new())),
            subnets: Arc::new(Mutex::new(HashMap::new())),
            interfaces: Arc::new(Mutex::new(HashMap::new())),
            containers: Arc::new(Mutex::new(HashMap::new())),
            network_macros: Arc::new(Mutex::new(HashMap::new())),
            macro_groups: Arc::new(Mutex::new(HashMap::new())),
            group_members: Arc::new(Mutex::new(HashMap::new())),
            acl_templates: Arc::new(Mutex::new(HashMap::new())),
            acl_entries: Arc::new(Mutex::new(HashMap::new())),
            failures: Arc::new(Mutex::new(HashMap::new())),
            hooks: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    /// Make the next `times` calls of `op` fail
    pub fn fail_next(&self, op: &str, failure: MockFailure, times: usize) {
        if times == 0 {
            return;
        }
        self.failures
            .lock()
            .unwrap()
            .insert(op.to_string(), (failure, Some(times)));
    }

    /// Make every call of `op` fail until cleared
    pub fn fail_always(&self, op: &str, failure: MockFailure) {
        self.failures.lock().unwrap().insert(op.to_string(), (failure, None));
    }

    /// Run `hook` once, right before the next injected failure of `op` is
    /// returned. Lets a test change VSD state between the caller's lookup
    /// and its create, like a concurrent writer would.
    pub fn on_failure<F>(&self, op: &str, hook: F)
    where
        F: FnOnce(&MockVsdClient) + Send + 'static,
    {
        self.hooks.lock().unwrap().insert(op.to_string(), Box::new(hook));
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
        self.hooks.lock().unwrap().clear();
    }

    /// Number of times `op` has been called
    pub fn calls(&self, op: &str) -> usize {
        self.calls.lock().unwrap().get(op).copied().unwrap_or(0)
    }

    /// Add an enterprise (for test setup)
    pub fn add_enterprise(&self, name: &str) -> Enterprise {
        let enterprise = Enterprise {
            id: Some(self.next_id()),
            name: name.to_string(),
            description: None,
        };
        self.enterprises
            .lock()
            .unwrap()
            .insert(enterprise.id.clone().unwrap_or_default(), enterprise.clone());
        enterprise
    }

    /// Add a domain under an enterprise (for test setup)
    pub fn add_domain(&self, enterprise_id: &str, name: &str) -> Domain {
        let domain = Domain {
            id: Some(self.next_id()),
            name: name.to_string(),
            ..Default::default()
        };
        self.domains.lock().unwrap().insert(
            domain.id.clone().unwrap_or_default(),
            (enterprise_id.to_string(), domain.clone()),
        );
        domain
    }

    /// Add a zone under a domain (for test setup)
    pub fn add_zone(&self, domain_id: &str, name: &str) -> Zone {
        let zone = Zone {
            id: Some(self.next_id()),
            name: name.to_string(),
            description: None,
            parent_id: Some(domain_id.to_string()),
        };
        self.zones
            .lock()
            .unwrap()
            .insert(zone.id.clone().unwrap_or_default(), zone.clone());
        zone
    }

    /// Add a subnet under a zone (for test setup)
    pub fn add_subnet(&self, zone_id: &str, name: &str, address: &str, netmask: &str) -> Subnet {
        let subnet = Subnet {
            id: Some(self.next_id()),
            name: name.to_string(),
            address: address.to_string(),
            netmask: netmask.to_string(),
            gateway: None,
            description: None,
            parent_id: Some(zone_id.to_string()),
        };
        self.subnets
            .lock()
            .unwrap()
            .insert(subnet.id.clone().unwrap_or_default(), subnet.clone());
        subnet
    }

    /// Add a network macro group under an enterprise (for test setup)
    pub fn add_macro_group(&self, enterprise_id: &str, name: &str) -> NetworkMacroGroup {
        let group = NetworkMacroGroup {
            id: Some(self.next_id()),
            name: name.to_string(),
            description: None,
        };
        self.macro_groups.lock().unwrap().insert(
            group.id.clone().unwrap_or_default(),
            (enterprise_id.to_string(), group.clone()),
        );
        group
    }

    /// Add a container with one interface on `subnet` (for test setup)
    pub fn add_container(&self, name: &str, uuid: &str, subnet: &Subnet, ip: &str) -> Container {
        let iface = ContainerInterface {
            id: Some(self.next_id()),
            ip_address: ip.to_string(),
            mac: "02:00:00:00:00:01".to_string(),
            netmask: subnet.netmask.clone(),
            attached_network_id: subnet.id.clone().unwrap_or_default(),
            ..Default::default()
        };
        let container = Container {
            id: Some(self.next_id()),
            name: name.to_string(),
            uuid: uuid.to_string(),
            orchestration_id: ORCHESTRATION_ID.to_string(),
            interfaces: vec![ContainerInterfaceEntry::Detailed(iface.clone())],
        };
        self.interfaces
            .lock()
            .unwrap()
            .entry(iface.attached_network_id.clone())
            .or_default()
            .push(iface);
        self.containers
            .lock()
            .unwrap()
            .insert(container.id.clone().unwrap_or_default(), container.clone());
        container
    }

    /// Snapshot of the zone with `name`, if any
    pub fn zone_named(&self, name: &str) -> Option<Zone> {
        self.zones.lock().unwrap().values().find(|z| z.name == name).cloned()
    }

    /// Snapshot of the subnets of a zone, ordered by address
    pub fn subnets_of(&self, zone_id: &str) -> Vec<Subnet> {
        let mut subnets: Vec<Subnet> = self
            .subnets
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.parent_id.as_deref() == Some(zone_id))
            .cloned()
            .collect();
        subnets.sort_by(|a, b| a.name.cmp(&b.name));
        subnets
    }

    /// Snapshot of the container with `name`, if any
    pub fn container_named(&self, name: &str) -> Option<Container> {
        self.containers
            .lock()
            .unwrap()
            .values()
            .find(|c| c.name == name)
            .cloned()
    }

    pub fn container_count(&self) -> usize {
        self.containers.lock().unwrap().len()
    }

    /// IDs of the macro groups a network macro is assigned to
    pub fn groups_of(&self, network_id: &str) -> Vec<String> {
        self.group_members
            .lock()
            .unwrap()
            .get(network_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Entries of an ACL template
    pub fn acl_entries_of(&self, template_id: &str) -> Vec<AclEntry> {
        self.acl_entries
            .lock()
            .unwrap()
            .get(template_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Generate next ID
    pub(crate) fn next_id(&self) -> String {
        let mut id = self.next_id.lock().unwrap();
        let current = *id;
        *id += 1;
        format!("{:08x}-0000-0000-0000-000000000000", current)
    }

    /// Count the call and return an injected failure, if one is armed
    pub(crate) fn enter(&self, op: &str) -> Result<(), VsdError> {
        *self.calls.lock().unwrap().entry(op.to_string()).or_default() += 1;
        let failure = {
            let mut failures = self.failures.lock().unwrap();
            let (failure, exhausted) = match failures.get_mut(op) {
                None => return Ok(()),
                Some((failure, None)) => (*failure, false),
                Some((failure, Some(remaining))) => {
                    *remaining = remaining.saturating_sub(1);
                    (*failure, *remaining == 0)
                }
            };
            if exhausted {
                failures.remove(op);
            }
            failure
        };
        // Hooks touch the object maps, so no mock lock may be held here
        let hook = self.hooks.lock().unwrap().remove(op);
        if let Some(hook) = hook {
            hook(self);
        }
        Err(failure.to_error(op))
    }
}

#[async_trait::async_trait]
impl VsdClientTrait for MockVsdClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn start_session(&self) -> Result<Me, VsdError> {
        self.enter("start_session")?;
        Ok(Me {
            id: Some("me".to_string()),
            api_key: Some("mock-api-key".to_string()),
            user_name: Some("csproot".to_string()),
            enterprise_id: None,
        })
    }

    // Enterprise, domain, zone, subnet and container operations - delegated to network module
    async fn find_enterprise(&self, name: &str) -> Result<Option<Enterprise>, VsdError> {
        network::find_enterprise(self, name)
    }

    async fn create_enterprise(&self, enterprise: &Enterprise) -> Result<Enterprise, VsdError> {
        network::create_enterprise(self, enterprise)
    }

    async fn create_domain_template(&self, enterprise_id: &str, template: &DomainTemplate) -> Result<DomainTemplate, VsdError> {
        network::create_domain_template(self, enterprise_id, template)
    }

    async fn find_domain(&self, enterprise_id: &str, name: &str) -> Result<Option<Domain>, VsdError> {
        network::find_domain(self, enterprise_id, name)
    }

    async fn create_domain(&self, enterprise_id: &str, domain: &Domain) -> Result<Domain, VsdError> {
        network::create_domain(self, enterprise_id, domain)
    }

    async fn find_zone(&self, domain_id: &str, name: &str) -> Result<Option<Zone>, VsdError> {
        network::find_zone(self, domain_id, name)
    }

    async fn create_zone(&self, domain_id: &str, zone: &Zone) -> Result<Zone, VsdError> {
        network::create_zone(self, domain_id, zone)
    }

    async fn list_subnets(&self, zone_id: &str) -> Result<Vec<Subnet>, VsdError> {
        network::list_subnets(self, zone_id)
    }

    async fn create_subnet(&self, zone_id: &str, subnet: &Subnet) -> Result<Subnet, VsdError> {
        network::create_subnet(self, zone_id, subnet)
    }

    async fn list_container_interfaces(&self, subnet_id: &str) -> Result<Vec<ContainerInterface>, VsdError> {
        network::list_container_interfaces(self, subnet_id)
    }

    async fn find_container(&self, domain_id: &str, name: &str) -> Result<Option<Container>, VsdError> {
        network::find_container(self, domain_id, name)
    }

    async fn create_container(&self, container: &Container) -> Result<Container, VsdError> {
        network::create_container(self, container)
    }

    async fn delete_container(&self, container_id: &str) -> Result<(), VsdError> {
        network::delete_container(self, container_id)
    }

    // Network macro operations - delegated to macros module
    async fn find_network_macro(&self, enterprise_id: &str, name: &str) -> Result<Option<EnterpriseNetwork>, VsdError> {
        macros::find_network_macro(self, enterprise_id, name)
    }

    async fn create_network_macro(&self, enterprise_id: &str, network: &EnterpriseNetwork) -> Result<EnterpriseNetwork, VsdError> {
        macros::create_network_macro(self, enterprise_id, network)
    }

    async fn list_network_macro_groups(&self, enterprise_id: &str) -> Result<Vec<NetworkMacroGroup>, VsdError> {
        macros::list_network_macro_groups(self, enterprise_id)
    }

    async fn create_network_macro_group(&self, enterprise_id: &str, group: &NetworkMacroGroup) -> Result<NetworkMacroGroup, VsdError> {
        macros::create_network_macro_group(self, enterprise_id, group)
    }

    async fn assign_macro_groups(&self, network_id: &str, group_ids: &[String]) -> Result<(), VsdError> {
        macros::assign_macro_groups(self, network_id, group_ids)
    }

    // Policy operations - delegated to policy module
    async fn list_acl_templates(&self, domain_id: &str, direction: AclDirection) -> Result<Vec<AclTemplate>, VsdError> {
        policy::list_acl_templates(self, domain_id, direction)
    }

    async fn create_acl_template(&self, domain_id: &str, direction: AclDirection, template: &AclTemplate) -> Result<AclTemplate, VsdError> {
        policy::create_acl_template(self, domain_id, direction, template)
    }

    async fn create_acl_entry(&self, template_id: &str, direction: AclDirection, entry: &AclEntry) -> Result<AclEntry, VsdError> {
        policy::create_acl_entry(self, template_id, direction, entry)
    }
}
