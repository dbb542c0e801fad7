//! Enterprise, domain, zone, subnet and container operations for MockVsdClient

use super::MockVsdClient;
use crate::error::VsdError;
use crate::models::*;
use std::net::Ipv4Addr;

pub fn find_enterprise(client: &MockVsdClient, name: &str) -> Result<Option<Enterprise>, VsdError> {
    client.enter("find_enterprise")?;
    Ok(client
        .enterprises
        .lock()
        .unwrap()
        .values()
        .find(|e| e.name == name)
        .cloned())
}

pub fn create_enterprise(client: &MockVsdClient, enterprise: &Enterprise) -> Result<Enterprise, VsdError> {
    client.enter("create_enterprise")?;
    let mut enterprises = client.enterprises.lock().unwrap();
    if enterprises.values().any(|e| e.name == enterprise.name) {
        return Err(VsdError::Conflict(format!("Enterprise {} already exists", enterprise.name)));
    }
    let mut created = enterprise.clone();
    let id = client.next_id();
    created.id = Some(id.clone());
    enterprises.insert(id, created.clone());
    Ok(created)
}

pub fn create_domain_template(
    client: &MockVsdClient,
    enterprise_id: &str,
    template: &DomainTemplate,
) -> Result<DomainTemplate, VsdError> {
    client.enter("create_domain_template")?;
    let mut templates = client.domain_templates.lock().unwrap();
    if templates
        .values()
        .any(|(parent, t)| parent == enterprise_id && t.name == template.name)
    {
        return Err(VsdError::Conflict(format!("Domain template {} already exists", template.name)));
    }
    let mut created = template.clone();
    let id = client.next_id();
    created.id = Some(id.clone());
    templates.insert(id, (enterprise_id.to_string(), created.clone()));
    Ok(created)
}

pub fn find_domain(client: &MockVsdClient, enterprise_id: &str, name: &str) -> Result<Option<Domain>, VsdError> {
    client.enter("find_domain")?;
    Ok(client
        .domains
        .lock()
        .unwrap()
        .values()
        .find(|(parent, d)| parent == enterprise_id && d.name == name)
        .map(|(_, d)| d.clone()))
}

pub fn create_domain(client: &MockVsdClient, enterprise_id: &str, domain: &Domain) -> Result<Domain, VsdError> {
    client.enter("create_domain")?;
    let template_known = domain.template_id.as_ref().is_some_and(|id| {
        client.domain_templates.lock().unwrap().contains_key(id)
    });
    if !template_known {
        return Err(VsdError::InvalidRequest(format!("Domain {} has no valid template", domain.name)));
    }
    let mut domains = client.domains.lock().unwrap();
    if domains
        .values()
        .any(|(parent, d)| parent == enterprise_id && d.name == domain.name)
    {
        return Err(VsdError::Conflict(format!("Domain {} already exists", domain.name)));
    }
    let mut created = domain.clone();
    let id = client.next_id();
    created.id = Some(id.clone());
    domains.insert(id, (enterprise_id.to_string(), created.clone()));
    Ok(created)
}

pub fn find_zone(client: &MockVsdClient, domain_id: &str, name: &str) -> Result<Option<Zone>, VsdError> {
    client.enter("find_zone")?;
    Ok(client
        .zones
        .lock()
        .unwrap()
        .values()
        .find(|z| z.parent_id.as_deref() == Some(domain_id) && z.name == name)
        .cloned())
}

pub fn create_zone(client: &MockVsdClient, domain_id: &str, zone: &Zone) -> Result<Zone, VsdError> {
    client.enter("create_zone")?;
    let mut zones = client.zones.lock().unwrap();
    if zones
        .values()
        .any(|z| z.parent_id.as_deref() == Some(domain_id) && z.name == zone.name)
    {
        return Err(VsdError::Conflict(format!("Zone {} already exists", zone.name)));
    }
    let mut created = zone.clone();
    let id = client.next_id();
    created.id = Some(id.clone());
    created.parent_id = Some(domain_id.to_string());
    zones.insert(id, created.clone());
    Ok(created)
}

pub fn list_subnets(client: &MockVsdClient, zone_id: &str) -> Result<Vec<Subnet>, VsdError> {
    client.enter("list_subnets")?;
    Ok(client.subnets_of(zone_id))
}

pub fn create_subnet(client: &MockVsdClient, zone_id: &str, subnet: &Subnet) -> Result<Subnet, VsdError> {
    client.enter("create_subnet")?;
    let mut subnets = client.subnets.lock().unwrap();
    if let Some(existing) = subnets.values().find(|s| {
        (s.parent_id.as_deref() == Some(zone_id) && s.name == subnet.name) || s.address == subnet.address
    }) {
        return Err(VsdError::Conflict(format!(
            "Subnet {} ({}) already exists",
            existing.name, existing.address
        )));
    }
    let mut created = subnet.clone();
    let id = client.next_id();
    created.id = Some(id.clone());
    created.parent_id = Some(zone_id.to_string());
    if created.gateway.is_none() {
        created.gateway = subnet
            .address
            .parse::<Ipv4Addr>()
            .ok()
            .map(|a| Ipv4Addr::from(u32::from(a) + 1).to_string());
    }
    subnets.insert(id, created.clone());
    Ok(created)
}

pub fn list_container_interfaces(client: &MockVsdClient, subnet_id: &str) -> Result<Vec<ContainerInterface>, VsdError> {
    client.enter("list_container_interfaces")?;
    Ok(client
        .interfaces
        .lock()
        .unwrap()
        .get(subnet_id)
        .cloned()
        .unwrap_or_default())
}

pub fn find_container(client: &MockVsdClient, _domain_id: &str, name: &str) -> Result<Option<Container>, VsdError> {
    client.enter("find_container")?;
    Ok(client.container_named(name))
}

pub fn create_container(client: &MockVsdClient, container: &Container) -> Result<Container, VsdError> {
    client.enter("create_container")?;
    if client.container_named(&container.name).is_some() {
        return Err(VsdError::Conflict(format!("Container {} already exists", container.name)));
    }

    let mut created = container.clone();
    let mut new_ifaces = Vec::new();
    for entry in created.interfaces.iter_mut() {
        if let ContainerInterfaceEntry::Detailed(iface) = entry {
            let in_use = client
                .interfaces
                .lock()
                .unwrap()
                .get(&iface.attached_network_id)
                .is_some_and(|list| list.iter().any(|i| i.ip_address == iface.ip_address));
            if in_use {
                return Err(VsdError::Conflict(format!(
                    "IP address {} already exists in network {}",
                    iface.ip_address, iface.attached_network_id
                )));
            }
            iface.id = Some(client.next_id());
            new_ifaces.push(iface.clone());
        }
    }

    let mut interfaces = client.interfaces.lock().unwrap();
    for iface in new_ifaces {
        interfaces
            .entry(iface.attached_network_id.clone())
            .or_default()
            .push(iface);
    }
    let id = client.next_id();
    created.id = Some(id.clone());
    client.containers.lock().unwrap().insert(id, created.clone());
    Ok(created)
}

pub fn delete_container(client: &MockVsdClient, container_id: &str) -> Result<(), VsdError> {
    client.enter("delete_container")?;
    let removed = client
        .containers
        .lock()
        .unwrap()
        .remove(container_id)
        .ok_or_else(|| VsdError::NotFound(format!("Container {} not found", container_id)))?;

    let ids: Vec<String> = removed
        .interfaces
        .iter()
        .filter_map(|e| e.detailed().and_then(|i| i.id.clone()))
        .collect();
    for list in client.interfaces.lock().unwrap().values_mut() {
        list.retain(|i| i.id.as_ref().is_none_or(|id| !ids.contains(id)));
    }
    Ok(())
}
