//! Network macro and macro group operations for MockVsdClient

use super::MockVsdClient;
use crate::error::VsdError;
use crate::models::*;

pub fn find_network_macro(
    client: &MockVsdClient,
    enterprise_id: &str,
    name: &str,
) -> Result<Option<EnterpriseNetwork>, VsdError> {
    client.enter("find_network_macro")?;
    Ok(client
        .network_macros
        .lock()
        .unwrap()
        .values()
        .find(|(parent, n)| parent == enterprise_id && n.name == name)
        .map(|(_, n)| n.clone()))
}

pub fn create_network_macro(
    client: &MockVsdClient,
    enterprise_id: &str,
    network: &EnterpriseNetwork,
) -> Result<EnterpriseNetwork, VsdError> {
    client.enter("create_network_macro")?;
    let mut macros = client.network_macros.lock().unwrap();
    if macros
        .values()
        .any(|(parent, n)| parent == enterprise_id && n.name == network.name)
    {
        return Err(VsdError::Conflict(format!("Network macro {} already exists", network.name)));
    }
    let mut created = network.clone();
    let id = client.next_id();
    created.id = Some(id.clone());
    macros.insert(id, (enterprise_id.to_string(), created.clone()));
    Ok(created)
}

pub fn list_network_macro_groups(client: &MockVsdClient, enterprise_id: &str) -> Result<Vec<NetworkMacroGroup>, VsdError> {
    client.enter("list_network_macro_groups")?;
    Ok(client
        .macro_groups
        .lock()
        .unwrap()
        .values()
        .filter(|(parent, _)| parent == enterprise_id)
        .map(|(_, g)| g.clone())
        .collect())
}

pub fn create_network_macro_group(
    client: &MockVsdClient,
    enterprise_id: &str,
    group: &NetworkMacroGroup,
) -> Result<NetworkMacroGroup, VsdError> {
    client.enter("create_network_macro_group")?;
    let mut groups = client.macro_groups.lock().unwrap();
    if groups
        .values()
        .any(|(parent, g)| parent == enterprise_id && g.name == group.name)
    {
        return Err(VsdError::Conflict(format!("Network macro group {} already exists", group.name)));
    }
    let mut created = group.clone();
    let id = client.next_id();
    created.id = Some(id.clone());
    groups.insert(id, (enterprise_id.to_string(), created.clone()));
    Ok(created)
}

pub fn assign_macro_groups(client: &MockVsdClient, network_id: &str, group_ids: &[String]) -> Result<(), VsdError> {
    client.enter("assign_macro_groups")?;
    if !client.network_macros.lock().unwrap().contains_key(network_id) {
        return Err(VsdError::NotFound(format!("Network macro {} not found", network_id)));
    }
    client
        .group_members
        .lock()
        .unwrap()
        .insert(network_id.to_string(), group_ids.to_vec());
    Ok(())
}
