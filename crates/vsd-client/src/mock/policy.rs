//! ACL template operations for MockVsdClient

use super::MockVsdClient;
use crate::error::VsdError;
use crate::models::*;

pub fn list_acl_templates(
    client: &MockVsdClient,
    domain_id: &str,
    direction: AclDirection,
) -> Result<Vec<AclTemplate>, VsdError> {
    client.enter("list_acl_templates")?;
    Ok(client
        .acl_templates
        .lock()
        .unwrap()
        .values()
        .filter(|(parent, dir, _)| parent == domain_id && *dir == direction)
        .map(|(_, _, t)| t.clone())
        .collect())
}

pub fn create_acl_template(
    client: &MockVsdClient,
    domain_id: &str,
    direction: AclDirection,
    template: &AclTemplate,
) -> Result<AclTemplate, VsdError> {
    client.enter("create_acl_template")?;
    let mut templates = client.acl_templates.lock().unwrap();
    if templates
        .values()
        .any(|(parent, dir, t)| parent == domain_id && *dir == direction && t.name == template.name)
    {
        return Err(VsdError::Conflict(format!("ACL template {} already exists", template.name)));
    }
    let mut created = template.clone();
    let id = client.next_id();
    created.id = Some(id.clone());
    templates.insert(id, (domain_id.to_string(), direction, created.clone()));
    Ok(created)
}

pub fn create_acl_entry(
    client: &MockVsdClient,
    template_id: &str,
    direction: AclDirection,
    entry: &AclEntry,
) -> Result<AclEntry, VsdError> {
    client.enter("create_acl_entry")?;
    let known = client
        .acl_templates
        .lock()
        .unwrap()
        .get(template_id)
        .is_some_and(|(_, dir, _)| *dir == direction);
    if !known {
        return Err(VsdError::NotFound(format!("ACL template {} not found", template_id)));
    }
    let mut created = entry.clone();
    created.id = Some(client.next_id());
    client
        .acl_entries
        .lock()
        .unwrap()
        .entry(template_id.to_string())
        .or_default()
        .push(created.clone());
    Ok(created)
}
