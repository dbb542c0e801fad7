//! VSD session bootstrap.
//!
//! Runs once after leadership is acquired: opens the session, makes sure the
//! enterprise and domain exist and installs the two domain-wide policies.
//! Any failure here is fatal to the agent.

use crate::error::ControllerError;
use crate::sdn::cache::SdnScope;
use crate::sdn::naming;
use tracing::info;
use vsd_client::{
    AclDirection, AclEntry, AclTemplate, Domain, DomainTemplate, Enterprise, VsdClientTrait, VsdError, scope,
};

/// Priority of the domain-wide policies and their rules
pub const BASE_POLICY_PRIORITY: i64 = 999_999_999;

/// Establish the session and resolve the enterprise and domain
pub async fn bootstrap(
    vsd: &dyn VsdClientTrait,
    enterprise: &str,
    domain: &str,
) -> Result<SdnScope, ControllerError> {
    let me = vsd
        .start_session()
        .await
        .map_err(|e| e.context(format!("start session on {}", vsd.base_url())))?;
    info!(
        "VSD session established on {} as {}",
        vsd.base_url(),
        me.user_name.as_deref().unwrap_or("unknown user")
    );

    let enterprise = ensure_enterprise(vsd, enterprise).await?;
    let enterprise_id = required_id(enterprise.id.as_ref(), "enterprise", &enterprise.name)?;
    let domain = ensure_domain(vsd, &enterprise_id, domain).await?;
    let domain_id = required_id(domain.id.as_ref(), "domain", &domain.name)?;
    let ingress_template_id = ensure_policies(vsd, &domain_id).await?;

    Ok(SdnScope {
        enterprise_id,
        enterprise_name: enterprise.name,
        domain_id,
        domain_name: domain.name,
        ingress_template_id: Some(ingress_template_id),
    })
}

async fn ensure_enterprise(vsd: &dyn VsdClientTrait, name: &str) -> Result<Enterprise, ControllerError> {
    if let Some(enterprise) = vsd.find_enterprise(name).await.map_err(|e| e.context("fetch enterprise"))? {
        info!("Enterprise {} found", name);
        return Ok(enterprise);
    }

    info!("Cannot find enterprise {}, creating", name);
    let wanted = Enterprise {
        name: name.to_string(),
        description: Some(naming::ENTERPRISE_DESCRIPTION.to_string()),
        ..Default::default()
    };
    match vsd.create_enterprise(&wanted).await {
        Ok(enterprise) => Ok(enterprise),
        Err(e) if e.is_conflict() => vsd
            .find_enterprise(name)
            .await
            .map_err(|e| e.context("fetch enterprise"))?
            .ok_or_else(|| VsdError::NotFound(format!("enterprise {} vanished after conflict", name)).into()),
        Err(e) => Err(e.context(format!("create enterprise {}", name)).into()),
    }
}

async fn ensure_domain(vsd: &dyn VsdClientTrait, enterprise_id: &str, name: &str) -> Result<Domain, ControllerError> {
    if let Some(domain) = vsd
        .find_domain(enterprise_id, name)
        .await
        .map_err(|e| e.context("fetch domain"))?
    {
        info!("Domain {} found", name);
        return Ok(domain);
    }

    info!("Cannot find domain {}, creating it from a new template", name);
    let template = vsd
        .create_domain_template(
            enterprise_id,
            &DomainTemplate {
                name: naming::domain_template_name(name),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| e.context(format!("create template for domain {}", name)))?;

    let wanted = Domain {
        name: name.to_string(),
        description: Some(naming::DOMAIN_DESCRIPTION.to_string()),
        template_id: template.id,
        ..Default::default()
    };
    match vsd.create_domain(enterprise_id, &wanted).await {
        Ok(domain) => Ok(domain),
        Err(e) if e.is_conflict() => vsd
            .find_domain(enterprise_id, name)
            .await
            .map_err(|e| e.context("fetch domain"))?
            .ok_or_else(|| VsdError::NotFound(format!("domain {} vanished after conflict", name)).into()),
        Err(e) => Err(e.context(format!("create domain {}", name)).into()),
    }
}

/// Install the egress allow-all and ingress intra-namespace policies if
/// absent; returns the ingress template ID
async fn ensure_policies(vsd: &dyn VsdClientTrait, domain_id: &str) -> Result<String, ControllerError> {
    ensure_policy(
        vsd,
        domain_id,
        AclDirection::Egress,
        naming::EGRESS_POLICY,
        AclEntry::allow("Allow all egress traffic", (scope::ANY, None), (scope::ANY, None), BASE_POLICY_PRIORITY),
    )
    .await?;
    ensure_policy(
        vsd,
        domain_id,
        AclDirection::Ingress,
        naming::INGRESS_POLICY,
        AclEntry::allow(
            naming::INTRA_NAMESPACE_RULE,
            (scope::ANY, None),
            (scope::ENDPOINT_ZONE, None),
            BASE_POLICY_PRIORITY,
        ),
    )
    .await
}

async fn ensure_policy(
    vsd: &dyn VsdClientTrait,
    domain_id: &str,
    direction: AclDirection,
    name: &str,
    entry: AclEntry,
) -> Result<String, ControllerError> {
    let existing = vsd
        .list_acl_templates(domain_id, direction)
        .await
        .map_err(|e| e.context(format!("list {}", direction.template_path())))?
        .into_iter()
        .find(|t| t.name == name);
    if let Some(template) = existing {
        info!("Domain already has {}", name);
        return required_id(template.id.as_ref(), "ACL template", name);
    }

    let template = vsd
        .create_acl_template(
            domain_id,
            direction,
            &AclTemplate {
                name: name.to_string(),
                active: true,
                priority: Some(BASE_POLICY_PRIORITY),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| e.context(format!("create {}", name)))?;
    let template_id = required_id(template.id.as_ref(), "ACL template", name)?;
    vsd.create_acl_entry(&template_id, direction, &entry)
        .await
        .map_err(|e| e.context(format!("add rule {:?} to {}", entry.description, name)))?;
    info!("Applied {}", name);
    Ok(template_id)
}

fn required_id(id: Option<&String>, kind: &str, name: &str) -> Result<String, ControllerError> {
    id.cloned()
        .ok_or_else(|| ControllerError::MalformedObject(format!("{} {} has no ID", kind, name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vsd_client::{MockFailure, MockVsdClient};

    #[tokio::test]
    async fn test_bootstrap_creates_everything() {
        let vsd = MockVsdClient::new("https://vsd:8443");
        let scope = bootstrap(&vsd, "acme", "k8s").await.unwrap();

        assert_eq!(scope.enterprise_name, "acme");
        assert_eq!(scope.domain_name, "k8s");
        assert_eq!(vsd.calls("create_enterprise"), 1);
        assert_eq!(vsd.calls("create_domain_template"), 1);
        assert_eq!(vsd.calls("create_domain"), 1);
        assert_eq!(vsd.calls("create_acl_template"), 2);

        let ingress = scope.ingress_template_id.unwrap();
        let rules = vsd.acl_entries_of(&ingress);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].description, "Allow intra-namespace traffic");
        assert_eq!(rules[0].network_type, "ENDPOINT_ZONE");
    }

    #[tokio::test]
    async fn test_bootstrap_is_idempotent() {
        let vsd = MockVsdClient::new("https://vsd:8443");
        let first = bootstrap(&vsd, "acme", "k8s").await.unwrap();
        let second = bootstrap(&vsd, "acme", "k8s").await.unwrap();

        assert_eq!(first.enterprise_id, second.enterprise_id);
        assert_eq!(first.domain_id, second.domain_id);
        assert_eq!(first.ingress_template_id, second.ingress_template_id);
        assert_eq!(vsd.calls("create_enterprise"), 1);
        assert_eq!(vsd.calls("create_acl_template"), 2);
        assert_eq!(vsd.calls("create_acl_entry"), 2);
    }

    #[tokio::test]
    async fn test_bootstrap_reuses_existing_domain() {
        let vsd = MockVsdClient::new("https://vsd:8443");
        let enterprise = vsd.add_enterprise("acme");
        let domain = vsd.add_domain(enterprise.id.as_deref().unwrap(), "k8s");

        let scope = bootstrap(&vsd, "acme", "k8s").await.unwrap();
        assert_eq!(Some(scope.domain_id), domain.id);
        assert_eq!(vsd.calls("create_domain_template"), 0);
    }

    #[tokio::test]
    async fn test_session_failure_is_an_error() {
        let vsd = MockVsdClient::new("https://vsd:8443");
        vsd.fail_next("start_session", MockFailure::Api, 1);

        let err = bootstrap(&vsd, "acme", "k8s").await.unwrap_err();
        assert!(matches!(err, ControllerError::Vsd(_)));
        assert_eq!(vsd.calls("find_enterprise"), 0);
    }
}
