//! VSD API client
//!
//! Implements the VSD REST API over `reqwest`. Every call is made under
//! `<base>/nuage/api/<version>/`; a session is started with the user password
//! and later calls authenticate with the returned API key.

use crate::error::VsdError;
use crate::models::*;
use crate::vsd_trait::VsdClientTrait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::RwLock;
use tracing::{debug, info};

const PAGE_SIZE: usize = 500;

/// Credentials for the VSD session
#[derive(Clone)]
pub struct VsdCredentials {
    pub username: String,
    pub password: String,
    pub organization: String,
    /// Client certificate and key (PEM) for certificate-based sessions
    pub identity_pem: Option<Vec<u8>>,
}

impl std::fmt::Debug for VsdCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VsdCredentials")
            .field("username", &self.username)
            .field("organization", &self.organization)
            .field("identity_pem", &self.identity_pem.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

impl VsdCredentials {
    pub fn password(
        username: impl Into<String>,
        password: impl Into<String>,
        organization: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            organization: organization.into(),
            identity_pem: None,
        }
    }

    /// Add a client certificate; `cert` and `key` are PEM encoded
    pub fn with_identity(mut self, cert: &[u8], key: &[u8]) -> Self {
        let mut pem = cert.to_vec();
        pem.push(b'\n');
        pem.extend_from_slice(key);
        self.identity_pem = Some(pem);
        self
    }
}

/// VSD API client
pub struct VsdClient {
    client: Client,
    base_url: String,
    api_url: String,
    credentials: VsdCredentials,
    api_key: RwLock<Option<String>>,
}

impl std::fmt::Debug for VsdClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VsdClient")
            .field("api_url", &self.api_url)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl VsdClient {
    /// Create a new VSD client
    ///
    /// # Arguments
    /// * `base_url` - VSD base URL (e.g., "https://vsd:8443")
    /// * `api_version` - API version path segment (e.g., "v5_0")
    /// * `credentials` - user, password, organization and optional client certificate
    pub fn new(
        base_url: String,
        api_version: &str,
        credentials: VsdCredentials,
    ) -> Result<Self, VsdError> {
        let mut builder = Client::builder();
        if let Some(pem) = &credentials.identity_pem {
            let identity = reqwest::Identity::from_pem(pem)?;
            builder = builder.identity(identity);
        }
        let client = builder.build()?;

        let base_url = base_url.trim_end_matches('/').to_string();
        let api_url = format!("{}/nuage/api/{}", base_url, api_version);
        Ok(Self {
            client,
            base_url,
            api_url,
            credentials,
            api_key: RwLock::new(None),
        })
    }

    fn authorization(&self, secret: &str) -> String {
        let token = STANDARD.encode(format!("{}:{}", self.credentials.username, secret));
        format!("XREST {}", token)
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, VsdError> {
        let api_key = self
            .api_key
            .read()
            .map_err(|_| VsdError::Authentication("session state poisoned".to_string()))?
            .clone()
            .ok_or_else(|| VsdError::Authentication("session not started".to_string()))?;
        Ok(self
            .client
            .request(method, format!("{}/{}", self.api_url, path))
            .header("Authorization", self.authorization(&api_key))
            .header("X-Nuage-Organization", &self.credentials.organization)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json"))
    }

    /// Map a non-success response to an error
    async fn error_for(response: reqwest::Response) -> VsdError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .map(|b| b.message())
            .ok()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| body.chars().take(500).collect());

        match status {
            StatusCode::NOT_FOUND => VsdError::NotFound(message),
            StatusCode::CONFLICT => VsdError::Conflict(message),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                VsdError::Authentication(format!("{} - {}", status, message))
            }
            _ if message.contains("already exists") => VsdError::Conflict(message),
            _ => VsdError::Api(format!("{} - {}", status, message)),
        }
    }

    async fn decode_list<T: DeserializeOwned>(response: reqwest::Response) -> Result<Vec<T>, VsdError> {
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&text).map_err(|e| {
            VsdError::Api(format!(
                "error decoding response body: {} - Response (first 500 chars): {}",
                e,
                text.chars().take(500).collect::<String>()
            ))
        })
    }

    /// Fetch every page of a child listing, optionally filtered
    async fn fetch_all<T: DeserializeOwned>(
        &self,
        path: &str,
        filter: Option<&str>,
    ) -> Result<Vec<T>, VsdError> {
        let mut all = Vec::new();
        let mut page = 0usize;
        loop {
            debug!("Fetching {} page {}", path, page);
            let mut request = self
                .request(Method::GET, path)?
                .header("X-Nuage-Page", page.to_string())
                .header("X-Nuage-PageSize", PAGE_SIZE.to_string());
            if let Some(filter) = filter {
                request = request.header("X-Nuage-Filter", filter);
            }
            let response = request.send().await?;
            if !response.status().is_success() {
                return Err(Self::error_for(response).await);
            }
            let items: Vec<T> = Self::decode_list(response).await?;
            let done = items.len() < PAGE_SIZE;
            all.extend(items);
            if done {
                break;
            }
            page += 1;
        }
        Ok(all)
    }

    async fn find_by_name<T: DeserializeOwned>(
        &self,
        path: &str,
        name: &str,
        name_of: fn(&T) -> &str,
    ) -> Result<Option<T>, VsdError> {
        let filter = format!("name == \"{}\"", name);
        let items: Vec<T> = self.fetch_all(path, Some(&filter)).await?;
        Ok(items.into_iter().find(|item| name_of(item) == name))
    }

    async fn create<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, VsdError> {
        let response = self.request(Method::POST, path)?.json(body).send().await?;
        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }
        let mut created: Vec<T> = Self::decode_list(response).await?;
        if created.is_empty() {
            return Err(VsdError::Api(format!("empty response creating under {}", path)));
        }
        Ok(created.swap_remove(0))
    }
}

#[async_trait::async_trait]
impl VsdClientTrait for VsdClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn start_session(&self) -> Result<Me, VsdError> {
        let url = format!("{}/me", self.api_url);
        debug!("Starting VSD session at {}", url);

        let response = self
            .client
            .get(&url)
            .header("Authorization", self.authorization(&self.credentials.password))
            .header("X-Nuage-Organization", &self.credentials.organization)
            .header("Accept", "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }

        let me = Self::decode_list::<Me>(response)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| VsdError::Authentication("empty session response".to_string()))?;
        let key = me
            .api_key
            .clone()
            .ok_or_else(|| VsdError::Authentication("session response carries no API key".to_string()))?;

        *self
            .api_key
            .write()
            .map_err(|_| VsdError::Authentication("session state poisoned".to_string()))? = Some(key);
        info!("Started VSD session at {} as {}", self.base_url, self.credentials.username);
        Ok(me)
    }

    async fn find_enterprise(&self, name: &str) -> Result<Option<Enterprise>, VsdError> {
        self.find_by_name("enterprises", name, |e: &Enterprise| &e.name).await
    }

    async fn create_enterprise(&self, enterprise: &Enterprise) -> Result<Enterprise, VsdError> {
        self.create("enterprises", enterprise).await
    }

    async fn create_domain_template(&self, enterprise_id: &str, template: &DomainTemplate) -> Result<DomainTemplate, VsdError> {
        self.create(&format!("enterprises/{}/domaintemplates", enterprise_id), template).await
    }

    async fn find_domain(&self, enterprise_id: &str, name: &str) -> Result<Option<Domain>, VsdError> {
        self.find_by_name(&format!("enterprises/{}/domains", enterprise_id), name, |d: &Domain| &d.name)
            .await
    }

    async fn create_domain(&self, enterprise_id: &str, domain: &Domain) -> Result<Domain, VsdError> {
        self.create(&format!("enterprises/{}/domains", enterprise_id), domain).await
    }

    async fn find_zone(&self, domain_id: &str, name: &str) -> Result<Option<Zone>, VsdError> {
        self.find_by_name(&format!("domains/{}/zones", domain_id), name, |z: &Zone| &z.name)
            .await
    }

    async fn create_zone(&self, domain_id: &str, zone: &Zone) -> Result<Zone, VsdError> {
        self.create(&format!("domains/{}/zones", domain_id), zone).await
    }

    async fn list_subnets(&self, zone_id: &str) -> Result<Vec<Subnet>, VsdError> {
        self.fetch_all(&format!("zones/{}/subnets", zone_id), None).await
    }

    async fn create_subnet(&self, zone_id: &str, subnet: &Subnet) -> Result<Subnet, VsdError> {
        self.create(&format!("zones/{}/subnets", zone_id), subnet).await
    }

    async fn list_container_interfaces(&self, subnet_id: &str) -> Result<Vec<ContainerInterface>, VsdError> {
        self.fetch_all(&format!("subnets/{}/containerinterfaces", subnet_id), None).await
    }

    async fn find_container(&self, domain_id: &str, name: &str) -> Result<Option<Container>, VsdError> {
        self.find_by_name(&format!("domains/{}/containers", domain_id), name, |c: &Container| &c.name)
            .await
    }

    async fn create_container(&self, container: &Container) -> Result<Container, VsdError> {
        self.create("containers", container).await
    }

    async fn delete_container(&self, container_id: &str) -> Result<(), VsdError> {
        let response = self
            .request(Method::DELETE, &format!("containers/{}?responseChoice=1", container_id))?
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }
        Ok(())
    }

    async fn find_network_macro(&self, enterprise_id: &str, name: &str) -> Result<Option<EnterpriseNetwork>, VsdError> {
        self.find_by_name(
            &format!("enterprises/{}/enterprisenetworks", enterprise_id),
            name,
            |n: &EnterpriseNetwork| &n.name,
        )
        .await
    }

    async fn create_network_macro(&self, enterprise_id: &str, network: &EnterpriseNetwork) -> Result<EnterpriseNetwork, VsdError> {
        self.create(&format!("enterprises/{}/enterprisenetworks", enterprise_id), network).await
    }

    async fn list_network_macro_groups(&self, enterprise_id: &str) -> Result<Vec<NetworkMacroGroup>, VsdError> {
        // Server-side name filtering is unreliable for macro groups
        self.fetch_all(&format!("enterprises/{}/networkmacrogroups", enterprise_id), None).await
    }

    async fn create_network_macro_group(&self, enterprise_id: &str, group: &NetworkMacroGroup) -> Result<NetworkMacroGroup, VsdError> {
        self.create(&format!("enterprises/{}/networkmacrogroups", enterprise_id), group).await
    }

    async fn assign_macro_groups(&self, network_id: &str, group_ids: &[String]) -> Result<(), VsdError> {
        let response = self
            .request(Method::PUT, &format!("enterprisenetworks/{}/networkmacrogroups", network_id))?
            .json(group_ids)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }
        Ok(())
    }

    async fn list_acl_templates(&self, domain_id: &str, direction: AclDirection) -> Result<Vec<AclTemplate>, VsdError> {
        self.fetch_all(&format!("domains/{}/{}", domain_id, direction.template_path()), None).await
    }

    async fn create_acl_template(&self, domain_id: &str, direction: AclDirection, template: &AclTemplate) -> Result<AclTemplate, VsdError> {
        self.create(&format!("domains/{}/{}", domain_id, direction.template_path()), template).await
    }

    async fn create_acl_entry(&self, template_id: &str, direction: AclDirection, entry: &AclEntry) -> Result<AclEntry, VsdError> {
        self.create(
            &format!("{}/{}/{}", direction.template_path(), template_id, direction.entry_path()),
            entry,
        )
        .await
    }
}
