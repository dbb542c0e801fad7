//! Node agent HTTPS client

use crate::agent_trait::NodeAgentTrait;
use crate::error::NodeAgentError;
use crate::models::*;
use reqwest::{Certificate, Client, Identity, StatusCode};
use std::time::Duration;
use tracing::debug;

/// TLS material for talking to node agents (PEM encoded)
#[derive(Clone, Default)]
pub struct NodeAgentTls {
    /// CA bundle the node agents' server certificates chain to
    pub ca_pem: Vec<u8>,
    /// Client certificate followed by its private key
    pub identity_pem: Option<Vec<u8>>,
}

impl std::fmt::Debug for NodeAgentTls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeAgentTls")
            .field("ca_pem", &format!("{} bytes", self.ca_pem.len()))
            .field("identity_pem", &self.identity_pem.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Client for the agents on all cluster nodes
#[derive(Debug)]
pub struct NodeAgentClient {
    client: Client,
    port: u16,
}

impl NodeAgentClient {
    /// Create a client that reaches every node agent on `port`
    pub fn new(tls: &NodeAgentTls, port: u16) -> Result<Self, NodeAgentError> {
        let ca = Certificate::from_pem(&tls.ca_pem)
            .map_err(|e| NodeAgentError::Tls(format!("Invalid CA certificate: {}", e)))?;

        let mut builder = Client::builder()
            .use_rustls_tls()
            .add_root_certificate(ca)
            .pool_max_idle_per_host(MAX_IDLE_CONNS)
            .pool_idle_timeout(IDLE_TIMEOUT)
            .timeout(Duration::from_secs(30));
        if let Some(pem) = &tls.identity_pem {
            let identity = Identity::from_pem(pem)
                .map_err(|e| NodeAgentError::Tls(format!("Invalid client identity: {}", e)))?;
            builder = builder.identity(identity);
        }

        let client = builder
            .build()
            .map_err(|e| NodeAgentError::Tls(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, port })
    }

    fn url(&self, node: &str, name: &str) -> String {
        format!("https://{}:{}{}{}", node, self.port, CONTAINER_PATH, name)
    }

    async fn error_for(response: reqwest::Response, what: &str) -> NodeAgentError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::NOT_FOUND => NodeAgentError::NotFound(what.to_string()),
            StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
                NodeAgentError::Rejected(format!("{}: {}", what, body))
            }
            _ => NodeAgentError::Api(format!("{}: {} - {}", what, status, body)),
        }
    }
}

#[async_trait::async_trait]
impl NodeAgentTrait for NodeAgentClient {
    async fn put_attachment(&self, node: &str, attachment: &NodeAttachment) -> Result<(), NodeAgentError> {
        let url = self.url(node, &attachment.name);
        debug!("PUT {}", url);
        let response = self.client.put(&url).json(attachment).send().await?;
        if !response.status().is_success() {
            return Err(Self::error_for(response, &attachment.name).await);
        }
        Ok(())
    }

    async fn get_attachment(&self, node: &str, name: &str) -> Result<NodeAttachment, NodeAgentError> {
        let url = self.url(node, name);
        debug!("GET {}", url);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(Self::error_for(response, name).await);
        }
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn list_attachments(&self, node: &str) -> Result<Vec<NodeAttachment>, NodeAgentError> {
        let url = self.url(node, "");
        debug!("GET {}", url);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(Self::error_for(response, node).await);
        }
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn delete_attachment(&self, node: &str, name: &str) -> Result<(), NodeAgentError> {
        let url = self.url(node, name);
        debug!("DELETE {}", url);
        let response = self.client.delete(&url).send().await?;
        if !response.status().is_success() {
            return Err(Self::error_for(response, name).await);
        }
        Ok(())
    }
}
