//! NodeAgentTrait for mocking

use crate::error::NodeAgentError;
use crate::models::NodeAttachment;

/// Operations against the agent running on a given node
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait NodeAgentTrait: Send + Sync {
    /// Upsert one attachment on `node`
    async fn put_attachment(&self, node: &str, attachment: &NodeAttachment) -> Result<(), NodeAgentError>;

    /// Fetch the attachment named `name` cached on `node`
    async fn get_attachment(&self, node: &str, name: &str) -> Result<NodeAttachment, NodeAgentError>;

    /// Fetch every attachment cached on `node`
    async fn list_attachments(&self, node: &str) -> Result<Vec<NodeAttachment>, NodeAgentError>;

    /// Drop the attachment named `name` from `node`
    async fn delete_attachment(&self, node: &str, name: &str) -> Result<(), NodeAgentError>;
}
