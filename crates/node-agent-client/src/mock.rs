//! Mock node agents for unit testing
//!
//! Keeps one attachment map per node. Nodes can be marked unreachable, and a
//! scope can be set so attachments for another enterprise or domain are
//! rejected the way a real node agent does.

use crate::agent_trait::NodeAgentTrait;
use crate::error::NodeAgentError;
use crate::models::NodeAttachment;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Mock node agents for testing
#[derive(Debug, Clone, Default)]
pub struct MockNodeAgent {
    nodes: Arc<Mutex<HashMap<String, HashMap<String, NodeAttachment>>>>,
    unreachable: Arc<Mutex<HashSet<String>>>,
    scope: Arc<Mutex<Option<(String, String)>>>,
    puts: Arc<Mutex<Vec<(String, String)>>>,
    deletes: Arc<Mutex<Vec<(String, String)>>>,
}

impl MockNodeAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject attachments whose enterprise/domain differ from these
    pub fn set_scope(&self, enterprise: &str, domain: &str) {
        *self.scope.lock().unwrap() = Some((enterprise.to_string(), domain.to_string()));
    }

    /// Make every call to `node` fail as if the node were down
    pub fn set_unreachable(&self, node: &str, unreachable: bool) {
        let mut nodes = self.unreachable.lock().unwrap();
        if unreachable {
            nodes.insert(node.to_string());
        } else {
            nodes.remove(node);
        }
    }

    /// Seed an attachment on a node (for test setup)
    pub fn add_attachment(&self, node: &str, attachment: NodeAttachment) {
        self.nodes
            .lock()
            .unwrap()
            .entry(node.to_string())
            .or_default()
            .insert(attachment.name.clone(), attachment);
    }

    /// Attachment cached on `node`, if any
    pub fn attachment(&self, node: &str, name: &str) -> Option<NodeAttachment> {
        self.nodes
            .lock()
            .unwrap()
            .get(node)
            .and_then(|n| n.get(name))
            .cloned()
    }

    /// (node, name) of every successful PUT, in order
    pub fn puts(&self) -> Vec<(String, String)> {
        self.puts.lock().unwrap().clone()
    }

    /// (node, name) of every DELETE attempt, in order
    pub fn deletes(&self) -> Vec<(String, String)> {
        self.deletes.lock().unwrap().clone()
    }

    fn reachable(&self, node: &str) -> Result<(), NodeAgentError> {
        if node.is_empty() || self.unreachable.lock().unwrap().contains(node) {
            return Err(NodeAgentError::Api(format!("node {:?} is unreachable", node)));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl NodeAgentTrait for MockNodeAgent {
    async fn put_attachment(&self, node: &str, attachment: &NodeAttachment) -> Result<(), NodeAgentError> {
        self.reachable(node)?;
        if let Some((enterprise, domain)) = self.scope.lock().unwrap().as_ref() {
            if &attachment.enterprise != enterprise || &attachment.domain != domain {
                return Err(NodeAgentError::Rejected(format!(
                    "{} belongs to {}/{}",
                    attachment.name, attachment.enterprise, attachment.domain
                )));
            }
        }
        self.add_attachment(node, attachment.clone());
        self.puts
            .lock()
            .unwrap()
            .push((node.to_string(), attachment.name.clone()));
        Ok(())
    }

    async fn get_attachment(&self, node: &str, name: &str) -> Result<NodeAttachment, NodeAgentError> {
        self.reachable(node)?;
        self.attachment(node, name)
            .ok_or_else(|| NodeAgentError::NotFound(name.to_string()))
    }

    async fn list_attachments(&self, node: &str) -> Result<Vec<NodeAttachment>, NodeAgentError> {
        self.reachable(node)?;
        Ok(self
            .nodes
            .lock()
            .unwrap()
            .get(node)
            .map(|n| n.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_attachment(&self, node: &str, name: &str) -> Result<(), NodeAgentError> {
        self.deletes
            .lock()
            .unwrap()
            .push((node.to_string(), name.to_string()));
        self.reachable(node)?;
        self.nodes
            .lock()
            .unwrap()
            .get_mut(node)
            .and_then(|n| n.remove(name))
            .map(|_| ())
            .ok_or_else(|| NodeAgentError::NotFound(name.to_string()))
    }
}
