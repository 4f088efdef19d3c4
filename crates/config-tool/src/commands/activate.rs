use async_trait::async_trait;
use dynconf_model::{ClusterValidator, HostPort};
use dynconf_node::NodeClient;
use dynconf_nomad::NomadChange;
use tracing::info;

use super::TopologyOutcome;
use crate::error::{Error, Result};
use crate::restart::ONLINE_ROLES;
use crate::tool::{ConfigTool, Executable, Validatable};

/// Activates the cluster a node was configured into and restarts every node.
#[derive(Clone, Debug)]
pub struct ActivateCommand {
    node: HostPort,
    cluster_name: Option<String>,
}

impl ActivateCommand {
    /// Activates the cluster of `node`, keeping its configured name.
    #[must_use]
    pub const fn new(node: HostPort) -> Self {
        Self {
            node,
            cluster_name: None,
        }
    }

    /// Names the cluster on activation.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.cluster_name = Some(name.into());
        self
    }
}

impl Validatable for ActivateCommand {
    fn validate(&self) -> Result<()> {
        if self
            .cluster_name
            .as_deref()
            .is_some_and(|name| name.trim().is_empty())
        {
            return Err(Error::Validation("the cluster name must not be empty".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl<C> Executable<C> for ActivateCommand
where
    C: NodeClient,
{
    type Output = TopologyOutcome;

    async fn execute(&self, tool: &ConfigTool<C>) -> Result<Self::Output> {
        let (mut cluster, activated) = tool.upcoming(&self.node).await?;
        if activated {
            return Err(Error::Validation(format!(
                "node {} is already part of an activated cluster",
                self.node
            )));
        }
        if let Some(name) = &self.cluster_name {
            cluster.name = Some(name.clone());
        }
        if cluster.name.is_none() {
            return Err(Error::Validation("a cluster name is required".to_string()));
        }
        ClusterValidator::new(&cluster).validate()?;

        let nodes = cluster.addresses();
        for node in &nodes {
            let (theirs, activated) = tool.upcoming(node).await?;
            if activated {
                return Err(Error::Validation(format!(
                    "node {node} is already part of an activated cluster"
                )));
            }
            if theirs.uid != cluster.uid || theirs.addresses() != nodes {
                return Err(Error::Validation(format!(
                    "node {node} is configured with a different topology; attach it again"
                )));
            }
        }

        let outcome = tool
            .coordinator()
            .run_change(&nodes, NomadChange::ClusterActivation(cluster.clone()))
            .await?;
        info!(nodes = nodes.len(), "cluster activated, restarting nodes");
        tool.restart_service().restart(&nodes, ONLINE_ROLES).await?;

        Ok(TopologyOutcome {
            cluster,
            version: Some(outcome.version),
            restarted: nodes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use dynconf_model::Node;
    use dynconf_node_memory::MemoryNetwork;

    use crate::config::ToolConfig;

    #[test]
    fn test_blank_name_is_refused() {
        let command = ActivateCommand::new(HostPort::new("localhost", 9410)).named("  ");
        assert!(command.validate().is_err());
    }

    #[tokio::test]
    async fn test_name_is_required() {
        let network = MemoryNetwork::new();
        let node = network
            .add_node(Node::new("node-1", "localhost", 9410))
            .await
            .unwrap();
        let tool = ConfigTool::new(network, ToolConfig::default());

        let result = tool.run(&ActivateCommand::new(node)).await;

        assert_matches!(result, Err(Error::Validation(message)) if message.contains("name is required"));
    }
}
