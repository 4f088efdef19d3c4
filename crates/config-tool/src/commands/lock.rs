use async_trait::async_trait;
use dynconf_model::{HostPort, LockContext};
use dynconf_node::NodeClient;
use dynconf_nomad::NomadChange;
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::tool::{ConfigTool, Executable, Validatable};
use crate::topology::ensure_online;

/// Takes the advisory configuration lock of an activated cluster.
///
/// Once locked, only clients presenting the token can change the cluster.
#[derive(Clone, Debug)]
pub struct LockCommand {
    node: HostPort,
    context: LockContext,
}

impl LockCommand {
    /// Locks the cluster of `node` on behalf of `owner_name`, with a fresh token.
    pub fn new(
        node: HostPort,
        owner_name: impl Into<String>,
        owner_tags: impl Into<String>,
    ) -> Self {
        Self {
            node,
            context: LockContext::new(Uuid::new_v4().to_string(), owner_name, owner_tags),
        }
    }

    /// Locks with an existing context.
    #[must_use]
    pub const fn with_context(node: HostPort, context: LockContext) -> Self {
        Self { node, context }
    }

    /// The lock this command takes.
    #[must_use]
    pub const fn context(&self) -> &LockContext {
        &self.context
    }
}

impl Validatable for LockCommand {
    fn validate(&self) -> Result<()> {
        if self.context.token.trim().is_empty() {
            return Err(Error::Validation("the lock token must not be empty".to_string()));
        }
        if self.context.owner_name.trim().is_empty() {
            return Err(Error::Validation("the lock owner must not be empty".to_string()));
        }
        if self.context.to_string().matches(';').count() != 2 {
            return Err(Error::Validation(
                "the lock token, owner and tags must not contain ';'".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl<C> Executable<C> for LockCommand
where
    C: NodeClient,
{
    type Output = LockContext;

    async fn execute(&self, tool: &ConfigTool<C>) -> Result<Self::Output> {
        let nodes = activated_nodes(tool, &self.node).await?;
        tool.coordinator()
            .run_change(&nodes, NomadChange::Lock(self.context.clone()))
            .await?;
        info!(owner = %self.context.owner(), "config locked");
        Ok(self.context.clone())
    }
}

/// Releases the configuration lock. The tool must be configured with the lock token.
#[derive(Clone, Debug)]
pub struct UnlockCommand {
    node: HostPort,
}

impl UnlockCommand {
    /// Unlocks the cluster of `node`.
    #[must_use]
    pub const fn new(node: HostPort) -> Self {
        Self { node }
    }
}

impl Validatable for UnlockCommand {
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl<C> Executable<C> for UnlockCommand
where
    C: NodeClient,
{
    type Output = ();

    async fn execute(&self, tool: &ConfigTool<C>) -> Result<Self::Output> {
        if tool.config().coordinator.lock_token.is_none() {
            return Err(Error::Validation(
                "unlocking requires the token the config was locked with".to_string(),
            ));
        }
        let nodes = activated_nodes(tool, &self.node).await?;
        tool.coordinator()
            .run_change(&nodes, NomadChange::Unlock)
            .await?;
        info!("config unlocked");
        Ok(())
    }
}

async fn activated_nodes<C>(tool: &ConfigTool<C>, node: &HostPort) -> Result<Vec<HostPort>>
where
    C: NodeClient,
{
    let (cluster, activated) = tool.upcoming(node).await?;
    if !activated {
        return Err(Error::Validation(format!(
            "node {node} is not activated; only an activated cluster can be locked"
        )));
    }
    ensure_online(tool, &cluster, true).await
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use dynconf_coordinator::CoordinatorConfigBuilder;
    use dynconf_model::{Cluster, Node, Stripe};
    use dynconf_node_memory::MemoryNetwork;

    use crate::SetCommand;
    use crate::config::ToolConfigBuilder;

    async fn network() -> (MemoryNetwork, HostPort) {
        let cluster = Cluster::new(vec![Stripe::new(
            "stripe1",
            vec![
                Node::new("node-1", "localhost", 9410),
                Node::new("node-2", "localhost", 9420),
            ],
        )]);
        let network = MemoryNetwork::new();
        network.add_activated_cluster(&cluster).await.unwrap();
        (network, cluster.addresses()[0].clone())
    }

    fn holder(network: &MemoryNetwork, token: &str) -> ConfigTool<MemoryNetwork> {
        let config = ToolConfigBuilder::new()
            .coordinator(CoordinatorConfigBuilder::new().lock_token(token).build())
            .build();
        ConfigTool::new(network.clone(), config)
    }

    #[test]
    fn test_owner_is_required() {
        let command = LockCommand::new(HostPort::new("localhost", 9410), " ", "");
        assert!(command.validate().is_err());
    }

    #[test]
    fn test_separator_is_refused() {
        let command = LockCommand::new(HostPort::new("localhost", 9410), "alice;bob", "");
        assert!(command.validate().is_err());
    }

    #[tokio::test]
    async fn test_lock_excludes_other_clients() {
        let (network, node) = network().await;
        let other = ConfigTool::new(network.clone(), Default::default());

        let context = other
            .run(&LockCommand::new(node.clone(), "alice", "ops"))
            .await
            .unwrap();
        let result = other
            .run(&SetCommand::set(
                node.clone(),
                vec!["client-lease-duration=20s".parse().unwrap()],
            ))
            .await;
        assert_matches!(
            result,
            Err(Error::Coordinator(dynconf_coordinator::Error::ConcurrentAccess(_)))
        );

        let holder = holder(&network, &context.token);
        holder
            .run(&SetCommand::set(
                node.clone(),
                vec!["client-lease-duration=20s".parse().unwrap()],
            ))
            .await
            .unwrap();
        holder.run(&UnlockCommand::new(node.clone())).await.unwrap();

        other
            .run(&SetCommand::set(
                node,
                vec!["client-lease-duration=30s".parse().unwrap()],
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unlock_requires_token() {
        let (network, node) = network().await;
        let tool = ConfigTool::new(network, Default::default());

        let result = tool.run(&UnlockCommand::new(node)).await;

        assert_matches!(result, Err(Error::Validation(message)) if message.contains("token"));
    }

    #[tokio::test]
    async fn test_lock_requires_activation() {
        let network = MemoryNetwork::new();
        let node = network
            .add_node(Node::new("node-1", "localhost", 9410))
            .await
            .unwrap();
        let tool = ConfigTool::new(network, Default::default());

        let result = tool.run(&LockCommand::new(node, "alice", "")).await;

        assert_matches!(result, Err(Error::Validation(message)) if message.contains("not activated"));
    }
}
