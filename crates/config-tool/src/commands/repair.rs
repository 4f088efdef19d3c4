use async_trait::async_trait;
use dynconf_coordinator::{RepairAction, RepairOutcome};
use dynconf_model::HostPort;
use dynconf_node::NodeClient;
use tracing::info;

use crate::error::Result;
use crate::restart::{DIAGNOSTIC, ONLINE_ROLES};
use crate::tool::{ConfigTool, Executable, Validatable};
use crate::topology::join;

/// Brings a cluster stuck in the middle of a change back to accepting changes.
///
/// Without a forced action the prepared change is committed when any node committed it, and
/// rolled back otherwise.
#[derive(Clone, Debug)]
pub struct RepairCommand {
    node: HostPort,
    force: Option<RepairAction>,
}

impl RepairCommand {
    /// Repairs the cluster of `node`.
    #[must_use]
    pub const fn new(node: HostPort) -> Self {
        Self { node, force: None }
    }

    /// Forces the repair action.
    #[must_use]
    pub const fn force(mut self, action: RepairAction) -> Self {
        self.force = Some(action);
        self
    }
}

impl Validatable for RepairCommand {
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl<C> Executable<C> for RepairCommand
where
    C: NodeClient,
{
    type Output = RepairOutcome;

    async fn execute(&self, tool: &ConfigTool<C>) -> Result<Self::Output> {
        let (cluster, _) = tool.upcoming(&self.node).await?;
        let nodes = cluster.addresses();

        let outcome = tool.repair_engine().repair(&nodes, self.force).await?;
        match &outcome {
            RepairOutcome::Healthy => info!("the cluster is accepting changes"),
            RepairOutcome::Recovered(recovery) => info!(
                change = %recovery.change_uuid,
                decision = %recovery.decision,
                "repaired {}",
                join(recovery.nodes.iter())
            ),
            RepairOutcome::Unlocked(unlocked) => {
                info!("lock released on {}", join(unlocked.iter()));
            }
            RepairOutcome::Reset(reset) => {
                info!("waiting for reset nodes: {}", join(reset.iter()));
                tool.restart_service().wait_for(reset, DIAGNOSTIC).await?;
            }
            RepairOutcome::Synced(synced) => {
                info!("waiting for synchronized nodes: {}", join(synced.iter()));
                tool.restart_service().wait_for(synced, ONLINE_ROLES).await?;
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use dynconf_coordinator::RecoveryDecision;
    use dynconf_model::{Cluster, LogicalServerState, Node, Stripe};
    use dynconf_node::NodeProbe;
    use dynconf_node_memory::{Fault, MemoryNetwork, Phase};

    use crate::SetCommand;
    use crate::config::ToolConfigBuilder;

    async fn tool() -> (ConfigTool<MemoryNetwork>, Vec<HostPort>) {
        let cluster = Cluster::new(vec![Stripe::new(
            "stripe1",
            vec![
                Node::new("node-1", "localhost", 9410),
                Node::new("node-2", "localhost", 9420),
            ],
        )]);
        let network = MemoryNetwork::new();
        network.add_activated_cluster(&cluster).await.unwrap();
        let config = ToolConfigBuilder::new()
            .restart_delay(Duration::from_millis(10))
            .restart_poll_interval(Duration::from_millis(10))
            .restart_wait_time(Duration::from_secs(5))
            .build();
        (ConfigTool::new(network, config), cluster.addresses())
    }

    #[tokio::test]
    async fn test_healthy_cluster_needs_no_repair() {
        let (tool, nodes) = tool().await;

        let outcome = tool.run(&RepairCommand::new(nodes[0].clone())).await.unwrap();

        assert_eq!(outcome, RepairOutcome::Healthy);
    }

    #[tokio::test]
    async fn test_interrupted_commit_is_rolled_back() {
        let (tool, nodes) = tool().await;
        tool.client().inject(&nodes[1], Fault::Refuse(Phase::Commit));
        let result = tool
            .run(&SetCommand::set(
                nodes[0].clone(),
                vec!["client-lease-duration=20s".parse().unwrap()],
            ))
            .await;
        assert!(result.is_err());
        tool.client().clear_faults(&nodes[1]);

        let outcome = tool.run(&RepairCommand::new(nodes[0].clone())).await.unwrap();

        let RepairOutcome::Recovered(recovery) = outcome else {
            panic!("expected a recovery, got {outcome:?}");
        };
        assert_eq!(recovery.decision, RecoveryDecision::Rollback);
        assert_eq!(recovery.nodes.len(), 2);
        let again = tool.run(&RepairCommand::new(nodes[0].clone())).await.unwrap();
        assert_eq!(again, RepairOutcome::Healthy);
    }

    #[tokio::test]
    async fn test_forced_reset_waits_for_diagnostic_mode() {
        let (tool, nodes) = tool().await;

        let outcome = tool
            .run(&RepairCommand::new(nodes[0].clone()).force(RepairAction::Reset))
            .await
            .unwrap();

        assert_eq!(outcome, RepairOutcome::Reset(nodes.clone()));
        for node in &nodes {
            assert_eq!(
                tool.client().logical_state(node).await.unwrap(),
                LogicalServerState::Diagnostic
            );
            assert!(!tool.client().is_activated(node).await.unwrap());
        }
    }
}
