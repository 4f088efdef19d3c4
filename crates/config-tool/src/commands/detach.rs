use async_trait::async_trait;
use dynconf_model::{Cluster, HostPort, Node};
use dynconf_node::NodeClient;
use dynconf_nomad::NomadChange;
use tracing::{info, warn};

use super::{TopologyKind, TopologyOutcome};
use crate::error::{Error, Result};
use crate::restart::DIAGNOSTIC;
use crate::tool::{ConfigTool, Executable, Validatable};
use crate::topology::{ensure_no_pending_restart, ensure_online, join, replace_topology};

/// Detaches a node or a stripe from the cluster of a destination node.
///
/// Nodes leaving an activated cluster are reset and restarted standalone.
#[derive(Clone, Debug)]
pub struct DetachCommand {
    destination: HostPort,
    source: HostPort,
    kind: TopologyKind,
    force: bool,
}

impl DetachCommand {
    /// Detaches the `source` node.
    #[must_use]
    pub const fn node(destination: HostPort, source: HostPort) -> Self {
        Self {
            destination,
            source,
            kind: TopologyKind::Node,
            force: false,
        }
    }

    /// Detaches the stripe of `source`.
    #[must_use]
    pub const fn stripe(destination: HostPort, source: HostPort) -> Self {
        Self {
            destination,
            source,
            kind: TopologyKind::Stripe,
            force: false,
        }
    }

    /// Detaches even when leaving nodes cannot be reached.
    #[must_use]
    pub const fn force(mut self) -> Self {
        self.force = true;
        self
    }

    fn change(&self, cluster: &Cluster) -> Result<(NomadChange, Vec<Node>)> {
        let node = cluster.node_by_address(&self.source).ok_or_else(|| {
            Error::Validation(format!(
                "{} is not part of the cluster of {}",
                self.source, self.destination
            ))
        })?;

        match self.kind {
            TopologyKind::Node => Ok((
                NomadChange::NodeRemoval {
                    node_uid: node.uid.clone(),
                    address: node.address(),
                },
                vec![node.clone()],
            )),
            TopologyKind::Stripe => {
                let stripe = cluster.stripe_of(&self.source).ok_or_else(|| {
                    Error::Validation(format!("node {} does not know its stripe", self.source))
                })?;
                if stripe.contains(&self.destination) {
                    return Err(Error::Validation(format!(
                        "cannot detach the stripe of the destination node {}",
                        self.destination
                    )));
                }
                Ok((
                    NomadChange::StripeRemoval {
                        stripe_uid: stripe.uid.clone(),
                        name: stripe.name.clone(),
                    },
                    stripe.nodes.clone(),
                ))
            }
        }
    }
}

impl Validatable for DetachCommand {
    fn validate(&self) -> Result<()> {
        if self.destination == self.source {
            return Err(Error::Validation(
                "the source and destination must be different nodes".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl<C> Executable<C> for DetachCommand
where
    C: NodeClient,
{
    type Output = TopologyOutcome;

    async fn execute(&self, tool: &ConfigTool<C>) -> Result<Self::Output> {
        let (cluster, activated) = tool.upcoming(&self.destination).await?;
        let (change, leaving) = self.change(&cluster)?;
        let candidate = change.apply(Some(&cluster)).map_err(Error::Validation)?;
        info!(kind = %self.kind, "{}", change.summary());

        let states = tool.coordinator().logical_states(&cluster.addresses()).await;
        let leaving_online: Vec<HostPort> = leaving
            .iter()
            .map(Node::address)
            .filter(|address| {
                states
                    .iter()
                    .any(|(node, state)| node == address && state.is_reachable())
            })
            .collect();
        let leaving_offline: Vec<HostPort> = leaving
            .iter()
            .map(Node::address)
            .filter(|address| !leaving_online.contains(address))
            .collect();
        if !leaving_offline.is_empty() {
            let message = format!(
                "detached nodes {} are unreachable and will keep their configuration until reset",
                join(leaving_offline.iter())
            );
            if !self.force {
                return Err(Error::Validation(message));
            }
            warn!("{message}");
        }

        if !activated {
            replace_topology(tool, &candidate.addresses(), &candidate).await?;
            for node in leaving
                .iter()
                .filter(|node| leaving_online.contains(&node.address()))
            {
                replace_topology(tool, &[node.address()], &Cluster::single(node.clone())).await?;
            }
            return Ok(TopologyOutcome {
                cluster: candidate,
                version: None,
                restarted: Vec::new(),
            });
        }

        let online = ensure_online(tool, &cluster, false).await?;
        let targets: Vec<HostPort> = online
            .into_iter()
            .filter(|node| !leaving.iter().any(|leaving| &leaving.address() == node))
            .collect();
        ensure_no_pending_restart(tool, &targets).await?;

        let outcome = tool.coordinator().run_change(&targets, change).await?;

        for node in &leaving_online {
            tool.request(node, tool.client().reset(node)).await?;
        }
        info!("restarting detached nodes: {}", join(leaving_online.iter()));
        tool.restart_service()
            .restart(&leaving_online, DIAGNOSTIC)
            .await?;

        Ok(TopologyOutcome {
            cluster: candidate,
            version: Some(outcome.version),
            restarted: leaving_online,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use dynconf_node::NodeProbe;
    use dynconf_node_memory::MemoryNetwork;
    use tracing_test::traced_test;

    use crate::AttachCommand;
    use crate::config::ToolConfig;

    async fn pair() -> (ConfigTool<MemoryNetwork>, HostPort, HostPort) {
        let network = MemoryNetwork::new();
        let n1 = network.add_node(Node::new("node-1", "localhost", 9410)).await.unwrap();
        let n2 = network.add_node(Node::new("node-2", "localhost", 9420)).await.unwrap();
        let tool = ConfigTool::new(network, ToolConfig::default());
        tool.run(&AttachCommand::node(n1.clone(), n2.clone()))
            .await
            .unwrap();
        (tool, n1, n2)
    }

    #[tokio::test]
    async fn test_detached_node_becomes_standalone() {
        let (tool, n1, n2) = pair().await;

        let outcome = tool
            .run(&DetachCommand::node(n1.clone(), n2.clone()))
            .await
            .unwrap();

        assert_eq!(outcome.version, None);
        assert_eq!(outcome.cluster.addresses(), vec![n1.clone()]);
        let remaining = tool.client().upcoming_cluster(&n1).await.unwrap();
        assert!(!remaining.contains(&n2));
        let standalone = tool.client().upcoming_cluster(&n2).await.unwrap();
        assert_eq!(standalone.addresses(), vec![n2]);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_unreachable_node_needs_force() {
        let (tool, n1, n2) = pair().await;
        tool.client().set_online(&n2, false);

        let refused = tool.run(&DetachCommand::node(n1.clone(), n2.clone())).await;
        assert_matches!(refused, Err(Error::Validation(message)) if message.contains("unreachable"));

        let outcome = tool
            .run(&DetachCommand::node(n1.clone(), n2).force())
            .await
            .unwrap();
        assert_eq!(outcome.cluster.node_count(), 1);
        assert!(logs_contain("will keep their configuration until reset"));
    }

    #[tokio::test]
    async fn test_stripe_of_destination_cannot_leave() {
        let (tool, n1, n2) = pair().await;

        let result = tool.run(&DetachCommand::stripe(n1, n2)).await;

        assert_matches!(result, Err(Error::Validation(message)) if message.contains("destination"));
    }
}
