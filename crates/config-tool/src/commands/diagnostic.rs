use std::fmt::{self, Display};

use async_trait::async_trait;
use dynconf_coordinator::{Discovery, GlobalConsistencyState};
use dynconf_model::{HostPort, LogicalServerState};
use dynconf_node::NodeClient;
use dynconf_nomad::DiscoverResponse;

use crate::error::Result;
use crate::tool::{ConfigTool, Executable, Validatable};

/// Reports the consistency of the cluster a node belongs to.
#[derive(Clone, Debug)]
pub struct DiagnosticCommand {
    node: HostPort,
}

impl DiagnosticCommand {
    /// Diagnoses the cluster of `node`.
    #[must_use]
    pub const fn new(node: HostPort) -> Self {
        Self { node }
    }
}

/// What is known about one node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeReport {
    /// Address.
    pub address: HostPort,
    /// Configured name.
    pub name: Option<String>,
    /// Logical state.
    pub state: LogicalServerState,
    /// Online and activated.
    pub activated: bool,
    /// Online in diagnostic mode with a change history, waiting for a repair.
    pub in_repair: bool,
    /// Online in diagnostic mode without history, being configured.
    pub in_configuration: bool,
    /// Change-protocol state, if discovery succeeded.
    pub discovery: Option<DiscoverResponse>,
    /// Why discovery failed, if it did.
    pub failure: Option<String>,
}

/// The consistency verdict and per-node details.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DiagnosticReport {
    /// Verdict.
    pub state: GlobalConsistencyState,
    /// Operator explanation of the verdict.
    pub description: String,
    /// One entry per expected node.
    pub nodes: Vec<NodeReport>,
}

impl Validatable for DiagnosticCommand {
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl<C> Executable<C> for DiagnosticCommand
where
    C: NodeClient,
{
    type Output = DiagnosticReport;

    async fn execute(&self, tool: &ConfigTool<C>) -> Result<Self::Output> {
        let (cluster, _) = tool.upcoming(&self.node).await?;
        let analyzer = tool.coordinator().discover(&cluster.addresses()).await;

        let activated = analyzer.online_activated_nodes();
        let in_repair = analyzer.online_in_repair_nodes();
        let in_configuration = analyzer.online_in_configuration_nodes();

        let nodes = analyzer
            .nodes()
            .iter()
            .map(|snapshot| NodeReport {
                address: snapshot.address.clone(),
                name: cluster
                    .node_by_address(&snapshot.address)
                    .map(|node| node.name.clone()),
                state: snapshot.state,
                activated: activated.contains(&snapshot.address),
                in_repair: in_repair.contains(&snapshot.address),
                in_configuration: in_configuration.contains(&snapshot.address),
                discovery: snapshot.response().cloned(),
                failure: match &snapshot.discovery {
                    Discovery::Failed(reason) => Some(reason.clone()),
                    _ => None,
                },
            })
            .collect();

        Ok(DiagnosticReport {
            state: analyzer.state(),
            description: analyzer.description(),
            nodes,
        })
    }
}

impl Display for NodeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "[{}] {}",
            self.address,
            self.name.as_deref().unwrap_or("<unknown>")
        )?;
        writeln!(f, "  - Node state: {}", self.state)?;
        writeln!(f, "  - Node online and activated: {}", yes_no(self.activated))?;
        writeln!(f, "  - Node online and in repair: {}", yes_no(self.in_repair))?;
        writeln!(
            f,
            "  - Node online and being configured: {}",
            yes_no(self.in_configuration)
        )?;

        if let Some(reason) = &self.failure {
            return writeln!(f, "  - Discovery failed: {reason}");
        }
        let Some(discovery) = &self.discovery else {
            return Ok(());
        };

        writeln!(f, "  - Node mode: {}", discovery.mode)?;
        writeln!(
            f,
            "  - Node current configuration version: {}",
            discovery.current_version
        )?;
        writeln!(
            f,
            "  - Node highest configuration version: {}",
            discovery.highest_version
        )?;
        match &discovery.latest_change {
            Some(change) => {
                writeln!(f, "  - Latest change: {} ({})", change.summary, change.state)?;
                writeln!(f, "    - UUID: {}", change.uuid)?;
                writeln!(f, "    - Version: {}", change.version)?;
                writeln!(
                    f,
                    "    - Created by {} on {} at {}",
                    change.creation_user, change.creation_host, change.creation_timestamp
                )?;
            }
            None => writeln!(f, "  - Latest change: none")?,
        }
        if let Some(lock) = &discovery.lock {
            writeln!(f, "  - Config locked by: {}", lock.owner())?;
        }
        Ok(())
    }
}

impl Display for DiagnosticReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Configuration state: {}", self.state)?;
        writeln!(f, "{}", self.description)?;
        for node in &self.nodes {
            writeln!(f)?;
            write!(f, "{node}")?;
        }
        Ok(())
    }
}

const fn yes_no(value: bool) -> &'static str {
    if value { "YES" } else { "NO" }
}

#[cfg(test)]
mod tests {
    use super::*;

    use dynconf_model::{Cluster, Node, Stripe};
    use dynconf_node_memory::{Fault, MemoryNetwork, Phase};
    use dynconf_nomad::NomadMode;

    use crate::SetCommand;
    use crate::config::ToolConfig;

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
        (
            ConfigTool::new(network, ToolConfig::default()),
            cluster.addresses(),
        )
    }

    #[tokio::test]
    async fn test_healthy_cluster_report() {
        let (tool, nodes) = tool().await;

        let report = tool
            .run(&DiagnosticCommand::new(nodes[0].clone()))
            .await
            .unwrap();

        assert_eq!(report.state, GlobalConsistencyState::Accepting);
        assert_eq!(report.nodes.len(), 2);
        assert!(report.nodes.iter().all(|node| node.activated));
        let rendered = report.to_string();
        assert!(rendered.starts_with("Configuration state: ACCEPTING"));
        assert!(rendered.contains("[localhost:9420] node-2"));
        assert!(rendered.contains("Node state: PASSIVE"));
    }

    #[tokio::test]
    async fn test_report_shows_prepared_change_and_unreachable_node() {
        let (tool, nodes) = tool().await;
        tool.client().inject(&nodes[1], Fault::Refuse(Phase::Commit));
        let _ = tool
            .run(&SetCommand::set(
                nodes[0].clone(),
                vec!["client-lease-duration=20s".parse().unwrap()],
            ))
            .await;
        tool.client().set_online(&nodes[1], false);

        let report = tool
            .run(&DiagnosticCommand::new(nodes[0].clone()))
            .await
            .unwrap();

        assert_eq!(report.state, GlobalConsistencyState::MaybePrepared);
        let reachable = &report.nodes[0];
        assert_eq!(
            reachable.discovery.as_ref().map(|d| d.mode),
            Some(NomadMode::Prepared)
        );
        assert_eq!(report.nodes[1].state, LogicalServerState::Unreachable);
        let rendered = report.to_string();
        assert!(rendered.contains("Latest change: set client-lease-duration"));
        assert!(rendered.contains("(PREPARED)"));
    }
}
