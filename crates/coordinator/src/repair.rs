use std::fmt::{self, Display};
use std::str::FromStr;
use std::time::Duration;

use dynconf_model::HostPort;
use dynconf_node::NodeClient;
use tracing::{info, warn};

use crate::analyzer::{ConsistencyAnalyzer, GlobalConsistencyState};
use crate::coordinator::{ChangeCoordinator, RecoveryDecision, RecoveryOutcome};
use crate::error::{Error, NodeFailure, ProtocolFailure, ProtocolPhase, Result};

/// Repair forced by the operator.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum RepairAction {
    /// Commit the prepared change.
    Commit,
    /// Roll the prepared change back.
    Rollback,
    /// Release the configuration lock without going through the change protocol.
    Unlock,
    /// Discard every node's configuration and restart it.
    Reset,
}

impl Display for RepairAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Commit => write!(f, "commit"),
            Self::Rollback => write!(f, "rollback"),
            Self::Unlock => write!(f, "unlock"),
            Self::Reset => write!(f, "reset"),
        }
    }
}

impl FromStr for RepairAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "commit" => Ok(Self::Commit),
            "rollback" => Ok(Self::Rollback),
            "unlock" => Ok(Self::Unlock),
            "reset" => Ok(Self::Reset),
            _ => Err(Error::Validation(format!(
                "unknown repair action: {s} (expected commit, rollback, unlock or reset)"
            ))),
        }
    }
}

/// What a repair did.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RepairOutcome {
    /// The cluster was accepting changes: nothing to do.
    Healthy,

    /// A prepared change was committed or rolled back.
    Recovered(RecoveryOutcome),

    /// The configuration lock was released on these nodes.
    Unlocked(Vec<HostPort>),

    /// These nodes were reset and are restarting.
    Reset(Vec<HostPort>),

    /// These nodes missed committed changes. They were given the committed history of the
    /// cluster and are restarting.
    Synced(Vec<HostPort>),
}

/// Turns a consistency verdict into the corrective protocol run.
#[derive(Clone, Debug)]
pub struct RepairEngine<C>
where
    C: NodeClient,
{
    coordinator: ChangeCoordinator<C>,
    restart_delay: Duration,
}

impl<C> RepairEngine<C>
where
    C: NodeClient,
{
    /// Creates an engine. Reset nodes restart after `restart_delay`.
    pub const fn new(coordinator: ChangeCoordinator<C>, restart_delay: Duration) -> Self {
        Self {
            coordinator,
            restart_delay,
        }
    }

    /// The coordinator.
    pub const fn coordinator(&self) -> &ChangeCoordinator<C> {
        &self.coordinator
    }

    /// Repairs the cluster made of `nodes`.
    ///
    /// Without a forced action, a prepared change is committed if any reachable node already
    /// committed it, and rolled back otherwise. With no prepared change, nodes that missed
    /// committed changes are synchronized from the most advanced node and restarted.
    ///
    /// # Errors
    ///
    /// Returns an error if the cluster cannot be repaired automatically, or if a node fails.
    pub async fn repair(
        &self,
        nodes: &[HostPort],
        forced: Option<RepairAction>,
    ) -> Result<RepairOutcome> {
        match forced {
            Some(RepairAction::Unlock) => return self.unlock(nodes).await,
            Some(RepairAction::Reset) => return self.reset(nodes).await,
            _ => {}
        }

        let analyzer = self.coordinator.discover(nodes).await;
        let state = analyzer.state();
        info!(%state, "repairing cluster");

        match state {
            GlobalConsistencyState::Accepting => {
                if let Some(action) = forced {
                    warn!(%action, "the cluster is accepting changes: nothing to {action}");
                }
                return Ok(RepairOutcome::Healthy);
            }
            GlobalConsistencyState::DiscoveryFailure => {
                return Err(Error::DiscoveryFailure(analyzer.description()));
            }
            GlobalConsistencyState::ConcurrentAccess => {
                return Err(Error::ConcurrentAccess(analyzer.description()));
            }
            GlobalConsistencyState::Inconsistent | GlobalConsistencyState::Desynchronized => {
                return Err(Error::InconsistentCluster {
                    state,
                    description: analyzer.description(),
                });
            }
            _ => {}
        }

        let Some(change_uuid) = analyzer.prepared_change().map(|change| change.uuid) else {
            let lagging = analyzer.lagging_nodes();
            if forced.is_none() && !lagging.is_empty() {
                return self.synchronize(&analyzer, lagging).await;
            }
            return Err(Error::InconsistentCluster {
                state,
                description: format!(
                    "{} No node holds a prepared change: manual intervention is required.",
                    analyzer.description()
                ),
            });
        };

        let decision = match forced {
            Some(RepairAction::Commit) => RecoveryDecision::Commit,
            Some(RepairAction::Rollback) => RecoveryDecision::Rollback,
            _ if analyzer.any_committed(change_uuid) => RecoveryDecision::Commit,
            _ => RecoveryDecision::Rollback,
        };
        if decision == RecoveryDecision::Commit && analyzer.any_rolled_back(change_uuid) {
            warn!(%change_uuid, "committing a change some nodes rolled back");
        }

        let outcome = self.coordinator.run_recovery(&analyzer, decision).await?;
        Ok(RepairOutcome::Recovered(outcome))
    }

    async fn unlock(&self, nodes: &[HostPort]) -> Result<RepairOutcome> {
        let online = self.online(nodes).await;
        warn!(nodes = online.len(), "forcing release of the configuration lock");

        let mut failures = Vec::new();
        for node in &online {
            if let Err(failure) = self
                .coordinator
                .call(
                    node,
                    ProtocolPhase::Maintenance,
                    self.coordinator.client().force_unlock(node),
                )
                .await
            {
                failures.push(failure);
            }
        }

        finish(failures)?;
        Ok(RepairOutcome::Unlocked(online))
    }

    async fn reset(&self, nodes: &[HostPort]) -> Result<RepairOutcome> {
        let online = self.online(nodes).await;
        warn!(nodes = online.len(), "resetting nodes");

        let mut failures = Vec::new();
        for node in &online {
            let client = self.coordinator.client();
            let result = match self
                .coordinator
                .call(node, ProtocolPhase::Maintenance, client.reset(node))
                .await
            {
                Ok(()) => {
                    self.coordinator
                        .call(
                            node,
                            ProtocolPhase::Maintenance,
                            client.restart(node, self.restart_delay),
                        )
                        .await
                }
                Err(failure) => Err(failure),
            };
            if let Err(failure) = result {
                failures.push(failure);
            }
        }

        finish(failures)?;
        Ok(RepairOutcome::Reset(online))
    }

    async fn synchronize(
        &self,
        analyzer: &ConsistencyAnalyzer,
        lagging: Vec<HostPort>,
    ) -> Result<RepairOutcome> {
        let Some(source) = analyzer.most_advanced_node() else {
            return Ok(RepairOutcome::Healthy);
        };
        info!(%source, nodes = lagging.len(), "synchronizing lagging nodes");

        let client = self.coordinator.client();
        let history = self
            .coordinator
            .call(&source, ProtocolPhase::Maintenance, client.change_history(&source))
            .await
            .map_err(|failure| Error::Protocol(ProtocolFailure::from(failure)))?;

        let mut failures = Vec::new();
        for node in &lagging {
            let result = match self
                .coordinator
                .call(
                    node,
                    ProtocolPhase::Maintenance,
                    client.reset_and_sync(node, history.clone()),
                )
                .await
            {
                Ok(()) => {
                    self.coordinator
                        .call(
                            node,
                            ProtocolPhase::Maintenance,
                            client.restart(node, self.restart_delay),
                        )
                        .await
                }
                Err(failure) => Err(failure),
            };
            if let Err(failure) = result {
                failures.push(failure);
            }
        }

        finish(failures)?;
        Ok(RepairOutcome::Synced(lagging))
    }

    async fn online(&self, nodes: &[HostPort]) -> Vec<HostPort> {
        self.coordinator
            .logical_states(nodes)
            .await
            .into_iter()
            .filter(|(_, state)| state.is_reachable())
            .map(|(node, _)| node)
            .collect()
    }
}

fn finish(failures: Vec<NodeFailure>) -> Result<()> {
    match ProtocolFailure::from_failures(failures) {
        Some(failure) => Err(Error::Protocol(failure)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use dynconf_model::{Cluster, LockContext, LogicalServerState, Node, Stripe};
    use dynconf_node::NodeProbe;
    use dynconf_node_memory::{Fault, MemoryNetwork, Phase};
    use dynconf_nomad::{ChangeRequestState, MutationInfo, NomadChange, RollbackMessage};

    use crate::config::CoordinatorConfig;

    fn cluster() -> Cluster {
        Cluster::new(vec![Stripe::new(
            "stripe1",
            vec![
                Node::new("node-1", "localhost", 9410),
                Node::new("node-2", "localhost", 9420),
                Node::new("node-3", "localhost", 9430),
            ],
        )])
    }

    async fn engine() -> (RepairEngine<MemoryNetwork>, Vec<HostPort>) {
        let network = MemoryNetwork::new();
        network.add_activated_cluster(&cluster()).await.unwrap();
        let coordinator = ChangeCoordinator::new(network, CoordinatorConfig::default());
        (
            RepairEngine::new(coordinator, Duration::from_millis(10)),
            cluster().addresses(),
        )
    }

    fn lease() -> NomadChange {
        NomadChange::SettingBatch(vec!["client-lease-duration=20s".parse().unwrap()])
    }

    #[test]
    fn test_parse_action() {
        assert_eq!("ROLLBACK".parse::<RepairAction>().unwrap(), RepairAction::Rollback);
        assert_eq!(RepairAction::Unlock.to_string(), "unlock");
        assert!("undo".parse::<RepairAction>().is_err());
    }

    #[tokio::test]
    async fn test_healthy_cluster() {
        let (engine, nodes) = engine().await;
        assert_eq!(
            engine.repair(&nodes, None).await.unwrap(),
            RepairOutcome::Healthy
        );
    }

    #[tokio::test]
    async fn test_partially_committed_is_committed() {
        let (engine, nodes) = engine().await;
        let network = engine.coordinator().client();
        network.inject(&nodes[0], Fault::Refuse(Phase::Commit));
        assert!(engine.coordinator().run_change(&nodes, lease()).await.is_err());
        network.clear_faults(&nodes[0]);

        let outcome = engine.repair(&nodes, None).await.unwrap();

        assert_matches!(
            outcome,
            RepairOutcome::Recovered(RecoveryOutcome { decision: RecoveryDecision::Commit, ref nodes, .. }) if nodes.len() == 1
        );
        let analyzer = engine.coordinator().discover(&nodes).await;
        assert_eq!(analyzer.state(), GlobalConsistencyState::Accepting);
        for node in &nodes {
            assert_eq!(network.discover(node).await.unwrap().current_version, 2);
        }
    }

    #[tokio::test]
    async fn test_lagging_node_is_synchronized() {
        let (engine, nodes) = engine().await;
        let network = engine.coordinator().client();
        network.set_online(&nodes[2], false);
        engine
            .coordinator()
            .run_change(&nodes[..2], lease())
            .await
            .unwrap();
        network.set_online(&nodes[2], true);

        let outcome = engine.repair(&nodes, None).await.unwrap();
        assert_eq!(outcome, RepairOutcome::Synced(vec![nodes[2].clone()]));

        let mut state = None;
        for _ in 0..100 {
            state = network.logical_state(&nodes[2]).await.ok();
            if state.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(state, Some(LogicalServerState::Passive));

        let synced = network.discover(&nodes[2]).await.unwrap();
        let reference = network.discover(&nodes[0]).await.unwrap();
        assert_eq!(synced.checkpoints, reference.checkpoints);
        assert_eq!(
            engine.coordinator().discover(&nodes).await.state(),
            GlobalConsistencyState::Accepting
        );
    }

    #[tokio::test]
    async fn test_forced_rollback_of_prepared_change() {
        let (engine, nodes) = engine().await;
        let network = engine.coordinator().client();
        network.inject(&nodes[1], Fault::Refuse(Phase::Commit));
        assert!(engine.coordinator().run_change(&nodes, lease()).await.is_err());
        network.clear_faults(&nodes[1]);
        assert_eq!(
            engine.coordinator().discover(&nodes).await.state(),
            GlobalConsistencyState::Prepared
        );

        engine
            .repair(&nodes, Some(RepairAction::Rollback))
            .await
            .unwrap();

        for node in &nodes {
            let latest = network.discover(node).await.unwrap().latest_change.unwrap();
            assert_eq!(latest.state, ChangeRequestState::RolledBack);
        }
    }

    #[tokio::test]
    async fn test_inconsistent_cluster_is_refused() {
        let (engine, nodes) = engine().await;
        let network = engine.coordinator().client();
        network.inject(&nodes[2], Fault::Refuse(Phase::Commit));
        assert!(engine.coordinator().run_change(&nodes, lease()).await.is_err());

        let discovered = network.discover(&nodes[2]).await.unwrap();
        let change_uuid = discovered.latest_change.unwrap().uuid;
        let rolled_back = network
            .rollback(
                &nodes[2],
                RollbackMessage {
                    mutation: MutationInfo {
                        expected_mutative_message_count: discovered.mutative_message_count,
                        host: "host".to_string(),
                        user: "user".to_string(),
                        timestamp: chrono::Utc::now(),
                    },
                    change_uuid,
                },
            )
            .await
            .unwrap();
        assert!(rolled_back.is_accepted());

        let result = engine.repair(&nodes, None).await;

        assert_matches!(
            result,
            Err(Error::InconsistentCluster { state: GlobalConsistencyState::Inconsistent, .. })
        );
    }

    #[tokio::test]
    async fn test_forced_unlock() {
        let (engine, nodes) = engine().await;
        let holder = ChangeCoordinator::new(
            engine.coordinator().client().clone(),
            CoordinatorConfig {
                lock_token: Some("gone".to_string()),
                ..CoordinatorConfig::default()
            },
        );
        holder
            .run_change(&nodes, NomadChange::Lock(LockContext::new("gone", "carol", "")))
            .await
            .unwrap();
        assert_eq!(
            engine.coordinator().discover(&nodes).await.state(),
            GlobalConsistencyState::ConcurrentAccess
        );

        let outcome = engine
            .repair(&nodes, Some(RepairAction::Unlock))
            .await
            .unwrap();

        assert_eq!(outcome, RepairOutcome::Unlocked(nodes.clone()));
        assert_eq!(
            engine.coordinator().discover(&nodes).await.state(),
            GlobalConsistencyState::Accepting
        );
    }

    #[tokio::test]
    async fn test_forced_reset() {
        let (engine, nodes) = engine().await;
        let network = engine.coordinator().client();

        let outcome = engine.repair(&nodes, Some(RepairAction::Reset)).await.unwrap();
        assert_eq!(outcome, RepairOutcome::Reset(nodes.clone()));

        for node in &nodes {
            let mut state = None;
            for _ in 0..100 {
                state = network.logical_state(node).await.ok();
                if state.is_some() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            assert_eq!(state, Some(LogicalServerState::Diagnostic));
            assert!(!network.is_activated(node).await.unwrap());
        }
    }
}
