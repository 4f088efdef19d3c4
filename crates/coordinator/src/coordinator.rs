use std::fmt::{self, Display};
use std::future::Future;

use chrono::Utc;
use dynconf_model::{HostPort, LogicalServerState};
use dynconf_node::NodeClient;
use dynconf_nomad::{
    AcceptRejectResponse, CommitMessage, MutationInfo, NomadChange, PrepareMessage,
    RollbackMessage,
};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analyzer::{ConsistencyAnalyzer, Discovery, GlobalConsistencyState, NodeSnapshot};
use crate::config::CoordinatorConfig;
use crate::error::{Error, NodeFailure, ProtocolFailure, ProtocolPhase, Result};

/// How to finish a change left prepared.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum RecoveryDecision {
    /// Commit the change.
    Commit,
    /// Roll the change back.
    Rollback,
}

impl Display for RecoveryDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Commit => write!(f, "commit"),
            Self::Rollback => write!(f, "rollback"),
        }
    }
}

/// A change applied to every target node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChangeOutcome {
    /// The change.
    pub change_uuid: Uuid,
    /// Version the change was applied at.
    pub version: u64,
    /// Nodes, in the order they were contacted.
    pub nodes: Vec<HostPort>,
}

/// A prepared change finished on every node holding it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RecoveryOutcome {
    /// The change.
    pub change_uuid: Uuid,
    /// How it was finished.
    pub decision: RecoveryDecision,
    /// Nodes, in the order they were contacted.
    pub nodes: Vec<HostPort>,
}

/// Drives the discover, prepare, commit and rollback phases across a set of nodes.
///
/// Read-only fan-out runs at most `concurrency` requests at once. Mutating phases are
/// sequential, passive nodes first and active nodes last.
#[derive(Clone, Debug)]
pub struct ChangeCoordinator<C>
where
    C: NodeClient,
{
    client: C,
    config: CoordinatorConfig,
}

impl<C> ChangeCoordinator<C>
where
    C: NodeClient,
{
    /// Creates a coordinator talking to nodes through `client`.
    pub const fn new(client: C, config: CoordinatorConfig) -> Self {
        Self { client, config }
    }

    /// The node client.
    pub const fn client(&self) -> &C {
        &self.client
    }

    /// The settings.
    pub const fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Sends one request, bounded by the call timeout.
    ///
    /// # Errors
    ///
    /// Returns the failure of the node if it fails or does not answer in time.
    pub async fn call<T, F>(
        &self,
        node: &HostPort,
        phase: ProtocolPhase,
        request: F,
    ) -> std::result::Result<T, NodeFailure>
    where
        F: Future<Output = std::result::Result<T, C::Error>>,
    {
        let timeout = self.config.call_timeout();
        match tokio::time::timeout(timeout, request).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(NodeFailure::new(node, phase, e.to_string())),
            Err(_) => Err(NodeFailure::new(
                node,
                phase,
                format!("no answer within {}s", timeout.as_secs()),
            )),
        }
    }

    /// Runs `request` against every node, at most `concurrency` at once. Results keep the
    /// order of `nodes`.
    pub async fn fan_out<T, F, Fut>(&self, nodes: &[HostPort], request: F) -> Vec<T>
    where
        F: Fn(HostPort) -> Fut,
        Fut: Future<Output = T>,
    {
        let mut results: Vec<(usize, T)> = stream::iter(nodes.iter().cloned().enumerate())
            .map(|(index, node)| {
                let pending = request(node);
                async move { (index, pending.await) }
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, result)| result).collect()
    }

    /// Logical state of every node, [`LogicalServerState::Unreachable`] for those that do not
    /// answer.
    pub async fn logical_states(&self, nodes: &[HostPort]) -> Vec<(HostPort, LogicalServerState)> {
        self.fan_out(nodes, |node| async move {
            let state = self
                .call(&node, ProtocolPhase::Discover, self.client.logical_state(&node))
                .await
                .unwrap_or(LogicalServerState::Unreachable);
            (node, state)
        })
        .await
    }

    /// Discovers every node and analyzes the result.
    pub async fn discover(&self, nodes: &[HostPort]) -> ConsistencyAnalyzer {
        let snapshots = self
            .fan_out(nodes, |node| async move { self.snapshot(node).await })
            .await;
        let analyzer = ConsistencyAnalyzer::new(snapshots, self.config.lock_token.clone());

        debug!(nodes = nodes.len(), state = %analyzer.state(), "discovered cluster");
        analyzer
    }

    async fn snapshot(&self, node: HostPort) -> NodeSnapshot {
        let state = match self
            .call(&node, ProtocolPhase::Discover, self.client.logical_state(&node))
            .await
        {
            Ok(state) if state.is_reachable() => state,
            Ok(_) => return NodeSnapshot::unreachable(node),
            Err(failure) => {
                debug!(node = %node, "node unreachable: {}", failure.message);
                return NodeSnapshot::unreachable(node);
            }
        };

        match self
            .call(&node, ProtocolPhase::Discover, self.client.discover(&node))
            .await
        {
            Ok(response) => NodeSnapshot::responded(node, state, response),
            Err(failure) => {
                warn!(node = %node, "discovery failed: {}", failure.message);
                NodeSnapshot {
                    address: node,
                    state,
                    discovery: Discovery::Failed(failure.message),
                }
            }
        }
    }

    /// Applies `change` to every node of `nodes`.
    ///
    /// Every node must be reachable and accepting. Nodes prepare one after the other; if one
    /// fails, the nodes already prepared are rolled back and nothing is committed. Once all
    /// are prepared, nodes commit one after the other; a failed commit stops the run and
    /// leaves the remaining nodes prepared, awaiting repair.
    ///
    /// # Errors
    ///
    /// Returns an error if discovery does not show an accepting cluster, another client
    /// interferes, or a node fails or rejects a request.
    pub async fn run_change(
        &self,
        nodes: &[HostPort],
        change: NomadChange,
    ) -> Result<ChangeOutcome> {
        if nodes.is_empty() {
            return Err(Error::Validation("no node to apply the change to".to_string()));
        }
        let summary = change.summary();
        info!(change = %summary, nodes = nodes.len(), "starting change");

        let analyzer = self.discover(nodes).await;
        ensure_accepting(&analyzer)?;
        let unreachable = analyzer.unreachable_nodes();
        if !unreachable.is_empty() {
            return Err(Error::DiscoveryFailure(format!(
                "unable to reach {}",
                unreachable
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        let again = self.discover(nodes).await;
        ensure_unchanged(&analyzer, &again)?;

        let change_uuid = Uuid::new_v4();
        let version = analyzer.highest_version() + 1;
        let mut plan = plan(&analyzer, analyzer.nodes().iter().map(|node| &node.address));

        for index in 0..plan.len() {
            let (node, count) = &plan[index];
            let message = PrepareMessage {
                mutation: self.mutation(*count),
                change_uuid,
                version,
                change: change.clone(),
                lock_token: self.config.lock_token.clone(),
            };
            let result = self
                .call(node, ProtocolPhase::Prepare, self.client.prepare(node, message))
                .await
                .and_then(|response| check(node, ProtocolPhase::Prepare, response));

            match result {
                Ok(()) => {
                    debug!(node = %node, %change_uuid, "prepared");
                    plan[index].1 += 1;
                }
                Err(failure) => {
                    warn!(node = %failure.node, "{failure}");
                    let concurrent = failure.is_concurrent_access();

                    let secondary = self
                        .decide_all(&mut plan[..index], change_uuid, RecoveryDecision::Rollback)
                        .await;
                    let prepared: Vec<HostPort> =
                        secondary.iter().map(|failure| failure.node.clone()).collect();

                    if concurrent {
                        return Err(Error::ConcurrentAccess(format!(
                            "another client changed the cluster while this change was prepared: {failure}"
                        )));
                    }
                    return Err(Error::Protocol(ProtocolFailure {
                        primary: failure,
                        secondary,
                        committed: Vec::new(),
                        prepared,
                    }));
                }
            }
        }

        for index in 0..plan.len() {
            let (node, count) = &plan[index];
            let message = CommitMessage {
                mutation: self.mutation(*count),
                change_uuid,
            };
            let result = self
                .call(node, ProtocolPhase::Commit, self.client.commit(node, message))
                .await
                .and_then(|response| check(node, ProtocolPhase::Commit, response));

            if let Err(failure) = result {
                warn!(node = %failure.node, "{failure}");
                let (committed, prepared) = plan.split_at(index);
                return Err(Error::Protocol(ProtocolFailure {
                    primary: failure,
                    secondary: Vec::new(),
                    committed: committed.iter().map(|(node, _)| node.clone()).collect(),
                    prepared: prepared.iter().map(|(node, _)| node.clone()).collect(),
                }));
            }
            debug!(node = %node, %change_uuid, "committed");
            plan[index].1 += 1;
        }

        info!(change = %summary, %change_uuid, version, "change committed");
        Ok(ChangeOutcome {
            change_uuid,
            version,
            nodes: plan.into_iter().map(|(node, _)| node).collect(),
        })
    }

    /// Commits or rolls back the prepared change on every node holding it. Every node is
    /// attempted even when an earlier one fails.
    ///
    /// # Errors
    ///
    /// Returns an error if no node holds a prepared change, or if any node fails.
    pub async fn run_recovery(
        &self,
        analyzer: &ConsistencyAnalyzer,
        decision: RecoveryDecision,
    ) -> Result<RecoveryOutcome> {
        let Some(change) = analyzer.prepared_change() else {
            return Err(Error::Validation(
                "no node holds a prepared change".to_string(),
            ));
        };
        let change_uuid = change.uuid;
        let targets = analyzer.nodes_prepared_with(change_uuid);
        let mut plan = plan(analyzer, targets.iter());

        info!(%change_uuid, %decision, nodes = plan.len(), "finishing prepared change");
        let failures = self.decide_all(&mut plan, change_uuid, decision).await;

        if let Some(mut failure) = ProtocolFailure::from_failures(failures) {
            let failed: Vec<HostPort> = std::iter::once(&failure.primary)
                .chain(&failure.secondary)
                .map(|failure| failure.node.clone())
                .collect();
            let decided: Vec<HostPort> = plan
                .iter()
                .map(|(node, _)| node.clone())
                .filter(|node| !failed.contains(node))
                .collect();
            if decision == RecoveryDecision::Commit {
                failure.committed = decided;
            }
            failure.prepared = failed;
            return Err(Error::Protocol(failure));
        }

        Ok(RecoveryOutcome {
            change_uuid,
            decision,
            nodes: plan.into_iter().map(|(node, _)| node).collect(),
        })
    }

    async fn decide_all(
        &self,
        plan: &mut [(HostPort, u64)],
        change_uuid: Uuid,
        decision: RecoveryDecision,
    ) -> Vec<NodeFailure> {
        let mut failures = Vec::new();

        for (node, count) in plan.iter_mut() {
            let mutation = self.mutation(*count);
            let result = match decision {
                RecoveryDecision::Commit => self
                    .call(
                        node,
                        ProtocolPhase::Commit,
                        self.client.commit(node, CommitMessage { mutation, change_uuid }),
                    )
                    .await
                    .and_then(|response| check(node, ProtocolPhase::Commit, response)),
                RecoveryDecision::Rollback => self
                    .call(
                        node,
                        ProtocolPhase::Rollback,
                        self.client
                            .rollback(node, RollbackMessage { mutation, change_uuid }),
                    )
                    .await
                    .and_then(|response| check(node, ProtocolPhase::Rollback, response)),
            };

            match result {
                Ok(()) => {
                    debug!(node = %node, %change_uuid, %decision, "decided");
                    *count += 1;
                }
                Err(failure) => {
                    warn!(node = %failure.node, "{failure}");
                    failures.push(failure);
                }
            }
        }

        failures
    }

    fn mutation(&self, expected_mutative_message_count: u64) -> MutationInfo {
        MutationInfo {
            expected_mutative_message_count,
            host: self.config.host.clone(),
            user: self.config.user.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// Maps a verdict other than accepting to the error refusing a new change.
///
/// # Errors
///
/// Returns an error unless the verdict is [`GlobalConsistencyState::Accepting`].
pub fn ensure_accepting(analyzer: &ConsistencyAnalyzer) -> Result<()> {
    let state = analyzer.state();
    match state {
        GlobalConsistencyState::Accepting => Ok(()),
        GlobalConsistencyState::DiscoveryFailure => {
            Err(Error::DiscoveryFailure(analyzer.description()))
        }
        GlobalConsistencyState::ConcurrentAccess => {
            Err(Error::ConcurrentAccess(analyzer.description()))
        }
        GlobalConsistencyState::Inconsistent | GlobalConsistencyState::Desynchronized => {
            Err(Error::InconsistentCluster {
                state,
                description: analyzer.description(),
            })
        }
        _ => Err(Error::RepairRequired {
            state,
            description: analyzer.description(),
        }),
    }
}

fn ensure_unchanged(first: &ConsistencyAnalyzer, second: &ConsistencyAnalyzer) -> Result<()> {
    for snapshot in first.nodes() {
        let before = snapshot.response();
        let after = second.response(&snapshot.address);
        let moved = match (before, after) {
            (Some(before), Some(after)) => {
                before.mutative_message_count != after.mutative_message_count
            }
            _ => true,
        };
        if moved {
            let by = after
                .and_then(|after| after.last_mutation_user.clone())
                .unwrap_or_else(|| "an unknown client".to_string());
            return Err(Error::ConcurrentAccess(format!(
                "node {} was changed by {by} during discovery",
                snapshot.address
            )));
        }
    }
    Ok(())
}

/// Orders `targets` passive nodes first, active nodes last, each with the mutative message
/// count it reported.
fn plan<'a>(
    analyzer: &ConsistencyAnalyzer,
    targets: impl Iterator<Item = &'a HostPort>,
) -> Vec<(HostPort, u64)> {
    let mut ordered: Vec<(bool, HostPort, u64)> = targets
        .filter_map(|address| {
            let snapshot = analyzer.nodes().iter().find(|node| &node.address == address)?;
            let response = snapshot.response()?;
            Some((
                snapshot.state.is_active(),
                address.clone(),
                response.mutative_message_count,
            ))
        })
        .collect();
    ordered.sort_by_key(|(active, _, _)| *active);
    ordered
        .into_iter()
        .map(|(_, node, count)| (node, count))
        .collect()
}

fn check(
    node: &HostPort,
    phase: ProtocolPhase,
    response: AcceptRejectResponse,
) -> std::result::Result<(), NodeFailure> {
    match response {
        AcceptRejectResponse::Accepted => Ok(()),
        AcceptRejectResponse::Rejected {
            reason,
            message,
            last_mutation_host,
            last_mutation_user,
        } => {
            let message = match (last_mutation_host, last_mutation_user) {
                (Some(host), Some(user)) => {
                    format!("{message} (last changed by {user} from {host})")
                }
                _ => message,
            };
            Err(NodeFailure::rejected(node, phase, reason, message))
        }
    }
}
