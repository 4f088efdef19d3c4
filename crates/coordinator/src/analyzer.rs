//! Classification of a set of per-node discovery snapshots into one cluster-wide verdict.
//!
//! Classification is evaluated in priority order, first match wins: discovery failure,
//! concurrent access, inconsistent, desynchronized, accepting, then the prepared and partial
//! states. Unreachable nodes only ever turn a prepared, partial or unknown verdict into its
//! `Maybe*` counterpart.

use std::collections::{BTreeMap, HashSet};
use std::fmt::{self, Display};

use dynconf_model::{HostPort, LockContext, LogicalServerState};
use dynconf_nomad::{ChangeDetails, ChangeRequestState, DiscoverResponse, NomadMode};
use uuid::Uuid;

/// Cluster-wide consistency verdict.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum GlobalConsistencyState {
    /// Every reachable node accepts new changes and reports the same latest committed change.
    Accepting,
    /// Every node holds the same undecided change.
    Prepared,
    /// Every reachable node holds the same undecided change; some nodes are unreachable.
    MaybePrepared,
    /// Some nodes prepared a change the others never saw.
    PartiallyPrepared,
    /// [`Self::PartiallyPrepared`] with unreachable nodes.
    MaybePartiallyPrepared,
    /// Some nodes committed a change the others still hold prepared.
    PartiallyCommitted,
    /// [`Self::PartiallyCommitted`] with unreachable nodes.
    MaybePartiallyCommitted,
    /// Some nodes rolled back a change the others still hold prepared.
    PartiallyRolledBack,
    /// [`Self::PartiallyRolledBack`] with unreachable nodes.
    MaybePartiallyRolledBack,
    /// A change was committed on some nodes and rolled back on others.
    Inconsistent,
    /// Nodes disagree on their committed history.
    Desynchronized,
    /// Discovery could not establish any ground truth.
    DiscoveryFailure,
    /// Another client holds the configuration lock or changed the cluster meanwhile.
    ConcurrentAccess,
    /// None of the above.
    Unknown,
    /// [`Self::Unknown`] with unreachable nodes.
    MaybeUnknown,
}

impl GlobalConsistencyState {
    /// Every state.
    pub const ALL: [Self; 15] = [
        Self::Accepting,
        Self::Prepared,
        Self::MaybePrepared,
        Self::PartiallyPrepared,
        Self::MaybePartiallyPrepared,
        Self::PartiallyCommitted,
        Self::MaybePartiallyCommitted,
        Self::PartiallyRolledBack,
        Self::MaybePartiallyRolledBack,
        Self::Inconsistent,
        Self::Desynchronized,
        Self::DiscoveryFailure,
        Self::ConcurrentAccess,
        Self::Unknown,
        Self::MaybeUnknown,
    ];

    /// Whether this is a `Maybe*` state.
    #[must_use]
    pub const fn is_ambiguous(self) -> bool {
        matches!(
            self,
            Self::MaybePrepared
                | Self::MaybePartiallyPrepared
                | Self::MaybePartiallyCommitted
                | Self::MaybePartiallyRolledBack
                | Self::MaybeUnknown
        )
    }

    /// The `Maybe*` counterpart of a state unreachable nodes could tip, or the state itself.
    #[must_use]
    pub const fn ambiguous(self) -> Self {
        match self {
            Self::Prepared => Self::MaybePrepared,
            Self::PartiallyPrepared => Self::MaybePartiallyPrepared,
            Self::PartiallyCommitted => Self::MaybePartiallyCommitted,
            Self::PartiallyRolledBack => Self::MaybePartiallyRolledBack,
            Self::Unknown => Self::MaybeUnknown,
            other => other,
        }
    }

    /// The definite counterpart of a `Maybe*` state, or the state itself.
    #[must_use]
    pub const fn definite(self) -> Self {
        match self {
            Self::MaybePrepared => Self::Prepared,
            Self::MaybePartiallyPrepared => Self::PartiallyPrepared,
            Self::MaybePartiallyCommitted => Self::PartiallyCommitted,
            Self::MaybePartiallyRolledBack => Self::PartiallyRolledBack,
            Self::MaybeUnknown => Self::Unknown,
            other => other,
        }
    }

    /// Whether the verdict is decided from reachable evidence only.
    #[must_use]
    pub const fn ignores_unreachable(self) -> bool {
        matches!(
            self,
            Self::Accepting
                | Self::Inconsistent
                | Self::Desynchronized
                | Self::DiscoveryFailure
                | Self::ConcurrentAccess
        )
    }

    /// Whether an automatic repair can fix the cluster.
    #[must_use]
    pub const fn is_repairable(self) -> bool {
        !self.ignores_unreachable()
    }
}

impl Display for GlobalConsistencyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Accepting => "ACCEPTING",
            Self::Prepared => "PREPARED",
            Self::MaybePrepared => "MAYBE_PREPARED",
            Self::PartiallyPrepared => "PARTIALLY_PREPARED",
            Self::MaybePartiallyPrepared => "MAYBE_PARTIALLY_PREPARED",
            Self::PartiallyCommitted => "PARTIALLY_COMMITTED",
            Self::MaybePartiallyCommitted => "MAYBE_PARTIALLY_COMMITTED",
            Self::PartiallyRolledBack => "PARTIALLY_ROLLED_BACK",
            Self::MaybePartiallyRolledBack => "MAYBE_PARTIALLY_ROLLED_BACK",
            Self::Inconsistent => "INCONSISTENT",
            Self::Desynchronized => "DESYNCHRONIZED",
            Self::DiscoveryFailure => "DISCOVERY_FAILURE",
            Self::ConcurrentAccess => "CONCURRENT_ACCESS",
            Self::Unknown => "UNKNOWN",
            Self::MaybeUnknown => "MAYBE_UNKNOWN",
        };
        f.write_str(name)
    }
}

/// A verdict together with the evidence that made it ambiguous.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Verdict {
    /// Decided by every expected node.
    Definite(GlobalConsistencyState),

    /// Some nodes could not be reached and could tip the verdict.
    Ambiguous {
        /// Verdict from the reachable nodes.
        state: GlobalConsistencyState,
        /// Nodes that could not be reached.
        unreachable: Vec<HostPort>,
    },
}

impl Verdict {
    /// The flat state.
    #[must_use]
    pub const fn state(&self) -> GlobalConsistencyState {
        match self {
            Self::Definite(state) => *state,
            Self::Ambiguous { state, .. } => state.ambiguous(),
        }
    }
}

/// Outcome of discovering one node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Discovery {
    /// The node answered.
    Responded(DiscoverResponse),

    /// The node is up but discovery failed.
    Failed(String),

    /// The node could not be reached.
    Unreachable,
}

/// What is known about one node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeSnapshot {
    /// Node address.
    pub address: HostPort,

    /// Logical state, [`LogicalServerState::Unreachable`] when the node did not answer.
    pub state: LogicalServerState,

    /// Discovery outcome.
    pub discovery: Discovery,
}

impl NodeSnapshot {
    /// Snapshot of a node that answered.
    #[must_use]
    pub const fn responded(
        address: HostPort,
        state: LogicalServerState,
        response: DiscoverResponse,
    ) -> Self {
        Self {
            address,
            state,
            discovery: Discovery::Responded(response),
        }
    }

    /// Snapshot of a node that could not be reached.
    #[must_use]
    pub const fn unreachable(address: HostPort) -> Self {
        Self {
            address,
            state: LogicalServerState::Unreachable,
            discovery: Discovery::Unreachable,
        }
    }

    /// The discover response, if the node answered.
    #[must_use]
    pub const fn response(&self) -> Option<&DiscoverResponse> {
        match &self.discovery {
            Discovery::Responded(response) => Some(response),
            _ => None,
        }
    }
}

/// Nodes disagreeing on the outcome of one change.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InconsistentGroups {
    /// The change.
    pub change_uuid: Uuid,

    /// Nodes that committed it.
    pub committed: Vec<HostPort>,

    /// Nodes that rolled it back.
    pub rolled_back: Vec<HostPort>,
}

/// Who else is working on the cluster.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConcurrentClient {
    /// Node reporting the other client.
    pub node: HostPort,

    /// Lock held by the other client.
    pub lock: Option<LockContext>,

    /// Host of the last mutation seen by the node.
    pub host: Option<String>,

    /// User of the last mutation seen by the node.
    pub user: Option<String>,
}

/// Analyzes the discovery snapshots of every expected node.
#[derive(Clone, Debug)]
pub struct ConsistencyAnalyzer {
    nodes: Vec<NodeSnapshot>,
    lock_token: Option<String>,
    verdict: Verdict,
}

impl ConsistencyAnalyzer {
    /// Classifies `nodes`. `lock_token` is the token of the calling client, if it holds the
    /// configuration lock.
    #[must_use]
    pub fn new(nodes: Vec<NodeSnapshot>, lock_token: Option<String>) -> Self {
        let verdict = classify(&nodes, lock_token.as_deref());
        Self {
            nodes,
            lock_token,
            verdict,
        }
    }

    /// The verdict.
    #[must_use]
    pub const fn verdict(&self) -> &Verdict {
        &self.verdict
    }

    /// The flat verdict.
    #[must_use]
    pub const fn state(&self) -> GlobalConsistencyState {
        self.verdict.state()
    }

    /// Every snapshot, in the order given.
    #[must_use]
    pub fn nodes(&self) -> &[NodeSnapshot] {
        &self.nodes
    }

    /// The discover response of a node.
    #[must_use]
    pub fn response(&self, address: &HostPort) -> Option<&DiscoverResponse> {
        self.nodes
            .iter()
            .find(|node| &node.address == address)
            .and_then(NodeSnapshot::response)
    }

    /// Nodes that answered their logical state.
    #[must_use]
    pub fn online_nodes(&self) -> Vec<HostPort> {
        self.nodes
            .iter()
            .filter(|node| node.state.is_reachable())
            .map(|node| node.address.clone())
            .collect()
    }

    /// Nodes that could not be reached.
    #[must_use]
    pub fn unreachable_nodes(&self) -> Vec<HostPort> {
        self.nodes
            .iter()
            .filter(|node| matches!(node.discovery, Discovery::Unreachable))
            .map(|node| node.address.clone())
            .collect()
    }

    /// Online nodes running an activated configuration.
    #[must_use]
    pub fn online_activated_nodes(&self) -> Vec<HostPort> {
        self.select(|node, response| {
            !node.state.is_diagnostic() && response.latest_change.is_some()
        })
    }

    /// Online nodes started in diagnostic mode with a change history, usually after a
    /// failed change.
    #[must_use]
    pub fn online_in_repair_nodes(&self) -> Vec<HostPort> {
        self.select(|node, response| {
            node.state.is_diagnostic() && response.latest_change.is_some()
        })
    }

    /// Online nodes not activated yet.
    #[must_use]
    pub fn online_in_configuration_nodes(&self) -> Vec<HostPort> {
        self.select(|node, response| {
            node.state.is_diagnostic() && response.latest_change.is_none()
        })
    }

    /// Nodes holding `change_uuid` as their prepared change.
    #[must_use]
    pub fn nodes_prepared_with(&self, change_uuid: Uuid) -> Vec<HostPort> {
        self.select(|_, response| {
            response.mode == NomadMode::Prepared
                && response
                    .latest_change
                    .as_ref()
                    .is_some_and(|change| change.uuid == change_uuid)
        })
    }

    /// The undecided change held by the reachable nodes, if any.
    #[must_use]
    pub fn prepared_change(&self) -> Option<&ChangeDetails> {
        self.responses()
            .filter(|(_, response)| response.mode == NomadMode::Prepared)
            .find_map(|(_, response)| response.latest_change.as_ref())
    }

    /// Whether any reachable node committed `change_uuid`.
    #[must_use]
    pub fn any_committed(&self, change_uuid: Uuid) -> bool {
        self.responses()
            .any(|(_, response)| response.has_committed(change_uuid))
    }

    /// Whether any reachable node rolled back `change_uuid`.
    #[must_use]
    pub fn any_rolled_back(&self, change_uuid: Uuid) -> bool {
        self.responses()
            .any(|(_, response)| is_rolled_back(response, change_uuid))
    }

    /// Nodes missing committed changes the others have. Only meaningful when the cluster is
    /// not desynchronized.
    #[must_use]
    pub fn lagging_nodes(&self) -> Vec<HostPort> {
        lagging_nodes(&self.nodes)
    }

    /// A reachable node holding the longest committed history.
    #[must_use]
    pub fn most_advanced_node(&self) -> Option<HostPort> {
        self.responses()
            .max_by_key(|(_, response)| response.checkpoints.len())
            .map(|(address, _)| address.clone())
    }

    /// For an inconsistent cluster, the nodes on each side of the disputed change.
    #[must_use]
    pub fn inconsistent_groups(&self) -> Option<InconsistentGroups> {
        inconsistent_groups(&self.nodes)
    }

    /// For a desynchronized cluster, the nodes grouped by committed history.
    #[must_use]
    pub fn desynchronized_groups(&self) -> Vec<Vec<HostPort>> {
        let mut groups: BTreeMap<Vec<Uuid>, Vec<HostPort>> = BTreeMap::new();
        for (address, response) in self.responses() {
            let history = response.checkpoints.iter().map(|change| change.uuid).collect();
            groups.entry(history).or_default().push(address.clone());
        }
        if groups.len() < 2 {
            return Vec::new();
        }
        groups.into_values().collect()
    }

    /// The other client holding the lock, if any.
    #[must_use]
    pub fn concurrent_client(&self) -> Option<ConcurrentClient> {
        concurrent_client(&self.nodes, self.lock_token.as_deref())
    }

    /// The advisory lock reported by the reachable nodes.
    #[must_use]
    pub fn lock(&self) -> Option<&LockContext> {
        self.responses()
            .find_map(|(_, response)| response.lock.as_ref())
    }

    /// Highest version reported by any reachable node.
    #[must_use]
    pub fn highest_version(&self) -> u64 {
        self.responses()
            .map(|(_, response)| response.highest_version)
            .max()
            .unwrap_or_default()
    }

    /// Explanation of the verdict for an operator.
    #[must_use]
    pub fn description(&self) -> String {
        let unreachable = self.unreachable_nodes();
        let caveat = if unreachable.is_empty() {
            String::new()
        } else {
            format!(
                " Some nodes are not reachable ({}), the verdict might change once they are back.",
                join(&unreachable)
            )
        };

        match self.state() {
            GlobalConsistencyState::Accepting => match self.lock() {
                Some(lock) => format!(
                    "The cluster configuration is healthy. Config is locked by {}.",
                    lock.owner()
                ),
                None => "The cluster configuration is healthy.".to_string(),
            },
            GlobalConsistencyState::Prepared | GlobalConsistencyState::MaybePrepared => format!(
                "A new cluster configuration has been prepared on all nodes but not yet committed. \
                 No further configuration change can be done until the 'repair' command is run \
                 to finalize the configuration change.{caveat}"
            ),
            GlobalConsistencyState::PartiallyPrepared
            | GlobalConsistencyState::MaybePartiallyPrepared => format!(
                "A new cluster configuration has been partially prepared (some nodes didn't get \
                 the new change). No further configuration change can be done until the 'repair' \
                 command is run to rollback the prepared nodes.{caveat}"
            ),
            GlobalConsistencyState::PartiallyCommitted
            | GlobalConsistencyState::MaybePartiallyCommitted => format!(
                "A new cluster configuration has been partially committed (some nodes didn't \
                 commit). No further configuration change can be done until the 'repair' command \
                 is run to finalize the configuration change.{caveat}"
            ),
            GlobalConsistencyState::PartiallyRolledBack
            | GlobalConsistencyState::MaybePartiallyRolledBack => format!(
                "A new cluster configuration has been partially rolled back (some nodes didn't \
                 rollback). No further configuration change can be done until the 'repair' \
                 command is run to rollback all nodes.{caveat}"
            ),
            GlobalConsistencyState::Inconsistent => match self.inconsistent_groups() {
                Some(groups) => format!(
                    "Cluster configuration is inconsistent: change {} is committed on {} and \
                     rolled back on {}. Please refer to the Troubleshooting Guide for more help.",
                    groups.change_uuid,
                    join(&groups.committed),
                    join(&groups.rolled_back)
                ),
                None => "Cluster configuration is inconsistent. Please refer to the \
                         Troubleshooting Guide for more help."
                    .to_string(),
            },
            GlobalConsistencyState::Desynchronized => {
                let groups: Vec<String> = self
                    .desynchronized_groups()
                    .iter()
                    .map(|group| format!("[{}]", join(group)))
                    .collect();
                format!(
                    "Cluster configuration is desynchronized: nodes do not share the same committed \
                     history: {}. Please refer to the Troubleshooting Guide for more help.",
                    groups.join(", ")
                )
            }
            GlobalConsistencyState::DiscoveryFailure => {
                let failures: Vec<String> = self
                    .nodes
                    .iter()
                    .filter_map(|node| match &node.discovery {
                        Discovery::Failed(reason) => Some(format!("{}: {reason}", node.address)),
                        _ => None,
                    })
                    .collect();
                if failures.is_empty() {
                    "Unable to discover the cluster configuration: no node is reachable."
                        .to_string()
                } else {
                    format!(
                        "Unable to discover the cluster configuration: {}.",
                        failures.join(", ")
                    )
                }
            }
            GlobalConsistencyState::ConcurrentAccess => match self.concurrent_client() {
                Some(ConcurrentClient {
                    node,
                    lock: Some(lock),
                    ..
                }) => format!(
                    "Another client is changing the configuration: node {node} reports the \
                     config locked by {}.",
                    lock.owner()
                ),
                _ => "Another client is changing the configuration.".to_string(),
            },
            GlobalConsistencyState::Unknown | GlobalConsistencyState::MaybeUnknown => {
                let lagging = self.lagging_nodes();
                if self.prepared_change().is_none() && !lagging.is_empty() {
                    format!(
                        "Nodes {} missed some committed changes. No further configuration change \
                         can be done until the 'repair' command is run to synchronize them.{caveat}",
                        join(&lagging)
                    )
                } else {
                    format!(
                        "Unable to determine the global configuration state. There might be some \
                         configuration inconsistencies. Please look at each node details.{caveat}"
                    )
                }
            }
        }
    }

    fn responses(&self) -> impl Iterator<Item = (&HostPort, &DiscoverResponse)> {
        responses(&self.nodes)
    }

    fn select(&self, keep: impl Fn(&NodeSnapshot, &DiscoverResponse) -> bool) -> Vec<HostPort> {
        self.nodes
            .iter()
            .filter(|node| node.response().is_some_and(|response| keep(node, response)))
            .map(|node| node.address.clone())
            .collect()
    }
}

fn responses(nodes: &[NodeSnapshot]) -> impl Iterator<Item = (&HostPort, &DiscoverResponse)> {
    nodes
        .iter()
        .filter_map(|node| node.response().map(|response| (&node.address, response)))
}

fn join(addresses: &[HostPort]) -> String {
    addresses
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn is_rolled_back(response: &DiscoverResponse, change_uuid: Uuid) -> bool {
    response.latest_change.as_ref().is_some_and(|change| {
        change.uuid == change_uuid && change.state == ChangeRequestState::RolledBack
    })
}

fn concurrent_client(nodes: &[NodeSnapshot], lock_token: Option<&str>) -> Option<ConcurrentClient> {
    responses(nodes).find_map(|(address, response)| {
        response
            .lock
            .as_ref()
            .filter(|lock| Some(lock.token.as_str()) != lock_token)
            .map(|lock| ConcurrentClient {
                node: address.clone(),
                lock: Some(lock.clone()),
                host: response.last_mutation_host.clone(),
                user: response.last_mutation_user.clone(),
            })
    })
}

fn inconsistent_groups(nodes: &[NodeSnapshot]) -> Option<InconsistentGroups> {
    let rolled_back: Vec<(&HostPort, Uuid)> = responses(nodes)
        .filter_map(|(address, response)| {
            response
                .latest_change
                .as_ref()
                .filter(|change| change.state == ChangeRequestState::RolledBack)
                .map(|change| (address, change.uuid))
        })
        .collect();

    rolled_back.iter().find_map(|(_, change_uuid)| {
        let committed: Vec<HostPort> = responses(nodes)
            .filter(|(_, response)| response.has_committed(*change_uuid))
            .map(|(address, _)| address.clone())
            .collect();
        if committed.is_empty() {
            return None;
        }
        Some(InconsistentGroups {
            change_uuid: *change_uuid,
            committed,
            rolled_back: rolled_back
                .iter()
                .filter(|(_, uuid)| uuid == change_uuid)
                .map(|(address, _)| (*address).clone())
                .collect(),
        })
    })
}

fn is_desynchronized(nodes: &[NodeSnapshot]) -> bool {
    let all: Vec<&DiscoverResponse> = responses(nodes).map(|(_, response)| response).collect();
    all.iter()
        .enumerate()
        .any(|(i, a)| all[i + 1..].iter().any(|b| !a.shares_history_with(b)))
}

/// Responders whose committed history is a strict prefix of the longest one.
fn lagging_nodes(nodes: &[NodeSnapshot]) -> Vec<HostPort> {
    let Some(longest) = responses(nodes)
        .map(|(_, response)| response.checkpoints.len())
        .max()
    else {
        return Vec::new();
    };
    responses(nodes)
        .filter(|(_, response)| response.checkpoints.len() < longest)
        .map(|(address, _)| address.clone())
        .collect()
}

fn classify(nodes: &[NodeSnapshot], lock_token: Option<&str>) -> Verdict {
    use GlobalConsistencyState as State;

    let discovery_failed = nodes
        .iter()
        .any(|node| matches!(node.discovery, Discovery::Failed(_)));
    if discovery_failed || responses(nodes).next().is_none() {
        return Verdict::Definite(State::DiscoveryFailure);
    }

    if concurrent_client(nodes, lock_token).is_some() {
        return Verdict::Definite(State::ConcurrentAccess);
    }

    if inconsistent_groups(nodes).is_some() {
        return Verdict::Definite(State::Inconsistent);
    }

    if is_desynchronized(nodes) {
        return Verdict::Definite(State::Desynchronized);
    }

    let all_accepting =
        responses(nodes).all(|(_, response)| response.mode == NomadMode::Accepting);
    if all_accepting && lagging_nodes(nodes).is_empty() {
        return Verdict::Definite(State::Accepting);
    }

    // nodes not activated yet have no change and take no part in the verdict
    let latest: Vec<&ChangeDetails> = responses(nodes)
        .filter_map(|(_, response)| response.latest_change.as_ref())
        .collect();
    let uuids: HashSet<Uuid> = latest.iter().map(|change| change.uuid).collect();
    let count = |state: ChangeRequestState| {
        latest
            .iter()
            .filter(|change| change.state == state)
            .count()
    };
    let prepared = count(ChangeRequestState::Prepared);
    let committed = count(ChangeRequestState::Committed);
    let rolled_back = count(ChangeRequestState::RolledBack);

    let state = if uuids.len() == 1 && prepared > 0 && prepared == latest.len() {
        State::Prepared
    } else if uuids.len() > 1 && prepared > 0 {
        State::PartiallyPrepared
    } else if uuids.len() == 1 && committed > 0 && prepared > 0 && rolled_back == 0 {
        State::PartiallyCommitted
    } else if uuids.len() == 1 && rolled_back > 0 && prepared > 0 && committed == 0 {
        State::PartiallyRolledBack
    } else {
        State::Unknown
    };

    let unreachable: Vec<HostPort> = nodes
        .iter()
        .filter(|node| matches!(node.discovery, Discovery::Unreachable))
        .map(|node| node.address.clone())
        .collect();

    if unreachable.is_empty() {
        Verdict::Definite(state)
    } else {
        Verdict::Ambiguous { state, unreachable }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use chrono::Utc;

    pub(crate) fn change(uuid: Uuid, state: ChangeRequestState, version: u64) -> ChangeDetails {
        ChangeDetails {
            uuid,
            state,
            version,
            summary: "set client-lease-duration=20s".to_string(),
            creation_host: "host".to_string(),
            creation_user: "user".to_string(),
            creation_timestamp: Utc::now(),
        }
    }

    pub(crate) fn response(
        history: &[Uuid],
        latest: Option<(Uuid, ChangeRequestState)>,
    ) -> DiscoverResponse {
        let checkpoints: Vec<ChangeDetails> = history
            .iter()
            .enumerate()
            .map(|(i, uuid)| change(*uuid, ChangeRequestState::Committed, i as u64 + 1))
            .collect();
        let latest_change = match latest {
            Some((uuid, state)) => Some(change(uuid, state, history.len() as u64 + 1)),
            None => checkpoints.last().cloned(),
        };
        let mode = match &latest_change {
            Some(change) if change.state == ChangeRequestState::Prepared => NomadMode::Prepared,
            _ => NomadMode::Accepting,
        };

        DiscoverResponse {
            mode,
            mutative_message_count: history.len() as u64 * 2,
            last_mutation_host: Some("host".to_string()),
            last_mutation_user: Some("user".to_string()),
            last_mutation_timestamp: Some(Utc::now()),
            current_version: history.len() as u64,
            highest_version: latest_change.as_ref().map_or(0, |change| change.version),
            latest_change,
            checkpoints,
            lock: None,
        }
    }

    fn node(port: u16, response: DiscoverResponse) -> NodeSnapshot {
        NodeSnapshot::responded(
            HostPort::new("localhost", port),
            LogicalServerState::Active,
            response,
        )
    }

    fn analyze(nodes: Vec<NodeSnapshot>) -> GlobalConsistencyState {
        ConsistencyAnalyzer::new(nodes, None).state()
    }

    #[test]
    fn test_accepting() {
        let history = [Uuid::new_v4(), Uuid::new_v4()];
        let state = analyze(vec![
            node(1, response(&history, None)),
            node(2, response(&history, None)),
        ]);
        assert_eq!(state, GlobalConsistencyState::Accepting);
    }

    #[test]
    fn test_lagging_node_is_not_accepting() {
        let history = [Uuid::new_v4(), Uuid::new_v4()];
        let analyzer = ConsistencyAnalyzer::new(
            vec![
                node(1, response(&history, None)),
                node(2, response(&history, None)),
                node(3, response(&history[..1], None)),
            ],
            None,
        );

        assert_eq!(analyzer.state(), GlobalConsistencyState::Unknown);
        assert_eq!(analyzer.lagging_nodes(), vec![HostPort::new("localhost", 3)]);
        assert!(analyzer.description().contains("Nodes localhost:3 missed"));
        assert_eq!(analyzer.most_advanced_node(), Some(HostPort::new("localhost", 2)));

        let with_unreachable = ConsistencyAnalyzer::new(
            vec![
                node(1, response(&history, None)),
                node(3, response(&history[..1], None)),
                NodeSnapshot::unreachable(HostPort::new("localhost", 4)),
            ],
            None,
        );
        assert_eq!(with_unreachable.state(), GlobalConsistencyState::MaybeUnknown);
    }

    #[test]
    fn test_prepared() {
        let history = [Uuid::new_v4()];
        let pending = Some((Uuid::new_v4(), ChangeRequestState::Prepared));
        let nodes = vec![
            node(1, response(&history, pending)),
            node(2, response(&history, pending)),
        ];
        assert_eq!(analyze(nodes.clone()), GlobalConsistencyState::Prepared);

        let mut with_unreachable = nodes;
        with_unreachable.push(NodeSnapshot::unreachable(HostPort::new("localhost", 3)));
        let analyzer = ConsistencyAnalyzer::new(with_unreachable, None);
        assert_eq!(analyzer.state(), GlobalConsistencyState::MaybePrepared);
        assert_eq!(
            analyzer.verdict(),
            &Verdict::Ambiguous {
                state: GlobalConsistencyState::Prepared,
                unreachable: vec![HostPort::new("localhost", 3)],
            }
        );
        assert!(analyzer.description().contains("localhost:3"));
    }

    #[test]
    fn test_partially_prepared() {
        let history = [Uuid::new_v4()];
        let pending = Uuid::new_v4();
        let state = analyze(vec![
            node(1, response(&history, Some((pending, ChangeRequestState::RolledBack)))),
            node(2, response(&history, Some((pending, ChangeRequestState::Prepared)))),
            node(3, response(&history, None)),
        ]);
        assert_eq!(state, GlobalConsistencyState::PartiallyPrepared);
    }

    #[test]
    fn test_partially_committed() {
        let pending = Uuid::new_v4();
        let base = Uuid::new_v4();
        let state = analyze(vec![
            node(1, response(&[base, pending], None)),
            node(2, response(&[base], Some((pending, ChangeRequestState::Prepared)))),
        ]);
        assert_eq!(state, GlobalConsistencyState::PartiallyCommitted);
    }

    #[test]
    fn test_partially_rolled_back() {
        let base = [Uuid::new_v4()];
        let pending = Uuid::new_v4();
        let state = analyze(vec![
            node(1, response(&base, Some((pending, ChangeRequestState::RolledBack)))),
            node(2, response(&base, Some((pending, ChangeRequestState::Prepared)))),
        ]);
        assert_eq!(state, GlobalConsistencyState::PartiallyRolledBack);
    }

    #[test]
    fn test_nodes_without_change_are_ignored() {
        let pending = Uuid::new_v4();
        let state = analyze(vec![
            node(1, response(&[], Some((pending, ChangeRequestState::RolledBack)))),
            node(2, response(&[], Some((pending, ChangeRequestState::Prepared)))),
            NodeSnapshot::responded(
                HostPort::new("localhost", 3),
                LogicalServerState::Diagnostic,
                response(&[], None),
            ),
        ]);
        assert_eq!(state, GlobalConsistencyState::PartiallyRolledBack);
    }

    #[test]
    fn test_inconsistent() {
        let base = Uuid::new_v4();
        let disputed = Uuid::new_v4();
        let analyzer = ConsistencyAnalyzer::new(
            vec![
                node(1, response(&[base, disputed], None)),
                node(2, response(&[base], Some((disputed, ChangeRequestState::RolledBack)))),
                NodeSnapshot::unreachable(HostPort::new("localhost", 3)),
            ],
            None,
        );

        assert_eq!(analyzer.state(), GlobalConsistencyState::Inconsistent);
        assert_eq!(
            analyzer.inconsistent_groups(),
            Some(InconsistentGroups {
                change_uuid: disputed,
                committed: vec![HostPort::new("localhost", 1)],
                rolled_back: vec![HostPort::new("localhost", 2)],
            })
        );
    }

    #[test]
    fn test_desynchronized() {
        let base = Uuid::new_v4();
        let analyzer = ConsistencyAnalyzer::new(
            vec![
                node(1, response(&[base, Uuid::new_v4()], None)),
                node(2, response(&[base, Uuid::new_v4()], None)),
            ],
            None,
        );

        assert_eq!(analyzer.state(), GlobalConsistencyState::Desynchronized);
        assert_eq!(analyzer.desynchronized_groups().len(), 2);
    }

    #[test]
    fn test_discovery_failure() {
        let history = [Uuid::new_v4()];
        let failed = NodeSnapshot {
            address: HostPort::new("localhost", 2),
            state: LogicalServerState::Active,
            discovery: Discovery::Failed("boom".to_string()),
        };
        let analyzer =
            ConsistencyAnalyzer::new(vec![node(1, response(&history, None)), failed], None);
        assert_eq!(analyzer.state(), GlobalConsistencyState::DiscoveryFailure);
        assert!(analyzer.description().contains("boom"));

        let nobody = vec![NodeSnapshot::unreachable(HostPort::new("localhost", 1))];
        assert_eq!(analyze(nobody), GlobalConsistencyState::DiscoveryFailure);
    }

    #[test]
    fn test_concurrent_access() {
        let history = [Uuid::new_v4()];
        let mut locked = response(&history, None);
        locked.lock = Some(LockContext::new("other-token", "bob", "ops"));
        let nodes = vec![node(1, locked.clone()), node(2, locked)];

        let analyzer = ConsistencyAnalyzer::new(nodes.clone(), None);
        assert_eq!(analyzer.state(), GlobalConsistencyState::ConcurrentAccess);
        assert!(analyzer.description().contains("bob (ops)"));

        let holder = ConsistencyAnalyzer::new(nodes, Some("other-token".to_string()));
        assert_eq!(holder.state(), GlobalConsistencyState::Accepting);
        assert!(holder.description().contains("locked by bob"));
    }

    #[test]
    fn test_node_classification() {
        let history = [Uuid::new_v4()];
        let analyzer = ConsistencyAnalyzer::new(
            vec![
                node(1, response(&history, None)),
                NodeSnapshot::responded(
                    HostPort::new("localhost", 2),
                    LogicalServerState::Diagnostic,
                    response(&history, None),
                ),
                NodeSnapshot::responded(
                    HostPort::new("localhost", 3),
                    LogicalServerState::Diagnostic,
                    response(&[], None),
                ),
                NodeSnapshot::unreachable(HostPort::new("localhost", 4)),
            ],
            None,
        );

        assert_eq!(analyzer.online_nodes().len(), 3);
        assert_eq!(analyzer.online_activated_nodes(), vec![HostPort::new("localhost", 1)]);
        assert_eq!(analyzer.online_in_repair_nodes(), vec![HostPort::new("localhost", 2)]);
        assert_eq!(
            analyzer.online_in_configuration_nodes(),
            vec![HostPort::new("localhost", 3)]
        );
        assert_eq!(analyzer.unreachable_nodes(), vec![HostPort::new("localhost", 4)]);
    }

    #[test]
    fn test_ambiguity_mapping() {
        for state in GlobalConsistencyState::ALL {
            assert_eq!(state.ambiguous().definite(), state.definite());
            if state.ignores_unreachable() {
                assert_eq!(state.ambiguous(), state);
            }
        }
        assert_eq!(
            GlobalConsistencyState::MaybePartiallyRolledBack.to_string(),
            "MAYBE_PARTIALLY_ROLLED_BACK"
        );
    }
}
