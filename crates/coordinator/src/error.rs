use std::fmt::{self, Display};

use dynconf_model::HostPort;
use dynconf_nomad::RejectionReason;
use thiserror::Error;

use crate::analyzer::GlobalConsistencyState;

/// Result type for coordination.
pub type Result<T> = std::result::Result<T, Error>;

/// Protocol phase.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ProtocolPhase {
    /// Discovery.
    Discover,
    /// Prepare.
    Prepare,
    /// Commit.
    Commit,
    /// Rollback.
    Rollback,
    /// Lock release, reset and restart requests.
    Maintenance,
}

impl Display for ProtocolPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discover => write!(f, "discover"),
            Self::Prepare => write!(f, "prepare"),
            Self::Commit => write!(f, "commit"),
            Self::Rollback => write!(f, "rollback"),
            Self::Maintenance => write!(f, "maintenance"),
        }
    }
}

/// A node that failed a request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeFailure {
    /// The node.
    pub node: HostPort,
    /// Phase the request belonged to.
    pub phase: ProtocolPhase,
    /// Why the node rejected the request, when it answered.
    pub rejection: Option<RejectionReason>,
    /// What went wrong.
    pub message: String,
}

impl NodeFailure {
    pub(crate) fn new(node: &HostPort, phase: ProtocolPhase, message: impl Into<String>) -> Self {
        Self {
            node: node.clone(),
            phase,
            rejection: None,
            message: message.into(),
        }
    }

    pub(crate) fn rejected(
        node: &HostPort,
        phase: ProtocolPhase,
        reason: RejectionReason,
        message: impl Into<String>,
    ) -> Self {
        Self {
            node: node.clone(),
            phase,
            rejection: Some(reason),
            message: message.into(),
        }
    }

    /// Whether another client got in between.
    #[must_use]
    pub fn is_concurrent_access(&self) -> bool {
        self.rejection == Some(RejectionReason::Dead)
    }
}

impl Display for NodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.rejection {
            Some(reason) => write!(
                f,
                "{} rejected by {} ({reason}): {}",
                self.phase, self.node, self.message
            ),
            None => write!(f, "{} failed on {}: {}", self.phase, self.node, self.message),
        }
    }
}

/// Failures of one protocol run: the first one, then every other one.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProtocolFailure {
    /// First failure.
    pub primary: NodeFailure,
    /// Later failures, in order.
    pub secondary: Vec<NodeFailure>,
    /// Nodes that committed the change.
    pub committed: Vec<HostPort>,
    /// Nodes left holding the change prepared.
    pub prepared: Vec<HostPort>,
}

impl ProtocolFailure {
    /// Folds failures into one, the first being primary. `None` if there is no failure.
    #[must_use]
    pub fn from_failures(failures: Vec<NodeFailure>) -> Option<Self> {
        let mut failures = failures.into_iter();
        let primary = failures.next()?;
        Some(Self {
            primary,
            secondary: failures.collect(),
            committed: Vec::new(),
            prepared: Vec::new(),
        })
    }
}

impl From<NodeFailure> for ProtocolFailure {
    fn from(primary: NodeFailure) -> Self {
        Self {
            primary,
            secondary: Vec::new(),
            committed: Vec::new(),
            prepared: Vec::new(),
        }
    }
}

impl Display for ProtocolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.primary)?;
        if !self.committed.is_empty() {
            write!(f, ". Committed on: {}", join(&self.committed))?;
        }
        if !self.prepared.is_empty() {
            write!(
                f,
                ". Still prepared on: {}; run the 'repair' command to finalize the change",
                join(&self.prepared)
            )?;
        }
        for failure in &self.secondary {
            write!(f, ". Also: {failure}")?;
        }
        Ok(())
    }
}

fn join(nodes: &[HostPort]) -> String {
    nodes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Coordination errors.
#[derive(Debug, Error)]
pub enum Error {
    /// The request was refused before any network call.
    #[error("{0}")]
    Validation(String),

    /// Discovery could not establish the cluster state.
    #[error("{0}")]
    DiscoveryFailure(String),

    /// Another client changed the cluster or holds its lock.
    #[error("{0}")]
    ConcurrentAccess(String),

    /// Nodes rejected or failed protocol requests.
    #[error("{0}")]
    Protocol(ProtocolFailure),

    /// The cluster cannot be repaired automatically.
    #[error("cluster is {state}: {description}")]
    InconsistentCluster {
        /// Verdict.
        state: GlobalConsistencyState,
        /// Explanation.
        description: String,
    },

    /// A previous change is unfinished and must be repaired first.
    #[error("cluster is {state}: {description}")]
    RepairRequired {
        /// Verdict.
        state: GlobalConsistencyState,
        /// Explanation.
        description: String,
    },

    /// Nodes did not come back in time after a restart.
    #[error(
        "some nodes did not restart within {seconds} seconds: {}; please check their logs",
        join(.nodes)
    )]
    RestartTimeout {
        /// Nodes still not back.
        nodes: Vec<HostPort>,
        /// Time waited.
        seconds: u64,
    },
}
