//! Abstract interface for the per-node RPC surface consumed by the coordinator and the
//! configuration tool.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::error::Error;
use std::fmt::{self, Debug, Display};
use std::time::Duration;

use async_trait::async_trait;
use dynconf_model::{Cluster, HostPort, LogicalServerState};
use dynconf_nomad::{
    AcceptRejectResponse, ChangeRecord, CommitMessage, DiscoverResponse, PrepareMessage,
    RollbackMessage,
};

/// The kind of node access error.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NodeProbeErrorKind {
    /// The node could not be reached.
    Unreachable,

    /// The node refused the request in its current state.
    Rejected,

    /// The node failed while serving the request.
    Internal,
}

impl Display for NodeProbeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Marker trait for `NodeProbe` errors
pub trait NodeProbeError: Debug + Error + Send + Sync + 'static {
    /// Returns the kind of this error
    fn kind(&self) -> NodeProbeErrorKind;
}

/// Read-only RPCs answered by every node.
#[async_trait]
pub trait NodeProbe
where
    Self: Send + Sync + Clone + 'static,
{
    /// The error type for this probe.
    type Error: NodeProbeError;

    /// Externally observed lifecycle role of the node.
    async fn logical_state(&self, node: &HostPort) -> Result<LogicalServerState, Self::Error>;

    /// Topology the node will run with after its next restart.
    async fn upcoming_cluster(&self, node: &HostPort) -> Result<Cluster, Self::Error>;

    /// Topology the node is currently running with.
    async fn runtime_cluster(&self, node: &HostPort) -> Result<Cluster, Self::Error>;

    /// Change-protocol state of the node.
    async fn discover(&self, node: &HostPort) -> Result<DiscoverResponse, Self::Error>;

    /// Every record of the node's change log, oldest first.
    async fn change_history(&self, node: &HostPort) -> Result<Vec<ChangeRecord>, Self::Error>;

    /// Whether the node belongs to an activated cluster.
    async fn is_activated(&self, node: &HostPort) -> Result<bool, Self::Error>;

    /// Whether a committed change is waiting for a restart of the node.
    async fn must_be_restarted(&self, node: &HostPort) -> Result<bool, Self::Error>;
}

/// Mutating RPCs answered by every node.
#[async_trait]
pub trait NodeClient: NodeProbe {
    /// Asks the node to record a change as prepared.
    async fn prepare(
        &self,
        node: &HostPort,
        message: PrepareMessage,
    ) -> Result<AcceptRejectResponse, Self::Error>;

    /// Asks the node to commit its prepared change.
    async fn commit(
        &self,
        node: &HostPort,
        message: CommitMessage,
    ) -> Result<AcceptRejectResponse, Self::Error>;

    /// Asks the node to roll back its prepared change.
    async fn rollback(
        &self,
        node: &HostPort,
        message: RollbackMessage,
    ) -> Result<AcceptRejectResponse, Self::Error>;

    /// Clears the advisory lock held by the node without touching its change log.
    async fn force_unlock(&self, node: &HostPort) -> Result<(), Self::Error>;

    /// Discards the node's change log and configuration.
    async fn reset(&self, node: &HostPort) -> Result<(), Self::Error>;

    /// Replaces the node's change log with `history` taken from another member of the cluster.
    async fn reset_and_sync(
        &self,
        node: &HostPort,
        history: Vec<ChangeRecord>,
    ) -> Result<(), Self::Error>;

    /// Restarts the node after `delay`.
    async fn restart(&self, node: &HostPort, delay: Duration) -> Result<(), Self::Error>;

    /// Stops the node after `delay`.
    async fn stop(&self, node: &HostPort, delay: Duration) -> Result<(), Self::Error>;

    /// Replaces the upcoming topology of a node that is not activated yet.
    async fn set_upcoming_cluster(
        &self,
        node: &HostPort,
        cluster: Cluster,
    ) -> Result<(), Self::Error>;
}
