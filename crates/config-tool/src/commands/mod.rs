//! Operator commands.

mod activate;
mod attach;
mod detach;
mod diagnostic;
mod lock;
mod repair;
mod settings;

use std::fmt::{self, Display};

use dynconf_model::{Cluster, HostPort};

pub use activate::ActivateCommand;
pub use attach::AttachCommand;
pub use detach::DetachCommand;
pub use diagnostic::{DiagnosticCommand, DiagnosticReport, NodeReport};
pub use lock::{LockCommand, UnlockCommand};
pub use repair::RepairCommand;
pub use settings::{GetCommand, SetCommand, SetOutcome};

/// What an attach or detach moves.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TopologyKind {
    /// One node, into or out of a stripe.
    Node,
    /// A whole stripe, into or out of a cluster.
    Stripe,
}

impl Display for TopologyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node => write!(f, "node"),
            Self::Stripe => write!(f, "stripe"),
        }
    }
}

/// Result of a topology change.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TopologyOutcome {
    /// The resulting topology.
    pub cluster: Cluster,
    /// Version of the committed change, absent when the cluster is not activated.
    pub version: Option<u64>,
    /// Nodes restarted to join or leave the cluster.
    pub restarted: Vec<HostPort>,
}
