use dynconf_model::HostPort;
use dynconf_node::{NodeProbeError, NodeProbeErrorKind};
use dynconf_nomad::ChangeLogErrorKind;
use thiserror::Error;

use crate::network::Phase;

/// Errors raised by the in-memory network.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The node is stopped, restarting or cut off.
    #[error("node {0} is unreachable")]
    Unreachable(HostPort),

    /// No node listens on this address.
    #[error("no node at {0}")]
    UnknownNode(HostPort),

    /// The node refused the request in its current state.
    #[error("node {node} refused the request: {reason}")]
    Rejected {
        /// The node.
        node: HostPort,
        /// Why.
        reason: String,
    },

    /// A failure injected by a test.
    #[error("injected failure on {node} during {phase}")]
    Injected {
        /// The node.
        node: HostPort,
        /// Phase the failure was injected into.
        phase: Phase,
    },

    /// The node's acceptor failed.
    #[error("acceptor failure on {node}: {message}")]
    Acceptor {
        /// The node.
        node: HostPort,
        /// Failure message.
        message: String,
    },
}

impl NodeProbeError for Error {
    fn kind(&self) -> NodeProbeErrorKind {
        match self {
            Self::Unreachable(_) | Self::UnknownNode(_) => NodeProbeErrorKind::Unreachable,
            Self::Rejected { .. } => NodeProbeErrorKind::Rejected,
            Self::Injected { .. } | Self::Acceptor { .. } => NodeProbeErrorKind::Internal,
        }
    }
}

/// Errors raised by [`crate::MemoryChangeLog`].
#[derive(Clone, Debug, Error)]
pub enum ChangeLogError {
    /// The record could not be hashed.
    #[error("failed to serialize record: {0}")]
    Serialization(String),
}

impl dynconf_nomad::ChangeLogError for ChangeLogError {
    fn kind(&self) -> ChangeLogErrorKind {
        match self {
            Self::Serialization(_) => ChangeLogErrorKind::Serialization,
        }
    }
}
