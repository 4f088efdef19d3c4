use dynconf_coordinator::NodeFailure;
use thiserror::Error;

/// Convenience type alias for command results.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by configuration commands.
#[derive(Debug, Error)]
pub enum Error {
    /// The command is malformed or not applicable to the cluster.
    #[error("{0}")]
    Validation(String),

    /// A setting or topology value is invalid.
    #[error(transparent)]
    Model(#[from] dynconf_model::Error),

    /// Coordinating the change failed.
    #[error(transparent)]
    Coordinator(#[from] dynconf_coordinator::Error),

    /// A node failed a request outside the change protocol.
    #[error("{0}")]
    Node(NodeFailure),
}

impl From<NodeFailure> for Error {
    fn from(failure: NodeFailure) -> Self {
        Self::Node(failure)
    }
}
