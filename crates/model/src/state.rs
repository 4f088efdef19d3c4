use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// Externally observed lifecycle role of a node.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum LogicalServerState {
    /// The state could not be determined.
    Unknown,

    /// The node did not answer.
    Unreachable,

    /// Started in diagnostic mode: not activated yet, or waiting for a repair.
    Diagnostic,

    /// Active server of its stripe.
    Active,

    /// Active server waiting for clients to reconnect after a failover.
    ActiveReconnecting,

    /// Active server blocked on a consistency vote.
    ActiveSuspended,

    /// Passive server in sync with its active.
    Passive,

    /// Passive server blocked on a consistency vote.
    PassiveSuspended,

    /// Passive server still catching up with its active.
    Synchronizing,
}

impl LogicalServerState {
    /// Whether the node answered at all.
    #[must_use]
    pub const fn is_reachable(self) -> bool {
        !matches!(self, Self::Unknown | Self::Unreachable)
    }

    /// Whether the node is the active of its stripe.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(
            self,
            Self::Active | Self::ActiveReconnecting | Self::ActiveSuspended
        )
    }

    /// Whether the node is a passive in sync with its active.
    #[must_use]
    pub const fn is_passive(self) -> bool {
        matches!(self, Self::Passive)
    }

    /// Whether the node is running in diagnostic mode.
    #[must_use]
    pub const fn is_diagnostic(self) -> bool {
        matches!(self, Self::Diagnostic)
    }

    /// Whether the node is suspended or still synchronizing, in which case mutating the
    /// cluster around it is unsafe.
    #[must_use]
    pub const fn is_transitional(self) -> bool {
        matches!(
            self,
            Self::ActiveReconnecting
                | Self::ActiveSuspended
                | Self::PassiveSuspended
                | Self::Synchronizing
        )
    }

    /// Whether a configuration change may be applied while the node is in this state.
    #[must_use]
    pub const fn allows_change(self) -> bool {
        matches!(self, Self::Active | Self::Passive | Self::Diagnostic)
    }
}

impl Display for LogicalServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "UNKNOWN",
            Self::Unreachable => "UNREACHABLE",
            Self::Diagnostic => "DIAGNOSTIC",
            Self::Active => "ACTIVE",
            Self::ActiveReconnecting => "ACTIVE_RECONNECTING",
            Self::ActiveSuspended => "ACTIVE_SUSPENDED",
            Self::Passive => "PASSIVE",
            Self::PassiveSuspended => "PASSIVE_SUSPENDED",
            Self::Synchronizing => "SYNCHRONIZING",
        };
        f.write_str(name)
    }
}
