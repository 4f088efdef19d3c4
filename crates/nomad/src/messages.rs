//! Protocol messages exchanged between the coordinator and node acceptors.

use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use dynconf_model::LockContext;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::change::NomadChange;

/// Whether a node accepts new changes or holds one prepared change.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum NomadMode {
    /// Ready to prepare a new change.
    Accepting,

    /// Holding a prepared change, waiting for commit or rollback.
    Prepared,
}

impl Display for NomadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Accepting => "ACCEPTING",
            Self::Prepared => "PREPARED",
        })
    }
}

/// State of one change request in a node's log.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ChangeRequestState {
    /// Prepared, not decided yet.
    Prepared,

    /// Committed.
    Committed,

    /// Rolled back.
    RolledBack,
}

impl Display for ChangeRequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Prepared => "PREPARED",
            Self::Committed => "COMMITTED",
            Self::RolledBack => "ROLLED_BACK",
        })
    }
}

/// Summary of a change request as reported by a node.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChangeDetails {
    /// Change identifier.
    pub uuid: Uuid,

    /// State of the change on the reporting node.
    pub state: ChangeRequestState,

    /// Version the change was prepared at.
    pub version: u64,

    /// One-line human summary.
    pub summary: String,

    /// Host the change was created from.
    pub creation_host: String,

    /// User who created the change.
    pub creation_user: String,

    /// When the change was created.
    pub creation_timestamp: DateTime<Utc>,
}

/// A node's answer to discovery.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct DiscoverResponse {
    /// Current mode.
    pub mode: NomadMode,

    /// Number of mutative messages the node accepted so far. Every mutative message must
    /// carry this value, so a change between discovery and mutation reveals another client.
    pub mutative_message_count: u64,

    /// Host of the last accepted mutation.
    pub last_mutation_host: Option<String>,

    /// User of the last accepted mutation.
    pub last_mutation_user: Option<String>,

    /// Timestamp of the last accepted mutation.
    pub last_mutation_timestamp: Option<DateTime<Utc>>,

    /// Version of the configuration in force.
    pub current_version: u64,

    /// Highest version ever prepared.
    pub highest_version: u64,

    /// Latest change in the log, whatever its state.
    pub latest_change: Option<ChangeDetails>,

    /// Committed changes, oldest first.
    pub checkpoints: Vec<ChangeDetails>,

    /// Advisory configuration lock, if held.
    pub lock: Option<LockContext>,
}

impl DiscoverResponse {
    /// The latest committed change.
    #[must_use]
    pub fn latest_committed(&self) -> Option<&ChangeDetails> {
        self.checkpoints.last()
    }

    /// Whether the committed history of `other` extends this one, or the reverse: the two
    /// nodes agree and one may simply lag behind.
    #[must_use]
    pub fn shares_history_with(&self, other: &Self) -> bool {
        let (short, long) = if self.checkpoints.len() <= other.checkpoints.len() {
            (&self.checkpoints, &other.checkpoints)
        } else {
            (&other.checkpoints, &self.checkpoints)
        };
        short.iter().zip(long.iter()).all(|(a, b)| a.uuid == b.uuid)
    }

    /// Whether `uuid` was committed on this node.
    #[must_use]
    pub fn has_committed(&self, uuid: Uuid) -> bool {
        self.checkpoints.iter().any(|change| change.uuid == uuid)
    }
}

/// Who sends a mutative message, and what the sender saw at discovery.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct MutationInfo {
    /// Mutative message count the sender expects the node to be at.
    pub expected_mutative_message_count: u64,

    /// Sender host.
    pub host: String,

    /// Sender user.
    pub user: String,

    /// Send time.
    pub timestamp: DateTime<Utc>,
}

/// Ask a node to record a change as prepared.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PrepareMessage {
    /// Sender information.
    pub mutation: MutationInfo,

    /// Change identifier.
    pub change_uuid: Uuid,

    /// Version the change is proposed at.
    pub version: u64,

    /// The change.
    pub change: NomadChange,

    /// Lock token presented by the sender, if it holds the advisory lock.
    pub lock_token: Option<String>,
}

/// Ask a node to commit its prepared change.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommitMessage {
    /// Sender information.
    pub mutation: MutationInfo,

    /// Change identifier.
    pub change_uuid: Uuid,
}

/// Ask a node to roll back its prepared change.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RollbackMessage {
    /// Sender information.
    pub mutation: MutationInfo,

    /// Change identifier.
    pub change_uuid: Uuid,
}

/// Why a node rejected a mutative message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum RejectionReason {
    /// The change cannot be applied to the node's configuration.
    Unacceptable,

    /// Another client mutated the node since discovery, or holds the configuration lock.
    Dead,

    /// Wrong mode, version or change identifier.
    Bad,
}

impl Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unacceptable => "UNACCEPTABLE",
            Self::Dead => "DEAD",
            Self::Bad => "BAD",
        })
    }
}

/// A node's answer to a mutative message.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum AcceptRejectResponse {
    /// The message was applied, or was already applied.
    Accepted,

    /// The message was rejected.
    Rejected {
        /// Rejection category.
        reason: RejectionReason,

        /// Human readable explanation.
        message: String,

        /// Host of the last accepted mutation on the node.
        last_mutation_host: Option<String>,

        /// User of the last accepted mutation on the node.
        last_mutation_user: Option<String>,
    },
}

impl AcceptRejectResponse {
    /// Whether the message was accepted.
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}
