//! Durable per-node change log contract.
//!
//! The log is an append-only store keyed by change identifier. Every appended record is
//! chained to its predecessor by a SHA-256 content hash, so truncated or corrupted trailing
//! records are detectable.

use std::error::Error;
use std::fmt::{self, Debug, Display};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dynconf_model::Cluster;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::change::NomadChange;
use crate::messages::{ChangeDetails, ChangeRequestState};

/// One state of a change request, as persisted by a node.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Change identifier.
    pub change_uuid: Uuid,

    /// State reached by this record.
    pub state: ChangeRequestState,

    /// Version the change was prepared at.
    pub version: u64,

    /// Change preceding this one in the log.
    pub prev_change_uuid: Option<Uuid>,

    /// The change.
    pub change: NomadChange,

    /// Configuration resulting from the change, absent when the change was not applicable.
    pub result: Option<Cluster>,

    /// Host the change was created from.
    pub creation_host: String,

    /// User who created the change.
    pub creation_user: String,

    /// When the change was created.
    pub creation_timestamp: DateTime<Utc>,

    /// Host of the mutation that produced this record.
    pub mutation_host: String,

    /// User of the mutation that produced this record.
    pub mutation_user: String,

    /// Time of the mutation that produced this record.
    pub mutation_timestamp: DateTime<Utc>,
}

impl ChangeRecord {
    /// Reporting view of the record.
    #[must_use]
    pub fn details(&self) -> ChangeDetails {
        ChangeDetails {
            uuid: self.change_uuid,
            state: self.state,
            version: self.version,
            summary: self.change.summary(),
            creation_host: self.creation_host.clone(),
            creation_user: self.creation_user.clone(),
            creation_timestamp: self.creation_timestamp,
        }
    }
}

/// A record as stored in the log, with its position in the hash chain.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct LoggedRecord {
    /// Key the record was appended under.
    pub key: Uuid,

    /// The record.
    pub record: ChangeRecord,

    /// Hash of the previous record, absent for the first one.
    pub prev_hash: Option<String>,

    /// Hash of this record chained to the previous one.
    pub hash: String,
}

/// Computes the chained content hash of a record.
///
/// # Errors
///
/// Returns an error if the record cannot be serialized.
pub fn content_hash(
    prev_hash: Option<&str>,
    key: Uuid,
    record: &ChangeRecord,
) -> Result<String, serde_json::Error> {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.unwrap_or_default().as_bytes());
    hasher.update(key.as_bytes());
    hasher.update(serde_json::to_vec(record)?);
    Ok(hex::encode(hasher.finalize()))
}

/// Checks the hash chain of `records`, returning the index of the first broken record.
///
/// # Errors
///
/// Returns the index of the first record whose chain link or content hash does not match.
pub fn verify_chain(records: &[LoggedRecord]) -> Result<(), usize> {
    let mut prev: Option<&str> = None;
    for (index, logged) in records.iter().enumerate() {
        if logged.prev_hash.as_deref() != prev {
            return Err(index);
        }
        match content_hash(prev, logged.key, &logged.record) {
            Ok(hash) if hash == logged.hash => {}
            _ => return Err(index),
        }
        prev = Some(&logged.hash);
    }
    Ok(())
}

/// The kind of change log error.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ChangeLogErrorKind {
    /// A record failed its hash chain check.
    Corrupted,

    /// A record could not be serialized.
    Serialization,

    /// The underlying store is unavailable.
    Unavailable,
}

impl Display for ChangeLogErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Marker trait for `ChangeLog` errors
pub trait ChangeLogError: Debug + Error + Send + Sync + 'static {
    /// Returns the kind of this error
    fn kind(&self) -> ChangeLogErrorKind;
}

/// Durable append-only change log. A successful append is durable before it returns.
#[async_trait]
pub trait ChangeLog
where
    Self: Send + Sync + 'static,
{
    /// The error type for this log.
    type Error: ChangeLogError;

    /// Appends a record under `key`, chained to the previous record. Returns its content hash.
    async fn append(&self, key: Uuid, record: ChangeRecord) -> Result<String, Self::Error>;

    /// Reads the most recently appended record.
    async fn read_latest(&self) -> Result<Option<LoggedRecord>, Self::Error>;

    /// Reads the most recently appended record for `key`.
    async fn read_by_key(&self, key: Uuid) -> Result<Option<LoggedRecord>, Self::Error>;

    /// Reads every record, oldest first.
    async fn read_all(&self) -> Result<Vec<LoggedRecord>, Self::Error>;

    /// Discards every record.
    async fn reset(&self) -> Result<(), Self::Error>;
}
