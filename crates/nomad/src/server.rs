//! Node-side acceptor of the change protocol.

use chrono::{DateTime, Utc};
use dynconf_model::{Cluster, LockContext};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::change_log::{ChangeLog, ChangeRecord, LoggedRecord, verify_chain};
use crate::error::Error;
use crate::messages::{
    AcceptRejectResponse, ChangeDetails, ChangeRequestState, CommitMessage, DiscoverResponse,
    MutationInfo, NomadMode, PrepareMessage, RejectionReason, RollbackMessage,
};

type Result<T, L> = std::result::Result<T, Error<<L as ChangeLog>::Error>>;

#[derive(Debug, Default)]
struct ServerState {
    mutative_message_count: u64,
    last_mutation: Option<(String, String, DateTime<Utc>)>,
    current_version: u64,
    highest_version: u64,
    latest: Option<ChangeRecord>,
    checkpoints: Vec<ChangeDetails>,
    committed: Option<Cluster>,
    lock: Option<LockContext>,
}

impl ServerState {
    fn replay(records: &[LoggedRecord]) -> Self {
        let mut state = Self::default();
        for logged in records {
            state.record(&logged.record);
        }
        state
    }

    fn record(&mut self, record: &ChangeRecord) {
        self.mutative_message_count += 1;
        self.last_mutation = Some((
            record.mutation_host.clone(),
            record.mutation_user.clone(),
            record.mutation_timestamp,
        ));
        self.highest_version = self.highest_version.max(record.version);
        if record.state == ChangeRequestState::Committed {
            self.current_version = record.version;
            self.committed.clone_from(&record.result);
            self.lock = record
                .result
                .as_ref()
                .and_then(|cluster| cluster.lock_context.clone());
            self.checkpoints.push(record.details());
        }
        self.latest = Some(record.clone());
    }

    fn mode(&self) -> NomadMode {
        match &self.latest {
            Some(latest) if latest.state == ChangeRequestState::Prepared => NomadMode::Prepared,
            _ => NomadMode::Accepting,
        }
    }

    fn is_latest(&self, uuid: Uuid, state: ChangeRequestState) -> bool {
        self.latest
            .as_ref()
            .is_some_and(|latest| latest.change_uuid == uuid && latest.state == state)
    }

    fn is_dead(&self, mutation: &MutationInfo) -> bool {
        mutation.expected_mutative_message_count != self.mutative_message_count
    }

    fn reject(&self, reason: RejectionReason, message: impl Into<String>) -> AcceptRejectResponse {
        AcceptRejectResponse::Rejected {
            reason,
            message: message.into(),
            last_mutation_host: self.last_mutation.as_ref().map(|(host, _, _)| host.clone()),
            last_mutation_user: self.last_mutation.as_ref().map(|(_, user, _)| user.clone()),
        }
    }
}

/// Node-side acceptor: enforces the protocol rules and persists every accepted mutation in
/// its change log. Its state is a fold over the log, rebuilt on creation.
#[derive(Debug)]
pub struct NomadServer<L>
where
    L: ChangeLog,
{
    log: L,
    state: Mutex<ServerState>,
}

impl<L> NomadServer<L>
where
    L: ChangeLog,
{
    /// Creates an acceptor over `log`, replaying its records.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read or its hash chain is broken.
    pub async fn new(log: L) -> Result<Self, L> {
        let records = log.read_all().await.map_err(Error::ChangeLog)?;
        if let Err(index) = verify_chain(&records) {
            return Err(Error::Corrupted(format!(
                "record {index} of {} breaks the hash chain",
                records.len()
            )));
        }

        let state = ServerState::replay(&records);
        debug!(records = records.len(), "replayed change log");

        Ok(Self {
            log,
            state: Mutex::new(state),
        })
    }

    /// Reports the acceptor state.
    pub async fn discover(&self) -> DiscoverResponse {
        let state = self.state.lock().await;

        DiscoverResponse {
            mode: state.mode(),
            mutative_message_count: state.mutative_message_count,
            last_mutation_host: state.last_mutation.as_ref().map(|(host, _, _)| host.clone()),
            last_mutation_user: state.last_mutation.as_ref().map(|(_, user, _)| user.clone()),
            last_mutation_timestamp: state.last_mutation.as_ref().map(|(_, _, ts)| *ts),
            current_version: state.current_version,
            highest_version: state.highest_version,
            latest_change: state.latest.as_ref().map(ChangeRecord::details),
            checkpoints: state.checkpoints.clone(),
            lock: state.lock.clone(),
        }
    }

    /// Records a change as prepared.
    ///
    /// A change that cannot be applied to the configuration in force is rejected as
    /// [`RejectionReason::Unacceptable`] and leaves no record. Re-sending a prepare the node
    /// already holds is accepted without a new record.
    ///
    /// # Errors
    ///
    /// Returns an error if the change log fails.
    pub async fn prepare(&self, message: PrepareMessage) -> Result<AcceptRejectResponse, L> {
        let mut state = self.state.lock().await;

        if let Some(latest) = &state.latest {
            if latest.change_uuid == message.change_uuid
                && latest.state == ChangeRequestState::Prepared
                && latest.version == message.version
            {
                debug!(change = %message.change_uuid, "prepare already recorded");
                return Ok(AcceptRejectResponse::Accepted);
            }
        }

        if state.is_dead(&message.mutation) {
            return Ok(state.reject(
                RejectionReason::Dead,
                "expected mutative message count does not match: another client changed this node",
            ));
        }

        if let Some(lock) = &state.lock {
            if message.lock_token.as_deref() != Some(lock.token.as_str()) {
                return Ok(state.reject(
                    RejectionReason::Dead,
                    format!("config is locked by {}", lock.owner()),
                ));
            }
        }

        if state.mode() != NomadMode::Accepting {
            return Ok(state.reject(
                RejectionReason::Bad,
                format!("expected mode: {}, was: {}", NomadMode::Accepting, state.mode()),
            ));
        }

        if message.version <= state.highest_version {
            return Ok(state.reject(
                RejectionReason::Bad,
                format!(
                    "wrong change version number: {} is not above {}",
                    message.version, state.highest_version
                ),
            ));
        }

        let duplicate = self
            .log
            .read_by_key(message.change_uuid)
            .await
            .map_err(Error::ChangeLog)?;
        if duplicate.is_some() {
            return Ok(state.reject(
                RejectionReason::Bad,
                format!("change {} already exists", message.change_uuid),
            ));
        }

        let cluster = match message.change.apply(state.committed.as_ref()) {
            Ok(cluster) => cluster,
            Err(reason) => {
                warn!(change = %message.change_uuid, %reason, "refused unacceptable change");
                return Ok(state.reject(RejectionReason::Unacceptable, reason));
            }
        };
        let record = ChangeRecord {
            change_uuid: message.change_uuid,
            state: ChangeRequestState::Prepared,
            version: message.version,
            prev_change_uuid: state.latest.as_ref().map(|latest| latest.change_uuid),
            change: message.change,
            result: Some(cluster),
            creation_host: message.mutation.host.clone(),
            creation_user: message.mutation.user.clone(),
            creation_timestamp: message.mutation.timestamp,
            mutation_host: message.mutation.host,
            mutation_user: message.mutation.user,
            mutation_timestamp: message.mutation.timestamp,
        };

        self.log
            .append(record.change_uuid, record.clone())
            .await
            .map_err(Error::ChangeLog)?;
        state.record(&record);

        info!(
            change = %record.change_uuid,
            version = record.version,
            "prepared change: {}",
            record.change.summary()
        );
        Ok(AcceptRejectResponse::Accepted)
    }

    /// Commits the prepared change.
    ///
    /// # Errors
    ///
    /// Returns an error if the change log fails.
    pub async fn commit(&self, message: CommitMessage) -> Result<AcceptRejectResponse, L> {
        self.decide(message.change_uuid, message.mutation, ChangeRequestState::Committed)
            .await
    }

    /// Rolls back the prepared change.
    ///
    /// # Errors
    ///
    /// Returns an error if the change log fails.
    pub async fn rollback(&self, message: RollbackMessage) -> Result<AcceptRejectResponse, L> {
        self.decide(message.change_uuid, message.mutation, ChangeRequestState::RolledBack)
            .await
    }

    async fn decide(
        &self,
        change_uuid: Uuid,
        mutation: MutationInfo,
        target: ChangeRequestState,
    ) -> Result<AcceptRejectResponse, L> {
        let mut state = self.state.lock().await;

        if state.is_latest(change_uuid, target) {
            debug!(change = %change_uuid, state = %target, "change already decided");
            return Ok(AcceptRejectResponse::Accepted);
        }

        if state.is_dead(&mutation) {
            return Ok(state.reject(
                RejectionReason::Dead,
                "expected mutative message count does not match: another client changed this node",
            ));
        }

        if state.mode() != NomadMode::Prepared {
            return Ok(state.reject(
                RejectionReason::Bad,
                format!("expected mode: {}, was: {}", NomadMode::Prepared, state.mode()),
            ));
        }

        let Some(prepared) = state
            .latest
            .clone()
            .filter(|latest| latest.change_uuid == change_uuid)
        else {
            return Ok(state.reject(
                RejectionReason::Bad,
                format!("change {change_uuid} is not the prepared change"),
            ));
        };

        if target == ChangeRequestState::Committed && prepared.result.is_none() {
            return Ok(state.reject(
                RejectionReason::Bad,
                format!("change {change_uuid} was not applicable and cannot be committed"),
            ));
        }

        let record = ChangeRecord {
            state: target,
            mutation_host: mutation.host,
            mutation_user: mutation.user,
            mutation_timestamp: mutation.timestamp,
            ..prepared
        };

        self.log
            .append(change_uuid, record.clone())
            .await
            .map_err(Error::ChangeLog)?;
        state.record(&record);

        info!(change = %change_uuid, state = %target, "decided change");
        Ok(AcceptRejectResponse::Accepted)
    }

    /// Discards every record, returning the node to an empty, accepting state.
    ///
    /// # Errors
    ///
    /// Returns an error if the change log fails.
    pub async fn reset(&self) -> Result<(), L> {
        let mut state = self.state.lock().await;
        self.log.reset().await.map_err(Error::ChangeLog)?;
        *state = ServerState::default();
        warn!("change log reset");
        Ok(())
    }

    /// Replaces the whole log with `history`, copied from another node of the cluster, so
    /// this node resumes with the same sequence of changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the change log fails.
    pub async fn reset_and_sync(&self, history: Vec<ChangeRecord>) -> Result<(), L> {
        let mut state = self.state.lock().await;
        self.log.reset().await.map_err(Error::ChangeLog)?;

        let mut synced = ServerState::default();
        for record in history {
            self.log
                .append(record.change_uuid, record.clone())
                .await
                .map_err(Error::ChangeLog)?;
            synced.record(&record);
        }

        info!(
            records = synced.mutative_message_count,
            version = synced.current_version,
            "synchronized change log"
        );
        *state = synced;
        Ok(())
    }

    /// Releases the advisory lock without touching the change log.
    pub async fn force_unlock(&self) {
        let mut state = self.state.lock().await;
        if let Some(lock) = state.lock.take() {
            warn!(owner = %lock.owner(), "forcing release of the configuration lock");
        }
    }

    /// The configuration in force, absent before activation.
    pub async fn current_cluster(&self) -> Option<Cluster> {
        self.state.lock().await.committed.clone()
    }

    /// The latest change, whatever its state.
    pub async fn latest_change(&self) -> Option<ChangeRecord> {
        self.state.lock().await.latest.clone()
    }

    /// Whether the node holds a prepared change.
    pub async fn has_incomplete_change(&self) -> bool {
        self.state.lock().await.mode() == NomadMode::Prepared
    }

    /// Every record in the log, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the change log fails.
    pub async fn history(&self) -> Result<Vec<ChangeRecord>, L> {
        let records = self.log.read_all().await.map_err(Error::ChangeLog)?;
        Ok(records.into_iter().map(|logged| logged.record).collect())
    }

    /// Every change in the log, oldest first, with its latest state.
    ///
    /// # Errors
    ///
    /// Returns an error if the change log fails.
    pub async fn changes(&self) -> Result<Vec<ChangeDetails>, L> {
        let records = self.log.read_all().await.map_err(Error::ChangeLog)?;
        let mut changes: Vec<ChangeDetails> = Vec::new();
        for logged in records {
            let details = logged.record.details();
            match changes.iter_mut().find(|c| c.uuid == details.uuid) {
                Some(existing) => *existing = details,
                None => changes.push(details),
            }
        }
        Ok(changes)
    }
}
