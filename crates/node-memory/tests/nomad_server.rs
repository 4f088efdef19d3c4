use assert_matches::assert_matches;
use chrono::Utc;
use dynconf_model::{Cluster, LockContext, Node, Stripe};
use dynconf_node_memory::MemoryChangeLog;
use dynconf_nomad::{
    AcceptRejectResponse, ChangeLog, ChangeRequestState, CommitMessage, Error, MutationInfo,
    NomadChange, NomadMode, NomadServer, PrepareMessage, RejectionReason, RollbackMessage,
};
use uuid::Uuid;

fn cluster() -> Cluster {
    Cluster::new(vec![Stripe::new(
        "stripe1",
        vec![
            Node::new("node-1", "localhost", 9410),
            Node::new("node-2", "localhost", 9420),
        ],
    )])
}

fn mutation(count: u64) -> MutationInfo {
    MutationInfo {
        expected_mutative_message_count: count,
        host: "admin-host".to_string(),
        user: "admin".to_string(),
        timestamp: Utc::now(),
    }
}

fn prepare(count: u64, uuid: Uuid, version: u64, change: NomadChange) -> PrepareMessage {
    PrepareMessage {
        mutation: mutation(count),
        change_uuid: uuid,
        version,
        change,
        lock_token: None,
    }
}

fn commit(count: u64, uuid: Uuid) -> CommitMessage {
    CommitMessage {
        mutation: mutation(count),
        change_uuid: uuid,
    }
}

fn rollback(count: u64, uuid: Uuid) -> RollbackMessage {
    RollbackMessage {
        mutation: mutation(count),
        change_uuid: uuid,
    }
}

async fn activated() -> (NomadServer<MemoryChangeLog>, MemoryChangeLog) {
    let log = MemoryChangeLog::new();
    let server = NomadServer::new(log.clone()).await.unwrap();
    let uuid = Uuid::new_v4();

    let response = server
        .prepare(prepare(0, uuid, 1, NomadChange::ClusterActivation(cluster())))
        .await
        .unwrap();
    assert!(response.is_accepted());
    assert!(server.commit(commit(1, uuid)).await.unwrap().is_accepted());

    (server, log)
}

#[tokio::test]
async fn test_prepare_then_commit() {
    let (server, log) = activated().await;

    let discovered = server.discover().await;
    assert_eq!(discovered.mode, NomadMode::Accepting);
    assert_eq!(discovered.mutative_message_count, 2);
    assert_eq!(discovered.current_version, 1);
    assert_eq!(discovered.checkpoints.len(), 1);
    assert_eq!(discovered.last_mutation_user.as_deref(), Some("admin"));

    let uuid = Uuid::new_v4();
    let change = NomadChange::SettingBatch(vec!["client-lease-duration=20s".parse().unwrap()]);
    assert!(server.prepare(prepare(2, uuid, 2, change)).await.unwrap().is_accepted());
    assert!(server.has_incomplete_change().await);
    assert_eq!(server.discover().await.mode, NomadMode::Prepared);

    assert!(server.commit(commit(3, uuid)).await.unwrap().is_accepted());
    let discovered = server.discover().await;
    assert_eq!(discovered.mode, NomadMode::Accepting);
    assert_eq!(discovered.current_version, 2);
    assert_eq!(discovered.highest_version, 2);
    assert_matches!(
        discovered.latest_change,
        Some(details) if details.uuid == uuid && details.state == ChangeRequestState::Committed
    );

    let current = server.current_cluster().await.unwrap();
    assert_eq!(current.client_lease_duration.to_string(), "20s");
    assert_eq!(log.len().await, 4);
}

#[tokio::test]
async fn test_repeated_prepare_is_idempotent() {
    let (server, log) = activated().await;
    let uuid = Uuid::new_v4();

    let first = server
        .prepare(prepare(2, uuid, 2, NomadChange::Unlock))
        .await
        .unwrap();
    let again = server
        .prepare(prepare(2, uuid, 2, NomadChange::Unlock))
        .await
        .unwrap();

    assert!(first.is_accepted());
    assert!(again.is_accepted());
    assert_eq!(log.len().await, 3);
    assert_eq!(server.discover().await.mutative_message_count, 3);
}

#[tokio::test]
async fn test_repeated_commit_is_idempotent() {
    let (server, log) = activated().await;
    let uuid = Uuid::new_v4();

    server
        .prepare(prepare(2, uuid, 2, NomadChange::Unlock))
        .await
        .unwrap();
    assert!(server.commit(commit(3, uuid)).await.unwrap().is_accepted());
    assert!(server.commit(commit(3, uuid)).await.unwrap().is_accepted());
    assert_eq!(log.len().await, 4);
}

#[tokio::test]
async fn test_stale_count_is_dead() {
    let (server, _) = activated().await;

    let response = server
        .prepare(prepare(1, Uuid::new_v4(), 2, NomadChange::Unlock))
        .await
        .unwrap();

    assert_matches!(
        response,
        AcceptRejectResponse::Rejected { reason: RejectionReason::Dead, last_mutation_user: Some(user), .. } if user == "admin"
    );
}

#[tokio::test]
async fn test_wrong_mode_and_version_are_bad() {
    let (server, _) = activated().await;

    let low_version = server
        .prepare(prepare(2, Uuid::new_v4(), 1, NomadChange::Unlock))
        .await
        .unwrap();
    assert_matches!(
        low_version,
        AcceptRejectResponse::Rejected { reason: RejectionReason::Bad, .. }
    );

    let nothing_prepared = server.commit(commit(2, Uuid::new_v4())).await.unwrap();
    assert_matches!(
        nothing_prepared,
        AcceptRejectResponse::Rejected { reason: RejectionReason::Bad, .. }
    );

    let uuid = Uuid::new_v4();
    server
        .prepare(prepare(2, uuid, 2, NomadChange::Unlock))
        .await
        .unwrap();
    let second_prepare = server
        .prepare(prepare(3, Uuid::new_v4(), 3, NomadChange::Unlock))
        .await
        .unwrap();
    assert_matches!(
        second_prepare,
        AcceptRejectResponse::Rejected { reason: RejectionReason::Bad, .. }
    );

    let other_change = server.rollback(rollback(3, Uuid::new_v4())).await.unwrap();
    assert_matches!(
        other_change,
        AcceptRejectResponse::Rejected { reason: RejectionReason::Bad, .. }
    );
}

#[tokio::test]
async fn test_unacceptable_change_is_refused_without_trace() {
    let (server, log) = activated().await;
    let before = server.discover().await;
    let change =
        NomadChange::SettingBatch(vec!["stripe.1.node.1.backup-dir=/b".parse().unwrap()]);

    let response = server
        .prepare(prepare(2, Uuid::new_v4(), 2, change))
        .await
        .unwrap();
    assert_matches!(
        response,
        AcceptRejectResponse::Rejected { reason: RejectionReason::Unacceptable, .. }
    );

    assert_eq!(log.len().await, 2);
    assert_eq!(server.discover().await, before);

    let retried = server
        .prepare(prepare(2, Uuid::new_v4(), 2, NomadChange::Unlock))
        .await
        .unwrap();
    assert!(retried.is_accepted());
}

#[tokio::test]
async fn test_lock_restricts_prepare_to_holder() {
    let (server, _) = activated().await;
    let uuid = Uuid::new_v4();
    let context = LockContext::new("token-1", "alice", "ops");

    server
        .prepare(prepare(2, uuid, 2, NomadChange::Lock(context.clone())))
        .await
        .unwrap();
    server.commit(commit(3, uuid)).await.unwrap();
    assert_eq!(server.discover().await.lock, Some(context));

    let stranger = server
        .prepare(prepare(4, Uuid::new_v4(), 3, NomadChange::Unlock))
        .await
        .unwrap();
    assert_matches!(
        stranger,
        AcceptRejectResponse::Rejected { reason: RejectionReason::Dead, message, .. } if message.contains("alice")
    );

    let mut holder = prepare(4, Uuid::new_v4(), 3, NomadChange::Unlock);
    holder.lock_token = Some("token-1".to_string());
    assert!(server.prepare(holder).await.unwrap().is_accepted());
}

#[tokio::test]
async fn test_force_unlock_leaves_the_log_alone() {
    let (server, log) = activated().await;
    let uuid = Uuid::new_v4();

    server
        .prepare(prepare(2, uuid, 2, NomadChange::Lock(LockContext::new("t", "bob", ""))))
        .await
        .unwrap();
    server.commit(commit(3, uuid)).await.unwrap();

    server.force_unlock().await;

    assert!(server.discover().await.lock.is_none());
    assert_eq!(log.len().await, 4);
    assert!(
        server
            .prepare(prepare(4, Uuid::new_v4(), 3, NomadChange::Unlock))
            .await
            .unwrap()
            .is_accepted()
    );
}

#[tokio::test]
async fn test_replay_restores_state() {
    let (server, log) = activated().await;
    let uuid = Uuid::new_v4();
    server
        .prepare(prepare(2, uuid, 2, NomadChange::Unlock))
        .await
        .unwrap();
    let before = server.discover().await;

    let replayed = NomadServer::new(log.clone()).await.unwrap();

    assert_eq!(replayed.discover().await, before);
    assert_eq!(replayed.changes().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_broken_chain_is_detected() {
    let (_, log) = activated().await;
    let mut records = log.read_all().await.unwrap();
    records[0].record.creation_user = "mallory".to_string();

    let result = NomadServer::new(MemoryChangeLog::from_records(records)).await;

    assert_matches!(result, Err(Error::Corrupted(_)));
}

#[tokio::test]
async fn test_reset_and_sync() {
    let (source, _) = activated().await;
    let target = NomadServer::new(MemoryChangeLog::new()).await.unwrap();

    target
        .reset_and_sync(source.history().await.unwrap())
        .await
        .unwrap();

    assert_eq!(target.discover().await, source.discover().await);
    assert_eq!(target.current_cluster().await, source.current_cluster().await);

    target.reset().await.unwrap();
    assert_eq!(target.discover().await.mutative_message_count, 0);
    assert!(target.current_cluster().await.is_none());
}
