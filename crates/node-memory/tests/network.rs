use std::time::Duration;

use assert_matches::assert_matches;
use chrono::Utc;
use dynconf_model::{Cluster, HostPort, LogicalServerState, Node, Stripe};
use dynconf_node::{NodeClient, NodeProbe, NodeProbeError, NodeProbeErrorKind};
use dynconf_node_memory::{Call, Error, Fault, MemoryNetwork, Phase};
use dynconf_nomad::{MutationInfo, NomadChange, NomadMode, PrepareMessage};
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

async fn wait_for_state(
    network: &MemoryNetwork,
    node: &HostPort,
    expected: LogicalServerState,
) -> bool {
    for _ in 0..100 {
        if network.logical_state(node).await.ok() == Some(expected) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_standalone_node() {
    let network = MemoryNetwork::new();
    let address = network
        .add_node(Node::new("node-1", "localhost", 9410))
        .await
        .unwrap();

    assert_eq!(
        network.logical_state(&address).await.unwrap(),
        LogicalServerState::Diagnostic
    );
    assert!(!network.is_activated(&address).await.unwrap());
    assert_eq!(network.upcoming_cluster(&address).await.unwrap().node_count(), 1);
    assert_eq!(network.discover(&address).await.unwrap().mutative_message_count, 0);

    network
        .set_upcoming_cluster(&address, cluster())
        .await
        .unwrap();
    assert_eq!(network.upcoming_cluster(&address).await.unwrap().node_count(), 2);
}

#[tokio::test]
async fn test_activated_cluster() {
    let network = MemoryNetwork::new();
    network.add_activated_cluster(&cluster()).await.unwrap();

    let first = HostPort::new("localhost", 9410);
    let second = HostPort::new("localhost", 9420);
    assert_eq!(
        network.logical_state(&first).await.unwrap(),
        LogicalServerState::Active
    );
    assert_eq!(
        network.logical_state(&second).await.unwrap(),
        LogicalServerState::Passive
    );
    assert_eq!(
        network.discover(&first).await.unwrap(),
        network.discover(&second).await.unwrap()
    );

    let refused = network.set_upcoming_cluster(&first, cluster()).await;
    assert_matches!(refused, Err(error) if error.kind() == NodeProbeErrorKind::Rejected);
}

#[tokio::test]
async fn test_offline_node_is_unreachable() {
    let network = MemoryNetwork::new();
    network.add_activated_cluster(&cluster()).await.unwrap();
    let node = HostPort::new("localhost", 9420);

    network.set_online(&node, false);

    assert_matches!(network.discover(&node).await, Err(Error::Unreachable(_)));
    assert_matches!(
        network.logical_state(&HostPort::new("localhost", 1)).await,
        Err(Error::UnknownNode(_))
    );
}

#[tokio::test]
async fn test_injected_faults() {
    let network = MemoryNetwork::new();
    network.add_activated_cluster(&cluster()).await.unwrap();
    let node = HostPort::new("localhost", 9410);
    let message = |uuid| PrepareMessage {
        mutation: MutationInfo {
            expected_mutative_message_count: 2,
            host: "host".to_string(),
            user: "user".to_string(),
            timestamp: Utc::now(),
        },
        change_uuid: uuid,
        version: 2,
        change: NomadChange::Unlock,
        lock_token: None,
    };

    network.inject(&node, Fault::Refuse(Phase::Prepare));
    let refused = Uuid::new_v4();
    assert_matches!(
        network.prepare(&node, message(refused)).await,
        Err(Error::Injected { phase: Phase::Prepare, .. })
    );
    assert_eq!(network.discover(&node).await.unwrap().mode, NomadMode::Accepting);

    network.clear_faults(&node);
    network.inject(&node, Fault::LoseResponse(Phase::Prepare));
    let lost = Uuid::new_v4();
    assert!(network.prepare(&node, message(lost)).await.is_err());
    assert_eq!(network.discover(&node).await.unwrap().mode, NomadMode::Prepared);

    assert_eq!(
        network.calls(),
        vec![(node.clone(), Call::Prepare(refused)), (node, Call::Prepare(lost))]
    );
}

#[tokio::test]
async fn test_restart_elects_roles() {
    let network = MemoryNetwork::new();
    network.add_activated_cluster(&cluster()).await.unwrap();
    let active = HostPort::new("localhost", 9410);
    let passive = HostPort::new("localhost", 9420);

    network.restart(&passive, Duration::from_millis(20)).await.unwrap();
    assert!(network.logical_state(&passive).await.is_err());

    assert!(wait_for_state(&network, &passive, LogicalServerState::Passive).await);
    assert!(!network.must_be_restarted(&passive).await.unwrap());
    assert_eq!(
        network.logical_state(&active).await.unwrap(),
        LogicalServerState::Active
    );
}

#[tokio::test]
async fn test_reset_returns_to_standalone() {
    let network = MemoryNetwork::new();
    network.add_activated_cluster(&cluster()).await.unwrap();
    let node = HostPort::new("localhost", 9420);

    network.reset(&node).await.unwrap();
    network.restart(&node, Duration::from_millis(10)).await.unwrap();

    assert!(wait_for_state(&network, &node, LogicalServerState::Diagnostic).await);
    assert!(!network.is_activated(&node).await.unwrap());
    let upcoming = network.upcoming_cluster(&node).await.unwrap();
    assert_eq!(upcoming.addresses(), vec![node]);
}
