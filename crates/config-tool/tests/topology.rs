use std::time::Duration;

use dynconf_config_tool::{
    ActivateCommand, AttachCommand, ConfigTool, DetachCommand, DiagnosticCommand, GetCommand,
    ONLINE_ROLES, ToolConfig, ToolConfigBuilder,
};
use dynconf_coordinator::GlobalConsistencyState;
use dynconf_model::{HostPort, LogicalServerState, Node};
use dynconf_node::NodeProbe;
use dynconf_node_memory::MemoryNetwork;

fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn config() -> ToolConfig {
    ToolConfigBuilder::new()
        .restart_delay(Duration::from_millis(10))
        .restart_poll_interval(Duration::from_millis(10))
        .restart_wait_time(Duration::from_secs(5))
        .build()
}

struct Nodes {
    n11: HostPort,
    n12: HostPort,
    n21: HostPort,
    n22: HostPort,
}

impl Nodes {
    fn all(&self) -> Vec<HostPort> {
        vec![
            self.n11.clone(),
            self.n12.clone(),
            self.n21.clone(),
            self.n22.clone(),
        ]
    }
}

async fn assert_one_stripe_of_two(network: &MemoryNetwork, a: &HostPort, b: &HostPort) {
    let seen_by_a = network.upcoming_cluster(a).await.unwrap();
    let seen_by_b = network.upcoming_cluster(b).await.unwrap();
    assert_eq!(seen_by_a, seen_by_b);
    assert_eq!(seen_by_a.stripes.len(), 1);
    assert_eq!(seen_by_a.addresses(), vec![a.clone(), b.clone()]);
}

async fn two_stripes(network: &MemoryNetwork, tool: &ConfigTool<MemoryNetwork>) -> Nodes {
    let nodes = Nodes {
        n11: network.add_node(Node::new("node-1-1", "localhost", 9410)).await.unwrap(),
        n12: network.add_node(Node::new("node-1-2", "localhost", 9411)).await.unwrap(),
        n21: network.add_node(Node::new("node-2-1", "localhost", 9420)).await.unwrap(),
        n22: network.add_node(Node::new("node-2-2", "localhost", 9421)).await.unwrap(),
    };

    tool.run(&AttachCommand::node(nodes.n11.clone(), nodes.n12.clone()))
        .await
        .unwrap();
    assert_one_stripe_of_two(network, &nodes.n11, &nodes.n12).await;
    tool.run(&AttachCommand::node(nodes.n21.clone(), nodes.n22.clone()))
        .await
        .unwrap();
    assert_one_stripe_of_two(network, &nodes.n21, &nodes.n22).await;
    tool.run(&AttachCommand::stripe(nodes.n11.clone(), nodes.n21.clone()))
        .await
        .unwrap();
    nodes
}

#[tokio::test]
async fn test_stripes_attach_into_one_topology() {
    init_logging();
    let network = MemoryNetwork::new();
    let tool = ConfigTool::new(network.clone(), config());

    let nodes = two_stripes(&network, &tool).await;

    let expected = network.upcoming_cluster(&nodes.n11).await.unwrap();
    assert_eq!(expected.stripes.len(), 2);
    assert_eq!(expected.node_count(), 4);
    for node in nodes.all() {
        assert_eq!(network.upcoming_cluster(&node).await.unwrap(), expected);
        assert!(!network.is_activated(&node).await.unwrap());
    }
    let stripe = expected.stripe_of(&nodes.n21).unwrap();
    assert!(stripe.contains(&nodes.n22));
    assert!(!stripe.contains(&nodes.n11));
}

#[tokio::test]
async fn test_activate_then_grow_and_shrink() {
    init_logging();
    let network = MemoryNetwork::new();
    let tool = ConfigTool::new(network.clone(), config());
    let nodes = two_stripes(&network, &tool).await;

    let activated = tool
        .run(&ActivateCommand::new(nodes.n11.clone()).named("tc-cluster"))
        .await
        .unwrap();
    assert_eq!(activated.version, Some(1));
    assert_eq!(activated.restarted.len(), 4);
    for node in nodes.all() {
        assert!(network.is_activated(&node).await.unwrap());
        let state = network.logical_state(&node).await.unwrap();
        assert!(ONLINE_ROLES.contains(&state), "{node} is {state}");
    }
    let names = tool
        .run(&GetCommand::new(nodes.n22.clone(), vec!["cluster-name".parse().unwrap()]))
        .await
        .unwrap();
    assert_eq!(names[0].value(), Some("tc-cluster"));

    let n13 = network
        .add_node(Node::new("node-1-3", "localhost", 9412))
        .await
        .unwrap();
    let attached = tool
        .run(&AttachCommand::node(nodes.n11.clone(), n13.clone()))
        .await
        .unwrap();
    assert_eq!(attached.version, Some(2));
    assert_eq!(attached.restarted, vec![n13.clone()]);
    assert!(network.is_activated(&n13).await.unwrap());
    assert_eq!(
        network.logical_state(&n13).await.unwrap(),
        LogicalServerState::Passive
    );
    assert_eq!(
        network.upcoming_cluster(&n13).await.unwrap(),
        network.upcoming_cluster(&nodes.n22).await.unwrap()
    );

    let report = tool
        .run(&DiagnosticCommand::new(nodes.n11.clone()))
        .await
        .unwrap();
    assert_eq!(report.state, GlobalConsistencyState::Accepting);
    assert_eq!(report.nodes.len(), 5);

    let detached = tool
        .run(&DetachCommand::node(nodes.n11.clone(), n13.clone()))
        .await
        .unwrap();
    assert_eq!(detached.version, Some(3));
    assert_eq!(detached.cluster.node_count(), 4);
    assert!(!network.is_activated(&n13).await.unwrap());
    assert_eq!(
        network.logical_state(&n13).await.unwrap(),
        LogicalServerState::Diagnostic
    );
    assert_eq!(network.upcoming_cluster(&n13).await.unwrap().node_count(), 1);
    for node in nodes.all() {
        assert!(!network.upcoming_cluster(&node).await.unwrap().contains(&n13));
    }
}

#[tokio::test]
async fn test_activation_is_refused_twice() {
    init_logging();
    let network = MemoryNetwork::new();
    let tool = ConfigTool::new(network.clone(), config());
    let nodes = two_stripes(&network, &tool).await;
    tool.run(&ActivateCommand::new(nodes.n11.clone()).named("tc-cluster"))
        .await
        .unwrap();

    let again = tool
        .run(&ActivateCommand::new(nodes.n21.clone()).named("other"))
        .await;

    assert!(again.is_err());
}
