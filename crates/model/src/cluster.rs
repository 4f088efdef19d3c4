use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::address::HostPort;
use crate::failover::FailoverPriority;
use crate::lock::LockContext;
use crate::measure::{MemorySize, TimeMeasure};
use crate::node::Node;
use crate::setting::SecurityAuthc;
use crate::stripe::Stripe;
use crate::uid::Uid;

/// Position of a node inside a cluster (zero-based indices).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct NodeLocation {
    /// Index of the stripe.
    pub stripe: usize,

    /// Index of the node inside its stripe.
    pub node: usize,
}

/// A cluster topology and its cluster-wide settings.
///
/// Values are snapshots: commands clone a cluster, mutate the clone and propose it.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Unique identifier.
    pub uid: Uid,

    /// Cluster name, set at activation.
    pub name: Option<String>,

    /// Failover priority. Must be set before activation.
    pub failover_priority: Option<FailoverPriority>,

    /// Client lease duration.
    pub client_lease_duration: TimeMeasure,

    /// Window during which clients may reconnect after a failover.
    pub client_reconnect_window: TimeMeasure,

    /// Named offheap resources.
    pub offheap_resources: BTreeMap<String, MemorySize>,

    /// Client authentication scheme.
    pub security_authc: Option<SecurityAuthc>,

    /// Whether SSL/TLS is enabled.
    pub ssl_tls: bool,

    /// Whether IP whitelisting is enabled.
    pub whitelist: bool,

    /// Advisory configuration lock.
    pub lock_context: Option<LockContext>,

    /// Stripes, in declaration order.
    pub stripes: Vec<Stripe>,
}

impl Cluster {
    /// Creates an unnamed cluster with default settings.
    #[must_use]
    pub fn new(stripes: Vec<Stripe>) -> Self {
        Self {
            uid: Uid::new(),
            name: None,
            failover_priority: Some(FailoverPriority::Availability),
            client_lease_duration: TimeMeasure::seconds(150),
            client_reconnect_window: TimeMeasure::seconds(120),
            offheap_resources: BTreeMap::from([("main".to_string(), MemorySize::megabytes(512))]),
            security_authc: None,
            ssl_tls: false,
            whitelist: false,
            lock_context: None,
            stripes,
        }
    }

    /// Creates a single node cluster, as a node starts before being attached anywhere.
    #[must_use]
    pub fn single(node: Node) -> Self {
        let uid = node.uid.as_str();
        let stripe_name = format!("stripe-{}", &uid[..8.min(uid.len())]);
        Self::new(vec![Stripe::new(stripe_name, vec![node])])
    }

    /// Iterates over every node, stripe after stripe.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.stripes.iter().flat_map(|stripe| stripe.nodes.iter())
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.stripes.iter().map(|stripe| stripe.nodes.len()).sum()
    }

    /// Internal addresses of every node.
    #[must_use]
    pub fn addresses(&self) -> Vec<HostPort> {
        self.nodes().map(Node::address).collect()
    }

    /// Whether `address` designates one of the nodes.
    #[must_use]
    pub fn contains(&self, address: &HostPort) -> bool {
        self.locate(address).is_some()
    }

    /// Locates the node designated by `address`.
    #[must_use]
    pub fn locate(&self, address: &HostPort) -> Option<NodeLocation> {
        self.stripes.iter().enumerate().find_map(|(stripe, s)| {
            s.nodes
                .iter()
                .position(|node| node.is_reachable_with(address))
                .map(|node| NodeLocation { stripe, node })
        })
    }

    /// Node at a location.
    #[must_use]
    pub fn node_at(&self, location: NodeLocation) -> Option<&Node> {
        self.stripes
            .get(location.stripe)
            .and_then(|stripe| stripe.nodes.get(location.node))
    }

    /// Mutable node at a location.
    pub fn node_at_mut(&mut self, location: NodeLocation) -> Option<&mut Node> {
        self.stripes
            .get_mut(location.stripe)
            .and_then(|stripe| stripe.nodes.get_mut(location.node))
    }

    /// Node designated by `address`.
    #[must_use]
    pub fn node_by_address(&self, address: &HostPort) -> Option<&Node> {
        self.nodes().find(|node| node.is_reachable_with(address))
    }

    /// Node with the given name.
    #[must_use]
    pub fn node_by_name(&self, name: &str) -> Option<&Node> {
        self.nodes().find(|node| node.name == name)
    }

    /// Node with the given identifier.
    #[must_use]
    pub fn node_by_uid(&self, uid: &Uid) -> Option<&Node> {
        self.nodes().find(|node| node.uid == *uid)
    }

    /// Stripe with the given name.
    #[must_use]
    pub fn stripe_by_name(&self, name: &str) -> Option<&Stripe> {
        self.stripes.iter().find(|stripe| stripe.name == name)
    }

    /// Stripe with the given identifier.
    #[must_use]
    pub fn stripe_by_uid(&self, uid: &Uid) -> Option<&Stripe> {
        self.stripes.iter().find(|stripe| stripe.uid == *uid)
    }

    /// Stripe containing the node designated by `address`.
    #[must_use]
    pub fn stripe_of(&self, address: &HostPort) -> Option<&Stripe> {
        self.stripes.iter().find(|stripe| stripe.contains(address))
    }

    /// Appends a stripe.
    pub fn add_stripe(&mut self, stripe: Stripe) {
        self.stripes.push(stripe);
    }

    /// Removes a stripe, returning it if it was present.
    pub fn remove_stripe(&mut self, uid: &Uid) -> Option<Stripe> {
        let index = self.stripes.iter().position(|stripe| stripe.uid == *uid)?;
        Some(self.stripes.remove(index))
    }

    /// Appends a node to a stripe. Returns `false` if the stripe does not exist.
    pub fn add_node(&mut self, stripe_uid: &Uid, node: Node) -> bool {
        match self.stripes.iter_mut().find(|stripe| stripe.uid == *stripe_uid) {
            Some(stripe) => {
                stripe.nodes.push(node);
                true
            }
            None => false,
        }
    }

    /// Removes a node, returning it if it was present.
    pub fn remove_node(&mut self, uid: &Uid) -> Option<Node> {
        self.stripes.iter_mut().find_map(|stripe| {
            let index = stripe.nodes.iter().position(|node| node.uid == *uid)?;
            Some(stripe.nodes.remove(index))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_stripes() -> Cluster {
        Cluster::new(vec![
            Stripe::new(
                "stripe1",
                vec![
                    Node::new("node-1-1", "localhost", 9410),
                    Node::new("node-1-2", "localhost", 9420),
                ],
            ),
            Stripe::new("stripe2", vec![Node::new("node-2-1", "localhost", 9510)]),
        ])
    }

    #[test]
    fn test_locate_nodes() {
        let cluster = two_stripes();
        let location = cluster.locate(&HostPort::new("localhost", 9420)).unwrap();
        assert_eq!(location, NodeLocation { stripe: 0, node: 1 });
        assert_eq!(cluster.node_at(location).unwrap().name, "node-1-2");
        assert!(cluster.locate(&HostPort::new("localhost", 1)).is_none());
        assert_eq!(cluster.node_count(), 3);
    }

    #[test]
    fn test_public_address_designates_node() {
        let mut cluster = two_stripes();
        let node = &mut cluster.stripes[1].nodes[0];
        node.public_hostname = Some("public.example.com".to_string());
        node.public_port = Some(19510);

        let found = cluster.node_by_address(&HostPort::new("public.example.com", 19510)).unwrap();
        assert_eq!(found.name, "node-2-1");
    }

    #[test]
    fn test_add_and_remove_members() {
        let mut cluster = two_stripes();
        let stripe_uid = cluster.stripes[1].uid.clone();
        assert!(cluster.add_node(&stripe_uid, Node::new("node-2-2", "localhost", 9520)));
        assert_eq!(cluster.stripes[1].nodes.len(), 2);

        let uid = cluster.stripes[0].nodes[0].uid.clone();
        let removed = cluster.remove_node(&uid).unwrap();
        assert_eq!(removed.name, "node-1-1");
        assert!(cluster.remove_node(&uid).is_none());

        let removed = cluster.remove_stripe(&stripe_uid).unwrap();
        assert_eq!(removed.nodes.len(), 2);
        assert_eq!(cluster.stripes.len(), 1);
    }
}
