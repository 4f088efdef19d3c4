use serde::{Deserialize, Serialize};

use crate::address::HostPort;
use crate::node::Node;
use crate::uid::Uid;

/// A failover unit: one active and any number of passives.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Stripe {
    /// Unique identifier.
    pub uid: Uid,

    /// Unique name within the cluster.
    pub name: String,

    /// Member nodes, in declaration order.
    pub nodes: Vec<Node>,
}

impl Stripe {
    /// Creates a stripe from its members.
    pub fn new(name: impl Into<String>, nodes: Vec<Node>) -> Self {
        Self {
            uid: Uid::new(),
            name: name.into(),
            nodes,
        }
    }

    /// Finds a member by address.
    #[must_use]
    pub fn node_by_address(&self, address: &HostPort) -> Option<&Node> {
        self.nodes.iter().find(|node| node.is_reachable_with(address))
    }

    /// Whether `address` designates one of the members.
    #[must_use]
    pub fn contains(&self, address: &HostPort) -> bool {
        self.node_by_address(address).is_some()
    }

    /// Member addresses.
    #[must_use]
    pub fn addresses(&self) -> Vec<HostPort> {
        self.nodes.iter().map(Node::address).collect()
    }
}
