use dynconf_model::{
    Cluster, ClusterValidator, Configuration, HostPort, LockContext, Node, Requirement, Stripe,
    Uid,
};
use serde::{Deserialize, Serialize};

/// What a change request does to a cluster configuration.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum NomadChange {
    /// Set or unset a batch of settings. Configurations with a value set, others unset.
    SettingBatch(Vec<Configuration>),

    /// First change of an activated cluster: installs the whole topology.
    ClusterActivation(Cluster),

    /// Adds a node to an existing stripe.
    NodeAddition {
        /// Stripe receiving the node.
        stripe_uid: Uid,
        /// The new node.
        node: Node,
    },

    /// Removes a node.
    NodeRemoval {
        /// Node to remove.
        node_uid: Uid,
        /// Address of the removed node, for reporting.
        address: HostPort,
    },

    /// Appends a stripe.
    StripeAddition(Stripe),

    /// Removes a stripe.
    StripeRemoval {
        /// Stripe to remove.
        stripe_uid: Uid,
        /// Name of the removed stripe, for reporting.
        name: String,
    },

    /// Takes the advisory configuration lock.
    Lock(LockContext),

    /// Releases the advisory configuration lock.
    Unlock,
}

impl NomadChange {
    /// One-line human summary.
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::SettingBatch(configurations) => {
                let items: Vec<String> = configurations
                    .iter()
                    .map(|configuration| match configuration.value() {
                        Some(_) => format!("set {configuration}"),
                        None => format!("unset {configuration}"),
                    })
                    .collect();
                items.join(", ")
            }
            Self::ClusterActivation(cluster) => format!(
                "Activating cluster '{}' with {} stripe(s) and {} node(s)",
                cluster.name.as_deref().unwrap_or("<unnamed>"),
                cluster.stripes.len(),
                cluster.node_count()
            ),
            Self::NodeAddition { node, .. } => {
                format!("Attaching node: {} ({}) to stripe", node.address(), node.name)
            }
            Self::NodeRemoval { address, .. } => format!("Detaching node: {address}"),
            Self::StripeAddition(stripe) => format!(
                "Attaching stripe: {} with node(s) {}",
                stripe.name,
                stripe
                    .addresses()
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Self::StripeRemoval { name, .. } => format!("Detaching stripe: {name}"),
            Self::Lock(context) => format!("Locking the config by {}", context.owner()),
            Self::Unlock => "Unlocking the config".to_string(),
        }
    }

    /// Whether nodes must restart for the change to take effect.
    #[must_use]
    pub fn requires_restart(&self) -> bool {
        match self {
            Self::SettingBatch(configurations) => configurations
                .iter()
                .any(|configuration| configuration.setting().requires(Requirement::NodeRestart)),
            _ => false,
        }
    }

    /// Computes the configuration resulting from applying the change to `current`, the
    /// configuration in force (absent before activation), and validates it.
    ///
    /// # Errors
    ///
    /// Returns a human readable reason when the change does not apply.
    pub fn apply(&self, current: Option<&Cluster>) -> Result<Cluster, String> {
        let mut cluster = match (self, current) {
            (Self::ClusterActivation(cluster), None) => return validated(cluster.clone()),
            (Self::ClusterActivation(_), Some(_)) => {
                return Err("cluster is already activated".to_string());
            }
            (_, None) => return Err("cluster is not activated".to_string()),
            (_, Some(current)) => current.clone(),
        };

        match self {
            Self::SettingBatch(configurations) => {
                for configuration in configurations {
                    configuration
                        .apply(&mut cluster)
                        .map_err(|e| e.to_string())?;
                }
            }
            Self::NodeAddition { stripe_uid, node } => {
                if cluster.contains(&node.address()) {
                    return Err(format!("node {} is already part of the cluster", node.address()));
                }
                if !cluster.add_node(stripe_uid, node.clone()) {
                    return Err(format!("stripe {stripe_uid} does not exist"));
                }
            }
            Self::NodeRemoval { node_uid, address } => {
                cluster
                    .remove_node(node_uid)
                    .ok_or_else(|| format!("node {address} is not part of the cluster"))?;
                if cluster.stripes.iter().any(|stripe| stripe.nodes.is_empty()) {
                    return Err(format!(
                        "node {address} is the last node of its stripe: detach the stripe instead"
                    ));
                }
            }
            Self::StripeAddition(stripe) => {
                if let Some(address) = stripe.addresses().iter().find(|a| cluster.contains(a)) {
                    return Err(format!("node {address} is already part of the cluster"));
                }
                cluster.add_stripe(stripe.clone());
            }
            Self::StripeRemoval { stripe_uid, name } => {
                cluster
                    .remove_stripe(stripe_uid)
                    .ok_or_else(|| format!("stripe {name} is not part of the cluster"))?;
                if cluster.stripes.is_empty() {
                    return Err("cannot detach the last stripe of a cluster".to_string());
                }
            }
            Self::Lock(context) => match &cluster.lock_context {
                Some(held) if held.token != context.token => {
                    return Err(format!("config is already locked by {}", held.owner()));
                }
                _ => cluster.lock_context = Some(context.clone()),
            },
            Self::Unlock => cluster.lock_context = None,
            Self::ClusterActivation(_) => {}
        }

        validated(cluster)
    }
}

fn validated(cluster: Cluster) -> Result<Cluster, String> {
    ClusterValidator::new(&cluster)
        .validate()
        .map_err(|e| e.to_string())?;
    Ok(cluster)
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;

    fn cluster() -> Cluster {
        Cluster::new(vec![Stripe::new(
            "stripe1",
            vec![
                Node::new("node-1", "localhost", 9410),
                Node::new("node-2", "localhost", 9420),
            ],
        )])
    }

    #[test]
    fn test_setting_batch() {
        let change = NomadChange::SettingBatch(vec![
            "client-lease-duration=10s".parse().unwrap(),
            "stripe.1.node.1.backup-dir".parse().unwrap(),
        ]);
        assert_eq!(
            change.summary(),
            "set client-lease-duration=10s, unset stripe.1.node.1.backup-dir"
        );

        let result = change.apply(Some(&cluster())).unwrap();
        assert_eq!(result.client_lease_duration.to_string(), "10s");
        assert!(!change.requires_restart());
    }

    #[test]
    fn test_invalid_result_is_refused() {
        let change =
            NomadChange::SettingBatch(vec!["stripe.1.node.1.backup-dir=/b".parse().unwrap()]);
        let reason = change.apply(Some(&cluster())).unwrap_err();
        assert!(reason.contains("backup directories"));
    }

    #[test]
    fn test_activation() {
        let change = NomadChange::ClusterActivation(cluster());
        assert!(change.apply(None).is_ok());
        assert_matches!(
            change.apply(Some(&cluster())),
            Err(reason) if reason.contains("already activated")
        );
        assert_matches!(
            NomadChange::Unlock.apply(None),
            Err(reason) if reason.contains("not activated")
        );
    }

    #[test]
    fn test_topology_changes() {
        let cluster = cluster();
        let stripe_uid = cluster.stripes[0].uid.clone();

        let added = NomadChange::NodeAddition {
            stripe_uid,
            node: Node::new("node-3", "localhost", 9430),
        }
        .apply(Some(&cluster))
        .unwrap();
        assert_eq!(added.node_count(), 3);

        let duplicate = NomadChange::NodeAddition {
            stripe_uid: cluster.stripes[0].uid.clone(),
            node: Node::new("node-x", "localhost", 9410),
        };
        assert!(duplicate.apply(Some(&cluster)).is_err());

        let node = &cluster.stripes[0].nodes[1];
        let removed = NomadChange::NodeRemoval {
            node_uid: node.uid.clone(),
            address: node.address(),
        }
        .apply(Some(&cluster))
        .unwrap();
        assert_eq!(removed.node_count(), 1);

        let last_stripe = NomadChange::StripeRemoval {
            stripe_uid: cluster.stripes[0].uid.clone(),
            name: "stripe1".to_string(),
        };
        assert!(last_stripe.apply(Some(&cluster)).is_err());
    }

    #[test]
    fn test_lock_and_unlock() {
        let locked = NomadChange::Lock(LockContext::new("t1", "alice", ""))
            .apply(Some(&cluster()))
            .unwrap();
        assert!(locked.lock_context.is_some());

        let other = NomadChange::Lock(LockContext::new("t2", "bob", ""));
        assert!(other.apply(Some(&locked)).is_err());

        let unlocked = NomadChange::Unlock.apply(Some(&locked)).unwrap();
        assert!(unlocked.lock_context.is_none());
    }
}
