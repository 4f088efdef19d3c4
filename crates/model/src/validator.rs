//! Structural validation of a candidate cluster.
//!
//! Runs before any network call: a cluster that fails here is never proposed to a node.

use std::collections::{BTreeSet, HashMap};

use tracing::warn;

use crate::address::HostPort;
use crate::cluster::Cluster;
use crate::error::{Error, Result};
use crate::failover::FailoverPriority;
use crate::node::Node;
use crate::setting::{SecurityAuthc, Setting};

/// Validator for candidate cluster topologies
pub struct ClusterValidator<'a> {
    cluster: &'a Cluster,
}

impl<'a> ClusterValidator<'a> {
    /// Creates a validator for `cluster`.
    #[must_use]
    pub const fn new(cluster: &'a Cluster) -> Self {
        Self { cluster }
    }

    /// Runs every check, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] describing the first problem found, or
    /// [`Error::InvalidValue`] for a name using reserved words or characters.
    pub fn validate(&self) -> Result<()> {
        self.validate_names()?;
        self.validate_uids()?;
        self.validate_addresses()?;
        self.validate_all_or_none("backup directories", |node| node.backup_dir.is_some())?;
        self.validate_data_dirs()?;
        self.validate_security()?;
        self.validate_all_or_none("audit log directories", |node| node.audit_log_dir.is_some())?;
        self.validate_failover_priority()
    }

    fn validate_names(&self) -> Result<()> {
        if let Some(name) = &self.cluster.name {
            Setting::ClusterName.validate(None, Some(name))?;
        }

        for stripe in &self.cluster.stripes {
            Setting::StripeName.validate(None, Some(&stripe.name))?;
        }
        for node in self.cluster.nodes() {
            Setting::NodeName.validate(None, Some(&node.name))?;
        }

        if let Some(name) = first_duplicate(self.cluster.stripes.iter().map(|s| s.name.as_str())) {
            return Err(Error::Validation(format!("Found duplicate stripe name: {name}")));
        }
        if let Some(name) = first_duplicate(self.cluster.nodes().map(|n| n.name.as_str())) {
            return Err(Error::Validation(format!("Found duplicate node name: {name}")));
        }

        Ok(())
    }

    fn validate_uids(&self) -> Result<()> {
        let uids = std::iter::once(self.cluster.uid.as_str())
            .chain(self.cluster.stripes.iter().map(|s| s.uid.as_str()))
            .chain(self.cluster.nodes().map(|n| n.uid.as_str()));

        match first_duplicate(uids) {
            Some(uid) => Err(Error::Validation(format!("Found duplicate UID: {uid}"))),
            None => Ok(()),
        }
    }

    fn validate_addresses(&self) -> Result<()> {
        let mut internal: HashMap<HostPort, Vec<&str>> = HashMap::new();
        let mut public: HashMap<HostPort, Vec<&str>> = HashMap::new();

        for node in self.cluster.nodes() {
            internal.entry(node.address()).or_default().push(&node.name);

            if node.public_hostname.is_some() != node.public_port.is_some() {
                return Err(Error::Validation(format!(
                    "Public address of node with name: {} isn't well-formed. Public hostname and port need to be set together",
                    node.name
                )));
            }
            if let Some(address) = node.public_address() {
                public.entry(address).or_default().push(&node.name);
            }
        }

        for (kind, addresses) in [("address", &internal), ("public address", &public)] {
            if let Some((address, names)) = addresses.iter().find(|(_, names)| names.len() > 1) {
                return Err(Error::Validation(format!(
                    "Nodes with names: {} have the same {kind}: '{address}'",
                    names.join(", ")
                )));
            }
        }

        self.validate_all_or_none("public addresses", |node| node.public_address().is_some())
    }

    fn validate_all_or_none(&self, what: &str, configured: impl Fn(&Node) -> bool) -> Result<()> {
        let missing: Vec<&str> = self
            .cluster
            .nodes()
            .filter(|node| !configured(node))
            .map(|node| node.name.as_str())
            .collect();

        if missing.is_empty() || missing.len() == self.cluster.node_count() {
            Ok(())
        } else {
            Err(Error::Validation(format!(
                "Nodes with names: [{}] don't have {what} defined, but other nodes in the cluster do. \
                 Mutative operations on {what} must be done simultaneously on every node in the cluster",
                missing.join(", ")
            )))
        }
    }

    fn validate_data_dirs(&self) -> Result<()> {
        let distinct: BTreeSet<Vec<&str>> = self
            .cluster
            .nodes()
            .map(|node| node.data_dirs.keys().map(String::as_str).collect())
            .collect();

        if distinct.len() > 1 {
            return Err(Error::Validation(format!(
                "Data directory names need to match across the cluster, but found the following mismatches: {distinct:?}. \
                 Mutative operations on data dirs must be done simultaneously on every node in the cluster"
            )));
        }
        Ok(())
    }

    fn validate_security(&self) -> Result<()> {
        let cluster = self.cluster;

        if cluster.security_authc == Some(SecurityAuthc::Certificate) && !cluster.ssl_tls {
            return Err(Error::Validation(
                "ssl-tls is required for security-authc=certificate".to_string(),
            ));
        }

        let cluster_security = cluster.security_authc.is_some() || cluster.ssl_tls || cluster.whitelist;
        for node in cluster.nodes() {
            match (&node.security_dir, cluster_security || node.audit_log_dir.is_some()) {
                (None, true) => {
                    return Err(Error::Validation(format!(
                        "security-dir is mandatory for any of the security configuration, but not found on node with name: {}",
                        node.name
                    )));
                }
                (Some(_), _) if !cluster_security => {
                    return Err(Error::Validation(format!(
                        "One of ssl-tls, security-authc, or whitelist is required for security configuration, but not found on node with name: {}",
                        node.name
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn validate_failover_priority(&self) -> Result<()> {
        match self.cluster.failover_priority {
            None => Err(Error::Validation("failover-priority setting is missing".to_string())),
            Some(FailoverPriority::Consistency { voters }) => {
                for stripe in &self.cluster.stripes {
                    let sum = voters as usize + stripe.nodes.len();
                    if sum % 2 == 0 {
                        warn!(
                            stripe = %stripe.name,
                            voters,
                            nodes = stripe.nodes.len(),
                            "the sum of voters and nodes is even: this configuration is more likely to experience split-brain situations"
                        );
                    }
                }
                Ok(())
            }
            Some(FailoverPriority::Availability) => Ok(()),
        }
    }
}

fn first_duplicate<'a>(values: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    let mut seen = BTreeSet::new();
    values.into_iter().find(|value| !seen.insert(*value))
}
