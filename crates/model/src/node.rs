use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::address::HostPort;
use crate::uid::Uid;

/// Default port clients and peers connect to.
pub const DEFAULT_PORT: u16 = 9410;

/// Default port used for intra-stripe replication.
pub const DEFAULT_GROUP_PORT: u16 = 9430;

/// A server process and its node-level settings.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier.
    pub uid: Uid,

    /// Unique name within the cluster.
    pub name: String,

    /// Internal hostname.
    pub hostname: String,

    /// Internal port.
    pub port: u16,

    /// Hostname advertised to clients when behind a NAT.
    pub public_hostname: Option<String>,

    /// Port advertised to clients when behind a NAT.
    pub public_port: Option<u16>,

    /// Replication port.
    pub group_port: u16,

    /// Address the client port binds to.
    pub bind_address: String,

    /// Address the replication port binds to.
    pub group_bind_address: String,

    /// Log directory.
    pub log_dir: String,

    /// Metadata directory.
    pub metadata_dir: String,

    /// Backup directory, if backups are enabled.
    pub backup_dir: Option<String>,

    /// Named data directories.
    pub data_dirs: BTreeMap<String, String>,

    /// Security configuration directory.
    pub security_dir: Option<String>,

    /// Security audit log directory.
    pub audit_log_dir: Option<String>,

    /// Low level server tuning properties.
    pub tc_properties: BTreeMap<String, String>,
}

impl Node {
    /// Creates a node with default settings listening on `hostname:port`.
    pub fn new(name: impl Into<String>, hostname: impl Into<String>, port: u16) -> Self {
        Self {
            uid: Uid::new(),
            name: name.into(),
            hostname: hostname.into(),
            port,
            public_hostname: None,
            public_port: None,
            group_port: DEFAULT_GROUP_PORT,
            bind_address: "0.0.0.0".to_string(),
            group_bind_address: "0.0.0.0".to_string(),
            log_dir: "%H/terracotta/logs".to_string(),
            metadata_dir: "%H/terracotta/metadata".to_string(),
            backup_dir: None,
            data_dirs: BTreeMap::from([(
                "main".to_string(),
                "%H/terracotta/user-data/main".to_string(),
            )]),
            security_dir: None,
            audit_log_dir: None,
            tc_properties: BTreeMap::new(),
        }
    }

    /// Internal address of the node.
    #[must_use]
    pub fn address(&self) -> HostPort {
        HostPort::new(self.hostname.clone(), self.port)
    }

    /// Public address of the node, if both public hostname and port are configured.
    #[must_use]
    pub fn public_address(&self) -> Option<HostPort> {
        match (&self.public_hostname, self.public_port) {
            (Some(host), Some(port)) => Some(HostPort::new(host.clone(), port)),
            _ => None,
        }
    }

    /// Whether `address` designates this node, through its internal or public address.
    #[must_use]
    pub fn is_reachable_with(&self, address: &HostPort) -> bool {
        self.address() == *address || self.public_address().as_ref() == Some(address)
    }
}
