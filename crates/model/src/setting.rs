//! Explicit dispatch table for every configurable setting.
//!
//! Each [`Setting`] knows where it lives (cluster, stripe or node), which operations are
//! permitted on it depending on whether the cluster is activated, what a change to it
//! requires from the cluster, how to validate a value and how to read or write it.

use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::cluster::Cluster;
use crate::configuration::{Operation, Scope};
use crate::error::{Error, Result};
use crate::failover::FailoverPriority;
use crate::lock::LockContext;
use crate::measure::{MemorySize, TimeMeasure};
use crate::node::{DEFAULT_GROUP_PORT, Node};
use crate::stripe::Stripe;

static HOST_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(%[hci]|[A-Za-z0-9]([A-Za-z0-9\-]*[A-Za-z0-9])?(\.[A-Za-z0-9]([A-Za-z0-9\-]*[A-Za-z0-9])?)*)$")
        .unwrap()
});

const RESERVED_NAME_CHARS: [char; 11] = [' ', ',', ':', '=', '%', '{', '}', '.', '/', '\\', '"'];

const RESERVED_NAMES: [&str; 3] = ["cluster", "stripe", "node"];

/// Lifecycle phase of the cluster a setting is read or written in.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ClusterState {
    /// Nodes are running in diagnostic mode and the cluster is not activated yet.
    Configuring,

    /// The cluster is activated and changes go through the change protocol.
    Activated,
}

/// What a change to a setting demands from the cluster.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Requirement {
    /// The change only takes effect after the affected nodes restart.
    NodeRestart,

    /// Every node of the cluster must be online.
    AllNodesOnline,

    /// At least the active of every stripe must be online.
    ActivesOnline,

    /// Not exposed to operators through get/set/unset.
    Hidden,
}

/// Client authentication scheme.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum SecurityAuthc {
    /// Credentials stored in a file.
    File,

    /// Credentials checked against an LDAP directory.
    Ldap,

    /// Client certificates.
    Certificate,
}

impl Display for SecurityAuthc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::File => "file",
            Self::Ldap => "ldap",
            Self::Certificate => "certificate",
        })
    }
}

impl FromStr for SecurityAuthc {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "file" => Ok(Self::File),
            "ldap" => Ok(Self::Ldap),
            "certificate" => Ok(Self::Certificate),
            _ => Err(invalid(
                Setting::SecurityAuthc,
                s,
                "expected one of file, ldap, certificate",
            )),
        }
    }
}

struct Permission {
    when: &'static [ClusterState],
    allow: &'static [Operation],
    levels: &'static [Scope],
}

const BOTH: &[ClusterState] = &[ClusterState::Configuring, ClusterState::Activated];
const CONFIGURING: &[ClusterState] = &[ClusterState::Configuring];
const ACTIVATED: &[ClusterState] = &[ClusterState::Activated];

const ANY_LEVEL: &[Scope] = &[Scope::Cluster, Scope::Stripe, Scope::Node];
const CLUSTER_LEVEL: &[Scope] = &[Scope::Cluster];
const STRIPE_LEVEL: &[Scope] = &[Scope::Stripe];
const NODE_LEVEL: &[Scope] = &[Scope::Node];

const GET: &[Operation] = &[Operation::Get];
const IMPORT: &[Operation] = &[Operation::Import];
const GET_SET: &[Operation] = &[Operation::Get, Operation::Set];
const SET_IMPORT: &[Operation] = &[Operation::Set, Operation::Import];
const SET_UNSET: &[Operation] = &[Operation::Set, Operation::Unset];
const GET_SET_UNSET: &[Operation] = &[Operation::Get, Operation::Set, Operation::Unset];
const ALL_OPERATIONS: &[Operation] = &[
    Operation::Get,
    Operation::Set,
    Operation::Unset,
    Operation::Import,
];

macro_rules! permissions {
    ($(($when:expr, $allow:expr, $levels:expr)),* $(,)?) => {
        &[$(Permission { when: $when, allow: $allow, levels: $levels }),*]
    };
}

/// A configurable setting.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Setting {
    /// `cluster-name`
    ClusterName,
    /// `failover-priority`
    FailoverPriority,
    /// `client-lease-duration`
    ClientLeaseDuration,
    /// `client-reconnect-window`
    ClientReconnectWindow,
    /// `offheap-resources`
    OffheapResources,
    /// `security-authc`
    SecurityAuthc,
    /// `ssl-tls`
    SslTls,
    /// `whitelist`
    Whitelist,
    /// `lock-context`
    LockContext,
    /// `stripe-name`
    StripeName,
    /// `name`
    NodeName,
    /// `hostname`
    NodeHostname,
    /// `port`
    NodePort,
    /// `public-hostname`
    NodePublicHostname,
    /// `public-port`
    NodePublicPort,
    /// `group-port`
    NodeGroupPort,
    /// `bind-address`
    NodeBindAddress,
    /// `group-bind-address`
    NodeGroupBindAddress,
    /// `log-dir`
    NodeLogDir,
    /// `metadata-dir`
    NodeMetadataDir,
    /// `backup-dir`
    NodeBackupDir,
    /// `data-dirs`
    DataDirs,
    /// `security-dir`
    SecurityDir,
    /// `audit-log-dir`
    AuditLogDir,
    /// `tc-properties`
    TcProperties,
}

impl Setting {
    /// Every setting, in documentation order.
    pub const ALL: [Self; 25] = [
        Self::ClusterName,
        Self::FailoverPriority,
        Self::ClientLeaseDuration,
        Self::ClientReconnectWindow,
        Self::OffheapResources,
        Self::SecurityAuthc,
        Self::SslTls,
        Self::Whitelist,
        Self::LockContext,
        Self::StripeName,
        Self::NodeName,
        Self::NodeHostname,
        Self::NodePort,
        Self::NodePublicHostname,
        Self::NodePublicPort,
        Self::NodeGroupPort,
        Self::NodeBindAddress,
        Self::NodeGroupBindAddress,
        Self::NodeLogDir,
        Self::NodeMetadataDir,
        Self::NodeBackupDir,
        Self::DataDirs,
        Self::SecurityDir,
        Self::AuditLogDir,
        Self::TcProperties,
    ];

    /// Name used on the command line.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ClusterName => "cluster-name",
            Self::FailoverPriority => "failover-priority",
            Self::ClientLeaseDuration => "client-lease-duration",
            Self::ClientReconnectWindow => "client-reconnect-window",
            Self::OffheapResources => "offheap-resources",
            Self::SecurityAuthc => "security-authc",
            Self::SslTls => "ssl-tls",
            Self::Whitelist => "whitelist",
            Self::LockContext => "lock-context",
            Self::StripeName => "stripe-name",
            Self::NodeName => "name",
            Self::NodeHostname => "hostname",
            Self::NodePort => "port",
            Self::NodePublicHostname => "public-hostname",
            Self::NodePublicPort => "public-port",
            Self::NodeGroupPort => "group-port",
            Self::NodeBindAddress => "bind-address",
            Self::NodeGroupBindAddress => "group-bind-address",
            Self::NodeLogDir => "log-dir",
            Self::NodeMetadataDir => "metadata-dir",
            Self::NodeBackupDir => "backup-dir",
            Self::DataDirs => "data-dirs",
            Self::SecurityDir => "security-dir",
            Self::AuditLogDir => "audit-log-dir",
            Self::TcProperties => "tc-properties",
        }
    }

    /// Level of the topology the setting is stored at.
    #[must_use]
    pub const fn level(self) -> Scope {
        match self {
            Self::ClusterName
            | Self::FailoverPriority
            | Self::ClientLeaseDuration
            | Self::ClientReconnectWindow
            | Self::OffheapResources
            | Self::SecurityAuthc
            | Self::SslTls
            | Self::Whitelist
            | Self::LockContext => Scope::Cluster,
            Self::StripeName => Scope::Stripe,
            _ => Scope::Node,
        }
    }

    /// Whether the setting is a map addressed with `setting.key`.
    #[must_use]
    pub const fn is_map(self) -> bool {
        matches!(
            self,
            Self::OffheapResources | Self::DataDirs | Self::TcProperties
        )
    }

    fn permissions(self) -> &'static [Permission] {
        match self {
            Self::ClusterName | Self::OffheapResources => permissions![
                (CONFIGURING, ALL_OPERATIONS, CLUSTER_LEVEL),
                (ACTIVATED, GET_SET, CLUSTER_LEVEL),
            ],
            Self::FailoverPriority => permissions![
                (CONFIGURING, IMPORT, CLUSTER_LEVEL),
                (BOTH, GET_SET, CLUSTER_LEVEL),
            ],
            Self::ClientLeaseDuration
            | Self::ClientReconnectWindow
            | Self::SecurityAuthc
            | Self::SslTls
            | Self::Whitelist => permissions![
                (CONFIGURING, IMPORT, CLUSTER_LEVEL),
                (BOTH, GET_SET_UNSET, CLUSTER_LEVEL),
            ],
            Self::LockContext => permissions![(CONFIGURING, IMPORT, CLUSTER_LEVEL)],
            Self::StripeName => permissions![
                (BOTH, GET, &[Scope::Cluster, Scope::Stripe]),
                (CONFIGURING, SET_IMPORT, STRIPE_LEVEL),
            ],
            Self::NodeName => permissions![
                (BOTH, GET, ANY_LEVEL),
                (CONFIGURING, SET_IMPORT, NODE_LEVEL),
            ],
            Self::NodeHostname | Self::NodePort => permissions![
                (BOTH, GET, ANY_LEVEL),
                (CONFIGURING, IMPORT, NODE_LEVEL),
            ],
            Self::NodeGroupPort
            | Self::NodeBindAddress
            | Self::NodeGroupBindAddress
            | Self::NodeMetadataDir => permissions![
                (BOTH, GET, ANY_LEVEL),
                (CONFIGURING, SET_UNSET, ANY_LEVEL),
                (CONFIGURING, IMPORT, NODE_LEVEL),
            ],
            Self::NodePublicHostname
            | Self::NodePublicPort
            | Self::NodeLogDir
            | Self::NodeBackupDir
            | Self::SecurityDir
            | Self::AuditLogDir
            | Self::TcProperties => permissions![
                (CONFIGURING, IMPORT, NODE_LEVEL),
                (BOTH, GET_SET_UNSET, ANY_LEVEL),
            ],
            Self::DataDirs => permissions![
                (CONFIGURING, IMPORT, NODE_LEVEL),
                (CONFIGURING, GET_SET_UNSET, ANY_LEVEL),
                (ACTIVATED, GET_SET, ANY_LEVEL),
            ],
        }
    }

    /// Whether `operation` is permitted on this setting at `level` while the cluster is in
    /// phase `when`.
    #[must_use]
    pub fn allows(self, when: ClusterState, operation: Operation, level: Scope) -> bool {
        self.permissions().iter().any(|permission| {
            permission.when.contains(&when)
                && permission.allow.contains(&operation)
                && permission.levels.contains(&level)
        })
    }

    /// What a change to this setting demands.
    #[must_use]
    pub const fn requirements(self) -> &'static [Requirement] {
        match self {
            Self::FailoverPriority | Self::SecurityAuthc | Self::SslTls | Self::Whitelist => {
                &[Requirement::AllNodesOnline, Requirement::NodeRestart]
            }
            Self::LockContext => &[Requirement::Hidden],
            Self::NodeLogDir | Self::SecurityDir | Self::AuditLogDir | Self::TcProperties => {
                &[Requirement::ActivesOnline, Requirement::NodeRestart]
            }
            _ => &[Requirement::ActivesOnline],
        }
    }

    /// Whether a change to this setting demands `requirement`.
    #[must_use]
    pub fn requires(self, requirement: Requirement) -> bool {
        self.requirements().contains(&requirement)
    }

    /// Validates a key and value for this setting. `value` is `None` for get and unset.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidValue`] describing the first problem found.
    pub fn validate(self, key: Option<&str>, value: Option<&str>) -> Result<()> {
        if key.is_some() && !self.is_map() {
            return Err(invalid(self, key.unwrap_or_default(), "setting does not accept a key"));
        }
        let Some(value) = value else {
            return Ok(());
        };

        if self.is_map() {
            return match key {
                Some(key) => self.validate_map_entry(key, value),
                None if value.is_empty() => Ok(()),
                None => parse_map(self, value).map(|_| ()),
            };
        }

        match self {
            Self::ClusterName | Self::StripeName | Self::NodeName => validate_name(self, value),
            Self::FailoverPriority => value.parse::<FailoverPriority>().map(|_| ()),
            Self::ClientLeaseDuration => {
                TimeMeasure::parse_with_units(self.name(), value, &["ms", "s", "m", "h"]).map(|_| ())
            }
            Self::ClientReconnectWindow => {
                TimeMeasure::parse_with_units(self.name(), value, &["s", "m", "h"]).map(|_| ())
            }
            Self::SecurityAuthc => value.parse::<SecurityAuthc>().map(|_| ()),
            Self::SslTls | Self::Whitelist => parse_bool(self, value).map(|_| ()),
            Self::LockContext => value.parse::<LockContext>().map(|_| ()),
            Self::NodeHostname | Self::NodePublicHostname => validate_host(self, value),
            Self::NodePort | Self::NodePublicPort | Self::NodeGroupPort => {
                parse_port(self, value).map(|_| ())
            }
            Self::NodeBindAddress | Self::NodeGroupBindAddress => value
                .parse::<IpAddr>()
                .map(|_| ())
                .map_err(|_| invalid(self, value, "expected an IP address")),
            Self::NodeLogDir
            | Self::NodeMetadataDir
            | Self::NodeBackupDir
            | Self::SecurityDir
            | Self::AuditLogDir => validate_path(self, value),
            Self::OffheapResources | Self::DataDirs | Self::TcProperties => Ok(()),
        }
    }

    fn validate_map_entry(self, key: &str, value: &str) -> Result<()> {
        if key.is_empty() {
            return Err(invalid(self, value, "map key must not be empty"));
        }
        if value.is_empty() {
            return Ok(());
        }
        match self {
            Self::OffheapResources => value.parse::<MemorySize>().map(|_| ()),
            Self::DataDirs => validate_path(self, value),
            _ => Ok(()),
        }
    }

    /// Reads a cluster level setting.
    #[must_use]
    pub fn read_cluster(self, cluster: &Cluster, key: Option<&str>) -> Option<String> {
        match self {
            Self::ClusterName => cluster.name.clone(),
            Self::FailoverPriority => cluster.failover_priority.map(|p| p.to_string()),
            Self::ClientLeaseDuration => Some(cluster.client_lease_duration.to_string()),
            Self::ClientReconnectWindow => Some(cluster.client_reconnect_window.to_string()),
            Self::OffheapResources => read_map(&cluster.offheap_resources, key),
            Self::SecurityAuthc => cluster.security_authc.map(|authc| authc.to_string()),
            Self::SslTls => Some(cluster.ssl_tls.to_string()),
            Self::Whitelist => Some(cluster.whitelist.to_string()),
            Self::LockContext => cluster.lock_context.as_ref().map(ToString::to_string),
            _ => None,
        }
    }

    /// Writes a cluster level setting. `None` unsets it.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be parsed or the setting is not a cluster setting.
    pub fn write_cluster(self, cluster: &mut Cluster, key: Option<&str>, value: Option<&str>) -> Result<()> {
        match self {
            Self::ClusterName => cluster.name = value.map(str::to_string),
            Self::FailoverPriority => {
                cluster.failover_priority = value.map(str::parse::<FailoverPriority>).transpose()?;
            }
            Self::ClientLeaseDuration => {
                cluster.client_lease_duration = match value {
                    Some(value) => value.parse()?,
                    None => TimeMeasure::seconds(150),
                };
            }
            Self::ClientReconnectWindow => {
                cluster.client_reconnect_window = match value {
                    Some(value) => value.parse()?,
                    None => TimeMeasure::seconds(120),
                };
            }
            Self::OffheapResources => {
                write_map(self, &mut cluster.offheap_resources, key, value, str::parse::<MemorySize>)?;
            }
            Self::SecurityAuthc => {
                cluster.security_authc = value.map(str::parse::<SecurityAuthc>).transpose()?;
            }
            Self::SslTls => cluster.ssl_tls = value.map(|v| parse_bool(self, v)).transpose()?.unwrap_or(false),
            Self::Whitelist => {
                cluster.whitelist = value.map(|v| parse_bool(self, v)).transpose()?.unwrap_or(false);
            }
            Self::LockContext => {
                cluster.lock_context = value.map(str::parse::<LockContext>).transpose()?;
            }
            _ => return Err(wrong_level(self, Scope::Cluster)),
        }
        Ok(())
    }

    /// Reads a stripe level setting.
    #[must_use]
    pub fn read_stripe(self, stripe: &Stripe) -> Option<String> {
        match self {
            Self::StripeName => Some(stripe.name.clone()),
            _ => None,
        }
    }

    /// Writes a stripe level setting.
    ///
    /// # Errors
    ///
    /// Returns an error if the setting is not a stripe setting or cannot be unset.
    pub fn write_stripe(self, stripe: &mut Stripe, value: Option<&str>) -> Result<()> {
        match (self, value) {
            (Self::StripeName, Some(name)) => {
                stripe.name = name.to_string();
                Ok(())
            }
            (Self::StripeName, None) => Err(invalid(self, "", "stripe name cannot be unset")),
            _ => Err(wrong_level(self, Scope::Stripe)),
        }
    }

    /// Reads a node level setting.
    #[must_use]
    pub fn read_node(self, node: &Node, key: Option<&str>) -> Option<String> {
        match self {
            Self::NodeName => Some(node.name.clone()),
            Self::NodeHostname => Some(node.hostname.clone()),
            Self::NodePort => Some(node.port.to_string()),
            Self::NodePublicHostname => node.public_hostname.clone(),
            Self::NodePublicPort => node.public_port.map(|port| port.to_string()),
            Self::NodeGroupPort => Some(node.group_port.to_string()),
            Self::NodeBindAddress => Some(node.bind_address.clone()),
            Self::NodeGroupBindAddress => Some(node.group_bind_address.clone()),
            Self::NodeLogDir => Some(node.log_dir.clone()),
            Self::NodeMetadataDir => Some(node.metadata_dir.clone()),
            Self::NodeBackupDir => node.backup_dir.clone(),
            Self::DataDirs => read_map(&node.data_dirs, key),
            Self::SecurityDir => node.security_dir.clone(),
            Self::AuditLogDir => node.audit_log_dir.clone(),
            Self::TcProperties => read_map(&node.tc_properties, key),
            _ => None,
        }
    }

    /// Writes a node level setting. `None` unsets it.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be parsed, the setting cannot be unset, or the
    /// setting is not a node setting.
    pub fn write_node(self, node: &mut Node, key: Option<&str>, value: Option<&str>) -> Result<()> {
        let required = |value: Option<&str>| {
            value
                .map(str::to_string)
                .ok_or_else(|| invalid(self, "", "setting cannot be unset"))
        };

        match self {
            Self::NodeName => node.name = required(value)?,
            Self::NodeHostname => node.hostname = required(value)?,
            Self::NodePort => node.port = parse_port(self, &required(value)?)?,
            Self::NodePublicHostname => node.public_hostname = value.map(str::to_string),
            Self::NodePublicPort => {
                node.public_port = value.map(|v| parse_port(self, v)).transpose()?;
            }
            Self::NodeGroupPort => {
                node.group_port = value
                    .map(|v| parse_port(self, v))
                    .transpose()?
                    .unwrap_or(DEFAULT_GROUP_PORT);
            }
            Self::NodeBindAddress => {
                node.bind_address = value.unwrap_or("0.0.0.0").to_string();
            }
            Self::NodeGroupBindAddress => {
                node.group_bind_address = value.unwrap_or("0.0.0.0").to_string();
            }
            Self::NodeLogDir => {
                node.log_dir = value.unwrap_or("%H/terracotta/logs").to_string();
            }
            Self::NodeMetadataDir => {
                node.metadata_dir = value.unwrap_or("%H/terracotta/metadata").to_string();
            }
            Self::NodeBackupDir => node.backup_dir = value.map(str::to_string),
            Self::DataDirs => {
                write_map(self, &mut node.data_dirs, key, value, |v| Ok(v.to_string()))?;
            }
            Self::SecurityDir => node.security_dir = value.map(str::to_string),
            Self::AuditLogDir => node.audit_log_dir = value.map(str::to_string),
            Self::TcProperties => {
                write_map(self, &mut node.tc_properties, key, value, |v| Ok(v.to_string()))?;
            }
            _ => return Err(wrong_level(self, Scope::Node)),
        }
        Ok(())
    }
}

impl Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Setting {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|setting| setting.name() == s)
            .ok_or_else(|| Error::UnknownSetting {
                name: s.to_string(),
            })
    }
}

fn invalid(setting: Setting, value: &str, reason: &str) -> Error {
    Error::InvalidValue {
        setting: setting.name().to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn wrong_level(setting: Setting, level: Scope) -> Error {
    Error::IllegalOperation {
        setting: setting.name().to_string(),
        reason: format!("setting is not stored at {level} level"),
    }
}

fn validate_name(setting: Setting, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(invalid(setting, value, "name must not be empty"));
    }
    if let Some(c) = value.chars().find(|c| RESERVED_NAME_CHARS.contains(c)) {
        return Err(invalid(setting, value, &format!("name must not contain '{c}'")));
    }
    if RESERVED_NAMES.contains(&value) {
        return Err(invalid(setting, value, "name is a reserved word"));
    }
    Ok(())
}

fn validate_host(setting: Setting, value: &str) -> Result<()> {
    if value.parse::<IpAddr>().is_ok() || HOST_PATTERN.is_match(value) {
        Ok(())
    } else {
        Err(invalid(setting, value, "expected a hostname or IP address"))
    }
}

fn validate_path(setting: Setting, value: &str) -> Result<()> {
    if value.is_empty() || value.contains('\0') {
        Err(invalid(setting, value, "expected a path"))
    } else {
        Ok(())
    }
}

fn parse_port(setting: Setting, value: &str) -> Result<u16> {
    match value.parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(invalid(setting, value, "expected a port between 1 and 65535")),
    }
}

fn parse_bool(setting: Setting, value: &str) -> Result<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(invalid(setting, value, "expected true or false")),
    }
}

fn parse_map(setting: Setting, value: &str) -> Result<Vec<(String, String)>> {
    value
        .split(',')
        .map(|entry| {
            let (key, value) = entry
                .split_once(':')
                .ok_or_else(|| invalid(setting, entry, "expected key:value"))?;
            setting.validate_map_entry(key, value)?;
            Ok((key.to_string(), value.to_string()))
        })
        .collect()
}

fn read_map<V: Display>(map: &BTreeMap<String, V>, key: Option<&str>) -> Option<String> {
    match key {
        Some(key) => map.get(key).map(ToString::to_string),
        None if map.is_empty() => None,
        None => Some(
            map.iter()
                .map(|(k, v)| format!("{k}:{v}"))
                .collect::<Vec<_>>()
                .join(","),
        ),
    }
}

fn write_map<V>(
    setting: Setting,
    map: &mut BTreeMap<String, V>,
    key: Option<&str>,
    value: Option<&str>,
    parse: impl Fn(&str) -> Result<V>,
) -> Result<()> {
    match (key, value) {
        (None, None | Some("")) => map.clear(),
        (Some(key), None | Some("")) => {
            map.remove(key);
        }
        (None, Some(value)) => {
            let entries = parse_map(setting, value)?
                .into_iter()
                .map(|(k, v)| parse(&v).map(|v| (k, v)))
                .collect::<Result<BTreeMap<_, _>>>()?;
            *map = entries;
        }
        (Some(key), Some(value)) => {
            map.insert(key.to_string(), parse(value)?);
        }
    }
    Ok(())
}
