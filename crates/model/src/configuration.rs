//! Parsed setting mutations.
//!
//! Accepted forms, where `[.key]` addresses one entry of a map setting and `=value` is
//! omitted for get and unset:
//!
//! - `stripe.<i>.node.<j>.<setting>[.key][=value]`: one node, by position
//! - `stripe.<i>.<setting>[.key][=value]`: one stripe, by position
//! - `<name>:<setting>[.key][=value]`: one stripe or node, by name
//! - `<setting>[.key][=value]`: the whole cluster
//!
//! Positions are 1-based.

use std::fmt::{self, Display};
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cluster::{Cluster, NodeLocation};
use crate::error::{Error, Result};
use crate::setting::{ClusterState, Setting};
use crate::stripe::Stripe;

/// Level of the topology a configuration applies to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// The whole cluster.
    Cluster,

    /// One stripe.
    Stripe,

    /// One node.
    Node,
}

impl Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cluster => "cluster",
            Self::Stripe => "stripe",
            Self::Node => "node",
        })
    }
}

/// What an operator does with a configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Read a setting.
    Get,

    /// Write a setting.
    Set,

    /// Reset a setting.
    Unset,

    /// Load a setting from a configuration file.
    Import,
}

impl Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Get => "get",
            Self::Set => "set",
            Self::Unset => "unset",
            Self::Import => "import",
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
enum Target {
    Cluster,
    Stripe(usize),
    Node(usize, usize),
    Named(String),
}

/// A parsed, immutable setting mutation or query. Two configurations are equal when their
/// canonical strings are equal.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Configuration {
    canonical: String,
    target: Target,
    setting: Setting,
    key: Option<String>,
    value: Option<String>,
}

impl Configuration {
    fn new(target: Target, setting: Setting, key: Option<String>, value: Option<String>) -> Self {
        let mut canonical = match &target {
            Target::Cluster => String::new(),
            Target::Stripe(stripe) => format!("stripe.{stripe}."),
            Target::Node(stripe, node) => format!("stripe.{stripe}.node.{node}."),
            Target::Named(name) => format!("{name}:"),
        };
        canonical.push_str(setting.name());
        if let Some(key) = &key {
            canonical.push('.');
            canonical.push_str(key);
        }
        if let Some(value) = &value {
            canonical.push('=');
            canonical.push_str(value);
        }

        Self {
            canonical,
            target,
            setting,
            key,
            value,
        }
    }

    /// The setting addressed.
    #[must_use]
    pub const fn setting(&self) -> Setting {
        self.setting
    }

    /// The map key, if any.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// The value, absent for get and unset.
    #[must_use]
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// Level the configuration applies to. Name forms report the node level until resolved.
    #[must_use]
    pub const fn scope(&self) -> Scope {
        match self.target {
            Target::Cluster => Scope::Cluster,
            Target::Stripe(_) => Scope::Stripe,
            Target::Node(..) | Target::Named(_) => Scope::Node,
        }
    }

    /// The stripe position (1-based) for stripe and node scoped configurations.
    #[must_use]
    pub const fn stripe_index(&self) -> Option<usize> {
        match self.target {
            Target::Stripe(stripe) | Target::Node(stripe, _) => Some(stripe),
            _ => None,
        }
    }

    /// The node position (1-based) inside its stripe for node scoped configurations.
    #[must_use]
    pub const fn node_index(&self) -> Option<usize> {
        match self.target {
            Target::Node(_, node) => Some(node),
            _ => None,
        }
    }

    /// Checks the configuration is legal for `operation` while the cluster is in phase `when`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalOperation`] when the operation or scope is not permitted, or
    /// [`Error::InvalidValue`] when the key or value is malformed.
    pub fn validate(&self, operation: Operation, when: ClusterState) -> Result<()> {
        match (operation, &self.value) {
            (Operation::Set | Operation::Import, None) => {
                return Err(self.illegal(format!("{operation} requires a value")));
            }
            (Operation::Get | Operation::Unset, Some(_)) => {
                return Err(self.illegal(format!("{operation} does not accept a value")));
            }
            _ => {}
        }

        if !self.setting.allows(when, operation, self.scope()) {
            let phase = match when {
                ClusterState::Configuring => "a cluster being configured",
                ClusterState::Activated => "an activated cluster",
            };
            return Err(self.illegal(format!(
                "{operation} is not supported at {} level on {phase}",
                self.scope()
            )));
        }

        self.setting.validate(self.key(), self.value())
    }

    /// Turns a name form into the equivalent index form using the topology of `cluster`,
    /// and checks positions exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the name or position matches nothing in `cluster`.
    pub fn resolve(&self, cluster: &Cluster) -> Result<Self> {
        let target = match &self.target {
            Target::Named(name) => {
                if let Some(position) = cluster.stripes.iter().position(|s| &s.name == name) {
                    Target::Stripe(position + 1)
                } else {
                    cluster
                        .stripes
                        .iter()
                        .enumerate()
                        .find_map(|(stripe, s)| {
                            s.nodes
                                .iter()
                                .position(|n| &n.name == name)
                                .map(|node| Target::Node(stripe + 1, node + 1))
                        })
                        .ok_or_else(|| Error::NotFound(format!("no stripe or node named '{name}'")))?
                }
            }
            Target::Stripe(stripe) => {
                if *stripe == 0 || *stripe > cluster.stripes.len() {
                    return Err(Error::NotFound(format!("stripe {stripe} does not exist")));
                }
                Target::Stripe(*stripe)
            }
            Target::Node(stripe, node) => {
                let location = NodeLocation {
                    stripe: stripe.wrapping_sub(1),
                    node: node.wrapping_sub(1),
                };
                if cluster.node_at(location).is_none() {
                    return Err(Error::NotFound(format!(
                        "node {node} of stripe {stripe} does not exist"
                    )));
                }
                Target::Node(*stripe, *node)
            }
            Target::Cluster => Target::Cluster,
        };

        Ok(Self::new(target, self.setting, self.key.clone(), self.value.clone()))
    }

    /// Applies the configuration to `cluster`: a value sets the setting, no value unsets it.
    /// Cluster and stripe scoped configurations of node settings apply to every node in
    /// scope.
    ///
    /// # Errors
    ///
    /// Returns an error if the target does not exist or the value cannot be written.
    pub fn apply(&self, cluster: &mut Cluster) -> Result<()> {
        let resolved = self.resolve(cluster)?;
        let (key, value) = (self.key(), self.value());

        match self.setting.level() {
            Scope::Cluster => self.setting.write_cluster(cluster, key, value),
            Scope::Stripe => {
                for stripe in resolved.stripes_mut(cluster) {
                    self.setting.write_stripe(stripe, value)?;
                }
                Ok(())
            }
            Scope::Node => {
                for (stripe_index, stripe) in cluster.stripes.iter_mut().enumerate() {
                    for (node_index, node) in stripe.nodes.iter_mut().enumerate() {
                        if resolved.covers(stripe_index, node_index) {
                            self.setting.write_node(node, key, value)?;
                        }
                    }
                }
                Ok(())
            }
        }
    }

    /// Reads the setting from `cluster`, returning one configuration per node, stripe or
    /// map entry in scope, each carrying the current value. Unset values are omitted.
    ///
    /// # Errors
    ///
    /// Returns an error if the target does not exist.
    pub fn read(&self, cluster: &Cluster) -> Result<Vec<Self>> {
        let resolved = self.resolve(cluster)?;
        let mut results = Vec::new();

        match self.setting.level() {
            Scope::Cluster => {
                self.collect(&mut results, Target::Cluster, |key| {
                    self.setting.read_cluster(cluster, key)
                });
            }
            Scope::Stripe => {
                for (index, stripe) in cluster.stripes.iter().enumerate() {
                    if resolved.stripe_index().is_none_or(|s| s == index + 1) {
                        self.collect(&mut results, Target::Stripe(index + 1), |_| {
                            self.setting.read_stripe(stripe)
                        });
                    }
                }
            }
            Scope::Node => {
                for (stripe_index, stripe) in cluster.stripes.iter().enumerate() {
                    for (node_index, node) in stripe.nodes.iter().enumerate() {
                        if resolved.covers(stripe_index, node_index) {
                            self.collect(
                                &mut results,
                                Target::Node(stripe_index + 1, node_index + 1),
                                |key| self.setting.read_node(node, key),
                            );
                        }
                    }
                }
            }
        }

        Ok(results)
    }

    fn collect(&self, results: &mut Vec<Self>, target: Target, read: impl Fn(Option<&str>) -> Option<String>) {
        if self.setting.is_map() && self.key.is_none() {
            if let Some(entries) = read(None) {
                for entry in entries.split(',') {
                    if let Some((key, value)) = entry.split_once(':') {
                        results.push(Self::new(
                            target.clone(),
                            self.setting,
                            Some(key.to_string()),
                            Some(value.to_string()),
                        ));
                    }
                }
            }
        } else if let Some(value) = read(self.key()) {
            results.push(Self::new(target, self.setting, self.key.clone(), Some(value)));
        }
    }

    fn covers(&self, stripe_index: usize, node_index: usize) -> bool {
        match self.target {
            Target::Cluster => true,
            Target::Stripe(stripe) => stripe == stripe_index + 1,
            Target::Node(stripe, node) => stripe == stripe_index + 1 && node == node_index + 1,
            Target::Named(_) => false,
        }
    }

    fn stripes_mut<'a>(&self, cluster: &'a mut Cluster) -> Vec<&'a mut Stripe> {
        cluster
            .stripes
            .iter_mut()
            .enumerate()
            .filter(|(index, _)| self.stripe_index().is_none_or(|s| s == index + 1))
            .map(|(_, stripe)| stripe)
            .collect()
    }

    fn illegal(&self, reason: String) -> Error {
        Error::IllegalOperation {
            setting: self.canonical.clone(),
            reason,
        }
    }
}

impl PartialEq for Configuration {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for Configuration {}

impl Hash for Configuration {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl FromStr for Configuration {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidConfiguration {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let (left, value) = match input.split_once('=') {
            Some((left, value)) => (left.trim(), Some(value.trim().to_string())),
            None => (input.trim(), None),
        };
        if left.is_empty() {
            return Err(invalid("missing setting name"));
        }

        let (target, rest) = if let Some((name, rest)) = left.split_once(':') {
            if name.is_empty() {
                return Err(invalid("missing stripe or node name before ':'"));
            }
            (Target::Named(name.to_string()), rest)
        } else if let Some(rest) = left.strip_prefix("stripe.") {
            let (stripe, rest) = rest
                .split_once('.')
                .ok_or_else(|| invalid("expected stripe.<index>.<setting>"))?;
            let stripe = parse_index(stripe).ok_or_else(|| invalid("stripe index must be a number >= 1"))?;
            match rest.strip_prefix("node.") {
                Some(rest) => {
                    let (node, rest) = rest
                        .split_once('.')
                        .ok_or_else(|| invalid("expected stripe.<index>.node.<index>.<setting>"))?;
                    let node = parse_index(node).ok_or_else(|| invalid("node index must be a number >= 1"))?;
                    (Target::Node(stripe, node), rest)
                }
                None => (Target::Stripe(stripe), rest),
            }
        } else {
            (Target::Cluster, left)
        };

        let (setting, key) = match rest.split_once('.') {
            Some((setting, key)) => (setting, Some(key.to_string())),
            None => (rest, None),
        };
        let setting: Setting = setting.parse()?;

        if key.as_deref() == Some("") {
            return Err(invalid("empty map key"));
        }
        if key.is_some() && !setting.is_map() {
            return Err(invalid(&format!("setting {setting} does not accept a key")));
        }

        Ok(Self::new(target, setting, key, value))
    }
}

fn parse_index(s: &str) -> Option<usize> {
    s.parse::<usize>().ok().filter(|index| *index >= 1)
}
