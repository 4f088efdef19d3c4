use async_trait::async_trait;
use dynconf_model::{
    Cluster, ClusterState, ClusterValidator, Configuration, HostPort, Operation, Requirement,
};
use dynconf_node::{NodeClient, NodeProbe};
use dynconf_nomad::NomadChange;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::tool::{ConfigTool, Executable, Validatable};
use crate::topology::{ensure_online, replace_topology};

/// Reads settings from the cluster a node belongs to.
#[derive(Clone, Debug)]
pub struct GetCommand {
    node: HostPort,
    configurations: Vec<Configuration>,
    runtime: bool,
}

impl GetCommand {
    /// Reads the upcoming configuration, the one nodes run after their next restart.
    #[must_use]
    pub const fn new(node: HostPort, configurations: Vec<Configuration>) -> Self {
        Self {
            node,
            configurations,
            runtime: false,
        }
    }

    /// Reads the configuration nodes currently run with instead.
    #[must_use]
    pub const fn runtime(mut self) -> Self {
        self.runtime = true;
        self
    }
}

impl Validatable for GetCommand {
    fn validate(&self) -> Result<()> {
        if self.configurations.is_empty() {
            return Err(Error::Validation("no setting to read".to_string()));
        }
        if let Some(configuration) = self.configurations.iter().find(|c| c.value().is_some()) {
            return Err(Error::Validation(format!(
                "get does not accept a value: {configuration}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl<C> Executable<C> for GetCommand
where
    C: NodeClient,
{
    type Output = Vec<Configuration>;

    async fn execute(&self, tool: &ConfigTool<C>) -> Result<Self::Output> {
        let (upcoming, activated) = tool.upcoming(&self.node).await?;
        let cluster = if self.runtime {
            tool.request(&self.node, tool.client().runtime_cluster(&self.node))
                .await?
        } else {
            upcoming
        };

        let mut values = Vec::new();
        for configuration in &self.configurations {
            let resolved = configuration.resolve(&cluster)?;
            resolved.validate(Operation::Get, cluster_state(activated))?;
            values.extend(resolved.read(&cluster)?);
        }
        Ok(values)
    }
}

/// Sets or unsets settings across the cluster a node belongs to.
#[derive(Clone, Debug)]
pub struct SetCommand {
    node: HostPort,
    operation: Operation,
    configurations: Vec<Configuration>,
}

impl SetCommand {
    /// Sets every configuration to its value.
    #[must_use]
    pub const fn set(node: HostPort, configurations: Vec<Configuration>) -> Self {
        Self {
            node,
            operation: Operation::Set,
            configurations,
        }
    }

    /// Resets every configuration.
    #[must_use]
    pub const fn unset(node: HostPort, configurations: Vec<Configuration>) -> Self {
        Self {
            node,
            operation: Operation::Unset,
            configurations,
        }
    }
}

/// Result of a [`SetCommand`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SetOutcome {
    /// Version of the committed change, absent when the cluster is not activated yet.
    pub version: Option<u64>,
    /// Whether nodes must restart for the change to take effect.
    pub restart_required: bool,
}

impl Validatable for SetCommand {
    fn validate(&self) -> Result<()> {
        if self.configurations.is_empty() {
            return Err(Error::Validation(format!("no setting to {}", self.operation)));
        }
        for configuration in &self.configurations {
            match (self.operation, configuration.value()) {
                (Operation::Set, None) => {
                    return Err(Error::Validation(format!(
                        "set requires a value: {configuration}"
                    )));
                }
                (Operation::Unset, Some(_)) => {
                    return Err(Error::Validation(format!(
                        "unset does not accept a value: {configuration}"
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<C> Executable<C> for SetCommand
where
    C: NodeClient,
{
    type Output = SetOutcome;

    async fn execute(&self, tool: &ConfigTool<C>) -> Result<Self::Output> {
        let (cluster, activated) = tool.upcoming(&self.node).await?;
        let resolved = self.resolve(&cluster, activated)?;

        let mut candidate = cluster.clone();
        for configuration in &resolved {
            configuration.apply(&mut candidate)?;
        }
        ClusterValidator::new(&candidate).validate()?;

        if !activated {
            replace_topology(tool, &cluster.addresses(), &candidate).await?;
            return Ok(SetOutcome {
                version: None,
                restart_required: false,
            });
        }

        let requires = |requirement| {
            resolved
                .iter()
                .any(|configuration| configuration.setting().requires(requirement))
        };
        let restart_required = requires(Requirement::NodeRestart);
        let targets = ensure_online(tool, &cluster, requires(Requirement::AllNodesOnline)).await?;

        let outcome = tool
            .coordinator()
            .run_change(&targets, NomadChange::SettingBatch(resolved))
            .await?;

        if restart_required {
            warn!(
                "a restart of the cluster is required for the new configuration to take effect"
            );
        }
        info!(version = outcome.version, "configuration changed");

        Ok(SetOutcome {
            version: Some(outcome.version),
            restart_required,
        })
    }
}

impl SetCommand {
    fn resolve(&self, cluster: &Cluster, activated: bool) -> Result<Vec<Configuration>> {
        self.configurations
            .iter()
            .map(|configuration| {
                let resolved = configuration.resolve(cluster)?;
                resolved.validate(self.operation, cluster_state(activated))?;
                Ok(resolved)
            })
            .collect()
    }
}

const fn cluster_state(activated: bool) -> ClusterState {
    if activated {
        ClusterState::Activated
    } else {
        ClusterState::Configuring
    }
}
