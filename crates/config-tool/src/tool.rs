use std::future::Future;

use async_trait::async_trait;
use dynconf_coordinator::{ChangeCoordinator, ProtocolPhase, RepairEngine};
use dynconf_model::{Cluster, HostPort};
use dynconf_node::{NodeClient, NodeProbe};
use tracing::{debug, error, info};

use crate::config::ToolConfig;
use crate::error::Result;
use crate::restart::RestartService;

/// Line printed when a command succeeds.
pub const SUCCESS: &str = "Command successful!";

/// Checks that can run before any node is contacted.
pub trait Validatable {
    /// Checks the command is well formed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Validation`] describing the problem.
    fn validate(&self) -> Result<()>;
}

/// A command run against a cluster.
#[async_trait]
pub trait Executable<C>
where
    Self: Validatable + Send + Sync,
    C: NodeClient,
{
    /// What the command reports on success.
    type Output: Send;

    /// Runs the command.
    async fn execute(&self, tool: &ConfigTool<C>) -> Result<Self::Output>;
}

/// Everything commands need to reach and change a cluster.
#[derive(Clone, Debug)]
pub struct ConfigTool<C>
where
    C: NodeClient,
{
    config: ToolConfig,
    coordinator: ChangeCoordinator<C>,
    repair: RepairEngine<C>,
    restart: RestartService<C>,
}

impl<C> ConfigTool<C>
where
    C: NodeClient,
{
    /// Creates a tool talking to nodes through `client`.
    pub fn new(client: C, config: ToolConfig) -> Self {
        let coordinator = ChangeCoordinator::new(client, config.coordinator.clone());
        let repair = RepairEngine::new(coordinator.clone(), config.restart_delay);
        let restart = RestartService::new(coordinator.clone(), &config);

        Self {
            config,
            coordinator,
            repair,
            restart,
        }
    }

    /// The settings.
    pub const fn config(&self) -> &ToolConfig {
        &self.config
    }

    /// The node client.
    pub const fn client(&self) -> &C {
        self.coordinator.client()
    }

    /// The change coordinator.
    pub const fn coordinator(&self) -> &ChangeCoordinator<C> {
        &self.coordinator
    }

    /// The repair engine.
    pub const fn repair_engine(&self) -> &RepairEngine<C> {
        &self.repair
    }

    /// The restart service.
    pub const fn restart_service(&self) -> &RestartService<C> {
        &self.restart
    }

    /// Validates then executes `command`.
    ///
    /// # Errors
    ///
    /// Returns the validation or execution error of the command.
    pub async fn run<E>(&self, command: &E) -> Result<E::Output>
    where
        E: Executable<C>,
    {
        command.validate()?;
        let result = command.execute(self).await;
        match &result {
            Ok(_) => info!("command successful"),
            Err(e) => error!("command failed: {e}"),
        }
        result
    }

    /// Sends one request outside the change protocol.
    pub(crate) async fn request<T, F>(&self, node: &HostPort, request: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, C::Error>>,
    {
        Ok(self
            .coordinator
            .call(node, ProtocolPhase::Maintenance, request)
            .await?)
    }

    /// Topology the node will run with, and whether it is activated.
    pub(crate) async fn upcoming(&self, node: &HostPort) -> Result<(Cluster, bool)> {
        let client = self.client();
        let cluster = self.request(node, client.upcoming_cluster(node)).await?;
        let activated = self.request(node, client.is_activated(node)).await?;
        debug!(node = %node, activated, nodes = cluster.node_count(), "fetched topology");
        Ok((cluster, activated))
    }
}

/// The line printed at the end of a command.
pub fn status_line<T>(result: &Result<T>) -> String {
    match result {
        Ok(_) => SUCCESS.to_string(),
        Err(e) => format!("Error: {e}"),
    }
}
