use std::time::Duration;

use dynconf_coordinator::{ChangeCoordinator, ProtocolFailure, ProtocolPhase};
use dynconf_model::{HostPort, LogicalServerState};
use dynconf_node::NodeClient;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ToolConfig;
use crate::error::{Error, Result};

/// End states of a node restarted into an activated cluster.
pub const ONLINE_ROLES: &[LogicalServerState] =
    &[LogicalServerState::Active, LogicalServerState::Passive];

/// End state of a node restarted standalone.
pub const DIAGNOSTIC: &[LogicalServerState] = &[LogicalServerState::Diagnostic];

/// Restarts nodes and waits for them to come back.
#[derive(Clone, Debug)]
pub struct RestartService<C>
where
    C: NodeClient,
{
    coordinator: ChangeCoordinator<C>,
    delay: Duration,
    wait_time: Duration,
    poll_interval: Duration,
}

impl<C> RestartService<C>
where
    C: NodeClient,
{
    /// Creates a service restarting nodes through `coordinator`'s client.
    pub fn new(coordinator: ChangeCoordinator<C>, config: &ToolConfig) -> Self {
        Self {
            coordinator,
            delay: config.restart_delay,
            wait_time: config.restart_wait_time,
            poll_interval: config.restart_poll_interval,
        }
    }

    /// Restarts `nodes` and waits until each reports one of the `accepted` states.
    ///
    /// # Errors
    ///
    /// Returns [`dynconf_coordinator::Error::RestartTimeout`] listing the nodes still not back
    /// once the wait time elapsed, or every node that refused to restart. The other nodes are
    /// restarted and waited for either way.
    pub async fn restart(
        &self,
        nodes: &[HostPort],
        accepted: &[LogicalServerState],
    ) -> Result<Vec<(HostPort, LogicalServerState)>> {
        if nodes.is_empty() {
            return Ok(Vec::new());
        }

        info!(nodes = nodes.len(), delay = ?self.delay, "restarting nodes");
        let mut restarted = Vec::with_capacity(nodes.len());
        let mut failures = Vec::new();
        for node in nodes {
            match self
                .coordinator
                .call(
                    node,
                    ProtocolPhase::Maintenance,
                    self.coordinator.client().restart(node, self.delay),
                )
                .await
            {
                Ok(()) => restarted.push(node.clone()),
                Err(failure) => {
                    warn!(node = %node, %failure, "node did not accept the restart");
                    failures.push(failure);
                }
            }
        }

        let reached = self.wait_for(&restarted, accepted).await?;
        match ProtocolFailure::from_failures(failures) {
            Some(failure) => Err(Error::Coordinator(
                dynconf_coordinator::Error::Protocol(failure),
            )),
            None => Ok(reached),
        }
    }

    /// Polls `nodes` until each reports one of the `accepted` states.
    ///
    /// # Errors
    ///
    /// Returns [`dynconf_coordinator::Error::RestartTimeout`] when the wait time elapses.
    pub async fn wait_for(
        &self,
        nodes: &[HostPort],
        accepted: &[LogicalServerState],
    ) -> Result<Vec<(HostPort, LogicalServerState)>> {
        let deadline = Instant::now() + self.wait_time;
        let mut pending = nodes.to_vec();
        let mut reached = Vec::with_capacity(nodes.len());

        loop {
            let states = self.coordinator.logical_states(&pending).await;
            pending.clear();
            for (node, state) in states {
                if accepted.contains(&state) {
                    info!(node = %node, %state, "node is back");
                    reached.push((node, state));
                } else {
                    debug!(node = %node, %state, "waiting for node");
                    pending.push(node);
                }
            }

            if pending.is_empty() {
                return Ok(reached);
            }
            if Instant::now() >= deadline {
                warn!(nodes = pending.len(), "nodes did not come back in time");
                return Err(Error::Coordinator(
                    dynconf_coordinator::Error::RestartTimeout {
                        nodes: pending,
                        seconds: self.wait_time.as_secs(),
                    },
                ));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
