use async_trait::async_trait;
use dynconf_model::{Cluster, HostPort};
use dynconf_node::{NodeClient, NodeProbe};
use dynconf_nomad::NomadChange;
use tracing::{info, warn};

use super::{TopologyKind, TopologyOutcome};
use crate::error::{Error, Result};
use crate::restart::ONLINE_ROLES;
use crate::tool::{ConfigTool, Executable, Validatable};
use crate::topology::{ensure_no_pending_restart, ensure_online, join, replace_topology};

/// Attaches a node to the stripe of a destination node, or a stripe to the cluster of a
/// destination node.
///
/// Nodes joining an activated cluster receive its change history and are restarted.
#[derive(Clone, Debug)]
pub struct AttachCommand {
    destination: HostPort,
    source: HostPort,
    kind: TopologyKind,
    force: bool,
}

impl AttachCommand {
    /// Attaches the `source` node to the stripe of `destination`.
    #[must_use]
    pub const fn node(destination: HostPort, source: HostPort) -> Self {
        Self {
            destination,
            source,
            kind: TopologyKind::Node,
            force: false,
        }
    }

    /// Attaches the stripe of `source` to the cluster of `destination`.
    #[must_use]
    pub const fn stripe(destination: HostPort, source: HostPort) -> Self {
        Self {
            destination,
            source,
            kind: TopologyKind::Stripe,
            force: false,
        }
    }

    /// Attaches even when the source already belongs to a larger cluster.
    #[must_use]
    pub const fn force(mut self) -> Self {
        self.force = true;
        self
    }

    fn change(&self, destination: &Cluster, source: &Cluster) -> Result<(NomadChange, Vec<HostPort>)> {
        match self.kind {
            TopologyKind::Node => {
                if source.node_count() > 1 {
                    self.refuse_or_warn(format!(
                        "source node {} is part of a cluster with {} nodes; detach it first",
                        self.source,
                        source.node_count()
                    ))?;
                }
                let node = source.node_by_address(&self.source).cloned().ok_or_else(|| {
                    Error::Validation(format!("node {} does not know itself", self.source))
                })?;
                let stripe = destination.stripe_of(&self.destination).ok_or_else(|| {
                    Error::Validation(format!("node {} does not know its stripe", self.destination))
                })?;
                Ok((
                    NomadChange::NodeAddition {
                        stripe_uid: stripe.uid.clone(),
                        node,
                    },
                    vec![self.source.clone()],
                ))
            }
            TopologyKind::Stripe => {
                if source.stripes.len() > 1 {
                    self.refuse_or_warn(format!(
                        "source stripe of {} is part of a cluster with {} stripes; detach it first",
                        self.source,
                        source.stripes.len()
                    ))?;
                }
                let stripe = source.stripe_of(&self.source).cloned().ok_or_else(|| {
                    Error::Validation(format!("node {} does not know its stripe", self.source))
                })?;
                let joining = stripe.addresses();
                Ok((NomadChange::StripeAddition(stripe), joining))
            }
        }
    }

    fn refuse_or_warn(&self, message: String) -> Result<()> {
        if self.force {
            warn!("{message}; attaching anyway");
            Ok(())
        } else {
            Err(Error::Validation(message))
        }
    }
}

impl Validatable for AttachCommand {
    fn validate(&self) -> Result<()> {
        if self.destination == self.source {
            return Err(Error::Validation(
                "the source and destination must be different nodes".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl<C> Executable<C> for AttachCommand
where
    C: NodeClient,
{
    type Output = TopologyOutcome;

    async fn execute(&self, tool: &ConfigTool<C>) -> Result<Self::Output> {
        let (destination, activated) = tool.upcoming(&self.destination).await?;
        if destination.contains(&self.source) {
            return Err(Error::Validation(format!(
                "{} is already part of the cluster of {}",
                self.source, self.destination
            )));
        }

        let (source, source_activated) = tool.upcoming(&self.source).await?;
        if source_activated {
            return Err(Error::Validation(format!(
                "{} belongs to an activated cluster and cannot be attached elsewhere",
                self.source
            )));
        }

        let (change, joining) = self.change(&destination, &source)?;
        let candidate = change.apply(Some(&destination)).map_err(Error::Validation)?;
        info!(kind = %self.kind, "{}", change.summary());

        if !activated {
            let mut nodes = destination.addresses();
            nodes.extend(joining);
            replace_topology(tool, &nodes, &candidate).await?;
            return Ok(TopologyOutcome {
                cluster: candidate,
                version: None,
                restarted: Vec::new(),
            });
        }

        let targets = ensure_online(tool, &destination, false).await?;
        ensure_no_pending_restart(tool, &targets).await?;
        for node in &joining {
            tool.request(node, tool.client().logical_state(node)).await?;
        }

        let outcome = tool.coordinator().run_change(&targets, change).await?;

        let history = tool
            .request(&self.destination, tool.client().change_history(&self.destination))
            .await?;
        for node in &joining {
            tool.request(node, tool.client().reset_and_sync(node, history.clone()))
                .await?;
        }
        info!("restarting joining nodes: {}", join(joining.iter()));
        tool.restart_service().restart(&joining, ONLINE_ROLES).await?;

        Ok(TopologyOutcome {
            cluster: candidate,
            version: Some(outcome.version),
            restarted: joining,
        })
    }
}
