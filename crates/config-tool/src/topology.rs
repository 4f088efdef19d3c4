//! Checks and topology updates shared by the commands.

use dynconf_model::{Cluster, ClusterValidator, HostPort};
use dynconf_node::{NodeClient, NodeProbe};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::tool::ConfigTool;

/// Checks the nodes of an activated cluster can take a change and returns the reachable ones.
///
/// With `all_online`, every node must be reachable. Otherwise the active of every stripe must
/// be. Reachable nodes must all be active or passive.
pub(crate) async fn ensure_online<C>(
    tool: &ConfigTool<C>,
    cluster: &Cluster,
    all_online: bool,
) -> Result<Vec<HostPort>>
where
    C: NodeClient,
{
    let states = tool.coordinator().logical_states(&cluster.addresses()).await;
    let (online, offline): (Vec<_>, Vec<_>) =
        states.iter().partition(|(_, state)| state.is_reachable());

    if !offline.is_empty() {
        let offline = join(offline.iter().map(|(node, _)| node));
        if all_online {
            return Err(Error::Validation(format!(
                "this operation requires all nodes to be online; unreachable: {offline}"
            )));
        }
        warn!("some nodes are unreachable and will not be updated: {offline}");
    }

    for stripe in &cluster.stripes {
        let has_active = online
            .iter()
            .any(|(node, state)| state.is_active() && stripe.contains(node));
        if !has_active {
            return Err(Error::Validation(format!(
                "stripe {} has no online active node",
                stripe.name
            )));
        }
    }

    if let Some((node, state)) = online.iter().find(|(_, state)| !state.allows_change()) {
        return Err(Error::Validation(format!(
            "node {node} is {state}; wait for it to become active or passive before changing the configuration"
        )));
    }

    Ok(online.into_iter().map(|(node, _)| node.clone()).collect())
}

/// Refuses to go on while any of `nodes` waits for a restart to apply a previous change.
pub(crate) async fn ensure_no_pending_restart<C>(
    tool: &ConfigTool<C>,
    nodes: &[HostPort],
) -> Result<()>
where
    C: NodeClient,
{
    let mut pending = Vec::new();
    for node in nodes {
        if tool
            .request(node, tool.client().must_be_restarted(node))
            .await?
        {
            pending.push(node);
        }
    }

    if pending.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "nodes {} must be restarted for a previous change to take effect",
            join(pending.into_iter())
        )))
    }
}

/// Validates `cluster` and installs it as the upcoming topology of every node of `nodes`.
/// The nodes must not be activated.
pub(crate) async fn replace_topology<C>(
    tool: &ConfigTool<C>,
    nodes: &[HostPort],
    cluster: &Cluster,
) -> Result<()>
where
    C: NodeClient,
{
    ClusterValidator::new(cluster).validate()?;

    for node in nodes {
        tool.request(node, tool.client().set_upcoming_cluster(node, cluster.clone()))
            .await?;
    }

    info!(nodes = nodes.len(), "topology updated");
    Ok(())
}

pub(crate) fn join<'a>(nodes: impl Iterator<Item = &'a HostPort>) -> String {
    nodes.map(ToString::to_string).collect::<Vec<_>>().join(", ")
}
