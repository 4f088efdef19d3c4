use std::collections::{HashMap, HashSet};
use std::fmt::{self, Display};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dynconf_model::{Cluster, HostPort, LogicalServerState, Node};
use dynconf_node::{NodeClient, NodeProbe};
use dynconf_nomad::{
    AcceptRejectResponse, ChangeRecord, CommitMessage, DiscoverResponse, MutationInfo,
    NomadChange, NomadServer, PrepareMessage, RollbackMessage,
};
use parking_lot::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::change_log::MemoryChangeLog;
use crate::error::Error;

type Server = NomadServer<MemoryChangeLog>;

const BOOTSTRAP_HOST: &str = "localhost";
const BOOTSTRAP_USER: &str = "bootstrap";

/// Protocol phase a fault applies to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Phase {
    /// Prepare requests.
    Prepare,

    /// Commit requests.
    Commit,

    /// Rollback requests.
    Rollback,
}

impl Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prepare => write!(f, "prepare"),
            Self::Commit => write!(f, "commit"),
            Self::Rollback => write!(f, "rollback"),
        }
    }
}

/// Failure injected into a node.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Fault {
    /// The request fails before the acceptor sees it.
    Refuse(Phase),

    /// The acceptor handles the request but the response is lost.
    LoseResponse(Phase),
}

/// Mutating request received by a node, in arrival order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Call {
    /// Prepare of a change.
    Prepare(Uuid),
    /// Commit of a change.
    Commit(Uuid),
    /// Rollback of a change.
    Rollback(Uuid),
    /// Forced lock release.
    ForceUnlock,
    /// Reset.
    Reset,
    /// Log replacement.
    ResetAndSync,
    /// Restart.
    Restart,
    /// Stop.
    Stop,
    /// Upcoming topology replacement.
    SetUpcomingCluster,
}

#[derive(Debug)]
struct MemoryNode {
    server: Arc<Server>,
    log: MemoryChangeLog,
    state: LogicalServerState,
    online: bool,
    upcoming: Cluster,
    runtime: Cluster,
    must_restart: bool,
    faults: HashSet<Fault>,
    generation: u64,
}

/// A set of in-memory nodes reachable by address. Clones share the same nodes.
#[derive(Clone, Debug, Default)]
pub struct MemoryNetwork {
    nodes: Arc<RwLock<HashMap<HostPort, MemoryNode>>>,
    calls: Arc<RwLock<Vec<(HostPort, Call)>>>,
}

impl MemoryNetwork {
    /// Creates an empty network.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts `node` as a standalone, unconfigured single-node cluster.
    ///
    /// # Errors
    ///
    /// Returns an error if the node's acceptor cannot start.
    pub async fn add_node(&self, node: Node) -> Result<HostPort, Error> {
        let address = node.address();
        let log = MemoryChangeLog::new();
        let server = Self::start_server(&address, log.clone()).await?;
        let cluster = Cluster::single(node);

        self.nodes.write().insert(
            address.clone(),
            MemoryNode {
                server,
                log,
                state: LogicalServerState::Diagnostic,
                online: true,
                upcoming: cluster.clone(),
                runtime: cluster,
                must_restart: false,
                faults: HashSet::new(),
                generation: 0,
            },
        );

        debug!(node = %address, "started unconfigured node");
        Ok(address)
    }

    /// Starts every node of `cluster` already activated with it. The first node of every
    /// stripe is active, the others passive.
    ///
    /// # Errors
    ///
    /// Returns an error if an acceptor cannot start or refuses the activation.
    pub async fn add_activated_cluster(&self, cluster: &Cluster) -> Result<(), Error> {
        let change_uuid = Uuid::new_v4();

        for stripe in &cluster.stripes {
            for (index, node) in stripe.nodes.iter().enumerate() {
                let address = node.address();
                let log = MemoryChangeLog::new();
                let server = Self::start_server(&address, log.clone()).await?;

                let prepared = server
                    .prepare(PrepareMessage {
                        mutation: Self::bootstrap_mutation(0),
                        change_uuid,
                        version: 1,
                        change: NomadChange::ClusterActivation(cluster.clone()),
                        lock_token: None,
                    })
                    .await
                    .map_err(|e| Self::acceptor_error(&address, &e))?;
                let committed = server
                    .commit(CommitMessage {
                        mutation: Self::bootstrap_mutation(1),
                        change_uuid,
                    })
                    .await
                    .map_err(|e| Self::acceptor_error(&address, &e))?;
                if !prepared.is_accepted() || !committed.is_accepted() {
                    return Err(Error::Rejected {
                        node: address,
                        reason: "cluster activation refused".to_string(),
                    });
                }

                let activated = server.current_cluster().await.unwrap_or_else(|| cluster.clone());
                let state = if index == 0 {
                    LogicalServerState::Active
                } else {
                    LogicalServerState::Passive
                };

                self.nodes.write().insert(
                    address,
                    MemoryNode {
                        server,
                        log,
                        state,
                        online: true,
                        upcoming: activated.clone(),
                        runtime: activated,
                        must_restart: false,
                        faults: HashSet::new(),
                        generation: 0,
                    },
                );
            }
        }

        info!(nodes = cluster.node_count(), "started activated cluster");
        Ok(())
    }

    /// Addresses of every node, sorted.
    #[must_use]
    pub fn addresses(&self) -> Vec<HostPort> {
        let mut addresses: Vec<HostPort> = self.nodes.read().keys().cloned().collect();
        addresses.sort();
        addresses
    }

    /// Cuts a node off the network, or brings it back.
    pub fn set_online(&self, node: &HostPort, online: bool) {
        if let Some(memory_node) = self.nodes.write().get_mut(node) {
            memory_node.online = online;
        }
    }

    /// Forces the logical state reported by a node.
    pub fn set_state(&self, node: &HostPort, state: LogicalServerState) {
        if let Some(memory_node) = self.nodes.write().get_mut(node) {
            memory_node.state = state;
        }
    }

    /// Injects a fault into a node.
    pub fn inject(&self, node: &HostPort, fault: Fault) {
        if let Some(memory_node) = self.nodes.write().get_mut(node) {
            memory_node.faults.insert(fault);
        }
    }

    /// Removes every fault injected into a node.
    pub fn clear_faults(&self, node: &HostPort) {
        if let Some(memory_node) = self.nodes.write().get_mut(node) {
            memory_node.faults.clear();
        }
    }

    /// Mutating requests received so far, in arrival order.
    #[must_use]
    pub fn calls(&self) -> Vec<(HostPort, Call)> {
        self.calls.read().clone()
    }

    /// Forgets the requests received so far.
    pub fn clear_calls(&self) {
        self.calls.write().clear();
    }

    /// The acceptor of a node.
    #[must_use]
    pub fn server(&self, node: &HostPort) -> Option<Arc<NomadServer<MemoryChangeLog>>> {
        self.nodes
            .read()
            .get(node)
            .map(|memory_node| memory_node.server.clone())
    }

    /// The change log of a node.
    #[must_use]
    pub fn change_log(&self, node: &HostPort) -> Option<MemoryChangeLog> {
        self.nodes
            .read()
            .get(node)
            .map(|memory_node| memory_node.log.clone())
    }

    async fn start_server(address: &HostPort, log: MemoryChangeLog) -> Result<Arc<Server>, Error> {
        NomadServer::new(log)
            .await
            .map(Arc::new)
            .map_err(|e| Self::acceptor_error(address, &e))
    }

    fn bootstrap_mutation(count: u64) -> MutationInfo {
        MutationInfo {
            expected_mutative_message_count: count,
            host: BOOTSTRAP_HOST.to_string(),
            user: BOOTSTRAP_USER.to_string(),
            timestamp: Utc::now(),
        }
    }

    fn acceptor_error(node: &HostPort, error: &impl Display) -> Error {
        Error::Acceptor {
            node: node.clone(),
            message: error.to_string(),
        }
    }

    fn record(&self, node: &HostPort, call: Call) {
        self.calls.write().push((node.clone(), call));
    }

    fn with_node<R>(
        &self,
        node: &HostPort,
        f: impl FnOnce(&mut MemoryNode) -> R,
    ) -> Result<R, Error> {
        let mut nodes = self.nodes.write();
        let memory_node = nodes
            .get_mut(node)
            .ok_or_else(|| Error::UnknownNode(node.clone()))?;
        if !memory_node.online {
            return Err(Error::Unreachable(node.clone()));
        }
        Ok(f(memory_node))
    }

    fn reachable(&self, node: &HostPort) -> Result<Arc<Server>, Error> {
        self.with_node(node, |memory_node| memory_node.server.clone())
    }

    fn check_fault(&self, node: &HostPort, fault: Fault) -> Result<(), Error> {
        let injected = self.with_node(node, |memory_node| memory_node.faults.contains(&fault))?;
        if injected {
            let phase = match fault {
                Fault::Refuse(phase) | Fault::LoseResponse(phase) => phase,
            };
            debug!(node = %node, %phase, "injected failure");
            return Err(Error::Injected {
                node: node.clone(),
                phase,
            });
        }
        Ok(())
    }

    async fn apply_committed(&self, node: &HostPort, server: &Server) -> Result<(), Error> {
        let Some(cluster) = server.current_cluster().await else {
            return Ok(());
        };
        let restart = server.latest_change().await.is_some_and(|record| {
            record.change.requires_restart()
                || matches!(record.change, NomadChange::ClusterActivation(_))
        });

        self.with_node(node, |memory_node| {
            if restart {
                memory_node.must_restart = true;
            } else {
                memory_node.runtime = cluster.clone();
            }
            memory_node.upcoming = cluster;
        })
    }

    async fn bring_up(&self, node: &HostPort, generation: u64) {
        let Some(server) = self.server(node) else {
            return;
        };
        let activated = server.current_cluster().await.is_some();

        let mut nodes = self.nodes.write();
        let Some(upcoming) = nodes
            .get(node)
            .filter(|memory_node| memory_node.generation == generation)
            .map(|memory_node| memory_node.upcoming.clone())
        else {
            return;
        };

        let state = if activated {
            let active_elsewhere = upcoming.stripe_of(node).is_some_and(|stripe| {
                stripe.addresses().iter().any(|peer| {
                    peer != node
                        && nodes.get(peer).is_some_and(|memory_node| {
                            memory_node.online && memory_node.state.is_active()
                        })
                })
            });
            if active_elsewhere {
                LogicalServerState::Passive
            } else {
                LogicalServerState::Active
            }
        } else {
            LogicalServerState::Diagnostic
        };

        if let Some(memory_node) = nodes.get_mut(node) {
            memory_node.runtime = upcoming;
            memory_node.must_restart = false;
            memory_node.online = true;
            memory_node.state = state;
        }

        info!(node = %node, %state, "node restarted");
    }
}

#[async_trait]
impl NodeProbe for MemoryNetwork {
    type Error = Error;

    async fn logical_state(&self, node: &HostPort) -> Result<LogicalServerState, Self::Error> {
        self.with_node(node, |memory_node| memory_node.state)
    }

    async fn upcoming_cluster(&self, node: &HostPort) -> Result<Cluster, Self::Error> {
        self.with_node(node, |memory_node| memory_node.upcoming.clone())
    }

    async fn runtime_cluster(&self, node: &HostPort) -> Result<Cluster, Self::Error> {
        self.with_node(node, |memory_node| memory_node.runtime.clone())
    }

    async fn discover(&self, node: &HostPort) -> Result<DiscoverResponse, Self::Error> {
        let server = self.reachable(node)?;
        Ok(server.discover().await)
    }

    async fn change_history(&self, node: &HostPort) -> Result<Vec<ChangeRecord>, Self::Error> {
        let server = self.reachable(node)?;
        server
            .history()
            .await
            .map_err(|e| Self::acceptor_error(node, &e))
    }

    async fn is_activated(&self, node: &HostPort) -> Result<bool, Self::Error> {
        let server = self.reachable(node)?;
        Ok(server.current_cluster().await.is_some())
    }

    async fn must_be_restarted(&self, node: &HostPort) -> Result<bool, Self::Error> {
        self.with_node(node, |memory_node| memory_node.must_restart)
    }
}

#[async_trait]
impl NodeClient for MemoryNetwork {
    async fn prepare(
        &self,
        node: &HostPort,
        message: PrepareMessage,
    ) -> Result<AcceptRejectResponse, Self::Error> {
        self.record(node, Call::Prepare(message.change_uuid));
        let server = self.reachable(node)?;
        self.check_fault(node, Fault::Refuse(Phase::Prepare))?;

        let response = server
            .prepare(message)
            .await
            .map_err(|e| Self::acceptor_error(node, &e))?;

        self.check_fault(node, Fault::LoseResponse(Phase::Prepare))?;
        Ok(response)
    }

    async fn commit(
        &self,
        node: &HostPort,
        message: CommitMessage,
    ) -> Result<AcceptRejectResponse, Self::Error> {
        self.record(node, Call::Commit(message.change_uuid));
        let server = self.reachable(node)?;
        self.check_fault(node, Fault::Refuse(Phase::Commit))?;

        let response = server
            .commit(message)
            .await
            .map_err(|e| Self::acceptor_error(node, &e))?;
        if response.is_accepted() {
            self.apply_committed(node, &server).await?;
        }

        self.check_fault(node, Fault::LoseResponse(Phase::Commit))?;
        Ok(response)
    }

    async fn rollback(
        &self,
        node: &HostPort,
        message: RollbackMessage,
    ) -> Result<AcceptRejectResponse, Self::Error> {
        self.record(node, Call::Rollback(message.change_uuid));
        let server = self.reachable(node)?;
        self.check_fault(node, Fault::Refuse(Phase::Rollback))?;

        let response = server
            .rollback(message)
            .await
            .map_err(|e| Self::acceptor_error(node, &e))?;

        self.check_fault(node, Fault::LoseResponse(Phase::Rollback))?;
        Ok(response)
    }

    async fn force_unlock(&self, node: &HostPort) -> Result<(), Self::Error> {
        self.record(node, Call::ForceUnlock);
        let server = self.reachable(node)?;
        server.force_unlock().await;
        Ok(())
    }

    async fn reset(&self, node: &HostPort) -> Result<(), Self::Error> {
        self.record(node, Call::Reset);
        let server = self.reachable(node)?;
        server
            .reset()
            .await
            .map_err(|e| Self::acceptor_error(node, &e))?;

        self.with_node(node, |memory_node| {
            if let Some(own) = memory_node.upcoming.node_by_address(node).cloned() {
                memory_node.upcoming = Cluster::single(own);
            }
            memory_node.must_restart = false;
        })
    }

    async fn reset_and_sync(
        &self,
        node: &HostPort,
        history: Vec<ChangeRecord>,
    ) -> Result<(), Self::Error> {
        self.record(node, Call::ResetAndSync);
        let server = self.reachable(node)?;
        server
            .reset_and_sync(history)
            .await
            .map_err(|e| Self::acceptor_error(node, &e))?;

        let cluster = server.current_cluster().await;
        self.with_node(node, |memory_node| {
            if let Some(cluster) = cluster {
                memory_node.upcoming = cluster;
                memory_node.must_restart = true;
            }
        })
    }

    async fn restart(&self, node: &HostPort, delay: Duration) -> Result<(), Self::Error> {
        self.record(node, Call::Restart);
        let generation = self.with_node(node, |memory_node| {
            memory_node.online = false;
            memory_node.generation += 1;
            memory_node.generation
        })?;

        let network = self.clone();
        let address = node.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            network.bring_up(&address, generation).await;
        });

        debug!(node = %node, ?delay, "restart scheduled");
        Ok(())
    }

    async fn stop(&self, node: &HostPort, delay: Duration) -> Result<(), Self::Error> {
        self.record(node, Call::Stop);
        self.with_node(node, |_| ())?;

        let network = self.clone();
        let address = node.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            network.set_online(&address, false);
            network.set_state(&address, LogicalServerState::Unreachable);
        });

        debug!(node = %node, ?delay, "stop scheduled");
        Ok(())
    }

    async fn set_upcoming_cluster(
        &self,
        node: &HostPort,
        cluster: Cluster,
    ) -> Result<(), Self::Error> {
        self.record(node, Call::SetUpcomingCluster);
        let server = self.reachable(node)?;
        if server.current_cluster().await.is_some() {
            return Err(Error::Rejected {
                node: node.clone(),
                reason: "node is activated: its topology only changes through the change protocol"
                    .to_string(),
            });
        }

        self.with_node(node, |memory_node| {
            memory_node.upcoming = cluster.clone();
            memory_node.runtime = cluster;
        })
    }
}
