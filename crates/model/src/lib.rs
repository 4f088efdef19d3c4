//! Topology model for the dynamic configuration control plane: clusters, stripes, nodes,
//! parsed setting mutations and the structural validation applied before any change is
//! proposed to a live cluster.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod address;
mod cluster;
mod configuration;
mod error;
mod failover;
mod lock;
mod measure;
mod node;
mod setting;
mod state;
mod stripe;
mod uid;
mod validator;

pub use address::HostPort;
pub use cluster::{Cluster, NodeLocation};
pub use configuration::{Configuration, Operation, Scope};
pub use error::{Error, Result};
pub use failover::FailoverPriority;
pub use lock::LockContext;
pub use measure::{MemorySize, TimeMeasure};
pub use node::Node;
pub use setting::{ClusterState, Requirement, SecurityAuthc, Setting};
pub use state::LogicalServerState;
pub use stripe::Stripe;
pub use uid::Uid;
pub use validator::ClusterValidator;
