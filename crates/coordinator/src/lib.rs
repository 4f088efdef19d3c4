//! Coordinator side of the two-phase change protocol: fans discovery out to every node,
//! classifies the cluster into one consistency verdict, drives prepare and commit across the
//! nodes and repairs changes left half-applied.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod analyzer;
mod config;
mod coordinator;
mod error;
mod repair;


pub use analyzer::{
    ConcurrentClient, ConsistencyAnalyzer, Discovery, GlobalConsistencyState, InconsistentGroups,
    NodeSnapshot, Verdict,
};
pub use config::{CoordinatorConfig, CoordinatorConfigBuilder};
pub use coordinator::{
    ChangeCoordinator, ChangeOutcome, RecoveryDecision, RecoveryOutcome, ensure_accepting,
};
pub use error::{Error, NodeFailure, ProtocolFailure, ProtocolPhase, Result};
pub use repair::{RepairAction, RepairEngine, RepairOutcome};
