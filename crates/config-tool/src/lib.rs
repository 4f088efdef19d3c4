//! Operator commands for a clustered server's configuration: read and change settings,
//! attach and detach nodes and stripes, activate, lock, diagnose and repair.
//!
//! Every command is validated before any node is contacted, then executed through a
//! [`ConfigTool`] which owns the change coordinator, the repair engine and the restart
//! service.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod commands;
mod config;
mod error;
mod restart;
mod tool;
mod topology;

pub use commands::{
    ActivateCommand, AttachCommand, DetachCommand, DiagnosticCommand, DiagnosticReport,
    GetCommand, LockCommand, NodeReport, RepairCommand, SetCommand, SetOutcome, TopologyKind,
    TopologyOutcome, UnlockCommand,
};
pub use config::{ToolConfig, ToolConfigBuilder};
pub use error::{Error, Result};
pub use restart::{DIAGNOSTIC, ONLINE_ROLES, RestartService};
pub use tool::{ConfigTool, Executable, SUCCESS, Validatable, status_line};
