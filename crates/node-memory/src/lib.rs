//! In-memory nodes for tests and local simulation: a change log, and a network of nodes each
//! running a change-protocol acceptor, with failure injection.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod change_log;
mod error;
mod network;

pub use change_log::MemoryChangeLog;
pub use error::{ChangeLogError, Error};
pub use network::{Call, Fault, MemoryNetwork, Phase};
