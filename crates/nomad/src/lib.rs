//! Two-phase change protocol shared by the coordinator and the node-side acceptor: protocol
//! messages, the change kinds carried by a change request, the durable change log contract
//! and the acceptor itself.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod change;
mod change_log;
mod error;
mod messages;
mod server;

pub use change::NomadChange;
pub use change_log::{
    ChangeLog, ChangeLogError, ChangeLogErrorKind, ChangeRecord, LoggedRecord, content_hash,
    verify_chain,
};
pub use error::Error;
pub use messages::{
    AcceptRejectResponse, ChangeDetails, ChangeRequestState, CommitMessage, DiscoverResponse,
    MutationInfo, NomadMode, PrepareMessage, RejectionReason, RollbackMessage,
};
pub use server::NomadServer;
