use thiserror::Error;

use crate::change_log::ChangeLogError;

/// Errors raised by the node-side acceptor.
#[derive(Debug, Error)]
pub enum Error<L>
where
    L: ChangeLogError,
{
    /// The change log failed.
    #[error("change log error: {0}")]
    ChangeLog(#[source] L),

    /// The log replayed into an impossible state.
    #[error("corrupted change log: {0}")]
    Corrupted(String),
}
