//! Command error types.

use std::time::Duration;

use thiserror::Error;

use crate::command::CommandStatus;

/// Result type for command operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from issuing, completing or awaiting commands.
#[derive(Debug, Error)]
pub enum Error {
    /// The command could not be durably recorded. Retry the whole operation.
    #[error("Command not recorded: {0}")]
    StoreWrite(#[source] tether_storage::Error),

    /// Reading the shared store failed.
    #[error("Store error: {0}")]
    Store(#[source] tether_storage::Error),

    /// No command with this correlation id.
    #[error("Command not found: {0}")]
    NotFound(String),

    /// The command already reached a terminal status.
    #[error("Command {correlation_id} is already {status}")]
    AlreadyTerminal {
        correlation_id: String,
        status: CommandStatus,
    },

    /// Gave up waiting locally. The command document is untouched.
    #[error("No terminal status for {correlation_id} after {waited:?}")]
    ExecutorTimeout {
        correlation_id: String,
        waited: Duration,
    },

    /// A stored document does not have the command shape.
    #[error("Corrupt document at {path}: {reason}")]
    Corrupt { path: String, reason: String },
}

impl Error {
    /// Map a failed write, keeping shape errors apart from store failures.
    pub(crate) fn from_write(path: &str, error: tether_storage::Error) -> Self {
        match error {
            tether_storage::Error::NotFound(_) => Error::NotFound(path.to_string()),
            tether_storage::Error::Serialization(reason) => Error::Corrupt {
                path: path.to_string(),
                reason,
            },
            other => Error::StoreWrite(other),
        }
    }

    pub(crate) fn from_read(path: &str, error: tether_storage::Error) -> Self {
        match error {
            tether_storage::Error::Serialization(reason) => Error::Corrupt {
                path: path.to_string(),
                reason,
            },
            other => Error::Store(other),
        }
    }
}
