//! Approval error types.

use thiserror::Error;

use crate::request::ApprovalStatus;

/// Result type for approval operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The request or vote could not be durably recorded.
    #[error("Not recorded: {0}")]
    StoreWrite(#[source] tether_storage::Error),

    /// Reading the shared store failed.
    #[error("Store error: {0}")]
    Store(#[source] tether_storage::Error),

    #[error("Approval request not found: {0}")]
    NotFound(String),

    /// The voter was not linked to the subject when the request was created.
    #[error("Authority {authority_id} is not part of request {request_id}")]
    UnknownAuthority {
        request_id: String,
        authority_id: String,
    },

    /// The request already reached a final decision.
    #[error("Request {request_id} is closed ({status})")]
    RequestClosed {
        request_id: String,
        status: ApprovalStatus,
    },

    /// Nobody could vote on a request for this subject.
    #[error("No authorities linked to {0}")]
    NoAuthorities(String),

    /// Only APPROVED and REJECTED can be cast.
    #[error("Invalid vote: {0}")]
    InvalidVote(String),

    #[error("Corrupt document at {path}: {reason}")]
    Corrupt { path: String, reason: String },
}

impl Error {
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
