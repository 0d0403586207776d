//! Error types for the push notification system.

use thiserror::Error;

/// Result type for notification operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while notifying a recipient.
///
/// Per-token delivery failures are not errors at this level: they are
/// absorbed into a [`crate::FanoutReport`] and only the aggregate outcome is
/// reported upward.
#[derive(Debug, Error)]
pub enum Error {
    /// The recipient has no registered push tokens.
    #[error("No recipients: {0} has no registered tokens")]
    NoRecipients(String),

    /// A bearer credential could not be obtained or refreshed.
    #[error("Credential failure: {0}")]
    Credential(String),

    /// One token could not be reached. Absorbed by the fan-out.
    #[error("Delivery to {token} failed: {reason}")]
    Delivery { token: String, reason: PushError },

    /// Token value cannot be stored or addressed.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Shared store failure (token lookup or registration).
    #[error("Store error: {0}")]
    Store(#[from] tether_storage::Error),
}

impl Error {
    /// Whether there was simply nobody to tell.
    pub fn is_no_recipients(&self) -> bool {
        matches!(self, Error::NoRecipients(_))
    }
}

/// Failure of a single push delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PushError {
    /// The push service no longer knows the token.
    #[error("Token unregistered: {0}")]
    Unregistered(String),

    /// The bearer credential was refused.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The push service rejected the message.
    #[error("Rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// Network or protocol failure before a response was received.
    #[error("Transport failure: {0}")]
    Transport(String),
}
