//! Command data structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tether_core::ids::{new_correlation_id, AuthorityId, CorrelationId, DeviceId};

/// Command status. PENDING is the only non-terminal value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStatus {
    /// Issued, waiting for the executor
    Pending,
    /// Executor finished; the result document follows
    Completed,
    /// Executor gave up
    Failed,
}

impl CommandStatus {
    /// Check if command is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CommandStatus::Completed | CommandStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Pending => "PENDING",
            CommandStatus::Completed => "COMPLETED",
            CommandStatus::Failed => "FAILED",
        }
    }

    /// Whether moving from `self` to `next` keeps status monotonic.
    pub fn can_transition_to(&self, next: CommandStatus) -> bool {
        *self == CommandStatus::Pending && next.is_terminal()
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A command addressed to one subject device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub correlation_id: CorrelationId,
    pub subject_device_id: DeviceId,
    pub requested_by: AuthorityId,
    pub command_type: String,
    /// Command-type-specific parameters.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
    pub requested_at: DateTime<Utc>,
    pub status: CommandStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Command {
    /// Create a PENDING command with a fresh correlation id.
    pub fn new(
        subject_device_id: impl Into<DeviceId>,
        requested_by: impl Into<AuthorityId>,
        command_type: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id: new_correlation_id(),
            subject_device_id: subject_device_id.into(),
            requested_by: requested_by.into(),
            command_type: command_type.into(),
            params: Value::Null,
            requested_at: Utc::now(),
            status: CommandStatus::Pending,
            error_message: None,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<CorrelationId>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Document path of this command.
    pub fn path(&self) -> String {
        tether_core::paths::command(&self.subject_device_id, &self.correlation_id)
    }
}

/// What a status subscriber is told.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandUpdate {
    pub correlation_id: CorrelationId,
    pub status: CommandStatus,
    /// Result payload; only set for COMPLETED, and `None` if it did not show up in time.
    pub result: Option<Value>,
    pub error_message: Option<String>,
}

impl CommandUpdate {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
