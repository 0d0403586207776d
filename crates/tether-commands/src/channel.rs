//! Command channel: the shared per-subject store of command documents.
//!
//! The issuer creates a command exactly once; the executor moves it to a
//! terminal status exactly once and then writes the result document.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use tether_core::paths;
use tether_storage::{DocumentStore, DocumentStoreExt};

use crate::command::{Command, CommandStatus};
use crate::{Error, Result};

/// Typed access to command and result documents.
#[derive(Clone)]
pub struct CommandChannel {
    store: Arc<dyn DocumentStore>,
}

impl CommandChannel {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Durably record a new command. Fails if the correlation id is taken.
    pub async fn create(&self, command: &Command) -> Result<()> {
        let path = command.path();
        self.store
            .create_as(&path, command)
            .await
            .map_err(|e| Error::from_write(&path, e))
    }

    pub async fn get(&self, subject: &str, correlation_id: &str) -> Result<Option<Command>> {
        let path = paths::command(subject, correlation_id);
        self.store
            .get_as(&path)
            .await
            .map_err(|e| Error::from_read(&path, e))
    }

    /// Result payload written by the executor, if any.
    pub async fn result(&self, subject: &str, correlation_id: &str) -> Result<Option<Value>> {
        let path = paths::command_result(subject, correlation_id);
        self.store
            .get(&path)
            .await
            .map_err(|e| Error::from_read(&path, e))
    }

    /// Every command of a subject, oldest first.
    pub async fn list(&self, subject: &str) -> Result<Vec<Command>> {
        let path = paths::commands(subject);
        let mut commands: Vec<Command> = self
            .store
            .list_as(&path)
            .await
            .map_err(|e| Error::from_read(&path, e))?;
        commands.sort_by(|a, b| a.requested_at.cmp(&b.requested_at));
        Ok(commands)
    }

    /// Commands still waiting for the executor, oldest first.
    pub async fn pending(&self, subject: &str) -> Result<Vec<Command>> {
        let mut commands = self.list(subject).await?;
        commands.retain(|c| c.status == CommandStatus::Pending);
        Ok(commands)
    }

    /// Mark a command COMPLETED, then store its result.
    pub async fn complete(
        &self,
        subject: &str,
        correlation_id: &str,
        result: Value,
    ) -> Result<Command> {
        let command = self
            .transition(subject, correlation_id, CommandStatus::Completed, None)
            .await?;

        let result_path = paths::command_result(subject, correlation_id);
        self.store
            .put(&result_path, result)
            .await
            .map_err(Error::StoreWrite)?;
        Ok(command)
    }

    /// Mark a command FAILED with a reason.
    pub async fn fail(&self, subject: &str, correlation_id: &str, message: &str) -> Result<Command> {
        self.transition(
            subject,
            correlation_id,
            CommandStatus::Failed,
            Some(message.to_string()),
        )
        .await
    }

    /// Single atomic PENDING -> terminal transition.
    async fn transition(
        &self,
        subject: &str,
        correlation_id: &str,
        next: CommandStatus,
        error_message: Option<String>,
    ) -> Result<Command> {
        let path = paths::command(subject, correlation_id);
        let mut refused: Option<CommandStatus> = None;

        let outcome = self
            .store
            .update_as(&path, |command: &mut Command| {
                if !command.status.can_transition_to(next) {
                    refused = Some(command.status);
                    return Err(tether_storage::Error::Aborted(format!(
                        "status is {}",
                        command.status
                    )));
                }
                command.status = next;
                command.error_message = error_message.clone();
                Ok(())
            })
            .await;

        match outcome {
            Ok(command) => {
                debug!(
                    subject_device_id = %subject,
                    correlation_id = %correlation_id,
                    status = %next,
                    "Command reached terminal status"
                );
                Ok(command)
            }
            Err(tether_storage::Error::Aborted(_)) if refused.is_some() => {
                Err(Error::AlreadyTerminal {
                    correlation_id: correlation_id.to_string(),
                    status: refused.unwrap_or(next),
                })
            }
            Err(e) => Err(Error::from_write(&path, e)),
        }
    }
}
