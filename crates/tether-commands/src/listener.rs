//! Status listener: follow one command until it reaches a terminal status.
//!
//! Each subscription is a task owned by its [`Subscription`] handle. The
//! task ends by itself after delivering the terminal update; dropping or
//! cancelling the handle ends it earlier. Updates are deduplicated, so a
//! repeated notification of a status already seen produces no callback.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use tether_core::paths;
use tether_storage::{ChangeEvent, ChangeReceiver};

use crate::channel::CommandChannel;
use crate::command::{Command, CommandStatus, CommandUpdate};
use crate::{Error, Result};

/// Why a subscription task stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionEnd {
    /// The terminal update was delivered.
    Terminal(CommandStatus),
    /// Cancelled by the caller.
    Cancelled,
    /// The store went away before a terminal status was seen.
    StoreClosed,
}

/// Handle to a live subscription. Dropping it cancels the subscription.
pub struct Subscription {
    correlation_id: String,
    handle: Option<JoinHandle<SubscriptionEnd>>,
}

impl Subscription {
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Stop listening.
    pub fn cancel(&self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }

    /// Whether the subscription is still waiting for a terminal status.
    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Wait for the subscription task to stop.
    pub async fn finished(mut self) -> SubscriptionEnd {
        let Some(handle) = self.handle.take() else {
            return SubscriptionEnd::Cancelled;
        };
        match handle.await {
            Ok(end) => end,
            Err(e) if e.is_cancelled() => SubscriptionEnd::Cancelled,
            Err(e) => {
                warn!(correlation_id = %self.correlation_id, error = %e, "Status callback panicked");
                SubscriptionEnd::Cancelled
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Subscribes to command status changes.
#[derive(Clone)]
pub struct StatusListener {
    channel: CommandChannel,
    result_grace: Duration,
}

impl StatusListener {
    pub fn new(channel: CommandChannel) -> Self {
        Self {
            channel,
            result_grace: Duration::from_millis(tether_core::config::defaults::RESULT_GRACE_MS),
        }
    }

    /// How long to wait for the result document after COMPLETED is seen.
    pub fn with_result_grace(mut self, grace: Duration) -> Self {
        self.result_grace = grace;
        self
    }

    /// Call `on_update` for every status change of one command.
    ///
    /// If the command is already terminal when subscribing, the terminal
    /// update is delivered once and the subscription ends. Callbacks run on
    /// the subscription task, not on the caller's.
    pub fn subscribe<F>(&self, subject: &str, correlation_id: &str, on_update: F) -> Subscription
    where
        F: FnMut(CommandUpdate) + Send + 'static,
    {
        // Subscribe before the first read so no change slips between them.
        let changes = self.channel.store().changes();
        let follower = Follower {
            channel: self.channel.clone(),
            result_grace: self.result_grace,
            subject: subject.to_string(),
            correlation_id: correlation_id.to_string(),
            command_path: paths::command(subject, correlation_id),
            result_path: paths::command_result(subject, correlation_id),
            changes,
            last: None,
        };

        Subscription {
            correlation_id: correlation_id.to_string(),
            handle: Some(tokio::spawn(follower.run(on_update))),
        }
    }

    /// Wait for the terminal update, giving up locally after `timeout`.
    ///
    /// A timeout leaves the command document untouched; only the executor
    /// writes terminal statuses.
    pub async fn await_terminal(
        &self,
        subject: &str,
        correlation_id: &str,
        timeout: Duration,
    ) -> Result<CommandUpdate> {
        let (tx, rx) = oneshot::channel();
        let mut tx = Some(tx);
        let subscription = self.subscribe(subject, correlation_id, move |update| {
            if update.is_terminal() {
                if let Some(tx) = tx.take() {
                    let _ = tx.send(update);
                }
            }
        });

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(update)) => Ok(update),
            Ok(Err(_)) => match subscription.finished().await {
                SubscriptionEnd::StoreClosed => Err(Error::Store(tether_storage::Error::Storage(
                    "store closed".to_string(),
                ))),
                _ => Err(Error::ExecutorTimeout {
                    correlation_id: correlation_id.to_string(),
                    waited: timeout,
                }),
            },
            Err(_) => {
                debug!(correlation_id = %correlation_id, ?timeout, "Gave up waiting for command");
                Err(Error::ExecutorTimeout {
                    correlation_id: correlation_id.to_string(),
                    waited: timeout,
                })
            }
        }
    }
}

/// State of one subscription task.
struct Follower {
    channel: CommandChannel,
    result_grace: Duration,
    subject: String,
    correlation_id: String,
    command_path: String,
    result_path: String,
    changes: ChangeReceiver,
    last: Option<CommandStatus>,
}

impl Follower {
    async fn run<F>(mut self, mut on_update: F) -> SubscriptionEnd
    where
        F: FnMut(CommandUpdate) + Send + 'static,
    {
        // Only a terminal starting state is reported; PENDING is what the caller already knows.
        if let Some(command) = self.read_command().await {
            if command.is_terminal() {
                return self.deliver(command, &mut on_update).await;
            }
            self.last = Some(command.status);
        }

        loop {
            let document = match self.changes.recv().await {
                None => return SubscriptionEnd::StoreClosed,
                Some(ChangeEvent::Lagged(missed)) => {
                    debug!(correlation_id = %self.correlation_id, missed, "Status feed lagged, re-reading");
                    match self.read_command().await {
                        Some(command) => command,
                        None => continue,
                    }
                }
                Some(ChangeEvent::Changed(change)) if change.path == self.command_path => {
                    match change.document.map(serde_json::from_value::<Command>) {
                        Some(Ok(command)) => command,
                        Some(Err(e)) => {
                            warn!(path = %self.command_path, error = %e, "Ignoring malformed command document");
                            continue;
                        }
                        None => continue,
                    }
                }
                Some(ChangeEvent::Changed(_)) => continue,
            };

            if self.last == Some(document.status) {
                continue;
            }
            if document.is_terminal() {
                return self.deliver(document, &mut on_update).await;
            }
            self.last = Some(document.status);
            on_update(update_for(&document, None));
        }
    }

    async fn deliver<F>(&mut self, command: Command, on_update: &mut F) -> SubscriptionEnd
    where
        F: FnMut(CommandUpdate),
    {
        let result = if command.status == CommandStatus::Completed {
            self.await_result().await
        } else {
            None
        };
        on_update(update_for(&command, result));
        SubscriptionEnd::Terminal(command.status)
    }

    async fn read_command(&self) -> Option<Command> {
        match self.channel.get(&self.subject, &self.correlation_id).await {
            Ok(command) => command,
            Err(e) => {
                warn!(correlation_id = %self.correlation_id, error = %e, "Failed to read command");
                None
            }
        }
    }

    async fn read_result(&self) -> Option<Value> {
        match self.channel.result(&self.subject, &self.correlation_id).await {
            Ok(result) => result,
            Err(e) => {
                warn!(correlation_id = %self.correlation_id, error = %e, "Failed to read command result");
                None
            }
        }
    }

    /// The result document is written after the status; give it a moment.
    async fn await_result(&mut self) -> Option<Value> {
        if let Some(result) = self.read_result().await {
            return Some(result);
        }

        let deadline = Instant::now() + self.result_grace;
        loop {
            match tokio::time::timeout_at(deadline, self.changes.recv()).await {
                Err(_) => {
                    warn!(
                        correlation_id = %self.correlation_id,
                        grace = ?self.result_grace,
                        "Command completed without a result document"
                    );
                    return None;
                }
                Ok(None) => return None,
                Ok(Some(ChangeEvent::Changed(change))) if change.path == self.result_path => {
                    if change.document.is_some() {
                        return change.document;
                    }
                }
                Ok(Some(ChangeEvent::Lagged(_))) => {
                    if let Some(result) = self.read_result().await {
                        return Some(result);
                    }
                }
                Ok(Some(ChangeEvent::Changed(_))) => {}
            }
        }
    }
}

fn update_for(command: &Command, result: Option<Value>) -> CommandUpdate {
    CommandUpdate {
        correlation_id: command.correlation_id.clone(),
        status: command.status,
        result,
        error_message: command.error_message.clone(),
    }
}
