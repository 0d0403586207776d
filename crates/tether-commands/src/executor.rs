//! Executor side: run pending commands on the subject device.
//!
//! [`ExecutorRunner`] hosts a [`CommandExecutor`]. It first catches up on
//! commands that were issued while it was away, then follows the change
//! feed. Every command gets exactly one terminal write from here: the
//! current status is re-read before executing, so stale feed events and
//! commands finished elsewhere are skipped.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use tether_core::paths;
use tether_messages::{EventKind, EventPayload, FanoutSender, NotificationTasks, Recipient};
use tether_storage::ChangeEvent;

use crate::channel::CommandChannel;
use crate::command::{Command, CommandStatus};
use crate::{Error, Result};

/// Performs commands on the subject device.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run a command. `Ok` carries the result payload, `Err` the failure message.
    async fn execute(&self, command: &Command) -> std::result::Result<Value, String>;
}

/// Runs a [`CommandExecutor`] against one subject's command collection.
pub struct ExecutorRunner {
    subject: String,
    channel: CommandChannel,
    executor: Arc<dyn CommandExecutor>,
    notifier: Option<Arc<FanoutSender>>,
    tasks: Arc<NotificationTasks>,
    /// Commands executed but not yet written back.
    in_flight: HashSet<String>,
}

impl ExecutorRunner {
    pub fn new(
        subject: impl Into<String>,
        channel: CommandChannel,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        Self {
            subject: subject.into(),
            channel,
            executor,
            notifier: None,
            tasks: Arc::new(NotificationTasks::new()),
            in_flight: HashSet::new(),
        }
    }

    /// Tell the issuing authority when a command finishes.
    pub fn with_notifier(mut self, sender: Arc<FanoutSender>) -> Self {
        self.notifier = Some(sender);
        self
    }

    pub fn with_tasks(mut self, tasks: Arc<NotificationTasks>) -> Self {
        self.tasks = tasks;
        self
    }

    /// Execute every PENDING command once. Returns how many ran.
    pub async fn run_pending(&mut self) -> Result<usize> {
        let mut ran = 0;
        for command in self.channel.pending(&self.subject).await? {
            if self.handle(command).await? {
                ran += 1;
            }
        }
        Ok(ran)
    }

    /// Catch up, then follow the feed until the store goes away.
    ///
    /// Store failures are logged and the loop keeps going; a failed command
    /// stays PENDING and is picked up again by the next catch-up.
    pub async fn run(mut self) -> Result<()> {
        let mut changes = self.channel.store().changes();
        let prefix = format!("{}/", paths::commands(&self.subject));

        match self.run_pending().await {
            Ok(caught_up) => {
                info!(subject_device_id = %self.subject, caught_up, "Executor running")
            }
            Err(e) => {
                warn!(subject_device_id = %self.subject, error = %e, "Catch-up failed, following feed")
            }
        }

        while let Some(event) = changes.recv_under(&prefix).await {
            match event {
                ChangeEvent::Lagged(missed) => {
                    debug!(subject_device_id = %self.subject, missed, "Command feed lagged, catching up");
                    if let Err(e) = self.run_pending().await {
                        warn!(subject_device_id = %self.subject, error = %e, "Catch-up failed");
                    }
                }
                ChangeEvent::Changed(change) => {
                    let Some(document) = change.document else {
                        continue;
                    };
                    match serde_json::from_value::<Command>(document) {
                        Ok(command) if command.status == CommandStatus::Pending => {
                            let cid = command.correlation_id.clone();
                            if let Err(e) = self.handle(command).await {
                                warn!(
                                    subject_device_id = %self.subject,
                                    correlation_id = %cid,
                                    error = %e,
                                    "Command not written back"
                                );
                            }
                        }
                        Ok(_) => {}
                        Err(e) => warn!(path = %change.path, error = %e, "Ignoring malformed command"),
                    }
                }
            }
        }
        debug!(subject_device_id = %self.subject, "Command feed closed, executor stopping");
        Ok(())
    }

    /// Run [`ExecutorRunner::run`] on its own task.
    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    /// Commands executed whose terminal write has not returned yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Execute one command if it is still PENDING. Returns whether it ran.
    async fn handle(&mut self, command: Command) -> Result<bool> {
        let cid = command.correlation_id.clone();
        if self.in_flight.contains(&cid) {
            return Ok(false);
        }
        let current = match self.channel.get(&self.subject, &cid).await? {
            Some(current) if current.status == CommandStatus::Pending => current,
            _ => return Ok(false),
        };

        self.in_flight.insert(cid.clone());
        let outcome = self.executor.execute(&current).await;
        let written = match outcome {
            Ok(result) => self.channel.complete(&self.subject, &cid, result).await,
            Err(message) => self.channel.fail(&self.subject, &cid, &message).await,
        };
        self.in_flight.remove(&cid);

        match written {
            Ok(done) => {
                self.notify_issuer(&done);
                Ok(true)
            }
            Err(Error::AlreadyTerminal { status, .. }) => {
                debug!(correlation_id = %cid, %status, "Command finished elsewhere");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn notify_issuer(&self, command: &Command) {
        let Some(sender) = self.notifier.clone() else {
            return;
        };
        let recipient = Recipient::authority(command.requested_by.clone());
        let payload = EventPayload::new()
            .with_subject(command.subject_device_id.clone())
            .with_authority(command.requested_by.clone())
            .with_correlation_id(command.correlation_id.clone())
            .with_extra("commandType", command.command_type.clone())
            .with_extra("status", command.status.as_str());

        self.tasks.spawn(
            format!("command-completed:{}", command.correlation_id),
            async move {
                sender
                    .send(&recipient, EventKind::CommandCompleted, &payload)
                    .await?;
                Ok(())
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tether_storage::{ChangeReceiver, DocumentStore, MemoryDocumentStore, Mutator};

    /// Memory store whose first `update` fails.
    struct FlakyStore {
        inner: MemoryDocumentStore,
        failed: AtomicBool,
    }

    #[async_trait]
    impl DocumentStore for FlakyStore {
        fn backend_name(&self) -> &str {
            "flaky"
        }

        async fn create(&self, path: &str, document: Value) -> tether_storage::Result<()> {
            self.inner.create(path, document).await
        }

        async fn get(&self, path: &str) -> tether_storage::Result<Option<Value>> {
            self.inner.get(path).await
        }

        async fn put(&self, path: &str, document: Value) -> tether_storage::Result<()> {
            self.inner.put(path, document).await
        }

        async fn set_field(
            &self,
            path: &str,
            field: &[&str],
            value: Value,
        ) -> tether_storage::Result<()> {
            self.inner.set_field(path, field, value).await
        }

        async fn update(&self, path: &str, mutator: Mutator<'_>) -> tether_storage::Result<Value> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                return Err(tether_storage::Error::Storage("disk full".to_string()));
            }
            self.inner.update(path, mutator).await
        }

        async fn delete(&self, path: &str) -> tether_storage::Result<bool> {
            self.inner.delete(path).await
        }

        async fn list(&self, collection: &str) -> tether_storage::Result<Vec<(String, Value)>> {
            self.inner.list(collection).await
        }

        fn changes(&self) -> ChangeReceiver {
            self.inner.changes()
        }
    }

    struct Echo {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CommandExecutor for Echo {
        async fn execute(&self, command: &Command) -> std::result::Result<Value, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match command.command_type.as_str() {
                "ECHO" => Ok(command.params.clone()),
                other => Err(format!("unsupported command {}", other)),
            }
        }
    }

    #[tokio::test]
    async fn test_run_pending_executes_each_once() {
        let channel = CommandChannel::new(Arc::new(MemoryDocumentStore::new()));
        let echo = Arc::new(Echo {
            calls: AtomicUsize::new(0),
        });
        let ok = Command::new("kid-1", "parent-1", "ECHO").with_params(json!({"n": 1}));
        let bad = Command::new("kid-1", "parent-1", "WIPE");
        channel.create(&ok).await.unwrap();
        channel.create(&bad).await.unwrap();

        let mut runner = ExecutorRunner::new("kid-1", channel.clone(), echo.clone());
        assert_eq!(runner.run_pending().await.unwrap(), 2);
        assert_eq!(runner.in_flight(), 0);
        assert_eq!(runner.run_pending().await.unwrap(), 0);
        assert_eq!(echo.calls.load(Ordering::SeqCst), 2);

        let ok = channel.get("kid-1", &ok.correlation_id).await.unwrap().unwrap();
        assert_eq!(ok.status, CommandStatus::Completed);
        assert_eq!(
            channel.result("kid-1", &ok.correlation_id).await.unwrap(),
            Some(json!({"n": 1}))
        );

        let bad = channel.get("kid-1", &bad.correlation_id).await.unwrap().unwrap();
        assert_eq!(bad.status, CommandStatus::Failed);
        assert_eq!(bad.error_message.as_deref(), Some("unsupported command WIPE"));
    }

    #[tokio::test]
    async fn test_stale_pending_snapshot_is_skipped() {
        let channel = CommandChannel::new(Arc::new(MemoryDocumentStore::new()));
        let echo = Arc::new(Echo {
            calls: AtomicUsize::new(0),
        });
        let command = Command::new("kid-1", "parent-1", "ECHO");
        channel.create(&command).await.unwrap();
        channel
            .fail("kid-1", &command.correlation_id, "done elsewhere")
            .await
            .unwrap();

        // A feed event carrying the old PENDING document.
        let mut runner = ExecutorRunner::new("kid-1", channel.clone(), echo.clone());
        assert!(!runner.handle(command.clone()).await.unwrap());
        assert_eq!(echo.calls.load(Ordering::SeqCst), 0);
        assert_eq!(runner.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_many_commands_leave_nothing_tracked() {
        let channel = CommandChannel::new(Arc::new(MemoryDocumentStore::new()));
        let echo = Arc::new(Echo {
            calls: AtomicUsize::new(0),
        });
        for _ in 0..50 {
            channel
                .create(&Command::new("kid-1", "parent-1", "ECHO"))
                .await
                .unwrap();
        }

        let mut runner = ExecutorRunner::new("kid-1", channel.clone(), echo.clone());
        assert_eq!(runner.run_pending().await.unwrap(), 50);
        assert_eq!(runner.in_flight(), 0);
        assert!(channel.pending("kid-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_runner_survives_failed_write() {
        let store = Arc::new(FlakyStore {
            inner: MemoryDocumentStore::new(),
            failed: AtomicBool::new(false),
        });
        let channel = CommandChannel::new(store);
        let echo = Arc::new(Echo {
            calls: AtomicUsize::new(0),
        });
        let handle = ExecutorRunner::new("kid-1", channel.clone(), echo.clone()).spawn();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let lost = Command::new("kid-1", "parent-1", "ECHO");
        channel.create(&lost).await.unwrap();
        let next = Command::new("kid-1", "parent-1", "ECHO");
        channel.create(&next).await.unwrap();

        let done = tokio::time::timeout(std::time::Duration::from_secs(2), async {
            loop {
                if let Some(c) = channel.get("kid-1", &next.correlation_id).await.unwrap() {
                    if c.is_terminal() {
                        return c;
                    }
                }
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(done.status, CommandStatus::Completed);
        assert!(!handle.is_finished());
        // The refused write leaves the first command for the next catch-up.
        let lost = channel.get("kid-1", &lost.correlation_id).await.unwrap().unwrap();
        assert_eq!(lost.status, CommandStatus::Pending);
        handle.abort();
    }

    #[tokio::test]
    async fn test_runner_follows_new_commands() {
        let channel = CommandChannel::new(Arc::new(MemoryDocumentStore::new()));
        let echo = Arc::new(Echo {
            calls: AtomicUsize::new(0),
        });
        let handle = ExecutorRunner::new("kid-1", channel.clone(), echo.clone()).spawn();
        tokio::task::yield_now().await;

        let command = Command::new("kid-1", "parent-1", "ECHO").with_params(json!("hi"));
        channel.create(&command).await.unwrap();
        channel
            .create(&Command::new("kid-2", "parent-1", "ECHO"))
            .await
            .unwrap();

        let done = tokio::time::timeout(std::time::Duration::from_secs(2), async {
            loop {
                if let Some(c) = channel.get("kid-1", &command.correlation_id).await.unwrap() {
                    if c.is_terminal() {
                        return c;
                    }
                }
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(done.status, CommandStatus::Completed);
        assert_eq!(echo.calls.load(Ordering::SeqCst), 1);
        handle.abort();
    }
}
