//! Command dispatcher.
//!
//! `issue` records the command before anything else. The push that wakes
//! the subject device runs as an owned background task afterwards; its
//! failure is logged and never fails the issue.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use tether_core::ids::{AuthorityId, CorrelationId};
use tether_messages::{EventKind, EventPayload, FanoutSender, NotificationTasks, Recipient};

use crate::channel::CommandChannel;
use crate::command::Command;
use crate::Result;

/// Issues commands on behalf of one authority.
pub struct CommandDispatcher {
    authority: AuthorityId,
    channel: CommandChannel,
    sender: Option<Arc<FanoutSender>>,
    tasks: Arc<NotificationTasks>,
}

impl CommandDispatcher {
    pub fn new(authority: impl Into<AuthorityId>, channel: CommandChannel) -> Self {
        Self {
            authority: authority.into(),
            channel,
            sender: None,
            tasks: Arc::new(NotificationTasks::new()),
        }
    }

    /// Push a wake-up notification to the subject after each issue.
    pub fn with_sender(mut self, sender: Arc<FanoutSender>) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Share a task set with other components.
    pub fn with_tasks(mut self, tasks: Arc<NotificationTasks>) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn channel(&self) -> &CommandChannel {
        &self.channel
    }

    pub fn tasks(&self) -> &Arc<NotificationTasks> {
        &self.tasks
    }

    /// Record a PENDING command and return its correlation id.
    ///
    /// Returns once the command is durable. A store failure means the
    /// command was never issued.
    pub async fn issue(
        &self,
        subject: &str,
        command_type: &str,
        params: Value,
    ) -> Result<CorrelationId> {
        let command = Command::new(subject, self.authority.clone(), command_type).with_params(params);
        self.channel.create(&command).await?;

        info!(
            subject_device_id = %subject,
            correlation_id = %command.correlation_id,
            command_type = %command_type,
            requested_by = %self.authority,
            "Command issued"
        );

        if let Some(sender) = &self.sender {
            self.notify_subject(sender.clone(), &command);
        }
        Ok(command.correlation_id)
    }

    fn notify_subject(&self, sender: Arc<FanoutSender>, command: &Command) {
        let recipient = Recipient::device(command.subject_device_id.clone());
        let payload = EventPayload::new()
            .with_subject(command.subject_device_id.clone())
            .with_authority(command.requested_by.clone())
            .with_correlation_id(command.correlation_id.clone())
            .with_extra("commandType", command.command_type.clone());
        let correlation_id = command.correlation_id.clone();

        self.tasks.spawn(
            format!("command-issued:{}", command.correlation_id),
            async move {
                let reached = sender
                    .send(&recipient, EventKind::CommandIssued, &payload)
                    .await?;
                if !reached {
                    warn!(
                        correlation_id = %correlation_id,
                        "Command recorded but the subject device was not reached"
                    );
                }
                Ok(())
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandStatus;
    use serde_json::json;
    use tether_messages::{
        CredentialCache, MemoryPushTransport, PushError, StaticCredentialSource, TokenRegistry,
    };
    use tether_storage::MemoryDocumentStore;

    fn sender(store: Arc<MemoryDocumentStore>, transport: &MemoryPushTransport) -> Arc<FanoutSender> {
        Arc::new(FanoutSender::new(
            TokenRegistry::new(store),
            Arc::new(CredentialCache::new(Arc::new(StaticCredentialSource::new("t")))),
            Arc::new(transport.clone()),
        ))
    }

    #[tokio::test]
    async fn test_issue_records_and_pushes() {
        let store = Arc::new(MemoryDocumentStore::new());
        let transport = MemoryPushTransport::new();
        let sender = sender(store.clone(), &transport);
        sender
            .tokens()
            .register(&Recipient::device("kid-1"), "kid-token", None)
            .await
            .unwrap();

        let dispatcher =
            CommandDispatcher::new("parent-1", CommandChannel::new(store)).with_sender(sender);
        let cid = dispatcher
            .issue("kid-1", "LIST_APPS", json!({"includeSystem": false}))
            .await
            .unwrap();
        dispatcher.tasks().wait_idle().await;

        let command = dispatcher.channel().get("kid-1", &cid).await.unwrap().unwrap();
        assert_eq!(command.status, CommandStatus::Pending);
        assert_eq!(command.requested_by, "parent-1");
        assert_eq!(command.params["includeSystem"], false);

        let pushes = transport.deliveries_of("COMMAND_ISSUED").await;
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].message.data["correlationId"], cid);
        assert_eq!(pushes[0].message.data["commandType"], "LIST_APPS");
    }

    #[tokio::test]
    async fn test_push_failure_does_not_fail_issue() {
        let store = Arc::new(MemoryDocumentStore::new());
        let transport = MemoryPushTransport::new();
        let sender = sender(store.clone(), &transport);
        sender
            .tokens()
            .register(&Recipient::device("kid-1"), "kid-token", None)
            .await
            .unwrap();
        transport
            .fail_token("kid-token", PushError::Transport("offline".to_string()))
            .await;

        let dispatcher =
            CommandDispatcher::new("parent-1", CommandChannel::new(store)).with_sender(sender);
        let cid = dispatcher.issue("kid-1", "LOCATE", Value::Null).await.unwrap();
        dispatcher.tasks().wait_idle().await;

        assert!(dispatcher.channel().get("kid-1", &cid).await.unwrap().is_some());
        assert_eq!(transport.count().await, 0);
    }

    #[tokio::test]
    async fn test_issue_without_tokens_or_sender() {
        let store = Arc::new(MemoryDocumentStore::new());
        let transport = MemoryPushTransport::new();

        let silent = CommandDispatcher::new("parent-1", CommandChannel::new(store.clone()));
        let no_tokens = CommandDispatcher::new("parent-1", CommandChannel::new(store.clone()))
            .with_sender(sender(store, &transport));

        let a = silent.issue("kid-1", "LOCATE", Value::Null).await.unwrap();
        let b = no_tokens.issue("kid-1", "LOCATE", Value::Null).await.unwrap();
        no_tokens.tasks().wait_idle().await;

        assert_ne!(a, b);
        assert_eq!(silent.channel().pending("kid-1").await.unwrap().len(), 2);
        assert_eq!(transport.attempts().await, 0);
    }
}
