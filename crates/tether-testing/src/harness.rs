//! In-memory wiring of every component.

use std::sync::Arc;
use std::time::Duration;

use tether_approvals::{ApprovalConsensus, StoreAuthorityDirectory};
use tether_commands::{CommandChannel, CommandDispatcher, CommandExecutor, ExecutorRunner, StatusListener};
use tether_core::config::ApprovalConfig;
use tether_messages::{
    CredentialCache, CredentialSource, FanoutSender, MemoryPushTransport, NotificationTasks,
    Recipient, StaticCredentialSource, TokenRegistry,
};
use tether_storage::{DocumentStore, MemoryDocumentStore};

/// A memory store, a recording push transport and a static credential,
/// wired into the dispatcher, listener and consensus.
pub struct Harness {
    pub store: Arc<MemoryDocumentStore>,
    pub transport: MemoryPushTransport,
    pub credentials: Arc<CredentialCache>,
    pub sender: Arc<FanoutSender>,
    pub tasks: Arc<NotificationTasks>,
    pub channel: CommandChannel,
    pub listener: StatusListener,
    pub directory: StoreAuthorityDirectory,
    pub consensus: ApprovalConsensus,
}

impl Harness {
    pub fn new() -> Self {
        HarnessBuilder::default().build()
    }

    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    pub fn store(&self) -> Arc<dyn DocumentStore> {
        self.store.clone()
    }

    /// Dispatcher acting for `authority`, pushing through the shared sender.
    pub fn dispatcher(&self, authority: &str) -> CommandDispatcher {
        CommandDispatcher::new(authority, self.channel.clone())
            .with_sender(self.sender.clone())
            .with_tasks(self.tasks.clone())
    }

    /// Executor host for `subject`, reporting completions to the issuer.
    pub fn executor(&self, subject: &str, executor: Arc<dyn CommandExecutor>) -> ExecutorRunner {
        ExecutorRunner::new(subject, self.channel.clone(), executor)
            .with_notifier(self.sender.clone())
            .with_tasks(self.tasks.clone())
    }

    pub async fn register_token(&self, recipient: &Recipient, token: &str) {
        if let Err(e) = self.sender.tokens().register(recipient, token, None).await {
            panic!("failed to register token {}: {}", token, e);
        }
    }

    pub async fn link(&self, subject: &str, authority: &str) {
        if let Err(e) = self.directory.link(subject, authority).await {
            panic!("failed to link {} to {}: {}", authority, subject, e);
        }
    }

    /// Wait for every background notification.
    pub async fn settle(&self) {
        self.tasks.wait_idle().await;
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// Options for [`Harness`].
pub struct HarnessBuilder {
    credential_source: Arc<dyn CredentialSource>,
    refresh_buffer: Option<Duration>,
    result_grace: Duration,
    approvals: ApprovalConfig,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            credential_source: Arc::new(StaticCredentialSource::new("test-access-token")),
            refresh_buffer: None,
            result_grace: Duration::from_millis(500),
            approvals: ApprovalConfig::default(),
        }
    }
}

impl HarnessBuilder {
    pub fn credential_source(mut self, source: Arc<dyn CredentialSource>) -> Self {
        self.credential_source = source;
        self
    }

    pub fn refresh_buffer(mut self, buffer: Duration) -> Self {
        self.refresh_buffer = Some(buffer);
        self
    }

    pub fn result_grace(mut self, grace: Duration) -> Self {
        self.result_grace = grace;
        self
    }

    pub fn notify_partial(mut self, notify: bool) -> Self {
        self.approvals.notify_partial = notify;
        self
    }

    pub fn build(self) -> Harness {
        let store = Arc::new(MemoryDocumentStore::new());
        let transport = MemoryPushTransport::new();
        let credentials = Arc::new(match self.refresh_buffer {
            Some(buffer) => CredentialCache::with_refresh_buffer(self.credential_source, buffer),
            None => CredentialCache::new(self.credential_source),
        });
        let sender = Arc::new(FanoutSender::new(
            TokenRegistry::new(store.clone()),
            credentials.clone(),
            Arc::new(transport.clone()),
        ));
        let tasks = Arc::new(NotificationTasks::new());
        let channel = CommandChannel::new(store.clone());
        let listener = StatusListener::new(channel.clone()).with_result_grace(self.result_grace);
        let directory = StoreAuthorityDirectory::new(store.clone());
        let consensus = ApprovalConsensus::new(store.clone(), Arc::new(directory.clone()))
            .with_sender(sender.clone())
            .with_tasks(tasks.clone())
            .with_config(self.approvals);

        Harness {
            store,
            transport,
            credentials,
            sender,
            tasks,
            channel,
            listener,
            directory,
            consensus,
        }
    }
}
