//! Fan-out behaviour across the registry, credential cache and transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use tether_messages::{
    Credential, CredentialCache, CredentialSource, Error, EventKind, EventPayload, FanoutSender,
    MemoryPushTransport, PushError, PushMessage, PushTransport, Recipient, StaticCredentialSource,
    TokenRegistry,
};
use tether_storage::MemoryDocumentStore;

fn sender_with(
    source: Arc<dyn CredentialSource>,
    transport: Arc<dyn PushTransport>,
) -> FanoutSender {
    let store = Arc::new(MemoryDocumentStore::new());
    FanoutSender::new(
        TokenRegistry::new(store),
        Arc::new(CredentialCache::new(source)),
        transport,
    )
}

#[tokio::test]
async fn test_one_dead_token_out_of_three() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let transport = MemoryPushTransport::new();
    let sender = sender_with(
        Arc::new(StaticCredentialSource::new("access")),
        Arc::new(transport.clone()),
    );
    let parent = Recipient::authority("parent-1");
    for token in ["token-1", "token-2", "token-3"] {
        sender.tokens().register(&parent, token, None).await.unwrap();
    }
    transport
        .fail_token("token-2", PushError::Unregistered("not found".to_string()))
        .await;

    let payload = EventPayload::new()
        .with_subject("kid-1")
        .with_correlation_id("c1")
        .with_extra("commandType", "LIST_APPS");
    let report = sender
        .send_report(&parent, EventKind::CommandIssued, &payload)
        .await
        .unwrap();

    assert!(report.succeeded());
    assert_eq!(report.delivered, vec!["token-1", "token-3"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].token, "token-2");
    assert_eq!(transport.count().await, 2);

    // The aggregate form agrees.
    assert!(sender
        .send(&parent, EventKind::CommandIssued, &payload)
        .await
        .unwrap());

    let delivered = transport.deliveries().await;
    let message = &delivered[0].message;
    assert_eq!(message.data["eventKind"], "COMMAND_ISSUED");
    assert_eq!(message.data["correlationId"], "c1");
    assert_eq!(message.data["subjectDeviceId"], "kid-1");
}

struct FailingSource;

#[async_trait]
impl CredentialSource for FailingSource {
    fn name(&self) -> &str {
        "failing"
    }

    async fn fetch(&self) -> tether_messages::Result<Credential> {
        Err(Error::Credential("token endpoint unreachable".to_string()))
    }
}

#[tokio::test]
async fn test_credential_failure_aborts_fanout() {
    let transport = MemoryPushTransport::new();
    let sender = sender_with(Arc::new(FailingSource), Arc::new(transport.clone()));
    let parent = Recipient::authority("parent-1");
    sender.tokens().register(&parent, "token-1", None).await.unwrap();
    sender.tokens().register(&parent, "token-2", None).await.unwrap();

    let result = sender
        .send(&parent, EventKind::ApprovalRequested, &EventPayload::new())
        .await;

    assert!(matches!(result, Err(Error::Credential(_))));
    assert_eq!(transport.attempts().await, 0);
}

/// Refuses the first credential it sees, accepts any later one.
struct RevokedOnce {
    refused: std::sync::Mutex<Option<String>>,
    delivered: AtomicUsize,
}

#[async_trait]
impl PushTransport for RevokedOnce {
    fn name(&self) -> &str {
        "revoked-once"
    }

    async fn deliver(&self, credential: &Credential, _message: &PushMessage) -> Result<(), PushError> {
        let mut refused = self.refused.lock().unwrap();
        match refused.as_deref() {
            None => {
                *refused = Some(credential.access_token.clone());
                Err(PushError::Unauthorized("401".to_string()))
            }
            Some(bad) if bad == credential.access_token => {
                Err(PushError::Unauthorized("401".to_string()))
            }
            Some(_) => {
                self.delivered.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    }
}

/// Issues a new token on every fetch.
struct CountingSource {
    fetches: AtomicUsize,
}

#[async_trait]
impl CredentialSource for CountingSource {
    fn name(&self) -> &str {
        "counting"
    }

    async fn fetch(&self) -> tether_messages::Result<Credential> {
        let n = self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(Credential::valid_for(format!("access-{}", n), Duration::from_secs(3600)))
    }
}

#[tokio::test]
async fn test_unauthorized_refreshes_credential_once() {
    let source = Arc::new(CountingSource {
        fetches: AtomicUsize::new(0),
    });
    let transport = Arc::new(RevokedOnce {
        refused: std::sync::Mutex::new(None),
        delivered: AtomicUsize::new(0),
    });
    let sender = sender_with(source.clone(), transport.clone());
    let parent = Recipient::authority("parent-1");
    sender.tokens().register(&parent, "token-1", None).await.unwrap();

    let reached = sender
        .send(&parent, EventKind::ApprovalGranted, &EventPayload::new())
        .await
        .unwrap();

    assert!(reached);
    assert_eq!(transport.delivered.load(Ordering::SeqCst), 1);
    assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    assert_eq!(sender.credentials().refresh_count(), 2);
}

#[tokio::test]
async fn test_device_recipient_uses_device_tokens() {
    let transport = MemoryPushTransport::new();
    let sender = sender_with(
        Arc::new(StaticCredentialSource::new("access")),
        Arc::new(transport.clone()),
    );
    sender
        .tokens()
        .register(&Recipient::authority("kid-1"), "authority-token", None)
        .await
        .unwrap();
    sender
        .tokens()
        .register(&Recipient::device("kid-1"), "device-token", None)
        .await
        .unwrap();

    sender
        .send(&Recipient::device("kid-1"), EventKind::ApprovalDenied, &EventPayload::new())
        .await
        .unwrap();

    let deliveries = transport.deliveries().await;
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].message.token, "device-token");
}
