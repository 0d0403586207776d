//! End-to-end scenarios over the in-memory harness.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use tether_approvals::{ApprovalStatus, Vote};
use tether_commands::{CommandStatus, CommandUpdate, SubscriptionEnd};
use tether_messages::{
    Credential, CredentialCache, CredentialSource, EventKind, EventPayload, PushError, Recipient,
};
use tether_testing::{init_tracing, Harness, ScriptedExecutor};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn scenario_command_completes_with_result() {
    init_tracing();
    let harness = Harness::new();
    harness
        .register_token(&Recipient::device("kid-1"), "kid-phone")
        .await;
    harness
        .register_token(&Recipient::authority("parent-a"), "parent-phone")
        .await;

    let dispatcher = harness.dispatcher("parent-a");
    let cid = dispatcher
        .issue("kid-1", "LIST_APPS", Value::Null)
        .await
        .unwrap();

    let updates = Arc::new(Mutex::new(Vec::<CommandUpdate>::new()));
    let sink = updates.clone();
    let subscription = harness.listener.subscribe("kid-1", &cid, move |update| {
        sink.lock().unwrap().push(update);
    });

    let executor = Arc::new(ScriptedExecutor::new().succeed(
        "LIST_APPS",
        json!("X"),
        Duration::from_millis(100),
    ));
    let runner = harness.executor("kid-1", executor.clone()).spawn();

    let end = tokio::time::timeout(WAIT, subscription.finished()).await.unwrap();
    assert_eq!(end, SubscriptionEnd::Terminal(CommandStatus::Completed));
    harness.settle().await;

    let updates = updates.lock().unwrap().clone();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].status, CommandStatus::Completed);
    assert_eq!(updates[0].result, Some(json!("X")));
    assert_eq!(executor.executed(), vec![cid.clone()]);

    // The device was woken and the issuer told about completion.
    assert_eq!(harness.transport.deliveries_of("COMMAND_ISSUED").await.len(), 1);
    let completed = harness.transport.deliveries_of("COMMAND_COMPLETED").await;
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].message.token, "parent-phone");
    assert_eq!(completed[0].message.data["correlationId"], cid);

    runner.abort();
}

#[tokio::test]
async fn scenario_offline_device_catches_up() {
    init_tracing();
    let harness = Harness::new();
    harness
        .register_token(&Recipient::device("kid-1"), "kid-phone")
        .await;
    harness
        .transport
        .fail_token("kid-phone", PushError::Transport("offline".to_string()))
        .await;

    let dispatcher = harness.dispatcher("parent-a");
    let first = dispatcher.issue("kid-1", "LOCATE", Value::Null).await.unwrap();
    let second = dispatcher.issue("kid-1", "WIPE", Value::Null).await.unwrap();
    harness.settle().await;
    assert_eq!(harness.transport.count().await, 0);

    let executor = Arc::new(ScriptedExecutor::new().succeed(
        "LOCATE",
        json!({"lat": 1.5}),
        Duration::ZERO,
    ));
    let ran = harness
        .executor("kid-1", executor.clone())
        .run_pending()
        .await
        .unwrap();
    assert_eq!(ran, 2);

    let first = harness.channel.get("kid-1", &first).await.unwrap().unwrap();
    let second = harness.channel.get("kid-1", &second).await.unwrap().unwrap();
    assert_eq!(first.status, CommandStatus::Completed);
    assert_eq!(second.status, CommandStatus::Failed);
    assert_eq!(second.error_message.as_deref(), Some("unsupported command WIPE"));
}

async fn approval_with_two_authorities(harness: &Harness) -> String {
    harness.link("kid-1", "parent-a").await;
    harness.link("kid-1", "parent-b").await;
    harness
        .register_token(&Recipient::device("kid-1"), "kid-phone")
        .await;
    harness
        .consensus
        .create_request("kid-1", Some("install game"))
        .await
        .unwrap()
        .request_id
}

#[tokio::test]
async fn scenario_approve_then_reject() {
    init_tracing();
    let harness = Harness::new();
    let rid = approval_with_two_authorities(&harness).await;

    let a = harness
        .consensus
        .cast_vote("kid-1", &rid, "parent-a", Vote::Approved)
        .await
        .unwrap();
    assert_eq!(a.status, ApprovalStatus::Partial);

    let b = harness
        .consensus
        .cast_vote("kid-1", &rid, "parent-b", Vote::Rejected)
        .await
        .unwrap();
    assert_eq!(b.status, ApprovalStatus::Rejected);
    assert!(b.transitioned);
    harness.settle().await;

    let denied = harness.transport.deliveries_of("APPROVAL_DENIED").await;
    assert_eq!(denied.len(), 1);
    assert_eq!(denied[0].message.data["requestId"], rid);
    assert!(harness.transport.deliveries_of("APPROVAL_GRANTED").await.is_empty());

    let stored = harness
        .consensus
        .get_request("kid-1", &rid)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, ApprovalStatus::Rejected);
}

#[tokio::test]
async fn scenario_both_approve_in_reverse_order() {
    init_tracing();
    let harness = Harness::builder().notify_partial(false).build();
    let rid = approval_with_two_authorities(&harness).await;

    let b = harness
        .consensus
        .cast_vote("kid-1", &rid, "parent-b", Vote::Approved)
        .await
        .unwrap();
    assert!(!b.transitioned);
    let a = harness
        .consensus
        .cast_vote("kid-1", &rid, "parent-a", Vote::Approved)
        .await
        .unwrap();
    assert_eq!(a.status, ApprovalStatus::Approved);
    assert!(a.transitioned);
    harness.settle().await;

    // Only the outcome reached the subject device.
    let to_kid: Vec<_> = harness
        .transport
        .deliveries()
        .await
        .into_iter()
        .filter(|d| d.message.token == "kid-phone")
        .collect();
    assert_eq!(to_kid.len(), 1);
    assert_eq!(to_kid[0].message.event_kind(), Some("APPROVAL_GRANTED"));
}

#[tokio::test]
async fn scenario_fanout_with_dead_token() {
    init_tracing();
    let harness = Harness::new();
    let parent = Recipient::authority("parent-a");
    for token in ["token-1", "token-2", "token-3"] {
        harness.register_token(&parent, token).await;
    }
    harness
        .transport
        .fail_token("token-2", PushError::Unregistered("NOT_FOUND".to_string()))
        .await;

    let report = harness
        .sender
        .send_report(
            &parent,
            EventKind::GeofenceAlert,
            &EventPayload::new()
                .with_subject("kid-1")
                .with_extra("zone", "school")
                .with_extra("transition", "left"),
        )
        .await
        .unwrap();

    assert!(report.succeeded());
    assert_eq!(report.delivered.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].token, "token-2");
    assert_eq!(harness.transport.count().await, 2);
}

/// First credential expires in four minutes, later ones in an hour.
struct ShortLivedFirst {
    fetches: AtomicUsize,
}

#[async_trait]
impl CredentialSource for ShortLivedFirst {
    fn name(&self) -> &str {
        "short-lived-first"
    }

    async fn fetch(&self) -> tether_messages::Result<Credential> {
        let n = self.fetches.fetch_add(1, Ordering::SeqCst);
        let ttl = if n == 0 {
            chrono::Duration::minutes(4)
        } else {
            chrono::Duration::hours(1)
        };
        Ok(Credential::new(format!("access-{}", n), Utc::now() + ttl))
    }
}

#[tokio::test]
async fn scenario_credential_inside_refresh_buffer() {
    let source = Arc::new(ShortLivedFirst {
        fetches: AtomicUsize::new(0),
    });
    let cache = CredentialCache::new(source.clone());

    let expiring = cache.get().await.unwrap();
    assert_eq!(expiring.access_token, "access-0");
    assert_eq!(cache.refresh_count(), 1);

    let refreshed = cache.get().await.unwrap();
    assert_eq!(cache.refresh_count(), 2);
    assert_eq!(refreshed.access_token, "access-1");

    // Outside the buffer now: the same instance comes back.
    let again = cache.get().await.unwrap();
    assert!(Arc::ptr_eq(&refreshed, &again));
    assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn scenario_unanswered_command_times_out_locally() {
    let harness = Harness::new();
    let cid = harness
        .dispatcher("parent-a")
        .issue("kid-1", "LOCATE", Value::Null)
        .await
        .unwrap();

    let result = harness
        .listener
        .await_terminal("kid-1", &cid, Duration::from_millis(100))
        .await;
    assert!(matches!(
        result,
        Err(tether_commands::Error::ExecutorTimeout { .. })
    ));
    let command = harness.channel.get("kid-1", &cid).await.unwrap().unwrap();
    assert_eq!(command.status, CommandStatus::Pending);
}
