//! Behaviour shared by every document store backend.
//!
//! Each check runs against the memory and redb backends.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use tether_storage::{
    ChangeEvent, DocumentStore, DocumentStoreExt, Error, MemoryDocumentStore, RedbDocumentStore,
};

fn backends() -> Vec<(Arc<dyn DocumentStore>, Option<tempfile::TempDir>)> {
    let dir = tempfile::tempdir().unwrap();
    let redb = RedbDocumentStore::open(dir.path().join("store.redb")).unwrap();
    vec![
        (Arc::new(MemoryDocumentStore::new()), None),
        (Arc::new(redb), Some(dir)),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Counter {
    value: u64,
}

#[tokio::test]
async fn test_create_get_put_delete() {
    for (store, _dir) in backends() {
        let path = "devices/d1/commands/c1";
        assert_eq!(store.get(path).await.unwrap(), None);

        store.create(path, json!({"status": "PENDING"})).await.unwrap();
        assert!(matches!(
            store.create(path, json!({})).await,
            Err(Error::AlreadyExists(_))
        ));

        store.put(path, json!({"status": "COMPLETED"})).await.unwrap();
        assert_eq!(
            store.get(path).await.unwrap(),
            Some(json!({"status": "COMPLETED"}))
        );

        assert!(store.delete(path).await.unwrap());
        assert_eq!(store.get(path).await.unwrap(), None, "{}", store.backend_name());
    }
}

#[tokio::test]
async fn test_set_field_requires_existing_document() {
    for (store, _dir) in backends() {
        let result = store
            .set_field("devices/d1/approvalRequests/r1", &["approvals", "a"], json!("APPROVED"))
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}

#[tokio::test]
async fn test_invalid_paths_rejected() {
    for (store, _dir) in backends() {
        assert!(matches!(
            store.get("devices//commands/c1").await,
            Err(Error::InvalidPath(_))
        ));
        assert!(matches!(
            store.put("", json!({})).await,
            Err(Error::InvalidPath(_))
        ));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_disjoint_field_writes_all_land() {
    for (store, _dir) in backends() {
        let path = "devices/d1/approvalRequests/r1";
        let voters: Vec<String> = (0..16).map(|i| format!("authority-{}", i)).collect();
        let approvals: serde_json::Map<String, Value> = voters
            .iter()
            .map(|v| (v.clone(), json!("PENDING")))
            .collect();
        store
            .create(path, json!({"approvals": approvals, "status": "PENDING"}))
            .await
            .unwrap();

        let handles: Vec<_> = voters
            .iter()
            .cloned()
            .map(|voter| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .set_field(path, &["approvals", voter.as_str()], json!("APPROVED"))
                        .await
                })
            })
            .collect();
        for handle in futures::future::join_all(handles).await {
            handle.unwrap().unwrap();
        }

        let doc = store.get(path).await.unwrap().unwrap();
        for voter in &voters {
            assert_eq!(doc["approvals"][voter], "APPROVED", "{}", store.backend_name());
        }
        assert_eq!(doc["status"], "PENDING");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_updates_do_not_lose_writes() {
    for (store, _dir) in backends() {
        let path = "counters/c";
        store.create_as(path, &Counter { value: 0 }).await.unwrap();

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .update_as(path, |c: &mut Counter| {
                            c.value += 1;
                            Ok(())
                        })
                        .await
                })
            })
            .collect();
        for handle in futures::future::join_all(handles).await {
            handle.unwrap().unwrap();
        }

        let counter: Counter = store.get_as(path).await.unwrap().unwrap();
        assert_eq!(counter.value, 50, "{}", store.backend_name());
    }
}

#[tokio::test]
async fn test_aborted_update_leaves_document_untouched() {
    for (store, _dir) in backends() {
        let path = "counters/c";
        store.create_as(path, &Counter { value: 7 }).await.unwrap();

        let result = store
            .update_as(path, |c: &mut Counter| {
                c.value = 0;
                Err(Error::Aborted("refused".to_string()))
            })
            .await;
        assert!(matches!(result, Err(Error::Aborted(_))));

        let counter: Counter = store.get_as(path).await.unwrap().unwrap();
        assert_eq!(counter.value, 7);
    }
}

#[tokio::test]
async fn test_change_feed_reports_committed_writes_in_order() {
    for (store, _dir) in backends() {
        let mut rx = store.changes();
        let path = "devices/d1/commands/c1";

        store.create(path, json!({"status": "PENDING"})).await.unwrap();
        store
            .update(path, &mut |doc: &mut Value| {
                doc["status"] = json!("COMPLETED");
                Ok(())
            })
            .await
            .unwrap();
        store.delete(path).await.unwrap();

        let mut seen = Vec::new();
        for _ in 0..3 {
            match rx.recv().await.unwrap() {
                ChangeEvent::Changed(change) => {
                    assert_eq!(change.path, path);
                    seen.push(change.document.map(|d| d["status"].clone()));
                }
                ChangeEvent::Lagged(n) => panic!("unexpected lag of {}", n),
            }
        }
        assert_eq!(
            seen,
            vec![Some(json!("PENDING")), Some(json!("COMPLETED")), None]
        );
    }
}

#[tokio::test]
async fn test_list_as_skips_malformed_documents() {
    for (store, _dir) in backends() {
        store.put("counters/a", json!({"value": 1})).await.unwrap();
        store.put("counters/b", json!({"unexpected": true})).await.unwrap();
        store.put("counters/c", json!({"value": 3})).await.unwrap();

        let counters: Vec<Counter> = store.list_as("counters").await.unwrap();
        assert_eq!(counters, vec![Counter { value: 1 }, Counter { value: 3 }]);
    }
}
