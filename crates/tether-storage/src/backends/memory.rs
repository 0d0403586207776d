//! In-memory document store.
//!
//! Per-document atomicity comes from the `DashMap` shard lock held for the
//! whole read-modify-write; changes are published while that lock is held
//! so subscribers observe writes to one document in commit order.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;

use crate::feed::{ChangeFeed, ChangeReceiver};
use crate::store::{check_path, is_direct_child, DocumentStore, Mutator};
use crate::{fields, Error, Result};

/// Volatile store for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: DashMap<String, Value>,
    feed: ChangeFeed,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_feed_capacity(capacity: usize) -> Self {
        Self {
            documents: DashMap::new(),
            feed: ChangeFeed::with_capacity(capacity),
        }
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    fn backend_name(&self) -> &str {
        "memory"
    }

    async fn create(&self, path: &str, document: Value) -> Result<()> {
        check_path(path)?;
        match self.documents.entry(path.to_string()) {
            Entry::Occupied(_) => Err(Error::AlreadyExists(path.to_string())),
            Entry::Vacant(vacant) => {
                let stored = vacant.insert(document);
                self.feed.publish(path, Some(stored.value().clone()));
                Ok(())
            }
        }
    }

    async fn get(&self, path: &str) -> Result<Option<Value>> {
        check_path(path)?;
        Ok(self.documents.get(path).map(|doc| doc.value().clone()))
    }

    async fn put(&self, path: &str, document: Value) -> Result<()> {
        check_path(path)?;
        let stored = self
            .documents
            .entry(path.to_string())
            .and_modify(|existing| *existing = document.clone())
            .or_insert_with(|| document.clone());
        self.feed.publish(path, Some(stored.value().clone()));
        Ok(())
    }

    async fn set_field(&self, path: &str, field: &[&str], value: Value) -> Result<()> {
        check_path(path)?;
        let mut doc = self
            .documents
            .get_mut(path)
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        fields::set_field(path, doc.value_mut(), field, value)?;
        self.feed.publish(path, Some(doc.value().clone()));
        Ok(())
    }

    async fn update(&self, path: &str, mutator: Mutator<'_>) -> Result<Value> {
        check_path(path)?;
        let mut doc = self
            .documents
            .get_mut(path)
            .ok_or_else(|| Error::NotFound(path.to_string()))?;

        // Mutate a copy so an aborted transaction leaves no trace.
        let mut working = doc.value().clone();
        mutator(&mut working)?;
        if working != *doc.value() {
            *doc.value_mut() = working.clone();
            self.feed.publish(path, Some(working.clone()));
        }
        Ok(working)
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        check_path(path)?;
        // Publish under the shard lock to keep feed order.
        match self.documents.entry(path.to_string()) {
            Entry::Occupied(occupied) => {
                occupied.remove();
                self.feed.publish(path, None);
                Ok(true)
            }
            Entry::Vacant(_) => Ok(false),
        }
    }

    async fn list(&self, collection: &str) -> Result<Vec<(String, Value)>> {
        check_path(collection)?;
        let mut documents: Vec<(String, Value)> = self
            .documents
            .iter()
            .filter(|entry| is_direct_child(collection, entry.key()))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        documents.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(documents)
    }

    fn changes(&self) -> ChangeReceiver {
        self.feed.subscribe()
    }
}
