//! Redb document store.
//!
//! Provides persistent storage using the redb embedded database. All
//! documents live in one table keyed by path; every mutating operation is a
//! single redb write transaction, which redb serializes.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use serde_json::Value;

use crate::feed::{ChangeFeed, ChangeReceiver};
use crate::store::{check_path, is_direct_child, DocumentStore, Mutator};
use crate::{fields, Error, Result};

// Documents table: key = document path, value = document (serialized as JSON)
const DOCUMENTS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("documents");

/// Configuration for [`RedbDocumentStore`].
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct RedbStoreConfig {
    /// Path to the database file.
    pub path: String,

    /// Create parent directories if they don't exist.
    #[serde(default = "default_create_dirs")]
    pub create_dirs: bool,

    /// Change feed buffer size.
    #[serde(default = "default_feed_capacity")]
    pub feed_capacity: usize,
}

fn default_create_dirs() -> bool {
    true
}

fn default_feed_capacity() -> usize {
    tether_core::config::defaults::CHANGE_FEED_CAPACITY
}

impl RedbStoreConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            create_dirs: true,
            feed_capacity: default_feed_capacity(),
        }
    }

    pub fn with_feed_capacity(mut self, capacity: usize) -> Self {
        self.feed_capacity = capacity;
        self
    }
}

/// redb-backed persistent document store.
pub struct RedbDocumentStore {
    db: Arc<Database>,
    path: PathBuf,
    feed: ChangeFeed,
    /// Held from transaction begin until the change is published, so feed
    /// order matches commit order.
    write_gate: Mutex<()>,
}

impl RedbDocumentStore {
    /// Open or create a store with the given configuration.
    pub fn new(config: RedbStoreConfig) -> Result<Self> {
        let path = PathBuf::from(&config.path);
        if config.create_dirs {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::Storage(format!("Failed to create directory: {}", e)))?;
            }
        }

        let db = Database::create(&path)?;

        // Create the table up front so read transactions never miss it.
        let write_txn = db.begin_write()?;
        {
            write_txn.open_table(DOCUMENTS_TABLE)?;
        }
        write_txn.commit()?;

        tracing::debug!(path = %path.display(), "Opened redb document store");

        Ok(Self {
            db: Arc::new(db),
            path,
            feed: ChangeFeed::with_capacity(config.feed_capacity),
            write_gate: Mutex::new(()),
        })
    }

    /// Open or create a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(RedbStoreConfig::new(
            path.as_ref().to_string_lossy().to_string(),
        ))
    }

    /// Database file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run one write transaction with the current document and publish the result.
    ///
    /// `apply` returns the document to store (`None` deletes) and the value
    /// handed back to the caller.
    fn write_with<R>(
        &self,
        path: &str,
        apply: impl FnOnce(Option<Value>) -> Result<(Option<Value>, R)>,
    ) -> Result<R> {
        let _gate = self
            .write_gate
            .lock()
            .map_err(|_| Error::Storage("Write gate poisoned".to_string()))?;

        let write_txn = self.db.begin_write()?;
        let (next, output, changed) = {
            let mut table = write_txn.open_table(DOCUMENTS_TABLE)?;
            let current: Option<Value> = match table.get(path)? {
                Some(raw) => Some(serde_json::from_str(raw.value())?),
                None => None,
            };

            let (next, output) = apply(current.clone())?;
            let changed = next != current;
            if changed {
                match &next {
                    Some(document) => {
                        let json = serde_json::to_string(document)?;
                        table.insert(path, json.as_str())?;
                    }
                    None => {
                        table.remove(path)?;
                    }
                }
            }
            (next, output, changed)
        };

        if changed {
            write_txn.commit()?;
            self.feed.publish(path, next);
        } else {
            write_txn.abort()?;
        }
        Ok(output)
    }
}

#[async_trait]
impl DocumentStore for RedbDocumentStore {
    fn backend_name(&self) -> &str {
        "redb"
    }

    async fn create(&self, path: &str, document: Value) -> Result<()> {
        check_path(path)?;
        self.write_with(path, |current| match current {
            Some(_) => Err(Error::AlreadyExists(path.to_string())),
            None => Ok((Some(document), ())),
        })
    }

    async fn get(&self, path: &str) -> Result<Option<Value>> {
        check_path(path)?;
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DOCUMENTS_TABLE)?;
        match table.get(path)? {
            Some(raw) => Ok(Some(serde_json::from_str(raw.value())?)),
            None => Ok(None),
        }
    }

    async fn put(&self, path: &str, document: Value) -> Result<()> {
        check_path(path)?;
        self.write_with(path, |_| Ok((Some(document), ())))
    }

    async fn set_field(&self, path: &str, field: &[&str], value: Value) -> Result<()> {
        check_path(path)?;
        self.write_with(path, |current| {
            let mut document = current.ok_or_else(|| Error::NotFound(path.to_string()))?;
            fields::set_field(path, &mut document, field, value)?;
            Ok((Some(document), ()))
        })
    }

    async fn update(&self, path: &str, mutator: Mutator<'_>) -> Result<Value> {
        check_path(path)?;
        self.write_with(path, |current| {
            let mut document = current.ok_or_else(|| Error::NotFound(path.to_string()))?;
            mutator(&mut document)?;
            Ok((Some(document.clone()), document))
        })
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        check_path(path)?;
        self.write_with(path, |current| Ok((None, current.is_some())))
    }

    async fn list(&self, collection: &str) -> Result<Vec<(String, Value)>> {
        check_path(collection)?;
        let prefix = format!("{}/", collection);
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DOCUMENTS_TABLE)?;

        let mut documents = Vec::new();
        for entry in table.range(prefix.as_str()..)? {
            let (key, value) = entry?;
            let key = key.value();
            if !key.starts_with(&prefix) {
                break;
            }
            if is_direct_child(collection, key) {
                documents.push((key.to_string(), serde_json::from_str(value.value())?));
            }
        }
        Ok(documents)
    }

    fn changes(&self) -> ChangeReceiver {
        self.feed.subscribe()
    }
}
