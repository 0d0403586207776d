//! Document store abstraction.
//!
//! The store is the single source of truth shared by authorities and subject
//! devices. Consistency is guaranteed per document only: there is no
//! cross-document transaction.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::feed::ChangeReceiver;
use crate::{Error, Result};

/// Read-modify-write callback used by [`DocumentStore::update`].
///
/// The callback sees the current document and mutates it in place. Returning
/// an error aborts the transaction and nothing is written.
pub type Mutator<'a> = &'a mut (dyn FnMut(&mut Value) -> Result<()> + Send);

/// A JSON document store addressed by `/`-separated paths.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Backend name for logs.
    fn backend_name(&self) -> &str;

    /// Create a document. Fails with [`Error::AlreadyExists`] if present.
    async fn create(&self, path: &str, document: Value) -> Result<()>;

    /// Read a document.
    async fn get(&self, path: &str) -> Result<Option<Value>>;

    /// Write a document unconditionally.
    async fn put(&self, path: &str, document: Value) -> Result<()>;

    /// Merge a single (possibly nested) field into an existing document.
    async fn set_field(&self, path: &str, field: &[&str], value: Value) -> Result<()>;

    /// Atomically read, mutate and write one document.
    ///
    /// Concurrent updates of the same document are serialized. Returns the
    /// committed document.
    async fn update(&self, path: &str, mutator: Mutator<'_>) -> Result<Value>;

    /// Delete a document. Returns whether it existed.
    async fn delete(&self, path: &str) -> Result<bool>;

    /// List the documents directly below a collection path, ordered by path.
    async fn list(&self, collection: &str) -> Result<Vec<(String, Value)>>;

    /// Subscribe to committed writes.
    fn changes(&self) -> ChangeReceiver;
}

/// Typed helpers over any [`DocumentStore`].
#[async_trait]
pub trait DocumentStoreExt: DocumentStore {
    /// Read and deserialize a document.
    async fn get_as<T>(&self, path: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(path).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Serialize and create a document.
    async fn create_as<T>(&self, path: &str, document: &T) -> Result<()>
    where
        T: Serialize + Sync,
    {
        self.create(path, serde_json::to_value(document)?).await
    }

    /// Serialize and write a document.
    async fn put_as<T>(&self, path: &str, document: &T) -> Result<()>
    where
        T: Serialize + Sync,
    {
        self.put(path, serde_json::to_value(document)?).await
    }

    /// Atomic read-modify-write on the typed form of a document.
    async fn update_as<T, F>(&self, path: &str, mut f: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnMut(&mut T) -> Result<()> + Send,
    {
        let mut mutator = |doc: &mut Value| -> Result<()> {
            let mut typed: T = serde_json::from_value(doc.clone())?;
            f(&mut typed)?;
            *doc = serde_json::to_value(&typed)?;
            Ok(())
        };
        let committed = self.update(path, &mut mutator).await?;
        Ok(serde_json::from_value(committed)?)
    }

    /// List and deserialize a collection, skipping documents of another shape.
    async fn list_as<T>(&self, collection: &str) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send,
    {
        let documents = self.list(collection).await?;
        let mut items = Vec::with_capacity(documents.len());
        for (path, value) in documents {
            match serde_json::from_value(value) {
                Ok(item) => items.push(item),
                Err(e) => tracing::warn!(path = %path, error = %e, "Skipping malformed document"),
            }
        }
        Ok(items)
    }
}

impl<S: DocumentStore + ?Sized> DocumentStoreExt for S {}

/// Validate a document path before touching a backend.
pub(crate) fn check_path(path: &str) -> Result<()> {
    if tether_core::paths::is_valid(path) {
        Ok(())
    } else {
        Err(Error::InvalidPath(path.to_string()))
    }
}

/// Whether `path` is a direct child of `collection`.
pub(crate) fn is_direct_child(collection: &str, path: &str) -> bool {
    path.strip_prefix(collection)
        .and_then(|rest| rest.strip_prefix('/'))
        .is_some_and(|id| !id.is_empty() && !id.contains('/'))
}
