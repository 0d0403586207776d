//! Which authorities supervise a subject.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tether_core::paths;
use tether_storage::{DocumentStore, DocumentStoreExt};

use crate::{Error, Result};

/// Source of the authority set snapshotted into new approval requests.
#[async_trait]
pub trait AuthorityDirectory: Send + Sync {
    /// Authorities currently linked to `subject`, sorted.
    async fn authorities_for(&self, subject: &str) -> Result<Vec<String>>;
}

/// Link document under `devices/{subject}/authorities/{authority}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorityLink {
    pub authority_id: String,
    pub linked_at: DateTime<Utc>,
}

/// Reads authority links from the shared store.
#[derive(Clone)]
pub struct StoreAuthorityDirectory {
    store: Arc<dyn DocumentStore>,
}

impl StoreAuthorityDirectory {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn link(&self, subject: &str, authority: &str) -> Result<()> {
        let path = paths::authority_link(subject, authority);
        let link = AuthorityLink {
            authority_id: authority.to_string(),
            linked_at: Utc::now(),
        };
        self.store
            .put_as(&path, &link)
            .await
            .map_err(|e| Error::from_write(&path, e))?;
        tracing::info!(subject_device_id = %subject, authority_id = %authority, "Authority linked");
        Ok(())
    }

    /// Remove a link. Requests created earlier keep their snapshot.
    pub async fn unlink(&self, subject: &str, authority: &str) -> Result<bool> {
        let path = paths::authority_link(subject, authority);
        self.store
            .delete(&path)
            .await
            .map_err(|e| Error::from_write(&path, e))
    }
}

#[async_trait]
impl AuthorityDirectory for StoreAuthorityDirectory {
    async fn authorities_for(&self, subject: &str) -> Result<Vec<String>> {
        let path = paths::authority_links(subject);
        let links: Vec<AuthorityLink> = self
            .store
            .list_as(&path)
            .await
            .map_err(|e| Error::from_read(&path, e))?;
        let mut ids: Vec<String> = links.into_iter().map(|l| l.authority_id).collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}

/// Fixed directory, for tests and embedded setups.
#[derive(Debug, Clone, Default)]
pub struct StaticAuthorityDirectory {
    links: HashMap<String, Vec<String>>,
}

impl StaticAuthorityDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_link(mut self, subject: impl Into<String>, authority: impl Into<String>) -> Self {
        self.links
            .entry(subject.into())
            .or_default()
            .push(authority.into());
        self
    }
}

#[async_trait]
impl AuthorityDirectory for StaticAuthorityDirectory {
    async fn authorities_for(&self, subject: &str) -> Result<Vec<String>> {
        let mut ids = self.links.get(subject).cloned().unwrap_or_default();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}
