//! Push token registry.
//!
//! A recipient owns zero or more device tokens, one document per token
//! under the recipient's `tokens` collection. Tokens are added when a device
//! instance starts observing and removed on sign-out; nothing expires them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tether_core::paths;
use tether_storage::{DocumentStore, DocumentStoreExt};

use crate::{Error, Result};

/// Logical identity that owns push tokens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Recipient {
    /// A supervising authority.
    Authority(String),
    /// A subject device.
    Device(String),
}

impl Recipient {
    pub fn authority(id: impl Into<String>) -> Self {
        Recipient::Authority(id.into())
    }

    pub fn device(id: impl Into<String>) -> Self {
        Recipient::Device(id.into())
    }

    pub fn id(&self) -> &str {
        match self {
            Recipient::Authority(id) | Recipient::Device(id) => id,
        }
    }

    /// Collection holding this recipient's token documents.
    pub fn tokens_path(&self) -> String {
        match self {
            Recipient::Authority(id) => paths::authority_tokens(id),
            Recipient::Device(id) => paths::device_tokens(id),
        }
    }

    pub fn token_path(&self, token: &str) -> String {
        match self {
            Recipient::Authority(id) => paths::authority_token(id, token),
            Recipient::Device(id) => paths::device_token(id, token),
        }
    }
}

impl std::fmt::Display for Recipient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Recipient::Authority(id) => write!(f, "authority {}", id),
            Recipient::Device(id) => write!(f, "device {}", id),
        }
    }
}

/// Stored token document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    pub token: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub device_label: Option<String>,
}

/// Shorten a token for logs.
pub fn mask_token(token: &str) -> String {
    let prefix: String = token.chars().take(8).collect();
    if prefix.len() < token.len() {
        format!("{}...", prefix)
    } else {
        prefix
    }
}

/// Reads and writes recipients' push tokens in the shared store.
#[derive(Clone)]
pub struct TokenRegistry {
    store: Arc<dyn DocumentStore>,
}

impl TokenRegistry {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Register (or refresh) a token for a recipient.
    pub async fn register(
        &self,
        recipient: &Recipient,
        token: &str,
        device_label: Option<&str>,
    ) -> Result<TokenRecord> {
        validate_token(token)?;
        let record = TokenRecord {
            token: token.to_string(),
            updated_at: Utc::now(),
            device_label: device_label.map(str::to_string),
        };
        self.store
            .put_as(&recipient.token_path(token), &record)
            .await?;
        tracing::debug!(recipient = %recipient, token = %mask_token(token), "Registered push token");
        Ok(record)
    }

    /// Remove a token. Returns whether it was registered.
    pub async fn unregister(&self, recipient: &Recipient, token: &str) -> Result<bool> {
        validate_token(token)?;
        let removed = self.store.delete(&recipient.token_path(token)).await?;
        if removed {
            tracing::debug!(recipient = %recipient, token = %mask_token(token), "Removed push token");
        }
        Ok(removed)
    }

    /// Token documents currently registered for a recipient.
    pub async fn records(&self, recipient: &Recipient) -> Result<Vec<TokenRecord>> {
        Ok(self.store.list_as(&recipient.tokens_path()).await?)
    }

    /// Token values currently registered for a recipient.
    pub async fn tokens(&self, recipient: &Recipient) -> Result<Vec<String>> {
        Ok(self
            .records(recipient)
            .await?
            .into_iter()
            .map(|record| record.token)
            .collect())
    }
}

fn validate_token(token: &str) -> Result<()> {
    if token.is_empty() || token.contains('/') {
        return Err(Error::InvalidToken(mask_token(token)));
    }
    Ok(())
}
