//! Push transports.
//!
//! A transport delivers one rendered message to one token. Failures are
//! classified as [`PushError`] so the fan-out can tell a dead token from a
//! refused credential.

pub mod console;
pub mod memory;

#[cfg(feature = "http")]
pub mod http;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::credential::Credential;
use crate::error::PushError;
use crate::event::RenderedEvent;

pub use console::ConsolePushTransport;
pub use memory::{Delivery, MemoryPushTransport};

#[cfg(feature = "http")]
pub use http::HttpPushTransport;

/// Notification block shown by the receiving device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    High,
    Normal,
}

/// One message addressed to one token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    pub token: String,
    pub notification: Notification,
    pub data: BTreeMap<String, String>,
    pub priority: Priority,
}

impl PushMessage {
    pub fn new(token: impl Into<String>, event: &RenderedEvent) -> Self {
        Self {
            token: token.into(),
            notification: Notification {
                title: event.title.clone(),
                body: event.body.clone(),
            },
            data: event.data.clone(),
            priority: Priority::High,
        }
    }

    /// `eventKind` data field, if set.
    pub fn event_kind(&self) -> Option<&str> {
        self.data.get("eventKind").map(String::as_str)
    }
}

/// Delivers push messages.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Transport name for logs.
    fn name(&self) -> &str;

    /// Deliver one message using the given bearer credential.
    async fn deliver(
        &self,
        credential: &Credential,
        message: &PushMessage,
    ) -> std::result::Result<(), PushError>;
}
