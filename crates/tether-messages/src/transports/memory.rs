//! Memory push transport (for testing).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{PushMessage, PushTransport};
use crate::credential::Credential;
use crate::error::PushError;

/// A recorded delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub message: PushMessage,
    /// Access token the delivery was authorized with.
    pub access_token: String,
}

#[derive(Debug, Default)]
struct State {
    delivered: Vec<Delivery>,
    failures: HashMap<String, PushError>,
    attempts: usize,
}

/// Records deliveries in memory; failures can be scripted per token.
#[derive(Debug, Clone, Default)]
pub struct MemoryPushTransport {
    state: Arc<Mutex<State>>,
}

impl MemoryPushTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every delivery to `token` fail with `error`.
    pub async fn fail_token(&self, token: impl Into<String>, error: PushError) {
        self.state.lock().await.failures.insert(token.into(), error);
    }

    /// Let deliveries to `token` succeed again.
    pub async fn heal_token(&self, token: &str) {
        self.state.lock().await.failures.remove(token);
    }

    pub async fn deliveries(&self) -> Vec<Delivery> {
        self.state.lock().await.delivered.clone()
    }

    /// Deliveries whose `eventKind` data field equals `kind`.
    pub async fn deliveries_of(&self, kind: &str) -> Vec<Delivery> {
        self.state
            .lock()
            .await
            .delivered
            .iter()
            .filter(|d| d.message.event_kind() == Some(kind))
            .cloned()
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.state.lock().await.delivered.len()
    }

    /// Attempts made, successful or not.
    pub async fn attempts(&self) -> usize {
        self.state.lock().await.attempts
    }

    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.delivered.clear();
        state.attempts = 0;
    }
}

#[async_trait]
impl PushTransport for MemoryPushTransport {
    fn name(&self) -> &str {
        "memory"
    }

    async fn deliver(
        &self,
        credential: &Credential,
        message: &PushMessage,
    ) -> std::result::Result<(), PushError> {
        let mut state = self.state.lock().await;
        state.attempts += 1;
        if let Some(error) = state.failures.get(&message.token) {
            return Err(error.clone());
        }
        state.delivered.push(Delivery {
            message: message.clone(),
            access_token: credential.access_token.clone(),
        });
        Ok(())
    }
}
