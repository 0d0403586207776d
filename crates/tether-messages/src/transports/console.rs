//! Console push transport.

use async_trait::async_trait;

use super::{PushMessage, PushTransport};
use crate::credential::Credential;
use crate::error::PushError;
use crate::tokens::mask_token;

/// Logs push messages instead of sending them. Used when no push endpoint
/// is configured.
#[derive(Debug, Clone)]
pub struct ConsolePushTransport {
    include_data: bool,
}

impl ConsolePushTransport {
    pub fn new() -> Self {
        Self { include_data: true }
    }

    pub fn with_data(mut self, include: bool) -> Self {
        self.include_data = include;
        self
    }
}

impl Default for ConsolePushTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PushTransport for ConsolePushTransport {
    fn name(&self) -> &str {
        "console"
    }

    async fn deliver(
        &self,
        _credential: &Credential,
        message: &PushMessage,
    ) -> std::result::Result<(), PushError> {
        if self.include_data {
            tracing::info!(
                token = %mask_token(&message.token),
                title = %message.notification.title,
                body = %message.notification.body,
                data = ?message.data,
                "Push"
            );
        } else {
            tracing::info!(
                token = %mask_token(&message.token),
                title = %message.notification.title,
                body = %message.notification.body,
                "Push"
            );
        }
        Ok(())
    }
}
