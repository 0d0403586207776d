//! Fan-out delivery to every token of a recipient.
//!
//! Each token is attempted concurrently and independently. A delivery
//! failure on one token is logged and never stops the others; the fan-out
//! succeeds when at least one token was reached. Failing to obtain a
//! credential aborts the whole attempt.

use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, warn};

use crate::credential::CredentialCache;
use crate::error::PushError;
use crate::event::{EventKind, EventPayload};
use crate::tokens::{mask_token, Recipient, TokenRegistry};
use crate::transports::{PushMessage, PushTransport};
use crate::{Error, Result};

/// A token that could not be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub token: String,
    pub error: PushError,
}

impl From<DeliveryFailure> for Error {
    fn from(failure: DeliveryFailure) -> Self {
        Error::Delivery {
            token: mask_token(&failure.token),
            reason: failure.error,
        }
    }
}

/// Per-token outcome of one fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanoutReport {
    pub recipient: Recipient,
    pub kind: EventKind,
    pub delivered: Vec<String>,
    pub failed: Vec<DeliveryFailure>,
    /// Tokens removed from the registry because the push service dropped them.
    pub pruned: Vec<String>,
}

impl FanoutReport {
    /// At least one token was reached.
    pub fn succeeded(&self) -> bool {
        !self.delivered.is_empty()
    }

    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }
}

/// Sends one logical event to every token of a recipient.
pub struct FanoutSender {
    tokens: TokenRegistry,
    credentials: Arc<CredentialCache>,
    transport: Arc<dyn PushTransport>,
    prune_unregistered: bool,
}

impl FanoutSender {
    pub fn new(
        tokens: TokenRegistry,
        credentials: Arc<CredentialCache>,
        transport: Arc<dyn PushTransport>,
    ) -> Self {
        Self {
            tokens,
            credentials,
            transport,
            prune_unregistered: false,
        }
    }

    /// Remove tokens the push service reports as unregistered.
    pub fn with_pruning(mut self, prune: bool) -> Self {
        self.prune_unregistered = prune;
        self
    }

    pub fn tokens(&self) -> &TokenRegistry {
        &self.tokens
    }

    pub fn credentials(&self) -> &Arc<CredentialCache> {
        &self.credentials
    }

    /// Deliver and report whether any token was reached.
    ///
    /// Fails with [`Error::NoRecipients`] when nothing is registered and with
    /// [`Error::Credential`] when no credential could be obtained.
    pub async fn send(
        &self,
        recipient: &Recipient,
        kind: EventKind,
        payload: &EventPayload,
    ) -> Result<bool> {
        Ok(self.send_report(recipient, kind, payload).await?.succeeded())
    }

    /// Deliver and report per-token outcomes.
    pub async fn send_report(
        &self,
        recipient: &Recipient,
        kind: EventKind,
        payload: &EventPayload,
    ) -> Result<FanoutReport> {
        let tokens = self.tokens.tokens(recipient).await?;
        if tokens.is_empty() {
            return Err(Error::NoRecipients(recipient.to_string()));
        }

        let event = kind.render(payload);
        let attempts = tokens.into_iter().map(|token| {
            let message = PushMessage::new(token, &event);
            async move {
                let outcome = self.deliver_one(&message).await?;
                Ok::<_, Error>((message.token, outcome))
            }
        });
        let outcomes = try_join_all(attempts).await?;

        let mut report = FanoutReport {
            recipient: recipient.clone(),
            kind,
            delivered: Vec::new(),
            failed: Vec::new(),
            pruned: Vec::new(),
        };
        for (token, outcome) in outcomes {
            match outcome {
                Ok(()) => report.delivered.push(token),
                Err(error) => {
                    warn!(
                        recipient = %recipient,
                        token = %mask_token(&token),
                        event_kind = %kind,
                        error = %error,
                        "Push delivery failed"
                    );
                    report.failed.push(DeliveryFailure { token, error });
                }
            }
        }

        if self.prune_unregistered {
            self.prune(&mut report).await;
        }

        if report.succeeded() {
            debug!(
                recipient = %recipient,
                event_kind = %kind,
                delivered = report.delivered.len(),
                failed = report.failed.len(),
                "Fan-out finished"
            );
        } else {
            warn!(recipient = %recipient, event_kind = %kind, "All push deliveries failed");
        }
        Ok(report)
    }

    /// One token. The outer error aborts the fan-out; the inner one is a
    /// per-token failure.
    async fn deliver_one(
        &self,
        message: &PushMessage,
    ) -> Result<std::result::Result<(), PushError>> {
        let credential = self.credentials.get().await?;
        match self.transport.deliver(&credential, message).await {
            Err(PushError::Unauthorized(reason)) => {
                debug!(
                    token = %mask_token(&message.token),
                    reason = %reason,
                    "Credential refused, refreshing"
                );
                self.credentials.invalidate_if_current(&credential).await;
                let fresh = self.credentials.get().await?;
                Ok(self.transport.deliver(&fresh, message).await)
            }
            outcome => Ok(outcome),
        }
    }

    async fn prune(&self, report: &mut FanoutReport) {
        for failure in &report.failed {
            if !matches!(failure.error, PushError::Unregistered(_)) {
                continue;
            }
            match self.tokens.unregister(&report.recipient, &failure.token).await {
                Ok(_) => report.pruned.push(failure.token.clone()),
                Err(e) => warn!(
                    recipient = %report.recipient,
                    token = %mask_token(&failure.token),
                    error = %e,
                    "Failed to prune unregistered token"
                ),
            }
        }
    }
}
