//! Push notifications for Tether.
//!
//! Push is a best-effort side channel next to the shared store: it makes
//! remote parties react sooner, but nothing depends on it arriving.
//!
//! ## Features
//!
//! - **CredentialCache**: bearer credential with refresh buffer and single-flight refresh
//! - **FanoutSender**: deliver one event to every token of a recipient
//! - **Event kinds**: static table of formatters producing title, body and data
//! - **Transports**: HTTP (FCM v1 style), console, memory
//! - **NotificationTasks**: owned background notification tasks
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tether_messages::{
//!     CredentialCache, EventKind, EventPayload, FanoutSender, MemoryPushTransport, Recipient,
//!     StaticCredentialSource, TokenRegistry,
//! };
//! use tether_storage::MemoryDocumentStore;
//!
//! # async fn example() -> tether_messages::Result<()> {
//! let store = Arc::new(MemoryDocumentStore::new());
//! let credentials = Arc::new(CredentialCache::new(Arc::new(StaticCredentialSource::new("t"))));
//! let sender = FanoutSender::new(
//!     TokenRegistry::new(store),
//!     credentials,
//!     Arc::new(MemoryPushTransport::new()),
//! );
//!
//! let parent = Recipient::authority("parent-1");
//! sender.tokens().register(&parent, "device-token", Some("phone")).await?;
//! let reached = sender
//!     .send(&parent, EventKind::GeofenceAlert, &EventPayload::new().with_subject("kid-1"))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod credential;
pub mod error;
pub mod event;
pub mod fanout;
pub mod tasks;
pub mod tokens;
pub mod transports;

use std::sync::Arc;

pub use credential::{Credential, CredentialCache, CredentialSource, StaticCredentialSource};
#[cfg(feature = "http")]
pub use credential::HttpCredentialSource;
pub use error::{Error, PushError, Result};
pub use event::{EventKind, EventPayload, RenderedEvent};
pub use fanout::{DeliveryFailure, FanoutReport, FanoutSender};
pub use tasks::NotificationTasks;
pub use tokens::{mask_token, Recipient, TokenRecord, TokenRegistry};
pub use transports::{
    ConsolePushTransport, Delivery, MemoryPushTransport, Notification, Priority, PushMessage,
    PushTransport,
};
#[cfg(feature = "http")]
pub use transports::HttpPushTransport;

use tether_core::TetherConfig;
use tether_storage::DocumentStore;

/// Build a fan-out sender from configuration.
///
/// Without a push project the console transport is used, and without a
/// token endpoint a static placeholder credential.
pub fn sender_from_config(
    config: &TetherConfig,
    store: Arc<dyn DocumentStore>,
) -> Result<FanoutSender> {
    let source: Arc<dyn CredentialSource> = credential_source(config)?;
    let credentials = Arc::new(CredentialCache::with_refresh_buffer(
        source,
        config.credentials.refresh_buffer(),
    ));
    let transport = transport(config)?;
    tracing::debug!(transport = transport.name(), "Push transport selected");

    Ok(
        FanoutSender::new(TokenRegistry::new(store), credentials, transport)
            .with_pruning(config.fanout.prune_unregistered_tokens),
    )
}

#[cfg(feature = "http")]
fn credential_source(config: &TetherConfig) -> Result<Arc<dyn CredentialSource>> {
    match HttpCredentialSource::from_config(&config.credentials)? {
        Some(source) => Ok(Arc::new(source)),
        None => Ok(Arc::new(
            StaticCredentialSource::new("unconfigured").with_ttl(config.credentials.default_ttl()),
        )),
    }
}

#[cfg(not(feature = "http"))]
fn credential_source(config: &TetherConfig) -> Result<Arc<dyn CredentialSource>> {
    Ok(Arc::new(
        StaticCredentialSource::new("unconfigured").with_ttl(config.credentials.default_ttl()),
    ))
}

#[cfg(feature = "http")]
fn transport(config: &TetherConfig) -> Result<Arc<dyn PushTransport>> {
    match HttpPushTransport::from_config(&config.push)? {
        Some(http) => Ok(Arc::new(http)),
        None => Ok(Arc::new(ConsolePushTransport::new())),
    }
}

#[cfg(not(feature = "http"))]
fn transport(_config: &TetherConfig) -> Result<Arc<dyn PushTransport>> {
    Ok(Arc::new(ConsolePushTransport::new()))
}
