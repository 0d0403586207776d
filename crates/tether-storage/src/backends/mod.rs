//! Document store backends.
//!
//! Backends are feature-gated; `memory` is always available.

use std::sync::Arc;

use tether_core::config::StoreConfig;

use crate::store::DocumentStore;
use crate::{Error, Result};

pub mod memory;

#[cfg(feature = "redb")]
pub mod redb;

pub use memory::MemoryDocumentStore;

#[cfg(feature = "redb")]
pub use self::redb::{RedbDocumentStore, RedbStoreConfig};

/// Create a document store by backend name.
pub fn create_store(backend: &str, config: &StoreConfig) -> Result<Arc<dyn DocumentStore>> {
    match backend {
        "memory" => Ok(Arc::new(MemoryDocumentStore::with_feed_capacity(
            config.change_feed_capacity,
        ))),

        #[cfg(feature = "redb")]
        "redb" => {
            let cfg = RedbStoreConfig::new(config.path.clone())
                .with_feed_capacity(config.change_feed_capacity);
            Ok(Arc::new(RedbDocumentStore::new(cfg)?))
        }

        _ => Err(Error::Storage(format!(
            "Unknown backend type: {}. Available backends: {}",
            backend,
            available_backends().join(", ")
        ))),
    }
}

/// Backend names compiled into this build.
pub fn available_backends() -> Vec<&'static str> {
    let mut backends = vec!["memory"];
    if cfg!(feature = "redb") {
        backends.push("redb");
    }
    backends
}
