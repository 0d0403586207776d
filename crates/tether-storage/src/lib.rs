//! Shared document store for Tether.
//!
//! Commands, command results, approval requests and push tokens are JSON
//! documents addressed by path (see [`tether_core::paths`]). The store
//! offers single-document atomicity only:
//!
//! - `create` is single-writer (fails if the document exists)
//! - `set_field` merges one key without touching its siblings
//! - `update` is an atomic read-modify-write transaction
//! - `changes` streams every committed write

pub mod backends;
pub mod error;
pub mod feed;
pub mod fields;
pub mod store;

pub use backends::{available_backends, create_store, MemoryDocumentStore};
#[cfg(feature = "redb")]
pub use backends::{RedbDocumentStore, RedbStoreConfig};
pub use error::{Error, Result};
pub use feed::{ChangeEvent, ChangeFeed, ChangeReceiver, DocumentChange};
pub use store::{DocumentStore, DocumentStoreExt, Mutator};
