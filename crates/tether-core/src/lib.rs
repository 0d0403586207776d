//! Core types for Tether.
//!
//! Tether lets supervising authorities issue asynchronous commands to an
//! intermittently-connected subject device, observe their completion, and
//! gate irreversible actions behind a quorum of authority votes.
//!
//! This crate holds the pieces every other crate agrees on:
//! - Identifier aliases and generators
//! - Shared-store path builders
//! - Layered configuration (TOML file, `TETHER_*` environment, defaults)

pub mod config;
pub mod error;
pub mod ids;
pub mod paths;

pub use config::TetherConfig;
pub use error::{ConfigError, ConfigResult};
pub use ids::{AuthorityId, CorrelationId, DeviceId, RequestId};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
