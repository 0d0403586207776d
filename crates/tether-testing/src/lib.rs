//! Testing utilities for Tether
//!
//! This crate provides:
//! - [`Harness`]: every component wired over an in-memory store
//! - [`ScriptedExecutor`]: a device-side executor with canned outcomes
//! - End-to-end scenario tests under `tests/`

pub mod executor;
pub mod harness;

pub use executor::ScriptedExecutor;
pub use harness::{Harness, HarnessBuilder};

/// Install a test log subscriber once. Honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
