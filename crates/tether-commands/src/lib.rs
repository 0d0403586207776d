//! Asynchronous commands for Tether.
//!
//! An authority issues a command to a subject device; the command document
//! in the shared store is the source of truth, and a push notification is
//! only a hint to look sooner.
//!
//! ## Components
//!
//! - **CommandChannel**: command and result documents per subject
//! - **CommandDispatcher**: record a command, then push a wake-up in the background
//! - **StatusListener**: follow one correlation id until it is terminal
//! - **ExecutorRunner**: host for a device-side [`CommandExecutor`]
//!
//! ## Status lifecycle
//!
//! ```text
//! PENDING -> COMPLETED | FAILED
//! ```
//!
//! Terminal statuses never change. There is no server-side timeout: callers
//! wait with [`StatusListener::await_terminal`] or drop their
//! [`Subscription`] when they stop caring.

pub mod channel;
pub mod command;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod listener;

pub use channel::CommandChannel;
pub use command::{Command, CommandStatus, CommandUpdate};
pub use dispatcher::CommandDispatcher;
pub use error::{Error, Result};
pub use executor::{CommandExecutor, ExecutorRunner};
pub use listener::{StatusListener, Subscription, SubscriptionEnd};
