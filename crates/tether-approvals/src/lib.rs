//! Quorum approvals for Tether.
//!
//! An approval request snapshots the authorities linked to a subject and
//! collects one vote from each. The aggregate status is a pure function of
//! the votes:
//!
//! ```text
//! PENDING -> PARTIAL* -> APPROVED | REJECTED
//! ```
//!
//! Any rejection rejects; unanimous approval approves. The subject gets
//! exactly one outcome notification.

pub mod consensus;
pub mod directory;
pub mod error;
pub mod request;

pub use consensus::{ApprovalConsensus, VoteReceipt};
pub use directory::{
    AuthorityDirectory, AuthorityLink, StaticAuthorityDirectory, StoreAuthorityDirectory,
};
pub use error::{Error, Result};
pub use request::{aggregate, ApprovalRequest, ApprovalStatus, Vote};
