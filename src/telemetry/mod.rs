//! Telemetry admission filter
//!
//! Prunes inbound trace batches to the spans of tracked APIs before they
//! reach the coverage store.

pub mod filter;
pub mod identity;
pub mod membership;
pub mod processor;

pub use filter::{AdmissionFilter, FilterStats};
pub use identity::IdentityExtractor;
pub use membership::{InMemoryMembershipCache, MembershipCache, MembershipError, SqliteMembershipCache};
pub use processor::{MessageOutcome, TelemetryProcessor};

use crate::bus::TopicClosed;

#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("membership lookup failed: {0}")]
    Membership(#[from] MembershipError),
    #[error(transparent)]
    Publish(#[from] TopicClosed),
}
