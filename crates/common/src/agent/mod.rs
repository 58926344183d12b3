//! The trusted side of the channel
//!
//! [`TrustedAgent`] owns the keypair, answers untrusted [`Message`]s and
//! signs ledger operations on their behalf once the user has agreed.
//! [`ScopedAgent`] binds it to one caller identity so in-process users such
//! as [`Bucket`](crate::bucket::Bucket) go through the same checks.

#[allow(clippy::module_inception)]
mod agent;
pub mod ledger;
mod messages;
mod scoped;

pub use agent::{
    AgentConfig, AgentError, TrustedAgent, MISSING_CREATE_BUCKET_PERMISSION,
    MISSING_QUERY_PERMISSION, MISSING_UPDATE_BUCKET_PERMISSION, NOT_LOGGED_IN, REQUEST_PENDING,
};
pub use messages::{Message, Query, Reply};
pub use scoped::ScopedAgent;
