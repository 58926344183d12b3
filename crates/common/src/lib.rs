/**
 * The trusted agent: sole holder of the keypair,
 *  answers untrusted callers and signs ledger
 *  operations once the user agrees.
 */
pub mod agent;
/**
 * Named, versioned file sets published through
 *  a peer distribution network.
 */
pub mod bucket;
/**
 * Cryptographic types and operations.
 *  - Ed25519 public and secret keys
 *  - Password-derived unlock credential
 */
pub mod crypto;
/**
 * Waiting on the user: one pending request at a
 *  time, resolved by the user or by a deadline.
 */
pub mod negotiation;
/**
 * Capability sets and the policy that decides
 *  whether a granted set covers a requested one.
 */
pub mod permission;
/**
 * Durable agent state shared by every component.
 */
pub mod state;

pub mod prelude {
    pub use crate::agent::ledger::{LedgerClient, MemoryLedger};
    pub use crate::agent::{AgentConfig, Message, Reply, ScopedAgent, TrustedAgent};
    pub use crate::bucket::{Bucket, BucketError, Distribution, Locator, MemoryDistribution};
    pub use crate::crypto::{PublicKey, SecretKey};
    pub use crate::permission::PermissionSet;
    pub use crate::state::{PersistentState, StateSnapshot};
}
