//! Cryptographic primitives for the trusted agent
//!
//! - **Identity**: an Ed25519 keypair (`SecretKey`/`PublicKey`) is the user's
//!   ledger account. The secret half never leaves the agent and is zeroized
//!   when dropped.
//! - **Unlock**: a password-derived [`Credential`] (salted, stretched BLAKE3)
//!   gates unlocking the stored keypair.

mod credential;
mod keys;

pub use credential::{Credential, CredentialError};
pub use ed25519_dalek::Signature;
pub use keys::{KeyError, PublicKey, SecretKey, PRIVATE_KEY_SIZE, PUBLIC_KEY_SIZE};
