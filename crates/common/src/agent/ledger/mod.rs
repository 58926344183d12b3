//! Seam to the ledger network
//!
//! The agent only needs three things from the ledger: submit a signed
//! operation, run a signed query, and look up an account. Everything about
//! how those reach the network belongs to the [`LedgerClient`]
//! implementation.

mod memory;

use std::fmt::Debug;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::crypto::{PublicKey, Signature};

pub use memory::MemoryLedger;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("ledger rejected operation: {0}")]
    Rejected(String),
    #[error("ledger unreachable: {0}")]
    Unreachable(String),
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// A state change on the ledger, signed by the agent's keypair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Operation {
    CreateBucket { name: String, size: u64 },
    UpdateBucket { name: String, locator: String },
    Send { to: String, amount: u64 },
}

/// Account state as reported by the ledger
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub balance: u64,
    /// Sequence number of the last operation applied for this account
    pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedOperation {
    pub signer: PublicKey,
    pub sequence: u64,
    pub operation: Operation,
    pub signature: Signature,
}

impl SignedOperation {
    /// Bytes covered by the signature
    pub fn signing_bytes(
        signer: &PublicKey,
        sequence: u64,
        operation: &Operation,
    ) -> Result<Vec<u8>, LedgerError> {
        Ok(serde_json::to_vec(&(signer, sequence, operation))?)
    }

    pub fn verify(&self) -> Result<(), LedgerError> {
        let bytes = Self::signing_bytes(&self.signer, self.sequence, &self.operation)?;
        self.signer
            .verify(&bytes, &self.signature)
            .map_err(|_| LedgerError::Rejected("bad signature".to_string()))
    }
}

/// Who a query is made as.
///
/// Queries can be made without anyone logged in; those are signed by a
/// throwaway keypair and marked `Ephemeral` so the ledger never mistakes
/// them for the account holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Session {
    Account,
    Ephemeral,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedQuery {
    pub session: Session,
    pub signer: PublicKey,
    pub filters: Map<String, Value>,
    pub signature: Signature,
}

impl SignedQuery {
    pub fn signing_bytes(
        session: Session,
        signer: &PublicKey,
        filters: &Map<String, Value>,
    ) -> Result<Vec<u8>, LedgerError> {
        Ok(serde_json::to_vec(&(session, signer, filters))?)
    }

    pub fn verify(&self) -> Result<(), LedgerError> {
        let bytes = Self::signing_bytes(self.session, &self.signer, &self.filters)?;
        self.signer
            .verify(&bytes, &self.signature)
            .map_err(|_| LedgerError::Rejected("bad signature".to_string()))
    }
}

#[async_trait]
pub trait LedgerClient: Send + Sync + Debug + 'static {
    /// Submit a signed operation and wait for it to be acknowledged
    async fn submit(&self, operation: SignedOperation) -> Result<(), LedgerError>;

    /// Run a query, returning the ledger's data payload
    async fn query(&self, query: SignedQuery) -> Result<Map<String, Value>, LedgerError>;

    /// Look up an account, `None` if the ledger has never seen it
    async fn account(&self, public_key: &PublicKey) -> Result<Option<Account>, LedgerError>;
}
