use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Map, Value};

use super::{Account, LedgerClient, LedgerError, Operation, SignedOperation, SignedQuery};
use crate::crypto::PublicKey;

/// Registered bucket as the in-memory ledger sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketRecord {
    pub owner: PublicKey,
    pub size: u64,
    pub locator: String,
}

/// In-process ledger that verifies signatures and sequences.
///
/// Used by tests and by hosts that run without a ledger network.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    inner: Arc<RwLock<MemoryLedgerInner>>,
}

#[derive(Debug, Default)]
struct MemoryLedgerInner {
    accounts: HashMap<PublicKey, Account>,
    recipients: HashMap<String, u64>,
    buckets: HashMap<String, BucketRecord>,
    submitted: Vec<SignedOperation>,
    queries: Vec<SignedQuery>,
    unreachable: bool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit an account
    pub fn fund(&self, public_key: &PublicKey, amount: u64) {
        let mut inner = self.inner.write();
        inner.accounts.entry(*public_key).or_default().balance += amount;
    }

    /// Make every call fail as if the network were down
    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner.write().unreachable = unreachable;
    }

    /// Every operation accepted so far, in order
    pub fn submitted(&self) -> Vec<SignedOperation> {
        self.inner.read().submitted.clone()
    }

    pub fn queries(&self) -> Vec<SignedQuery> {
        self.inner.read().queries.clone()
    }

    pub fn bucket(&self, name: &str) -> Option<BucketRecord> {
        self.inner.read().buckets.get(name).cloned()
    }

    /// Total received by a recipient string
    pub fn received(&self, recipient: &str) -> u64 {
        self.inner
            .read()
            .recipients
            .get(recipient)
            .copied()
            .unwrap_or(0)
    }

    fn check_reachable(inner: &MemoryLedgerInner) -> Result<(), LedgerError> {
        if inner.unreachable {
            return Err(LedgerError::Unreachable("memory ledger offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerClient for MemoryLedger {
    async fn submit(&self, operation: SignedOperation) -> Result<(), LedgerError> {
        let mut inner = self.inner.write();
        Self::check_reachable(&inner)?;
        operation.verify()?;

        let account = inner.accounts.get(&operation.signer).cloned().unwrap_or_default();
        if operation.sequence != account.sequence + 1 {
            return Err(LedgerError::Rejected(format!(
                "bad sequence {}, expected {}",
                operation.sequence,
                account.sequence + 1
            )));
        }

        match &operation.operation {
            Operation::CreateBucket { name, size } => {
                if inner.buckets.contains_key(name) {
                    return Err(LedgerError::Rejected(format!(
                        "bucket {} already exists",
                        name
                    )));
                }
                inner.buckets.insert(
                    name.clone(),
                    BucketRecord {
                        owner: operation.signer,
                        size: *size,
                        locator: String::new(),
                    },
                );
            }
            Operation::UpdateBucket { name, locator } => {
                let record = inner
                    .buckets
                    .get_mut(name)
                    .ok_or_else(|| LedgerError::Rejected(format!("no bucket named {}", name)))?;
                if record.owner != operation.signer {
                    return Err(LedgerError::Rejected(format!(
                        "bucket {} is owned by someone else",
                        name
                    )));
                }
                record.locator = locator.clone();
            }
            Operation::Send { to, amount } => {
                if account.balance < *amount {
                    return Err(LedgerError::Rejected("insufficient funds".to_string()));
                }
                inner
                    .accounts
                    .entry(operation.signer)
                    .or_default()
                    .balance -= amount;
                *inner.recipients.entry(to.clone()).or_default() += amount;
            }
        }

        inner.accounts.entry(operation.signer).or_default().sequence = operation.sequence;
        tracing::debug!(signer = %operation.signer, sequence = operation.sequence, "memory ledger applied operation");
        inner.submitted.push(operation);
        Ok(())
    }

    async fn query(&self, query: SignedQuery) -> Result<Map<String, Value>, LedgerError> {
        let mut inner = self.inner.write();
        Self::check_reachable(&inner)?;
        query.verify()?;

        let mut data = Map::new();
        if let Some(Value::String(account)) = query.filters.get("account") {
            let mut accounts = Map::new();
            if let Ok(key) = PublicKey::from_hex(account) {
                if let Some(found) = inner.accounts.get(&key) {
                    accounts.insert(account.clone(), serde_json::to_value(found)?);
                }
            }
            data.insert("accounts".to_string(), Value::Object(accounts));
        }
        if let Some(Value::String(name)) = query.filters.get("bucket") {
            let mut buckets = Map::new();
            if let Some(record) = inner.buckets.get(name) {
                buckets.insert(
                    name.clone(),
                    json!({
                        "owner": record.owner.to_hex(),
                        "size": record.size,
                        "magnet": record.locator,
                    }),
                );
            }
            data.insert("buckets".to_string(), Value::Object(buckets));
        }

        inner.queries.push(query);
        Ok(data)
    }

    async fn account(&self, public_key: &PublicKey) -> Result<Option<Account>, LedgerError> {
        let inner = self.inner.read();
        Self::check_reachable(&inner)?;
        Ok(inner.accounts.get(public_key).cloned())
    }
}
