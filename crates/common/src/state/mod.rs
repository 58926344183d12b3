//! Durable agent state
//!
//! [`PersistentState`] is the single source of truth for the keypair, the
//! unlock credential, granted permissions, the one pending negotiation slot
//! and the transaction audit trail. Every record sits behind one lock so a
//! reader never observes a half-applied write, and every mutation bumps a
//! version published over a `watch` channel so waiters can react without
//! polling.

mod pending;
mod snapshot;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;

use crate::crypto::{Credential, PublicKey, SecretKey};
use crate::permission::PermissionSet;

pub use pending::{Admission, PendingRequest};
pub use snapshot::StateSnapshot;

#[derive(Debug, Default)]
struct StateInner {
    keypair: Option<SecretKey>,
    credential: Option<Credential>,
    permissions: HashMap<String, PermissionSet>,
    request: Option<PendingRequest>,
    transactions: BTreeMap<String, bool>,
    version: u64,
}

/// Shared handle over the agent's durable records.
///
/// Cloning is cheap and every clone sees the same state.
#[derive(Debug, Clone)]
pub struct PersistentState {
    inner: Arc<RwLock<StateInner>>,
    changes: Arc<watch::Sender<u64>>,
}

fn record_grant(inner: &mut StateInner, request: &PendingRequest) {
    match request {
        PendingRequest::Permission {
            identity,
            permissions,
        } => {
            inner
                .permissions
                .entry(identity.clone())
                .or_default()
                .merge(permissions);
        }
        PendingRequest::Transaction { id, .. } => {
            inner.transactions.insert(id.clone(), true);
        }
    }
}

impl Default for PersistentState {
    fn default() -> Self {
        Self::new()
    }
}

impl PersistentState {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            inner: Arc::new(RwLock::new(StateInner::default())),
            changes: Arc::new(changes),
        }
    }

    /// Rebuild state from a persisted snapshot and an optional keypair.
    pub fn restore(snapshot: StateSnapshot, keypair: Option<SecretKey>) -> Self {
        let state = Self::new();
        {
            let mut inner = state.inner.write();
            inner.keypair = keypair;
            inner.credential = snapshot.credential;
            inner.permissions = snapshot.permissions;
            inner.request = snapshot.request;
            inner.transactions = snapshot.transactions;
        }
        state
    }

    /// Everything except the secret key, in its persisted shape.
    pub fn snapshot(&self) -> StateSnapshot {
        let inner = self.inner.read();
        StateSnapshot {
            public_key: inner.keypair.as_ref().map(SecretKey::public),
            credential: inner.credential.clone(),
            permissions: inner.permissions.clone(),
            request: inner.request.clone(),
            transactions: inner.transactions.clone(),
        }
    }

    /// Subscribe to mutations. The value is a monotonically increasing
    /// version; receivers only care that it changed.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut StateInner) -> R) -> R {
        let (result, version) = {
            let mut inner = self.inner.write();
            let result = f(&mut inner);
            inner.version += 1;
            (result, inner.version)
        };
        self.changes.send_replace(version);
        result
    }

    // keypair

    pub fn has_keypair(&self) -> bool {
        self.inner.read().keypair.is_some()
    }

    pub fn public_key(&self) -> Option<PublicKey> {
        self.inner.read().keypair.as_ref().map(SecretKey::public)
    }

    /// Replace the keypair. The previous key, if any, is dropped and
    /// therefore zeroized.
    pub(crate) fn set_keypair(&self, keypair: Option<SecretKey>) {
        self.mutate(|inner| inner.keypair = keypair);
    }

    /// Run `f` against the stored keypair, `None` when logged out. The key
    /// is only borrowed for the duration of the call.
    pub(crate) fn with_keypair<R>(&self, f: impl FnOnce(&SecretKey) -> R) -> Option<R> {
        self.inner.read().keypair.as_ref().map(f)
    }

    /// PEM encoding of the stored keypair, for the host's key file.
    /// `None` when logged out.
    pub fn keypair_pem(&self) -> Option<String> {
        self.with_keypair(SecretKey::to_pem)
    }

    // credential

    pub fn has_credential(&self) -> bool {
        self.inner.read().credential.is_some()
    }

    pub fn set_credential(&self, credential: Credential) {
        self.mutate(|inner| inner.credential = Some(credential));
    }

    /// `false` when no credential has been set.
    pub fn check_password(&self, password: &str) -> bool {
        self.inner
            .read()
            .credential
            .as_ref()
            .map(|credential| credential.verify(password))
            .unwrap_or(false)
    }

    // permissions

    /// Permissions granted to `identity`. Empty when there are none,
    /// including when nobody is logged in.
    pub fn permissions(&self, identity: &str) -> PermissionSet {
        let inner = self.inner.read();
        if inner.keypair.is_none() {
            return PermissionSet::default();
        }
        inner
            .permissions
            .get(identity)
            .cloned()
            .unwrap_or_default()
    }

    /// Accumulate `permissions` into what `identity` already holds.
    pub fn grant_permission(&self, identity: &str, permissions: &PermissionSet) {
        self.mutate(|inner| {
            inner
                .permissions
                .entry(identity.to_string())
                .or_default()
                .merge(permissions);
        });
    }

    pub fn revoke_permissions(&self, identity: &str) {
        self.mutate(|inner| {
            inner.permissions.remove(identity);
        });
    }

    // pending request slot

    pub fn pending(&self) -> Option<PendingRequest> {
        self.inner.read().request.clone()
    }

    pub fn is_pending(&self, request: &PendingRequest) -> bool {
        self.inner.read().request.as_ref() == Some(request)
    }

    /// Claim the pending slot for `request`.
    ///
    /// Fails with the occupying request when a different one is pending.
    /// Admitting a transaction request records it as not approved in the
    /// same write, so an approval can never be lost to a late insert.
    pub fn try_set_pending(&self, request: PendingRequest) -> Result<Admission, PendingRequest> {
        self.mutate(|inner| {
            if let Some(existing) = &inner.request {
                return if *existing == request {
                    Ok(Admission::Joined)
                } else {
                    Err(existing.clone())
                };
            }
            if let PendingRequest::Transaction { id, .. } = &request {
                inner.transactions.insert(id.clone(), false);
            }
            inner.request = Some(request);
            Ok(Admission::Created)
        })
    }

    /// Clear the slot, but only if it still holds `request`.
    pub fn clear_pending_if(&self, request: &PendingRequest) -> bool {
        self.mutate(|inner| {
            if inner.request.as_ref() == Some(request) {
                inner.request = None;
                true
            } else {
                false
            }
        })
    }

    /// Accept whatever is pending: grant the requested permissions or
    /// approve the transaction. Returns the resolved request.
    pub fn grant_pending(&self) -> Option<PendingRequest> {
        self.mutate(|inner| {
            let request = inner.request.take()?;
            record_grant(inner, &request);
            Some(request)
        })
    }

    /// Accept `request`, but only if the slot still holds it.
    pub fn grant_pending_if(&self, request: &PendingRequest) -> bool {
        self.mutate(|inner| {
            if inner.request.as_ref() != Some(request) {
                return false;
            }
            inner.request = None;
            record_grant(inner, request);
            true
        })
    }

    /// Decline whatever is pending. Returns the resolved request.
    pub fn deny_pending(&self) -> Option<PendingRequest> {
        self.mutate(|inner| inner.request.take())
    }

    // transactions

    /// Approve the pending transaction `id` and clear the slot.
    ///
    /// Returns `false`, recording nothing, unless that transaction is the
    /// one pending. An expired or unknown id is never marked approved.
    pub fn approve_transaction(&self, id: &str) -> bool {
        self.mutate(|inner| {
            if !matches!(&inner.request, Some(PendingRequest::Transaction { id: pending, .. }) if pending == id)
            {
                return false;
            }
            inner.request = None;
            inner.transactions.insert(id.to_string(), true);
            true
        })
    }

    /// Approval status of a transaction, `None` for unknown ids.
    pub fn transaction(&self, id: &str) -> Option<bool> {
        self.inner.read().transactions.get(id).copied()
    }

    pub fn transactions(&self) -> BTreeMap<String, bool> {
        self.inner.read().transactions.clone()
    }

    /// Destroy the session: the keypair is dropped (and zeroized), the
    /// credential, permissions and pending request are cleared. The
    /// transaction audit trail is kept.
    pub fn log_out(&self) {
        self.mutate(|inner| {
            inner.keypair = None;
            inner.credential = None;
            inner.permissions.clear();
            inner.request = None;
        });
    }
}
