use serde::{Deserialize, Serialize};

use crate::permission::PermissionSet;

/// The single outstanding question put to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PendingRequest {
    /// `identity` asks to be granted `permissions`
    #[serde(rename_all = "camelCase")]
    Permission {
        identity: String,
        permissions: PermissionSet,
    },
    /// `identity` asks to send `amount` to `recipient`
    #[serde(rename_all = "camelCase")]
    Transaction {
        identity: String,
        id: String,
        recipient: String,
        amount: u64,
    },
}

impl PendingRequest {
    /// Caller the request was made on behalf of
    pub fn identity(&self) -> &str {
        match self {
            PendingRequest::Permission { identity, .. } => identity,
            PendingRequest::Transaction { identity, .. } => identity,
        }
    }
}

/// How a request was admitted into the pending slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The slot was empty and now holds the request
    Created,
    /// The identical request was already pending, e.g. a redelivered message
    Joined,
}
