use std::sync::Arc;

use async_trait::async_trait;

use crate::bucket::{Bucket, BucketAuthority, BucketInfo, Distribution, Locator};
use crate::crypto::PublicKey;
use crate::permission::PermissionSet;

use super::agent::{AgentError, TrustedAgent};
use super::ledger::LedgerClient;
use super::messages::{Message, Reply};

/// A [`TrustedAgent`] as seen by one caller.
///
/// Everything goes through [`TrustedAgent::handle`] exactly as a message
/// from `identity` would, so the same permission checks and prompts apply.
#[derive(Debug)]
pub struct ScopedAgent<L: LedgerClient> {
    agent: Arc<TrustedAgent<L>>,
    identity: String,
}

impl<L: LedgerClient> Clone for ScopedAgent<L> {
    fn clone(&self) -> Self {
        Self {
            agent: self.agent.clone(),
            identity: self.identity.clone(),
        }
    }
}

impl<L: LedgerClient> ScopedAgent<L> {
    pub fn new(agent: Arc<TrustedAgent<L>>, identity: impl Into<String>) -> Self {
        Self {
            agent,
            identity: identity.into(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn agent(&self) -> &Arc<TrustedAgent<L>> {
        &self.agent
    }

    pub async fn request(&self, message: Message) -> Option<Reply> {
        self.agent.handle(&self.identity, message).await
    }

    /// Ask for `permissions`, returning everything now held
    pub async fn request_permission(
        &self,
        permissions: PermissionSet,
    ) -> Result<PermissionSet, AgentError> {
        match self.request(Message::RequestPermission { permissions }).await {
            Some(Reply::Permission { permissions, .. }) => Ok(permissions),
            other => Err(unexpected(other)),
        }
    }

    /// Register a new bucket owned by the logged-in account
    pub async fn create_bucket(&self, name: &str, size: u64) -> Result<(), AgentError> {
        let message = Message::CreateBucket {
            name: name.to_string(),
            size,
        };
        match self.request(message).await {
            Some(Reply::Data(_)) => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn update_bucket(&self, name: &str, locator: &Locator) -> Result<(), AgentError> {
        let message = Message::UpdateBucket {
            name: name.to_string(),
            locator: locator.to_string(),
        };
        match self.request(message).await {
            Some(Reply::Data(_)) => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Handle on an existing bucket, publishing through `distribution`
    pub fn open_bucket<D: Distribution>(
        &self,
        distribution: D,
        name: &str,
        owner: PublicKey,
        size: u64,
        locator: Locator,
    ) -> Bucket<D, Self> {
        let info = BucketInfo {
            network: self.agent.config().network.clone(),
            name: name.to_string(),
            owner,
            size,
            locator,
        };
        Bucket::new(info, distribution, self.clone())
    }
}

fn unexpected(reply: Option<Reply>) -> AgentError {
    match reply {
        None => AgentError::Declined,
        Some(Reply::Error { error }) => AgentError::Rejected(error),
        Some(other) => AgentError::Rejected(format!("unexpected reply: {:?}", other)),
    }
}

#[async_trait]
impl<L: LedgerClient> BucketAuthority for ScopedAgent<L> {
    type Error = AgentError;

    async fn request_update_permission(&self, name: &str) -> Result<(), AgentError> {
        self.request_permission(PermissionSet::update_bucket(name))
            .await
            .map(|_| ())
    }

    async fn update_locator(&self, name: &str, locator: &Locator) -> Result<(), AgentError> {
        self.update_bucket(name, locator).await
    }
}
