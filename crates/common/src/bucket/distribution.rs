use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum DistributionError {
    #[error("distribution error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("nothing is published under {0}")]
    NotFound(Locator),
    #[error("no content for file {0}")]
    MissingContent(String),
    #[error("distribution network is offline")]
    Offline,
    #[error("swarm closed")]
    Closed,
}

/// Opaque address of a published file set. Empty means nothing has been
/// published yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Locator(String);

impl Locator {
    pub fn new(locator: impl Into<String>) -> Self {
        Self(locator.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Locator {
    fn from(locator: String) -> Self {
        Self(locator)
    }
}

impl From<&str> for Locator {
    fn from(locator: &str) -> Self {
        Self(locator.to_string())
    }
}

/// Handle to one file inside a fetched swarm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub name: String,
    /// Content key the distribution network resolves the bytes by
    pub key: String,
    pub size: u64,
}

/// A file set being fetched or served
#[async_trait]
pub trait Swarm: Send + Sync + 'static {
    fn locator(&self) -> &Locator;

    /// Wait until the whole file set has arrived and list it
    async fn wait_for_done(&self) -> Result<Vec<RemoteFile>, DistributionError>;

    /// Wait until at least `count` remote peers hold the file set
    async fn wait_for_holders(&self, count: usize) -> Result<(), DistributionError>;

    /// Stop serving and fetching. The handle is useless afterwards.
    fn release(&self);
}

/// Peer distribution network
#[async_trait]
pub trait Distribution: Send + Sync + 'static {
    type Swarm: Swarm;

    /// Start fetching the file set behind `locator`
    async fn join(&self, locator: &Locator) -> Result<Self::Swarm, DistributionError>;

    /// Materialize one file of a joined swarm
    async fn read(&self, file: &RemoteFile) -> Result<Bytes, DistributionError>;

    /// Start serving `files`, returning a swarm that carries the new locator
    async fn publish(&self, files: Vec<(String, Bytes)>) -> Result<Self::Swarm, DistributionError>;
}
