use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::crypto::PublicKey;

use super::distribution::{Distribution, DistributionError, Locator, RemoteFile, Swarm};
use super::BucketAuthority;

/// Longest any single network step of a bucket may take
pub const DEFAULT_NETWORK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, thiserror::Error)]
pub enum BucketError {
    #[error("default error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("distribution error: {0}")]
    Distribution(#[from] DistributionError),
    #[error("authority error: {0}")]
    Authority(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("timed out waiting to {0}")]
    Timeout(&'static str),
    #[error("file is not valid utf-8: {0}")]
    InvalidText(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BucketError {
    fn authority(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        BucketError::Authority(Box::new(error))
    }
}

/// Ledger-side description of a bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketInfo {
    pub network: String,
    pub name: String,
    pub owner: PublicKey,
    pub size: u64,
    /// Where the current contents are published; empty for a new bucket
    pub locator: Locator,
}

struct BucketState<S> {
    locator: Locator,
    // local writes and cached reads; shadows `remote`
    overlay: BTreeMap<String, Bytes>,
    remote: Option<BTreeMap<String, RemoteFile>>,
    swarm: Option<S>,
    fetch_pending: bool,
}

struct BucketInner<D: Distribution, A: BucketAuthority> {
    network: String,
    name: String,
    owner: PublicKey,
    size: u64,
    timeout: Duration,
    distribution: D,
    authority: A,
    state: Mutex<BucketState<D::Swarm>>,
    fetch_lock: tokio::sync::Mutex<()>,
    publish_lock: tokio::sync::Mutex<()>,
}

/// A named, versioned file set published through a [`Distribution`].
///
/// The remote contents are fetched at most once, lazily, the first time
/// anything reads from the bucket. Writes only touch a local overlay until
/// [`Bucket::publish`] pushes the whole set out and points the ledger at
/// the new locator. Clones share all state.
pub struct Bucket<D: Distribution, A: BucketAuthority>(Arc<BucketInner<D, A>>);

impl<D: Distribution, A: BucketAuthority> Clone for Bucket<D, A> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<D: Distribution, A: BucketAuthority> std::fmt::Debug for Bucket<D, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bucket")
            .field("network", &self.0.network)
            .field("name", &self.0.name)
            .field("owner", &self.0.owner)
            .field("locator", &self.locator())
            .finish()
    }
}

impl<D: Distribution, A: BucketAuthority> Bucket<D, A> {
    pub fn new(info: BucketInfo, distribution: D, authority: A) -> Self {
        Self::with_timeout(info, distribution, authority, DEFAULT_NETWORK_TIMEOUT)
    }

    pub fn with_timeout(info: BucketInfo, distribution: D, authority: A, timeout: Duration) -> Self {
        let fetch_pending = !info.locator.is_empty();
        Self(Arc::new(BucketInner {
            network: info.network,
            name: info.name,
            owner: info.owner,
            size: info.size,
            timeout,
            distribution,
            authority,
            state: Mutex::new(BucketState {
                locator: info.locator,
                overlay: BTreeMap::new(),
                remote: None,
                swarm: None,
                fetch_pending,
            }),
            fetch_lock: tokio::sync::Mutex::new(()),
            publish_lock: tokio::sync::Mutex::new(()),
        }))
    }

    pub fn network(&self) -> &str {
        &self.0.network
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn owner(&self) -> &PublicKey {
        &self.0.owner
    }

    pub fn size(&self) -> u64 {
        self.0.size
    }

    pub fn locator(&self) -> Locator {
        self.0.state.lock().locator.clone()
    }

    /// `true` until the remote contents have been fetched. Never turns
    /// back on.
    pub fn is_fetch_pending(&self) -> bool {
        self.0.state.lock().fetch_pending
    }

    async fn within<T>(
        &self,
        step: &'static str,
        future: impl Future<Output = Result<T, DistributionError>>,
    ) -> Result<T, BucketError> {
        match tokio::time::timeout(self.0.timeout, future).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                tracing::warn!(bucket = %self.0.name, step, "bucket network step timed out");
                Err(BucketError::Timeout(step))
            }
        }
    }

    /// Fetch the remote contents if that has not happened yet. Safe to call
    /// before every access; concurrent callers share one fetch.
    pub async fn fetch(&self) -> Result<(), BucketError> {
        if !self.is_fetch_pending() {
            return Ok(());
        }

        let _guard = self.0.fetch_lock.lock().await;
        let locator = {
            let state = self.0.state.lock();
            if !state.fetch_pending {
                return Ok(());
            }
            state.locator.clone()
        };

        tracing::debug!(bucket = %self.0.name, %locator, "fetching bucket");
        let swarm = self
            .within("join swarm", self.0.distribution.join(&locator))
            .await?;
        let files = self.within("fetch bucket", swarm.wait_for_done()).await?;

        let mut state = self.0.state.lock();
        if !state.fetch_pending {
            swarm.release();
            return Ok(());
        }
        state.remote = Some(
            files
                .into_iter()
                .map(|file| (file.name.clone(), file))
                .collect(),
        );
        state.swarm = Some(swarm);
        state.fetch_pending = false;
        tracing::info!(bucket = %self.0.name, %locator, "bucket fetched");
        Ok(())
    }

    /// Every filename in the bucket, sorted
    pub async fn list_filenames(&self) -> Result<Vec<String>, BucketError> {
        self.fetch().await?;
        let state = self.0.state.lock();
        let mut names: BTreeSet<&String> = state.overlay.keys().collect();
        if let Some(remote) = &state.remote {
            names.extend(remote.keys());
        }
        Ok(names.into_iter().cloned().collect())
    }

    /// `None` if there is no such file
    pub async fn read_file(&self, name: &str) -> Result<Option<Bytes>, BucketError> {
        self.fetch().await?;
        let remote = {
            let state = self.0.state.lock();
            if let Some(data) = state.overlay.get(name) {
                return Ok(Some(data.clone()));
            }
            state
                .remote
                .as_ref()
                .and_then(|remote| remote.get(name).cloned())
        };
        let Some(remote) = remote else {
            return Ok(None);
        };

        let data = self
            .within("read file", self.0.distribution.read(&remote))
            .await?;
        let mut state = self.0.state.lock();
        // a local write that landed meanwhile wins
        let cached = state.overlay.entry(name.to_string()).or_insert(data);
        Ok(Some(cached.clone()))
    }

    pub async fn read_text(&self, name: &str) -> Result<Option<String>, BucketError> {
        match self.read_file(name).await? {
            Some(data) => String::from_utf8(data.to_vec())
                .map(Some)
                .map_err(|_| BucketError::InvalidText(name.to_string())),
            None => Ok(None),
        }
    }

    pub async fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, BucketError> {
        match self.read_file(name).await? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    pub fn write_file(&self, name: impl Into<String>, data: impl Into<Bytes>) {
        self.0.state.lock().overlay.insert(name.into(), data.into());
    }

    pub fn write_text(&self, name: impl Into<String>, text: impl Into<String>) {
        self.write_file(name, Bytes::from(text.into()));
    }

    pub fn write_json<T: Serialize>(&self, name: impl Into<String>, value: &T) -> Result<(), BucketError> {
        let data = serde_json::to_vec(value)?;
        self.write_file(name, data);
        Ok(())
    }

    /// Publish the bucket's full contents and record the new locator on the
    /// ledger. The bucket keeps every file locally afterwards.
    pub async fn publish(&self) -> Result<Locator, BucketError> {
        let _guard = self.0.publish_lock.lock().await;
        let name = &self.0.name;

        // ask first so the prompt shows up before any transfer work
        self.0
            .authority
            .request_update_permission(name)
            .await
            .map_err(BucketError::authority)?;

        self.fetch().await?;
        let mut files = Vec::new();
        for filename in self.list_filenames().await? {
            if let Some(data) = self.read_file(&filename).await? {
                files.push((filename, data));
            }
        }

        // everything is in the overlay now
        let previous = {
            let mut state = self.0.state.lock();
            state.remote = None;
            state.swarm.take()
        };
        if let Some(previous) = previous {
            previous.release();
        }

        tracing::info!(bucket = %name, files = files.len(), "publishing bucket");
        let swarm = self
            .within("publish bucket", self.0.distribution.publish(files))
            .await?;
        let locator = swarm.locator().clone();
        if let Err(e) = self
            .within("find holders", swarm.wait_for_holders(1))
            .await
        {
            swarm.release();
            return Err(e);
        }

        if let Err(e) = self.0.authority.update_locator(name, &locator).await {
            swarm.release();
            return Err(BucketError::authority(e));
        }

        {
            let mut state = self.0.state.lock();
            state.locator = locator.clone();
            state.swarm = Some(swarm);
        }
        tracing::info!(bucket = %name, %locator, "bucket published");
        Ok(locator)
    }
}
