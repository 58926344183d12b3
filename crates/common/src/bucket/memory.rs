use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;

use super::distribution::{Distribution, DistributionError, Locator, RemoteFile, Swarm};

/// Content-addressed distribution that lives in process memory.
///
/// Locators are `blake3:` followed by the hash of the sorted file index, so
/// publishing the same files twice yields the same locator. Every publish
/// starts with a fixed number of simulated remote holders; more can be
/// attached with [`MemoryDistribution::attach_holder`].
#[derive(Debug, Clone)]
pub struct MemoryDistribution {
    inner: Arc<MemoryDistributionInner>,
}

#[derive(Debug)]
struct MemoryDistributionInner {
    published: RwLock<HashMap<Locator, Published>>,
    blobs: RwLock<HashMap<String, Bytes>>,
    initial_holders: usize,
    latency: Mutex<Duration>,
    offline: AtomicBool,
    joins: AtomicUsize,
    fetches: AtomicUsize,
    releases: AtomicUsize,
}

#[derive(Debug)]
struct Published {
    files: Vec<RemoteFile>,
    holders: watch::Sender<usize>,
}

impl Default for MemoryDistribution {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDistribution {
    /// Every publish is picked up by one remote holder straight away
    pub fn new() -> Self {
        Self::with_holders(1)
    }

    /// Nobody ever picks up a publish unless attached by hand
    pub fn isolated() -> Self {
        Self::with_holders(0)
    }

    fn with_holders(initial_holders: usize) -> Self {
        Self {
            inner: Arc::new(MemoryDistributionInner {
                published: RwLock::new(HashMap::new()),
                blobs: RwLock::new(HashMap::new()),
                initial_holders,
                latency: Mutex::new(Duration::ZERO),
                offline: AtomicBool::new(false),
                joins: AtomicUsize::new(0),
                fetches: AtomicUsize::new(0),
                releases: AtomicUsize::new(0),
            }),
        }
    }

    /// How long a fetch takes to complete
    pub fn set_latency(&self, latency: Duration) {
        *self.inner.latency.lock() = latency;
    }

    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Add a remote holder for `locator`. `false` if it was never published.
    pub fn attach_holder(&self, locator: &Locator) -> bool {
        match self.inner.published.read().get(locator) {
            Some(published) => {
                published.holders.send_modify(|holders| *holders += 1);
                true
            }
            None => false,
        }
    }

    pub fn holders(&self, locator: &Locator) -> usize {
        self.inner
            .published
            .read()
            .get(locator)
            .map(|published| *published.holders.borrow())
            .unwrap_or(0)
    }

    /// Number of swarms joined
    pub fn joins(&self) -> usize {
        self.inner.joins.load(Ordering::SeqCst)
    }

    /// Number of fetches that ran to completion
    pub fn fetches(&self) -> usize {
        self.inner.fetches.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.inner.releases.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<(), DistributionError> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(DistributionError::Offline);
        }
        Ok(())
    }

    fn swarm(&self, locator: &Locator) -> MemorySwarm {
        let published = self.inner.published.read();
        let found = published.get(locator);
        MemorySwarm {
            locator: locator.clone(),
            files: found.map(|published| published.files.clone()),
            holders: found.map(|published| published.holders.subscribe()),
            distribution: self.inner.clone(),
        }
    }
}

fn locator_for(index: &[RemoteFile]) -> Result<Locator, DistributionError> {
    let encoded = serde_json::to_vec(index).map_err(anyhow::Error::from)?;
    Ok(Locator::new(format!(
        "blake3:{}",
        blake3::hash(&encoded).to_hex()
    )))
}

#[async_trait]
impl Distribution for MemoryDistribution {
    type Swarm = MemorySwarm;

    async fn join(&self, locator: &Locator) -> Result<MemorySwarm, DistributionError> {
        self.check_online()?;
        self.inner.joins.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(%locator, "joining swarm");
        Ok(self.swarm(locator))
    }

    async fn read(&self, file: &RemoteFile) -> Result<Bytes, DistributionError> {
        self.check_online()?;
        self.inner
            .blobs
            .read()
            .get(&file.key)
            .cloned()
            .ok_or_else(|| DistributionError::MissingContent(file.name.clone()))
    }

    async fn publish(&self, files: Vec<(String, Bytes)>) -> Result<MemorySwarm, DistributionError> {
        self.check_online()?;

        let mut index = Vec::with_capacity(files.len());
        {
            let mut blobs = self.inner.blobs.write();
            for (name, data) in files {
                let key = blake3::hash(&data).to_hex().to_string();
                index.push(RemoteFile {
                    name,
                    key: key.clone(),
                    size: data.len() as u64,
                });
                blobs.insert(key, data);
            }
        }
        index.sort_by(|a, b| a.name.cmp(&b.name));

        let locator = locator_for(&index)?;
        self.inner
            .published
            .write()
            .entry(locator.clone())
            .or_insert_with(|| Published {
                files: index,
                holders: watch::channel(self.inner.initial_holders).0,
            });

        tracing::debug!(%locator, "published file set");
        Ok(self.swarm(&locator))
    }
}

#[derive(Debug)]
pub struct MemorySwarm {
    locator: Locator,
    files: Option<Vec<RemoteFile>>,
    holders: Option<watch::Receiver<usize>>,
    distribution: Arc<MemoryDistributionInner>,
}

#[async_trait]
impl Swarm for MemorySwarm {
    fn locator(&self) -> &Locator {
        &self.locator
    }

    async fn wait_for_done(&self) -> Result<Vec<RemoteFile>, DistributionError> {
        let latency = *self.distribution.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let files = self
            .files
            .clone()
            .ok_or_else(|| DistributionError::NotFound(self.locator.clone()))?;
        self.distribution.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(files)
    }

    async fn wait_for_holders(&self, count: usize) -> Result<(), DistributionError> {
        let mut holders = self
            .holders
            .clone()
            .ok_or_else(|| DistributionError::NotFound(self.locator.clone()))?;
        loop {
            if *holders.borrow_and_update() >= count {
                return Ok(());
            }
            holders
                .changed()
                .await
                .map_err(|_| DistributionError::Closed)?;
        }
    }

    fn release(&self) {
        self.distribution.releases.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(locator = %self.locator, "released swarm");
    }
}
