//! Published file sets
//!
//! A [`Bucket`] is a named set of files owned by one identity, registered on
//! the ledger and published through a peer [`Distribution`] network. Reads
//! fetch lazily; writes stay local until [`Bucket::publish`].
//!
//! ```text
//! Cold --first read--> Fetching --done--> Ready
//! Empty (no locator) --------------------> Ready
//! ```

#[allow(clippy::module_inception)]
mod bucket;
mod distribution;
mod memory;

use async_trait::async_trait;

pub use bucket::{Bucket, BucketError, BucketInfo, DEFAULT_NETWORK_TIMEOUT};
pub use distribution::{Distribution, DistributionError, Locator, RemoteFile, Swarm};
pub use memory::{MemoryDistribution, MemorySwarm};

/// Whoever may change a bucket's record on the ledger
#[async_trait]
pub trait BucketAuthority: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Make sure the caller may update `name`, prompting if needed
    async fn request_update_permission(&self, name: &str) -> Result<(), Self::Error>;

    /// Point `name` at `locator`
    async fn update_locator(&self, name: &str, locator: &Locator) -> Result<(), Self::Error>;
}
