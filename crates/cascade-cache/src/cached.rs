//! Write-through CDN reader: check cache, fetch on miss, keep the bytes.

use bytes::Bytes;
use tracing::{debug, warn};

use cascade_cdn::{ByteRange, CdnHosts};

use crate::disk::{CacheKey, DiskCache};
use crate::Result;

/// Where a fetch was satisfied from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    Cache,
    Network,
}

/// A CDN host set fronted by the disk cache.
///
/// Reads go cache-first; misses fetch through [`CdnHosts`] and write the
/// result back. A failed write-back is logged and swallowed so a full
/// disk never turns a successful fetch into an error.
pub struct CachedCdn {
    hosts: CdnHosts,
    cache: DiskCache,
}

impl CachedCdn {
    pub fn new(hosts: CdnHosts, cache: DiskCache) -> Self {
        Self { hosts, cache }
    }

    pub fn hosts(&self) -> &CdnHosts {
        &self.hosts
    }

    pub fn cache(&self) -> &DiskCache {
        &self.cache
    }

    /// A whole blob from the `data` path, cached by its hash.
    pub async fn data(&self, hash: &str) -> Result<(Bytes, Provenance)> {
        let key = CacheKey::Data { ekey: hash };
        if let Some(bytes) = self.cache.get(key).await? {
            debug!("Cache hit for data {}", hash);
            return Ok((bytes, Provenance::Cache));
        }

        let bytes = self.hosts.data(hash).await?;
        self.write_back(key, &bytes).await;
        Ok((bytes, Provenance::Network))
    }

    /// A byte slice of an archive. Slices are not cached themselves; the
    /// caller caches the blob it extracts, keyed by its encoding key.
    pub async fn archive_range(&self, archive: &str, range: ByteRange) -> Result<Bytes> {
        Ok(self.hosts.data_range(archive, range).await?)
    }

    /// An archive `.index` file, cached under `indices/`.
    pub async fn index(&self, hash: &str) -> Result<(Bytes, Provenance)> {
        let key = CacheKey::Index { name: hash };
        if let Some(bytes) = self.cache.get(key).await? {
            debug!("Cache hit for index {}", hash);
            return Ok((bytes, Provenance::Cache));
        }

        let bytes = self.hosts.index(hash).await?;
        self.write_back(key, &bytes).await;
        Ok((bytes, Provenance::Network))
    }

    /// A configuration document, cached in the build's scope.
    pub async fn config(&self, hash: &str) -> Result<(Bytes, Provenance)> {
        let key = CacheKey::Build {
            build: hash,
            name: "config",
        };
        if let Some(bytes) = self.cache.get(key).await? {
            debug!("Cache hit for config {}", hash);
            return Ok((bytes, Provenance::Cache));
        }

        let bytes = self.hosts.config(hash).await?;
        self.write_back(key, &bytes).await;
        Ok((bytes, Provenance::Network))
    }

    /// Store a blob produced by the caller (an extracted archive entry or
    /// a decoded table) so later reads are local.
    pub async fn store(&self, key: CacheKey<'_>, data: &[u8]) {
        self.write_back(key, data).await;
    }

    async fn write_back(&self, key: CacheKey<'_>, data: &[u8]) {
        if let Err(e) = self.cache.put(key, data).await {
            warn!("Cache write-back failed: {}", e);
        }
    }
}
