//! Remote CDN source.
//!
//! Fetches go through the cached CDN reader: archived blobs as byte
//! ranges of their archive, loose blobs (absent from every index) whole
//! by encoding-key URL. Extracted archive slices are written back to
//! the cache under their encoding key so later reads stay local.

use bytes::Bytes;
use tracing::debug;

use cascade_cache::{CacheKey, CachedCdn};
use cascade_cdn::ByteRange;
use cascade_tact::EncodingKey;

use crate::index::IndexSet;
use crate::{Error, Result};

pub struct RemoteSource {
    cdn: CachedCdn,
}

impl RemoteSource {
    pub fn new(cdn: CachedCdn) -> Self {
        Self { cdn }
    }

    pub fn cdn(&self) -> &CachedCdn {
        &self.cdn
    }

    /// Raw encoded bytes for one encoding key.
    ///
    /// `archives` is the CDN config's archive hash list; index entries
    /// refer into it by position.
    pub async fn fetch_by_ekey(
        &self,
        archives: &[String],
        indices: &IndexSet,
        ekey: &EncodingKey,
    ) -> Result<Bytes> {
        let hex = ekey.to_string();

        let Some(location) = indices.resolve(ekey) else {
            // Not archived; loose files are fetched (and cached) whole.
            debug!("{} is loose, fetching by key", hex);
            let (bytes, _) = self.cdn.data(&hex).await?;
            return Ok(bytes);
        };

        if let Some(bytes) = self.cdn.cache().get(CacheKey::Data { ekey: &hex }).await? {
            return Ok(bytes);
        }

        let archive = archives
            .get(usize::from(location.archive_id))
            .ok_or(Error::ArchiveMissing(location.archive_id))?;
        let range = ByteRange::at(location.offset, u64::from(location.size));
        let bytes = self.cdn.archive_range(archive, range).await?;
        self.cdn.store(CacheKey::Data { ekey: &hex }, &bytes).await;
        Ok(bytes)
    }
}
