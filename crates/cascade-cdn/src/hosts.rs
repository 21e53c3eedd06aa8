//! Host failover: one logical fetch walked across a prioritized host list.

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::client::{build_url, ByteRange, CdnClient, PathKind};
use crate::{Error, Result};

/// A CDN host set for one product path, tried in priority order.
///
/// The host list comes from the `cdns` manifest (or `.build.info` for a
/// local install) and is walked in order on every fetch; per-host retry
/// happens inside [`CdnClient`], so by the time the next host is tried
/// the previous one has genuinely failed.
pub struct CdnHosts {
    client: CdnClient,
    hosts: RwLock<Vec<String>>,
    path: String,
}

impl CdnHosts {
    pub fn new(client: CdnClient, hosts: Vec<String>, path: impl Into<String>) -> Self {
        Self {
            client,
            hosts: RwLock::new(hosts),
            path: path.into(),
        }
    }

    /// Product path component, e.g. `tpr/wow`.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn hosts(&self) -> Vec<String> {
        self.hosts.read().clone()
    }

    /// Replace the host list, keeping priority order.
    pub fn set_hosts(&self, hosts: Vec<String>) {
        *self.hosts.write() = hosts;
    }

    /// Whole blob from the `data` path, keyed by hash.
    pub async fn data(&self, hash: &str) -> Result<Bytes> {
        self.fetch(PathKind::Data, hash, None, false).await
    }

    /// Byte slice of an archive from the `data` path.
    pub async fn data_range(&self, hash: &str, range: ByteRange) -> Result<Bytes> {
        self.fetch(PathKind::Data, hash, Some(range), false).await
    }

    /// Archive `.index` companion file.
    pub async fn index(&self, hash: &str) -> Result<Bytes> {
        self.fetch(PathKind::Data, hash, None, true).await
    }

    /// Build or CDN configuration document.
    pub async fn config(&self, hash: &str) -> Result<Bytes> {
        self.fetch(PathKind::Config, hash, None, false).await
    }

    async fn fetch(
        &self,
        kind: PathKind,
        hash: &str,
        range: Option<ByteRange>,
        index: bool,
    ) -> Result<Bytes> {
        let hosts = self.hosts();
        if hosts.is_empty() {
            return Err(Error::NoHosts);
        }

        let mut last: Option<Error> = None;
        for host in &hosts {
            let url = build_url(host, &self.path, kind, hash, index)?;
            match self.client.get(&url, range).await {
                Ok(bytes) => {
                    debug!("Fetched {} ({} bytes) from {}", hash, bytes.len(), host);
                    return Ok(bytes);
                }
                Err(e) => {
                    warn!("Host {} failed for {}: {}", host, hash, e);
                    last = Some(e);
                }
            }
        }

        // A 404 on every host means the content does not exist, which is
        // a different condition than the hosts being unreachable.
        match last {
            Some(e @ Error::NotFound { .. }) => Err(e),
            Some(e) => Err(Error::AllHostsFailed {
                hosts: hosts.len(),
                last: Box::new(e),
            }),
            None => Err(Error::NoHosts),
        }
    }
}
