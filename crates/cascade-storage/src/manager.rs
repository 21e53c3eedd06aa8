//! The storage manager: one loaded build behind a swappable handle.

use std::io::Cursor;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures::future;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Semaphore;
use tracing::{debug, info};

use cascade_cache::{CacheKey, CachedCdn, DiskCache};
use cascade_cdn::{CdnClient, CdnHosts, PatchServer, Region};
use cascade_crypto::Keyring;
use cascade_tact::archive_index::ArchiveIndex;
use cascade_tact::config::{BuildConfig, CdnConfig};
use cascade_tact::encoding::EncodingTable;
use cascade_tact::root::{LocaleFlags, RootPolicy, RootTable};
use cascade_tact::{ContentKey, EncodingKey};

use crate::cancel::CancellationToken;
use crate::events::{EventRegistry, StorageEvent};
use crate::index::IndexSet;
use crate::local::LocalInstall;
use crate::remote::RemoteSource;
use crate::{Error, Result};

/// Decoded blobs kept hot in memory, by count.
const MEMORY_CACHE_ENTRIES: usize = 256;

/// Tuning knobs for a [`Storage`].
#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// Locale used for root resolution (and the load-time root filter).
    pub locale: LocaleFlags,
    /// Variant selection among content-flag alternatives.
    pub policy: RootPolicy,
    /// Simultaneous archive/network reads.
    pub max_concurrent_reads: usize,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            locale: LocaleFlags::new().with_en_us(true),
            policy: RootPolicy::default(),
            max_concurrent_reads: 8,
        }
    }
}

/// One loaded build: the immutable table set requests resolve against.
///
/// Handed out as an `Arc`; in-flight readers keep their generation
/// alive across a swap.
pub struct Build {
    generation: u64,
    build_key: String,
    build_config: BuildConfig,
    /// CDN archive hashes in id order; empty for local installs.
    archives: Vec<String>,
    indices: IndexSet,
    encoding: EncodingTable,
    root: RootTable,
}

impl Build {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn build_key(&self) -> &str {
        &self.build_key
    }

    pub fn build_config(&self) -> &BuildConfig {
        &self.build_config
    }

    pub fn encoding(&self) -> &EncodingTable {
        &self.encoding
    }

    pub fn root(&self) -> &RootTable {
        &self.root
    }

    pub fn indices(&self) -> &IndexSet {
        &self.indices
    }
}

enum Source {
    Local(LocalInstall),
    Remote {
        source: RemoteSource,
        build_key: String,
        cdn_key: String,
    },
}

/// Resolves logical file identifiers to decoded bytes.
///
/// Owns the pipeline end to end: root and encoding tables, merged
/// indices, the blob source (local install or cached CDN), the keyring
/// consulted for encrypted chunks, and the event registry reporting
/// lifecycle progress. Constructing a manager does not load anything;
/// call [`load`](Self::load) to bring a build up.
pub struct Storage {
    source: Source,
    options: StorageOptions,
    keys: RwLock<Keyring>,
    active: RwLock<Option<Arc<Build>>>,
    generation: AtomicU64,
    events: EventRegistry,
    cancel: CancellationToken,
    semaphore: Arc<Semaphore>,
    memory: Mutex<LruCache<EncodingKey, Bytes>>,
}

/// The file-access seam consumers program against; lets UI layers and
/// exporters take any provider, including a test double.
#[async_trait]
pub trait FileProvider: Send + Sync {
    async fn read_by_id(&self, file_id: u32) -> Result<Bytes>;
    async fn read_by_name(&self, path: &str) -> Result<Bytes>;
}

impl Storage {
    fn with_source(source: Source, options: StorageOptions) -> Self {
        let permits = options.max_concurrent_reads.max(1);
        let memory_entries = NonZeroUsize::new(MEMORY_CACHE_ENTRIES).unwrap_or(NonZeroUsize::MIN);
        Self {
            source,
            options,
            keys: RwLock::new(Keyring::new()),
            active: RwLock::new(None),
            generation: AtomicU64::new(0),
            events: EventRegistry::new(),
            cancel: CancellationToken::new(),
            semaphore: Arc::new(Semaphore::new(permits)),
            memory: Mutex::new(LruCache::new(memory_entries)),
        }
    }

    /// Manager over a local installation directory.
    pub fn local(install_root: impl Into<PathBuf>, options: StorageOptions) -> Result<Self> {
        let install = LocalInstall::open(install_root)?;
        Ok(Self::with_source(Source::Local(install), options))
    }

    /// Manager over a remote build, addressed by its config hashes.
    pub fn remote(
        cdn: CachedCdn,
        build_key: impl Into<String>,
        cdn_key: impl Into<String>,
        options: StorageOptions,
    ) -> Self {
        Self::with_source(
            Source::Remote {
                source: RemoteSource::new(cdn),
                build_key: build_key.into(),
                cdn_key: cdn_key.into(),
            },
            options,
        )
    }

    /// Manager over the current build of a product, discovered through
    /// the patch service.
    pub async fn discover(
        client: CdnClient,
        cache: DiskCache,
        region: Region,
        product: &str,
        options: StorageOptions,
    ) -> Result<Self> {
        let patch = PatchServer::new(client.clone(), region);
        let version = patch.version_for(product, region).await?;
        let cdn = patch.cdn_for(product, region).await?;
        info!(
            "Discovered {} build {} ({})",
            product, version.versions_name, version.build_config
        );

        let hosts = if cdn.hosts.is_empty() {
            cdn.servers
        } else {
            cdn.hosts
        };
        let cached = CachedCdn::new(CdnHosts::new(client, hosts, cdn.path), cache);
        Ok(Self::remote(
            cached,
            version.build_config,
            version.cdn_config,
            options,
        ))
    }

    /// Point a remote manager at a different build. Takes effect on the
    /// next [`load`](Self::load); the active generation is untouched.
    pub fn set_remote_build(
        &mut self,
        build_key: impl Into<String>,
        cdn_key: impl Into<String>,
    ) -> Result<()> {
        match &mut self.source {
            Source::Remote {
                build_key: build,
                cdn_key: cdn,
                ..
            } => {
                *build = build_key.into();
                *cdn = cdn_key.into();
                Ok(())
            }
            Source::Local(_) => Err(Error::SourceUnavailable(
                "local installs choose builds through .build.info".into(),
            )),
        }
    }

    pub fn events(&self) -> &EventRegistry {
        &self.events
    }

    /// A token that cancels this manager's operations when triggered.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn options(&self) -> &StorageOptions {
        &self.options
    }

    /// Register a runtime decryption key.
    pub fn register_key(&self, name: u64, key: [u8; 16]) {
        self.keys.write().register(name, key);
    }

    /// Merge a user key file into the keyring.
    pub fn load_key_file(&self, path: &Path) -> Result<usize> {
        Ok(self.keys.write().load_key_file(path)?)
    }

    /// Scan the conventional key-file locations.
    pub fn load_standard_keys(&self) -> Result<usize> {
        Ok(self.keys.write().load_from_standard_dirs()?)
    }

    /// The active build, for direct table queries.
    pub fn active(&self) -> Result<Arc<Build>> {
        self.active.read().clone().ok_or(Error::NoActiveBuild)
    }

    /// Load (or reload) the build and swap it in as the new generation.
    /// Returns the new generation number.
    pub async fn load(&self) -> Result<u64> {
        let mut build = match &self.source {
            Source::Local(install) => self.load_local(install)?,
            Source::Remote {
                source,
                build_key,
                cdn_key,
            } => self.load_remote(source, build_key, cdn_key).await?,
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        build.generation = generation;
        let build_key = build.build_key.clone();

        *self.active.write() = Some(Arc::new(build));
        self.memory.lock().clear();
        info!("Build {} active as generation {}", build_key, generation);
        self.events.emit(&StorageEvent::BuildSwapped {
            generation,
            build: build_key,
        });
        Ok(generation)
    }

    /// Decoded content of a file id, for the configured locale.
    pub async fn read_by_id(&self, file_id: u32) -> Result<Bytes> {
        let build = self.active()?;
        let ckey = build
            .root
            .resolve(file_id, self.options.locale, self.options.policy)
            .ok_or(Error::FileIdNotFound(file_id))?;
        self.read_ckey_in(&build, &ckey).await
    }

    /// Decoded content of a file addressed by virtual path.
    pub async fn read_by_name(&self, path: &str) -> Result<Bytes> {
        let build = self.active()?;
        let ckey = build
            .root
            .resolve_by_name(path, self.options.locale, self.options.policy)
            .ok_or_else(|| Error::NameNotFound(path.to_string()))?;
        self.read_ckey_in(&build, &ckey).await
    }

    /// Decoded content for a content key.
    pub async fn read_by_ckey(&self, ckey: &ContentKey) -> Result<Bytes> {
        let build = self.active()?;
        self.read_ckey_in(&build, ckey).await
    }

    /// Decoded content for one specific encoded blob.
    pub async fn read_by_ekey(&self, ekey: &EncodingKey) -> Result<Bytes> {
        let build = self.active()?;
        self.read_ekey_in(&build, ekey).await
    }

    /// Resolve many file ids concurrently, bounded by the read limit.
    /// Per-file failures are returned in place, not raised.
    pub async fn read_many(&self, file_ids: &[u32]) -> Vec<(u32, Result<Bytes>)> {
        let reads = file_ids
            .iter()
            .map(|&file_id| async move { (file_id, self.read_by_id(file_id).await) });
        future::join_all(reads).await
    }

    /// Drop cached blobs, on disk (remote sources) and in memory.
    pub async fn purge_cache(&self) -> Result<()> {
        if let Source::Remote { source, .. } = &self.source {
            source.cdn().cache().purge().await?;
        }
        self.memory.lock().clear();
        self.events.emit(&StorageEvent::CachePurged);
        Ok(())
    }

    async fn read_ckey_in(&self, build: &Build, ckey: &ContentKey) -> Result<Bytes> {
        let entry = build
            .encoding
            .lookup(ckey)?
            .ok_or(Error::ContentNotFound(*ckey))?;

        // The first encoding key is the canonical blob; later ones are
        // alternates worth trying when it cannot be located.
        let mut last: Option<Error> = None;
        for ekey in &entry.ekeys {
            match self.read_ekey_in(build, ekey).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) if e.is_not_found() => {
                    debug!("Blob {} unavailable for {}: {}", ekey, ckey, e);
                    last = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last.unwrap_or(Error::ContentNotFound(*ckey)))
    }

    async fn read_ekey_in(&self, build: &Build, ekey: &EncodingKey) -> Result<Bytes> {
        self.cancel.check()?;

        if let Some(bytes) = self.memory.lock().get(ekey) {
            return Ok(bytes.clone());
        }

        let raw = self.fetch_raw(build, ekey).await?;
        let decoded = self.decode_blob(&raw)?;
        let bytes = Bytes::from(decoded);
        self.memory.lock().put(*ekey, bytes.clone());
        Ok(bytes)
    }

    /// Raw encoded bytes for an encoding key, under the read bound.
    async fn fetch_raw(&self, build: &Build, ekey: &EncodingKey) -> Result<Bytes> {
        // The semaphore is never closed, so acquisition only fails if
        // the runtime is tearing down.
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| Error::Cancelled)?;
        self.cancel.check()?;

        match &self.source {
            Source::Local(install) => {
                let location = build
                    .indices
                    .resolve(ekey)
                    .ok_or(Error::IndexNotFound(*ekey))?;
                Ok(Bytes::from(install.read_location(ekey, &location)?))
            }
            Source::Remote { source, .. } => {
                source
                    .fetch_by_ekey(&build.archives, &build.indices, ekey)
                    .await
            }
        }
    }

    /// BLTE-decode with the current keyring. Sync on purpose: the
    /// keyring read guard must not live across an await.
    fn decode_blob(&self, raw: &[u8]) -> Result<Vec<u8>> {
        let keys = self.keys.read();
        Ok(cascade_blte::decode(raw, Some(&keys))?)
    }

    fn stage_start(&self, stage: &'static str) {
        self.events.emit(&StorageEvent::LoadStageStarted { stage });
    }

    fn stage_done(&self, stage: &'static str) {
        self.events.emit(&StorageEvent::LoadStageCompleted { stage });
    }

    fn load_local(&self, install: &LocalInstall) -> Result<Build> {
        self.cancel.check()?;

        self.stage_start("configs");
        let build = install.active_build()?;
        let text = String::from_utf8_lossy(&install.config_bytes(&build.build_key)?).into_owned();
        let build_config = BuildConfig::parse(&text);
        self.stage_done("configs");

        self.stage_start("indices");
        let indices = install.load_indices()?;
        self.stage_done("indices");

        self.stage_start("encoding");
        self.cancel.check()?;
        let (_, encoding_ekey) = build_config.encoding()?;
        let location = indices
            .resolve(&encoding_ekey)
            .ok_or(Error::IndexNotFound(encoding_ekey))?;
        let raw = install.read_location(&encoding_ekey, &location)?;
        let encoding = EncodingTable::parse(self.decode_blob(&raw)?)?;
        self.stage_done("encoding");

        self.stage_start("root");
        self.cancel.check()?;
        let root_ckey = build_config.root()?;
        let root_ekey = encoding
            .ekey_for(&root_ckey)?
            .ok_or(Error::ContentNotFound(root_ckey))?;
        let location = indices
            .resolve(&root_ekey)
            .ok_or(Error::IndexNotFound(root_ekey))?;
        let raw = install.read_location(&root_ekey, &location)?;
        let decoded = self.decode_blob(&raw)?;
        let root = RootTable::parse(&mut Cursor::new(decoded.as_slice()), self.options.locale)?;
        self.stage_done("root");

        Ok(Build {
            generation: 0,
            build_key: build.build_key,
            build_config,
            archives: Vec::new(),
            indices,
            encoding,
            root,
        })
    }

    async fn load_remote(
        &self,
        source: &RemoteSource,
        build_key: &str,
        cdn_key: &str,
    ) -> Result<Build> {
        self.cancel.check()?;

        self.stage_start("configs");
        let (bytes, _) = source.cdn().config(build_key).await?;
        let build_config = BuildConfig::parse(&String::from_utf8_lossy(&bytes));
        let (bytes, _) = source.cdn().config(cdn_key).await?;
        let cdn_config = CdnConfig::parse(&String::from_utf8_lossy(&bytes));
        self.stage_done("configs");

        self.stage_start("indices");
        let archives: Vec<String> = cdn_config
            .archives()
            .iter()
            .map(ToString::to_string)
            .collect();
        let total = archives.len();
        let done = AtomicUsize::new(0);
        let fetched = future::try_join_all(archives.iter().map(|hash| {
            let done = &done;
            async move {
                let _permit = self
                    .semaphore
                    .acquire()
                    .await
                    .map_err(|_| Error::Cancelled)?;
                self.cancel.check()?;
                let (raw, _) = source.cdn().index(hash).await?;
                let index = ArchiveIndex::parse(&raw)?;
                let completed = done.fetch_add(1, Ordering::SeqCst) + 1;
                self.events.emit(&StorageEvent::LoadProgress {
                    stage: "indices",
                    done: completed,
                    total,
                });
                Ok::<ArchiveIndex, Error>(index)
            }
        }))
        .await?;

        // Merge in archive id order so duplicate keys keep the mapping
        // from the earliest archive, whatever order the fetches landed.
        let mut indices = IndexSet::new();
        for (id, index) in fetched.iter().enumerate() {
            let id = u16::try_from(id)
                .map_err(|_| Error::SourceUnavailable("archive list too long".into()))?;
            indices.add_archive_index(id, index);
        }
        self.stage_done("indices");

        self.stage_start("encoding");
        self.cancel.check()?;
        let encoding_key = CacheKey::Build {
            build: build_key,
            name: "encoding",
        };
        let encoding_raw = match source.cdn().cache().get(encoding_key).await? {
            Some(bytes) => bytes.to_vec(),
            None => {
                let (_, encoding_ekey) = build_config.encoding()?;
                let raw = source
                    .fetch_by_ekey(&archives, &indices, &encoding_ekey)
                    .await?;
                let decoded = self.decode_blob(&raw)?;
                source.cdn().store(encoding_key, &decoded).await;
                decoded
            }
        };
        let encoding = EncodingTable::parse(encoding_raw)?;
        self.stage_done("encoding");

        self.stage_start("root");
        self.cancel.check()?;
        let root_key = CacheKey::Build {
            build: build_key,
            name: "root",
        };
        let root_raw = match source.cdn().cache().get(root_key).await? {
            Some(bytes) => bytes.to_vec(),
            None => {
                let root_ckey = build_config.root()?;
                let root_ekey = encoding
                    .ekey_for(&root_ckey)?
                    .ok_or(Error::ContentNotFound(root_ckey))?;
                let raw = source.fetch_by_ekey(&archives, &indices, &root_ekey).await?;
                let decoded = self.decode_blob(&raw)?;
                source.cdn().store(root_key, &decoded).await;
                decoded
            }
        };
        let root = RootTable::parse(&mut Cursor::new(root_raw.as_slice()), self.options.locale)?;
        self.stage_done("root");

        Ok(Build {
            generation: 0,
            build_key: build_key.to_string(),
            build_config,
            archives,
            indices,
            encoding,
            root,
        })
    }
}

#[async_trait]
impl FileProvider for Storage {
    async fn read_by_id(&self, file_id: u32) -> Result<Bytes> {
        Self::read_by_id(self, file_id).await
    }

    async fn read_by_name(&self, path: &str) -> Result<Bytes> {
        Self::read_by_name(self, path).await
    }
}
