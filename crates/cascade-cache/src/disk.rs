//! Content-addressed disk cache with atomic writes.
//!
//! Layout under one root:
//!
//! ```text
//! data/{ekey-hex}            raw archive-derived blobs
//! indices/{name}.index       archive index files
//! builds/{build-key}/{name}  per-build table blobs (encoding, root)
//! cachesize                  aggregate size record
//! ```
//!
//! Every write lands in a `.tmp` sibling and is promoted with `rename`,
//! so readers only ever observe complete entries. There is no eviction;
//! `purge` and `purge_build` are the explicit reclaim paths.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::task;
use tokio::time::sleep;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::{Error, Result};

const SIZE_FILE: &str = "cachesize";
const DEFAULT_FLUSH_DELAY: Duration = Duration::from_secs(5);

/// Addresses one cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKey<'a> {
    /// A raw blob keyed by encoding-key hex.
    Data { ekey: &'a str },
    /// An archive index file.
    Index { name: &'a str },
    /// A per-build table blob such as `encoding` or `root`.
    Build { build: &'a str, name: &'a str },
}

impl CacheKey<'_> {
    fn relative_path(&self) -> PathBuf {
        match self {
            Self::Data { ekey } => Path::new("data").join(ekey),
            Self::Index { name } => Path::new("indices").join(format!("{name}.index")),
            Self::Build { build, name } => Path::new("builds").join(build).join(name),
        }
    }
}

struct Ledger {
    bytes: AtomicU64,
    dirty: AtomicBool,
    flushes: AtomicU64,
}

struct Inner {
    root: PathBuf,
    ledger: Ledger,
    flush_delay: Duration,
}

/// The disk cache. Cheap to clone; all clones share one size ledger.
#[derive(Clone)]
pub struct DiskCache {
    inner: Arc<Inner>,
}

impl DiskCache {
    /// Open the cache in the platform cache directory (`…/cascade`).
    pub async fn open() -> Result<Self> {
        let root = dirs::cache_dir()
            .ok_or(Error::DirectoryUnavailable)?
            .join("cascade");
        Self::open_at(root).await
    }

    /// Open the cache under an explicit root.
    pub async fn open_at(root: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_delay(root, DEFAULT_FLUSH_DELAY).await
    }

    /// Open with a custom size-flush coalescing delay.
    pub async fn open_with_delay(root: impl Into<PathBuf>, flush_delay: Duration) -> Result<Self> {
        let root = root.into();
        for dir in ["data", "indices", "builds"] {
            tokio::fs::create_dir_all(root.join(dir)).await?;
        }

        let bytes = match tokio::fs::read_to_string(root.join(SIZE_FILE)).await {
            Ok(text) => text.trim().parse().unwrap_or(0),
            Err(e) if e.kind() == ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };
        debug!("Opened cache at {:?} ({} bytes accounted)", root, bytes);

        Ok(Self {
            inner: Arc::new(Inner {
                root,
                ledger: Ledger {
                    bytes: AtomicU64::new(bytes),
                    dirty: AtomicBool::new(false),
                    flushes: AtomicU64::new(0),
                },
                flush_delay,
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Absolute path of an entry, whether or not it exists.
    pub fn entry_path(&self, key: CacheKey<'_>) -> PathBuf {
        self.inner.root.join(key.relative_path())
    }

    /// Read an entry. `Ok(None)` is a miss.
    pub async fn get(&self, key: CacheKey<'_>) -> Result<Option<Bytes>> {
        match tokio::fs::read(self.entry_path(key)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            // NotADirectory shows up when a parent component is a plain
            // file; the entry is just as absent as with NotFound.
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn contains(&self, key: CacheKey<'_>) -> bool {
        tokio::fs::metadata(self.entry_path(key)).await.is_ok()
    }

    /// Write an entry atomically: full payload to a temp file, then
    /// rename over the final path. Concurrent writers of one key each
    /// complete a full temp file and the last rename wins.
    pub async fn put(&self, key: CacheKey<'_>, data: &[u8]) -> Result<()> {
        let path = self.entry_path(key);
        let tmp = path.with_extension("tmp");

        let written = async {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&tmp, data).await?;

            // Overwrites replace the old payload in the accounting.
            let previous = match tokio::fs::metadata(&path).await {
                Ok(m) => m.len(),
                Err(_) => 0,
            };
            tokio::fs::rename(&tmp, &path).await?;
            Ok::<u64, std::io::Error>(previous)
        }
        .await;

        match written {
            Ok(previous) => {
                self.adjust(data.len() as u64 as i64 - previous as i64);
                Ok(())
            }
            Err(source) => {
                let _ = tokio::fs::remove_file(&tmp).await;
                Err(Error::WriteFailed { path, source })
            }
        }
    }

    /// Delete an entry; `Ok(false)` if it was not present.
    pub async fn delete(&self, key: CacheKey<'_>) -> Result<bool> {
        let path = self.entry_path(key);
        let len = match tokio::fs::metadata(&path).await {
            Ok(m) => m.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        tokio::fs::remove_file(&path).await?;
        self.adjust(-(len as i64));
        Ok(true)
    }

    /// Accounted total size in bytes. May lag the filesystem until the
    /// next flush; see [`Self::recompute`] for ground truth.
    pub fn size(&self) -> u64 {
        self.inner.ledger.bytes.load(Ordering::Relaxed)
    }

    /// How many times the size record has been written. Bursty updates
    /// coalesce, so this grows much slower than the put count.
    pub fn flush_count(&self) -> u64 {
        self.inner.ledger.flushes.load(Ordering::Relaxed)
    }

    /// Write the size record immediately.
    pub async fn flush_now(&self) -> Result<()> {
        self.inner.ledger.dirty.store(false, Ordering::SeqCst);
        self.inner.write_size_record().await
    }

    /// Walk the tree and reset the ledger to the actual total.
    pub async fn recompute(&self) -> Result<u64> {
        let root = self.inner.root.clone();
        let total = task::spawn_blocking(move || {
            let mut total = 0u64;
            for dir in ["data", "indices", "builds"] {
                for entry in WalkDir::new(root.join(dir)).into_iter().flatten() {
                    if let Ok(meta) = entry.metadata() {
                        if meta.is_file() {
                            total += meta.len();
                        }
                    }
                }
            }
            total
        })
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))?;

        self.inner.ledger.bytes.store(total, Ordering::SeqCst);
        self.flush_now().await?;
        Ok(total)
    }

    /// Remove every entry and reset accounting.
    pub async fn purge(&self) -> Result<()> {
        for dir in ["data", "indices", "builds"] {
            let path = self.inner.root.join(dir);
            let _ = tokio::fs::remove_dir_all(&path).await;
            tokio::fs::create_dir_all(&path).await?;
        }
        self.inner.ledger.bytes.store(0, Ordering::SeqCst);
        self.flush_now().await
    }

    /// Remove one build's table blobs and deduct them from the ledger.
    pub async fn purge_build(&self, build: &str) -> Result<()> {
        let path = self.inner.root.join("builds").join(build);
        let walked = path.clone();
        let removed = task::spawn_blocking(move || {
            WalkDir::new(&walked)
                .into_iter()
                .flatten()
                .filter_map(|e| e.metadata().ok())
                .filter(|m| m.is_file())
                .map(|m| m.len())
                .sum::<u64>()
        })
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))?;

        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        self.adjust(-(removed as i64));
        Ok(())
    }

    /// Apply a size delta and arm the coalesced flush if none is pending.
    fn adjust(&self, delta: i64) {
        let ledger = &self.inner.ledger;
        let _ = ledger
            .bytes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(current.saturating_add_signed(delta))
            });

        if !ledger.dirty.swap(true, Ordering::SeqCst) {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                sleep(inner.flush_delay).await;
                inner.ledger.dirty.store(false, Ordering::SeqCst);
                if let Err(e) = inner.write_size_record().await {
                    warn!("Failed to persist cache size record: {}", e);
                }
            });
        }
    }
}

impl Inner {
    async fn write_size_record(&self) -> Result<()> {
        let value = self.ledger.bytes.load(Ordering::SeqCst);
        tokio::fs::write(self.root.join(SIZE_FILE), value.to_string()).await?;
        self.ledger.flushes.fetch_add(1, Ordering::SeqCst);
        debug!("Flushed cache size record: {} bytes", value);
        Ok(())
    }
}
