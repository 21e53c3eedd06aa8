//! Local installation source.
//!
//! A game install keeps everything the pipeline needs on disk:
//! `.build.info` at the install root names the builds, configs live
//! content-addressed under `Data/config`, bucket indices and `data.NNN`
//! archives under `Data/data`. Reads are plain `std::fs`; archive
//! entries are small and the caller already runs them under a
//! concurrency bound.

use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use cascade_tact::idx::{self, IdxFile};
use cascade_tact::manifest::{self, InstalledBuild};
use cascade_tact::{ArchiveLocation, EncodingKey};

use crate::index::IndexSet;
use crate::{Error, Result};

/// Bytes before the BLTE payload in every local archive entry:
/// reversed encoding key, stored size, flags, two checksums.
const ENTRY_HEADER_LEN: usize = 16 + 4 + 2 + 4 + 4;

/// An opened local installation.
pub struct LocalInstall {
    root: PathBuf,
    data_dir: PathBuf,
}

impl LocalInstall {
    /// Open an install directory. Fails with [`Error::SourceUnavailable`]
    /// when there is no `.build.info` to load builds from.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.join(".build.info").is_file() {
            return Err(Error::SourceUnavailable(format!(
                "{} has no .build.info",
                root.display()
            )));
        }
        let data_dir = root.join("Data").join("data");
        info!("Opened local install at {}", root.display());
        Ok(Self { root, data_dir })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All builds listed in `.build.info`.
    pub fn builds(&self) -> Result<Vec<InstalledBuild>> {
        let text = fs::read_to_string(self.root.join(".build.info"))?;
        Ok(manifest::parse_build_info(&text)?)
    }

    /// The build marked active, or the first row when none is marked.
    pub fn active_build(&self) -> Result<InstalledBuild> {
        let builds = self.builds()?;
        builds
            .iter()
            .find(|build| build.active)
            .or_else(|| builds.first())
            .cloned()
            .ok_or_else(|| Error::SourceUnavailable(".build.info lists no builds".into()))
    }

    /// Bytes of a config document under `Data/config/{aa}/{bb}/{hash}`.
    pub fn config_bytes(&self, hash: &str) -> Result<Vec<u8>> {
        if hash.len() < 4 {
            return Err(Error::SourceUnavailable(format!("bad config hash {hash:?}")));
        }
        let path = self
            .root
            .join("Data")
            .join("config")
            .join(&hash[0..2])
            .join(&hash[2..4])
            .join(hash);
        Ok(fs::read(path)?)
    }

    /// Load every `.idx` bucket index under `Data/data`, keeping the
    /// highest version per bucket, and merge them into one set.
    pub fn load_indices(&self) -> Result<IndexSet> {
        let mut newest: [Option<(u32, PathBuf)>; 16] = Default::default();
        for entry in fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some((bucket, version)) = name.to_str().and_then(idx::parse_idx_name) else {
                continue;
            };
            let slot = &mut newest[usize::from(bucket)];
            if slot.as_ref().is_none_or(|(best, _)| version > *best) {
                *slot = Some((version, entry.path()));
            }
        }

        let mut set = IndexSet::new();
        let mut loaded = 0;
        for slot in newest.into_iter().flatten() {
            let (version, path) = slot;
            match IdxFile::parse(&fs::read(&path)?) {
                Ok(idx) => {
                    debug!(
                        "Loaded idx bucket {:02x} v{}: {} entries",
                        idx.header.bucket,
                        version,
                        idx.len()
                    );
                    set.add_idx(&idx);
                    loaded += 1;
                }
                Err(e) => warn!("Skipping index {}: {}", path.display(), e),
            }
        }

        if loaded == 0 {
            return Err(Error::SourceUnavailable(format!(
                "{} holds no usable .idx files",
                self.data_dir.display()
            )));
        }
        info!("Loaded {} bucket indices ({} entries)", loaded, set.len());
        Ok(set)
    }

    /// Read one archive entry's BLTE payload.
    ///
    /// Validates the entry header against the index entry before
    /// returning the bytes after it: the stored key is the encoding key
    /// reversed, and the stored size must equal the indexed size.
    pub fn read_location(
        &self,
        ekey: &EncodingKey,
        location: &ArchiveLocation,
    ) -> Result<Vec<u8>> {
        let bad = |reason| Error::BadArchiveEntry {
            archive: location.archive_id,
            offset: location.offset,
            reason,
        };

        if (location.size as usize) <= ENTRY_HEADER_LEN {
            return Err(bad("entry smaller than its header"));
        }

        let path = self.data_dir.join(format!("data.{:03}", location.archive_id));
        let mut file = fs::File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ArchiveMissing(location.archive_id)
            } else {
                Error::Io(e)
            }
        })?;

        file.seek(SeekFrom::Start(location.offset))?;
        let mut raw = vec![0u8; location.size as usize];
        file.read_exact(&mut raw)
            .map_err(|_| bad("entry extends past the archive"))?;

        // Header key bytes are stored reversed. Local indices only know
        // the truncated key, so compare the prefix we can vouch for.
        let truncated = ekey.truncated();
        if !raw[..16]
            .iter()
            .rev()
            .zip(truncated.iter())
            .all(|(a, b)| a == b)
        {
            return Err(bad("entry key does not match the index"));
        }

        let stored_size = u32::from_le_bytes([raw[16], raw[17], raw[18], raw[19]]);
        if stored_size != location.size {
            return Err(bad("entry size does not match the index"));
        }

        raw.drain(..ENTRY_HEADER_LEN);
        Ok(raw)
    }
}
