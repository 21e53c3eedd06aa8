//! Merged index lookup across segments.
//!
//! A build's blob locations arrive in pieces: one CDN `.index` per
//! archive, or sixteen local `.idx` buckets. This merges them into one
//! map. CDN indices carry full 16-byte keys, local buckets 9-byte
//! truncated ones, so two maps are kept and a lookup tries full first.
//! On duplicate keys the first-loaded mapping is retained.

use std::collections::HashMap;

use tracing::debug;

use cascade_tact::archive_index::ArchiveIndex;
use cascade_tact::idx::{IdxFile, TruncatedKey};
use cascade_tact::{ArchiveLocation, EncodingKey};

#[derive(Default)]
pub struct IndexSet {
    full: HashMap<EncodingKey, ArchiveLocation>,
    truncated: HashMap<TruncatedKey, ArchiveLocation>,
}

impl IndexSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one CDN archive index, placing its entries in `archive_id`
    /// (the archive's position in the CDN config's `archives` list).
    pub fn add_archive_index(&mut self, archive_id: u16, index: &ArchiveIndex) {
        for entry in index.entries() {
            let location = ArchiveLocation {
                archive_id,
                offset: entry.offset,
                size: entry.size,
            };
            self.full.entry(entry.ekey).or_insert(location);
        }
        debug!(
            "Merged archive {} index: {} entries, {} total",
            archive_id,
            index.len(),
            self.full.len()
        );
    }

    /// Merge one local `.idx` bucket.
    pub fn add_idx(&mut self, idx: &IdxFile) {
        for (key, location) in idx.entries() {
            self.truncated.entry(*key).or_insert(*location);
        }
    }

    /// Record a single full-key location, keeping any earlier one.
    pub fn insert(&mut self, ekey: EncodingKey, location: ArchiveLocation) {
        self.full.entry(ekey).or_insert(location);
    }

    /// Location of an encoded blob, if any loaded segment has it.
    pub fn resolve(&self, ekey: &EncodingKey) -> Option<ArchiveLocation> {
        self.full
            .get(ekey)
            .or_else(|| self.truncated.get(&ekey.truncated()))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.full.len() + self.truncated.len()
    }

    pub fn is_empty(&self) -> bool {
        self.full.is_empty() && self.truncated.is_empty()
    }
}
