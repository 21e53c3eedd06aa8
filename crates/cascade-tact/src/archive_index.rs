//! CDN archive `.index` files.
//!
//! Each CDN archive ships a companion `.index` mapping encoding keys to
//! (offset, size) slices of that one archive. The file is a run of
//! fixed-size entry blocks, a table of contents (last key plus partial
//! checksum per block), and a trailing footer. The footer's own width
//! depends on its checksum size, so parsing starts by trying each
//! candidate width from the end of the file until the self-checksum
//! matches.
//!
//! Archive ids are not stored here; the loader assigns them from the
//! position of the archive hash in the CDN config's `archives` list.

use md5::compute as md5sum;
use tracing::{debug, trace};

use crate::keys::{EncodingKey, KEY_LENGTH};
use crate::{Error, Result};

/// Widths the footer checksum is known to use.
const MIN_CHECKSUM_SIZE: usize = 8;
const MAX_CHECKSUM_SIZE: usize = 16;

/// Footer bytes for a given checksum width: the checksum twice (TOC hash
/// and footer hash) around 12 bytes of fixed fields.
const fn footer_len(checksum_size: usize) -> usize {
    12 + checksum_size * 2
}

/// Archive index footer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexFooter {
    /// Truncated MD5 of the table of contents.
    pub toc_hash: Vec<u8>,
    pub version: u8,
    /// Bytes per block, stored as a KiB count on the wire.
    pub block_size: usize,
    pub offset_bytes: usize,
    pub size_bytes: usize,
    pub key_size: usize,
    pub checksum_size: usize,
    pub num_elements: u32,
}

impl IndexFooter {
    /// Locate and parse the footer at the end of `raw`.
    ///
    /// The footer hash covers the fixed fields with the hash field itself
    /// zeroed; each candidate checksum width is tried from widest down
    /// until one self-verifies.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        for checksum_size in (MIN_CHECKSUM_SIZE..=MAX_CHECKSUM_SIZE).rev() {
            let len = footer_len(checksum_size);
            let Some(footer) = raw.get(raw.len().wrapping_sub(len)..) else {
                continue;
            };

            let body = &footer[checksum_size..len - checksum_size];
            let mut hashed = body.to_vec();
            hashed.resize(body.len() + checksum_size, 0);
            if !md5sum(&hashed).0.starts_with(&footer[len - checksum_size..]) {
                continue;
            }

            // Candidate self-verified; the declared checksum size must
            // agree with the width that found it.
            if usize::from(body[7]) != checksum_size {
                continue;
            }

            let version = body[0];
            if version != 1 {
                return Err(Error::UnsupportedVersion {
                    format: "archive index",
                    version: u32::from(version),
                });
            }

            let footer = Self {
                toc_hash: footer[..checksum_size].to_vec(),
                version,
                block_size: usize::from(body[3]) << 10,
                offset_bytes: usize::from(body[4]),
                size_bytes: usize::from(body[5]),
                key_size: usize::from(body[6]),
                checksum_size,
                num_elements: u32::from_le_bytes([body[8], body[9], body[10], body[11]]),
            };

            if footer.block_size == 0
                || footer.key_size == 0
                || footer.key_size > KEY_LENGTH
                || footer.offset_bytes > 8
                || footer.size_bytes > 8
            {
                return Err(Error::Truncated("archive index footer"));
            }

            trace!(
                "Index footer: {} elements, {}-byte blocks, checksum width {}",
                footer.num_elements, footer.block_size, checksum_size
            );
            return Ok(footer);
        }

        Err(Error::FooterNotFound)
    }

    fn entry_len(&self) -> usize {
        self.key_size + self.size_bytes + self.offset_bytes
    }

    fn entries_per_block(&self) -> usize {
        self.block_size / self.entry_len()
    }

    /// Blocks needed for the declared element count.
    fn num_blocks(&self) -> usize {
        let per_block = self.entries_per_block();
        (self.num_elements as usize).div_ceil(per_block.max(1))
    }
}

/// One entry: an encoding key and its slice of the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveIndexEntry {
    pub ekey: EncodingKey,
    pub size: u32,
    pub offset: u64,
}

/// Parsed archive index, entries in file (key) order.
#[derive(Debug)]
pub struct ArchiveIndex {
    pub footer: IndexFooter,
    entries: Vec<ArchiveIndexEntry>,
}

impl ArchiveIndex {
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let footer = IndexFooter::parse(raw)?;

        let num_blocks = footer.num_blocks();
        let toc_start = num_blocks * footer.block_size;
        let toc_len = num_blocks * (footer.key_size + footer.checksum_size);
        let toc = raw
            .get(toc_start..toc_start + toc_len)
            .ok_or(Error::Truncated("archive index TOC"))?;
        if !md5sum(toc).0.starts_with(&footer.toc_hash) {
            return Err(Error::ChecksumMismatch("archive index TOC"));
        }

        let mut entries = Vec::with_capacity(footer.num_elements as usize);
        for block_index in 0..num_blocks {
            let start = block_index * footer.block_size;
            let block = raw
                .get(start..start + footer.block_size)
                .ok_or(Error::Truncated("archive index block"))?;

            // Per-block partial checksums trail the last-key array.
            let checksum_at = num_blocks * footer.key_size + block_index * footer.checksum_size;
            let expected = &toc[checksum_at..checksum_at + footer.checksum_size];
            if !md5sum(block).0.starts_with(expected) {
                return Err(Error::ChecksumMismatch("archive index block"));
            }

            parse_block(block, &footer, &mut entries)?;
        }

        debug!(
            "Archive index: {} entries in {} blocks",
            entries.len(),
            num_blocks
        );
        if entries.len() != footer.num_elements as usize {
            return Err(Error::Truncated("archive index entries"));
        }

        Ok(Self { footer, entries })
    }

    pub fn entries(&self) -> &[ArchiveIndexEntry] {
        &self.entries
    }

    /// Entry for an encoding key. Entries are stored in key order, so
    /// this is a binary search.
    pub fn lookup(&self, ekey: &EncodingKey) -> Option<&ArchiveIndexEntry> {
        self.entries
            .binary_search_by(|entry| entry.ekey.cmp(ekey))
            .ok()
            .map(|at| &self.entries[at])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Entries run until the block cannot hold another or the key is all
/// zeroes (early terminator, the rest of the block is padding).
fn parse_block(
    block: &[u8],
    footer: &IndexFooter,
    entries: &mut Vec<ArchiveIndexEntry>,
) -> Result<()> {
    let entry_len = footer.entry_len();

    for raw in block.chunks_exact(entry_len) {
        let (key, rest) = raw.split_at(footer.key_size);
        if key.iter().all(|&b| b == 0) {
            break;
        }

        let mut full_key = [0u8; KEY_LENGTH];
        full_key[..footer.key_size].copy_from_slice(key);

        let (size_bytes, offset_bytes) = rest.split_at(footer.size_bytes);
        let size = read_be(size_bytes);
        let offset = read_be(offset_bytes);

        entries.push(ArchiveIndexEntry {
            ekey: EncodingKey::new(full_key),
            size: u32::try_from(size).map_err(|_| Error::Truncated("archive index entry size"))?,
            offset,
        });
    }

    Ok(())
}

/// Big-endian integer of up to eight bytes.
fn read_be(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}
