//! Local installation `.idx` bucket indices.
//!
//! A local install splits its index over sixteen buckets under
//! `Data/data`, selected by XOR-folding the encoding key
//! (see [`EncodingKey::bucket`]). Entries carry a 9-byte truncated key
//! and a packed 40-bit location whose low `segment_bits` bits are the
//! byte offset into one `data.NNN` archive and whose high bits are the
//! archive number. When several versions of a bucket's index exist on
//! disk, the highest version wins; that selection happens at load time
//! from the file names, not here.

use std::collections::HashMap;
use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use tracing::{debug, trace};

use crate::keys::{EncodingKey, TRUNCATED_KEY_LENGTH};
use crate::{Error, Result};

/// Physical location of one encoded blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveLocation {
    /// Which `data.NNN` file (local) or CDN archive (remote) holds it.
    pub archive_id: u16,
    /// Byte offset of the entry within the archive.
    pub offset: u64,
    /// Stored length in bytes.
    pub size: u32,
}

/// Truncated key local indices are addressed by.
pub type TruncatedKey = [u8; TRUNCATED_KEY_LENGTH];

/// `.idx` header, all fields little-endian.
#[derive(Debug, Clone)]
pub struct IdxHeader {
    pub version: u16,
    pub bucket: u8,
    pub length_size: u8,
    pub location_size: u8,
    pub key_size: u8,
    /// Bits of the packed location that hold the archive offset.
    pub segment_bits: u8,
}

/// Parsed `.idx` bucket index.
pub struct IdxFile {
    pub header: IdxHeader,
    entries: HashMap<TruncatedKey, ArchiveLocation>,
}

impl IdxFile {
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(raw);

        // Header block: declared size, then a hash over it (unverified,
        // the lookup3 pair hash adds nothing once the entry block below
        // parses cleanly).
        let header_size = cursor.read_u32::<LittleEndian>()?;
        let _header_hash = cursor.read_u32::<LittleEndian>()?;
        if header_size != 8 {
            return Err(Error::UnsupportedVersion {
                format: "idx header size",
                version: header_size,
            });
        }

        let version = cursor.read_u16::<LittleEndian>()?;
        if version != 7 {
            return Err(Error::UnsupportedVersion {
                format: "idx",
                version: u32::from(version),
            });
        }

        let bucket = cursor.read_u8()?;
        let _extra = cursor.read_u8()?;
        let length_size = cursor.read_u8()?;
        let location_size = cursor.read_u8()?;
        let key_size = cursor.read_u8()?;
        let segment_bits = cursor.read_u8()?;

        if usize::from(key_size) != TRUNCATED_KEY_LENGTH
            || length_size != 4
            || location_size != 5
            || segment_bits == 0
            || segment_bits >= 40
        {
            return Err(Error::UnsupportedVersion {
                format: "idx field widths",
                version: u32::from(location_size),
            });
        }

        let entries_size = cursor.read_u32::<LittleEndian>()?;
        let _entries_hash = cursor.read_u32::<LittleEndian>()?;

        let entry_len = usize::from(key_size) + usize::from(location_size) + usize::from(length_size);
        let declared = entries_size as usize;
        if declared % entry_len != 0 {
            return Err(Error::Truncated("idx entry block"));
        }
        let count = declared / entry_len;
        trace!(
            "idx bucket {:02x}: {} entries, segment bits {}",
            bucket, count, segment_bits
        );

        let mut entries = HashMap::with_capacity(count);
        let offset_mask = (1u64 << segment_bits) - 1;
        for _ in 0..count {
            let mut key = [0u8; TRUNCATED_KEY_LENGTH];
            cursor.read_exact(&mut key)?;

            // 40-bit big-endian packed (archive id, offset).
            let mut packed_bytes = [0u8; 5];
            cursor.read_exact(&mut packed_bytes)?;
            let packed = packed_bytes
                .iter()
                .fold(0u64, |acc, &b| (acc << 8) | u64::from(b));

            let size = cursor.read_u32::<LittleEndian>()?;

            let location = ArchiveLocation {
                archive_id: u16::try_from(packed >> segment_bits)
                    .map_err(|_| Error::Truncated("idx archive id"))?,
                offset: packed & offset_mask,
                size,
            };
            // Buckets do not repeat keys; if one ever does, keep the
            // first mapping like every other index merge.
            entries.entry(key).or_insert(location);
        }

        debug!("Parsed idx bucket {:02x}: {} entries", bucket, entries.len());
        Ok(Self {
            header: IdxHeader {
                version,
                bucket,
                length_size,
                location_size,
                key_size,
                segment_bits,
            },
            entries,
        })
    }

    /// Location for an encoding key, matched on its truncated prefix.
    pub fn lookup(&self, ekey: &EncodingKey) -> Option<&ArchiveLocation> {
        self.entries.get(&ekey.truncated())
    }

    pub fn entries(&self) -> impl Iterator<Item = (&TruncatedKey, &ArchiveLocation)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Bucket and version from a `.idx` file name (`{bucket:02x}{version:08x}.idx`).
pub fn parse_idx_name(name: &str) -> Option<(u8, u32)> {
    let stem = name.strip_suffix(".idx")?;
    if stem.len() != 10 {
        return None;
    }
    let bucket = u8::from_str_radix(&stem[..2], 16).ok()?;
    let version = u32::from_str_radix(&stem[2..], 16).ok()?;
    (bucket < 16).then_some((bucket, version))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    const SEGMENT_BITS: u8 = 30;

    /// Build a version-7 `.idx` from (truncated key, location) pairs.
    pub(crate) fn build_idx(bucket: u8, entries: &[(TruncatedKey, ArchiveLocation)]) -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(&8u32.to_le_bytes());
        raw.extend_from_slice(&0u32.to_le_bytes()); // header hash, unverified
        raw.extend_from_slice(&7u16.to_le_bytes());
        raw.push(bucket);
        raw.push(0);
        raw.push(4); // length size
        raw.push(5); // location size
        raw.push(9); // key size
        raw.push(SEGMENT_BITS);

        let entry_len = 9 + 5 + 4;
        raw.extend_from_slice(&((entries.len() * entry_len) as u32).to_le_bytes());
        raw.extend_from_slice(&0u32.to_le_bytes()); // entries hash, unverified

        for (key, location) in entries {
            raw.extend_from_slice(key);
            let packed =
                (u64::from(location.archive_id) << SEGMENT_BITS) | (location.offset & ((1 << SEGMENT_BITS) - 1));
            raw.extend_from_slice(&packed.to_be_bytes()[3..8]);
            raw.extend_from_slice(&location.size.to_le_bytes());
        }
        raw
    }

    fn key(seed: u8) -> TruncatedKey {
        let mut out = [seed; TRUNCATED_KEY_LENGTH];
        out[8] = seed.wrapping_mul(3);
        out
    }

    fn full_key(seed: u8) -> EncodingKey {
        let truncated = key(seed);
        let mut out = [0u8; 16];
        out[..TRUNCATED_KEY_LENGTH].copy_from_slice(&truncated);
        out[15] = 0xAA; // trailing bytes must not affect the lookup
        EncodingKey::new(out)
    }

    #[test]
    fn packed_location_splits_on_segment_bits() {
        let location = ArchiveLocation {
            archive_id: 5,
            offset: 0x3FFF_1234,
            size: 9000,
        };
        let raw = build_idx(0x0E, &[(key(1), location)]);
        let idx = IdxFile::parse(&raw).unwrap();

        assert_eq!(idx.header.bucket, 0x0E);
        assert_eq!(idx.header.segment_bits, SEGMENT_BITS);
        let found = idx.lookup(&full_key(1)).unwrap();
        assert_eq!(found.archive_id, 5);
        assert_eq!(found.offset, 0x3FFF_1234);
        assert_eq!(found.size, 9000);
    }

    #[test]
    fn lookup_ignores_bytes_past_the_prefix() {
        let location = ArchiveLocation {
            archive_id: 0,
            offset: 64,
            size: 10,
        };
        let raw = build_idx(2, &[(key(9), location)]);
        let idx = IdxFile::parse(&raw).unwrap();

        assert!(idx.lookup(&full_key(9)).is_some());
        assert!(idx.lookup(&full_key(8)).is_none());
    }

    #[test]
    fn wrong_version_is_rejected() {
        let mut raw = build_idx(0, &[]);
        raw[8] = 6; // version field
        assert!(matches!(
            IdxFile::parse(&raw),
            Err(Error::UnsupportedVersion { format: "idx", .. })
        ));
    }

    #[test]
    fn ragged_entry_block_is_rejected() {
        let mut raw = build_idx(
            0,
            &[(
                key(1),
                ArchiveLocation {
                    archive_id: 0,
                    offset: 0,
                    size: 1,
                },
            )],
        );
        // Shrink the declared entry block so it no longer divides evenly.
        let declared = 17u32;
        raw[16..20].copy_from_slice(&declared.to_le_bytes());
        assert!(matches!(
            IdxFile::parse(&raw),
            Err(Error::Truncated("idx entry block"))
        ));
    }

    #[test]
    fn idx_names_carry_bucket_and_version() {
        assert_eq!(parse_idx_name("0e0000000a.idx"), Some((0x0E, 10)));
        assert_eq!(parse_idx_name("ff0000000a.idx"), None); // bucket >= 16
        assert_eq!(parse_idx_name("0e0000000a.bin"), None);
        assert_eq!(parse_idx_name("0e00.idx"), None);
    }
}
