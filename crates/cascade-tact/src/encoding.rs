//! The encoding table: content keys to encoding keys.
//!
//! Every file a build can produce is listed here once per content key,
//! with the encoding keys of the blobs that decode to it and the decoded
//! size. All multi-byte header fields are big-endian, unlike most other
//! TACT formats.
//!
//! The table is paged: a directory of (first key, page MD5) pairs fronts
//! a run of fixed-size pages per key space. Parsing keeps the raw buffer
//! and materialises pages on demand into a bounded LRU, verifying each
//! page's checksum on first touch.

use std::io::{Cursor, Read, Seek, SeekFrom};
use std::num::NonZeroUsize;
use std::sync::Arc;

use byteorder::{BigEndian, ReadBytesExt};
use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::ioutils::read_uint40_be;
use crate::keys::{ContentKey, EncodingKey, KEY_LENGTH};
use crate::{Error, Result};

const ENCODING_MAGIC: [u8; 2] = *b"EN";

/// Parsed pages kept hot per key space.
const CACHED_PAGES: usize = 32;

/// Encoding file header.
#[derive(Debug, Clone)]
pub struct EncodingHeader {
    pub version: u8,
    pub ckey_hash_size: u8,
    pub ekey_hash_size: u8,
    pub ckey_page_size_kb: u16,
    pub ekey_page_size_kb: u16,
    pub ckey_page_count: u32,
    pub ekey_page_count: u32,
    pub espec_block_size: u32,
}

impl EncodingHeader {
    fn parse<R: Read>(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; 2];
        reader.read_exact(&mut magic)?;
        if magic != ENCODING_MAGIC {
            return Err(Error::BadMagic("encoding"));
        }

        let version = reader.read_u8()?;
        if version != 1 {
            return Err(Error::UnsupportedVersion {
                format: "encoding",
                version: u32::from(version),
            });
        }

        let ckey_hash_size = reader.read_u8()?;
        let ekey_hash_size = reader.read_u8()?;
        if usize::from(ckey_hash_size) != KEY_LENGTH || usize::from(ekey_hash_size) != KEY_LENGTH {
            return Err(Error::UnsupportedVersion {
                format: "encoding key width",
                version: u32::from(ckey_hash_size.max(ekey_hash_size)),
            });
        }

        let ckey_page_size_kb = reader.read_u16::<BigEndian>()?;
        let ekey_page_size_kb = reader.read_u16::<BigEndian>()?;
        let ckey_page_count = reader.read_u32::<BigEndian>()?;
        let ekey_page_count = reader.read_u32::<BigEndian>()?;
        let _unknown = reader.read_u8()?;
        let espec_block_size = reader.read_u32::<BigEndian>()?;

        Ok(Self {
            version,
            ckey_hash_size,
            ekey_hash_size,
            ckey_page_size_kb,
            ekey_page_size_kb,
            ckey_page_count,
            ekey_page_count,
            espec_block_size,
        })
    }
}

/// Directory entry fronting one page.
#[derive(Debug, Clone)]
struct PageIndex {
    first_key: [u8; KEY_LENGTH],
    checksum: [u8; KEY_LENGTH],
}

/// One key space: a directory plus the byte range its pages occupy.
#[derive(Debug)]
struct PageRegion {
    directory: Vec<PageIndex>,
    offset: usize,
    page_size: usize,
}

impl PageRegion {
    fn parse<R: Read + Seek>(reader: &mut R, page_count: u32, page_size_kb: u16) -> Result<Self> {
        let mut directory = Vec::with_capacity(page_count as usize);
        for _ in 0..page_count {
            let mut first_key = [0u8; KEY_LENGTH];
            let mut checksum = [0u8; KEY_LENGTH];
            reader.read_exact(&mut first_key)?;
            reader.read_exact(&mut checksum)?;
            directory.push(PageIndex {
                first_key,
                checksum,
            });
        }

        let offset = reader.stream_position()? as usize;
        let page_size = usize::from(page_size_kb) * 1024;
        // Pages follow the directory contiguously; skip past them so the
        // caller's cursor lands on the next region.
        reader.seek(SeekFrom::Current((page_count as i64) * (page_size as i64)))?;

        Ok(Self {
            directory,
            offset,
            page_size,
        })
    }

    /// Page that could hold `key`: the last one whose first key is not
    /// greater than it.
    fn locate(&self, key: &[u8; KEY_LENGTH]) -> Option<usize> {
        let after = self
            .directory
            .partition_point(|page| page.first_key.as_slice() <= key.as_slice());
        after.checked_sub(1)
    }

    /// Raw bytes of one page, checksum-verified.
    fn page_bytes<'a>(&self, raw: &'a [u8], index: usize) -> Result<&'a [u8]> {
        let start = self.offset + index * self.page_size;
        let end = start + self.page_size;
        let bytes = raw
            .get(start..end)
            .ok_or(Error::Truncated("encoding page"))?;

        if md5::compute(bytes).0 != self.directory[index].checksum {
            return Err(Error::ChecksumMismatch("encoding page"));
        }
        Ok(bytes)
    }
}

/// One content-key record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodingEntry {
    pub ckey: ContentKey,
    /// Blobs that decode to this content, preferred first.
    pub ekeys: Vec<EncodingKey>,
    pub decoded_size: u64,
}

/// Encoded-side record: how one blob was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedInfo {
    /// Index into the ESpec string block.
    pub espec_index: u32,
    pub encoded_size: u64,
}

struct CkeyPage {
    entries: Vec<EncodingEntry>,
}

struct EspecPage {
    entries: Vec<(EncodingKey, EncodedInfo)>,
}

/// Parsed encoding table with lazy page materialisation.
pub struct EncodingTable {
    raw: Vec<u8>,
    pub header: EncodingHeader,
    ckeys: PageRegion,
    especs: PageRegion,
    ckey_cache: Mutex<LruCache<usize, Arc<CkeyPage>>>,
    espec_cache: Mutex<LruCache<usize, Arc<EspecPage>>>,
}

impl EncodingTable {
    /// Parse the header and page directories; page contents stay raw
    /// until a lookup touches them.
    pub fn parse(raw: Vec<u8>) -> Result<Self> {
        let mut cursor = Cursor::new(raw.as_slice());
        let header = EncodingHeader::parse(&mut cursor)?;
        debug!(
            "Encoding table: {} ckey pages of {} KiB, {} espec pages, {} espec bytes",
            header.ckey_page_count,
            header.ckey_page_size_kb,
            header.ekey_page_count,
            header.espec_block_size
        );

        cursor.seek(SeekFrom::Current(i64::from(header.espec_block_size)))?;
        let ckeys = PageRegion::parse(&mut cursor, header.ckey_page_count, header.ckey_page_size_kb)?;
        let especs =
            PageRegion::parse(&mut cursor, header.ekey_page_count, header.ekey_page_size_kb)?;

        if cursor.position() as usize > raw.len() {
            return Err(Error::Truncated("encoding table"));
        }

        let cache_size = NonZeroUsize::new(CACHED_PAGES).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            raw,
            header,
            ckeys,
            especs,
            ckey_cache: Mutex::new(LruCache::new(cache_size)),
            espec_cache: Mutex::new(LruCache::new(cache_size)),
        })
    }

    /// Full record for a content key.
    pub fn lookup(&self, ckey: &ContentKey) -> Result<Option<EncodingEntry>> {
        let Some(index) = self.ckeys.locate(ckey.as_bytes()) else {
            return Ok(None);
        };
        let page = self.ckey_page(index)?;
        let found = page
            .entries
            .binary_search_by(|entry| entry.ckey.cmp(ckey))
            .ok()
            .map(|at| page.entries[at].clone());
        Ok(found)
    }

    /// Preferred encoding key for a content key.
    pub fn ekey_for(&self, ckey: &ContentKey) -> Result<Option<EncodingKey>> {
        Ok(self
            .lookup(ckey)?
            .and_then(|entry| entry.ekeys.first().copied()))
    }

    /// Decoded file size for a content key.
    pub fn decoded_size(&self, ckey: &ContentKey) -> Result<Option<u64>> {
        Ok(self.lookup(ckey)?.map(|entry| entry.decoded_size))
    }

    /// Encoded-side record for an encoding key.
    pub fn encoded_info(&self, ekey: &EncodingKey) -> Result<Option<EncodedInfo>> {
        let Some(index) = self.especs.locate(ekey.as_bytes()) else {
            return Ok(None);
        };
        let page = self.espec_page(index)?;
        let found = page
            .entries
            .binary_search_by(|(key, _)| key.cmp(ekey))
            .ok()
            .map(|at| page.entries[at].1);
        Ok(found)
    }

    pub fn ckey_page_count(&self) -> usize {
        self.ckeys.directory.len()
    }

    fn ckey_page(&self, index: usize) -> Result<Arc<CkeyPage>> {
        if let Some(page) = self.ckey_cache.lock().get(&index) {
            return Ok(Arc::clone(page));
        }

        let bytes = self.ckeys.page_bytes(&self.raw, index)?;
        let page = Arc::new(parse_ckey_page(bytes)?);
        trace!("Materialised ckey page {index}: {} entries", page.entries.len());
        self.ckey_cache.lock().put(index, Arc::clone(&page));
        Ok(page)
    }

    fn espec_page(&self, index: usize) -> Result<Arc<EspecPage>> {
        if let Some(page) = self.espec_cache.lock().get(&index) {
            return Ok(Arc::clone(page));
        }

        let bytes = self.especs.page_bytes(&self.raw, index)?;
        let page = Arc::new(parse_espec_page(bytes)?);
        self.espec_cache.lock().put(index, Arc::clone(&page));
        Ok(page)
    }
}

/// Records: `key_count u8`, `size u40`, ckey, then `key_count` ekeys.
/// A zero key count or zero padding ends the page.
fn parse_ckey_page(bytes: &[u8]) -> Result<CkeyPage> {
    let mut entries = Vec::new();
    let mut cursor = Cursor::new(bytes);

    while (cursor.position() as usize) < bytes.len() {
        let key_count = match cursor.read_u8() {
            Ok(count) => count,
            Err(_) => break,
        };
        if key_count == 0 {
            break;
        }

        let decoded_size = read_uint40_be(&mut cursor)?;
        let mut ckey = [0u8; KEY_LENGTH];
        cursor.read_exact(&mut ckey)?;

        let mut ekeys = Vec::with_capacity(usize::from(key_count));
        for _ in 0..key_count {
            let mut ekey = [0u8; KEY_LENGTH];
            cursor.read_exact(&mut ekey)?;
            ekeys.push(EncodingKey::new(ekey));
        }

        entries.push(EncodingEntry {
            ckey: ContentKey::new(ckey),
            ekeys,
            decoded_size,
        });
    }

    Ok(CkeyPage { entries })
}

/// Records: ekey, `espec_index u32`, `encoded_size u40`. A zero key is
/// padding.
fn parse_espec_page(bytes: &[u8]) -> Result<EspecPage> {
    let mut entries = Vec::new();
    let mut cursor = Cursor::new(bytes);
    const RECORD: usize = KEY_LENGTH + 4 + 5;

    while (cursor.position() as usize) + RECORD <= bytes.len() {
        let mut ekey = [0u8; KEY_LENGTH];
        cursor.read_exact(&mut ekey)?;
        if ekey == [0u8; KEY_LENGTH] {
            break;
        }

        let espec_index = cursor.read_u32::<BigEndian>()?;
        let encoded_size = read_uint40_be(&mut cursor)?;
        entries.push((
            EncodingKey::new(ekey),
            EncodedInfo {
                espec_index,
                encoded_size,
            },
        ));
    }

    Ok(EspecPage { entries })
}
