//! Fixture builders shared by the storage integration tests: encoding
//! and root tables, archive indices, local bucket indices, and BLTE
//! wrapping, all assembled byte for byte the way the parsers expect.
#![allow(dead_code)]

use cascade_blte::{encode_single, ChunkMode};
use cascade_tact::{ArchiveLocation, ContentKey, EncodingKey};

pub const PAGE_SIZE: usize = 1024;

pub fn blte_raw(content: &[u8]) -> Vec<u8> {
    encode_single(content, ChunkMode::Raw).expect("raw container")
}

pub fn blte_zlib(content: &[u8]) -> Vec<u8> {
    encode_single(content, ChunkMode::ZLib).expect("zlib container")
}

pub fn ckey_of(content: &[u8]) -> ContentKey {
    ContentKey::new(md5::compute(content).0)
}

pub fn ekey_of(blob: &[u8]) -> EncodingKey {
    EncodingKey::new(md5::compute(blob).0)
}

/// Build an encoding table over (ckey, ekeys, decoded size) entries.
/// Records are laid into 1 KiB pages in key order; no espec region.
pub fn encoding_table(entries: &[(ContentKey, Vec<EncodingKey>, u64)]) -> Vec<u8> {
    let mut sorted = entries.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut pages: Vec<(ContentKey, Vec<u8>)> = Vec::new();
    for (ckey, ekeys, size) in &sorted {
        let mut record = vec![u8::try_from(ekeys.len()).expect("ekey count")];
        record.extend_from_slice(&size.to_be_bytes()[3..8]);
        record.extend_from_slice(ckey.as_bytes());
        for ekey in ekeys {
            record.extend_from_slice(ekey.as_bytes());
        }

        match pages.last_mut() {
            Some((_, page)) if page.len() + record.len() <= PAGE_SIZE => {
                page.extend_from_slice(&record);
            }
            _ => pages.push((*ckey, record)),
        }
    }
    for (_, page) in &mut pages {
        page.resize(PAGE_SIZE, 0);
    }

    let mut out = Vec::new();
    out.extend_from_slice(b"EN");
    out.push(1);
    out.push(16);
    out.push(16);
    out.extend_from_slice(&1u16.to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes());
    out.extend_from_slice(&u32::try_from(pages.len()).expect("page count").to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes()); // no espec pages
    out.push(0);
    out.extend_from_slice(&0u32.to_be_bytes()); // empty espec block

    for (first, page) in &pages {
        out.extend_from_slice(first.as_bytes());
        out.extend_from_slice(&md5::compute(page).0);
    }
    for (_, page) in &pages {
        out.extend_from_slice(page);
    }
    out
}

/// One locale/content-flag group of root records.
pub struct RootBlock {
    pub content: u32,
    pub locale: u32,
    /// (file id, content key, name hash), in ascending file-id order.
    pub records: Vec<(u32, ContentKey, u64)>,
}

/// Build a current-generation root file (magic, counts, blocks with
/// delta-coded file ids and a trailing name-hash array).
pub fn root_table(blocks: &[RootBlock]) -> Vec<u8> {
    let total: usize = blocks.iter().map(|block| block.records.len()).sum();
    let total = u32::try_from(total).expect("record count");

    let mut out = Vec::new();
    out.extend_from_slice(b"TSFM");
    out.extend_from_slice(&total.to_le_bytes());
    out.extend_from_slice(&total.to_le_bytes());

    for block in blocks {
        out.extend_from_slice(
            &u32::try_from(block.records.len())
                .expect("block size")
                .to_le_bytes(),
        );
        out.extend_from_slice(&block.content.to_le_bytes());
        out.extend_from_slice(&block.locale.to_le_bytes());

        let mut previous = 0u32;
        for (at, (file_id, _, _)) in block.records.iter().enumerate() {
            let delta = if at == 0 {
                i32::try_from(*file_id).expect("first file id")
            } else {
                i32::try_from(*file_id - previous - 1).expect("file id delta")
            };
            out.extend_from_slice(&delta.to_le_bytes());
            previous = *file_id;
        }
        for (_, ckey, _) in &block.records {
            out.extend_from_slice(ckey.as_bytes());
        }
        for (_, _, hash) in &block.records {
            out.extend_from_slice(&hash.to_le_bytes());
        }
    }
    out
}

/// Build a CDN archive `.index` over sorted (ekey, size, offset)
/// entries: 1 KiB entry blocks, a TOC, and a self-locating footer with
/// an 8-byte checksum width.
pub fn archive_index(entries: &[(EncodingKey, u32, u64)]) -> Vec<u8> {
    const CHECKSUM_SIZE: usize = 8;
    let entry_len = 16 + 4 + 4;
    let per_block = PAGE_SIZE / entry_len;

    let mut sorted = entries.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut blocks: Vec<Vec<u8>> = Vec::new();
    for group in sorted.chunks(per_block) {
        let mut block = Vec::with_capacity(PAGE_SIZE);
        for (key, size, offset) in group {
            block.extend_from_slice(key.as_bytes());
            block.extend_from_slice(&size.to_be_bytes());
            block.extend_from_slice(&u32::try_from(*offset).expect("offset").to_be_bytes());
        }
        block.resize(PAGE_SIZE, 0);
        blocks.push(block);
    }
    if blocks.is_empty() {
        blocks.push(vec![0; PAGE_SIZE]);
    }

    let mut toc = Vec::new();
    for group in sorted.chunks(per_block) {
        let last = group.last().map_or([0u8; 16], |(key, _, _)| *key.as_bytes());
        toc.extend_from_slice(&last);
    }
    for block in &blocks {
        toc.extend_from_slice(&md5::compute(block).0[..CHECKSUM_SIZE]);
    }

    let mut body = Vec::new();
    body.push(1); // version
    body.push(0);
    body.push(0);
    body.push(1); // block size in KiB
    body.push(4); // offset bytes
    body.push(4); // size bytes
    body.push(16); // key size
    body.push(CHECKSUM_SIZE as u8);
    body.extend_from_slice(&u32::try_from(sorted.len()).expect("entries").to_le_bytes());

    let mut hashed = body.clone();
    hashed.resize(body.len() + CHECKSUM_SIZE, 0);
    let footer_hash = md5::compute(&hashed).0;

    let mut raw = Vec::new();
    for block in &blocks {
        raw.extend_from_slice(block);
    }
    raw.extend_from_slice(&toc);
    raw.extend_from_slice(&md5::compute(&toc).0[..CHECKSUM_SIZE]);
    raw.extend_from_slice(&body);
    raw.extend_from_slice(&footer_hash[..CHECKSUM_SIZE]);
    raw
}

pub const SEGMENT_BITS: u8 = 30;

/// Build a version-7 `.idx` bucket index.
pub fn idx_file(bucket: u8, entries: &[(EncodingKey, ArchiveLocation)]) -> Vec<u8> {
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
    raw.extend_from_slice(&u32::try_from(entries.len() * entry_len).expect("entry block").to_le_bytes());
    raw.extend_from_slice(&0u32.to_le_bytes()); // entries hash, unverified

    for (ekey, location) in entries {
        raw.extend_from_slice(&ekey.truncated());
        let packed = (u64::from(location.archive_id) << SEGMENT_BITS)
            | (location.offset & ((1 << SEGMENT_BITS) - 1));
        raw.extend_from_slice(&packed.to_be_bytes()[3..8]);
        raw.extend_from_slice(&location.size.to_le_bytes());
    }
    raw
}

/// A local archive entry: 30-byte header (reversed key, stored size,
/// flags and checksums) followed by the BLTE payload.
pub fn local_entry(ekey: &EncodingKey, blte: &[u8]) -> Vec<u8> {
    let size = u32::try_from(30 + blte.len()).expect("entry size");
    let mut out = Vec::with_capacity(30 + blte.len());
    out.extend(ekey.as_bytes().iter().rev());
    out.extend_from_slice(&size.to_le_bytes());
    out.extend_from_slice(&[0u8; 10]); // flags and checksums, unchecked
    out.extend_from_slice(blte);
    out
}
