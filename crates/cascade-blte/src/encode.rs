//! Container construction.
//!
//! The cache uses this to store already-decoded content in a form the
//! decoder can verify later, and the test suites use it to build valid
//! containers without binary fixtures.

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use tracing::trace;

use cascade_crypto::arc4::encrypt_arc4;
use cascade_crypto::salsa20::encrypt_salsa20;

use crate::container::{ChunkMode, Cipher};
use crate::error::{Error, Result};
use crate::BLTE_MAGIC;

/// Build a headerless single-chunk container.
pub fn encode_single(data: &[u8], mode: ChunkMode) -> Result<Vec<u8>> {
    let chunk = encode_chunk(data, mode)?;

    let mut out = Vec::with_capacity(8 + chunk.len());
    out.extend_from_slice(&BLTE_MAGIC);
    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend_from_slice(&chunk);
    Ok(out)
}

/// Build a multi-chunk container with a standard chunk table.
///
/// `data` is split into `chunk_size` slices; every entry carries the MD5
/// of its stored bytes. Empty input still produces one (empty) chunk so
/// the container stays decodable.
pub fn encode_multi(data: &[u8], chunk_size: usize, mode: ChunkMode) -> Result<Vec<u8>> {
    if chunk_size == 0 {
        return Err(Error::Encode("chunk size must be non-zero".into()));
    }

    let mut chunks = Vec::new();
    if data.is_empty() {
        chunks.push(encode_chunk(&[], mode)?);
    } else {
        for slice in data.chunks(chunk_size) {
            chunks.push(encode_chunk(slice, mode)?);
        }
    }
    let count = u32::try_from(chunks.len())
        .map_err(|_| Error::Encode(format!("{} chunks do not fit the table", chunks.len())))?;
    if count > 0x00FF_FFFF {
        return Err(Error::Encode(format!(
            "{count} chunks exceed the 24-bit table count"
        )));
    }
    trace!("Encoding {} bytes as {} chunks", data.len(), count);

    let header_size = 12 + 24 * chunks.len();
    let body_size: usize = chunks.iter().map(Vec::len).sum();

    let mut out = Vec::with_capacity(header_size + body_size);
    out.extend_from_slice(&BLTE_MAGIC);
    out.extend_from_slice(&(header_size as u32).to_be_bytes());
    out.push(0x0F);
    out.extend_from_slice(&count.to_be_bytes()[1..4]);

    let mut decoded_offset = 0usize;
    for chunk in &chunks {
        let decoded_len = data.len().saturating_sub(decoded_offset).min(chunk_size);
        decoded_offset += decoded_len;

        out.extend_from_slice(&(chunk.len() as u32).to_be_bytes());
        out.extend_from_slice(&(decoded_len as u32).to_be_bytes());
        out.extend_from_slice(&md5::compute(chunk).0);
    }
    for chunk in &chunks {
        out.extend_from_slice(chunk);
    }
    Ok(out)
}

/// Encode one chunk: mode tag followed by the transformed body.
pub fn encode_chunk(data: &[u8], mode: ChunkMode) -> Result<Vec<u8>> {
    let body = match mode {
        ChunkMode::Raw => data.to_vec(),
        ChunkMode::ZLib => {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data)?;
            encoder.finish()?
        }
        ChunkMode::Lz4 => {
            let decompressed = u32::try_from(data.len())
                .map_err(|_| Error::Encode("LZ4 chunk larger than 4 GiB".into()))?;
            let block = lz4_flex::compress(data);
            let compressed = u32::try_from(block.len())
                .map_err(|_| Error::Encode("LZ4 block larger than 4 GiB".into()))?;

            let mut body = Vec::with_capacity(8 + block.len());
            body.extend_from_slice(&decompressed.to_le_bytes());
            body.extend_from_slice(&compressed.to_le_bytes());
            body.extend_from_slice(&block);
            body
        }
        ChunkMode::Frame => {
            // A frame body must already be a complete container.
            if data.len() < 8 || data[..4] != BLTE_MAGIC {
                return Err(Error::Encode(
                    "frame chunks wrap a complete container".into(),
                ));
            }
            data.to_vec()
        }
        ChunkMode::Encrypted => {
            return Err(Error::Encode(
                "encrypted chunks are built with encrypt_chunk".into(),
            ));
        }
    };

    let mut chunk = Vec::with_capacity(1 + body.len());
    chunk.push(mode.as_byte());
    chunk.extend_from_slice(&body);
    Ok(chunk)
}

/// Wrap an already-encoded chunk in an encryption envelope.
///
/// `stored` is a complete mode-tagged chunk (for example the output of
/// [`encode_chunk`]); the result is an encrypted chunk whose plaintext
/// decodes back to the inner chunk's content.
pub fn encrypt_chunk(
    stored: &[u8],
    key_name: u64,
    key: &[u8; 16],
    salt: &[u8; 4],
    chunk_index: u32,
    cipher: Cipher,
) -> Result<Vec<u8>> {
    let ciphertext = match cipher {
        Cipher::Salsa20 => encrypt_salsa20(stored, key, salt, chunk_index)?,
        Cipher::Arc4 => encrypt_arc4(stored, key, salt, chunk_index)?,
    };

    let mut out = Vec::with_capacity(1 + 8 + 8 + 4 + 4 + 1 + ciphertext.len());
    out.push(ChunkMode::Encrypted.as_byte());
    out.extend_from_slice(&8u64.to_le_bytes());
    out.extend_from_slice(&key_name.to_le_bytes());
    out.extend_from_slice(&4u32.to_le_bytes());
    out.extend_from_slice(salt);
    out.push(cipher.as_byte());
    out.extend_from_slice(&ciphertext);
    Ok(out)
}
