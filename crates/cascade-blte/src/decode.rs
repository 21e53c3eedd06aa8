//! Chunk decoding: mode dispatch, integrity checks, recursion.

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use flate2::read::ZlibDecoder;
use tracing::{debug, trace};

use cascade_crypto::arc4::decrypt_arc4;
use cascade_crypto::salsa20::decrypt_salsa20;
use cascade_crypto::Keyring;

use crate::container::{ChunkInfo, ChunkMode, Cipher, Container};
use crate::error::{Error, Result};

/// Knobs for a decode pass.
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    /// Verify chunk digests and declared sizes, aborting on mismatch.
    /// Turning this off lets a caller salvage corrupt data.
    pub verify_checksums: bool,
    /// Bound on nested containers (frame chunks and encrypted payloads).
    pub max_depth: u8,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            verify_checksums: true,
            max_depth: 8,
        }
    }
}

/// Decode a complete container into its content bytes.
///
/// `keys` may be `None` when the caller knows the content is not
/// encrypted; hitting an encrypted chunk without a keyring is an error.
pub fn decode(raw: &[u8], keys: Option<&Keyring>) -> Result<Vec<u8>> {
    decode_with(raw, keys, &DecodeOptions::default())
}

/// Decode with explicit options.
pub fn decode_with(raw: &[u8], keys: Option<&Keyring>, opts: &DecodeOptions) -> Result<Vec<u8>> {
    decode_at_depth(raw, keys, opts, 0)
}

/// Decode chunks in parallel. Output is byte-identical to [`decode`]:
/// chunks decode independently and concatenate in table order.
#[cfg(feature = "parallel")]
pub fn decode_parallel(raw: &[u8], keys: Option<&Keyring>, opts: &DecodeOptions) -> Result<Vec<u8>> {
    use rayon::prelude::*;

    let container = Container::parse(raw)?;
    let parts = container
        .chunks()
        .par_iter()
        .enumerate()
        .map(|(index, chunk)| decode_one(&container, index, chunk, keys, opts, 0))
        .collect::<Result<Vec<_>>>()?;
    Ok(parts.concat())
}

fn decode_at_depth(
    raw: &[u8],
    keys: Option<&Keyring>,
    opts: &DecodeOptions,
    depth: u8,
) -> Result<Vec<u8>> {
    let container = Container::parse(raw)?;
    debug!(
        "Decoding container: {} chunks, {} bytes",
        container.chunk_count(),
        raw.len()
    );

    let mut out = Vec::with_capacity(container.decoded_size_hint() as usize);
    for (index, chunk) in container.chunks().iter().enumerate() {
        let decoded = decode_one(&container, index, chunk, keys, opts, depth)?;
        out.extend_from_slice(&decoded);
    }
    Ok(out)
}

fn decode_one(
    container: &Container<'_>,
    index: usize,
    chunk: &ChunkInfo,
    keys: Option<&Keyring>,
    opts: &DecodeOptions,
    depth: u8,
) -> Result<Vec<u8>> {
    let payload = container.payload(chunk);
    verify_stored(index, chunk, payload, opts)?;
    let decoded = decode_chunk(payload, index as u32, keys, opts, depth)?;
    verify_decoded(index, chunk, &decoded, opts)?;
    Ok(decoded)
}

/// Decode one stored chunk payload (mode tag plus body).
fn decode_chunk(
    payload: &[u8],
    chunk_index: u32,
    keys: Option<&Keyring>,
    opts: &DecodeOptions,
    depth: u8,
) -> Result<Vec<u8>> {
    let Some((&tag, body)) = payload.split_first() else {
        return Err(Error::Truncated {
            expected: 1,
            actual: 0,
        });
    };
    let mode = ChunkMode::from_byte(tag).ok_or(Error::UnknownMode(tag))?;
    trace!("Chunk {}: mode {:?}, {} bytes", chunk_index, mode, body.len());

    match mode {
        ChunkMode::Raw => Ok(body.to_vec()),
        ChunkMode::ZLib => inflate(body, chunk_index),
        ChunkMode::Lz4 => unpack_lz4(body, chunk_index),
        ChunkMode::Frame => {
            if depth >= opts.max_depth {
                return Err(Error::TooDeep(opts.max_depth));
            }
            decode_at_depth(body, keys, opts, depth + 1)
        }
        ChunkMode::Encrypted => decode_encrypted(body, chunk_index, keys, opts, depth),
    }
}

fn inflate(body: &[u8], chunk_index: u32) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    ZlibDecoder::new(body)
        .read_to_end(&mut out)
        .map_err(|e| Error::Decompress {
            chunk: chunk_index as usize,
            reason: format!("zlib: {e}"),
        })?;
    Ok(out)
}

fn unpack_lz4(body: &[u8], chunk_index: u32) -> Result<Vec<u8>> {
    if body.len() < 8 {
        return Err(Error::Truncated {
            expected: 8,
            actual: body.len() as u64,
        });
    }
    let mut cursor = Cursor::new(body);
    let decompressed_size = cursor.read_u32::<LittleEndian>()? as usize;
    let compressed_size = cursor.read_u32::<LittleEndian>()? as usize;

    let block = &body[8..];
    if block.len() != compressed_size {
        return Err(Error::Decompress {
            chunk: chunk_index as usize,
            reason: format!(
                "LZ4 length mismatch: prefix says {compressed_size}, block is {}",
                block.len()
            ),
        });
    }

    lz4_flex::decompress(block, decompressed_size).map_err(|e| Error::Decompress {
        chunk: chunk_index as usize,
        reason: format!("LZ4: {e}"),
    })
}

/// Encrypted chunk body: key name framing, salt, cipher tag, ciphertext.
/// The plaintext is itself a mode-tagged chunk and is decoded recursively
/// with the same chunk index.
fn decode_encrypted(
    body: &[u8],
    chunk_index: u32,
    keys: Option<&Keyring>,
    opts: &DecodeOptions,
    depth: u8,
) -> Result<Vec<u8>> {
    // Fixed framing: 8-byte name size, name, 4-byte IV size, IV, cipher tag.
    const FRAMING: usize = 8 + 8 + 4 + 4 + 1;
    if body.len() < FRAMING {
        return Err(Error::BadEncryptedChunk(format!(
            "{} bytes is shorter than the {FRAMING}-byte framing",
            body.len()
        )));
    }

    let mut cursor = Cursor::new(body);
    let key_name_size = cursor.read_u64::<LittleEndian>()?;
    if key_name_size != 8 {
        return Err(Error::BadEncryptedChunk(format!(
            "key name size {key_name_size}, expected 8"
        )));
    }
    let key_name = cursor.read_u64::<LittleEndian>()?;

    let iv_size = cursor.read_u32::<LittleEndian>()?;
    if iv_size != 4 {
        return Err(Error::BadEncryptedChunk(format!(
            "IV size {iv_size}, expected 4"
        )));
    }
    let mut salt = [0u8; 4];
    cursor.read_exact(&mut salt)?;

    let cipher_tag = cursor.read_u8()?;
    let cipher = Cipher::from_byte(cipher_tag).ok_or(Error::UnknownCipher(cipher_tag))?;

    let keyring = keys.ok_or(Error::KeyringRequired(chunk_index as usize))?;
    let key = *keyring.get(key_name).ok_or(Error::KeyMissing(key_name))?;

    let ciphertext = &body[cursor.position() as usize..];
    let plaintext = match cipher {
        Cipher::Salsa20 => decrypt_salsa20(ciphertext, &key, &salt, chunk_index)?,
        Cipher::Arc4 => decrypt_arc4(ciphertext, &key, &salt, chunk_index)?,
    };
    debug!(
        "Decrypted chunk {} with key {:016x} ({:?})",
        chunk_index, key_name, cipher
    );

    if plaintext.is_empty() {
        return Ok(plaintext);
    }
    if depth >= opts.max_depth {
        return Err(Error::TooDeep(opts.max_depth));
    }
    decode_chunk(&plaintext, chunk_index, keys, opts, depth + 1)
}

fn verify_stored(
    index: usize,
    chunk: &ChunkInfo,
    payload: &[u8],
    opts: &DecodeOptions,
) -> Result<()> {
    if !opts.verify_checksums {
        return Ok(());
    }
    let Some(expected) = chunk.stored_hash else {
        return Ok(());
    };
    if expected == [0u8; 16] {
        return Ok(());
    }
    let actual = md5::compute(payload).0;
    if actual != expected {
        return Err(Error::ChecksumMismatch {
            chunk: index,
            expected,
            actual,
        });
    }
    Ok(())
}

fn verify_decoded(
    index: usize,
    chunk: &ChunkInfo,
    decoded: &[u8],
    opts: &DecodeOptions,
) -> Result<()> {
    if !opts.verify_checksums {
        return Ok(());
    }
    if let Some(expected) = chunk.decompressed_size {
        if decoded.len() as u64 != expected {
            return Err(Error::SizeMismatch {
                chunk: index,
                expected,
                actual: decoded.len() as u64,
            });
        }
    }
    if let Some(expected) = chunk.decoded_hash {
        if expected != [0u8; 16] {
            let actual = md5::compute(decoded).0;
            if actual != expected {
                return Err(Error::ChecksumMismatch {
                    chunk: index,
                    expected,
                    actual,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::{encode_multi, encode_single, encrypt_chunk};
    use crate::BLTE_MAGIC;

    fn wrap_frame(container: Vec<u8>) -> Vec<u8> {
        let mut chunk = Vec::with_capacity(container.len() + 1);
        chunk.push(b'F');
        chunk.extend_from_slice(&container);

        let mut out = Vec::new();
        out.extend_from_slice(&BLTE_MAGIC);
        out.extend_from_slice(&0u32.to_be_bytes());
        out.extend_from_slice(&chunk);
        out
    }

    #[test]
    fn raw_single_chunk() {
        let raw = encode_single(b"hello world", ChunkMode::Raw).unwrap();
        assert_eq!(decode(&raw, None).unwrap(), b"hello world");
    }

    #[test]
    fn zlib_round_trip() {
        let content = vec![7u8; 4096];
        let raw = encode_single(&content, ChunkMode::ZLib).unwrap();
        assert!(raw.len() < content.len());
        assert_eq!(decode(&raw, None).unwrap(), content);
    }

    #[test]
    fn lz4_round_trip() {
        let content = b"abcabcabcabcabcabcabcabc".repeat(16);
        let raw = encode_single(&content, ChunkMode::Lz4).unwrap();
        assert_eq!(decode(&raw, None).unwrap(), content);
    }

    #[test]
    fn multi_chunk_concatenates_in_table_order() {
        let content: Vec<u8> = (0u16..1000).map(|v| (v % 251) as u8).collect();
        let raw = encode_multi(&content, 137, ChunkMode::ZLib).unwrap();
        assert_eq!(decode(&raw, None).unwrap(), content);
    }

    #[test]
    fn multi_chunk_equals_per_chunk_decode() {
        let pieces: [&[u8]; 3] = [b"first part", b"second", b"third piece here"];
        let content = pieces.concat();
        let raw = encode_multi(&content, 16, ChunkMode::Raw).unwrap();

        let container = Container::parse(&raw).unwrap();
        let mut glued = Vec::new();
        for (index, chunk) in container.chunks().iter().enumerate() {
            let payload = container.payload(chunk);
            glued.extend_from_slice(
                &decode_chunk(payload, index as u32, None, &DecodeOptions::default(), 0).unwrap(),
            );
        }
        assert_eq!(glued, content);
        assert_eq!(decode(&raw, None).unwrap(), content);
    }

    #[test]
    fn corrupt_chunk_fails_checksum() {
        let content = vec![3u8; 256];
        let mut raw = encode_multi(&content, 64, ChunkMode::Raw).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;

        let err = decode(&raw, None).unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { chunk: 3, .. }));
    }

    #[test]
    fn lenient_decode_accepts_corruption() {
        let content = vec![3u8; 256];
        let mut raw = encode_multi(&content, 64, ChunkMode::Raw).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;

        let opts = DecodeOptions {
            verify_checksums: false,
            ..DecodeOptions::default()
        };
        let out = decode_with(&raw, None, &opts).unwrap();
        assert_eq!(out.len(), content.len());
        assert_ne!(out, content);
    }

    #[test]
    fn encrypted_chunk_needs_key() {
        let mut ring = Keyring::empty();
        ring.register(0xAABB_CCDD_EEFF_0011, [9u8; 16]);

        let inner = {
            let mut v = vec![b'N'];
            v.extend_from_slice(b"secret bytes");
            v
        };
        let sealed = encrypt_chunk(
            &inner,
            0xAABB_CCDD_EEFF_0011,
            &[9u8; 16],
            &[1, 2, 3, 4],
            0,
            Cipher::Salsa20,
        )
        .unwrap();

        let mut raw = Vec::new();
        raw.extend_from_slice(&BLTE_MAGIC);
        raw.extend_from_slice(&0u32.to_be_bytes());
        raw.extend_from_slice(&sealed);

        // Without the key registered the decode names the missing key.
        let empty = Keyring::empty();
        let err = decode(&raw, Some(&empty)).unwrap_err();
        assert!(matches!(err, Error::KeyMissing(0xAABB_CCDD_EEFF_0011)));

        // Without any keyring at all.
        let err = decode(&raw, None).unwrap_err();
        assert!(matches!(err, Error::KeyringRequired(0)));

        // With the key the plaintext comes back.
        assert_eq!(decode(&raw, Some(&ring)).unwrap(), b"secret bytes");
    }

    #[test]
    fn encrypted_arc4_round_trip() {
        let mut ring = Keyring::empty();
        ring.register(0x0102_0304_0506_0708, [0x42u8; 16]);

        let inner = {
            let mut v = vec![b'Z'];
            let mut enc =
                flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
            std::io::Write::write_all(&mut enc, b"compressed then encrypted").unwrap();
            v.extend_from_slice(&enc.finish().unwrap());
            v
        };
        let sealed = encrypt_chunk(
            &inner,
            0x0102_0304_0506_0708,
            &[0x42u8; 16],
            &[5, 6, 7, 8],
            0,
            Cipher::Arc4,
        )
        .unwrap();

        let mut raw = Vec::new();
        raw.extend_from_slice(&BLTE_MAGIC);
        raw.extend_from_slice(&0u32.to_be_bytes());
        raw.extend_from_slice(&sealed);

        assert_eq!(
            decode(&raw, Some(&ring)).unwrap(),
            b"compressed then encrypted"
        );
    }

    #[test]
    fn nested_frames_decode() {
        let mut raw = encode_single(b"kernel", ChunkMode::Raw).unwrap();
        for _ in 0..3 {
            raw = wrap_frame(raw);
        }
        assert_eq!(decode(&raw, None).unwrap(), b"kernel");
    }

    #[test]
    fn nesting_bound_is_enforced() {
        let mut raw = encode_single(b"deep", ChunkMode::Raw).unwrap();
        for _ in 0..10 {
            raw = wrap_frame(raw);
        }
        let err = decode(&raw, None).unwrap_err();
        assert!(matches!(err, Error::TooDeep(8)));
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&BLTE_MAGIC);
        raw.extend_from_slice(&0u32.to_be_bytes());
        raw.push(b'Q');

        let err = decode(&raw, None).unwrap_err();
        assert!(matches!(err, Error::UnknownMode(b'Q')));
    }

    #[test]
    fn declared_size_is_checked() {
        let payload = b"Nabcd";
        let mut raw = Vec::new();
        raw.extend_from_slice(&BLTE_MAGIC);
        raw.extend_from_slice(&36u32.to_be_bytes());
        raw.push(0x0F);
        raw.extend_from_slice(&[0, 0, 1]);
        raw.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        raw.extend_from_slice(&99u32.to_be_bytes());
        raw.extend_from_slice(&md5::compute(payload).0);
        raw.extend_from_slice(payload);

        let err = decode(&raw, None).unwrap_err();
        assert!(matches!(
            err,
            Error::SizeMismatch {
                chunk: 0,
                expected: 99,
                actual: 4
            }
        ));
    }

    #[test]
    fn extended_table_decoded_hash_is_checked() {
        let payload = b"Nab";
        let mut raw = Vec::new();
        raw.extend_from_slice(&BLTE_MAGIC);
        raw.extend_from_slice(&52u32.to_be_bytes());
        raw.push(0x10);
        raw.extend_from_slice(&[0, 0, 1]);
        raw.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        raw.extend_from_slice(&2u32.to_be_bytes());
        raw.extend_from_slice(&md5::compute(payload).0);
        raw.extend_from_slice(&[0xEE; 16]);
        raw.extend_from_slice(payload);

        let err = decode(&raw, None).unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { chunk: 0, .. }));
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn parallel_decode_matches_sequential() {
        let content: Vec<u8> = (0u32..10_000).map(|v| (v % 256) as u8).collect();
        let raw = encode_multi(&content, 512, ChunkMode::ZLib).unwrap();

        let sequential = decode(&raw, None).unwrap();
        let parallel = decode_parallel(&raw, None, &DecodeOptions::default()).unwrap();
        assert_eq!(sequential, parallel);
        assert_eq!(sequential, content);
    }
}
