//! Container header and chunk table parsing.

use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};

use crate::error::{Error, Result};
use crate::{BLTE_MAGIC, MD5_LENGTH};

/// Decode mode of a chunk, tagged by the first stored byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkMode {
    /// `N`: payload is the content, byte for byte.
    Raw,
    /// `Z`: zlib stream.
    ZLib,
    /// `4`: LZ4 block with size prefix.
    Lz4,
    /// `F`: payload is a complete nested container.
    Frame,
    /// `E`: encrypted; plaintext is itself a mode-tagged chunk.
    Encrypted,
}

impl ChunkMode {
    /// Map a stored tag byte to its mode.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'N' => Some(Self::Raw),
            b'Z' => Some(Self::ZLib),
            b'4' => Some(Self::Lz4),
            b'F' => Some(Self::Frame),
            b'E' => Some(Self::Encrypted),
            _ => None,
        }
    }

    /// The tag byte written before the chunk body.
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Raw => b'N',
            Self::ZLib => b'Z',
            Self::Lz4 => b'4',
            Self::Frame => b'F',
            Self::Encrypted => b'E',
        }
    }
}

/// Stream cipher selector carried inside encrypted chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cipher {
    Salsa20,
    Arc4,
}

impl Cipher {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x53 => Some(Self::Salsa20),
            0x41 => Some(Self::Arc4),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Self::Salsa20 => 0x53,
            Self::Arc4 => 0x41,
        }
    }
}

/// One chunk table entry, resolved to an absolute payload position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkInfo {
    /// Payload offset from the start of the container.
    pub offset: usize,
    /// Stored payload length, including the mode tag byte.
    pub compressed_size: usize,
    /// Declared decoded length. `None` for headerless single-chunk
    /// containers, where the table carries no sizes.
    pub decompressed_size: Option<u64>,
    /// MD5 of the stored payload. Zero digests are not verified.
    pub stored_hash: Option<[u8; MD5_LENGTH]>,
    /// MD5 of the decoded bytes, present only in the extended table.
    pub decoded_hash: Option<[u8; MD5_LENGTH]>,
}

/// A parsed container: validated chunk table over a borrowed buffer.
#[derive(Debug)]
pub struct Container<'a> {
    raw: &'a [u8],
    chunks: Vec<ChunkInfo>,
}

impl<'a> Container<'a> {
    /// Parse the header and chunk table, validating that every declared
    /// chunk payload lies inside the buffer.
    ///
    /// A zero header size marks a headerless single-chunk container: the
    /// remainder of the buffer is one chunk with no declared sizes or
    /// digests. Any other header size must exactly hold the chunk table
    /// it declares.
    pub fn parse(raw: &'a [u8]) -> Result<Self> {
        if raw.len() < 8 {
            return Err(Error::Truncated {
                expected: 8,
                actual: raw.len() as u64,
            });
        }

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&raw[..4]);
        if magic != BLTE_MAGIC {
            return Err(Error::BadMagic(magic));
        }

        let header_size = u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]);

        if header_size == 0 {
            let chunks = vec![ChunkInfo {
                offset: 8,
                compressed_size: raw.len() - 8,
                decompressed_size: None,
                stored_hash: None,
                decoded_hash: None,
            }];
            return Ok(Self { raw, chunks });
        }

        if header_size < 12 {
            return Err(Error::Truncated {
                expected: 12,
                actual: u64::from(header_size),
            });
        }
        if header_size as usize > raw.len() {
            return Err(Error::Truncated {
                expected: u64::from(header_size),
                actual: raw.len() as u64,
            });
        }

        let mut table = Cursor::new(&raw[8..header_size as usize]);
        let format = table.read_u8()?;
        let has_decoded_hash = match format {
            0x0F => false,
            0x10 => true,
            other => return Err(Error::UnknownTableFormat(other)),
        };
        let chunk_count = table.read_u24::<BigEndian>()?;

        let entry_len: u32 = if has_decoded_hash { 40 } else { 24 };
        let table_bytes = header_size - 12;
        if chunk_count == 0 || table_bytes != chunk_count * entry_len {
            return Err(Error::ChunkTableMismatch {
                count: chunk_count,
                table_bytes,
            });
        }

        let mut chunks = Vec::with_capacity(chunk_count as usize);
        let mut offset = header_size as usize;
        for _ in 0..chunk_count {
            let compressed_size = table.read_u32::<BigEndian>()? as usize;
            let decompressed_size = table.read_u32::<BigEndian>()?;

            let mut stored_hash = [0u8; MD5_LENGTH];
            table.read_exact(&mut stored_hash)?;

            let decoded_hash = if has_decoded_hash {
                let mut hash = [0u8; MD5_LENGTH];
                table.read_exact(&mut hash)?;
                Some(hash)
            } else {
                None
            };

            let end = offset + compressed_size;
            if end > raw.len() {
                return Err(Error::Truncated {
                    expected: end as u64,
                    actual: raw.len() as u64,
                });
            }

            chunks.push(ChunkInfo {
                offset,
                compressed_size,
                decompressed_size: Some(u64::from(decompressed_size)),
                stored_hash: Some(stored_hash),
                decoded_hash,
            });
            offset = end;
        }

        Ok(Self { raw, chunks })
    }

    /// Number of chunks in the table.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// The parsed chunk table, in declaration order.
    pub fn chunks(&self) -> &[ChunkInfo] {
        &self.chunks
    }

    /// Stored payload of one chunk. Bounds were validated during parse.
    pub fn payload(&self, chunk: &ChunkInfo) -> &'a [u8] {
        &self.raw[chunk.offset..chunk.offset + chunk.compressed_size]
    }

    /// Sum of declared decoded sizes, as a capacity hint. Zero when the
    /// container is headerless and sizes are unknown.
    pub fn decoded_size_hint(&self) -> u64 {
        self.chunks
            .iter()
            .filter_map(|c| c.decompressed_size)
            .sum()
    }
}
