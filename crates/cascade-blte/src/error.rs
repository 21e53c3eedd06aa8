//! Error types for container parsing and decoding.

use thiserror::Error;

/// Result type for BLTE operations.
pub type Result<T> = std::result::Result<T, Error>;

/// BLTE error types.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error while reading header fields.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The buffer does not start with the container magic.
    #[error("invalid container magic: expected 'BLTE', got {0:?}")]
    BadMagic([u8; 4]),

    /// Input ended before the structure it declared.
    #[error("truncated container: need {expected} bytes, have {actual}")]
    Truncated { expected: u64, actual: u64 },

    /// The header length does not match its declared chunk table.
    #[error("chunk table of {table_bytes} bytes cannot hold {count} entries")]
    ChunkTableMismatch { count: u32, table_bytes: u32 },

    /// Unknown table format byte.
    #[error("unsupported chunk table format: {0:#04x}")]
    UnknownTableFormat(u8),

    /// A chunk's first byte is not a known mode tag.
    #[error("unknown chunk mode: {0:#04x}")]
    UnknownMode(u8),

    /// Decompression backend rejected the payload.
    #[error("chunk {chunk} failed to decompress: {reason}")]
    Decompress { chunk: usize, reason: String },

    /// A chunk digest did not match its table entry.
    #[error(
        "chunk {chunk} checksum mismatch: expected {}, got {}",
        hex::encode(expected),
        hex::encode(actual)
    )]
    ChecksumMismatch {
        chunk: usize,
        expected: [u8; 16],
        actual: [u8; 16],
    },

    /// Decoded output did not match the declared decompressed size.
    #[error("chunk {chunk} decoded to {actual} bytes, table declares {expected}")]
    SizeMismatch {
        chunk: usize,
        expected: u64,
        actual: u64,
    },

    /// An encrypted chunk names a key the keyring does not hold.
    #[error("decryption key {0:#018x} is not registered")]
    KeyMissing(u64),

    /// An encrypted chunk was requested but no keyring was supplied.
    #[error("encrypted chunk {0} requires a keyring")]
    KeyringRequired(usize),

    /// Structurally invalid encrypted chunk.
    #[error("malformed encrypted chunk: {0}")]
    BadEncryptedChunk(String),

    /// Encryption type byte is not Salsa20 or ARC4.
    #[error("unsupported cipher tag: {0:#04x}")]
    UnknownCipher(u8),

    /// Nested containers exceeded the recursion bound.
    #[error("container nesting exceeds depth {0}")]
    TooDeep(u8),

    /// Invalid parameters or content while building a container.
    #[error("cannot encode: {0}")]
    Encode(String),

    /// Cipher-level failure.
    #[error("crypto error: {0}")]
    Crypto(#[from] cascade_crypto::CryptoError),
}
