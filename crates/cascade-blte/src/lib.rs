//! BLTE chunked container format.
//!
//! Encoded CASC blobs are wrapped in a [BLTE][0] container: a header with
//! an optional chunk table, then a run of chunks whose first byte selects
//! how the rest of the chunk decodes (raw, zlib, LZ4, nested container, or
//! encrypted). Decoding concatenates the decoded chunks in table order.
//!
//! [`decode`] is the entry point for turning a fetched blob back into file
//! content; the [`encode`] module builds containers, which the cache and
//! the test suites use to produce valid fixtures.
//!
//! [0]: https://wowdev.wiki/BLTE

pub mod container;
pub mod decode;
pub mod encode;
pub mod error;

pub use container::{ChunkInfo, ChunkMode, Cipher, Container};
pub use decode::{decode, decode_with, DecodeOptions};
pub use encode::{encode_chunk, encode_multi, encode_single, encrypt_chunk};
pub use error::{Error, Result};

/// Container magic bytes.
pub const BLTE_MAGIC: [u8; 4] = *b"BLTE";

/// Length of the MD5 digests carried in chunk tables.
pub const MD5_LENGTH: usize = 16;
