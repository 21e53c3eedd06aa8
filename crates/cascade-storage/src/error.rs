//! Error types for the storage pipeline.
//!
//! Resolution failures are typed per stage so a caller can tell "the
//! root table has no such file id" apart from "the encoding table has
//! no such content key" apart from "no index locates that blob".

use thiserror::Error;

use cascade_tact::{ContentKey, EncodingKey};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// No usable install or remote build to load from.
    #[error("no usable source: {0}")]
    SourceUnavailable(String),

    /// File access was attempted before a build finished loading.
    #[error("no build is loaded")]
    NoActiveBuild,

    #[error("file id {0} is not present in the root table")]
    FileIdNotFound(u32),

    #[error("no file is named {0:?}")]
    NameNotFound(String),

    #[error("content key {0} is not present in the encoding table")]
    ContentNotFound(ContentKey),

    #[error("encoding key {0} is not present in any loaded index")]
    IndexNotFound(EncodingKey),

    /// An index points into an archive the source does not have.
    #[error("archive {0} is not part of this build")]
    ArchiveMissing(u16),

    /// A local archive entry header did not match its index entry.
    #[error("archive entry at {offset} in data.{archive:03} is corrupt: {reason}")]
    BadArchiveEntry {
        archive: u16,
        offset: u64,
        reason: &'static str,
    },

    /// Cooperative cancellation was observed.
    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Table(#[from] cascade_tact::Error),

    #[error(transparent)]
    Decode(#[from] cascade_blte::Error),

    #[error(transparent)]
    Network(#[from] cascade_cdn::Error),

    #[error(transparent)]
    Cache(#[from] cascade_cache::Error),

    #[error(transparent)]
    Crypto(#[from] cascade_crypto::CryptoError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// `true` for any per-stage absence, as opposed to a transport or
    /// parse failure.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::FileIdNotFound(_)
                | Self::NameNotFound(_)
                | Self::ContentNotFound(_)
                | Self::IndexNotFound(_)
                | Self::Network(cascade_cdn::Error::NotFound { .. })
                | Self::Cache(cascade_cache::Error::Cdn(
                    cascade_cdn::Error::NotFound { .. }
                ))
        )
    }

    /// `true` when decode failed only because a decryption key is not
    /// registered.
    pub fn is_key_missing(&self) -> bool {
        matches!(self, Self::Decode(cascade_blte::Error::KeyMissing(_)))
    }
}
