//! Error types for the cache crate.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// No per-user cache directory could be determined for this platform.
    #[error("could not determine a cache directory for the current platform")]
    DirectoryUnavailable,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A cache write did not complete. Callers treat this as non-fatal:
    /// the fetched bytes are still valid, the entry just was not kept.
    #[error("cache write failed for {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Cdn(#[from] cascade_cdn::Error),
}
