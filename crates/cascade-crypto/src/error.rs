//! Error types for crypto operations.

use thiserror::Error;

/// Errors that can occur while loading keys or applying ciphers.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// I/O failure while reading a key file or directory.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Cipher construction rejected its inputs.
    #[error("cipher initialization failed: {0}")]
    CipherInit(String),

    /// Keystream application failed (input too long for the cipher).
    #[error("keystream error: {0}")]
    Keystream(String),
}
