//! Decryption support for encrypted CASC content.
//!
//! Encrypted BLTE chunks name a 64-bit key and carry a short salt; the
//! actual 16-byte keys are distributed out of band. This crate provides:
//!
//! - [`Keyring`]: the key store, seeded with publicly known keys and
//!   extended from key files or at runtime
//! - The Salsa20 and ARC4 cipher variants used by encrypted chunks

pub mod arc4;
pub mod error;
pub mod keyring;
pub mod salsa20;

pub use error::CryptoError;
pub use keyring::Keyring;

/// Result type for crypto operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
