//! Salsa20 variant used by encrypted BLTE chunks.
//!
//! The container stores a 16-byte key and a 4-byte salt, while Salsa20
//! wants a 32-byte key and an 8-byte nonce. Both are widened by
//! duplication, and the chunk index is folded into the nonce so every
//! chunk of a file gets a distinct keystream.

use cipher::{KeyIvInit, StreamCipher};
use salsa20::Salsa20;

use crate::error::CryptoError;
use crate::Result;

/// Build the cipher for one chunk: key doubled to 32 bytes, salt doubled
/// to 8, chunk index XORed little-endian into the first 4 nonce bytes.
pub fn salsa20_for_chunk(key: &[u8; 16], salt: &[u8; 4], chunk_index: u32) -> Salsa20 {
    let mut wide_key = [0u8; 32];
    wide_key[..16].copy_from_slice(key);
    wide_key[16..].copy_from_slice(key);

    let mut nonce = [0u8; 8];
    nonce[..4].copy_from_slice(salt);
    nonce[4..].copy_from_slice(salt);
    for (n, i) in nonce.iter_mut().zip(chunk_index.to_le_bytes()) {
        *n ^= i;
    }

    Salsa20::new(&wide_key.into(), &nonce.into())
}

/// Decrypt one chunk's ciphertext.
pub fn decrypt_salsa20(
    data: &[u8],
    key: &[u8; 16],
    salt: &[u8; 4],
    chunk_index: u32,
) -> Result<Vec<u8>> {
    let mut out = data.to_vec();
    salsa20_for_chunk(key, salt, chunk_index)
        .try_apply_keystream(&mut out)
        .map_err(|e| CryptoError::Keystream(e.to_string()))?;
    Ok(out)
}

/// Encrypt plaintext for one chunk. Stream ciphers are symmetric, so this
/// is the same transform as [`decrypt_salsa20`].
pub fn encrypt_salsa20(
    data: &[u8],
    key: &[u8; 16],
    salt: &[u8; 4],
    chunk_index: u32,
) -> Result<Vec<u8>> {
    decrypt_salsa20(data, key, salt, chunk_index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let key = [0x42u8; 16];
        let salt = [0x10, 0x20, 0x30, 0x40];
        let plain = b"chunked container payload";

        let sealed = encrypt_salsa20(plain, &key, &salt, 3).unwrap();
        assert_ne!(sealed.as_slice(), plain.as_slice());

        let opened = decrypt_salsa20(&sealed, &key, &salt, 3).unwrap();
        assert_eq!(opened.as_slice(), plain.as_slice());
    }

    #[test]
    fn chunk_index_changes_keystream() {
        let key = [0x07u8; 16];
        let salt = [1, 2, 3, 4];
        let plain = b"same bytes";

        let a = encrypt_salsa20(plain, &key, &salt, 0).unwrap();
        let b = encrypt_salsa20(plain, &key, &salt, 1).unwrap();
        assert_ne!(a, b);

        assert_eq!(decrypt_salsa20(&a, &key, &salt, 0).unwrap(), plain);
        assert_eq!(decrypt_salsa20(&b, &key, &salt, 1).unwrap(), plain);
    }

    #[test]
    fn wrong_index_garbles() {
        let key = [0x55u8; 16];
        let salt = [9, 9, 9, 9];
        let plain = b"order matters";

        let sealed = encrypt_salsa20(plain, &key, &salt, 5).unwrap();
        let opened = decrypt_salsa20(&sealed, &key, &salt, 6).unwrap();
        assert_ne!(opened.as_slice(), plain.as_slice());
    }
}
