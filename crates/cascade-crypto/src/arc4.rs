//! ARC4 variant for encrypted BLTE chunks.
//!
//! Older encrypted content uses RC4 with a 32-byte key built from the
//! stored material: base key, then salt, then the chunk index
//! little-endian, zero padded to 32 bytes.

use cipher::consts::U32;
use rc4::{KeyInit, Rc4, StreamCipher};

use crate::error::CryptoError;
use crate::Result;

fn rc4_for_chunk(key: &[u8; 16], salt: &[u8; 4], chunk_index: u32) -> Result<Rc4<U32>> {
    let mut material = [0u8; 32];
    material[..16].copy_from_slice(key);
    material[16..20].copy_from_slice(salt);
    material[20..24].copy_from_slice(&chunk_index.to_le_bytes());

    Rc4::new_from_slice(&material)
        .map_err(|e| CryptoError::CipherInit(format!("RC4 key setup: {e}")))
}

/// Decrypt one chunk's ciphertext.
pub fn decrypt_arc4(
    data: &[u8],
    key: &[u8; 16],
    salt: &[u8; 4],
    chunk_index: u32,
) -> Result<Vec<u8>> {
    let mut out = data.to_vec();
    rc4_for_chunk(key, salt, chunk_index)?.apply_keystream(&mut out);
    Ok(out)
}

/// Encrypt plaintext for one chunk; RC4 is symmetric.
pub fn encrypt_arc4(
    data: &[u8],
    key: &[u8; 16],
    salt: &[u8; 4],
    chunk_index: u32,
) -> Result<Vec<u8>> {
    decrypt_arc4(data, key, salt, chunk_index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let key = [0x01u8; 16];
        let salt = [0x02, 0x03, 0x04, 0x05];
        let plain = b"legacy encrypted chunk";

        let sealed = encrypt_arc4(plain, &key, &salt, 0).unwrap();
        assert_ne!(sealed.as_slice(), plain.as_slice());
        assert_eq!(decrypt_arc4(&sealed, &key, &salt, 0).unwrap(), plain);
    }

    #[test]
    fn chunk_index_is_part_of_the_key() {
        let key = [0xA0u8; 16];
        let salt = [7, 7, 7, 7];
        let plain = b"indexed";

        let a = encrypt_arc4(plain, &key, &salt, 1).unwrap();
        let b = encrypt_arc4(plain, &key, &salt, 2).unwrap();
        assert_ne!(a, b);
        assert_eq!(decrypt_arc4(&b, &key, &salt, 2).unwrap(), plain);
    }

    #[test]
    fn empty_input() {
        let key = [0u8; 16];
        let salt = [0u8; 4];
        assert!(encrypt_arc4(b"", &key, &salt, 0).unwrap().is_empty());
    }
}
