//! Content and encoding key newtypes.
//!
//! Both keys are 16-byte MD5 digests. A [`ContentKey`] hashes a file's
//! decoded content; an [`EncodingKey`] hashes one particular encoded blob
//! of that content. The encoding table maps one to the other.

use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Length of a full key in bytes.
pub const KEY_LENGTH: usize = 16;

/// Length of the truncated encoding key stored by local `.idx` indices.
pub const TRUNCATED_KEY_LENGTH: usize = 9;

fn parse_hex_key(s: &str) -> Result<[u8; KEY_LENGTH], Error> {
    let mut out = [0u8; KEY_LENGTH];
    if s.len() != KEY_LENGTH * 2 {
        return Err(Error::InvalidKey(s.to_string(), KEY_LENGTH));
    }
    hex::decode_to_slice(s, &mut out).map_err(|_| Error::InvalidKey(s.to_string(), KEY_LENGTH))?;
    Ok(out)
}

/// MD5 of a file's decoded content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentKey([u8; KEY_LENGTH]);

impl ContentKey {
    pub const fn new(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(data: &[u8]) -> Option<Self> {
        data.try_into().ok().map(Self)
    }

    pub const fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }
}

/// MD5 of one encoded blob.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EncodingKey([u8; KEY_LENGTH]);

impl EncodingKey {
    pub const fn new(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(data: &[u8]) -> Option<Self> {
        data.try_into().ok().map(Self)
    }

    pub const fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }

    /// The 9-byte prefix local `.idx` indices key their entries by.
    pub fn truncated(&self) -> [u8; TRUNCATED_KEY_LENGTH] {
        let mut out = [0u8; TRUNCATED_KEY_LENGTH];
        out.copy_from_slice(&self.0[..TRUNCATED_KEY_LENGTH]);
        out
    }

    /// Local index bucket for this key: XOR the truncated bytes, then fold
    /// the high nibble into the low one. Always in `0..16`.
    pub fn bucket(&self) -> u8 {
        let folded = self.0[..TRUNCATED_KEY_LENGTH]
            .iter()
            .fold(0u8, |acc, &b| acc ^ b);
        (folded & 0x0F) ^ (folded >> 4)
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentKey({})", hex::encode(self.0))
    }
}

impl fmt::Display for EncodingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for EncodingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncodingKey({})", hex::encode(self.0))
    }
}

impl FromStr for ContentKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex_key(s).map(Self)
    }
}

impl FromStr for EncodingKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex_key(s).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let text = "0017a402f556fbece46c38dc431a2c9b";
        let key: EncodingKey = text.parse().unwrap();
        assert_eq!(key.to_string(), text);

        let upper: EncodingKey = text.to_uppercase().parse().unwrap();
        assert_eq!(upper, key);
    }

    #[test]
    fn rejects_bad_hex() {
        assert!("0017a402".parse::<ContentKey>().is_err());
        assert!(
            "zz17a402f556fbece46c38dc431a2c9b"
                .parse::<ContentKey>()
                .is_err()
        );
    }

    #[test]
    fn truncation_keeps_prefix() {
        let key = EncodingKey::new([
            1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16,
        ]);
        assert_eq!(key.truncated(), [1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn bucket_folds_nibbles() {
        // XOR of 0x12..0x9A prefix bytes, then nibble fold.
        let key = EncodingKey::new([
            0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE, 0xF0, 0x11, 0, 0, 0, 0, 0, 0, 0,
        ]);
        let folded: u8 = 0x12 ^ 0x34 ^ 0x56 ^ 0x78 ^ 0x9A ^ 0xBC ^ 0xDE ^ 0xF0 ^ 0x11;
        assert_eq!(key.bucket(), (folded & 0x0F) ^ (folded >> 4));
        assert!(key.bucket() < 16);

        let zero = EncodingKey::new([0; 16]);
        assert_eq!(zero.bucket(), 0);
    }

    #[test]
    fn from_slice_checks_length() {
        assert!(ContentKey::from_slice(&[0u8; 16]).is_some());
        assert!(ContentKey::from_slice(&[0u8; 15]).is_none());
        assert!(EncodingKey::from_slice(&[0u8; 17]).is_none());
    }
}
