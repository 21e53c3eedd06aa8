//! Read helpers for widths `byteorder` does not cover.

use std::io::{Error, ErrorKind, Read};

/// Read a 40-bit big-endian integer: one high byte, then a `u32`.
///
/// TACT tables use this width for file sizes, trading range (1 TB) for
/// table compactness.
pub fn read_uint40_be<R: Read>(reader: &mut R) -> Result<u64, Error> {
    let mut buf = [0u8; 5];
    reader.read_exact(&mut buf)?;
    let high = u64::from(buf[0]);
    let low = u64::from(u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]));
    Ok((high << 32) | low)
}

/// Read a NUL-terminated UTF-8 string.
pub fn read_cstring<R: Read>(reader: &mut R) -> Result<String, Error> {
    let mut bytes = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        reader.read_exact(&mut byte)?;
        if byte[0] == 0 {
            break;
        }
        bytes.push(byte[0]);
    }
    String::from_utf8(bytes)
        .map_err(|e| Error::new(ErrorKind::InvalidData, format!("C string is not UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn uint40_is_high_byte_then_u32() {
        let mut cursor = Cursor::new([0x0A, 0x12, 0x34, 0x56, 0x78]);
        assert_eq!(read_uint40_be(&mut cursor).unwrap(), 0x0A_1234_5678);

        let mut cursor = Cursor::new([0x01, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(read_uint40_be(&mut cursor).unwrap(), 1 << 32);
    }

    #[test]
    fn uint40_needs_five_bytes() {
        let mut cursor = Cursor::new([0x01, 0x02]);
        assert!(read_uint40_be(&mut cursor).is_err());
    }

    #[test]
    fn cstring_stops_at_nul() {
        let mut cursor = Cursor::new(b"Windows\0rest".as_slice());
        assert_eq!(read_cstring(&mut cursor).unwrap(), "Windows");
        assert_eq!(cursor.position(), 8);
    }

    #[test]
    fn cstring_requires_terminator() {
        let mut cursor = Cursor::new(b"unterminated".as_slice());
        assert!(read_cstring(&mut cursor).is_err());
    }
}
