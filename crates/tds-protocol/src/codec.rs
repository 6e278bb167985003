//! Primitive readers and writers shared by the token and login modules.
//!
//! TDS strings are UTF-16LE with a character-count prefix: one byte for
//! `B_VARCHAR`, two bytes (little-endian) for `US_VARCHAR`.

use bytes::{Buf, BufMut};

use crate::error::ProtocolError;

/// Fail with [`ProtocolError::UnexpectedEof`] unless `n` bytes remain.
#[inline]
pub fn ensure_remaining(src: &impl Buf, n: usize, what: &'static str) -> Result<(), ProtocolError> {
    if src.remaining() < n {
        Err(ProtocolError::UnexpectedEof(what))
    } else {
        Ok(())
    }
}

/// Read a `B_VARCHAR`: 1-byte character count, then UTF-16LE.
pub fn read_b_varchar(src: &mut impl Buf, what: &'static str) -> Result<String, ProtocolError> {
    ensure_remaining(src, 1, what)?;
    let len = src.get_u8() as usize;
    read_utf16_string(src, len, what)
}

/// Read a `US_VARCHAR`: 2-byte character count, then UTF-16LE.
pub fn read_us_varchar(src: &mut impl Buf, what: &'static str) -> Result<String, ProtocolError> {
    ensure_remaining(src, 2, what)?;
    let len = src.get_u16_le() as usize;
    read_utf16_string(src, len, what)
}

/// Read `char_count` UTF-16LE code units.
pub fn read_utf16_string(
    src: &mut impl Buf,
    char_count: usize,
    what: &'static str,
) -> Result<String, ProtocolError> {
    ensure_remaining(src, char_count * 2, what)?;
    let units: Vec<u16> = (0..char_count).map(|_| src.get_u16_le()).collect();
    String::from_utf16(&units).map_err(|_| ProtocolError::StringEncoding(what))
}

/// Decode a complete UTF-16LE byte slice, replacing unpaired surrogates.
///
/// An odd trailing byte is dropped.
#[must_use]
pub fn decode_utf16_lossy(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Write a `B_VARCHAR`, truncating at 255 code units.
pub fn write_b_varchar(dst: &mut impl BufMut, s: &str) {
    let units: Vec<u16> = s.encode_utf16().take(u8::MAX as usize).collect();
    dst.put_u8(units.len() as u8);
    units.iter().for_each(|&u| dst.put_u16_le(u));
}

/// Write a `US_VARCHAR`, truncating at 65535 code units.
pub fn write_us_varchar(dst: &mut impl BufMut, s: &str) {
    let units: Vec<u16> = s.encode_utf16().take(u16::MAX as usize).collect();
    dst.put_u16_le(units.len() as u16);
    units.iter().for_each(|&u| dst.put_u16_le(u));
}

/// Write a UTF-16LE string without a length prefix.
pub fn write_utf16_string(dst: &mut impl BufMut, s: &str) {
    for unit in s.encode_utf16() {
        dst.put_u16_le(unit);
    }
}

/// Byte length of `s` once encoded as UTF-16.
#[must_use]
pub fn utf16_byte_len(s: &str) -> usize {
    s.encode_utf16().count() * 2
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_b_varchar_roundtrip() {
        let mut buf = BytesMut::new();
        write_b_varchar(&mut buf, "Hello, 世界!");
        let mut cursor = buf.freeze();
        assert_eq!(read_b_varchar(&mut cursor, "name").unwrap(), "Hello, 世界!");
    }

    #[test]
    fn test_us_varchar_prefix_is_little_endian() {
        let mut buf = BytesMut::new();
        write_us_varchar(&mut buf, "ab");
        assert_eq!(&buf[..], &[0x02, 0x00, b'a', 0x00, b'b', 0x00]);
    }

    #[test]
    fn test_truncated_string_is_eof() {
        let raw = [0x05u8, b'a', 0x00];
        let err = read_b_varchar(&mut &raw[..], "column name").unwrap_err();
        assert_eq!(err, ProtocolError::UnexpectedEof("column name"));
    }

    #[test]
    fn test_unpaired_surrogate_rejected() {
        let raw = [0x01u8, 0x00, 0xD8];
        let err = read_b_varchar(&mut &raw[..], "message").unwrap_err();
        assert_eq!(err, ProtocolError::StringEncoding("message"));
    }

    #[test]
    fn test_decode_utf16_lossy_drops_odd_byte() {
        assert_eq!(decode_utf16_lossy(&[b'h', 0, b'i', 0, 0x41]), "hi");
    }

    #[test]
    fn test_utf16_byte_len() {
        assert_eq!(utf16_byte_len("Hello"), 10);
        assert_eq!(utf16_byte_len("世界"), 4);
    }
}
