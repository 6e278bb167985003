//! SQL_BATCH request payload.
//!
//! TDS 7.2 and later require an ALL_HEADERS block before the statement
//! text. This client only sends the transaction descriptor header, with a
//! zero descriptor (autocommit) and one outstanding request.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{decode_utf16_lossy, write_utf16_string};
use crate::error::ProtocolError;

/// Size of the ALL_HEADERS block this client writes.
pub const ALL_HEADERS_LEN: usize = 22;

const TRANSACTION_DESCRIPTOR_HEADER: u16 = 0x0002;

/// Encode `sql` as a SQL_BATCH payload.
#[must_use]
pub fn encode_sql_batch(sql: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(ALL_HEADERS_LEN + sql.len() * 2);
    buf.put_u32_le(ALL_HEADERS_LEN as u32);
    buf.put_u32_le(18);
    buf.put_u16_le(TRANSACTION_DESCRIPTOR_HEADER);
    buf.put_u64_le(0);
    buf.put_u32_le(1);
    write_utf16_string(&mut buf, sql);
    buf.freeze()
}

/// Recover the statement text from a SQL_BATCH payload.
///
/// Skips the ALL_HEADERS block when present; payloads without one are
/// treated as bare UTF-16LE text.
pub fn decode_sql_batch(payload: &[u8]) -> Result<String, ProtocolError> {
    if payload.len() < 4 {
        return Ok(decode_utf16_lossy(payload));
    }
    let headers_len = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
    let text = if (4..=payload.len()).contains(&headers_len) && headers_len >= ALL_HEADERS_LEN {
        &payload[headers_len..]
    } else if headers_len > payload.len() && headers_len < 0x100 {
        return Err(ProtocolError::InvalidTokenLength {
            token: "ALL_HEADERS",
            length: headers_len,
        });
    } else {
        payload
    };
    Ok(decode_utf16_lossy(text))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_sql_batch() {
        let payload = encode_sql_batch("SELECT 1");
        assert_eq!(payload.len(), ALL_HEADERS_LEN + 16);
        assert_eq!(&payload[0..4], &[22, 0, 0, 0]);
        assert_eq!(&payload[4..8], &[18, 0, 0, 0]);
        assert_eq!(&payload[8..10], &[0x02, 0x00]);
        assert_eq!(&payload[18..22], &[1, 0, 0, 0]);
        assert_eq!(&payload[22..24], &[b'S', 0]);
    }

    #[test]
    fn test_empty_batch_has_headers() {
        assert_eq!(encode_sql_batch("").len(), ALL_HEADERS_LEN);
    }

    #[test]
    fn test_decode_sql_batch() {
        let payload = encode_sql_batch("SELECT name FROM sys.tables");
        assert_eq!(decode_sql_batch(&payload).unwrap(), "SELECT name FROM sys.tables");
    }

    #[test]
    fn test_decode_without_headers() {
        let payload: Vec<u8> = "SELECT 1".encode_utf16().flat_map(u16::to_le_bytes).collect();
        assert_eq!(decode_sql_batch(&payload).unwrap(), "SELECT 1");
    }
}
