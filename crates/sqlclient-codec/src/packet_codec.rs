//! TDS packet codec for tokio-util framing.

use bytes::{BufMut, BytesMut};
use tds_protocol::packet::{DEFAULT_PACKET_SIZE, MAX_PACKET_SIZE, PACKET_HEADER_SIZE, PacketHeader};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CodecError;

/// A TDS packet with header and payload.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Packet header.
    pub header: PacketHeader,
    /// Packet payload (excluding header).
    pub payload: BytesMut,
}

impl Packet {
    /// Create a new packet with the given header and payload.
    #[must_use]
    pub fn new(header: PacketHeader, payload: BytesMut) -> Self {
        Self { header, payload }
    }

    /// Total packet size including header.
    #[must_use]
    pub fn total_size(&self) -> usize {
        PACKET_HEADER_SIZE + self.payload.len()
    }

    /// Check if this is the last packet in a message.
    #[must_use]
    pub fn is_end_of_message(&self) -> bool {
        self.header.is_end_of_message()
    }
}

/// Packet codec.
///
/// Decoding validates the declared length against the header size and the
/// negotiated maximum before waiting for the body. Encoding stamps the
/// length and a per-connection packet id that starts at 1 and wraps.
#[derive(Debug)]
pub struct TdsCodec {
    max_packet_size: usize,
    packet_id: u8,
}

impl TdsCodec {
    /// Codec limited to the default 4096-byte packet size.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_packet_size: DEFAULT_PACKET_SIZE,
            packet_id: 1,
        }
    }

    /// Set the largest packet accepted or produced.
    #[must_use]
    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.set_max_packet_size(size);
        self
    }

    /// Change the largest packet accepted or produced.
    pub fn set_max_packet_size(&mut self, size: usize) {
        self.max_packet_size = size.clamp(PACKET_HEADER_SIZE + 1, MAX_PACKET_SIZE);
    }

    /// Current packet size limit.
    #[must_use]
    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    /// Id the next encoded packet will carry.
    #[must_use]
    pub fn peek_packet_id(&self) -> u8 {
        self.packet_id
    }

    fn next_packet_id(&mut self) -> u8 {
        let id = self.packet_id;
        self.packet_id = self.packet_id.wrapping_add(1);
        if self.packet_id == 0 {
            self.packet_id = 1;
        }
        id
    }
}

impl Default for TdsCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn declared_length(src: &[u8]) -> usize {
    u16::from_be_bytes([src[2], src[3]]) as usize
}

impl Decoder for TdsCodec {
    type Item = Packet;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < PACKET_HEADER_SIZE {
            return Ok(None);
        }

        let length = declared_length(src);
        if length < PACKET_HEADER_SIZE {
            return Err(CodecError::InvalidHeader { length });
        }
        if length > self.max_packet_size {
            return Err(CodecError::PacketTooLarge {
                size: length,
                max: self.max_packet_size,
            });
        }

        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let mut packet_bytes = src.split_to(length);
        let header = PacketHeader::decode(&mut packet_bytes.as_ref())?;
        let payload = packet_bytes.split_off(PACKET_HEADER_SIZE);

        tracing::trace!(
            packet_type = ?header.packet_type,
            length = length,
            packet_id = header.packet_id,
            is_eom = header.is_end_of_message(),
            "decoded TDS packet"
        );

        Ok(Some(Packet::new(header, payload)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(packet) = self.decode(src)? {
            return Ok(Some(packet));
        }
        if src.is_empty() {
            return Ok(None);
        }
        let expected = if src.len() >= 4 {
            declared_length(src)
        } else {
            PACKET_HEADER_SIZE
        };
        let actual = src.len();
        src.clear();
        Err(CodecError::Truncated { expected, actual })
    }
}

impl Encoder<Packet> for TdsCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let total_length = item.total_size();
        if total_length > self.max_packet_size {
            return Err(CodecError::PacketTooLarge {
                size: total_length,
                max: self.max_packet_size,
            });
        }

        dst.reserve(total_length);

        let mut header = item.header;
        header.length = total_length as u16;
        header.packet_id = self.next_packet_id();
        header.encode(dst);
        dst.put_slice(&item.payload);

        tracing::trace!(
            packet_type = ?header.packet_type,
            length = total_length,
            packet_id = header.packet_id,
            is_eom = header.is_end_of_message(),
            "encoded TDS packet"
        );

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tds_protocol::packet::{PacketStatus, PacketType};

    fn raw_packet(packet_type: u8, status: u8, length: u16, payload: &[u8]) -> BytesMut {
        let mut data = BytesMut::new();
        data.put_u8(packet_type);
        data.put_u8(status);
        data.put_u16(length);
        data.put_u16(0); // spid
        data.put_u8(1); // packet_id
        data.put_u8(0); // window
        data.put_slice(payload);
        data
    }

    #[test]
    fn test_decode_packet() {
        let mut codec = TdsCodec::new();
        let mut data = raw_packet(0x04, 0x01, 12, b"test");

        let packet = codec.decode(&mut data).unwrap().unwrap();
        assert_eq!(packet.header.packet_type, PacketType::TabularResult);
        assert!(packet.is_end_of_message());
        assert_eq!(&packet.payload[..], b"test");
        assert!(data.is_empty());
    }

    #[test]
    fn test_encode_packet() {
        let mut codec = TdsCodec::new();

        let header = PacketHeader::new(PacketType::SqlBatch, PacketStatus::END_OF_MESSAGE, 0);
        let packet = Packet::new(header, BytesMut::from(&b"test"[..]));

        let mut dst = BytesMut::new();
        codec.encode(packet, &mut dst).unwrap();

        assert_eq!(dst.len(), 12);
        assert_eq!(dst[0], PacketType::SqlBatch as u8);
        assert_eq!(&dst[2..4], &[0x00, 0x0C]);
        assert_eq!(dst[6], 1);
    }

    #[test]
    fn test_incomplete_packet() {
        let mut codec = TdsCodec::new();
        let mut data = raw_packet(0x04, 0x01, 12, b"");

        assert!(codec.decode(&mut data).unwrap().is_none());
        assert_eq!(data.len(), PACKET_HEADER_SIZE);
    }

    #[test]
    fn test_length_below_header_size() {
        let mut codec = TdsCodec::new();
        let mut data = raw_packet(0x04, 0x01, 4, b"");

        let err = codec.decode(&mut data).unwrap_err();
        assert!(matches!(err, CodecError::InvalidHeader { length: 4 }));
        assert!(err.is_malformed());
    }

    #[test]
    fn test_length_above_negotiated_maximum() {
        let mut codec = TdsCodec::new().with_max_packet_size(512);
        let mut data = raw_packet(0x04, 0x01, 513, b"");

        let err = codec.decode(&mut data).unwrap_err();
        assert!(matches!(err, CodecError::PacketTooLarge { size: 513, max: 512 }));
    }

    #[test]
    fn test_unknown_type_and_status() {
        let mut codec = TdsCodec::new();
        let mut data = raw_packet(0x7F, 0x01, 8, b"");
        assert!(matches!(
            codec.decode(&mut data),
            Err(CodecError::Protocol(tds_protocol::ProtocolError::InvalidPacketType(0x7F)))
        ));

        let mut data = raw_packet(0x04, 0x80, 8, b"");
        assert!(matches!(
            codec.decode(&mut data),
            Err(CodecError::Protocol(tds_protocol::ProtocolError::InvalidPacketStatus(0x80)))
        ));
    }

    #[test]
    fn test_decode_eof_with_partial_packet() {
        let mut codec = TdsCodec::new();
        let mut data = raw_packet(0x04, 0x01, 20, b"abc");

        let err = codec.decode_eof(&mut data).unwrap_err();
        assert!(matches!(err, CodecError::Truncated { expected: 20, actual: 11 }));
        assert!(err.is_truncation());
    }

    #[test]
    fn test_decode_eof_clean() {
        let mut codec = TdsCodec::new();
        assert!(codec.decode_eof(&mut BytesMut::new()).unwrap().is_none());
    }

    #[test]
    fn test_packet_id_wraps_and_skips_zero() {
        let mut codec = TdsCodec::new();
        let header = PacketHeader::new(PacketType::SqlBatch, PacketStatus::NORMAL, 0);
        let mut ids = Vec::new();
        for _ in 0..256 {
            let mut dst = BytesMut::new();
            codec
                .encode(Packet::new(header, BytesMut::new()), &mut dst)
                .unwrap();
            ids.push(dst[6]);
        }
        assert_eq!(ids[0], 1);
        assert_eq!(ids[254], 255);
        assert_eq!(ids[255], 1);
        assert!(!ids.contains(&0));
    }

    #[test]
    fn test_encode_rejects_oversized_packet() {
        let mut codec = TdsCodec::new().with_max_packet_size(512);
        let header = PacketHeader::new(PacketType::SqlBatch, PacketStatus::END_OF_MESSAGE, 0);
        let packet = Packet::new(header, BytesMut::from(&[0u8; 600][..]));
        assert!(codec.encode(packet, &mut BytesMut::new()).is_err());
    }
}
