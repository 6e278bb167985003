//! Logical message reassembly.
//!
//! A message spans one or more packets; the last carries the
//! `END_OF_MESSAGE` status bit. Payloads are concatenated in arrival order.

use bytes::{Bytes, BytesMut};
use tds_protocol::packet::PacketType;

use crate::packet_codec::Packet;

/// A complete logical message reassembled from one or more packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Packet type of the first packet.
    pub packet_type: PacketType,
    /// All packet payloads, concatenated.
    pub payload: Bytes,
}

impl Message {
    /// Wrap a single end-of-message packet.
    #[must_use]
    pub fn from_packet(packet: Packet) -> Self {
        Self {
            packet_type: packet.header.packet_type,
            payload: packet.payload.freeze(),
        }
    }

    /// Payload length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Buffers packet payloads until a message is complete.
#[derive(Debug, Default)]
pub struct MessageAssembler {
    buffer: BytesMut,
    packet_type: Option<PacketType>,
    packet_count: usize,
}

impl MessageAssembler {
    /// Create an empty assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a packet; returns the message once its final packet arrives.
    pub fn push(&mut self, packet: Packet) -> Option<Message> {
        let packet_type = *self.packet_type.get_or_insert(packet.header.packet_type);
        let is_eom = packet.is_end_of_message();

        self.buffer.extend_from_slice(&packet.payload);
        self.packet_count += 1;

        tracing::trace!(
            packet_type = ?packet_type,
            packet_count = self.packet_count,
            buffer_len = self.buffer.len(),
            is_eom = is_eom,
            "assembling message"
        );

        if !is_eom {
            return None;
        }

        self.packet_type = None;
        self.packet_count = 0;
        Some(Message {
            packet_type,
            payload: self.buffer.split().freeze(),
        })
    }

    /// Whether a message is partly buffered.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        self.packet_type.is_some()
    }

    /// Packets buffered for the current message.
    #[must_use]
    pub fn packet_count(&self) -> usize {
        self.packet_count
    }

    /// Bytes buffered for the current message.
    #[must_use]
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial message.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.packet_type = None;
        self.packet_count = 0;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tds_protocol::packet::{PacketHeader, PacketStatus};

    fn make_packet(is_eom: bool, payload: &[u8]) -> Packet {
        let status = if is_eom {
            PacketStatus::END_OF_MESSAGE
        } else {
            PacketStatus::NORMAL
        };
        let header = PacketHeader::new(PacketType::TabularResult, status, 0);
        Packet::new(header, BytesMut::from(payload))
    }

    #[test]
    fn test_single_packet_message() {
        let mut assembler = MessageAssembler::new();
        let message = assembler.push(make_packet(true, b"hello")).unwrap();

        assert_eq!(message.packet_type, PacketType::TabularResult);
        assert_eq!(&message.payload[..], b"hello");
        assert!(!assembler.has_partial());
    }

    #[test]
    fn test_multi_packet_message() {
        let mut assembler = MessageAssembler::new();

        assert!(assembler.push(make_packet(false, b"hello ")).is_none());
        assert!(assembler.has_partial());
        assert!(assembler.push(make_packet(false, b"world")).is_none());
        assert_eq!(assembler.packet_count(), 2);

        let message = assembler.push(make_packet(true, b"!")).unwrap();
        assert_eq!(&message.payload[..], b"hello world!");
        assert_eq!(assembler.packet_count(), 0);
        assert_eq!(assembler.buffer_len(), 0);
    }

    #[test]
    fn test_empty_eom_packet() {
        let mut assembler = MessageAssembler::new();
        let message = assembler.push(make_packet(true, b"")).unwrap();
        assert!(message.is_empty());
    }

    #[test]
    fn test_clear() {
        let mut assembler = MessageAssembler::new();
        assembler.push(make_packet(false, b"partial"));
        assert!(assembler.has_partial());

        assembler.clear();
        assert!(!assembler.has_partial());
        assert_eq!(assembler.buffer_len(), 0);
    }
}
