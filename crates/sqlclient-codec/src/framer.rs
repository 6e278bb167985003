//! Packet framer over an async byte stream.

use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use tds_protocol::packet::{DEFAULT_PACKET_SIZE, PACKET_HEADER_SIZE, PacketHeader, PacketStatus, PacketType};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::error::CodecError;
use crate::message::{Message, MessageAssembler};
use crate::packet_codec::{Packet, TdsCodec};

/// Sends logical messages as packet sequences and reassembles replies.
///
/// The negotiated packet size bounds both the outbound chunk size and the
/// largest inbound packet accepted. It starts at the value given to
/// [`PacketFramer::with_packet_size`] and changes when the server
/// renegotiates it during login.
#[derive(Debug)]
pub struct PacketFramer<T> {
    inner: Framed<T, TdsCodec>,
    assembler: MessageAssembler,
}

impl<T> PacketFramer<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Frame `transport` with the default 4096-byte packet size.
    pub fn new(transport: T) -> Self {
        Self::with_packet_size(transport, DEFAULT_PACKET_SIZE)
    }

    /// Frame `transport` with a specific packet size.
    pub fn with_packet_size(transport: T, packet_size: usize) -> Self {
        let codec = TdsCodec::new().with_max_packet_size(packet_size);
        Self {
            inner: Framed::new(transport, codec),
            assembler: MessageAssembler::new(),
        }
    }

    /// Current negotiated packet size.
    pub fn packet_size(&self) -> usize {
        self.inner.codec().max_packet_size()
    }

    /// Apply a renegotiated packet size to subsequent sends and receives.
    pub fn set_packet_size(&mut self, packet_size: usize) {
        let codec = self.inner.codec_mut();
        codec.set_max_packet_size(packet_size);
        tracing::debug!(packet_size = codec.max_packet_size(), "packet size changed");
    }

    /// Send `payload` as one logical message of `packet_type`.
    ///
    /// The payload is split into chunks of at most `packet_size - 8` bytes
    /// and only the last packet carries `END_OF_MESSAGE`. An empty payload
    /// still produces one packet.
    pub async fn send(&mut self, packet_type: PacketType, payload: Bytes) -> Result<(), CodecError> {
        let max_payload = self.packet_size() - PACKET_HEADER_SIZE;
        let total = payload.len().div_ceil(max_payload).max(1);

        for index in 0..total {
            let start = index * max_payload;
            let end = (start + max_payload).min(payload.len());
            let status = if index + 1 == total {
                PacketStatus::END_OF_MESSAGE
            } else {
                PacketStatus::NORMAL
            };
            let header = PacketHeader::new(packet_type, status, 0);
            let chunk = BytesMut::from(&payload[start..end]);
            self.inner.feed(Packet::new(header, chunk)).await?;
        }
        self.inner.flush().await?;

        tracing::trace!(
            packet_type = ?packet_type,
            length = payload.len(),
            packets = total,
            "sent message"
        );
        Ok(())
    }

    /// Receive the next complete logical message.
    ///
    /// Fails with [`CodecError::Truncated`] when the transport closes inside
    /// a packet, with [`CodecError::IncompleteMessage`] when it closes between
    /// the packets of one message, and with [`CodecError::ConnectionClosed`]
    /// when it closes before any packet.
    pub async fn receive(&mut self) -> Result<Message, CodecError> {
        loop {
            match self.inner.next().await {
                Some(Ok(packet)) => {
                    if let Some(message) = self.assembler.push(packet) {
                        return Ok(message);
                    }
                }
                Some(Err(e)) => {
                    self.assembler.clear();
                    return Err(e);
                }
                None if self.assembler.has_partial() => {
                    let received = self.assembler.buffer_len();
                    self.assembler.clear();
                    return Err(CodecError::IncompleteMessage { received });
                }
                None => return Err(CodecError::ConnectionClosed),
            }
        }
    }

    /// Flush and shut down the transport.
    pub async fn close(&mut self) -> Result<(), CodecError> {
        self.assembler.clear();
        self.inner.close().await
    }

    /// Reference to the transport.
    pub fn get_ref(&self) -> &T {
        self.inner.get_ref()
    }

    /// Consume the framer and return the transport.
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}
