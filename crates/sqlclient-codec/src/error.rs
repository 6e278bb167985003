//! Framing errors.

use tds_protocol::ProtocolError;
use thiserror::Error;

/// Errors raised while framing packets on a transport.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Transport I/O failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A packet header could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Header declares a length smaller than the header itself.
    #[error("invalid packet header: declared length {length}")]
    InvalidHeader {
        /// Declared packet length.
        length: usize,
    },

    /// Packet exceeds the negotiated maximum.
    #[error("packet too large: {size} bytes (max {max})")]
    PacketTooLarge {
        /// Declared or encoded size.
        size: usize,
        /// Current maximum.
        max: usize,
    },

    /// The transport closed partway through a packet.
    #[error("stream truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Bytes the packet declared.
        expected: usize,
        /// Bytes received before the stream closed.
        actual: usize,
    },

    /// The transport closed after whole packets but before the packet
    /// marked end-of-message.
    #[error("message incomplete: stream closed after {received} payload bytes")]
    IncompleteMessage {
        /// Payload bytes of the message received so far.
        received: usize,
    },

    /// The transport closed cleanly between messages.
    #[error("connection closed")]
    ConnectionClosed,
}

impl CodecError {
    /// Whether the error means the byte stream ended early.
    #[must_use]
    pub fn is_truncation(&self) -> bool {
        matches!(
            self,
            Self::Truncated { .. } | Self::IncompleteMessage { .. } | Self::ConnectionClosed
        )
    }

    /// Whether the error means a packet header was malformed.
    #[must_use]
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Self::InvalidHeader { .. } | Self::PacketTooLarge { .. } | Self::Protocol(_)
        )
    }
}
