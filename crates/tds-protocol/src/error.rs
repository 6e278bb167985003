//! Wire-level decoding errors.

use thiserror::Error;

/// Errors raised while decoding TDS wire structures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The buffer ended before a structure was complete.
    #[error("unexpected end of data while reading {0}")]
    UnexpectedEof(&'static str),

    /// A packet header or payload is shorter than declared.
    #[error("incomplete packet: expected {expected} bytes, got {actual}")]
    IncompletePacket {
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// Packet header declares a length outside the protocol limits.
    #[error("invalid packet length {length} (min {min}, max {max})")]
    InvalidPacketLength {
        /// Declared length.
        length: usize,
        /// Protocol minimum.
        min: usize,
        /// Negotiated maximum.
        max: usize,
    },

    /// Unknown packet type byte.
    #[error("invalid packet type: 0x{0:02X}")]
    InvalidPacketType(u8),

    /// Unknown bits in the packet status byte.
    #[error("invalid packet status: 0x{0:02X}")]
    InvalidPacketStatus(u8),

    /// Unknown token tag in a token stream.
    #[error("invalid token type: 0x{0:02X}")]
    InvalidTokenType(u8),

    /// A token declares a length inconsistent with its body.
    #[error("invalid length for {token}: {length}")]
    InvalidTokenLength {
        /// Token name.
        token: &'static str,
        /// Offending length value.
        length: usize,
    },

    /// A token field holds a value outside its domain.
    #[error("invalid {field} in {token}")]
    InvalidField {
        /// Token name.
        token: &'static str,
        /// Field name.
        field: &'static str,
    },

    /// A ROW or NBCROW arrived with no COLMETADATA in effect.
    #[error("row token without column metadata")]
    RowWithoutMetadata,

    /// Column metadata names a type code this crate cannot frame.
    #[error("unknown data type: 0x{0:02X}")]
    UnknownDataType(u8),

    /// A length prefix is not valid for the column's type.
    #[error("invalid value length {length} for type 0x{type_code:02X}")]
    InvalidValueLength {
        /// Column type code.
        type_code: u8,
        /// Offending length value.
        length: usize,
    },

    /// Unknown PRELOGIN option byte.
    #[error("invalid prelogin option: 0x{0:02X}")]
    InvalidPreloginOption(u8),

    /// A UTF-16 string could not be decoded.
    #[error("invalid UTF-16 string in {0}")]
    StringEncoding(&'static str),
}
