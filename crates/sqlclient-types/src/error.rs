//! Value decoding errors.

use thiserror::Error;

/// Errors that can occur while decoding or converting a column value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeError {
    /// The column's type code has no decoder.
    #[error("unknown or undecodable type: 0x{type_code:02X}")]
    UnknownType {
        /// Wire type code.
        type_code: u8,
    },

    /// A payload length is not valid for the column's type.
    #[error("invalid {type_name} length: {length}")]
    InvalidLength {
        /// Type family name.
        type_name: &'static str,
        /// Payload length in bytes.
        length: usize,
    },

    /// Invalid date/time value.
    #[error("invalid date/time: {0}")]
    InvalidDateTime(String),

    /// Invalid decimal value.
    #[error("invalid decimal: {0}")]
    InvalidDecimal(String),

    /// Invalid encoding in string data.
    #[error("invalid string encoding: {0}")]
    InvalidEncoding(String),

    /// The charset label is not known or cannot be produced.
    #[error("unsupported charset: {0}")]
    UnsupportedCharset(String),

    /// A value cannot be written for the given column type.
    #[error("type mismatch: cannot write {value} as {column}")]
    TypeMismatch {
        /// Value variant name.
        value: &'static str,
        /// Column type family name.
        column: &'static str,
    },
}
