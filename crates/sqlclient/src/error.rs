//! Client error types.
//!
//! Lower layers keep their own error enums. The `From` impls here classify
//! them into the caller-facing taxonomy so that a framing fault, a decoding
//! gap and a server rejection stay distinguishable.

use std::time::Duration;

use sqlclient_codec::CodecError;
use sqlclient_types::TypeError;
use tds_protocol::ProtocolError;
use thiserror::Error;

use crate::result::{ExecuteResult, ServerMessage};

/// Errors that can occur during client operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Connect, login or execute exceeded its deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The transport closed partway through a packet or message.
    #[error("stream truncated: {0}")]
    TruncatedStream(String),

    /// A packet header was invalid.
    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    /// A token in the response could not be decoded.
    #[error("malformed token: {reason}")]
    MalformedToken {
        /// What was wrong with the token.
        reason: String,
        /// Server messages decoded before the fault.
        messages: Vec<ServerMessage>,
    },

    /// The server rejected the login.
    #[error("authentication failed: server error {number} (severity {class}): {message}")]
    Authentication {
        /// Error number.
        number: i32,
        /// Severity class.
        class: u8,
        /// Error state.
        state: u8,
        /// Error message.
        message: String,
    },

    /// The server sent a token sequence the client does not expect.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The connection is not logged in.
    #[error("not connected")]
    NotConnected,

    /// Another command is still executing on this connection.
    #[error("connection busy: a command is already executing")]
    Busy,

    /// A column has a type the decoder cannot handle.
    #[error("unknown data type: 0x{type_code:02X}")]
    UnknownType {
        /// Wire type code.
        type_code: u8,
    },

    /// A value was framed correctly but holds something the client cannot
    /// represent, such as an out-of-range date or decimal.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// The configured output charset is not known.
    #[error("unsupported charset: {0}")]
    UnsupportedCharset(String),

    /// The server terminated the command with an error.
    #[error("server error {}: {}", .message.number, .message.message)]
    Server {
        /// The terminating message.
        message: ServerMessage,
        /// Tables and messages received before the error.
        partial: Box<ExecuteResult>,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The server closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Check if this error is transient and may succeed on retry.
    ///
    /// Nothing is retried internally; this is for callers that want their
    /// own retry policy.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_)
            | Self::ConnectionClosed
            | Self::TruncatedStream(_)
            | Self::Io(_) => true,
            Self::Server { message, .. } => message.is_fatal(),
            _ => false,
        }
    }

    /// Check if this error indicates a framing or protocol fault.
    #[must_use]
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::TruncatedStream(_)
                | Self::MalformedPacket(_)
                | Self::MalformedToken { .. }
                | Self::Protocol(_)
        )
    }

    /// Whether the connection cannot be used after this error.
    #[must_use]
    pub fn is_connection_fatal(&self) -> bool {
        match self {
            Self::Timeout(_)
            | Self::TruncatedStream(_)
            | Self::MalformedPacket(_)
            | Self::MalformedToken { .. }
            | Self::Protocol(_)
            | Self::Io(_)
            | Self::ConnectionClosed => true,
            Self::Server { message, .. } => message.is_fatal(),
            _ => false,
        }
    }

    /// Check if this is a server error with a specific number.
    #[must_use]
    pub fn is_server_error(&self, number: i32) -> bool {
        match self {
            Self::Server { message, .. } => message.number == number,
            Self::Authentication { number: n, .. } => *n == number,
            _ => false,
        }
    }

    /// Get the severity class if the server reported this error.
    ///
    /// SQL Server error classes range from 0-25:
    /// - 0-10: Informational
    /// - 11-16: User errors
    /// - 17-19: Resource/hardware errors
    /// - 20-25: System errors (connection terminating)
    #[must_use]
    pub fn class(&self) -> Option<u8> {
        match self {
            Self::Server { message, .. } => Some(message.severity),
            Self::Authentication { class, .. } => Some(*class),
            _ => None,
        }
    }

    /// Partial results carried by a server error.
    #[must_use]
    pub fn partial(&self) -> Option<&ExecuteResult> {
        match self {
            Self::Server { partial, .. } => Some(partial),
            _ => None,
        }
    }

    /// Server messages carried by this error, in arrival order.
    #[must_use]
    pub fn messages(&self) -> &[ServerMessage] {
        match self {
            Self::MalformedToken { messages, .. } => messages,
            Self::Server { partial, .. } => &partial.messages,
            _ => &[],
        }
    }

    pub(crate) fn with_messages(self, collected: Vec<ServerMessage>) -> Self {
        match self {
            Self::MalformedToken { reason, .. } => Self::MalformedToken {
                reason,
                messages: collected,
            },
            other => other,
        }
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::RowWithoutMetadata => Self::Protocol(err.to_string()),
            ProtocolError::UnknownDataType(type_code) => Self::UnknownType { type_code },
            ProtocolError::InvalidPacketLength { .. }
            | ProtocolError::InvalidPacketType(_)
            | ProtocolError::InvalidPacketStatus(_) => Self::MalformedPacket(err.to_string()),
            ProtocolError::IncompletePacket { .. } => Self::TruncatedStream(err.to_string()),
            other => Self::MalformedToken {
                reason: other.to_string(),
                messages: Vec::new(),
            },
        }
    }
}

impl From<CodecError> for Error {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Io(e) => Self::Io(e),
            CodecError::Truncated { .. } | CodecError::IncompleteMessage { .. } => {
                Self::TruncatedStream(err.to_string())
            }
            CodecError::ConnectionClosed => Self::ConnectionClosed,
            CodecError::Protocol(_)
            | CodecError::InvalidHeader { .. }
            | CodecError::PacketTooLarge { .. } => Self::MalformedPacket(err.to_string()),
        }
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        match err {
            TypeError::UnknownType { type_code } => Self::UnknownType { type_code },
            TypeError::UnsupportedCharset(label) => Self::UnsupportedCharset(label),
            TypeError::InvalidDecimal(_)
            | TypeError::InvalidDateTime(_)
            | TypeError::InvalidEncoding(_)
            | TypeError::TypeMismatch { .. } => Self::InvalidValue(err.to_string()),
            other => Self::MalformedToken {
                reason: other.to_string(),
                messages: Vec::new(),
            },
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
