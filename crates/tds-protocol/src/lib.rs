//! # tds-protocol
//!
//! IO-agnostic wire structures for the MS-TDS protocol: packet headers,
//! PRELOGIN, LOGIN7, SQL_BATCH and the response token stream.
//!
//! Nothing here performs I/O or knows about an async runtime. The codec
//! crate frames packets on a transport; the client crate drives the
//! conversation.
//!
//! ```rust,ignore
//! use tds_protocol::{PacketHeader, PacketStatus, PacketType};
//!
//! let header = PacketHeader::new(PacketType::SqlBatch, PacketStatus::END_OF_MESSAGE, 100)
//!     .with_packet_id(1);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod codec;
pub mod collation;
pub mod error;
pub mod login7;
pub mod packet;
pub mod prelogin;
pub mod sql_batch;
pub mod token;
pub mod types;
pub mod version;

pub use collation::Collation;
pub use error::ProtocolError;
pub use login7::{Login7, OptionFlags1, OptionFlags2, OptionFlags3};
pub use packet::{
    DEFAULT_PACKET_SIZE, MAX_PACKET_SIZE, MIN_PACKET_SIZE, PACKET_HEADER_SIZE, PacketHeader,
    PacketStatus, PacketType,
};
pub use prelogin::{EncryptionLevel, PreLogin, PreLoginOption};
pub use sql_batch::{decode_sql_batch, encode_sql_batch};
pub use token::{
    ColMetaData, ColumnMetadata, Done, DoneStatus, EnvChange, LoginAck, MessageToken, RawRow,
    Token, TokenParser, TokenType, TypeInfo,
};
pub use types::{ColumnFlags, Framing, TypeId};
pub use version::{SqlServerVersion, TdsVersion};
