//! # sqlclient-codec
//!
//! Async framing for TDS packets.
//!
//! The codec layer sits between the raw transport and the client:
//!
//! ```text
//! transport → TdsCodec (packet framing) → MessageAssembler → PacketFramer → client
//! ```
//!
//! [`PacketFramer`] is the entry point. It splits outbound logical messages
//! into packets no larger than the negotiated packet size and follows the
//! `END_OF_MESSAGE` bit to reassemble inbound ones.
//!
//! ```rust,ignore
//! use sqlclient_codec::PacketFramer;
//! use tds_protocol::PacketType;
//!
//! let mut framer = PacketFramer::new(tcp_stream);
//! framer.send(PacketType::SqlBatch, payload).await?;
//! let reply = framer.receive().await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod framer;
pub mod message;
pub mod packet_codec;

pub use error::CodecError;
pub use framer::PacketFramer;
pub use message::{Message, MessageAssembler};
pub use packet_codec::{Packet, TdsCodec};
