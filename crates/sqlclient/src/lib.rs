//! # sqlclient
//!
//! Async SQL Server client core. It logs in over TDS, runs SQL batches and
//! returns their results as typed tables.
//!
//! ## Features
//!
//! - **Explicit lifecycle**: a connection is `Disconnected`, `Connecting`,
//!   `Connected` or `Executing`, and misuse is refused with a typed error
//! - **Single-flight execution**: at most one command runs at a time
//! - **Deadlines**: one timeout bounds the login handshake and each command
//! - **Partial results**: a server error mid-batch still returns the tables
//!   that arrived before it
//! - **Named instances**: `host\instance` is resolved through SQL Server
//!   Browser
//!
//! ## Connection States
//!
//! ```text
//! Disconnected -> Connecting -> Connected   (connect / login)
//! Connected -> Executing -> Connected       (execute)
//! any -> Disconnected                       (disconnect, fatal error, timeout)
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use sqlclient::{Config, Connection};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), sqlclient::Error> {
//!     let config = Config::from_connection_string(
//!         "Server=localhost;Database=test;User Id=sa;Password=secret;"
//!     )?;
//!
//!     let mut conn = Connection::open(config).await?;
//!     let result = conn.execute("SELECT name FROM sys.databases").await?;
//!
//!     for table in &result.tables {
//!         for row in table.rows() {
//!             println!("{:?}", row.get_by_name("name"));
//!         }
//!     }
//!
//!     conn.disconnect().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod error;
pub mod login;
pub mod response;
pub mod result;
pub mod state;
pub mod transport;

pub use client::Connection;
pub use config::{Config, Endpoint};
pub use error::{Error, Result};
pub use login::ServerInfo;
pub use response::{ParserState, ResponseEvent, ResponseParser, TokenClass, parse_response};
pub use result::{ExecuteResult, MessageKind, ResultTable, Row, ServerMessage};
pub use state::ConnectionState;
pub use transport::{BoxTransport, Connector, TcpConnector, Transport, resolve_instance};

// Re-export the value types callers see in rows.
pub use sqlclient_types::{BinaryHint, Charset, DecodeOptions, TypedValue, UnknownTypePolicy, transcode};
pub use tds_protocol::{ColumnMetadata, TdsVersion};
