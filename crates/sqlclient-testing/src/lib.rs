//! # sqlclient-testing
//!
//! Test infrastructure for the SQL Server client.
//!
//! The [`mock_server`] module runs a scripted TDS server on a loopback
//! port. It answers PRELOGIN and LOGIN7 like SQL Server does and replies to
//! SQL batches with canned token streams, so connection and execution
//! paths can be tested without Docker or a database.
//!
//! ## Example
//!
//! ```rust,ignore
//! use sqlclient_testing::mock_server::{MockResponse, MockTdsServer};
//! use sqlclient_types::TypedValue;
//!
//! #[tokio::test]
//! async fn test_with_mock_server() {
//!     let server = MockTdsServer::builder()
//!         .with_response("SELECT 1", MockResponse::scalar(TypedValue::Int(1)))
//!         .build()
//!         .await
//!         .unwrap();
//!
//!     let port = server.port();
//!     // Point a connection at 127.0.0.1:port...
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod mock_server;

pub use mock_server::{MockResponse, MockServerBuilder, MockServerError, MockTdsServer};
