//! Mock TDS server.
//!
//! ## Features
//!
//! - PRELOGIN and LOGIN7 handshake, with optional credential checking
//! - Canned responses per SQL batch, matched case-insensitively
//! - Multi-statement batches, server errors and raw token streams
//! - Responses that never arrive, for timeout and busy tests
//! - A record of every batch received

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use sqlclient_codec::{CodecError, PacketFramer};
use sqlclient_types::{TypeError, TypedValue, column_for, encode_row};
use tds_protocol::{
    ColMetaData, Done, DoneStatus, EncryptionLevel, EnvChange, Login7, LoginAck, MessageToken,
    PacketType, PreLogin, SqlServerVersion, TdsVersion, TokenType, decode_sql_batch,
};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, broadcast};

/// Error type for mock server operations.
#[derive(Debug, Error)]
pub enum MockServerError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing error.
    #[error("framing error: {0}")]
    Codec(#[from] CodecError),

    /// A scripted value does not fit its column.
    #[error("cannot encode scripted value: {0}")]
    Encode(#[from] TypeError),

    /// The client broke the protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Result type for mock server operations.
pub type Result<T> = std::result::Result<T, MockServerError>;

/// Server login error for bad credentials.
pub const LOGIN_FAILED: i32 = 18456;

/// A scripted reply to one SQL batch.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// One result table. Column types follow the first non-null value in
    /// each column.
    Rows {
        /// Column names.
        columns: Vec<String>,
        /// Row data.
        rows: Vec<Vec<TypedValue>>,
    },

    /// A server error followed by an error DONE.
    Error {
        /// Error number.
        number: i32,
        /// Error message.
        message: String,
        /// Severity class.
        severity: u8,
    },

    /// An informational message.
    Info {
        /// Message number.
        number: i32,
        /// Message text.
        message: String,
    },

    /// A DONE carrying a row count.
    RowsAffected(u64),

    /// Several statements answered in order, chained with DONE_MORE.
    Batch(Vec<MockResponse>),

    /// Pre-encoded TDS tokens sent as-is.
    Raw(Bytes),

    /// Never answer.
    Hang,
}

impl MockResponse {
    /// Single-column, single-row result.
    pub fn scalar(value: TypedValue) -> Self {
        Self::Rows {
            columns: vec![String::new()],
            rows: vec![vec![value]],
        }
    }

    /// Result table.
    pub fn rows(columns: &[&str], rows: Vec<Vec<TypedValue>>) -> Self {
        Self::Rows {
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            rows,
        }
    }

    /// Empty result.
    pub fn empty() -> Self {
        Self::RowsAffected(0)
    }

    /// Rows affected count.
    pub fn affected(count: u64) -> Self {
        Self::RowsAffected(count)
    }

    /// Severity 16 error.
    pub fn error(number: i32, message: impl Into<String>) -> Self {
        Self::Error {
            number,
            message: message.into(),
            severity: 16,
        }
    }

    /// Error with an explicit severity.
    pub fn error_with_severity(number: i32, message: impl Into<String>, severity: u8) -> Self {
        Self::Error {
            number,
            message: message.into(),
            severity,
        }
    }

    /// Statements answered in order.
    pub fn batch(parts: Vec<MockResponse>) -> Self {
        Self::Batch(parts)
    }
}

/// Configuration for the mock TDS server.
#[derive(Debug)]
pub struct MockServerConfig {
    responses: HashMap<String, MockResponse>,
    default_response: MockResponse,
    server_name: String,
    tds_version: TdsVersion,
    database: String,
    credentials: Option<(String, String)>,
    packet_size: Option<u32>,
    encryption: EncryptionLevel,
}

impl MockServerConfig {
    fn find_response(&self, sql: &str) -> MockResponse {
        let normalized = sql.trim();
        self.responses
            .iter()
            .find(|(key, _)| key.trim().eq_ignore_ascii_case(normalized))
            .map_or_else(|| self.default_response.clone(), |(_, r)| r.clone())
    }
}

/// Builder for [`MockTdsServer`].
#[derive(Debug)]
pub struct MockServerBuilder {
    config: MockServerConfig,
}

impl MockServerBuilder {
    /// Builder with default settings.
    pub fn new() -> Self {
        Self {
            config: MockServerConfig {
                responses: HashMap::new(),
                default_response: MockResponse::empty(),
                server_name: "MockSQLServer".to_string(),
                tds_version: TdsVersion::V7_4,
                database: "master".to_string(),
                credentials: None,
                packet_size: None,
                encryption: EncryptionLevel::NotSupported,
            },
        }
    }

    /// Reply to `sql` with `response`.
    pub fn with_response(mut self, sql: impl Into<String>, response: MockResponse) -> Self {
        self.config.responses.insert(sql.into(), response);
        self
    }

    /// Reply to unmatched batches with `response`.
    pub fn with_default_response(mut self, response: MockResponse) -> Self {
        self.config.default_response = response;
        self
    }

    /// Server name reported in LOGINACK.
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.config.server_name = name.into();
        self
    }

    /// Database used when the client names none.
    pub fn with_database(mut self, db: impl Into<String>) -> Self {
        self.config.database = db.into();
        self
    }

    /// Reject logins that do not use these credentials.
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.credentials = Some((username.into(), password.into()));
        self
    }

    /// Renegotiate the packet size during login.
    pub fn with_packet_size(mut self, size: u32) -> Self {
        self.config.packet_size = Some(size);
        self
    }

    /// Encryption value sent in the PRELOGIN response.
    pub fn with_encryption(mut self, level: EncryptionLevel) -> Self {
        self.config.encryption = level;
        self
    }

    /// Start the server.
    pub async fn build(self) -> Result<MockTdsServer> {
        MockTdsServer::start(self.config).await
    }
}

impl Default for MockServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A mock TDS server listening on a loopback port.
///
/// The accept loop stops when the server is dropped.
#[derive(Debug)]
pub struct MockTdsServer {
    addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    connection_count: Arc<Mutex<usize>>,
    batches: Arc<Mutex<Vec<String>>>,
}

impl MockTdsServer {
    /// Builder for the mock server.
    pub fn builder() -> MockServerBuilder {
        MockServerBuilder::new()
    }

    /// Start the server on an available loopback port.
    pub async fn start(config: MockServerConfig) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, _) = broadcast::channel(1);
        let config = Arc::new(config);
        let connection_count = Arc::new(Mutex::new(0usize));
        let batches = Arc::new(Mutex::new(Vec::new()));

        let server = Self {
            addr,
            shutdown_tx: shutdown_tx.clone(),
            connection_count: connection_count.clone(),
            batches: batches.clone(),
        };

        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, _peer)) => {
                                let config = config.clone();
                                let count = connection_count.clone();
                                let batches = batches.clone();
                                tokio::spawn(async move {
                                    *count.lock().await += 1;
                                    if let Err(e) = handle_connection(stream, &config, &batches).await {
                                        tracing::debug!(error = %e, "mock connection ended");
                                    }
                                    let mut c = count.lock().await;
                                    *c = c.saturating_sub(1);
                                });
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "accept failed");
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Ok(server)
    }

    /// Listening address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Listening host.
    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    /// Listening port.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Open connections.
    pub async fn connection_count(&self) -> usize {
        *self.connection_count.lock().await
    }

    /// Every SQL batch received so far, in order.
    pub async fn batches(&self) -> Vec<String> {
        self.batches.lock().await.clone()
    }

    /// Stop accepting connections.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl Drop for MockTdsServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn handle_connection(
    stream: TcpStream,
    config: &MockServerConfig,
    batches: &Mutex<Vec<String>>,
) -> Result<()> {
    let mut framer = PacketFramer::new(stream);

    let prelogin = framer.receive().await?;
    if prelogin.packet_type != PacketType::PreLogin {
        return Err(MockServerError::Protocol(format!(
            "expected PreLogin, got {:?}",
            prelogin.packet_type
        )));
    }
    PreLogin::decode(&prelogin.payload).map_err(|e| MockServerError::Protocol(e.to_string()))?;
    let reply = PreLogin::new()
        .with_version(config.tds_version)
        .with_encryption(config.encryption);
    framer.send(PacketType::TabularResult, reply.encode()).await?;

    let login = framer.receive().await?;
    if login.packet_type != PacketType::Tds7Login {
        return Err(MockServerError::Protocol(format!(
            "expected Tds7Login, got {:?}",
            login.packet_type
        )));
    }
    let request =
        Login7::decode(&login.payload).map_err(|e| MockServerError::Protocol(e.to_string()))?;
    if !send_login_response(&mut framer, config, &request).await? {
        return Ok(());
    }

    loop {
        let message = match framer.receive().await {
            Ok(message) => message,
            Err(CodecError::ConnectionClosed) => break,
            Err(e) => return Err(e.into()),
        };

        if message.packet_type != PacketType::SqlBatch {
            tracing::debug!(packet_type = ?message.packet_type, "ignoring packet");
            continue;
        }

        let sql = decode_sql_batch(&message.payload)
            .map_err(|e| MockServerError::Protocol(e.to_string()))?;
        batches.lock().await.push(sql.clone());

        let response = config.find_response(&sql);
        if matches!(response, MockResponse::Hang) {
            tracing::debug!(sql = %sql, "holding reply");
            continue;
        }

        let mut buf = BytesMut::new();
        encode_response(&mut buf, &response, config, false)?;
        framer.send(PacketType::TabularResult, buf.freeze()).await?;
    }

    Ok(())
}

fn server_version() -> SqlServerVersion {
    SqlServerVersion {
        major: 16,
        minor: 0,
        build: 1000,
    }
}

/// Answer LOGIN7. Returns `false` when the login was rejected.
async fn send_login_response(
    framer: &mut PacketFramer<TcpStream>,
    config: &MockServerConfig,
    request: &Login7,
) -> Result<bool> {
    let mut buf = BytesMut::new();

    if let Some((username, password)) = &config.credentials {
        if request.username != *username || request.password != *password {
            message_token(
                LOGIN_FAILED,
                14,
                format!("Login failed for user '{}'.", request.username),
                config,
            )
            .encode(TokenType::Error, &mut buf);
            done(DoneStatus::ERROR, 0).encode(TokenType::Done, &mut buf);
            framer.send(PacketType::TabularResult, buf.freeze()).await?;
            return Ok(false);
        }
    }

    let database = if request.database.is_empty() {
        config.database.clone()
    } else {
        request.database.clone()
    };
    EnvChange::Database {
        new: database.clone(),
        old: "master".to_string(),
    }
    .encode(&mut buf);
    message_token(
        5701,
        0,
        format!("Changed database context to '{database}'."),
        config,
    )
    .encode(TokenType::Info, &mut buf);
    if let Some(size) = config.packet_size {
        EnvChange::PacketSize {
            new: size,
            old: request.packet_size,
        }
        .encode(&mut buf);
    }
    LoginAck {
        interface: 1,
        tds_version: config.tds_version,
        prog_name: config.server_name.clone(),
        prog_version: server_version(),
    }
    .encode(&mut buf);
    Done::final_done().encode(TokenType::Done, &mut buf);
    framer.send(PacketType::TabularResult, buf.freeze()).await?;

    if let Some(size) = config.packet_size {
        framer.set_packet_size(size as usize);
    }
    Ok(true)
}

fn message_token(number: i32, class: u8, message: String, config: &MockServerConfig) -> MessageToken {
    MessageToken {
        number,
        state: 1,
        class,
        message,
        server: config.server_name.clone(),
        ..MessageToken::default()
    }
}

fn done(status: DoneStatus, rows: u64) -> Done {
    Done {
        status,
        cur_cmd: 0xC1,
        row_count: rows,
    }
}

fn more_flag(more: bool) -> DoneStatus {
    if more { DoneStatus::MORE } else { DoneStatus::empty() }
}

fn encode_response(
    dst: &mut BytesMut,
    response: &MockResponse,
    config: &MockServerConfig,
    more: bool,
) -> Result<()> {
    match response {
        MockResponse::Rows { columns, rows } => {
            let metadata = ColMetaData::new(
                columns
                    .iter()
                    .enumerate()
                    .map(|(i, name)| {
                        let sample = rows
                            .iter()
                            .filter_map(|row| row.get(i))
                            .find(|v| !v.is_null())
                            .unwrap_or(&TypedValue::Null);
                        column_for(name, sample)
                    })
                    .collect(),
            );
            metadata.encode(dst);
            for row in rows {
                encode_row(row, &metadata)?.encode(&metadata, dst);
            }
            done(DoneStatus::COUNT | more_flag(more), rows.len() as u64).encode(TokenType::Done, dst);
        }
        MockResponse::Error {
            number,
            message,
            severity,
        } => {
            message_token(*number, *severity, message.clone(), config).encode(TokenType::Error, dst);
            done(DoneStatus::ERROR | more_flag(more), 0).encode(TokenType::Done, dst);
        }
        MockResponse::Info { number, message } => {
            message_token(*number, 0, message.clone(), config).encode(TokenType::Info, dst);
        }
        MockResponse::RowsAffected(count) => {
            done(DoneStatus::COUNT | more_flag(more), *count).encode(TokenType::Done, dst);
        }
        MockResponse::Batch(parts) => {
            for (i, part) in parts.iter().enumerate() {
                encode_response(dst, part, config, more || i + 1 < parts.len())?;
            }
        }
        MockResponse::Raw(data) => dst.extend_from_slice(data),
        MockResponse::Hang => {}
    }
    Ok(())
}
