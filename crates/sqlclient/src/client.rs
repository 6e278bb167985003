//! The connection: login, command execution and lifecycle.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use sqlclient_codec::PacketFramer;
use sqlclient_types::{Charset, DecodeOptions};
use tds_protocol::{PacketType, encode_sql_batch};
use tokio::time::timeout;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::login::{self, ServerInfo};
use crate::response::{ResponseEvent, ResponseParser};
use crate::result::{ExecuteResult, ServerMessage};
use crate::state::ConnectionState;
use crate::transport::{BoxTransport, Connector, TcpConnector, resolve_instance};

/// A single logical connection to SQL Server.
///
/// The connection owns its transport exclusively and runs at most one
/// command at a time.
///
/// ```rust,ignore
/// use sqlclient::{Config, Connection};
///
/// let config = Config::new()
///     .host("db.example.com")
///     .credentials("sa", "pw")
///     .database("test");
/// let mut conn = Connection::new(config)?;
/// conn.connect().await?;
/// let result = conn.execute("SELECT 1").await?;
/// ```
pub struct Connection {
    config: Config,
    decode_options: DecodeOptions,
    connector: Arc<dyn Connector>,
    framer: Option<PacketFramer<BoxTransport>>,
    state: ConnectionState,
    server_info: Option<ServerInfo>,
    login_messages: Vec<ServerMessage>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("host", &self.config.host)
            .field("state", &self.state)
            .field("server_info", &self.server_info)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Create a disconnected connection over TCP.
    ///
    /// The configuration is validated here; nothing touches the network
    /// until [`connect`](Self::connect).
    pub fn new(config: Config) -> Result<Self> {
        Self::with_connector(config, TcpConnector)
    }

    /// Create a disconnected connection that opens transports with
    /// `connector`.
    pub fn with_connector(config: Config, connector: impl Connector + 'static) -> Result<Self> {
        config.validate()?;
        let decode_options = config.decode_options()?;
        Ok(Self {
            config,
            decode_options,
            connector: Arc::new(connector),
            framer: None,
            state: ConnectionState::Disconnected,
            server_info: None,
            login_messages: Vec::new(),
        })
    }

    /// Create a connection over TCP and log in.
    pub async fn open(config: Config) -> Result<Self> {
        let mut conn = Self::new(config)?;
        conn.connect().await?;
        Ok(conn)
    }

    /// Log in with explicit credentials, replacing those in the
    /// configuration.
    ///
    /// An open connection is closed first.
    pub async fn login(
        &mut self,
        host: &str,
        username: &str,
        password: &str,
        database: &str,
        deadline: Duration,
    ) -> Result<()> {
        if self.state.is_busy() {
            return Err(Error::Busy);
        }
        if self.state.is_open() {
            self.disconnect().await;
        }

        let config = self
            .config
            .clone()
            .host(host)
            .credentials(username, password)
            .database(database)
            .timeout(deadline);
        config.validate()?;
        self.config = config;
        self.connect().await
    }

    /// Open the transport and log in.
    ///
    /// The configured timeout bounds the whole handshake: instance
    /// resolution, TCP connect, PRELOGIN, LOGIN7 and `SET TEXTSIZE`. Any
    /// failure leaves the connection disconnected.
    pub async fn connect(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::Connected => return Ok(()),
            ConnectionState::Executing => return Err(Error::Busy),
            ConnectionState::Disconnected | ConnectionState::Connecting => {}
        }

        self.framer = None;
        self.server_info = None;
        self.set_state(ConnectionState::Connecting);

        let deadline = self.config.timeout;
        let outcome = timeout(deadline, self.handshake())
            .await
            .unwrap_or(Err(Error::Timeout(deadline)));

        match outcome {
            Ok(()) => {
                self.set_state(ConnectionState::Connected);
                if let Some(info) = &self.server_info {
                    tracing::info!(
                        host = %self.config.host,
                        server = %info.program_name,
                        version = %info.tds_version,
                        database = ?info.database,
                        "connected"
                    );
                }
                Ok(())
            }
            Err(e) => {
                tracing::warn!(host = %self.config.host, error = %e, "connection failed");
                self.framer = None;
                self.server_info = None;
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    async fn handshake(&mut self) -> Result<()> {
        let endpoint = self.config.endpoint()?;
        let deadline = self.config.timeout;

        let port = match &endpoint.instance {
            Some(instance) => resolve_instance(&endpoint.host, instance, deadline).await?,
            None => endpoint.port,
        };

        let transport = self.connector.connect(&endpoint.host, port, deadline).await?;
        let mut framer = PacketFramer::new(transport);
        let (info, messages) = login::negotiate(&mut framer, &self.config, &endpoint).await?;

        self.framer = Some(framer);
        self.server_info = Some(info);
        self.login_messages = messages;

        if self.config.set_text_size {
            let size = i32::try_from(self.config.max_text_size).unwrap_or(i32::MAX);
            self.run_batch(&format!("SET TEXTSIZE {size}")).await?;
        }
        Ok(())
    }

    /// Run a SQL batch and collect its result tables and messages.
    ///
    /// Fails with [`Error::NotConnected`] or [`Error::Busy`] without
    /// touching the connection when it is not idle. A server error of
    /// severity 11 or more stops the batch and comes back as
    /// [`Error::Server`] with everything received before it. Timeouts and
    /// framing faults close the transport.
    pub async fn execute(&mut self, sql: &str) -> Result<ExecuteResult> {
        match self.state {
            ConnectionState::Connected => {}
            ConnectionState::Executing => return Err(Error::Busy),
            ConnectionState::Disconnected | ConnectionState::Connecting => {
                return Err(Error::NotConnected);
            }
        }

        self.set_state(ConnectionState::Executing);
        let deadline = self.config.timeout;
        let outcome = timeout(deadline, self.run_batch(sql))
            .await
            .unwrap_or(Err(Error::Timeout(deadline)));

        match &outcome {
            Err(e) if e.is_connection_fatal() => {
                tracing::warn!(error = %e, "closing connection after failed command");
                self.abandon();
            }
            _ => self.set_state(ConnectionState::Connected),
        }
        outcome
    }

    async fn run_batch(&mut self, sql: &str) -> Result<ExecuteResult> {
        let framer = self.framer.as_mut().ok_or(Error::NotConnected)?;
        tracing::debug!(sql_len = sql.len(), "sending SQL batch");
        framer.send(PacketType::SqlBatch, encode_sql_batch(sql)).await?;

        let reply = framer.receive().await?;
        if reply.packet_type != PacketType::TabularResult {
            return Err(Error::Protocol(format!(
                "expected tabular result, got {:?}",
                reply.packet_type
            )));
        }

        let mut parser = ResponseParser::new(reply.payload, self.decode_options);
        let mut result = ExecuteResult::default();
        loop {
            let event = match parser.next_event() {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(e) => return Err(e.with_messages(result.messages)),
            };

            match event {
                ResponseEvent::Table(table) => result.tables.push(table),
                ResponseEvent::Message(message) if message.is_error() => {
                    tracing::warn!(
                        number = message.number,
                        severity = message.severity,
                        state = message.state,
                        message = %message.message,
                        "server error"
                    );
                    return Err(Error::Server {
                        message,
                        partial: Box::new(result),
                    });
                }
                ResponseEvent::Message(message) => {
                    tracing::debug!(
                        number = message.number,
                        severity = message.severity,
                        message = %message.message,
                        "server message"
                    );
                    result.messages.push(message);
                }
                ResponseEvent::EnvChange(change) => {
                    let resized = self.server_info.as_mut().and_then(|info| info.apply(&change));
                    if let Some(size) = resized {
                        framer.set_packet_size(size as usize);
                    }
                }
                ResponseEvent::ReturnStatus(status) => result.return_status = Some(status),
                ResponseEvent::Done(done) => {
                    tracing::trace!(status = ?done.status, rows = ?done.rows_affected(), "done");
                }
            }
        }

        Ok(result)
    }

    /// Close the transport and return to [`ConnectionState::Disconnected`].
    ///
    /// Safe to call in any state and more than once.
    pub async fn disconnect(&mut self) {
        if let Some(mut framer) = self.framer.take() {
            if let Err(e) = framer.close().await {
                tracing::debug!(error = %e, "error while closing transport");
            }
            tracing::info!(host = %self.config.host, "disconnected");
        }
        self.server_info = None;
        self.set_state(ConnectionState::Disconnected);
    }

    /// Drop the transport without a graceful shutdown.
    fn abandon(&mut self) {
        self.framer = None;
        self.server_info = None;
        self.set_state(ConnectionState::Disconnected);
    }

    fn set_state(&mut self, next: ConnectionState) {
        if self.state != next {
            tracing::debug!(from = %self.state, to = %next, "connection state");
            self.state = next;
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the connection is logged in, idle or not.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Executing
        )
    }

    /// Whether a command is in flight.
    #[must_use]
    pub fn is_executing(&self) -> bool {
        self.state.is_busy()
    }

    /// Negotiated session details, while connected.
    #[must_use]
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    /// Messages the server sent during login.
    #[must_use]
    pub fn login_messages(&self) -> &[ServerMessage] {
        &self.login_messages
    }

    /// Upper bound on large-value payloads.
    #[must_use]
    pub fn max_text_size(&self) -> usize {
        self.decode_options.max_text_size
    }

    /// Output charset for text values.
    #[must_use]
    pub fn charset(&self) -> &Charset {
        &self.decode_options.charset
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Unreachable;

    #[async_trait]
    impl Connector for Unreachable {
        async fn connect(&self, _host: &str, _port: u16, _deadline: Duration) -> Result<BoxTransport> {
            Err(Error::Io(std::io::Error::from(std::io::ErrorKind::ConnectionRefused)))
        }
    }

    struct Silent;

    #[async_trait]
    impl Connector for Silent {
        async fn connect(&self, _host: &str, _port: u16, _deadline: Duration) -> Result<BoxTransport> {
            let (client, server) = tokio::io::duplex(4096);
            std::mem::forget(server);
            Ok(Box::new(client))
        }
    }

    #[test]
    fn test_new_validates_config() {
        let err = Connection::new(Config::new().charset("klingon")).unwrap_err();
        assert!(matches!(err, Error::UnsupportedCharset(_)));
        let conn = Connection::new(Config::new()).unwrap();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(conn.max_text_size(), 4096);
        assert_eq!(conn.charset().name(), "UTF-8");
    }

    #[tokio::test]
    async fn test_execute_requires_connection() {
        let mut conn = Connection::new(Config::new()).unwrap();
        let err = conn.execute("SELECT 1").await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_disconnected() {
        let mut conn = Connection::with_connector(Config::new(), Unreachable).unwrap();
        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(conn.server_info().is_none());
    }

    #[tokio::test]
    async fn test_login_timeout() {
        let config = Config::new().timeout(Duration::from_millis(50));
        let mut conn = Connection::with_connector(config, Silent).unwrap();
        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let mut conn = Connection::new(Config::new()).unwrap();
        conn.disconnect().await;
        conn.disconnect().await;
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }
}
