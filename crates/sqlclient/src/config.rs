//! Client configuration.

use std::time::Duration;

use sqlclient_types::{Charset, DEFAULT_MAX_TEXT_SIZE, DecodeOptions, UnknownTypePolicy};
use tds_protocol::TdsVersion;

use crate::error::Error;

/// Default SQL Server port.
pub const DEFAULT_PORT: u16 = 1433;

/// Default timeout for connect, login and each command.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Smallest packet size a client may request.
pub const MIN_REQUESTED_PACKET_SIZE: u16 = 512;

/// Largest packet size a client may request.
pub const MAX_REQUESTED_PACKET_SIZE: u16 = 32767;

/// Connection configuration.
///
/// Every setting must be in place before the connection is opened.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Config {
    /// Server as written by the caller: `host`, `host:port`, `host,port`
    /// or `host\instance`.
    pub host: String,

    /// Server port, used when `host` carries neither a port nor an instance.
    pub port: u16,

    /// Initial database.
    pub database: Option<String>,

    /// SQL login name.
    pub username: String,

    /// SQL login password.
    pub password: String,

    /// Application name (shown in SQL Server management tools).
    pub application_name: Option<String>,

    /// Deadline for the whole login handshake and for each command.
    pub timeout: Duration,

    /// WHATWG label of the output charset for text values.
    pub charset: String,

    /// Upper bound, in bytes, on large-value column payloads.
    pub max_text_size: usize,

    /// Requested TDS packet size.
    pub packet_size: u16,

    /// Handling of column types the decoder cannot interpret.
    pub unknown_type_policy: UnknownTypePolicy,

    /// Requested TDS protocol version.
    pub tds_version: TdsVersion,

    /// Whether to send `SET TEXTSIZE` after login.
    pub set_text_size: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            database: None,
            username: String::new(),
            password: String::new(),
            application_name: None,
            timeout: DEFAULT_TIMEOUT,
            charset: Charset::UTF_8.name().to_string(),
            max_text_size: DEFAULT_MAX_TEXT_SIZE,
            packet_size: 4096,
            unknown_type_policy: UnknownTypePolicy::Fail,
            tds_version: TdsVersion::V7_4,
            set_text_size: true,
        }
    }
}

/// Where to connect, after parsing [`Config::host`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name or address.
    pub host: String,
    /// Port, if known without asking the browser service.
    pub port: u16,
    /// Named instance to resolve.
    pub instance: Option<String>,
}

impl Config {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a connection string into configuration.
    ///
    /// Supports ADO.NET-style connection strings:
    /// ```text
    /// Server=localhost;Database=mydb;User Id=sa;Password=secret;
    /// ```
    pub fn from_connection_string(conn_str: &str) -> Result<Self, Error> {
        let mut config = Self::default();

        for part in conn_str.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("invalid key-value: {part}")))?;

            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "server" | "data source" | "host" | "address" => {
                    config.host = value.to_string();
                }
                "port" => {
                    config.port = value
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid port: {value}")))?;
                }
                "database" | "initial catalog" => {
                    config.database = Some(value.to_string());
                }
                "user id" | "uid" | "user" => {
                    config.username = value.to_string();
                }
                "password" | "pwd" => {
                    config.password = value.to_string();
                }
                "application name" | "app" => {
                    config.application_name = Some(value.to_string());
                }
                "connect timeout" | "connection timeout" | "timeout" => {
                    let secs: u64 = value
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid timeout: {value}")))?;
                    config.timeout = Duration::from_secs(secs);
                }
                "charset" => {
                    config.charset = value.to_string();
                }
                "text size" | "textsize" => {
                    config.max_text_size = value
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid text size: {value}")))?;
                }
                "packet size" => {
                    config.packet_size = value
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid packet size: {value}")))?;
                }
                _ => {
                    tracing::debug!(
                        key = key,
                        value = value,
                        "ignoring unknown connection string option"
                    );
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the server host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the server port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the initial database.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set SQL login credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Set the application name.
    #[must_use]
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    /// Set the timeout for login and for each command.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the output charset by label.
    #[must_use]
    pub fn charset(mut self, label: impl Into<String>) -> Self {
        self.charset = label.into();
        self
    }

    /// Set the large-value bound.
    #[must_use]
    pub fn max_text_size(mut self, size: usize) -> Self {
        self.max_text_size = size;
        self
    }

    /// Set the requested packet size.
    #[must_use]
    pub fn packet_size(mut self, size: u16) -> Self {
        self.packet_size = size;
        self
    }

    /// Set the unknown-type policy.
    #[must_use]
    pub fn unknown_type_policy(mut self, policy: UnknownTypePolicy) -> Self {
        self.unknown_type_policy = policy;
        self
    }

    /// Set the requested TDS version.
    #[must_use]
    pub fn tds_version(mut self, version: TdsVersion) -> Self {
        self.tds_version = version;
        self
    }

    /// Enable or disable `SET TEXTSIZE` after login.
    #[must_use]
    pub fn set_text_size(mut self, enabled: bool) -> Self {
        self.set_text_size = enabled;
        self
    }

    /// Check every setting without touching the network.
    pub fn validate(&self) -> Result<(), Error> {
        self.output_charset()?;
        self.endpoint()?;
        if self.timeout.is_zero() {
            return Err(Error::Config("timeout must be greater than zero".into()));
        }
        if !(MIN_REQUESTED_PACKET_SIZE..=MAX_REQUESTED_PACKET_SIZE).contains(&self.packet_size) {
            return Err(Error::Config(format!(
                "packet size {} outside {MIN_REQUESTED_PACKET_SIZE}..={MAX_REQUESTED_PACKET_SIZE}",
                self.packet_size
            )));
        }
        Ok(())
    }

    /// The output charset.
    pub fn output_charset(&self) -> Result<Charset, Error> {
        Charset::for_label(&self.charset).map_err(Error::from)
    }

    /// Decoder settings derived from this configuration.
    pub fn decode_options(&self) -> Result<DecodeOptions, Error> {
        Ok(DecodeOptions::default()
            .max_text_size(self.max_text_size)
            .unknown_type_policy(self.unknown_type_policy)
            .charset(self.output_charset()?))
    }

    /// Split [`Config::host`] into host, port and instance.
    pub fn endpoint(&self) -> Result<Endpoint, Error> {
        let value = self.host.trim();
        let invalid_port = |port: &str| Error::Config(format!("invalid port: {port}"));

        let (host, port, instance) = if let Some((host, port)) = value.split_once(',') {
            let port = port.trim().parse().map_err(|_| invalid_port(port))?;
            (host, port, None)
        } else if let Some((host, instance)) = value.split_once('\\') {
            (host, self.port, Some(instance.trim().to_string()))
        } else if let Some((host, port)) = value
            .rsplit_once(':')
            .filter(|(host, _)| !host.contains(':'))
        {
            let port = port.trim().parse().map_err(|_| invalid_port(port))?;
            (host, port, None)
        } else {
            (value, self.port, None)
        };

        let host = host.trim();
        if host.is_empty() {
            return Err(Error::Config("server host is empty".into()));
        }
        if instance.as_deref().is_some_and(str::is_empty) {
            return Err(Error::Config("instance name is empty".into()));
        }

        Ok(Endpoint {
            host: host.to_string(),
            port,
            instance,
        })
    }
}
