//! PRELOGIN and LOGIN7 negotiation.
//!
//! The login response is read with a restricted token set: LOGINACK,
//! ENVCHANGE, ERROR, INFO and DONE. Anything else means the peer is not
//! speaking the login protocol and fails the handshake.

use bytes::Bytes;
use sqlclient_codec::PacketFramer;
use tds_protocol::{
    Collation, EncryptionLevel, EnvChange, Login7, PacketType, PreLogin, SqlServerVersion,
    TdsVersion, Token, TokenParser,
};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::{Config, Endpoint};
use crate::error::{Error, Result};
use crate::result::{MessageKind, ServerMessage};

/// What the server told us about itself and the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    /// TDS version the server accepted.
    pub tds_version: TdsVersion,
    /// Server program name from LOGINACK.
    pub program_name: String,
    /// Server product version from LOGINACK.
    pub version: SqlServerVersion,
    /// Current database.
    pub database: Option<String>,
    /// Session language.
    pub language: Option<String>,
    /// Legacy character set name.
    pub charset: Option<String>,
    /// Default collation.
    pub collation: Option<Collation>,
    /// Negotiated packet size.
    pub packet_size: u32,
}

impl ServerInfo {
    fn new(requested_packet_size: u32) -> Self {
        Self {
            tds_version: TdsVersion::default(),
            program_name: String::new(),
            version: SqlServerVersion::default(),
            database: None,
            language: None,
            charset: None,
            collation: None,
            packet_size: requested_packet_size,
        }
    }

    /// Apply an ENVCHANGE. Returns the new packet size when it changed.
    pub(crate) fn apply(&mut self, change: &EnvChange) -> Option<u32> {
        match change {
            EnvChange::Database { new, .. } => {
                tracing::debug!(database = %new, "database changed");
                self.database = Some(new.clone());
            }
            EnvChange::Language { new, .. } => {
                self.language = Some(new.clone());
            }
            EnvChange::Charset { new, .. } => {
                self.charset = Some(new.clone());
            }
            EnvChange::SqlCollation { new, .. } => {
                self.collation = *new;
            }
            EnvChange::PacketSize { new, .. } => {
                tracing::debug!(packet_size = new, "packet size renegotiated");
                if *new != self.packet_size {
                    self.packet_size = *new;
                    return Some(*new);
                }
            }
            EnvChange::Other { kind, .. } => {
                tracing::trace!(kind = kind, "ignoring environment change");
            }
        }
        None
    }
}

/// Run PRELOGIN and LOGIN7 over `framer`.
///
/// On success the framer already uses the negotiated packet size.
pub(crate) async fn negotiate<T>(
    framer: &mut PacketFramer<T>,
    config: &Config,
    endpoint: &Endpoint,
) -> Result<(ServerInfo, Vec<ServerMessage>)>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let prelogin = build_prelogin(config, endpoint);
    framer.send(PacketType::PreLogin, prelogin.encode()).await?;
    let reply = framer.receive().await?;
    if !matches!(reply.packet_type, PacketType::TabularResult | PacketType::PreLogin) {
        return Err(Error::Protocol(format!(
            "expected PRELOGIN response, got {:?}",
            reply.packet_type
        )));
    }
    let server = PreLogin::decode(&reply.payload)?;
    tracing::debug!(
        encryption = ?server.encryption,
        server_version = ?server.server_version,
        "received PRELOGIN response"
    );
    if server.encryption == EncryptionLevel::Required {
        return Err(Error::Protocol("server requires encryption".into()));
    }

    let login = build_login7(config, endpoint);
    framer.send(PacketType::Tds7Login, login.encode()).await?;
    let reply = framer.receive().await?;
    if reply.packet_type != PacketType::TabularResult {
        return Err(Error::Protocol(format!(
            "expected login response, got {:?}",
            reply.packet_type
        )));
    }

    let (info, messages) = process_login_response(reply.payload, u32::from(config.packet_size))?;
    if info.packet_size as usize != framer.packet_size() {
        framer.set_packet_size(info.packet_size as usize);
    }
    Ok((info, messages))
}

fn build_prelogin(config: &Config, endpoint: &Endpoint) -> PreLogin {
    let mut prelogin = PreLogin::new()
        .with_version(config.tds_version)
        .with_encryption(EncryptionLevel::NotSupported)
        .with_thread_id(std::process::id());
    if let Some(instance) = &endpoint.instance {
        prelogin = prelogin.with_instance(instance.clone());
    }
    prelogin
}

fn build_login7(config: &Config, endpoint: &Endpoint) -> Login7 {
    let mut login = Login7::new()
        .with_sql_auth(&config.username, &config.password)
        .with_packet_size(u32::from(config.packet_size))
        .with_hostname(client_hostname())
        .with_server_name(&endpoint.host);
    login.tds_version = config.tds_version;

    if let Some(app) = &config.application_name {
        login = login.with_app_name(app);
    }
    if let Some(database) = &config.database {
        login = login.with_database(database);
    }
    login
}

fn client_hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "localhost".to_string())
}

/// Interpret the token stream answering a LOGIN7.
///
/// Succeeds only when a LOGINACK was seen. Otherwise the last ERROR token
/// becomes [`Error::Authentication`].
pub(crate) fn process_login_response(
    payload: Bytes,
    requested_packet_size: u32,
) -> Result<(ServerInfo, Vec<ServerMessage>)> {
    let mut parser = TokenParser::new(payload);
    let mut info = ServerInfo::new(requested_packet_size);
    let mut acknowledged = false;
    let mut messages = Vec::new();
    let mut last_error = None;

    while let Some(token) = parser.next_token()? {
        match token {
            Token::LoginAck(ack) => {
                tracing::info!(
                    version = %ack.tds_version,
                    server = %ack.prog_name,
                    server_version = %ack.prog_version,
                    "login acknowledged"
                );
                info.tds_version = ack.tds_version;
                info.program_name = ack.prog_name;
                info.version = ack.prog_version;
                acknowledged = true;
            }
            Token::EnvChange(change) => {
                tracing::debug!(change = ?change, "environment change during login");
                info.apply(&change);
            }
            Token::Error(err) => {
                tracing::warn!(
                    number = err.number,
                    severity = err.class,
                    message = %err.message,
                    "login error"
                );
                let message = ServerMessage::from_token(MessageKind::Error, err);
                last_error = Some(message.clone());
                messages.push(message);
            }
            Token::Info(msg) => {
                tracing::debug!(number = msg.number, message = %msg.message, "login info");
                messages.push(ServerMessage::from_token(MessageKind::Info, msg));
            }
            Token::Done(done) => {
                tracing::debug!(status = ?done.status, "login done");
            }
            other => {
                return Err(Error::Protocol(format!(
                    "unexpected {:?} token during login",
                    other.token_type()
                )));
            }
        }
    }

    if acknowledged {
        return Ok((info, messages));
    }
    match last_error {
        Some(err) => Err(Error::Authentication {
            number: err.number,
            class: err.severity,
            state: err.state,
            message: err.message,
        }),
        None => Err(Error::Protocol("login response carried no LOGINACK".into())),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use tds_protocol::{ColMetaData, Done, LoginAck, MessageToken, TokenType};

    fn login_ack() -> LoginAck {
        LoginAck {
            interface: 1,
            tds_version: TdsVersion::V7_4,
            prog_name: "Microsoft SQL Server".into(),
            prog_version: SqlServerVersion {
                major: 16,
                minor: 0,
                build: 1000,
            },
        }
    }

    fn login_error() -> MessageToken {
        MessageToken {
            number: 18456,
            state: 1,
            class: 14,
            message: "Login failed for user 'sa'.".into(),
            server: "db".into(),
            procedure: String::new(),
            line: 1,
        }
    }

    #[test]
    fn test_successful_login_response() {
        let mut buf = BytesMut::new();
        EnvChange::Database {
            new: "test".into(),
            old: "master".into(),
        }
        .encode(&mut buf);
        EnvChange::PacketSize {
            new: 8192,
            old: 4096,
        }
        .encode(&mut buf);
        MessageToken {
            number: 5701,
            class: 0,
            message: "Changed database context to 'test'.".into(),
            ..MessageToken::default()
        }
        .encode(TokenType::Info, &mut buf);
        login_ack().encode(&mut buf);
        Done::final_done().encode(TokenType::Done, &mut buf);

        let (info, messages) = process_login_response(buf.freeze(), 4096).unwrap();
        assert_eq!(info.tds_version, TdsVersion::V7_4);
        assert_eq!(info.program_name, "Microsoft SQL Server");
        assert_eq!(info.version.major, 16);
        assert_eq!(info.database.as_deref(), Some("test"));
        assert_eq!(info.packet_size, 8192);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind, MessageKind::Info);
    }

    #[test]
    fn test_rejected_login() {
        let mut buf = BytesMut::new();
        login_error().encode(TokenType::Error, &mut buf);
        Done::final_done().encode(TokenType::Done, &mut buf);

        let err = process_login_response(buf.freeze(), 4096).unwrap_err();
        match err {
            Error::Authentication {
                number,
                class,
                state,
                message,
            } => {
                assert_eq!(number, 18456);
                assert_eq!(class, 14);
                assert_eq!(state, 1);
                assert!(message.contains("Login failed"));
            }
            other => panic!("expected authentication error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_loginack_without_error() {
        let mut buf = BytesMut::new();
        Done::final_done().encode(TokenType::Done, &mut buf);
        let err = process_login_response(buf.freeze(), 4096).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_result_tokens_rejected_during_login() {
        let mut buf = BytesMut::new();
        login_ack().encode(&mut buf);
        ColMetaData::default().encode(&mut buf);
        let err = process_login_response(buf.freeze(), 4096).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_truncated_login_response() {
        let mut buf = BytesMut::new();
        login_ack().encode(&mut buf);
        let bytes = buf.freeze();
        let err = process_login_response(bytes.slice(..bytes.len() - 3), 4096).unwrap_err();
        assert!(matches!(err, Error::MalformedToken { .. }));
    }

    #[test]
    fn test_login7_carries_config() {
        let config = Config::new()
            .host("db.example.com")
            .credentials("sa", "pw")
            .database("test")
            .application_name("report")
            .packet_size(8192);
        let endpoint = config.endpoint().unwrap();
        let login = Login7::decode(&build_login7(&config, &endpoint).encode()).unwrap();
        assert_eq!(login.username, "sa");
        assert_eq!(login.password, "pw");
        assert_eq!(login.database, "test");
        assert_eq!(login.app_name, "report");
        assert_eq!(login.server_name, "db.example.com");
        assert_eq!(login.packet_size, 8192);
    }

    #[test]
    fn test_prelogin_advertises_no_encryption() {
        let config = Config::new().host("db\\SQLEXPRESS");
        let endpoint = config.endpoint().unwrap();
        let prelogin = PreLogin::decode(&build_prelogin(&config, &endpoint).encode()).unwrap();
        assert_eq!(prelogin.encryption, EncryptionLevel::NotSupported);
        assert_eq!(prelogin.instance.as_deref(), Some("SQLEXPRESS"));
    }

    #[test]
    fn test_env_change_applies() {
        let mut info = ServerInfo::new(4096);
        assert_eq!(
            info.apply(&EnvChange::PacketSize {
                new: 4096,
                old: 4096
            }),
            None
        );
        assert_eq!(
            info.apply(&EnvChange::PacketSize {
                new: 16384,
                old: 4096
            }),
            Some(16384)
        );
        info.apply(&EnvChange::SqlCollation {
            new: Some(Collation::LATIN1_GENERAL),
            old: None,
        });
        assert_eq!(info.collation, Some(Collation::LATIN1_GENERAL));
    }
}
