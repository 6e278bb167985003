//! Byte-stream transports and named-instance resolution.
//!
//! A [`Connection`](crate::Connection) never opens sockets itself. It asks a
//! [`Connector`] for a [`Transport`], which is anything that can be read,
//! written and shut down. [`TcpConnector`] is the default.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UdpSocket, lookup_host};
use tokio::time::timeout;

use crate::error::{Error, Result};

/// SQL Server Browser port.
pub const BROWSER_PORT: u16 = 1434;

/// SSRP `CLNT_UCAST_INST` request type.
const CLNT_UCAST_INST: u8 = 0x04;

/// SSRP `SVR_RESP` response type.
const SVR_RESP: u8 = 0x05;

/// A connected, bidirectional byte stream.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// Boxed transport owned by a connection.
pub type BoxTransport = Box<dyn Transport>;

/// Opens transports.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `host:port`, failing with [`Error::Timeout`] after
    /// `deadline`.
    async fn connect(&self, host: &str, port: u16, deadline: Duration) -> Result<BoxTransport>;
}

/// Plain TCP connector.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, host: &str, port: u16, deadline: Duration) -> Result<BoxTransport> {
        let addr = format!("{host}:{port}");
        tracing::debug!(addr = %addr, "connecting via TCP");

        let stream = timeout(deadline, TcpStream::connect(&addr))
            .await
            .map_err(|_| Error::Timeout(deadline))??;
        stream.set_nodelay(true)?;

        Ok(Box::new(stream))
    }
}

/// Resolve a named instance to its TCP port through the SQL Server Browser.
pub async fn resolve_instance(host: &str, instance: &str, deadline: Duration) -> Result<u16> {
    let mut last_err = None;
    for addr in lookup_host((host, BROWSER_PORT)).await? {
        match query_browser(addr, instance, deadline).await {
            Ok(port) => return Ok(port),
            Err(e) => {
                tracing::debug!(addr = %addr, error = %e, "browser query failed");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| Error::Config(format!("could not resolve host {host}"))))
}

/// Ask the browser at `addr` for the TCP port of `instance`.
pub(crate) async fn query_browser(addr: SocketAddr, instance: &str, deadline: Duration) -> Result<u16> {
    let local: SocketAddr = if addr.is_ipv4() {
        SocketAddr::from(([0, 0, 0, 0], 0))
    } else {
        SocketAddr::from(([0u16; 8], 0))
    };
    let socket = UdpSocket::bind(local).await?;

    let mut request = Vec::with_capacity(instance.len() + 2);
    request.push(CLNT_UCAST_INST);
    request.extend_from_slice(instance.as_bytes());
    request.push(0);
    socket.send_to(&request, addr).await?;

    let mut buf = vec![0u8; 4096];
    let len = timeout(deadline, socket.recv(&mut buf))
        .await
        .map_err(|_| Error::Timeout(deadline))??;
    buf.truncate(len);

    let port = parse_browser_reply(&buf, instance)?;
    tracing::debug!(instance = instance, port = port, "resolved named instance");
    Ok(port)
}

/// Extract the TCP port of `instance` from an SSRP `SVR_RESP`.
///
/// The body is a `;`-separated list of key/value pairs, one group per
/// instance, with groups ending in `;;`.
pub(crate) fn parse_browser_reply(reply: &[u8], instance: &str) -> Result<u16> {
    let unresolved = || Error::Config(format!("could not resolve SQL browser instance {instance}"));

    if reply.len() < 3 || reply[0] != SVR_RESP {
        return Err(unresolved());
    }
    let body = String::from_utf8_lossy(&reply[3..]);

    for group in body.split(";;") {
        let fields: Vec<&str> = group.split(';').collect();
        let value_of = |key: &str| {
            fields
                .chunks(2)
                .find(|pair| pair[0].eq_ignore_ascii_case(key))
                .and_then(|pair| pair.get(1).copied())
        };
        let matches = value_of("InstanceName").is_some_and(|name| name.eq_ignore_ascii_case(instance));
        if matches {
            return value_of("tcp")
                .and_then(|port| port.parse().ok())
                .ok_or_else(unresolved);
        }
    }

    Err(unresolved())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn reply(body: &str) -> Vec<u8> {
        let mut out = vec![SVR_RESP];
        out.extend_from_slice(&(body.len() as u16).to_le_bytes());
        out.extend_from_slice(body.as_bytes());
        out
    }

    #[test]
    fn test_parse_browser_reply() {
        let body = "ServerName;HOST;InstanceName;SQLEXPRESS;IsClustered;No;Version;15.0.2000.5;tcp;49752;;";
        assert_eq!(parse_browser_reply(&reply(body), "sqlexpress").unwrap(), 49752);
    }

    #[test]
    fn test_parse_browser_reply_picks_instance() {
        let body = "ServerName;H;InstanceName;A;IsClustered;No;Version;15.0;tcp;1500;;\
                    ServerName;H;InstanceName;B;IsClustered;No;Version;15.0;tcp;1600;;";
        assert_eq!(parse_browser_reply(&reply(body), "B").unwrap(), 1600);
        assert!(parse_browser_reply(&reply(body), "C").is_err());
    }

    #[test]
    fn test_parse_browser_reply_without_tcp() {
        let body = "ServerName;H;InstanceName;A;IsClustered;No;np;\\\\H\\pipe\\sql;;";
        assert!(parse_browser_reply(&reply(body), "A").is_err());
        assert!(parse_browser_reply(&[], "A").is_err());
        assert!(parse_browser_reply(&[0x01, 0, 0], "A").is_err());
    }

    #[tokio::test]
    async fn test_query_browser_over_udp() {
        let browser = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = browser.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let mut buf = [0u8; 256];
            let (len, peer) = browser.recv_from(&mut buf).await.unwrap();
            assert_eq!(buf[0], CLNT_UCAST_INST);
            assert_eq!(&buf[1..len - 1], b"SQLEXPRESS");
            let body = "ServerName;H;InstanceName;SQLEXPRESS;IsClustered;No;tcp;50123;;";
            browser.send_to(&reply(body), peer).await.unwrap();
        });

        let port = query_browser(addr, "SQLEXPRESS", Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(port, 50123);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_query_browser_times_out() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = silent.local_addr().unwrap();
        let err = query_browser(addr, "X", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[tokio::test]
    async fn test_tcp_connector() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });

        TcpConnector
            .connect("127.0.0.1", port, Duration::from_secs(2))
            .await
            .unwrap();
        accept.await.unwrap();
    }
}
