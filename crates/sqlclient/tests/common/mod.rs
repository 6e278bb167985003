//! Helpers shared by the integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::time::Duration;

use async_trait::async_trait;
use sqlclient::{BoxTransport, Config, Connection, Connector, Result, TcpConnector};
use sqlclient_testing::MockTdsServer;

/// Routes every connection to a loopback port, whatever host was asked for.
pub struct Loopback(pub u16);

#[async_trait]
impl Connector for Loopback {
    async fn connect(&self, host: &str, _port: u16, deadline: Duration) -> Result<BoxTransport> {
        tracing::debug!(host = host, port = self.0, "routing to loopback");
        TcpConnector.connect("127.0.0.1", self.0, deadline).await
    }
}

/// Config pointing at a made-up host with the scenario credentials.
pub fn config() -> Config {
    Config::new()
        .host("db.example.com")
        .credentials("sa", "pw")
        .database("test")
}

/// Logged-in connection to `server`.
pub async fn connect(server: &MockTdsServer, config: Config) -> Connection {
    let mut conn = Connection::with_connector(config, Loopback(server.port())).unwrap();
    conn.connect().await.unwrap();
    conn
}

/// Install a test subscriber once; repeated calls are ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
