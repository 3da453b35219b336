//! Fake IRC server.
//!
//! Listens on a loopback port and hands each accepted bot connection to the
//! test as a [`TestClient`], so the test plays the server role line by line.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;

use super::client::TestClient;

pub const SERVER_NAME: &str = "irc.test";

pub struct TestServer {
    listener: TcpListener,
    addr: SocketAddr,
}

impl TestServer {
    pub async fn bind() -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        Ok(Self { listener, addr })
    }

    /// `host:port` to put in a profile.
    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    pub async fn accept(&self) -> anyhow::Result<TestClient> {
        let (stream, _) = timeout(Duration::from_secs(5), self.listener.accept()).await??;
        Ok(TestClient::from_stream(stream))
    }

    /// Accept a bot, read its NICK and USER and welcome it as `nick`.
    pub async fn accept_and_welcome(&self, nick: &str) -> anyhow::Result<TestClient> {
        let mut conn = self.accept().await?;
        let first = conn.recv_line().await?;
        anyhow::ensure!(first == format!("NICK {nick}"), "expected NICK, got {first:?}");
        let second = conn.recv_line().await?;
        anyhow::ensure!(second.starts_with("USER "), "expected USER, got {second:?}");
        conn.send_raw(&format!(":{SERVER_NAME} 001 {nick} :Welcome to the test network"))
            .await?;
        Ok(conn)
    }

    /// Assert no further connection is attempted for `dur`.
    #[allow(dead_code)]
    pub async fn expect_no_connection(&self, dur: Duration) -> anyhow::Result<()> {
        match timeout(dur, self.listener.accept()).await {
            Ok(_) => anyhow::bail!("unexpected connection"),
            Err(_) => Ok(()),
        }
    }
}
