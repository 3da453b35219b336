//! Line-oriented test peer.
//!
//! Wraps one TCP connection and lets a test send raw lines and assert on
//! parsed frames. Used both for the fake server's side of a bot connection
//! and for clients connecting to a bouncer.

use sitbot_proto::Message;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;

pub struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
}

impl TestClient {
    pub async fn connect(address: &str) -> anyhow::Result<Self> {
        Ok(Self::from_stream(TcpStream::connect(address).await?))
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
        }
    }

    /// Send a raw line; CRLF is appended when missing.
    pub async fn send_raw(&mut self, line: &str) -> anyhow::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        if !line.ends_with("\r\n") {
            self.writer.write_all(b"\r\n").await?;
        }
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn recv(&mut self) -> anyhow::Result<Message> {
        self.recv_timeout(Duration::from_secs(5)).await
    }

    pub async fn recv_timeout(&mut self, dur: Duration) -> anyhow::Result<Message> {
        let line = self.recv_line_timeout(dur).await?;
        line.parse::<Message>()
            .map_err(|e| anyhow::anyhow!("Parse error on {line:?}: {e}"))
    }

    /// Next line without its terminator.
    pub async fn recv_line(&mut self) -> anyhow::Result<String> {
        self.recv_line_timeout(Duration::from_secs(5)).await
    }

    pub async fn recv_line_timeout(&mut self, dur: Duration) -> anyhow::Result<String> {
        let mut line = String::new();
        let n = timeout(dur, self.reader.read_line(&mut line)).await??;
        if n == 0 {
            anyhow::bail!("connection closed");
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Receive frames until `predicate` matches, returning all of them.
    #[allow(dead_code)]
    pub async fn recv_until<F>(&mut self, mut predicate: F) -> anyhow::Result<Vec<Message>>
    where
        F: FnMut(&Message) -> bool,
    {
        let mut messages = Vec::new();
        loop {
            let msg = self.recv().await?;
            let done = predicate(&msg);
            messages.push(msg);
            if done {
                break;
            }
        }
        Ok(messages)
    }

    /// Assert nothing arrives for `dur`.
    #[allow(dead_code)]
    pub async fn expect_silence(&mut self, dur: Duration) -> anyhow::Result<()> {
        match self.recv_line_timeout(dur).await {
            Ok(line) => anyhow::bail!("unexpected line {line:?}"),
            Err(e) if e.downcast_ref::<tokio::time::error::Elapsed>().is_some() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Wait until the peer closes the connection.
    #[allow(dead_code)]
    pub async fn expect_closed(&mut self) -> anyhow::Result<()> {
        loop {
            let mut line = String::new();
            let n = timeout(Duration::from_secs(5), self.reader.read_line(&mut line)).await??;
            if n == 0 {
                return Ok(());
            }
        }
    }
}
