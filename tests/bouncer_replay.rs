//! Bouncer integration tests.
//!
//! A bot is logged in against the fake server, then a secondary client
//! connects to its bouncer and must see a registration banner and its rooms
//! before any live traffic.

mod common;

use common::{SERVER_NAME, TestClient, TestServer, eventually, profile};
use sitbot::Session;
use sitbot::config::{BouncerConfig, SandboxConfig};
use sitbot_proto::{Command, Prefix, Response};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn bouncer_config() -> BouncerConfig {
    BouncerConfig {
        handshake_ms: 100,
        welcome_ms: 1000,
        write_interval_ms: 1,
    }
}

/// A logged-in session that has joined #b and #a, plus the server side.
async fn joined_session(server: &TestServer) -> anyhow::Result<(Arc<Session>, TestClient)> {
    let mut p = profile("b1", server);
    p.chans = vec!["#b".into(), "#a".into()];

    let root = CancellationToken::new();
    let (session, conn) = tokio::join!(
        Session::connect(p, Arc::new(SandboxConfig::default()), &root),
        server.accept_and_welcome("sitbot")
    );
    let session = session?;
    let mut conn = conn?;

    for _ in 0..2 {
        let line = conn.recv_line().await?;
        let room = line
            .strip_prefix("JOIN ")
            .ok_or_else(|| anyhow::anyhow!("expected JOIN, got {line:?}"))?;
        conn.send_raw(&format!(":sitbot!sitbot@example.org JOIN {room}"))
            .await?;
    }
    eventually(|| session.state().joined_rooms().len() == 2).await?;
    Ok((session, conn))
}

/// Connect to the bouncer and go through the handshake.
async fn bounced_client(addr: &str) -> anyhow::Result<TestClient> {
    let mut client = TestClient::connect(addr).await?;
    client.send_raw("NICK someone").await?;
    client.send_raw("USER someone 0 * :Someone").await?;
    Ok(client)
}

#[tokio::test]
async fn test_replay_order_before_live_traffic() -> anyhow::Result<()> {
    let server = TestServer::bind().await?;
    let (session, mut conn) = joined_session(&server).await?;
    let addr = session
        .attach_bouncer("127.0.0.1:0", bouncer_config())
        .await?;
    let mut client = bounced_client(&addr.to_string()).await?;

    let expected = [
        Response::RPL_WELCOME,
        Response::RPL_YOURHOST,
        Response::RPL_CREATED,
        Response::RPL_MYINFO,
    ];
    for resp in expected {
        let msg = client.recv().await?;
        assert_eq!(msg.command, Command::Response(resp));
        assert_eq!(msg.prefix.as_ref().map(Prefix::name), Some(SERVER_NAME));
        assert_eq!(msg.param(0), Some("sitbot"));
    }

    for room in ["#a", "#b"] {
        let msg = client.recv().await?;
        assert_eq!(msg.command, Command::JOIN);
        assert_eq!(msg.param(0), Some(room));
        assert_eq!(msg.prefix, Some(Prefix::new("sitbot", "bot", "masked")));
    }

    assert_eq!(conn.recv_line().await?, "NAMES #a");
    assert_eq!(conn.recv_line().await?, "NAMES #b");

    conn.send_raw(":irc.test 353 sitbot = #a :@sitbot alice").await?;
    conn.send_raw(":alice!a@example.org PRIVMSG #a :hey").await?;
    let names = client.recv().await?;
    assert_eq!(names.command, Command::Response(Response::RPL_NAMREPLY));
    let live = client.recv().await?;
    assert_eq!(live.command, Command::PRIVMSG);
    assert_eq!(live.param(1), Some("hey"));

    session.close().await;
    Ok(())
}

#[tokio::test]
async fn test_client_filtering() -> anyhow::Result<()> {
    let server = TestServer::bind().await?;
    let (session, mut conn) = joined_session(&server).await?;
    let addr = session
        .attach_bouncer("127.0.0.1:0", bouncer_config())
        .await?;
    let mut client = bounced_client(&addr.to_string()).await?;

    // banner plus two replayed joins
    for _ in 0..6 {
        client.recv().await?;
    }
    assert_eq!(conn.recv_line().await?, "NAMES #a");
    assert_eq!(conn.recv_line().await?, "NAMES #b");

    client.send_raw("JOIN #elsewhere").await?;
    client.send_raw("NICK impostor").await?;
    client.send_raw("PING :lag").await?;
    client.send_raw("PRIVMSG #a :through").await?;

    let pong = client.recv().await?;
    assert_eq!(pong.command, Command::PONG);
    assert_eq!(pong.param(0), Some("lag"));

    assert_eq!(conn.recv_line().await?, "PRIVMSG #a :through");
    conn.expect_silence(Duration::from_millis(200)).await?;

    // server keep-alives stay with the bot
    conn.send_raw("PING :irc.test").await?;
    assert_eq!(conn.recv_line().await?, "PONG irc.test");
    client.expect_silence(Duration::from_millis(200)).await?;

    client.send_raw("QUIT :bye").await?;
    client.expect_closed().await?;
    conn.expect_silence(Duration::from_millis(200)).await?;
    assert!(!session.is_closed());

    session.close().await;
    Ok(())
}

#[tokio::test]
async fn test_session_close_drops_bounced_clients() -> anyhow::Result<()> {
    let server = TestServer::bind().await?;
    let (session, _conn) = joined_session(&server).await?;
    let addr = session
        .attach_bouncer("127.0.0.1:0", bouncer_config())
        .await?;
    let mut client = bounced_client(&addr.to_string()).await?;
    client.recv().await?;

    assert_eq!(session.describe().bouncers, vec![addr]);
    session.close().await;
    client.expect_closed().await?;
    Ok(())
}
