//! End-to-end session tests against a fake server.
//!
//! Covers registration, initial joins, pattern dispatch, task write-back,
//! kill and the login timeout.

mod common;

use common::{TestServer, eventually, profile, rule};
use sitbot::Session;
use sitbot::config::SandboxConfig;
use sitbot::error::{SessionError, TaskError};
use sitbot::task::TaskId;
use sitbot_proto::Message;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn sandbox() -> Arc<SandboxConfig> {
    Arc::new(SandboxConfig {
        program: None,
        grace_ms: 100,
    })
}

#[tokio::test]
async fn test_login_join_and_hello() -> anyhow::Result<()> {
    let server = TestServer::bind().await?;
    let mut p = profile("b1", &server);
    p.chans = vec!["#x".into()];
    p.patterns = vec![rule("^hello$", "echo hi")];

    let root = CancellationToken::new();
    let (session, conn) = tokio::join!(
        Session::connect(p, sandbox(), &root),
        server.accept_and_welcome("sitbot")
    );
    let session = session?;
    let mut conn = conn?;
    assert!(session.login().is_welcomed());

    assert_eq!(conn.recv_line().await?, "JOIN #x");

    conn.send_raw(":alice!a@example.org PRIVMSG #x :hello").await?;
    assert_eq!(conn.recv_line().await?, "PRIVMSG #x :hi");

    session.close().await;
    conn.expect_closed().await?;
    Ok(())
}

#[tokio::test]
async fn test_server_ping_is_answered() -> anyhow::Result<()> {
    let server = TestServer::bind().await?;
    let root = CancellationToken::new();
    let (session, conn) = tokio::join!(
        Session::connect(profile("b1", &server), sandbox(), &root),
        server.accept_and_welcome("sitbot")
    );
    let session = session?;
    let mut conn = conn?;

    conn.send_raw("PING :irc.test").await?;
    assert_eq!(conn.recv_line().await?, "PONG irc.test");

    session.close().await;
    Ok(())
}

#[tokio::test]
async fn test_silent_command_is_deregistered() -> anyhow::Result<()> {
    let server = TestServer::bind().await?;
    let mut p = profile("b1", &server);
    p.patterns = vec![rule("^quiet$", "true")];

    let root = CancellationToken::new();
    let (session, conn) = tokio::join!(
        Session::connect(p, sandbox(), &root),
        server.accept_and_welcome("sitbot")
    );
    let session = session?;
    let mut conn = conn?;

    conn.send_raw(":alice!a@example.org PRIVMSG #x :quiet").await?;
    conn.expect_silence(Duration::from_millis(300)).await?;
    eventually(|| session.tasks().is_empty()).await?;

    session.close().await;
    Ok(())
}

#[tokio::test]
async fn test_write_back_and_kill() -> anyhow::Result<()> {
    let server = TestServer::bind().await?;
    let mut p = profile("b1", &server);
    p.patterns = vec![rule("^wait$", "sleep 5")];

    let root = CancellationToken::new();
    let (session, conn) = tokio::join!(
        Session::connect(p, sandbox(), &root),
        server.accept_and_welcome("sitbot")
    );
    let session = session?;
    let mut conn = conn?;

    conn.send_raw(":alice!a@example.org PRIVMSG #x :wait").await?;
    eventually(|| {
        session
            .tasks()
            .first()
            .is_some_and(|t| t.command == "sleep 5")
    })
    .await?;
    let task = session.tasks().remove(0);
    assert_eq!(task.name, "wait");

    session
        .write(task.id, Message::privmsg("#x", "still working"))
        .await?;
    assert_eq!(conn.recv_line().await?, "PRIVMSG #x :still working");

    session.kill(task.id).await?;
    assert!(session.tasks().is_empty());

    assert!(matches!(
        session.kill(task.id).await,
        Err(TaskError::NotFound(_))
    ));
    assert!(matches!(
        session.write(TaskId(999), Message::privmsg("#x", "nope")).await,
        Err(TaskError::NotFound(_))
    ));

    session.write(TaskId::DIRECT, Message::privmsg("#x", "direct")).await?;
    assert_eq!(conn.recv_line().await?, "PRIVMSG #x :direct");

    session.close().await;
    Ok(())
}

#[tokio::test]
async fn test_rule_update_applies_without_reconnect() -> anyhow::Result<()> {
    let server = TestServer::bind().await?;
    let mut p = profile("b1", &server);
    p.patterns = vec![rule("^ping$", "echo old")];

    let root = CancellationToken::new();
    let (session, conn) = tokio::join!(
        Session::connect(p.clone(), sandbox(), &root),
        server.accept_and_welcome("sitbot")
    );
    let session = session?;
    let mut conn = conn?;

    p.patterns = vec![rule("^ping$", "echo new")];
    session.update(&p)?;

    conn.send_raw(":alice!a@example.org PRIVMSG #x :ping").await?;
    assert_eq!(conn.recv_line().await?, "PRIVMSG #x :new");

    p.patterns = vec![rule("(", "broken")];
    assert!(matches!(session.update(&p), Err(SessionError::Pattern(_))));
    assert_eq!(session.profile().patterns[0].template, "echo new");

    session.close().await;
    Ok(())
}

#[tokio::test]
async fn test_login_timeout() -> anyhow::Result<()> {
    let server = TestServer::bind().await?;
    let mut p = profile("b1", &server);
    p.login_timeout_secs = 1;

    let root = CancellationToken::new();
    let (session, conn) = tokio::join!(Session::connect(p, sandbox(), &root), server.accept());
    let _conn = conn?;
    assert!(matches!(session, Err(SessionError::LoginTimeout(_))));
    Ok(())
}
