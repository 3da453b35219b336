//! Bouncer - re-exposes a live Session to secondary IRC clients.
//!
//! Each accepted connection walks Handshaking → Welcome-Wait → Bridging →
//! Closed:
//!
//! 1. client frames are drained until the line goes quiet for the handshake
//!    grace period (the client's own NICK/USER are never forwarded)
//! 2. the Session must have been welcomed within the welcome timeout
//! 3. a synthetic registration banner is sent, then a JOIN per joined room
//!    to the client and a NAMES per room to the server so the client sees
//!    a fresh roster
//! 4. frames are relayed in both directions, filtered on the client side
//!
//! The Session subscription is taken before the banner, so no roster reply
//! triggered by step 3 can slip past the client.

use sitbot_proto::{Command, Message, Prefix, Response};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, error, info, trace, warn};

use crate::config::BouncerConfig;
use crate::error::BouncerError;
use crate::network::{Subscription, Transport};
use crate::session::Session;
use crate::telemetry::spans;

/// Version string advertised in the banner.
pub const VERSION: &str = concat!("sitbot-", env!("CARGO_PKG_VERSION"));
/// User modes advertised in RPL_MYINFO.
const USER_MODES: &str = "iosw";
/// Channel modes advertised in RPL_MYINFO.
const CHANNEL_MODES: &str = "biklmnopstv";
/// Channel modes taking a parameter.
const PARAM_MODES: &str = "bklov";
/// Wait before retrying a failed accept.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Where a client frame goes during bridging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// Client is leaving.
    Disconnect,
    /// Answer the client directly.
    Reply(Message),
    /// Pass through to the server.
    Forward(Message),
    /// Swallowed.
    KeepAlive,
}

/// Classify one frame from a bounced client.
pub fn filter_client(msg: Message) -> ClientFrame {
    match msg.command {
        Command::QUIT => ClientFrame::Disconnect,
        Command::PING => ClientFrame::Reply(Message::pong(msg.params)),
        Command::WHO | Command::NAMES | Command::MODE | Command::PRIVMSG | Command::KICK => {
            ClientFrame::Forward(msg)
        }
        _ => ClientFrame::KeepAlive,
    }
}

/// The registration burst sent to a client once the Session is live.
pub fn banner(server: &Prefix, nick: &str, created: &str) -> Vec<Message> {
    let host = server.name();
    let lines = [
        (
            Response::RPL_WELCOME,
            vec![nick.to_string(), format!("Welcome to the bouncer {nick}!bot@masked")],
        ),
        (
            Response::RPL_YOURHOST,
            vec![
                nick.to_string(),
                format!("Your host is {host}, running version {VERSION}"),
            ],
        ),
        (
            Response::RPL_CREATED,
            vec![nick.to_string(), format!("This server was created {created}")],
        ),
        (
            Response::RPL_MYINFO,
            vec![
                nick.to_string(),
                host.to_string(),
                VERSION.to_string(),
                USER_MODES.to_string(),
                CHANNEL_MODES.to_string(),
                PARAM_MODES.to_string(),
            ],
        ),
    ];
    lines
        .into_iter()
        .map(|(resp, params)| Message::response(resp, params).with_prefix(server.clone()))
        .collect()
}

/// A listening bouncer bound to one Session.
pub struct Bouncer {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Bouncer {
    /// Listen on `addr` and serve every accepted client against `session`.
    pub async fn bind(
        session: Arc<Session>,
        addr: &str,
        config: BouncerConfig,
    ) -> Result<Self, BouncerError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let cancel = session.cancel_token().child_token();
        let tracker = TaskTracker::new();

        info!(session = %session.id(), listen = %local_addr, "bouncer listening");
        tracker.spawn(accept_loop(
            listener,
            session,
            config,
            cancel.clone(),
            tracker.clone(),
        ));

        Ok(Self {
            local_addr,
            cancel,
            tracker,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop listening and wait for every connection handler.
    pub async fn close(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        debug!(listen = %self.local_addr, "bouncer closed");
    }
}

async fn accept_loop(
    listener: TcpListener,
    session: Arc<Session>,
    config: BouncerConfig,
    cancel: CancellationToken,
    tracker: TaskTracker,
) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, peer) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                error!(error = %e, "bouncer accept failed");
                if !accept_backoff(&cancel).await {
                    break;
                }
                continue;
            }
        };
        info!(peer = %peer, "bouncer client connected");

        let span = spans::bouncer(session.id(), Some(peer));
        let session = Arc::clone(&session);
        let config = config.clone();
        let cancel = cancel.clone();
        tracker.spawn(
            async move {
                match serve(&session, stream, &config, &cancel).await {
                    Ok(()) | Err(BouncerError::Quit) => info!("bouncer client left"),
                    Err(e) => warn!(error = %e, code = e.error_code(), "bouncer client dropped"),
                }
            }
            .instrument(span),
        );
    }
}

/// Pause after a failed accept so a persistent fault (EMFILE) cannot spin.
/// False if the bouncer was cancelled meanwhile.
async fn accept_backoff(cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(ACCEPT_BACKOFF) => true,
    }
}

/// Run one client connection to completion.
pub async fn serve<S>(
    session: &Session,
    stream: S,
    config: &BouncerConfig,
    parent: &CancellationToken,
) -> Result<(), BouncerError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let client = Transport::new(stream, config.write_interval(), parent);
    let mut inbound = client.subscribe();
    let result = bridge(session, &client, &mut inbound, config).await;
    drop(inbound);
    client.close().await;
    result
}

async fn bridge(
    session: &Session,
    client: &Transport,
    inbound: &mut Subscription,
    config: &BouncerConfig,
) -> Result<(), BouncerError> {
    // Handshaking
    loop {
        match timeout(config.handshake_grace(), inbound.recv()).await {
            Ok(Some(msg)) => trace!(frame = %msg.to_string().trim_end(), "handshake frame dropped"),
            Ok(None) => return Err(BouncerError::Closed),
            Err(_) => break,
        }
    }

    // Welcome-Wait
    let wait = config.welcome_timeout();
    timeout(wait, session.login().welcomed())
        .await
        .map_err(|_| BouncerError::WelcomeTimeout(wait))?;

    let mut upstream = session.transport().subscribe();

    let nick = session.nick();
    let server = session
        .login()
        .server_prefix()
        .unwrap_or_else(|| Prefix::ServerName("localhost".to_string()));
    let created = session
        .start_time()
        .format("%a %b %e %H:%M:%S UTC %Y")
        .to_string();
    for msg in banner(&server, &nick, &created) {
        client.send(msg).await?;
    }

    let rooms = session.state().joined_rooms();
    for room in &rooms {
        client
            .send(Message::join(room.as_str()).with_prefix(Prefix::new(nick.as_str(), "bot", "masked")))
            .await?;
        session.transport().send(Message::names(room.as_str())).await?;
    }
    debug!(rooms = rooms.len(), "client state replayed");

    // Bridging
    loop {
        tokio::select! {
            msg = inbound.recv() => {
                let Some(msg) = msg else {
                    return Err(BouncerError::Closed);
                };
                match filter_client(msg) {
                    ClientFrame::Disconnect => return Err(BouncerError::Quit),
                    ClientFrame::Reply(reply) => client.send(reply).await?,
                    ClientFrame::Forward(msg) => session.transport().send(msg).await?,
                    ClientFrame::KeepAlive => {}
                }
            }
            msg = upstream.recv() => {
                let Some(msg) = msg else {
                    return Err(BouncerError::Closed);
                };
                if msg.command != Command::PING {
                    client.send(msg).await?;
                }
            }
        }
    }
}
