//! Session - one bot identity on one server.
//!
//! Wires a Transport to the Scheduler and to the three inbound stages (login,
//! state, dispatch), each on its own subscription, then drives registration
//! and the initial joins. Bouncers attached to a Session live under its
//! cancellation scope.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use sitbot_proto::Message;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, Span, info, warn};

use crate::bouncer::Bouncer;
use crate::config::{BouncerConfig, Profile, SandboxConfig};
use crate::dispatch::{Dispatcher, RuleSets};
use crate::error::{BouncerError, SessionError, TaskError};
use crate::login::Login;
use crate::network::Transport;
use crate::stage;
use crate::state::{Room, StateTracker};
use crate::task::{Scheduler, TaskId, TaskInfo};
use crate::telemetry::spans;

pub struct Session {
    id: String,
    profile: RwLock<Profile>,
    start: DateTime<Utc>,
    transport: Transport,
    scheduler: Arc<Scheduler>,
    login: Arc<Login>,
    dispatcher: Arc<Dispatcher>,
    state: Arc<StateTracker>,
    bouncers: Mutex<Vec<Arc<Bouncer>>>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    span: Span,
}

/// Point-in-time view of a Session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub nick: String,
    pub server: String,
    pub start: DateTime<Utc>,
    pub tx_frames: u64,
    pub rx_frames: u64,
    pub tasks: Vec<TaskInfo>,
    pub rooms: Vec<Room>,
    pub bouncers: Vec<SocketAddr>,
}

impl Session {
    /// Dial the profile's server, log in and join its channels.
    pub async fn connect(
        profile: Profile,
        sandbox: Arc<SandboxConfig>,
        parent: &CancellationToken,
    ) -> Result<Arc<Self>, SessionError> {
        // Reject bad rules before touching the network
        let rules = RuleSets::compile(&profile.patterns, &profile.patterns_raw)?;
        let cancel = parent.child_token();
        let span = spans::session(&profile.id, &profile.nick);
        let transport = Transport::connect(
            &profile.server,
            profile.proxy.as_deref(),
            profile.write_interval(),
            &cancel,
        )
        .instrument(span.clone())
        .await?;
        Self::start(profile, rules, transport, sandbox, cancel, span).await
    }

    /// Run a Session over an already established stream.
    pub async fn over<S>(
        profile: Profile,
        stream: S,
        sandbox: Arc<SandboxConfig>,
        parent: &CancellationToken,
    ) -> Result<Arc<Self>, SessionError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let rules = RuleSets::compile(&profile.patterns, &profile.patterns_raw)?;
        let cancel = parent.child_token();
        let span = spans::session(&profile.id, &profile.nick);
        let transport = Transport::new(stream, profile.write_interval(), &cancel);
        Self::start(profile, rules, transport, sandbox, cancel, span).await
    }

    async fn start(
        profile: Profile,
        rules: RuleSets,
        transport: Transport,
        sandbox: Arc<SandboxConfig>,
        cancel: CancellationToken,
        span: Span,
    ) -> Result<Arc<Self>, SessionError> {
        let scheduler = Scheduler::new(
            transport.clone(),
            profile.admission_interval(),
            sandbox,
            &cancel,
        );
        let login = Arc::new(Login::new(&profile, Arc::clone(&scheduler)));
        let state = Arc::new(StateTracker::new(profile.nick.as_str()));
        let dispatcher = Arc::new(Dispatcher::new(
            profile.id.as_str(),
            Arc::clone(&state),
            Arc::clone(&scheduler),
        ));
        dispatcher.install(rules);

        let tracker = TaskTracker::new();
        {
            let _enter = span.enter();
            stage::spawn(&tracker, Arc::clone(&login), transport.subscribe());
            stage::spawn(&tracker, Arc::clone(&state), transport.subscribe());
            stage::spawn(&tracker, Arc::clone(&dispatcher), transport.subscribe());
        }

        let session = Arc::new(Self {
            id: profile.id.clone(),
            profile: RwLock::new(profile),
            start: Utc::now(),
            transport,
            scheduler,
            login,
            dispatcher,
            state,
            bouncers: Mutex::new(Vec::new()),
            cancel,
            tracker,
            span: span.clone(),
        });

        if let Err(e) = session.register().instrument(span).await {
            warn!(id = %session.id, error = %e, code = e.error_code(), "session start failed");
            session.close().await;
            return Err(e);
        }
        Ok(session)
    }

    async fn register(&self) -> Result<(), SessionError> {
        let (chans, timeout) = {
            let profile = self.profile.read();
            (profile.chans.clone(), profile.login_timeout())
        };

        self.login.run().await?;
        tokio::select! {
            _ = self.login.welcomed() => {}
            _ = self.transport.closed() => return Err(SessionError::Closed),
            _ = tokio::time::sleep(timeout) => return Err(SessionError::LoginTimeout(timeout)),
        }
        info!(chans = chans.len(), "logged in");

        for chan in chans {
            self.scheduler.run("JOIN", "JOIN", None, move |task| async move {
                task.write(Message::join(chan)).await
            });
        }
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current nick as tracked from the server.
    pub fn nick(&self) -> String {
        self.state.nick()
    }

    pub fn profile(&self) -> Profile {
        self.profile.read().clone()
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn login(&self) -> &Login {
        &self.login
    }

    pub fn state(&self) -> &StateTracker {
        &self.state
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Write a frame on behalf of task `id` ([`TaskId::DIRECT`] for none).
    pub async fn write(&self, id: TaskId, msg: Message) -> Result<(), TaskError> {
        self.scheduler.write(id, msg).await
    }

    pub async fn kill(&self, id: TaskId) -> Result<(), TaskError> {
        self.scheduler.kill(id).await
    }

    pub fn tasks(&self) -> Vec<TaskInfo> {
        self.scheduler.tasks()
    }

    /// Swap in the rule sets of `profile`. Connection settings are not
    /// touched; on a bad rule nothing changes.
    pub fn update(&self, profile: &Profile) -> Result<(), SessionError> {
        self.dispatcher
            .update(&profile.patterns, &profile.patterns_raw)?;
        let mut current = self.profile.write();
        current.patterns = profile.patterns.clone();
        current.patterns_raw = profile.patterns_raw.clone();
        info!(
            parent: &self.span,
            private = profile.patterns.len(),
            broadcast = profile.patterns_raw.len(),
            "rules updated"
        );
        Ok(())
    }

    /// Start a bouncer for this Session on `addr`.
    pub async fn attach_bouncer(
        self: &Arc<Self>,
        addr: &str,
        config: BouncerConfig,
    ) -> Result<SocketAddr, BouncerError> {
        let bouncer = Bouncer::bind(Arc::clone(self), addr, config).await?;
        let local = bouncer.local_addr();
        self.bouncers.lock().push(Arc::new(bouncer));
        Ok(local)
    }

    pub fn describe(&self) -> SessionInfo {
        let server = self.profile.read().server.clone();
        SessionInfo {
            id: self.id.clone(),
            nick: self.nick(),
            server,
            start: self.start,
            tx_frames: self.transport.tx_frames(),
            rx_frames: self.transport.rx_frames(),
            tasks: self.tasks(),
            rooms: self.state.rooms(),
            bouncers: self.bouncers.lock().iter().map(|b| b.local_addr()).collect(),
        }
    }

    /// Resolves once the server connection is gone.
    pub async fn closed(&self) {
        self.transport.closed().await;
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    /// Tear everything down and wait for all work to finish.
    pub async fn close(&self) {
        self.cancel.cancel();
        let bouncers: Vec<Arc<Bouncer>> = self.bouncers.lock().drain(..).collect();
        for bouncer in bouncers {
            bouncer.close().await;
        }
        self.scheduler.close().await;
        self.transport.close().await;
        self.tracker.close();
        self.tracker.wait().await;
        info!(parent: &self.span, "session closed");
    }
}
