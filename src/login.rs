//! Login stage.
//!
//! Sends the registration handshake, records the server prefix from
//! RPL_WELCOME and answers server PINGs through the scheduler so keep-alive
//! replies share the admission and pacing of all other output.

use parking_lot::RwLock;
use sitbot_proto::{Command, Message, Prefix, Response};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::Profile;
use crate::error::TaskError;
use crate::stage::Stage;
use crate::task::{Scheduler, TaskId};

pub struct Login {
    nick: String,
    user: String,
    pass: Option<String>,
    scheduler: Arc<Scheduler>,
    server_prefix: RwLock<Option<Prefix>>,
    welcomed: watch::Sender<bool>,
}

impl Login {
    pub fn new(profile: &Profile, scheduler: Arc<Scheduler>) -> Self {
        Self {
            nick: profile.nick.clone(),
            user: profile.user().to_string(),
            pass: profile.pass.clone().filter(|p| !p.is_empty()),
            scheduler,
            server_prefix: RwLock::new(None),
            welcomed: watch::Sender::new(false),
        }
    }

    /// Send PASS (when configured), NICK and USER.
    pub async fn run(&self) -> Result<(), TaskError> {
        if let Some(pass) = &self.pass {
            self.scheduler
                .write(TaskId::DIRECT, Message::pass(pass.as_str()))
                .await?;
        }
        self.scheduler
            .write(TaskId::DIRECT, Message::nick(self.nick.as_str()))
            .await?;
        self.scheduler
            .write(
                TaskId::DIRECT,
                Message::user(self.user.as_str(), self.nick.as_str()),
            )
            .await?;
        debug!(nick = %self.nick, "handshake sent");
        Ok(())
    }

    pub fn is_welcomed(&self) -> bool {
        *self.welcomed.borrow()
    }

    /// Resolves once the server has welcomed us.
    pub async fn welcomed(&self) {
        let mut rx = self.welcomed.subscribe();
        // The sender lives as long as self, so this only ends on welcome
        let _ = rx.wait_for(|welcomed| *welcomed).await;
    }

    /// Prefix the server used on RPL_WELCOME.
    pub fn server_prefix(&self) -> Option<Prefix> {
        self.server_prefix.read().clone()
    }

    fn on_welcome(&self, msg: &Message) {
        *self.server_prefix.write() = msg.prefix.clone();
        let first = self.welcomed.send_if_modified(|welcomed| {
            let changed = !*welcomed;
            *welcomed = true;
            changed
        });
        if first {
            info!(server = ?msg.prefix.as_ref().map(Prefix::name), "welcomed");
        }
    }

    fn on_ping(&self, msg: &Message) {
        let params = msg.params.clone();
        self.scheduler.run("ping", "PING", None, move |task| async move {
            task.write(Message::pong(params)).await
        });
    }
}

impl Stage for Login {
    fn name(&self) -> &'static str {
        "login"
    }

    fn process(&self, msg: &Message) {
        match &msg.command {
            Command::Response(Response::RPL_WELCOME) => self.on_welcome(msg),
            Command::PING => self.on_ping(msg),
            _ => {}
        }
    }
}
