//! Administrative requests.
//!
//! Typed, transport-agnostic operations over a [`Gang`]. Request bodies are
//! JSON (or plain text for [`Admin::post_lines`]); failures map onto
//! [`AdminError::NotFound`] and [`AdminError::BadRequest`] and never touch
//! running Sessions.

use serde::Deserialize;
use sitbot_proto::{Command, Message, Prefix};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::Profile;
use crate::error::AdminError;
use crate::gang::Gang;
use crate::session::Session;
use crate::task::TaskId;

/// Body of a message post.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageRequest {
    #[serde(default)]
    pub task_id: u64,
    pub command: String,
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default)]
    pub prefix: Option<String>,
}

pub struct Admin {
    gang: Arc<Gang>,
}

impl Admin {
    pub fn new(gang: Arc<Gang>) -> Self {
        Self { gang }
    }

    pub fn gang(&self) -> &Arc<Gang> {
        &self.gang
    }

    fn session(&self, id: &str) -> Result<Arc<Session>, AdminError> {
        self.gang
            .lookup(id)
            .ok_or_else(|| AdminError::NotFound(format!("bot {id}")))
    }

    /// Create or update a Session from a JSON profile. Returns its id.
    pub async fn post_profile(&self, body: &[u8]) -> Result<String, AdminError> {
        let profile = Profile::from_json(body)?;
        if profile.id.is_empty() {
            return Err(AdminError::BadRequest("profile has no id".into()));
        }
        if profile.nick.is_empty() || profile.server.is_empty() {
            return Err(AdminError::BadRequest(format!(
                "profile {} needs a nick and a server",
                profile.id
            )));
        }
        let session = self.gang.post(profile).await?;
        Ok(session.id().to_string())
    }

    pub async fn delete(&self, id: &str) -> Result<(), AdminError> {
        if self.gang.delete(id).await {
            Ok(())
        } else {
            Err(AdminError::NotFound(format!("bot {id}")))
        }
    }

    pub async fn attach_bouncer(&self, id: &str, addr: &str) -> Result<SocketAddr, AdminError> {
        match self.gang.attach_bouncer(id, addr).await {
            Some(bound) => Ok(bound?),
            None => Err(AdminError::NotFound(format!("bot {id}"))),
        }
    }

    /// Write a frame through a task, or kill the task on a bare `KILL`.
    pub async fn post_message(&self, id: &str, body: &[u8]) -> Result<(), AdminError> {
        let req: MessageRequest = serde_json::from_slice(body)?;
        if req.command.is_empty() {
            return Err(AdminError::BadRequest("empty command".into()));
        }
        check_params(&req.params)?;
        let session = self.session(id)?;
        let tid = TaskId(req.task_id);
        let command = Command::from_token(&req.command);

        if command == Command::KILL && req.params.is_empty() {
            session.kill(tid).await?;
            return Ok(());
        }

        let mut msg = Message::new(command, req.params);
        if let Some(prefix) = req.prefix.filter(|p| !p.is_empty()) {
            let prefix =
                Prefix::try_from_str(&prefix).map_err(|e| AdminError::BadRequest(e.to_string()))?;
            msg = msg.with_prefix(prefix);
        }
        debug!(bot = %id, tid = %tid, frame = %msg.to_string().trim_end(), "posted message");
        session.write(tid, msg).await?;
        Ok(())
    }

    /// Send each line of `body` to `target` as a PRIVMSG outside any task.
    /// Returns the number of lines sent.
    pub async fn post_lines(&self, id: &str, target: &str, body: &str) -> Result<usize, AdminError> {
        if target.is_empty() {
            return Err(AdminError::BadRequest("no target".into()));
        }
        let session = self.session(id)?;
        let mut sent = 0;
        for line in body.lines().filter(|l| !l.is_empty()) {
            session.write(TaskId::DIRECT, Message::privmsg(target, line)).await?;
            sent += 1;
        }
        info!(bot = %id, to = %target, lines = sent, "posted lines");
        Ok(sent)
    }

    /// JSON snapshot of a Session.
    pub fn describe(&self, id: &str) -> Result<serde_json::Value, AdminError> {
        let session = self.session(id)?;
        Ok(serde_json::to_value(session.describe())?)
    }

    /// Ids of every Session.
    pub fn list(&self) -> Vec<String> {
        self.gang.ids()
    }
}

/// Params must survive serialization unchanged: no line breaks anywhere, and
/// only the last may be empty, hold spaces or start with ':'.
fn check_params(params: &[String]) -> Result<(), AdminError> {
    if let Some(bad) = params.iter().find(|p| p.contains(['\r', '\n', '\0'])) {
        return Err(AdminError::BadRequest(format!("param {bad:?} has a line break")));
    }
    let middle = params.len().saturating_sub(1);
    if let Some(bad) = params[..middle]
        .iter()
        .find(|p| p.is_empty() || p.contains(' ') || p.starts_with(':'))
    {
        return Err(AdminError::BadRequest(format!(
            "only the last param may be empty, contain spaces or start with ':', got {bad:?}"
        )));
    }
    Ok(())
}
