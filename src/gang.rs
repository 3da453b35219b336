//! Gang - registry of live Sessions keyed by profile id.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{BouncerConfig, Profile, SandboxConfig};
use crate::error::{BouncerError, SessionError};
use crate::session::Session;

pub struct Gang {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    sandbox: Arc<SandboxConfig>,
    bouncer: BouncerConfig,
    cancel: CancellationToken,
}

impl Gang {
    pub fn new(sandbox: SandboxConfig, bouncer: BouncerConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            sandbox: Arc::new(sandbox),
            bouncer,
            cancel: CancellationToken::new(),
        }
    }

    /// Update the rules of the Session named by `profile.id`, or start a new
    /// Session when there is none.
    pub async fn post(&self, profile: Profile) -> Result<Arc<Session>, SessionError> {
        if let Some(session) = self.lookup(&profile.id) {
            session.update(&profile)?;
            return Ok(session);
        }

        let bouncer = profile.bouncer.clone();
        let session = Session::connect(profile, Arc::clone(&self.sandbox), &self.cancel).await?;
        let replaced = self
            .sessions
            .write()
            .insert(session.id().to_string(), Arc::clone(&session));
        if let Some(old) = replaced {
            // Lost a race with a concurrent post for the same id
            old.close().await;
        }
        info!(id = %session.id(), "session started");

        if let Some(addr) = bouncer
            && let Err(e) = session.attach_bouncer(&addr, self.bouncer.clone()).await
        {
            warn!(id = %session.id(), listen = %addr, error = %e, "bouncer not started");
        }
        Ok(session)
    }

    /// Close and forget a Session. Returns false for an unknown id.
    pub async fn delete(&self, id: &str) -> bool {
        let Some(session) = self.sessions.write().remove(id) else {
            return false;
        };
        session.close().await;
        info!(id = %id, "session deleted");
        true
    }

    pub fn lookup(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    /// Ids of all Sessions, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start a bouncer on `addr` for Session `id`.
    pub async fn attach_bouncer(
        &self,
        id: &str,
        addr: &str,
    ) -> Option<Result<SocketAddr, BouncerError>> {
        let session = self.lookup(id)?;
        Some(session.attach_bouncer(addr, self.bouncer.clone()).await)
    }

    /// Close every Session.
    pub async fn close(&self) {
        self.cancel.cancel();
        let sessions: Vec<Arc<Session>> = self.sessions.write().drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.close().await;
        }
    }
}
