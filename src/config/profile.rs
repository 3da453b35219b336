//! Per-bot profiles.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::defaults::{default_login_timeout_secs, default_rate_ms};

/// One (match, template) rewrite rule.
///
/// The template may reference capture groups as `$1`, `$name` or `${name}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PatternRule {
    #[serde(rename = "match")]
    pub pattern: String,
    pub template: String,
}

impl PatternRule {
    pub fn new(pattern: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            template: template.into(),
        }
    }
}

/// Declarative description of one bot session.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Profile {
    /// The way to reference this bot.
    pub id: String,
    /// `irc://host:port` or `host:port`.
    pub server: String,
    /// Optional `socks5://host:port` forward proxy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    pub nick: String,
    /// Defaults to the nick.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass: Option<String>,
    #[serde(default)]
    pub chans: Vec<String>,
    /// Minimum interval between two frames written to the server.
    #[serde(default = "default_rate_ms")]
    pub rate_ms: u64,
    /// Minimum interval between two task admissions.
    #[serde(default = "default_rate_ms")]
    pub task_rate_ms: u64,
    #[serde(default = "default_login_timeout_secs")]
    pub login_timeout_secs: u64,
    /// Listen address for a bouncer attached at startup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bouncer: Option<String>,
    /// Rules applied to addressed messages (PRIVMSG text).
    #[serde(default)]
    pub patterns: Vec<PatternRule>,
    /// Rules applied to every event rendered as `"<prefix> <COMMAND> <params>"`.
    #[serde(default)]
    pub patterns_raw: Vec<PatternRule>,
}

impl Profile {
    /// Minimal profile with defaults for everything optional.
    pub fn new(id: impl Into<String>, server: impl Into<String>, nick: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            server: server.into(),
            proxy: None,
            nick: nick.into(),
            user: None,
            pass: None,
            chans: Vec::new(),
            rate_ms: default_rate_ms(),
            task_rate_ms: default_rate_ms(),
            login_timeout_secs: default_login_timeout_secs(),
            bouncer: None,
            patterns: Vec::new(),
            patterns_raw: Vec::new(),
        }
    }

    /// Parse a JSON profile, as posted through the administrative requests.
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn user(&self) -> &str {
        self.user.as_deref().filter(|u| !u.is_empty()).unwrap_or(&self.nick)
    }

    pub fn write_interval(&self) -> Duration {
        Duration::from_millis(self.rate_ms)
    }

    pub fn admission_interval(&self) -> Duration {
        Duration::from_millis(self.task_rate_ms)
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }
}
