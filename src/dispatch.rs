//! Pattern dispatch stage.
//!
//! Addressed messages (PRIVMSG) run through the private rule set; every event,
//! rendered as `"<prefix> <COMMAND> <params>"`, runs through the broadcast
//! rule set. A match becomes a task that pipes an external command back to
//! the channel, the sender, or the bot itself.

use parking_lot::RwLock;
use sitbot_proto::{ChannelExt, Command, Message, Prefix};
use std::sync::Arc;

use crate::config::PatternRule;
use crate::error::PatternError;
use crate::pattern::PatternMatcher;
use crate::stage::Stage;
use crate::state::StateTracker;
use crate::task::Scheduler;

/// The two rule sets, always swapped together.
#[derive(Debug, Default)]
pub struct RuleSets {
    pub private: Arc<PatternMatcher>,
    pub broadcast: Arc<PatternMatcher>,
}

impl RuleSets {
    pub fn compile(private: &[PatternRule], broadcast: &[PatternRule]) -> Result<Self, PatternError> {
        Ok(Self {
            private: Arc::new(PatternMatcher::new(private)?),
            broadcast: Arc::new(PatternMatcher::new(broadcast)?),
        })
    }
}

pub struct Dispatcher {
    id: String,
    state: Arc<StateTracker>,
    rules: RwLock<Arc<RuleSets>>,
    scheduler: Arc<Scheduler>,
}

impl Dispatcher {
    /// The bot's nick is read from `state` at dispatch time, so confirmed
    /// renames are followed.
    pub fn new(id: impl Into<String>, state: Arc<StateTracker>, scheduler: Arc<Scheduler>) -> Self {
        Self {
            id: id.into(),
            state,
            rules: RwLock::new(Arc::new(RuleSets::default())),
            scheduler,
        }
    }

    /// Compile and install both rule sets. On failure the active sets stay.
    pub fn update(&self, private: &[PatternRule], broadcast: &[PatternRule]) -> Result<(), PatternError> {
        self.install(RuleSets::compile(private, broadcast)?);
        Ok(())
    }

    pub fn install(&self, rules: RuleSets) {
        *self.rules.write() = Arc::new(rules);
    }

    /// The currently active rule sets.
    pub fn rules(&self) -> Arc<RuleSets> {
        Arc::clone(&self.rules.read())
    }

    fn env(&self, nick: &str) -> Vec<(String, String)> {
        vec![
            ("SITBOT_ID".to_string(), self.id.clone()),
            ("SITBOT_NICK".to_string(), nick.to_string()),
        ]
    }

    /// Schedule tasks for every rule set `msg` may match.
    pub fn dispatch(&self, msg: &Message) {
        let rules = self.rules();

        if msg.command == Command::PRIVMSG && !rules.private.is_empty() {
            self.dispatch_private(msg, Arc::clone(&rules.private));
        }
        if !rules.broadcast.is_empty() {
            self.dispatch_broadcast(msg, Arc::clone(&rules.broadcast));
        }
    }

    fn dispatch_private(&self, msg: &Message, patterns: Arc<PatternMatcher>) {
        let (Some(sender), Some(chan), Some(text)) =
            (msg.prefix.as_ref().map(Prefix::name), msg.param(0), msg.param(1))
        else {
            return;
        };
        let sender = sender.to_string();
        let reply_to = if chan.is_channel_name() {
            chan.to_string()
        } else {
            sender.clone()
        };

        let mut env = self.env(&self.state.nick());
        env.push(("SITBOT_FROM".to_string(), sender.clone()));
        env.push(("SITBOT_CHAN".to_string(), chan.to_string()));
        env.push(("SITBOT_MSG".to_string(), text.to_string()));

        self.scheduler.run(text, text, Some(patterns), move |task| async move {
            let command = task.command().replace("%s", &sender);
            task.pipe_command(&command, &reply_to, &env).await
        });
    }

    fn dispatch_broadcast(&self, msg: &Message, patterns: Arc<PatternMatcher>) {
        let text = msg.to_event_text();
        let nick = self.state.nick();
        let mut env = self.env(&nick);
        if let Some(sender) = msg.prefix.as_ref().map(Prefix::name) {
            env.push(("SITBOT_FROM".to_string(), sender.to_string()));
        }
        if let Some(chan) = msg.param(0).filter(|p| p.is_channel_name()) {
            env.push(("SITBOT_CHAN".to_string(), chan.to_string()));
        }

        self.scheduler
            .run(text.clone(), text, Some(patterns), move |task| async move {
                task.pipe_command(&task.command(), &nick, &env).await
            });
    }
}

impl Stage for Dispatcher {
    fn name(&self) -> &'static str {
        "dispatch"
    }

    fn process(&self, msg: &Message) {
        self.dispatch(msg);
    }
}
