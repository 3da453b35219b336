use std::fmt::{self, Write as _};

use crate::chan::ChannelExt;
use crate::command::Command;
use crate::prefix::Prefix;
use crate::response::Response;

/// An owned IRC message.
///
/// Contains an optional prefix/source, the command and its parameters. The
/// last parameter may contain spaces.
///
/// # Example
///
/// ```
/// use sitbot_proto::{Command, Message};
///
/// let msg: Message = ":nick!user@host PRIVMSG #channel :Hello!".parse().unwrap();
/// assert_eq!(msg.command, Command::PRIVMSG);
///
/// let msg = Message::privmsg("#channel", "Hello!");
/// assert_eq!(msg.to_string(), "PRIVMSG #channel :Hello!\r\n");
/// ```
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Message {
    /// Message prefix/source (e.g., `nick!user@host`).
    pub prefix: Option<Prefix>,
    /// The IRC command.
    pub command: Command,
    /// Command parameters in order.
    pub params: Vec<String>,
}

impl Message {
    /// Create a message without a prefix.
    pub fn new<I, S>(command: Command, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Message {
            prefix: None,
            command,
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    /// Attach a prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: Prefix) -> Self {
        self.prefix = Some(prefix);
        self
    }

    /// Parameter at `index`, if present.
    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    /// Get the nickname from the message prefix, if present.
    pub fn source_nickname(&self) -> Option<&str> {
        self.prefix.as_ref().and_then(Prefix::nick)
    }

    /// Get the appropriate target for a response.
    ///
    /// For channel messages, returns the channel name.
    /// For private messages, returns the sender's nickname.
    pub fn response_target(&self) -> Option<&str> {
        match (&self.command, self.param(0)) {
            (Command::PRIVMSG | Command::NOTICE, Some(target)) if target.is_channel_name() => {
                Some(target)
            }
            _ => self.source_nickname(),
        }
    }

    /// Whether this message carries the given numeric.
    pub fn is_response(&self, resp: Response) -> bool {
        self.command == Command::Response(resp)
    }

    /// Render as `"<prefix> <COMMAND> <params...>"` without any framing.
    ///
    /// Used as the match subject for broadcast pattern rules.
    pub fn to_event_text(&self) -> String {
        let mut out = String::new();
        if let Some(prefix) = &self.prefix {
            let _ = write!(out, "{prefix} ");
        }
        out.push_str(&self.command.as_str());
        out.push(' ');
        out.push_str(&self.params.join(" "));
        out
    }

    /// Create a PRIVMSG message to a target with text
    #[must_use]
    pub fn privmsg<T, M>(target: T, text: M) -> Self
    where
        T: Into<String>,
        M: Into<String>,
    {
        Message::new(Command::PRIVMSG, [target.into(), text.into()])
    }

    /// Create a JOIN message for a channel
    #[must_use]
    pub fn join<C: Into<String>>(channel: C) -> Self {
        Message::new(Command::JOIN, [channel.into()])
    }

    /// Create a NAMES request for a channel
    #[must_use]
    pub fn names<C: Into<String>>(channel: C) -> Self {
        Message::new(Command::NAMES, [channel.into()])
    }

    /// Create a PASS message
    #[must_use]
    pub fn pass<P: Into<String>>(password: P) -> Self {
        Message::new(Command::PASS, [password.into()])
    }

    /// Create a NICK message to change nickname
    #[must_use]
    pub fn nick<N: Into<String>>(nickname: N) -> Self {
        Message::new(Command::NICK, [nickname.into()])
    }

    /// Create a USER registration message.
    ///
    /// Produces `USER <user> <nick> localhost <nick>`.
    #[must_use]
    pub fn user<U, N>(username: U, nickname: N) -> Self
    where
        U: Into<String>,
        N: Into<String>,
    {
        let nick = nickname.into();
        Message::new(
            Command::USER,
            [username.into(), nick.clone(), "localhost".into(), nick],
        )
    }

    /// Create a PING message
    #[must_use]
    pub fn ping<S: Into<String>>(token: S) -> Self {
        Message::new(Command::PING, [token.into()])
    }

    /// Create a PONG echoing the given PING parameters
    #[must_use]
    pub fn pong<I, S>(params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Message::new(Command::PONG, params)
    }

    /// Create a numeric reply
    #[must_use]
    pub fn response<I, S>(resp: Response, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Message::new(Command::Response(resp), params)
    }
}

impl From<Command> for Message {
    fn from(command: Command) -> Self {
        Message {
            prefix: None,
            command,
            params: Vec::new(),
        }
    }
}

fn needs_colon_prefix(s: &str) -> bool {
    s.is_empty() || s.contains(' ') || s.starts_with(':')
}

impl fmt::Display for Message {
    /// Wire form, CRLF terminated.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(prefix) = &self.prefix {
            write!(f, ":{prefix} ")?;
        }
        f.write_str(&self.command.as_str())?;
        if let Some((last, middle)) = self.params.split_last() {
            for param in middle {
                write!(f, " {param}")?;
            }
            f.write_char(' ')?;
            if self.command.is_freeform(self.params.len()) || needs_colon_prefix(last) {
                f.write_char(':')?;
            }
            f.write_str(last)?;
        }
        f.write_str("\r\n")
    }
}
