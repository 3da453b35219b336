//! IRC command tokens.
//!
//! [`Command`] is a closed set of the commands the session engine reasons
//! about. Everything else is preserved verbatim in [`Command::Raw`] so that
//! relaying and rendering never lose information.

use std::fmt;

use crate::response::Response;

/// An IRC command token.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[allow(clippy::upper_case_acronyms)]
pub enum Command {
    /// `PASS <password>`
    PASS,
    /// `NICK <nickname>`
    NICK,
    /// `USER <user> <mode> <unused> <realname>`
    USER,
    /// `JOIN <channels>`
    JOIN,
    /// `PART <channels> [<reason>]`
    PART,
    /// `KICK <channel> <user> [<reason>]`
    KICK,
    /// `QUIT [<reason>]`
    QUIT,
    /// `PRIVMSG <target> <text>`
    PRIVMSG,
    /// `NOTICE <target> <text>`
    NOTICE,
    /// `PING <token>`
    PING,
    /// `PONG <token>`
    PONG,
    /// `NAMES [<channels>]`
    NAMES,
    /// `WHO <mask>`
    WHO,
    /// `MODE <target> [<modes>]`
    MODE,
    /// `KILL <nick> <reason>`; also the task kill control message.
    KILL,
    /// `TOPIC <channel> [<topic>]`
    TOPIC,
    /// A known numeric reply.
    Response(Response),
    /// Any other command or numeric, kept as sent.
    Raw(String),
}

impl Command {
    /// Resolve a command token. Known names are matched case-insensitively.
    pub fn from_token(token: &str) -> Command {
        if token.len() == 3 && token.bytes().all(|b| b.is_ascii_digit()) {
            if let Some(resp) = token.parse().ok().and_then(Response::from_code) {
                return Command::Response(resp);
            }
            return Command::Raw(token.to_owned());
        }
        match token.to_ascii_uppercase().as_str() {
            "PASS" => Command::PASS,
            "NICK" => Command::NICK,
            "USER" => Command::USER,
            "JOIN" => Command::JOIN,
            "PART" => Command::PART,
            "KICK" => Command::KICK,
            "QUIT" => Command::QUIT,
            "PRIVMSG" => Command::PRIVMSG,
            "NOTICE" => Command::NOTICE,
            "PING" => Command::PING,
            "PONG" => Command::PONG,
            "NAMES" => Command::NAMES,
            "WHO" => Command::WHO,
            "MODE" => Command::MODE,
            "KILL" => Command::KILL,
            "TOPIC" => Command::TOPIC,
            _ => Command::Raw(token.to_owned()),
        }
    }

    /// The wire token for this command.
    pub fn as_str(&self) -> std::borrow::Cow<'_, str> {
        use std::borrow::Cow;
        Cow::Borrowed(match self {
            Command::PASS => "PASS",
            Command::NICK => "NICK",
            Command::USER => "USER",
            Command::JOIN => "JOIN",
            Command::PART => "PART",
            Command::KICK => "KICK",
            Command::QUIT => "QUIT",
            Command::PRIVMSG => "PRIVMSG",
            Command::NOTICE => "NOTICE",
            Command::PING => "PING",
            Command::PONG => "PONG",
            Command::NAMES => "NAMES",
            Command::WHO => "WHO",
            Command::MODE => "MODE",
            Command::KILL => "KILL",
            Command::TOPIC => "TOPIC",
            Command::Response(resp) => return Cow::Owned(resp.to_string()),
            Command::Raw(token) => token,
        })
    }

    /// Whether the last parameter is always written in trailing form.
    pub(crate) fn is_freeform(&self, nparams: usize) -> bool {
        match self {
            Command::PRIVMSG | Command::NOTICE => true,
            Command::Response(_) => nparams > 1,
            _ => false,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}
