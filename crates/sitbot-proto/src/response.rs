//! IRC numeric replies the session engine reacts to or synthesizes.
//!
//! # Reference
//! - RFC 2812 Section 5: Replies

#![allow(non_camel_case_types)]

use std::fmt;

/// IRC server response code.
///
/// Only the numerics the bot and the bouncer interpret are named here;
/// every other numeric parses as [`crate::Command::Raw`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
#[non_exhaustive]
pub enum Response {
    /// 001 - Welcome to the IRC network
    RPL_WELCOME = 1,
    /// 002 - Your host is running version
    RPL_YOURHOST = 2,
    /// 003 - Server creation date
    RPL_CREATED = 3,
    /// 004 - Server info (name, version, user modes, channel modes)
    RPL_MYINFO = 4,
    /// 005 - Server supported features (ISUPPORT)
    RPL_ISUPPORT = 5,
    /// 331 - No topic is set
    RPL_NOTOPIC = 331,
    /// 332 - Channel topic
    RPL_TOPIC = 332,
    /// 353 - Names reply
    RPL_NAMREPLY = 353,
    /// 366 - End of names
    RPL_ENDOFNAMES = 366,
    /// 376 - End of MOTD
    RPL_ENDOFMOTD = 376,
    /// 433 - Nickname is already in use
    ERR_NICKNAMEINUSE = 433,
}

impl Response {
    /// Numeric code of this response.
    #[inline]
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Look up a response by numeric code.
    pub fn from_code(code: u16) -> Option<Response> {
        use Response::*;
        Some(match code {
            1 => RPL_WELCOME,
            2 => RPL_YOURHOST,
            3 => RPL_CREATED,
            4 => RPL_MYINFO,
            5 => RPL_ISUPPORT,
            331 => RPL_NOTOPIC,
            332 => RPL_TOPIC,
            353 => RPL_NAMREPLY,
            366 => RPL_ENDOFNAMES,
            376 => RPL_ENDOFMOTD,
            433 => ERR_NICKNAMEINUSE,
            _ => return None,
        })
    }

    /// Whether this is an error reply (400-599).
    pub fn is_error(self) -> bool {
        (400..600).contains(&self.code())
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}", self.code())
    }
}
