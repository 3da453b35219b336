//! # sitbot-proto
//!
//! IRC message model and tokio codec for the sitbot session engine.
//!
//! ## Features
//!
//! - Owned [`Message`] with optional [`Prefix`], a closed [`Command`] set and
//!   an ordered parameter list
//! - nom-based parsing via [`std::str::FromStr`]
//! - Wire encoding via [`std::fmt::Display`] (`[:prefix ]COMMAND params [:trailing]\r\n`)
//! - Optional Tokio line and message codecs
//!
//! ## Quick Start
//!
//! ```rust
//! use sitbot_proto::{Command, Message};
//!
//! let msg: Message = ":alice!a@host PRIVMSG #x :hello there".parse().unwrap();
//! assert_eq!(msg.command, Command::PRIVMSG);
//! assert_eq!(msg.source_nickname(), Some("alice"));
//! assert_eq!(msg.param(1), Some("hello there"));
//!
//! let reply = Message::privmsg("#x", "hi");
//! assert_eq!(reply.to_string(), "PRIVMSG #x :hi\r\n");
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod chan;
pub mod command;
pub mod error;
#[cfg(feature = "tokio")]
pub mod irc;
#[cfg(feature = "tokio")]
pub mod line;
pub mod message;
pub mod prefix;
pub mod response;

pub use self::chan::ChannelExt;
pub use self::command::Command;
pub use self::error::{MessageParseError, ProtocolError};
#[cfg(feature = "tokio")]
pub use self::irc::IrcCodec;
#[cfg(feature = "tokio")]
pub use self::line::LineCodec;
pub use self::message::Message;
pub use self::prefix::Prefix;
pub use self::response::Response;

/// Maximum accepted length of one inbound line, terminator included.
///
/// Leaves room for IRCv3 tags on top of the classic 512 byte body.
pub const MAX_IRC_LINE_LEN: usize = 8191;
