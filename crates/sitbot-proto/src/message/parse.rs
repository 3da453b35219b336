//! `FromStr` for [`Message`] on top of the nom parser.

use std::str::FromStr;

use crate::command::Command;
use crate::error::{MessageParseError, ProtocolError};
use crate::prefix::Prefix;

use super::nom_parser::ParsedMessage;
use super::types::Message;

impl FromStr for Message {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Message, Self::Err> {
        let invalid = |cause| ProtocolError::InvalidMessage {
            string: s.to_owned(),
            cause,
        };

        if s.trim_end_matches(['\r', '\n']).is_empty() {
            return Err(invalid(MessageParseError::EmptyMessage));
        }

        let parsed = ParsedMessage::parse(s).map_err(|e| {
            invalid(MessageParseError::ParseContext {
                position: e.position,
                context: format!("{:?}", e.kind),
            })
        })?;

        let prefix = parsed.prefix.map(Prefix::try_from_str).transpose().map_err(invalid)?;

        Ok(Message {
            prefix,
            command: Command::from_token(parsed.command),
            params: parsed.params.iter().map(|p| (*p).to_owned()).collect(),
        })
    }
}
