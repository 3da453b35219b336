//! IRC message codec for tokio.
//!
//! Encodes and decodes [`Message`] types using the tokio codec framework.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::error;
use crate::line::LineCodec;
use crate::message::Message;

/// Tokio codec for encoding/decoding IRC messages.
///
/// Wraps [`LineCodec`] and parses lines into [`Message`] types. Blank lines
/// are skipped on decode.
#[derive(Default)]
pub struct IrcCodec {
    inner: LineCodec,
}

impl IrcCodec {
    /// Create a new codec with the default line limit.
    pub fn new() -> Self {
        Self {
            inner: LineCodec::new(),
        }
    }

    /// Create a new codec with custom max line length.
    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            inner: LineCodec::with_max_len(max_len),
        }
    }

    /// Sanitize outgoing message data.
    ///
    /// Truncates at the first line ending so a parameter can never smuggle
    /// a second command onto the wire, then restores the CRLF terminator.
    pub fn sanitize(mut data: String) -> String {
        if let Some(pos) = data.find(['\r', '\n']) {
            data.truncate(pos);
        }
        data.push_str("\r\n");
        data
    }

    fn parse_line(line: String) -> error::Result<Option<Message>> {
        if line.trim_end_matches(['\r', '\n']).is_empty() {
            return Ok(None);
        }
        line.parse::<Message>().map(Some)
    }
}

impl Decoder for IrcCodec {
    type Item = Message;
    type Error = error::ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> error::Result<Option<Message>> {
        while let Some(line) = self.inner.decode(src)? {
            if let Some(msg) = Self::parse_line(line)? {
                return Ok(Some(msg));
            }
        }
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> error::Result<Option<Message>> {
        while let Some(line) = self.inner.decode_eof(src)? {
            if let Some(msg) = Self::parse_line(line)? {
                return Ok(Some(msg));
            }
        }
        Ok(None)
    }
}

impl Encoder<Message> for IrcCodec {
    type Error = error::ProtocolError;

    fn encode(&mut self, msg: Message, dst: &mut BytesMut) -> error::Result<()> {
        let sanitized = Self::sanitize(msg.to_string());
        self.inner.encode(sanitized, dst)
    }
}
