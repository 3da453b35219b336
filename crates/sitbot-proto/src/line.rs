//! Line-based codec for tokio.
//!
//! Reads newline-terminated lines and writes pre-framed strings. A final line
//! without a terminator is still delivered when the stream ends.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::error;

/// Line-based codec that handles newline-terminated messages.
///
/// Lines are limited to [`crate::MAX_IRC_LINE_LEN`] bytes by default. Invalid
/// UTF-8 is replaced rather than rejected; servers relay arbitrary bytes from
/// other users and one bad byte must not tear the session down.
pub struct LineCodec {
    /// Index of next byte to check for newline
    next_index: usize,
    /// Maximum line length
    max_len: usize,
}

impl LineCodec {
    /// Create a new codec with the default line limit.
    pub fn new() -> Self {
        Self::with_max_len(crate::MAX_IRC_LINE_LEN)
    }

    /// Create a new codec with custom max line length.
    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            next_index: 0,
            max_len,
        }
    }

    fn check_len(&self, len: usize) -> error::Result<()> {
        if len > self.max_len {
            return Err(error::ProtocolError::MessageTooLong {
                actual: len,
                limit: self.max_len,
            });
        }
        Ok(())
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = error::ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> error::Result<Option<String>> {
        if let Some(offset) = src[self.next_index..].iter().position(|b| *b == b'\n') {
            let line = src.split_to(self.next_index + offset + 1);
            self.next_index = 0;
            self.check_len(line.len())?;
            Ok(Some(String::from_utf8_lossy(&line).into_owned()))
        } else {
            self.next_index = src.len();
            self.check_len(src.len())?;
            Ok(None)
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> error::Result<Option<String>> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if src.is_empty() {
            return Ok(None);
        }
        let line = src.split_to(src.len());
        self.next_index = 0;
        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }
}

impl Encoder<String> for LineCodec {
    type Error = error::ProtocolError;

    fn encode(&mut self, msg: String, dst: &mut BytesMut) -> error::Result<()> {
        dst.extend_from_slice(msg.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_complete_line() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from("PING :test\r\n");

        let result = codec.decode(&mut buf).unwrap();
        assert_eq!(result, Some("PING :test\r\n".to_string()));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_partial_line() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from("PING :");

        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"x\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("PING :x\r\n".into()));
    }

    #[test]
    fn test_decode_eof_unterminated() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from("PING :a\r\nPING :b");

        assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some("PING :a\r\n".into()));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some("PING :b".into()));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_decode_too_long() {
        let mut codec = LineCodec::with_max_len(10);
        let mut buf = BytesMut::from("this is way too long\n");

        let result = codec.decode(&mut buf);
        assert!(matches!(
            result,
            Err(error::ProtocolError::MessageTooLong { .. })
        ));
    }

    #[test]
    fn test_decode_lossy_utf8() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"PRIVMSG #c :\xff\r\n"[..]);
        let line = codec.decode(&mut buf).unwrap().unwrap();
        assert!(line.starts_with("PRIVMSG #c :"));
    }

    #[test]
    fn test_encode() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();

        codec.encode("PONG :test\r\n".to_string(), &mut buf).unwrap();
        assert_eq!(&buf[..], b"PONG :test\r\n");
    }
}
