//! Nom-based IRC line parser.
//!
//! Produces borrowed slices into the input; [`super::parse`] turns them into
//! an owned [`super::Message`].

use nom::{
    bytes::complete::{take_until, take_while1},
    character::complete::{char, space0},
    combinator::opt,
    error::ErrorKind,
    sequence::preceded,
    IResult,
};
use smallvec::SmallVec;

/// Parse IRCv3 message tags (the part after `@` and before the first space).
fn parse_tags(input: &str) -> IResult<&str, &str> {
    preceded(char('@'), take_until(" "))(input)
}

/// Parse message prefix (the part after `:` and before the first space).
fn parse_prefix(input: &str) -> IResult<&str, &str> {
    preceded(char(':'), take_while1(|c| c != ' '))(input)
}

/// Parse the command name (1*letter or 3digit).
fn parse_command(input: &str) -> IResult<&str, &str> {
    let (rest, cmd) = take_while1(|c: char| c.is_ascii_alphanumeric())(input)?;

    let is_all_letters = cmd.chars().all(|c| c.is_ascii_alphabetic());
    let is_three_digits = cmd.len() == 3 && cmd.chars().all(|c| c.is_ascii_digit());

    if is_all_letters || is_three_digits {
        Ok((rest, cmd))
    } else {
        Err(nom::Err::Error(nom::error::Error::new(
            input,
            ErrorKind::AlphaNumeric,
        )))
    }
}

/// Parse parameters after the command.
///
/// Consecutive spaces collapse into one separator; a parameter starting with
/// `:` swallows the rest of the line.
fn parse_params(input: &str) -> (&str, SmallVec<[&str; 15]>) {
    let mut params: SmallVec<[&str; 15]> = SmallVec::new();
    let mut rest = input;

    while let Some(b' ') = rest.as_bytes().first().copied() {
        while rest.as_bytes().first() == Some(&b' ') {
            rest = &rest[1..];
        }

        if rest.is_empty() || rest.starts_with('\r') || rest.starts_with('\n') {
            break;
        }

        if let Some(after_colon) = rest.strip_prefix(':') {
            let end = after_colon.find(['\r', '\n']).unwrap_or(after_colon.len());
            params.push(&after_colon[..end]);
            rest = &after_colon[end..];
            break;
        }

        let end = rest.find([' ', '\r', '\n']).unwrap_or(rest.len());
        params.push(&rest[..end]);
        rest = &rest[end..];
    }

    (rest, params)
}

/// Parse a complete IRC line into its components.
///
/// ```text
/// [@tags] [:prefix] <command> [params...] [:trailing]
/// ```
pub(crate) fn parse_message(input: &str) -> IResult<&str, ParsedMessage<'_>> {
    let (input, _tags) = opt(parse_tags)(input)?;
    let (input, _) = space0(input)?;

    let (input, prefix) = opt(parse_prefix)(input)?;
    let (input, _) = space0(input)?;

    let (input, command) = parse_command(input)?;
    let (rest, params) = parse_params(input);

    Ok((
        rest,
        ParsedMessage {
            prefix,
            command,
            params,
        },
    ))
}

/// A parsed IRC line with borrowed string slices.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ParsedMessage<'a> {
    /// Raw prefix string (without the leading `:`), if present.
    pub prefix: Option<&'a str>,
    /// The command name.
    pub command: &'a str,
    /// Command parameters, including trailing.
    pub params: SmallVec<[&'a str; 15]>,
}

impl<'a> ParsedMessage<'a> {
    pub fn parse(input: &'a str) -> Result<Self, DetailedParseError> {
        match parse_message(input) {
            Ok((_remaining, msg)) => Ok(msg),
            Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(DetailedParseError {
                position: input.len() - e.input.len(),
                kind: e.code,
            }),
            Err(nom::Err::Incomplete(_)) => Err(DetailedParseError {
                position: input.len(),
                kind: ErrorKind::Eof,
            }),
        }
    }
}

/// Parse failure with the byte offset where it happened.
#[derive(Debug, Clone)]
pub(crate) struct DetailedParseError {
    pub position: usize,
    pub kind: ErrorKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_command_trailing() {
        let msg = ParsedMessage::parse(":nick!u@h PRIVMSG #chan :hello world\r\n").unwrap();
        assert_eq!(msg.prefix, Some("nick!u@h"));
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params.as_slice(), &["#chan", "hello world"]);
    }

    #[test]
    fn test_tags_are_skipped() {
        let msg = ParsedMessage::parse("@time=x;id=1 :srv 001 me :Welcome").unwrap();
        assert_eq!(msg.prefix, Some("srv"));
        assert_eq!(msg.command, "001");
        assert_eq!(msg.params.as_slice(), &["me", "Welcome"]);
    }

    #[test]
    fn test_collapsed_spaces() {
        let msg = ParsedMessage::parse("MODE  #c   +o  bob").unwrap();
        assert_eq!(msg.params.as_slice(), &["#c", "+o", "bob"]);
    }

    #[test]
    fn test_empty_trailing() {
        let msg = ParsedMessage::parse("PRIVMSG #c :").unwrap();
        assert_eq!(msg.params.as_slice(), &["#c", ""]);
    }

    #[test]
    fn test_bad_command() {
        let err = ParsedMessage::parse(":prefix 12ab foo").unwrap_err();
        assert_eq!(err.kind, ErrorKind::AlphaNumeric);
        assert_eq!(err.position, 8);
    }

    #[test]
    fn test_missing_command() {
        assert!(ParsedMessage::parse(":prefix-only").is_err());
    }
}
