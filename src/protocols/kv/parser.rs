//! Key/value command parser.

use crate::protocols::strip_line_ending;
use std::fmt;

/// Parsed key/value command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    Get { key: &'a str },
    Set { key: &'a str, value: &'a str },
    Delete { key: &'a str },
    FlushAll,
    Stats,
}

/// Parse errors, reported to the client in-band.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Empty line or unrecognized command name.
    UnknownCommand,
    /// Known command with the wrong number of arguments.
    BadFormat(&'static str),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::UnknownCommand => write!(f, "unknown command"),
            ParseError::BadFormat(msg) => write!(f, "bad command line format: {msg}"),
        }
    }
}

/// Parse one request line.
pub fn parse(request: &str) -> Result<Command<'_>, ParseError> {
    let line = strip_line_ending(request).trim_start();
    let (name, rest) = match line.split_once(' ') {
        Some((name, rest)) => (name, rest.trim_start()),
        None => (line, ""),
    };

    if name.eq_ignore_ascii_case("GET") {
        single_key(rest, "usage: GET <key>").map(|key| Command::Get { key })
    } else if name.eq_ignore_ascii_case("DELETE") {
        single_key(rest, "usage: DELETE <key>").map(|key| Command::Delete { key })
    } else if name.eq_ignore_ascii_case("SET") {
        match rest.split_once(' ') {
            Some((key, value)) if !key.is_empty() => Ok(Command::Set { key, value }),
            _ => Err(ParseError::BadFormat("usage: SET <key> <value>")),
        }
    } else if name.eq_ignore_ascii_case("FLUSH_ALL") {
        no_args(rest, Command::FlushAll)
    } else if name.eq_ignore_ascii_case("STATS") {
        no_args(rest, Command::Stats)
    } else {
        Err(ParseError::UnknownCommand)
    }
}

fn single_key<'a>(rest: &'a str, usage: &'static str) -> Result<&'a str, ParseError> {
    let key = rest.trim_end();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return Err(ParseError::BadFormat(usage));
    }
    Ok(key)
}

fn no_args<'a>(rest: &str, command: Command<'a>) -> Result<Command<'a>, ParseError> {
    if rest.trim().is_empty() {
        Ok(command)
    } else {
        Err(ParseError::BadFormat("command takes no arguments"))
    }
}
