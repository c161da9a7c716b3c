//! Ping protocol parser.

use crate::protocols::strip_line_ending;

/// Parsed ping command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    /// Simple ping (no message).
    Ping,
    /// Ping with a message to echo back.
    PingMsg(&'a str),
}

/// Parse a ping request. Returns `None` for anything that is not a ping.
pub fn parse(request: &str) -> Option<Command<'_>> {
    let line = strip_line_ending(request);

    // Parse command (case-insensitive)
    if line.eq_ignore_ascii_case("PING") {
        Some(Command::Ping)
    } else if line.len() > 5 && line.is_char_boundary(5) && line[..5].eq_ignore_ascii_case("PING ")
    {
        Some(Command::PingMsg(&line[5..]))
    } else {
        None
    }
}
