//! Built-in protocol adapters.
//!
//! Each adapter turns one request string into one response string; the
//! runtime adds the trailing newline.
//!
//! - `kv`: key/value commands against shared in-memory storage
//! - `ping`: PING/PONG for health checks and latency measurement
//! - `echo`: returns the request, for throughput and framing tests

pub mod echo;
pub mod kv;
pub mod ping;

pub use echo::EchoProtocol;
pub use kv::KvProtocol;
pub use ping::PingProtocol;

/// Strip a single trailing `\n` or `\r\n`.
pub fn strip_line_ending(request: &str) -> &str {
    let line = request.strip_suffix('\n').unwrap_or(request);
    line.strip_suffix('\r').unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_line_ending() {
        assert_eq!(strip_line_ending("PING\r\n"), "PING");
        assert_eq!(strip_line_ending("PING\n"), "PING");
        assert_eq!(strip_line_ending("PING"), "PING");
        assert_eq!(strip_line_ending("a\n\n"), "a\n");
        assert_eq!(strip_line_ending(""), "");
    }
}
