//! The processing step shared by both strategies.
//!
//! Turns one received chunk into one framed response: decode, hand to the
//! adapter, append the response plus a single `\n`.

use crate::runtime::Protocol;
use bytes::BytesMut;
use std::borrow::Cow;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use tracing::trace;

/// Byte terminating every response.
pub const RESPONSE_TERMINATOR: u8 = b'\n';

/// Why a chunk produced no response.
#[derive(Debug)]
pub enum ProcessError {
    /// The adapter panicked; the message is the panic payload if it was a string.
    Panicked(String),
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessError::Panicked(msg) => write!(f, "protocol handler panicked: {msg}"),
        }
    }
}

impl std::error::Error for ProcessError {}

/// Process one received chunk, appending the framed response to `out`.
///
/// Invalid UTF-8 is replaced rather than rejected. On error nothing is
/// appended and the caller is expected to close the session.
pub fn process_request<P: Protocol>(
    protocol: &mut P,
    input: &[u8],
    out: &mut BytesMut,
) -> Result<(), ProcessError> {
    let request: Cow<'_, str> = String::from_utf8_lossy(input);
    trace!(len = input.len(), request = %request.escape_debug(), "Processing request");

    let response = panic::catch_unwind(AssertUnwindSafe(|| protocol.process(&request)))
        .map_err(|payload| {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            ProcessError::Panicked(msg)
        })?;

    out.reserve(response.len() + 1);
    out.extend_from_slice(response.as_bytes());
    out.extend_from_slice(&[RESPONSE_TERMINATOR]);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    impl Protocol for Upper {
        fn process(&mut self, request: &str) -> String {
            request.trim_end().to_uppercase()
        }
    }

    struct Silent;

    impl Protocol for Silent {
        fn process(&mut self, _request: &str) -> String {
            String::new()
        }
    }

    struct Exploding;

    impl Protocol for Exploding {
        fn process(&mut self, _request: &str) -> String {
            panic!("boom")
        }
    }

    #[test]
    fn test_response_is_newline_terminated() {
        let mut out = BytesMut::new();
        process_request(&mut Upper, b"ping\n", &mut out).unwrap();
        assert_eq!(&out[..], b"PING\n");
    }

    #[test]
    fn test_empty_response_is_bare_newline() {
        let mut out = BytesMut::new();
        process_request(&mut Silent, b"anything", &mut out).unwrap();
        assert_eq!(&out[..], b"\n");
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut out = BytesMut::new();
        process_request(&mut Upper, b"a\xffb", &mut out).unwrap();
        assert_eq!(&out[..], "A\u{fffd}B\n".as_bytes());
    }

    #[test]
    fn test_responses_append_in_order() {
        let mut out = BytesMut::new();
        process_request(&mut Upper, b"one", &mut out).unwrap();
        process_request(&mut Upper, b"two", &mut out).unwrap();
        assert_eq!(&out[..], b"ONE\nTWO\n");
    }

    #[test]
    fn test_panic_is_contained() {
        let mut out = BytesMut::new();
        let err = process_request(&mut Exploding, b"x", &mut out).unwrap_err();
        assert!(matches!(err, ProcessError::Panicked(ref msg) if msg == "boom"));
        assert!(out.is_empty());
    }
}
