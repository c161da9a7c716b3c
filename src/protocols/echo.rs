//! Echo protocol.
//!
//! Returns each request without its line ending, so the wire response is the
//! request line itself. No storage interaction.

use crate::protocols::strip_line_ending;
use crate::runtime::Protocol;

#[derive(Debug, Clone, Copy, Default)]
pub struct EchoProtocol;

impl Protocol for EchoProtocol {
    fn process(&mut self, request: &str) -> String {
        strip_line_ending(request).to_string()
    }
}
