//! Ping protocol handler.

use crate::protocols::ping::parser::{parse, Command};
use crate::runtime::SharedProtocol;

/// Stateless ping responder, shared by every connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct PingProtocol;

impl SharedProtocol for PingProtocol {
    fn process(&self, request: &str) -> String {
        match parse(request) {
            Some(Command::Ping) => "PONG".to_string(),
            Some(Command::PingMsg(message)) => format!("PONG {message}"),
            None => "ERROR unknown command".to_string(),
        }
    }
}
