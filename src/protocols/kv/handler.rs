//! Key/value protocol handler.

use crate::protocols::kv::parser::{parse, Command, ParseError};
use crate::runtime::Protocol;
use crate::storage::{Storage, StorageResult};
use std::sync::Arc;
use tracing::trace;

/// Per-connection handle onto the shared store.
#[derive(Debug, Clone)]
pub struct KvProtocol {
    storage: Arc<Storage>,
}

impl KvProtocol {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

impl Protocol for KvProtocol {
    fn process(&mut self, request: &str) -> String {
        let command = match parse(request) {
            Ok(command) => command,
            Err(ParseError::UnknownCommand) => return "ERROR unknown command".to_string(),
            Err(e) => return format!("CLIENT_ERROR {e}"),
        };
        trace!(?command, "Executing command");

        match command {
            Command::Get { key } => self
                .storage
                .get(key)
                .unwrap_or_else(|| "NOT_FOUND".to_string()),
            Command::Set { key, value } => match self.storage.set(key, value) {
                StorageResult::Stored => "STORED".to_string(),
                _ => "NOT_STORED".to_string(),
            },
            Command::Delete { key } => match self.storage.delete(key) {
                StorageResult::Deleted => "DELETED".to_string(),
                _ => "NOT_FOUND".to_string(),
            },
            Command::FlushAll => {
                self.storage.flush_all();
                "OK".to_string()
            }
            Command::Stats => format!("items {}", self.storage.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_delete() {
        let mut kv = KvProtocol::new(Storage::new());
        assert_eq!(kv.process("GET a\n"), "NOT_FOUND");
        assert_eq!(kv.process("SET a hello world\n"), "STORED");
        assert_eq!(kv.process("GET a\n"), "hello world");
        assert_eq!(kv.process("DELETE a\n"), "DELETED");
        assert_eq!(kv.process("DELETE a\n"), "NOT_FOUND");
    }

    #[test]
    fn test_sessions_share_storage() {
        let storage = Storage::new();
        let mut a = KvProtocol::new(Arc::clone(&storage));
        let mut b = KvProtocol::new(Arc::clone(&storage));

        assert_eq!(a.process("SET k v\n"), "STORED");
        assert_eq!(b.process("GET k\n"), "v");
        assert_eq!(b.process("STATS\n"), "items 1");
        assert_eq!(a.process("FLUSH_ALL\n"), "OK");
        assert_eq!(b.process("STATS\n"), "items 0");
    }

    #[test]
    fn test_errors_are_in_band() {
        let mut kv = KvProtocol::new(Storage::new());
        assert_eq!(kv.process("BOGUS\n"), "ERROR unknown command");
        assert_eq!(kv.process(""), "ERROR unknown command");
        assert!(kv.process("GET\n").starts_with("CLIENT_ERROR "));
    }
}
