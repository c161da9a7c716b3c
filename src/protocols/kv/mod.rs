//! Key/value protocol implementation.
//!
//! A line-oriented text protocol in the spirit of memcached, one command
//! per request:
//!
//! ```text
//! SET <key> <value...>  ->  STORED
//! GET <key>             ->  <value> | NOT_FOUND
//! DELETE <key>          ->  DELETED | NOT_FOUND
//! FLUSH_ALL             ->  OK
//! STATS                 ->  items <count>
//! ```
//!
//! Command names are case-insensitive. The value of `SET` is the rest of
//! the line and may contain spaces. Errors are reported in-band as
//! `CLIENT_ERROR <reason>` or `ERROR unknown command`.

pub mod handler;
pub mod parser;

pub use handler::KvProtocol;
