//! Ping protocol implementation.
//!
//! A minimal protocol for health checks and latency measurement:
//! - Client sends: `PING` or `PING <message>`
//! - Server responds: `PONG` or `PONG <message>`
//!
//! Measures pure network + runtime overhead without storage operations,
//! which makes it the baseline for comparing the two strategies.
//!
//! ## Protocol Format
//!
//! ```text
//! Request:  PING\n
//! Response: PONG\n
//!
//! Request:  PING hello\n
//! Response: PONG hello\n
//! ```

pub mod handler;
pub mod parser;

pub use handler::PingProtocol;
