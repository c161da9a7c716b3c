//! Connection session state machine.
//!
//! A session owns one accepted stream and its adapter instance and runs the
//! `Reading -> Processing -> Writing -> Reading` cycle until the peer goes
//! away. It is written against plain `Read + Write`, so the same code drives
//! non-blocking mio sockets (reactive strategy) and blocking std sockets
//! (threaded strategy); the caller decides what to do when I/O would block.
//!
//! `Processing` is not a stored state: it runs synchronously between a
//! completed read and the first write attempt.

use crate::runtime::request::{process_request, ProcessError};
use crate::runtime::Protocol;
use bytes::{Buf, BytesMut};
use slab::Slab;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use tracing::{debug, error};

/// Current state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the next request chunk.
    Reading,
    /// Writing a response.
    Writing {
        /// Bytes already written.
        written: usize,
        /// Total bytes to write.
        total: usize,
    },
    /// Terminal.
    Closed,
}

/// What the caller should do after [`Session::advance`].
#[derive(Debug)]
pub enum Progress {
    /// A full request/response cycle finished; the session is reading again.
    Ready,
    /// Reading would block (or timed out); wait for readability.
    WouldRead,
    /// Writing would block; wait for writability.
    WouldWrite,
    /// The session is finished and must be discarded.
    Closed(CloseReason),
}

/// Why a session ended.
#[derive(Debug)]
pub enum CloseReason {
    /// The peer closed its side.
    Eof,
    /// Transport error on read or write.
    Io(io::Error),
    /// The adapter failed while processing a request.
    Protocol(ProcessError),
    /// The server is stopping.
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Eof => write!(f, "closed by peer"),
            CloseReason::Io(e) => write!(f, "I/O error: {e}"),
            CloseReason::Protocol(e) => write!(f, "{e}"),
            CloseReason::Shutdown => write!(f, "server shutdown"),
        }
    }
}

/// Outcome of trying to flush the pending response.
enum Flush {
    Done,
    Blocked,
}

/// One accepted connection for its entire lifetime.
pub struct Session<S, P> {
    stream: S,
    protocol: P,
    state: SessionState,
    /// Unwritten tail of the current response.
    pending: BytesMut,
    /// Requests answered so far.
    requests: u64,
}

impl<S: Read + Write, P: Protocol> Session<S, P> {
    /// Create a new session in the initial reading state.
    pub fn new(stream: S, protocol: P) -> Self {
        Self {
            stream,
            protocol,
            state: SessionState::Reading,
            pending: BytesMut::new(),
            requests: 0,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_reading(&self) -> bool {
        self.state == SessionState::Reading
    }

    pub fn requests(&self) -> u64 {
        self.requests
    }

    #[cfg(test)]
    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Mark the session closed. The stream is released when the session drops.
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
        self.pending.clear();
    }

    /// Perform the next step of the cycle.
    ///
    /// `buf` is the session's fixed-size receive buffer; a read never asks
    /// for more than `buf.len()` bytes, so longer requests reach the adapter
    /// as several consecutive chunks.
    pub fn advance(&mut self, buf: &mut [u8]) -> Progress {
        match self.state {
            SessionState::Reading => self.read_and_respond(buf),
            SessionState::Writing { .. } => self.resume_write(),
            SessionState::Closed => Progress::Closed(CloseReason::Shutdown),
        }
    }

    fn read_and_respond(&mut self, buf: &mut [u8]) -> Progress {
        let n = loop {
            match self.stream.read(buf) {
                Ok(0) => return self.fail(CloseReason::Eof),
                Ok(n) => break n,
                Err(ref e) if is_would_block(e) => return Progress::WouldRead,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return self.fail(CloseReason::Io(e)),
            }
        };

        if let Err(e) = process_request(&mut self.protocol, &buf[..n], &mut self.pending) {
            return self.fail(CloseReason::Protocol(e));
        }

        self.state = SessionState::Writing {
            written: 0,
            total: self.pending.len(),
        };
        self.resume_write()
    }

    fn resume_write(&mut self) -> Progress {
        match self.flush() {
            Ok(Flush::Done) => {
                self.requests += 1;
                self.state = SessionState::Reading;
                Progress::Ready
            }
            Ok(Flush::Blocked) => Progress::WouldWrite,
            Err(e) => self.fail(CloseReason::Io(e)),
        }
    }

    /// Write until the pending response is gone or the stream would block.
    fn flush(&mut self) -> io::Result<Flush> {
        while !self.pending.is_empty() {
            match self.stream.write(&self.pending) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
                }
                Ok(n) => {
                    self.pending.advance(n);
                    if let SessionState::Writing { written, total } = self.state {
                        self.state = SessionState::Writing {
                            written: written + n,
                            total,
                        };
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Flush::Blocked),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(Flush::Done)
    }

    fn fail(&mut self, reason: CloseReason) -> Progress {
        self.close();
        Progress::Closed(reason)
    }
}

/// Read timeouts surface as `WouldBlock` on Unix and `TimedOut` on Windows.
fn is_would_block(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Log the end of a session at a level matching its cause.
pub fn log_close(conn_id: usize, peer: SocketAddr, requests: u64, reason: &CloseReason) {
    match reason {
        CloseReason::Protocol(e) => {
            error!(conn_id, peer = %peer, requests, error = %e, "Session aborted");
        }
        CloseReason::Io(e) => {
            debug!(conn_id, peer = %peer, requests, error = %e, "Connection error");
        }
        CloseReason::Eof | CloseReason::Shutdown => {
            debug!(conn_id, peer = %peer, requests, reason = %reason, "Connection closed");
        }
    }
}

/// Ownership table of live sessions keyed by connection id.
///
/// Provides O(1) insert, lookup, and remove operations.
pub struct ConnectionRegistry<T> {
    connections: Slab<T>,
    max_connections: usize,
}

impl<T> ConnectionRegistry<T> {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections),
            max_connections,
        }
    }

    /// Insert a new connection into the registry.
    ///
    /// Hands the connection back if the registry is at capacity.
    pub fn insert(&mut self, conn: T) -> Result<usize, T> {
        if self.is_full() {
            return Err(conn);
        }
        Ok(self.connections.insert(conn))
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut T> {
        self.connections.get_mut(id)
    }

    /// Remove a connection from the registry.
    pub fn remove(&mut self, id: usize) -> Option<T> {
        self.connections.try_remove(id)
    }

    /// Number of active connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.connections.len() >= self.max_connections
    }

    /// Iterate over all connections.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.connections.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Scripted stream: each read returns the next chunk (split to fit the
    /// caller's buffer), each write follows the next step of the write plan.
    #[derive(Default)]
    struct MockStream {
        reads: VecDeque<io::Result<Vec<u8>>>,
        writes: VecDeque<WriteStep>,
        written: Vec<u8>,
    }

    enum WriteStep {
        Accept(usize),
        Block,
        Fail(io::ErrorKind),
    }

    impl MockStream {
        fn with_reads(chunks: &[&[u8]]) -> Self {
            Self {
                reads: chunks.iter().map(|c| Ok(c.to_vec())).collect(),
                ..Default::default()
            }
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.reads.pop_front() {
                None => Err(io::ErrorKind::WouldBlock.into()),
                Some(Err(e)) => Err(e),
                Some(Ok(chunk)) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        self.reads.push_front(Ok(chunk[n..].to_vec()));
                    }
                    Ok(n)
                }
            }
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = match self.writes.pop_front() {
                None => buf.len(),
                Some(WriteStep::Accept(n)) => n.min(buf.len()),
                Some(WriteStep::Block) => return Err(io::ErrorKind::WouldBlock.into()),
                Some(WriteStep::Fail(kind)) => return Err(kind.into()),
            };
            self.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Answers PING with PONG and echoes anything else in brackets.
    #[derive(Default)]
    struct Recorder {
        seen: Vec<String>,
    }

    impl Protocol for Recorder {
        fn process(&mut self, request: &str) -> String {
            self.seen.push(request.to_string());
            match request.trim_end() {
                "PING" => "PONG".to_string(),
                other => format!("[{other}]"),
            }
        }
    }

    fn session(stream: MockStream) -> Session<MockStream, Recorder> {
        Session::new(stream, Recorder::default())
    }

    #[test]
    fn test_ping_pong_cycle() {
        let mut s = session(MockStream::with_reads(&[b"PING\n"]));
        let mut buf = [0u8; 64];

        assert!(matches!(s.advance(&mut buf), Progress::Ready));
        assert_eq!(s.stream().written, b"PONG\n");
        assert_eq!(s.state(), SessionState::Reading);
        assert_eq!(s.requests(), 1);

        assert!(matches!(s.advance(&mut buf), Progress::WouldRead));
        assert!(s.is_reading());
    }

    #[test]
    fn test_immediate_eof_never_processes() {
        let mut s = session(MockStream::with_reads(&[b""]));
        let mut buf = [0u8; 64];

        assert!(matches!(
            s.advance(&mut buf),
            Progress::Closed(CloseReason::Eof)
        ));
        assert_eq!(s.state(), SessionState::Closed);
        assert!(s.protocol.seen.is_empty());
        assert!(s.stream().written.is_empty());
    }

    #[test]
    fn test_partial_writes_resume_without_loss() {
        let mut stream = MockStream::with_reads(&[b"hello"]);
        stream.writes = VecDeque::from(vec![
            WriteStep::Accept(2),
            WriteStep::Block,
            WriteStep::Accept(1),
            WriteStep::Block,
        ]);
        let mut s = session(stream);
        let mut buf = [0u8; 64];

        assert!(matches!(s.advance(&mut buf), Progress::WouldWrite));
        assert_eq!(
            s.state(),
            SessionState::Writing {
                written: 2,
                total: 8
            }
        );

        assert!(matches!(s.advance(&mut buf), Progress::WouldWrite));
        assert_eq!(
            s.state(),
            SessionState::Writing {
                written: 3,
                total: 8
            }
        );

        assert!(matches!(s.advance(&mut buf), Progress::Ready));
        assert_eq!(s.stream().written, b"[hello]\n");
        assert_eq!(s.protocol.seen.len(), 1);
    }

    #[test]
    fn test_write_error_closes_session() {
        let mut stream = MockStream::with_reads(&[b"PING\n"]);
        stream.writes = VecDeque::from(vec![WriteStep::Fail(io::ErrorKind::BrokenPipe)]);
        let mut s = session(stream);
        let mut buf = [0u8; 64];

        match s.advance(&mut buf) {
            Progress::Closed(CloseReason::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(s.state(), SessionState::Closed);
    }

    #[test]
    fn test_read_error_closes_session() {
        let mut stream = MockStream::default();
        stream
            .reads
            .push_back(Err(io::ErrorKind::ConnectionReset.into()));
        let mut s = session(stream);
        let mut buf = [0u8; 64];

        assert!(matches!(
            s.advance(&mut buf),
            Progress::Closed(CloseReason::Io(_))
        ));
    }

    #[test]
    fn test_oversized_request_is_split_at_buffer_size() {
        let mut s = session(MockStream::with_reads(&[b"abcdefghij"]));
        let mut buf = [0u8; 4];

        assert!(matches!(s.advance(&mut buf), Progress::Ready));
        assert!(matches!(s.advance(&mut buf), Progress::Ready));
        assert!(matches!(s.advance(&mut buf), Progress::Ready));
        assert!(matches!(s.advance(&mut buf), Progress::WouldRead));

        assert_eq!(s.protocol.seen, vec!["abcd", "efgh", "ij"]);
        assert_eq!(s.stream().written, b"[abcd]\n[efgh]\n[ij]\n");
    }

    #[test]
    fn test_requests_answered_in_order() {
        let mut s = session(MockStream::with_reads(&[b"one", b"two", b"three"]));
        let mut buf = [0u8; 64];

        while let Progress::Ready = s.advance(&mut buf) {}
        assert_eq!(s.stream().written, b"[one]\n[two]\n[three]\n");
        assert_eq!(s.requests(), 3);
    }

    #[test]
    fn test_adapter_panic_closes_only_this_session() {
        struct Faulty;
        impl Protocol for Faulty {
            fn process(&mut self, _request: &str) -> String {
                panic!("handler bug")
            }
        }

        let mut s = Session::new(MockStream::with_reads(&[b"x"]), Faulty);
        let mut buf = [0u8; 8];
        assert!(matches!(
            s.advance(&mut buf),
            Progress::Closed(CloseReason::Protocol(_))
        ));
        assert!(s.stream().written.is_empty());
    }

    #[test]
    fn test_connection_registry() {
        let mut registry = ConnectionRegistry::new(2);

        let id1 = registry.insert("a").unwrap();
        let id2 = registry.insert("b").unwrap();

        // At capacity
        assert!(registry.is_full());
        assert_eq!(registry.insert("c"), Err("c"));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get_mut(id2), Some(&mut "b"));

        assert_eq!(registry.remove(id1), Some("a"));
        assert_eq!(registry.remove(id1), None);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.iter().map(|(id, _)| id).collect::<Vec<_>>(), vec![id2]);
    }
}
