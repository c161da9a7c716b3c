//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready, then we
//! perform non-blocking read/write syscalls. Sessions live in a
//! `ConnectionRegistry` keyed by their mio token; the loop is the only owner,
//! so a session is gone the moment it is removed from the table.
//!
//! mio readiness is edge-triggered: after an event a session is advanced
//! until it would block, otherwise buffered requests could sit unnoticed.

use crate::runtime::session::{log_close, CloseReason, ConnectionRegistry, Progress, Session};
use crate::runtime::{
    BufferPool, Protocol, ProtocolFactory, StopHandle, LISTENER_TOKEN, WAKER_TOKEN,
};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::net::SocketAddr;
use tracing::{debug, info, warn};

/// Per-worker limits, copied into every event loop.
#[derive(Debug, Clone, Copy)]
pub(super) struct LoopSettings {
    pub max_connections: usize,
    pub buffer_size: usize,
    pub events_capacity: usize,
}

/// A live session plus the resources the loop tracks for it.
struct Entry<P> {
    session: Session<TcpStream, P>,
    /// Index of this session's receive buffer in the worker's pool.
    buf_idx: usize,
    /// Interest currently registered with the poll.
    interest: Interest,
    peer: SocketAddr,
}

/// One event loop: its poll instance and listening socket.
pub(super) struct Worker {
    id: usize,
    poll: Poll,
    listener: TcpListener,
}

impl Worker {
    pub(super) fn new(id: usize, poll: Poll, listener: TcpListener) -> Self {
        Self { id, poll, listener }
    }

    pub(super) fn id(&self) -> usize {
        self.id
    }

    /// Serve until `stop` fires and the last draining session is gone.
    pub(super) fn run<F: ProtocolFactory>(
        self,
        factory: &F,
        stop: &StopHandle,
        settings: LoopSettings,
    ) -> io::Result<()> {
        let Worker {
            id: worker_id,
            mut poll,
            listener,
        } = self;

        let mut listener = Some(listener);
        let mut events = Events::with_capacity(settings.events_capacity);
        let mut buffers = BufferPool::new(settings.max_connections, settings.buffer_size);
        let mut sessions: ConnectionRegistry<Entry<F::Session>> =
            ConnectionRegistry::new(settings.max_connections);
        let mut draining = false;

        info!(
            worker = worker_id,
            pool_buffers = settings.max_connections,
            buffer_size = settings.buffer_size,
            "Worker started"
        );

        loop {
            if stop.is_stopped() && !draining {
                draining = true;

                // Cease accepting first, then wind down sessions.
                if let Some(mut listener) = listener.take() {
                    if let Err(e) = poll.registry().deregister(&mut listener) {
                        debug!(worker = worker_id, error = %e, "Failed to deregister listener");
                    }
                }

                let idle: Vec<usize> = sessions
                    .iter()
                    .filter(|(_, entry)| entry.session.is_reading())
                    .map(|(conn_id, _)| conn_id)
                    .collect();
                info!(
                    worker = worker_id,
                    idle = idle.len(),
                    writing = sessions.len() - idle.len(),
                    "Worker stopping"
                );
                for conn_id in idle {
                    let reason = CloseReason::Shutdown;
                    close_session(&poll, &mut sessions, &mut buffers, conn_id, reason);
                }
            }

            if draining && sessions.is_empty() {
                break;
            }

            if let Err(e) = poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e);
            }

            for event in events.iter() {
                match event.token() {
                    // The stop flag is checked at the top of the loop.
                    WAKER_TOKEN => {}
                    LISTENER_TOKEN => {
                        if let Some(listener) = listener.as_ref() {
                            accept_sessions(
                                listener,
                                &poll,
                                &mut sessions,
                                &mut buffers,
                                factory,
                                stop,
                                worker_id,
                            );
                        }
                    }
                    Token(conn_id) => {
                        drive_session(&poll, &mut sessions, &mut buffers, conn_id, draining);
                    }
                }
            }
        }

        info!(worker = worker_id, "Worker stopped");
        Ok(())
    }
}

/// Accept until the listener would block or stop is requested.
///
/// Once stop is requested the backlog is left alone, even mid-batch. Transient failures are logged and never end the loop; a persistent error
/// (e.g. descriptor exhaustion) defers the remaining backlog to the next
/// listener event.
fn accept_sessions<F: ProtocolFactory>(
    listener: &TcpListener,
    poll: &Poll,
    sessions: &mut ConnectionRegistry<Entry<F::Session>>,
    buffers: &mut BufferPool,
    factory: &F,
    stop: &StopHandle,
    worker_id: usize,
) {
    while !stop.is_stopped() {
        let (stream, peer) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(ref e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::Interrupted
                        | io::ErrorKind::ConnectionAborted
                        | io::ErrorKind::ConnectionReset
                ) =>
            {
                continue
            }
            Err(e) => {
                warn!(worker = worker_id, error = %e, "Accept failed");
                break;
            }
        };

        if sessions.is_full() {
            warn!(
                worker = worker_id,
                peer = %peer,
                "Connection limit reached, rejecting connection"
            );
            continue;
        }

        let buf_idx = match buffers.alloc() {
            Some(idx) => idx,
            None => {
                warn!(
                    worker = worker_id,
                    peer = %peer,
                    "Buffer pool exhausted, rejecting connection"
                );
                continue;
            }
        };

        let entry = Entry {
            session: Session::new(stream, factory.session()),
            buf_idx,
            interest: Interest::READABLE,
            peer,
        };

        let conn_id = match sessions.insert(entry) {
            Ok(conn_id) => conn_id,
            Err(_) => {
                buffers.free(buf_idx);
                continue;
            }
        };

        let registered = match sessions.get_mut(conn_id) {
            Some(entry) => poll.registry().register(
                entry.session.stream_mut(),
                Token(conn_id),
                Interest::READABLE,
            ),
            None => continue,
        };

        if let Err(e) = registered {
            warn!(
                worker = worker_id,
                peer = %peer,
                error = %e,
                "Failed to register connection"
            );
            if sessions.remove(conn_id).is_some() {
                buffers.free(buf_idx);
            }
            continue;
        }

        debug!(worker = worker_id, conn_id, peer = %peer, "Accepted connection");
    }
}

/// Advance a session after a readiness event until it would block.
fn drive_session<P: Protocol>(
    poll: &Poll,
    sessions: &mut ConnectionRegistry<Entry<P>>,
    buffers: &mut BufferPool,
    conn_id: usize,
    draining: bool,
) {
    // Stale events for sessions closed earlier in this batch.
    let Some(entry) = sessions.get_mut(conn_id) else {
        return;
    };

    let buf = buffers.get_mut(entry.buf_idx);
    let outcome = loop {
        match entry.session.advance(buf) {
            Progress::Ready | Progress::WouldRead if draining => {
                break Err(CloseReason::Shutdown);
            }
            Progress::Ready => continue,
            Progress::WouldRead => break Ok(Interest::READABLE),
            Progress::WouldWrite => break Ok(Interest::WRITABLE),
            Progress::Closed(reason) => break Err(reason),
        }
    };

    let outcome = outcome.and_then(|interest| {
        if interest == entry.interest {
            return Ok(());
        }
        poll.registry()
            .reregister(entry.session.stream_mut(), Token(conn_id), interest)
            .map(|()| entry.interest = interest)
            .map_err(CloseReason::Io)
    });

    if let Err(reason) = outcome {
        close_session(poll, sessions, buffers, conn_id, reason);
    }
}

fn close_session<P: Protocol>(
    poll: &Poll,
    sessions: &mut ConnectionRegistry<Entry<P>>,
    buffers: &mut BufferPool,
    conn_id: usize,
    reason: CloseReason,
) {
    if let Some(mut entry) = sessions.remove(conn_id) {
        let _ = poll.registry().deregister(entry.session.stream_mut());
        entry.session.close();
        buffers.free(entry.buf_idx);
        log_close(conn_id, entry.peer, entry.session.requests(), &reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::EchoProtocol;
    use crate::runtime::bind_listener;

    #[test]
    fn test_accept_skipped_once_stopped() {
        let poll = Poll::new().unwrap();
        let std_listener = bind_listener("127.0.0.1:0".parse().unwrap(), false).unwrap();
        let addr = std_listener.local_addr().unwrap();
        let listener = TcpListener::from_std(std_listener);

        let _client = std::net::TcpStream::connect(addr).unwrap();

        let factory = || EchoProtocol;
        let mut sessions = ConnectionRegistry::new(4);
        let mut buffers = BufferPool::new(4, 64);

        let stopped = StopHandle::new();
        stopped.stop();
        accept_sessions(&listener, &poll, &mut sessions, &mut buffers, &factory, &stopped, 0);
        assert!(sessions.is_empty());
        assert_eq!(buffers.available(), 4);

        // The queued connection was left in the backlog.
        let running = StopHandle::new();
        accept_sessions(&listener, &poll, &mut sessions, &mut buffers, &factory, &running, 0);
        assert_eq!(sessions.len(), 1);
        assert_eq!(buffers.available(), 3);
    }
}
