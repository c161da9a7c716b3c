//! Threaded strategy: one blocking OS thread per connection.
//!
//! The accept loop runs on the thread that calls `start`. It sleeps in a mio
//! poll on the listener next to a `Waker`, so a new connection is accepted
//! as soon as it arrives and `stop()` interrupts the wait. Each accepted
//! stream gets a named thread that owns the socket, a private receive buffer
//! and its adapter instance, and runs the session cycle with blocking I/O.
//!
//! Connection threads are tracked rather than detached. Streams carry a read
//! timeout of `poll_interval` so an idle thread notices `stop()` between
//! reads; `start` joins every thread before returning.

use crate::config::Config;
use crate::runtime::session::{log_close, CloseReason, Progress, Session};
use crate::runtime::{
    already_started, bind_listener, resolve_addr, Protocol, ProtocolFactory, Server, StopHandle,
    LISTENER_TOKEN, WAKER_TOKEN,
};
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Waker};
use std::io;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Listener and waker readiness only.
const ACCEPT_EVENTS: usize = 8;

/// Thread-per-connection server.
pub struct ThreadedServer<F> {
    factory: Arc<F>,
    poll: Poll,
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    stop: StopHandle,
    max_connections: usize,
    buffer_size: usize,
    poll_interval: Duration,
}

impl<F: ProtocolFactory> ThreadedServer<F> {
    /// Bind `config.host:config.port`.
    pub fn listen(config: &Config, factory: F) -> io::Result<Self> {
        let addr = resolve_addr(&config.listen_addr())?;
        let listener = bind_listener(addr, false)?;
        let local_addr = listener.local_addr()?;

        let poll = Poll::new()?;
        let mut listener = TcpListener::from_std(listener);
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;

        Ok(Self {
            factory: Arc::new(factory),
            poll,
            listener: Some(listener),
            local_addr,
            stop: StopHandle::with_wakers(vec![waker]),
            max_connections: config.max_connections,
            buffer_size: config.buffer_size,
            poll_interval: config.poll_interval,
        })
    }

    /// Accept until the listener would block or stop is requested.
    fn accept_pending(
        &self,
        listener: &TcpListener,
        connections: &mut Vec<JoinHandle<()>>,
        next_id: &mut usize,
    ) {
        while !self.stop.is_stopped() {
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
                    warn!(error = %e, "Accept failed");
                    break;
                }
            };

            reap_finished(connections);
            if connections.len() >= self.max_connections {
                warn!(peer = %peer, "Connection limit reached, rejecting connection");
                continue;
            }

            let conn_id = *next_id;
            *next_id += 1;

            match self.spawn_connection(conn_id, stream.into(), peer) {
                Ok(handle) => {
                    debug!(conn_id, peer = %peer, "Accepted connection");
                    connections.push(handle);
                }
                Err(e) => warn!(conn_id, peer = %peer, error = %e, "Failed to start connection"),
            }
        }
    }

    fn spawn_connection(
        &self,
        conn_id: usize,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> io::Result<JoinHandle<()>> {
        // mio hands out non-blocking streams.
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(self.poll_interval))?;

        let protocol = self.factory.session();
        let stop = self.stop.clone();
        let buffer_size = self.buffer_size;

        thread::Builder::new()
            .name(format!("conn-{conn_id}"))
            .spawn(move || serve_connection(conn_id, peer, stream, protocol, &stop, buffer_size))
    }
}

impl<F: ProtocolFactory> Server for ThreadedServer<F> {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Accept until stopped, then wait for every connection thread.
    fn start(&mut self) -> io::Result<()> {
        let mut listener = self.listener.take().ok_or_else(already_started)?;

        info!(
            addr = %self.local_addr,
            max_connections = self.max_connections,
            buffer_size = self.buffer_size,
            "Starting threaded server"
        );

        let mut connections: Vec<JoinHandle<()>> = Vec::new();
        let mut next_id = 0usize;
        let mut events = Events::with_capacity(ACCEPT_EVENTS);
        let mut result = Ok(());

        while !self.stop.is_stopped() {
            if let Err(e) = self.poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(error = %e, "Accept poll failed");
                self.stop.stop();
                result = Err(e);
                break;
            }

            if events.iter().any(|event| event.token() == LISTENER_TOKEN) {
                self.accept_pending(&listener, &mut connections, &mut next_id);
            }
        }

        if let Err(e) = self.poll.registry().deregister(&mut listener) {
            debug!(error = %e, "Failed to deregister listener");
        }
        drop(listener);
        info!(live = connections.len(), "Stopped accepting; waiting for connections");

        for handle in connections {
            join_connection(handle);
        }

        info!("Threaded server stopped");
        result
    }
}

/// Body of one connection thread.
fn serve_connection<P: Protocol>(
    conn_id: usize,
    peer: SocketAddr,
    stream: TcpStream,
    protocol: P,
    stop: &StopHandle,
    buffer_size: usize,
) {
    let mut buf = vec![0u8; buffer_size];
    let mut session = Session::new(stream, protocol);

    let reason = loop {
        match session.advance(&mut buf) {
            Progress::Ready | Progress::WouldRead if stop.is_stopped() => {
                break CloseReason::Shutdown;
            }
            // Blocking sockets only report WouldRead on read timeout.
            Progress::Ready | Progress::WouldRead | Progress::WouldWrite => continue,
            Progress::Closed(reason) => break reason,
        }
    };

    session.close();
    log_close(conn_id, peer, session.requests(), &reason);
}

/// Join and drop the handles of threads that already exited.
fn reap_finished(connections: &mut Vec<JoinHandle<()>>) {
    let mut i = 0;
    while i < connections.len() {
        if connections[i].is_finished() {
            join_connection(connections.swap_remove(i));
        } else {
            i += 1;
        }
    }
}

fn join_connection(handle: JoinHandle<()>) {
    let name = handle.thread().name().unwrap_or("conn").to_string();
    if handle.join().is_err() {
        error!(thread = %name, "Connection thread panicked");
    }
}
