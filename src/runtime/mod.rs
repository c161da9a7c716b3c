//! Connection-management runtime.
//!
//! Two interchangeable strategies serve the same protocol contract:
//! - `reactive`: mio event loops (epoll/kqueue) multiplexing every session
//! - `threaded`: one blocking OS thread per connection
//!
//! Both share common abstractions:
//! - `Protocol` / `ProtocolFactory`: the adapter boundary
//! - `Session`: the read/process/write state machine
//! - `StopHandle`: cooperative shutdown
//!
//! Framing: each successful receive (at most `buffer_size` bytes) is one
//! request, and each request yields exactly one `response + "\n"`. Requests
//! longer than the buffer reach the adapter as several chunks; reassembly is
//! left to the protocol.

mod buffer;
pub mod protocol;
mod reactive;
pub mod request;
pub mod session;
mod shutdown;
mod threaded;


pub(crate) use buffer::BufferPool;
pub use protocol::{Protocol, ProtocolFactory, Shared, SharedProtocol};
pub use reactive::ReactiveServer;
pub use shutdown::StopHandle;
pub use threaded::ThreadedServer;

use crate::config::{Config, ProtocolType, Strategy};
use crate::protocols::{EchoProtocol, KvProtocol, PingProtocol};
use crate::storage::Storage;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use mio::Token;
use tracing::info;

/// Listen backlog for every listening socket.
const LISTEN_BACKLOG: i32 = 1024;

/// Poll tokens outside the range of connection ids.
pub(crate) const LISTENER_TOKEN: Token = Token(usize::MAX);
pub(crate) const WAKER_TOKEN: Token = Token(usize::MAX - 1);

/// Lifecycle shared by both strategies.
///
/// Construction binds the listening socket (`listen`); `start` serves on the
/// calling thread until `stop` is requested from elsewhere.
pub trait Server {
    /// Address actually bound (resolves port 0).
    fn local_addr(&self) -> SocketAddr;

    /// Handle that can stop the server from any thread.
    fn stop_handle(&self) -> StopHandle;

    /// Serve until stopped. Can only be called once.
    fn start(&mut self) -> io::Result<()>;

    /// Request a graceful stop. Returns immediately.
    fn stop(&self) {
        self.stop_handle().stop();
    }
}

/// Run the server described by `config` until it stops.
pub fn run(config: Config) -> io::Result<()> {
    match config.protocol {
        ProtocolType::Ping => serve(&config, Shared::new(PingProtocol)),
        ProtocolType::Echo => serve(&config, || EchoProtocol),
        ProtocolType::Kv => {
            let storage = Storage::new();
            serve(&config, move || KvProtocol::new(Arc::clone(&storage)))
        }
    }
}

fn serve<F: ProtocolFactory>(config: &Config, factory: F) -> io::Result<()> {
    match config.strategy {
        Strategy::Reactive => start(ReactiveServer::listen(config, factory)?),
        Strategy::Threaded => start(ThreadedServer::listen(config, factory)?),
    }
}

fn start(mut server: impl Server) -> io::Result<()> {
    info!(addr = %server.local_addr(), "Server listening");
    server.start()
}

/// Resolve a `host:port` string to the first matching socket address.
pub(crate) fn resolve_addr(addr: &str) -> io::Result<SocketAddr> {
    addr.to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("address resolved to nothing: {addr}"),
        )
    })
}

/// Create a non-blocking TCP listener, optionally with SO_REUSEPORT so
/// several event loops can share one port.
pub(crate) fn bind_listener(
    addr: SocketAddr,
    reuse_port: bool,
) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    #[cfg(unix)]
    socket.set_reuse_port(reuse_port)?;
    #[cfg(not(unix))]
    let _ = reuse_port;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}

pub(crate) fn already_started() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "server already started")
}
