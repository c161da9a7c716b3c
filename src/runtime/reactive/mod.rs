//! Reactive strategy: mio event loops multiplexing every session.
//!
//! Readiness-based I/O (epoll on Linux, kqueue on macOS). Each worker owns a
//! `Poll`, a listener and a table of sessions, and never shares them with
//! another thread. With more than one worker the listeners share the port
//! through SO_REUSEPORT and the kernel balances accepts between them.

mod event_loop;

use crate::config::Config;
use crate::runtime::{
    already_started, bind_listener, resolve_addr, ProtocolFactory, Server, StopHandle,
    LISTENER_TOKEN, WAKER_TOKEN,
};
use event_loop::{LoopSettings, Worker};
use mio::net::TcpListener;
use mio::{Interest, Poll, Waker};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use tracing::{error, info};

/// Event-loop server.
pub struct ReactiveServer<F> {
    factory: Arc<F>,
    workers: Vec<Worker>,
    local_addr: SocketAddr,
    stop: StopHandle,
    settings: LoopSettings,
}

impl<F: ProtocolFactory> ReactiveServer<F> {
    /// Bind `config.host:config.port` and prepare `config.workers` event loops.
    pub fn listen(config: &Config, factory: F) -> io::Result<Self> {
        let addr = resolve_addr(&config.listen_addr())?;
        let num_workers = config.workers.max(1);
        let reuse_port = num_workers > 1;

        // Bind once to learn the concrete port, then let siblings join it.
        let first = bind_listener(addr, reuse_port)?;
        let local_addr = first.local_addr()?;
        let mut listeners = vec![first];
        for _ in 1..num_workers {
            listeners.push(bind_listener(local_addr, true)?);
        }

        let mut workers = Vec::with_capacity(num_workers);
        let mut wakers = Vec::with_capacity(num_workers);
        for (id, listener) in listeners.into_iter().enumerate() {
            let poll = Poll::new()?;
            let mut listener = TcpListener::from_std(listener);
            poll.registry()
                .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
            wakers.push(Waker::new(poll.registry(), WAKER_TOKEN)?);
            workers.push(Worker::new(id, poll, listener));
        }

        Ok(Self {
            factory: Arc::new(factory),
            workers,
            local_addr,
            stop: StopHandle::with_wakers(wakers),
            settings: LoopSettings {
                max_connections: config.max_connections,
                buffer_size: config.buffer_size,
                events_capacity: config.events_capacity,
            },
        })
    }
}

impl<F: ProtocolFactory> Server for ReactiveServer<F> {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Run every event loop until stopped. Worker 0 runs on the calling thread.
    fn start(&mut self) -> io::Result<()> {
        let mut workers = std::mem::take(&mut self.workers).into_iter();
        let first = workers.next().ok_or_else(already_started)?;

        info!(
            workers = workers.len() + 1,
            addr = %self.local_addr,
            max_connections = self.settings.max_connections,
            buffer_size = self.settings.buffer_size,
            "Starting reactive server"
        );

        let mut handles = Vec::new();
        for worker in workers {
            let id = worker.id();
            let factory = Arc::clone(&self.factory);
            let stop = self.stop.clone();
            let settings = self.settings;

            let spawned = thread::Builder::new()
                .name(format!("worker-{id}"))
                .spawn(move || {
                    if let Err(e) = worker.run(&*factory, &stop, settings) {
                        error!(worker = id, error = %e, "Worker failed");
                        stop.stop();
                    }
                });

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    self.stop.stop();
                    join_workers(handles);
                    return Err(e);
                }
            }
        }

        let result = first.run(&*self.factory, &self.stop, self.settings);
        if let Err(ref e) = result {
            error!(worker = 0, error = %e, "Worker failed");
            self.stop.stop();
        }

        join_workers(handles);
        info!("Reactive server stopped");
        result
    }
}

fn join_workers(handles: Vec<thread::JoinHandle<()>>) {
    for handle in handles {
        if handle.join().is_err() {
            error!("Worker thread panicked");
        }
    }
}
