//! Cooperative stop signalling.
//!
//! `stop()` never aborts I/O in progress. It flips a shared flag that every
//! accept loop and session loop checks between iterations, and pokes the
//! reactive event loops so they notice without waiting for traffic.

use mio::Waker;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Cloneable handle used to stop a running server from any thread.
#[derive(Clone, Default)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
    wakers: Arc<Vec<Waker>>,
}

impl StopHandle {
    /// Handle for servers that only poll the flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle that also wakes each of the given event loops.
    pub fn with_wakers(wakers: Vec<Waker>) -> Self {
        Self {
            stopped: Arc::new(AtomicBool::new(false)),
            wakers: Arc::new(wakers),
        }
    }

    /// Request shutdown. Idempotent; returns without waiting for sessions.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(loops = self.wakers.len(), "Stop requested");
        for waker in self.wakers.iter() {
            if let Err(e) = waker.wake() {
                warn!(error = %e, "Failed to wake event loop");
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopHandle")
            .field("stopped", &self.is_stopped())
            .field("loops", &self.wakers.len())
            .finish()
    }
}
