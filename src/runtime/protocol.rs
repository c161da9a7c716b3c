//! The protocol adapter boundary.
//!
//! The runtime knows nothing about request semantics: it hands each received
//! chunk to a [`Protocol`] and writes back whatever string comes out. Every
//! connection owns its own adapter instance, built by a [`ProtocolFactory`]
//! when the connection is accepted. Adapters that need shared state hold an
//! `Arc` to something thread-safe.

use std::sync::Arc;

/// Per-connection request handler.
///
/// `process` must not fail: protocol errors are encoded in the returned
/// string, since the connection has no other channel back to the client.
pub trait Protocol: Send {
    fn process(&mut self, request: &str) -> String;
}

/// Builds one [`Protocol`] instance per accepted connection.
pub trait ProtocolFactory: Send + Sync + 'static {
    type Session: Protocol + 'static;

    fn session(&self) -> Self::Session;
}

impl<F, P> ProtocolFactory for F
where
    F: Fn() -> P + Send + Sync + 'static,
    P: Protocol + 'static,
{
    type Session = P;

    fn session(&self) -> P {
        self()
    }
}

/// A handler that is safe to call from many connections at once.
pub trait SharedProtocol: Send + Sync + 'static {
    fn process(&self, request: &str) -> String;
}

/// Shares one [`SharedProtocol`] between every connection.
pub struct Shared<H>(pub Arc<H>);

impl<H: SharedProtocol> Shared<H> {
    pub fn new(handler: H) -> Self {
        Shared(Arc::new(handler))
    }
}

impl<H> Clone for Shared<H> {
    fn clone(&self) -> Self {
        Shared(Arc::clone(&self.0))
    }
}

impl<H: SharedProtocol> Protocol for Shared<H> {
    fn process(&mut self, request: &str) -> String {
        self.0.process(request)
    }
}

impl<H: SharedProtocol> ProtocolFactory for Shared<H> {
    type Session = Shared<H>;

    fn session(&self) -> Shared<H> {
        self.clone()
    }
}
