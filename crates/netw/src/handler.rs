//! The seam between the connection multiplexer and the protocols it carries.
//!
//! A [`ProtocolHandler`] is a factory shared by every connection of a server.
//! For each connection it creates one [`ConnectionHandler`], which is fed the
//! bytes read from the socket and talks back through [`HandlerCallbacks`].
//! [`ConnectionHandlerHandle`] ties a handler to its factory and gives it back
//! through [`ProtocolHandler::release`] exactly once.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::server::ConnectionId;

type OutputFn = Arc<dyn Fn(Bytes) + Send + Sync>;
type CloseFn = Arc<dyn Fn() + Send + Sync>;

/// How a handler produces output for, or closes, its connection.
///
/// Both callbacks may be invoked from any thread.
#[derive(Clone)]
pub struct HandlerCallbacks {
    connection_id: ConnectionId,
    output: OutputFn,
    close: CloseFn,
}

impl HandlerCallbacks {
    pub fn new<O, C>(connection_id: ConnectionId, output: O, close: C) -> Self
    where
        O: Fn(Bytes) + Send + Sync + 'static,
        C: Fn() + Send + Sync + 'static,
    {
        Self { connection_id, output: Arc::new(output), close: Arc::new(close) }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Queues `bytes` to be written to the connection.
    pub fn output(&self, bytes: impl Into<Bytes>) {
        (self.output)(bytes.into());
    }

    /// Closes the connection once everything queued before this call is written.
    pub fn close(&self) {
        (self.close)();
    }
}

impl fmt::Debug for HandlerCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerCallbacks").field("connection_id", &self.connection_id).finish_non_exhaustive()
    }
}

pub trait ConnectionHandler: Any + Send {
    /// Offers the buffered input and returns how many bytes were consumed.
    ///
    /// Returns 0 when the buffered bytes are not enough to make progress; the
    /// same bytes, plus whatever arrives next, are offered again later.
    fn accept_input(&mut self, data: &[u8]) -> usize;

    /// The connection is gone. Called once, right before the handler is released.
    fn end_of_connection(&mut self) {}

    /// The wrapped handler, for handlers that sit in front of another one.
    fn upstream_mut(&mut self) -> Option<&mut (dyn ConnectionHandler + 'static)> {
        None
    }
}

/// Finds the handler of type `T`, looking through wrapping handlers.
pub fn downcast_handler<'a, T: ConnectionHandler>(handler: &'a mut (dyn ConnectionHandler + 'static)) -> Option<&'a mut T> {
    if (&*handler as &dyn Any).is::<T>() {
        let any: &mut dyn Any = handler;
        return any.downcast_mut::<T>();
    }
    handler.upstream_mut().and_then(downcast_handler::<T>)
}

pub trait ProtocolHandler: Send + Sync {
    fn create(&self, callbacks: HandlerCallbacks) -> Box<dyn ConnectionHandler>;

    fn release(&self, handler: Box<dyn ConnectionHandler>) {
        drop(handler);
    }
}

/// Owns one handler for as long as its connection lives.
pub struct ConnectionHandlerHandle {
    protocol: Arc<dyn ProtocolHandler>,
    handler: Option<Box<dyn ConnectionHandler>>,
}

impl ConnectionHandlerHandle {
    pub fn new(protocol: Arc<dyn ProtocolHandler>, callbacks: HandlerCallbacks) -> Self {
        let handler = protocol.create(callbacks);
        Self { protocol, handler: Some(handler) }
    }

    pub fn handler_mut(&mut self) -> Option<&mut (dyn ConnectionHandler + 'static)> {
        self.handler.as_deref_mut()
    }

    pub fn accept_input(&mut self, data: &[u8]) -> usize {
        self.handler.as_deref_mut().map_or(0, |handler| handler.accept_input(data))
    }

    pub fn end_of_connection(&mut self) {
        if let Some(handler) = self.handler.as_deref_mut() {
            handler.end_of_connection();
        }
    }
}

impl Drop for ConnectionHandlerHandle {
    fn drop(&mut self) {
        if let Some(handler) = self.handler.take() {
            self.protocol.release(handler);
        }
    }
}

impl fmt::Debug for ConnectionHandlerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandlerHandle").field("attached", &self.handler.is_some()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;
    use std::sync::Mutex;

    mock! {
        Protocol {}

        impl ProtocolHandler for Protocol {
            fn create(&self, callbacks: HandlerCallbacks) -> Box<dyn ConnectionHandler>;
            fn release(&self, handler: Box<dyn ConnectionHandler>);
        }
    }

    #[derive(Default)]
    struct Recording {
        seen: Vec<u8>,
        ended: usize,
    }

    impl ConnectionHandler for Recording {
        fn accept_input(&mut self, data: &[u8]) -> usize {
            self.seen.extend_from_slice(data);
            data.len()
        }

        fn end_of_connection(&mut self) {
            self.ended += 1;
        }
    }

    struct Wrapper {
        inner: Recording,
    }

    impl ConnectionHandler for Wrapper {
        fn accept_input(&mut self, data: &[u8]) -> usize {
            self.inner.accept_input(data)
        }

        fn upstream_mut(&mut self) -> Option<&mut (dyn ConnectionHandler + 'static)> {
            Some(&mut self.inner)
        }
    }

    fn callbacks(sink: Arc<Mutex<Vec<Bytes>>>) -> HandlerCallbacks {
        HandlerCallbacks::new(ConnectionId::from(7), move |bytes| sink.lock().unwrap().push(bytes), || {})
    }

    #[test]
    fn handle_releases_exactly_once() {
        let mut protocol = MockProtocol::new();
        protocol.expect_create().times(1).returning(|_| -> Box<dyn ConnectionHandler> { Box::new(Recording::default()) });
        protocol.expect_release().times(1).return_const(());

        let protocol: Arc<dyn ProtocolHandler> = Arc::new(protocol);
        let mut handle = ConnectionHandlerHandle::new(protocol, callbacks(Arc::default()));

        assert_eq!(handle.accept_input(b"abc"), 3);
        handle.end_of_connection();
        drop(handle);
    }

    #[test]
    fn callbacks_carry_connection_id_and_output() {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let callbacks = callbacks(Arc::clone(&sink));

        callbacks.output(&b"hello"[..]);
        callbacks.clone().output(Bytes::from_static(b"!"));
        callbacks.close();

        assert_eq!(callbacks.connection_id(), ConnectionId::from(7));
        assert_eq!(*sink.lock().unwrap(), vec![Bytes::from_static(b"hello"), Bytes::from_static(b"!")]);
    }

    #[test]
    fn downcast_looks_through_wrappers() {
        let mut wrapper = Wrapper { inner: Recording::default() };
        wrapper.accept_input(b"xy");

        let handler: &mut (dyn ConnectionHandler + 'static) = &mut wrapper;
        let recording = downcast_handler::<Recording>(handler).unwrap();
        assert_eq!(recording.seen, b"xy");
        recording.end_of_connection();
        assert_eq!(wrapper.inner.ended, 1);

        let handler: &mut (dyn ConnectionHandler + 'static) = &mut wrapper;
        assert!(downcast_handler::<Wrapper>(handler).is_some());

        let mut plain = Recording::default();
        assert!(downcast_handler::<Wrapper>(&mut plain).is_none());
    }
}
