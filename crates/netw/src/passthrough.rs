//! A handler that sits between the socket and another protocol.
//!
//! [`PassThroughProtocol`] wraps an upstream [`ProtocolHandler`] and routes
//! both directions through a [`Transport`]. An encrypting transport plugs in
//! here without the multiplexer or the upstream protocol knowing about it;
//! [`PlainTransport`] passes bytes through unchanged.

use std::fmt;
use std::sync::{Arc, Mutex};

use bytes::{Buf, Bytes, BytesMut};

use crate::handler::{ConnectionHandler, HandlerCallbacks, ProtocolHandler};
use crate::task::lock;

/// Converts between wire bytes and the bytes the upstream protocol sees.
pub trait Transport: Send + 'static {
    /// Decodes wire bytes from `data` into `plain`, returning how many wire
    /// bytes were consumed. Returns 0 when more wire bytes are needed.
    fn decode_inbound(&mut self, data: &[u8], plain: &mut BytesMut) -> usize;

    /// Encodes upstream output into wire bytes.
    fn encode_outbound(&mut self, plain: Bytes) -> Bytes;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTransport;

impl Transport for PlainTransport {
    fn decode_inbound(&mut self, data: &[u8], plain: &mut BytesMut) -> usize {
        plain.extend_from_slice(data);
        data.len()
    }

    fn encode_outbound(&mut self, plain: Bytes) -> Bytes {
        plain
    }
}

type MakeTransport<T> = Arc<dyn Fn() -> T + Send + Sync>;

pub struct PassThroughProtocol<T> {
    upstream: Arc<dyn ProtocolHandler>,
    make_transport: MakeTransport<T>,
}

impl<T: Transport> PassThroughProtocol<T> {
    pub fn new<F>(upstream: Arc<dyn ProtocolHandler>, make_transport: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self { upstream, make_transport: Arc::new(make_transport) }
    }
}

impl PassThroughProtocol<PlainTransport> {
    pub fn plain(upstream: Arc<dyn ProtocolHandler>) -> Self {
        Self::new(upstream, || PlainTransport)
    }
}

impl<T> fmt::Debug for PassThroughProtocol<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassThroughProtocol").finish_non_exhaustive()
    }
}

impl<T: Transport> ProtocolHandler for PassThroughProtocol<T> {
    fn create(&self, callbacks: HandlerCallbacks) -> Box<dyn ConnectionHandler> {
        let transport = Arc::new(Mutex::new((self.make_transport)()));

        let wire = callbacks.clone();
        let encoder = Arc::clone(&transport);
        let upstream_callbacks = HandlerCallbacks::new(
            callbacks.connection_id(),
            move |plain| {
                let encoded = lock(&encoder).encode_outbound(plain);
                wire.output(encoded);
            },
            move || callbacks.close(),
        );

        Box::new(PassThroughHandler {
            transport,
            plain: BytesMut::new(),
            upstream: self.upstream.create(upstream_callbacks),
            upstream_protocol: Arc::clone(&self.upstream),
        })
    }
}

pub struct PassThroughHandler<T> {
    transport: Arc<Mutex<T>>,
    plain: BytesMut,
    upstream: Box<dyn ConnectionHandler>,
    upstream_protocol: Arc<dyn ProtocolHandler>,
}

impl<T: Transport> ConnectionHandler for PassThroughHandler<T> {
    fn accept_input(&mut self, data: &[u8]) -> usize {
        let consumed = lock(&self.transport).decode_inbound(data, &mut self.plain);

        while !self.plain.is_empty() {
            let taken = self.upstream.accept_input(&self.plain);
            if taken == 0 {
                break;
            }
            self.plain.advance(taken.min(self.plain.len()));
        }

        consumed
    }

    fn end_of_connection(&mut self) {
        self.upstream.end_of_connection();
    }

    fn upstream_mut(&mut self) -> Option<&mut (dyn ConnectionHandler + 'static)> {
        Some(self.upstream.as_mut())
    }
}

impl<T> Drop for PassThroughHandler<T> {
    fn drop(&mut self) {
        let upstream = std::mem::replace(&mut self.upstream, Box::new(Released));
        self.upstream_protocol.release(upstream);
    }
}

impl<T> fmt::Debug for PassThroughHandler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassThroughHandler").field("buffered", &self.plain.len()).finish_non_exhaustive()
    }
}

/// Placeholder left behind once the upstream handler was released.
struct Released;

impl ConnectionHandler for Released {
    fn accept_input(&mut self, data: &[u8]) -> usize {
        data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::echo::{EchoHandler, EchoProtocol};
    use crate::handler::downcast_handler;
    use crate::server::ConnectionId;

    /// Flips every byte, standing in for a real cipher.
    struct Inverting;

    impl Transport for Inverting {
        fn decode_inbound(&mut self, data: &[u8], plain: &mut BytesMut) -> usize {
            plain.extend(data.iter().map(|b| !b));
            data.len()
        }

        fn encode_outbound(&mut self, plain: Bytes) -> Bytes {
            plain.iter().map(|b| !b).collect()
        }
    }

    fn sink_callbacks(sink: Arc<Mutex<Vec<u8>>>) -> HandlerCallbacks {
        HandlerCallbacks::new(ConnectionId::from(1), move |bytes: Bytes| sink.lock().unwrap().extend_from_slice(&bytes), || {})
    }

    #[test]
    fn plain_transport_is_transparent() {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let protocol = PassThroughProtocol::plain(Arc::new(EchoProtocol));
        let mut handler = protocol.create(sink_callbacks(Arc::clone(&sink)));

        assert_eq!(handler.accept_input(b"ping"), 4);
        assert_eq!(*sink.lock().unwrap(), b"ping");
    }

    #[test]
    fn transport_wraps_both_directions() {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let protocol = PassThroughProtocol::new(Arc::new(EchoProtocol), || Inverting);
        let mut handler = protocol.create(sink_callbacks(Arc::clone(&sink)));

        let wire = b"abc".iter().map(|b| !b).collect::<Vec<_>>();
        assert_eq!(handler.accept_input(&wire), 3);
        assert_eq!(*sink.lock().unwrap(), wire);

        assert!(downcast_handler::<EchoHandler>(handler.as_mut()).is_some());
    }
}
