use bytes::Bytes;
use tracing::trace;

use crate::handler::{ConnectionHandler, HandlerCallbacks, ProtocolHandler};

/// Writes every byte it receives straight back to the peer.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoProtocol;

impl ProtocolHandler for EchoProtocol {
    fn create(&self, callbacks: HandlerCallbacks) -> Box<dyn ConnectionHandler> {
        Box::new(EchoHandler { callbacks })
    }
}

#[derive(Debug)]
pub struct EchoHandler {
    callbacks: HandlerCallbacks,
}

impl ConnectionHandler for EchoHandler {
    fn accept_input(&mut self, data: &[u8]) -> usize {
        trace!(connection = %self.callbacks.connection_id(), size = data.len(), "echo");
        self.callbacks.output(Bytes::copy_from_slice(data));
        data.len()
    }
}
