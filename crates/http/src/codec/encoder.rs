use std::io;

use bytes::{Bytes, BytesMut};
use tokio_util::codec::Encoder;

use crate::codec::chunk::Http1Chunk;
use crate::protocol::{Http1Request, Http1Response};

/// Writes message heads; bodies are appended by the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeadEncoder;

impl Encoder<&Http1Request> for HeadEncoder {
    type Error = io::Error;

    fn encode(&mut self, item: &Http1Request, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode(dst);
        Ok(())
    }
}

impl Encoder<&Http1Response> for HeadEncoder {
    type Error = io::Error;

    fn encode(&mut self, item: &Http1Response, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode(dst);
        Ok(())
    }
}

/// Frames payloads as chunks. An empty payload writes the last chunk, after
/// which everything is ignored.
#[derive(Debug, Clone, Default)]
pub struct ChunkEncoder {
    eof: bool,
}

impl ChunkEncoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Encoder<Bytes> for ChunkEncoder {
    type Error = io::Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if self.eof {
            return Ok(());
        }

        let chunk = Http1Chunk::new(item);
        self.eof = chunk.is_last();
        chunk.encode(dst);
        Ok(())
    }
}
