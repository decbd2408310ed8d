//! [`tokio_util::codec::Decoder`] adapters over the tri-state parsers.
//!
//! A truncated parse maps to `Ok(None)` and leaves the buffer untouched, a
//! valid one advances the buffer past the consumed bytes.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::codec::chunk::Http1Chunk;
use crate::codec::head::{ParseStatus, parse_request, parse_response};
use crate::protocol::{Http1Request, Http1Response, ParseError};

fn advance<T>(src: &mut BytesMut, status: ParseStatus<T>, invalid: impl FnOnce() -> ParseError) -> Result<Option<T>, ParseError> {
    match status {
        ParseStatus::Valid { value, consumed } => {
            src.advance(consumed);
            Ok(Some(value))
        }
        ParseStatus::Truncated => {
            trace!(buffered = src.len(), "waiting for more bytes");
            Ok(None)
        }
        ParseStatus::Invalid => Err(invalid()),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RequestHeadDecoder;

impl Decoder for RequestHeadDecoder {
    type Item = Http1Request;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let status = parse_request(src);
        advance(src, status, || ParseError::invalid_head("malformed request head"))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseHeadDecoder;

impl Decoder for ResponseHeadDecoder {
    type Item = Http1Response;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let status = parse_response(src);
        advance(src, status, || ParseError::invalid_head("malformed response head"))
    }
}

/// Decodes a chunked body one chunk at a time, up to and including the last
/// (empty) chunk. Nothing is decoded after that.
#[derive(Debug, Clone, Default)]
pub struct ChunkDecoder {
    eof: bool,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }
}

impl Decoder for ChunkDecoder {
    type Item = Http1Chunk;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.eof {
            return Ok(None);
        }

        let status = Http1Chunk::decode(src);
        let chunk = advance(src, status, || ParseError::invalid_chunk("malformed chunk"))?;
        self.eof = chunk.as_ref().is_some_and(Http1Chunk::is_last);
        Ok(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn decodes_pipelined_requests() {
        let str = indoc! {r##"
        GET /first HTTP/1.1
        Host: localhost

        GET /second HTTP/1.1
        Host: localhost

        "##};
        let mut buf = BytesMut::from(str);

        let first = RequestHeadDecoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.line().path(), "/first");
        let second = RequestHeadDecoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.line().path(), "/second");

        assert!(buf.is_empty());
        assert!(RequestHeadDecoder.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn truncated_head_keeps_buffer() {
        let mut buf = BytesMut::from("GET / HTTP/1.1\r\nHost: local");
        assert!(RequestHeadDecoder.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 27);

        buf.extend_from_slice(b"host\r\n\r\n");
        let request = RequestHeadDecoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(request.headers()[0].value(), "localhost");
    }

    #[test]
    fn invalid_head_is_an_error() {
        let mut buf = BytesMut::from("HTTP/1.1 OK\r\n\r\n");
        assert!(matches!(ResponseHeadDecoder.decode(&mut buf), Err(ParseError::InvalidHead { .. })));
    }

    #[test]
    fn response_head_then_body_bytes() {
        let mut buf = BytesMut::from("HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello");
        let response = ResponseHeadDecoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(response.line().code(), 200);
        assert_eq!(&buf[..], b"hello");
    }

    #[test]
    fn chunks_until_last() {
        let mut buf = BytesMut::from("5\r\nhello\r\n6\r\n world\r\n0\r\n\r\ntrailing");
        let mut decoder = ChunkDecoder::new();

        let mut body = Vec::new();
        while let Some(chunk) = decoder.decode(&mut buf).unwrap() {
            body.extend_from_slice(chunk.payload());
        }

        assert_eq!(body, b"hello world");
        assert!(decoder.is_eof());
        assert_eq!(&buf[..], b"trailing");
    }

    #[test]
    fn invalid_chunk_is_an_error() {
        let mut buf = BytesMut::from("zz\r\n");
        assert!(matches!(ChunkDecoder::new().decode(&mut buf), Err(ParseError::InvalidChunk { .. })));
    }
}
