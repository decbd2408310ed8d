//! HTTP/1.1 codec for message heads and chunked bodies.
//!
//! The parsers work on whatever prefix of the stream is buffered and report a
//! tri-state [`ParseStatus`]: a value with the number of bytes it used, a
//! truncated prefix that needs more bytes, or invalid input.
//!
//! # Line breaks
//!
//! A line ends at a CR or an LF. When the next byte is the other one of the two
//! it belongs to the same break, so CRLF and LFCR are single breaks while
//! `\n\n` is two. A CR that is the last buffered byte leaves the line truncated.
//!
//! # Components
//!
//! - [`parse_request`] and [`parse_response`]: message heads
//! - [`Http1Chunk`]: one unit of the chunked transfer coding
//! - [`RequestHeadDecoder`], [`ResponseHeadDecoder`], [`ChunkDecoder`],
//!   [`ChunkEncoder`] and [`HeadEncoder`]: `tokio_util::codec` adapters
//!
//! # Example
//!
//! ```
//! use micro_http::codec::RequestHeadDecoder;
//! use tokio_util::codec::Decoder;
//! use bytes::BytesMut;
//!
//! let mut buffer = BytesMut::from("GET /index.html HTTP/1.1\r\nHost: localhost\r\n\r\n");
//! let request = RequestHeadDecoder.decode(&mut buffer).unwrap().unwrap();
//! assert_eq!(request.line().path(), "/index.html");
//! assert!(buffer.is_empty());
//! ```

mod chunk;
mod decoder;
mod encoder;
mod head;
mod line;

pub use chunk::Http1Chunk;
pub use decoder::{ChunkDecoder, RequestHeadDecoder, ResponseHeadDecoder};
pub use encoder::{ChunkEncoder, HeadEncoder};
pub use head::{ParseStatus, parse_request, parse_response};
