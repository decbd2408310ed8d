//! HTTP/1.1 message heads and bodies.
//!
//! The types here are plain values: they parse from a single line (without its
//! line break) or are built from parts, and their `Display` output is the exact
//! wire text. Splitting a byte stream into lines and heads is the job of
//! [`codec`](crate::codec).

mod body;
mod error;
mod header;
mod request;
mod response;

pub use body::{BodyResult, PendingBody};
pub use error::{ClientError, ParseError};
pub use header::{Http1HeaderLine, content_length, find_header, has_transfer_encoding};
pub use request::{Http1Request, Http1RequestLine};
pub use response::{Http1Response, Http1ResponseLine};

