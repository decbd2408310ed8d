use std::fmt::Write;

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::head::ParseStatus;
use crate::codec::line::{Incomplete, is_line_break, next_line};
use crate::utils::ensure;

/// Longest accepted size field, enough hex digits for a `usize`.
const MAX_SIZE_DIGITS: usize = size_of::<usize>() * 2;

/// One unit of the chunked transfer coding: `hex-size CRLF payload CRLF`.
///
/// An empty payload is the last chunk of a body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Http1Chunk {
    payload: Bytes,
}

impl Http1Chunk {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self { payload: payload.into() }
    }

    /// Parses one chunk from the front of `src`.
    pub fn decode(src: &[u8]) -> ParseStatus<Self> {
        decode_chunk(src).into()
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    pub fn is_last(&self) -> bool {
        self.payload.is_empty()
    }

    /// Appends the canonical encoding, size in lowercase hex, to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        struct Writer<'a>(&'a mut BytesMut);

        impl Write for Writer<'_> {
            fn write_str(&mut self, s: &str) -> std::fmt::Result {
                self.0.put_slice(s.as_bytes());
                Ok(())
            }
        }

        dst.reserve(MAX_SIZE_DIGITS + self.payload.len() + 4);
        // writing into a BytesMut cannot fail
        let _ = write!(Writer(dst), "{:x}\r\n", self.payload.len());
        dst.put_slice(&self.payload);
        dst.put_slice(b"\r\n");
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut dst = BytesMut::new();
        self.encode(&mut dst);
        dst.freeze()
    }
}

fn decode_chunk(src: &[u8]) -> Result<(Http1Chunk, usize), Incomplete> {
    let digits = src.iter().take_while(|byte| byte.is_ascii_hexdigit()).count();
    ensure!(digits <= MAX_SIZE_DIGITS, Incomplete::Invalid);
    ensure!(digits < src.len(), Incomplete::Truncated);
    ensure!(digits > 0 && is_line_break(src[digits]), Incomplete::Invalid);

    let (size, size_line) = next_line(src)?;
    let size = size
        .iter()
        .try_fold(0usize, |size, digit| {
            let value = usize::from(hex_value(*digit));
            size.checked_mul(16)?.checked_add(value)
        })
        .ok_or(Incomplete::Invalid)?;

    let rest = &src[size_line..];
    ensure!(rest.len() > size, Incomplete::Truncated);
    ensure!(is_line_break(rest[size]), Incomplete::Invalid);
    let (_, terminator) = next_line(&rest[size..])?;

    let payload = Bytes::copy_from_slice(&rest[..size]);
    Ok((Http1Chunk::new(payload), size_line + size + terminator))
}

fn hex_value(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        b'A'..=b'F' => digit - b'A' + 10,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_chunk() {
        let status = Http1Chunk::decode(b"0\r\n\r\n");
        assert!(status.is_valid());
        assert_eq!(status.consumed(), 5);
        assert!(status.into_value().unwrap().is_last());

        assert!(Http1Chunk::decode(b"0\r\n\r").is_truncated());
        assert_eq!(Http1Chunk::default().to_bytes(), Bytes::from_static(b"0\r\n\r\n"));
    }

    #[test]
    fn chunk_with_payload() {
        let text = b"1f\r\n012345678901234567890123456789s\r\n";
        let status = Http1Chunk::decode(text);
        assert_eq!(status.consumed(), text.len());
        assert_eq!(status.into_value().unwrap().payload(), &Bytes::from_static(b"012345678901234567890123456789s"));

        let chunk = Http1Chunk::new(&b"012345678901234567890123456789s"[..]);
        assert_eq!(chunk.to_bytes(), Bytes::from_static(text));
    }

    #[test]
    fn uppercase_size_and_bare_breaks() {
        let status = Http1Chunk::decode(b"A\n0123456789\nnext");
        assert_eq!(status.consumed(), 13);
        assert_eq!(status.into_value().unwrap().payload().len(), 10);
    }

    #[test]
    fn truncated_chunks() {
        assert!(Http1Chunk::decode(b"").is_truncated());
        assert!(Http1Chunk::decode(b"1f").is_truncated());
        assert!(Http1Chunk::decode(b"1f\r").is_truncated());
        assert!(Http1Chunk::decode(b"5\r\nabc").is_truncated());
        assert!(Http1Chunk::decode(b"5\r\nabcde").is_truncated());
    }

    #[test]
    fn invalid_chunks() {
        assert!(Http1Chunk::decode(b"\r\n").is_invalid());
        assert!(Http1Chunk::decode(b"1g\r\n").is_invalid());
        assert!(Http1Chunk::decode(b"3\r\nabcd\r\n").is_invalid());
        assert!(Http1Chunk::decode(b"fffffffffffffffff").is_invalid());
    }
}
