use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::protocol::Http1HeaderLine;

/// `METHOD SP PATH [SP VERSION]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Http1RequestLine {
    method: String,
    path: String,
    version: String,
}

impl Http1RequestLine {
    pub fn new(method: impl Into<String>, path: impl Into<String>, version: impl Into<String>) -> Self {
        Self { method: method.into(), path: path.into(), version: version.into() }
    }

    /// Parses a request line without its line break.
    ///
    /// Runs of blanks separate the parts; the version may be missing, which
    /// leaves it empty.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_ascii_whitespace();
        let method = parts.next()?;
        let path = parts.next()?;
        let version = parts.next().unwrap_or_default();
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(method, path, version))
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Empty for a version-less request line.
    pub fn version(&self) -> &str {
        &self.version
    }
}

impl fmt::Display for Http1RequestLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.version.is_empty() {
            write!(f, "{} {}", self.method, self.path)
        } else {
            write!(f, "{} {} {}", self.method, self.path, self.version)
        }
    }
}

/// A request line and its headers, without the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Http1Request {
    line: Http1RequestLine,
    headers: Vec<Http1HeaderLine>,
}

impl Http1Request {
    pub fn new(line: Http1RequestLine, headers: Vec<Http1HeaderLine>) -> Self {
        Self { line, headers }
    }

    pub fn line(&self) -> &Http1RequestLine {
        &self.line
    }

    pub fn headers(&self) -> &[Http1HeaderLine] {
        &self.headers
    }

    pub fn into_parts(self) -> (Http1RequestLine, Vec<Http1HeaderLine>) {
        (self.line, self.headers)
    }

    /// Appends `line CRLF (header CRLF)* CRLF` to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        encode_head(&self.line, &self.headers, dst);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut dst = BytesMut::new();
        self.encode(&mut dst);
        dst.freeze()
    }
}

impl fmt::Display for Http1Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\r\n", self.line)?;
        for header in &self.headers {
            write!(f, "{header}\r\n")?;
        }
        f.write_str("\r\n")
    }
}

pub(crate) fn encode_head(line: &impl fmt::Display, headers: &[Http1HeaderLine], dst: &mut BytesMut) {
    use std::fmt::Write;

    struct Writer<'a>(&'a mut BytesMut);

    impl Write for Writer<'_> {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            self.0.put_slice(s.as_bytes());
            Ok(())
        }
    }

    let mut writer = Writer(dst);
    // writing into a BytesMut cannot fail
    let _ = write!(writer, "{line}\r\n");
    for header in headers {
        let _ = write!(writer, "{header}\r\n");
    }
    writer.0.put_slice(b"\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_request_line() {
        let line = Http1RequestLine::parse("GET /").unwrap();
        assert_eq!(line.method(), "GET");
        assert_eq!(line.path(), "/");
        assert_eq!(line.version(), "");

        let line = Http1RequestLine::parse(" GET  /  HTTP/1.1").unwrap();
        assert_eq!(line.method(), "GET");
        assert_eq!(line.path(), "/");
        assert_eq!(line.version(), "HTTP/1.1");
    }

    #[test]
    fn request_line_round_trip() {
        for text in ["GET /", "POST /test HTTP/1.1", "delete /a/b?c=d HTTP/1.0"] {
            let line = Http1RequestLine::parse(text).unwrap();
            assert_eq!(line.to_string(), text);
            assert_eq!(Http1RequestLine::parse(&line.to_string()).unwrap(), line);
        }
    }

    #[test]
    fn invalid_request_lines() {
        assert!(Http1RequestLine::parse("").is_none());
        assert!(Http1RequestLine::parse("GET").is_none());
        assert!(Http1RequestLine::parse("GET / HTTP/1.1 extra").is_none());
    }

    #[test]
    fn serialize_request() {
        let request = Http1Request::new(
            Http1RequestLine::new("GET", "/", "HTTP/1.1"),
            vec![Http1HeaderLine::new("Accept", "text/html")],
        );

        assert_eq!(request.to_string(), "GET / HTTP/1.1\r\nAccept: text/html\r\n\r\n");
        assert_eq!(&request.to_bytes()[..], b"GET / HTTP/1.1\r\nAccept: text/html\r\n\r\n");
    }
}
