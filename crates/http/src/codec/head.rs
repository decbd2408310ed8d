use crate::codec::line::{Incomplete, as_str, next_line};
use crate::protocol::{Http1HeaderLine, Http1Request, Http1RequestLine, Http1Response, Http1ResponseLine};
use crate::utils::ensure;

/// Outcome of parsing the front of a byte buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseStatus<T> {
    /// `consumed` bytes form `value`.
    Valid { value: T, consumed: usize },
    /// Nothing is wrong yet but the value does not end within the buffer.
    Truncated,
    Invalid,
}

impl<T> ParseStatus<T> {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }

    pub fn is_truncated(&self) -> bool {
        matches!(self, Self::Truncated)
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid)
    }

    /// Bytes used by a valid value, 0 otherwise.
    pub fn consumed(&self) -> usize {
        match self {
            Self::Valid { consumed, .. } => *consumed,
            Self::Truncated | Self::Invalid => 0,
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Valid { value, .. } => Some(value),
            Self::Truncated | Self::Invalid => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Valid { value, .. } => Some(value),
            Self::Truncated | Self::Invalid => None,
        }
    }
}

impl<T> From<Result<(T, usize), Incomplete>> for ParseStatus<T> {
    fn from(result: Result<(T, usize), Incomplete>) -> Self {
        match result {
            Ok((value, consumed)) => Self::Valid { value, consumed },
            Err(Incomplete::Truncated) => Self::Truncated,
            Err(Incomplete::Invalid) => Self::Invalid,
        }
    }
}

/// Parses a request head from the front of `src`.
///
/// A request line without a version is a complete head on its own, but only
/// for `GET`. Otherwise headers follow until an empty line.
pub fn parse_request(src: &[u8]) -> ParseStatus<Http1Request> {
    request_head(src).into()
}

/// Parses a response head from the front of `src`.
pub fn parse_response(src: &[u8]) -> ParseStatus<Http1Response> {
    response_head(src).into()
}

fn request_head(src: &[u8]) -> Result<(Http1Request, usize), Incomplete> {
    let (line, consumed) = next_line(src)?;
    ensure!(!line.is_empty(), Incomplete::Invalid);
    let line = Http1RequestLine::parse(as_str(line)?).ok_or(Incomplete::Invalid)?;

    if line.version().is_empty() {
        ensure!(line.method().eq_ignore_ascii_case("GET"), Incomplete::Invalid);
        return Ok((Http1Request::new(line, Vec::new()), consumed));
    }

    let (headers, header_bytes) = header_block(&src[consumed..])?;
    Ok((Http1Request::new(line, headers), consumed + header_bytes))
}

fn response_head(src: &[u8]) -> Result<(Http1Response, usize), Incomplete> {
    let (line, consumed) = next_line(src)?;
    let line = Http1ResponseLine::parse(as_str(line)?).ok_or(Incomplete::Invalid)?;

    let (headers, header_bytes) = header_block(&src[consumed..])?;
    Ok((Http1Response::new(line, headers), consumed + header_bytes))
}

fn header_block(src: &[u8]) -> Result<(Vec<Http1HeaderLine>, usize), Incomplete> {
    let mut headers = Vec::new();
    let mut consumed = 0;
    loop {
        let (line, size) = next_line(&src[consumed..])?;
        consumed += size;
        if line.is_empty() {
            return Ok((headers, consumed));
        }
        headers.push(Http1HeaderLine::parse(as_str(line)?).ok_or(Incomplete::Invalid)?);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn request_head_states() {
        assert!(parse_request(b"").is_truncated());
        assert!(parse_request(b"GET /").is_truncated());
        assert!(parse_request(b"GET / HTTP/1.1").is_truncated());
        assert!(parse_request(b"GET / HTTP/1.1\r\n").is_truncated());
        assert!(parse_request(b"GET / HTTP/1.1\r\nAccept: text/html").is_truncated());
        assert!(parse_request(b"GET / HTTP/1.1\r\nAccept: text/html\r\n").is_truncated());
        assert!(parse_request(b"GET / HTTP/1.1\r\nAccept: text/html\r\n\r").is_truncated());

        let text = b"GET / HTTP/1.1\r\nAccept: text/html\r\n\r\n";
        let status = parse_request(text);
        assert!(status.is_valid());
        assert_eq!(status.consumed(), text.len());
        assert_eq!(status.into_value().unwrap().to_bytes(), &text[..]);
    }

    #[test]
    fn versionless_get() {
        let status = parse_request(b"GET /\r\n");
        assert!(status.is_valid());
        assert_eq!(status.consumed(), 7);
        assert!(status.value().unwrap().headers().is_empty());

        assert!(parse_request(b"get /index.html\n").is_valid());
        assert!(parse_request(b"POST /\r\n").is_invalid());
    }

    #[test]
    fn invalid_request_heads() {
        assert!(parse_request(b"\r\nGET / HTTP/1.1\r\n\r\n").is_invalid());
        assert!(parse_request(b"GET\r\n\r\n").is_invalid());
        assert!(parse_request(b"GET / HTTP/1.1\r\nno colon\r\n\r\n").is_invalid());
        assert!(parse_request(b"GET / HTTP/1.1\r\n: empty\r\n\r\n").is_invalid());
        assert!(parse_request(b"GET /\xff HTTP/1.1\r\n\r\n").is_invalid());
    }

    #[test]
    fn request_from_curl() {
        let str = indoc! {r##"
        GET /index.html HTTP/1.1
        Host: 127.0.0.1:8080
        User-Agent: curl/7.79.1
        Accept: */*

        123"##};

        let status = parse_request(str.as_bytes());
        assert_eq!(status.consumed(), str.len() - 3);

        let (line, headers) = status.into_value().unwrap().into_parts();
        assert_eq!(line.method(), "GET");
        assert_eq!(line.path(), "/index.html");
        assert_eq!(line.version(), "HTTP/1.1");
        assert_eq!(headers.len(), 3);
        assert_eq!(headers[0], Http1HeaderLine::new("Host", "127.0.0.1:8080"));
        assert_eq!(headers[2], Http1HeaderLine::new("Accept", "*/*"));
    }

    #[test]
    fn response_head_states() {
        let text = b"HTTP/1.1 200 OK\r\nContent-Length: 13\r\n\r\n";
        let status = parse_response(text);
        assert_eq!(status.consumed(), text.len());

        let response = status.into_value().unwrap();
        assert_eq!(response.line().version(), "HTTP/1.1");
        assert_eq!(response.line().code(), 200);
        assert_eq!(response.line().description(), "OK");
        assert_eq!(response.headers(), &[Http1HeaderLine::new("Content-Length", "13")]);

        assert!(parse_response(b"HTTP/1.1 200 OK\nContent-Length: 13\n\n").is_valid());
        assert!(parse_response(b"HTTP/1.1 200 OK\r\nContent-Length: 13\r\n\r").is_truncated());
        assert!(parse_response(b"HTTP/1.1 200 OK\r\nContent-Length: 13\r\n").is_truncated());
        assert!(parse_response(b"HTTP/1.1 200 OK\r\nConte").is_truncated());
        assert!(parse_response(b"HTTP/1.1 200 OK").is_truncated());
        assert!(parse_response(b"HTTP/1.1").is_truncated());
        assert!(parse_response(b"").is_truncated());
    }

    #[test]
    fn invalid_response_heads() {
        assert!(parse_response(b"OK\r\n\r\n").is_invalid());
        assert!(parse_response(b"HTTP/1.1 200\r\n\r\n").is_invalid());
        assert!(parse_response(b"HTTP/1.1 200 OK\r\nbroken\r\n\r\n").is_invalid());
    }

    #[test]
    fn rendered_heads_parse_back() {
        let request = Http1Request::new(
            Http1RequestLine::new("POST", "/test", "HTTP/1.1"),
            vec![Http1HeaderLine::new("Host", "localhost"), Http1HeaderLine::new("Content-Length", "5")],
        );
        let bytes = request.to_bytes();
        assert_eq!(parse_request(&bytes), ParseStatus::Valid { value: request, consumed: bytes.len() });

        let response = Http1Response::new(Http1ResponseLine::new("HTTP/1.1", 404, "Not Found"), Vec::new());
        let bytes = response.to_bytes();
        assert_eq!(parse_response(&bytes), ParseStatus::Valid { value: response, consumed: bytes.len() });
    }
}
