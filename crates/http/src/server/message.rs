use std::fmt;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use http::{Method, StatusCode};
use mime::Mime;
use micro_netw::{ConnectionId, Task};
use tracing::{debug, warn};

use crate::protocol::{BodyResult, Http1HeaderLine, Http1Request, Http1Response, Http1ResponseLine, PendingBody, find_header};
use crate::server::handler::ServerShared;

/// A response the application hands back through [`Request::respond`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    code: u32,
    description: String,
    content_type: Mime,
    headers: Vec<Http1HeaderLine>,
    content: Bytes,
}

impl Response {
    pub fn new(code: u32, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
            content_type: mime::APPLICATION_OCTET_STREAM,
            headers: Vec::new(),
            content: Bytes::new(),
        }
    }

    /// A response with the canonical reason phrase of `status`.
    pub fn from_status(status: StatusCode) -> Self {
        Self::new(u32::from(status.as_u16()), status.canonical_reason().unwrap_or("Unknown"))
    }

    pub fn with_content(mut self, content_type: Mime, content: impl Into<Bytes>) -> Self {
        self.set_content(content_type, content);
        self
    }

    pub fn set_content(&mut self, content_type: Mime, content: impl Into<Bytes>) {
        self.content_type = content_type;
        self.content = content.into();
    }

    /// Adds a header after `Content-Type` and `Content-Length`.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(Http1HeaderLine::new(name, value));
        self
    }

    pub fn code(&self) -> u32 {
        self.code
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn content_type(&self) -> &Mime {
        &self.content_type
    }

    pub fn content(&self) -> &Bytes {
        &self.content
    }

    pub(crate) fn closing(status: StatusCode) -> Self {
        Self::from_status(status).header("Connection", "close")
    }

    /// Renders head and body; a response to `HEAD` keeps its `Content-Length`
    /// but drops the body.
    pub(crate) fn render(&self, head_only: bool) -> Bytes {
        let mut headers = Vec::with_capacity(self.headers.len() + 2);
        headers.push(Http1HeaderLine::new("Content-Type", self.content_type.to_string()));
        headers.push(Http1HeaderLine::new("Content-Length", self.content.len().to_string()));
        headers.extend(self.headers.iter().cloned());

        let head = Http1Response::new(Http1ResponseLine::new("HTTP/1.1", self.code, self.description.as_str()), headers);
        let mut dst = BytesMut::new();
        head.encode(&mut dst);
        if !head_only {
            dst.extend_from_slice(&self.content);
        }
        dst.freeze()
    }
}

/// One request read from a connection.
///
/// Responding consumes the request. A request dropped without a response is
/// answered with `500 Internal Server Error`.
pub struct Request {
    shared: Arc<ServerShared>,
    connection: ConnectionId,
    seq: u64,
    method: Method,
    head: Http1Request,
    body: Arc<PendingBody>,
    answered: bool,
}

impl Request {
    pub(crate) fn new(
        shared: Arc<ServerShared>,
        connection: ConnectionId,
        seq: u64,
        method: Method,
        head: Http1Request,
        body: Arc<PendingBody>,
    ) -> Self {
        Self { shared, connection, seq, method, head, body, answered: false }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        self.head.line().path()
    }

    pub fn version(&self) -> &str {
        self.head.line().version()
    }

    pub fn headers(&self) -> &[Http1HeaderLine] {
        self.head.headers()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(self.head.headers(), name)
    }

    /// Resolves once the body has fully arrived, or failed because the
    /// connection went away first.
    pub fn body(&self) -> Task<BodyResult> {
        self.body.body()
    }

    pub fn respond(mut self, response: Response) {
        self.answer(&response, false);
    }

    pub(crate) fn respond_and_close(mut self, response: Response) {
        self.answer(&response, true);
    }

    fn answer(&mut self, response: &Response, close: bool) {
        self.answered = true;
        let Some(exchange) = self.shared.exchange(self.connection) else {
            debug!(connection = %self.connection, "connection gone, dropping response");
            return;
        };
        let output = response.render(self.method == Method::HEAD);
        exchange.fulfil(self.seq, output, close);
    }
}

impl Drop for Request {
    fn drop(&mut self) {
        if !self.answered {
            warn!(connection = %self.connection, path = self.path(), "request dropped without a response");
            self.answer(&Response::closing(StatusCode::INTERNAL_SERVER_ERROR), true);
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("connection", &self.connection)
            .field("method", &self.method)
            .field("path", &self.path())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_content_headers_first() {
        let response = Response::from_status(StatusCode::OK).with_content(mime::TEXT_PLAIN, "hello").header("X-Id", "7");

        assert_eq!(
            &response.render(false)[..],
            b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 5\r\nX-Id: 7\r\n\r\nhello"
        );
    }

    #[test]
    fn head_responses_omit_the_body() {
        let response = Response::new(200, "OK").with_content(mime::TEXT_PLAIN, "hello");
        assert_eq!(&response.render(true)[..], b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 5\r\n\r\n");
    }

    #[test]
    fn default_content_type() {
        let response = Response::closing(StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.content_type(), &mime::APPLICATION_OCTET_STREAM);
        assert_eq!(
            &response.render(false)[..],
            &b"HTTP/1.1 503 Service Unavailable\r\nContent-Type: application/octet-stream\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"[..]
        );
    }
}
