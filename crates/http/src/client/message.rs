use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use http::{Method, StatusCode};
use mime::Mime;
use micro_netw::Task;

use crate::protocol::{BodyResult, Http1HeaderLine, Http1Request, Http1RequestLine, Http1ResponseLine, PendingBody, find_header};

/// A request built by [`HttpClient::request`](crate::client::HttpClient::request).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRequest {
    method: Method,
    path: String,
    headers: Vec<Http1HeaderLine>,
    content: Option<(Mime, Bytes)>,
}

impl ClientRequest {
    pub(crate) fn new(method: Method, path: impl Into<String>) -> Self {
        Self { method, path: path.into(), headers: Vec::new(), content: None }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Sets the body; `Content-Type` and `Content-Length` are only sent when
    /// there is one.
    pub fn set_content(&mut self, content_type: Mime, content: impl Into<Bytes>) {
        self.content = Some((content_type, content.into()));
    }

    pub fn with_content(mut self, content_type: Mime, content: impl Into<Bytes>) -> Self {
        self.set_content(content_type, content);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(Http1HeaderLine::new(name, value));
        self
    }

    pub(crate) fn render(&self, host: &str, port: u16) -> Bytes {
        let host = if port == 80 { host.to_string() } else { format!("{host}:{port}") };

        let mut headers = Vec::with_capacity(self.headers.len() + 3);
        headers.push(Http1HeaderLine::new("Host", host));
        if let Some((content_type, content)) = &self.content {
            headers.push(Http1HeaderLine::new("Content-Type", content_type.to_string()));
            headers.push(Http1HeaderLine::new("Content-Length", content.len().to_string()));
        }
        headers.extend(self.headers.iter().cloned());

        let head = Http1Request::new(Http1RequestLine::new(self.method.as_str(), self.path.as_str(), "HTTP/1.1"), headers);
        let mut dst = BytesMut::new();
        head.encode(&mut dst);
        if let Some((_, content)) = &self.content {
            dst.extend_from_slice(content);
        }
        dst.freeze()
    }
}

/// A response matched to the request that caused it.
#[derive(Debug)]
pub struct ClientResponse {
    line: Http1ResponseLine,
    headers: Vec<Http1HeaderLine>,
    body: Arc<PendingBody>,
}

impl ClientResponse {
    pub(crate) fn new(line: Http1ResponseLine, headers: Vec<Http1HeaderLine>, body: Arc<PendingBody>) -> Self {
        Self { line, headers, body }
    }

    pub fn code(&self) -> u32 {
        self.line.code()
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.line.status()
    }

    pub fn description(&self) -> &str {
        self.line.description()
    }

    pub fn version(&self) -> &str {
        self.line.version()
    }

    pub fn headers(&self) -> &[Http1HeaderLine] {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Resolves once the body arrived. A body cut short by the connection, or
    /// sent with a transfer coding, resolves unsuccessfully.
    pub fn body(&self) -> Task<BodyResult> {
        self.body.body()
    }
}
