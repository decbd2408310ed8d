//! HTTP/1.1 server on top of a [`NetwServer`].
//!
//! Every connection is read one request head at a time. Requests are queued in
//! arrival order and handed out by [`HttpServer::next_request`]; responses may
//! be produced on any thread and in any order, each connection still writes
//! them in the order its requests arrived.
//!
//! Bodies are framed by `Content-Length` only. A request announcing a
//! `Transfer-Encoding` is answered with `501 Not Implemented`.
//!
//! # Example
//!
//! ```no_run
//! use std::thread;
//! use micro_http::server::{HttpServer, Response};
//! use http::StatusCode;
//!
//! let server = HttpServer::builder().port(8080).build().unwrap();
//! let runner = server.clone();
//! thread::spawn(move || runner.run());
//!
//! futures::executor::block_on(async {
//!     while let Some(request) = server.next_request().await {
//!         let body = request.body().await;
//!         request.respond(Response::from_status(StatusCode::OK).with_content(mime::TEXT_PLAIN, body.into_content()));
//!     }
//! });
//! ```

mod handler;
mod message;

use std::sync::Arc;
use std::time::Duration;

use micro_netw::{NetwError, NetwServer, NetwServerBuilder, Task};
use tracing::info;

use handler::{HttpServerProtocol, ServerShared};

pub use message::{Request, Response};

#[derive(Debug)]
pub struct HttpServerBuilder {
    netw: NetwServerBuilder,
}

impl HttpServerBuilder {
    fn new() -> Self {
        Self { netw: NetwServer::builder() }
    }

    /// Port to listen on, 0 picks an ephemeral one.
    pub fn port(mut self, port: u16) -> Self {
        self.netw = self.netw.port(port);
        self
    }

    pub fn backlog(mut self, backlog: i32) -> Self {
        self.netw = self.netw.backlog(backlog);
        self
    }

    pub fn poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.netw = self.netw.poll_timeout(poll_timeout);
        self
    }

    pub fn build(self) -> Result<HttpServer, NetwError> {
        let shared = Arc::new(ServerShared::default());
        let netw = self.netw.build(Arc::new(HttpServerProtocol::new(Arc::clone(&shared))))?;
        Ok(HttpServer { netw, shared })
    }
}

#[derive(Clone)]
pub struct HttpServer {
    netw: Arc<NetwServer>,
    shared: Arc<ServerShared>,
}

impl HttpServer {
    pub fn builder() -> HttpServerBuilder {
        HttpServerBuilder::new()
    }

    pub fn bind(port: u16) -> Result<Self, NetwError> {
        Self::builder().port(port).build()
    }

    pub fn local_port(&self) -> Option<u16> {
        self.netw.local_port()
    }

    /// Runs the reactor on the calling thread until [`HttpServer::stop`].
    pub fn run(&self) -> Result<(), NetwError> {
        info!(port = self.local_port(), "http server running");
        let result = self.netw.run();
        self.shared.shut_down();
        result
    }

    /// Stops accepting requests and shuts the reactor down.
    ///
    /// Pending [`HttpServer::next_request`] calls resolve with `None` and
    /// requests nobody picked up yet are answered with `503`.
    pub fn stop(&self) {
        info!("http server stopping");
        self.shared.shut_down();
        self.netw.stop();
    }

    /// The next request, in arrival order across all connections; `None` once
    /// the server is stopped.
    pub fn next_request(&self) -> Task<Option<Request>> {
        self.shared.next_request()
    }

    /// Requests read from the wire that no consumer has picked up yet.
    pub fn queued_requests(&self) -> usize {
        self.shared.queued_requests()
    }
}

impl std::fmt::Debug for HttpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpServer").field("netw", &self.netw).finish_non_exhaustive()
    }
}
