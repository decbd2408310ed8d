//! HTTP/1.1 client carried by a client-only [`NetwServer`].
//!
//! Requests are written as soon as [`HttpClient::execute`] is called. Each
//! connection matches responses to its requests strictly in the order the
//! requests were sent, so several requests may be in flight on one connection.
//! When a connection breaks, every request still waiting on it resolves with
//! `Ok(None)`, oldest first.

mod handler;
mod message;

use std::collections::HashMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use http::Method;
use micro_netw::task::lock;
use micro_netw::{FnTask, NetwError, NetwServer, Task, downcast_handler};
use tracing::{debug, info};

use crate::protocol::ClientError;
use handler::{ClientConn, ClientHandler, HttpClientProtocol, Inflight};

pub use handler::ExecuteResult;
pub use message::{ClientRequest, ClientResponse};

const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    poll_timeout: Duration,
    reuse_connections: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { poll_timeout: DEFAULT_POLL_TIMEOUT, reuse_connections: true }
    }
}

impl ClientConfig {
    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }

    pub fn reuse_connections(&self) -> bool {
        self.reuse_connections
    }
}

#[derive(Debug, Default)]
pub struct HttpClientBuilder {
    config: ClientConfig,
}

impl HttpClientBuilder {
    pub fn poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.config.poll_timeout = poll_timeout;
        self
    }

    /// Whether a request may go out on an open connection to the same address.
    pub fn reuse_connections(mut self, reuse_connections: bool) -> Self {
        self.config.reuse_connections = reuse_connections;
        self
    }

    pub fn build(self) -> Result<HttpClient, NetwError> {
        let netw = NetwServer::builder().poll_timeout(self.config.poll_timeout).build(Arc::new(HttpClientProtocol))?;
        Ok(HttpClient { netw, config: self.config, registry: Arc::default() })
    }
}

type Registry = Mutex<HashMap<SocketAddr, Arc<ClientConn>>>;

#[derive(Clone)]
pub struct HttpClient {
    netw: Arc<NetwServer>,
    config: ClientConfig,
    registry: Arc<Registry>,
}

impl HttpClient {
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Runs the reactor on the calling thread until [`HttpClient::stop`].
    pub fn run(&self) -> Result<(), NetwError> {
        info!("http client running");
        self.netw.run()
    }

    /// Shuts the reactor down; requests still in flight resolve with `Ok(None)`.
    pub fn stop(&self) {
        self.netw.stop();
    }

    pub fn request(&self, method: Method, path: impl Into<String>) -> ClientRequest {
        ClientRequest::new(method, path)
    }

    /// Sends `request` to `host:port`.
    ///
    /// Resolves with the response, with `Ok(None)` when the connection broke
    /// before the response arrived, or with an error when the request could
    /// not be sent at all.
    pub fn execute(&self, host: &str, port: u16, request: &ClientRequest) -> Task<ExecuteResult> {
        let addr = match resolve(host, port) {
            Ok(addr) => addr,
            Err(e) => return Task::ready(Err(e)),
        };

        let output = request.render(host, port);
        let (task, completer) = FnTask::pending();
        let inflight = Inflight::new(request.method().clone(), completer);

        let mut registry = lock(&self.registry);
        let inflight = match registry.get(&addr).filter(|_| self.config.reuse_connections) {
            Some(conn) => match conn.send(inflight, output.clone()) {
                Ok(()) => {
                    debug!(%addr, method = %request.method(), path = request.path(), "request sent on open connection");
                    return Task::from(task);
                }
                Err(inflight) => inflight,
            },
            None => inflight,
        };

        let conn = Arc::new(ClientConn::new(addr, inflight));
        let attached = Arc::clone(&conn);
        let connected = self.netw.connect(&address_bytes(&addr), addr.port(), output, move |handler| {
            if let Some(handler) = downcast_handler::<ClientHandler>(handler) {
                handler.attach(attached);
            }
        });

        match connected {
            Ok(id) => {
                debug!(%addr, connection = %id, method = %request.method(), path = request.path(), "request sent on new connection");
                if self.config.reuse_connections {
                    registry.insert(addr, conn);
                }
            }
            Err(e) => {
                registry.remove(&addr);
                drop(registry);
                if let Some(inflight) = conn.abandon() {
                    inflight.fail(ClientError::from(e));
                }
            }
        }

        Task::from(task)
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient").field("config", &self.config).finish_non_exhaustive()
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, ClientError> {
    let mut addrs = (host, port).to_socket_addrs().map_err(|e| ClientError::resolve(host, e))?;
    addrs.next().ok_or_else(|| ClientError::no_address(host))
}

fn address_bytes(addr: &SocketAddr) -> Vec<u8> {
    match addr {
        SocketAddr::V4(addr) => addr.ip().octets().to_vec(),
        SocketAddr::V6(addr) => addr.ip().octets().to_vec(),
    }
}
