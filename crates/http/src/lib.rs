//! A micro HTTP/1.1 server and client on a poll based reactor
//!
//! This crate speaks HTTP/1.1 over the connections multiplexed by `micro-netw`.
//! The server and the client are protocol handlers plugged into a
//! [`micro_netw::NetwServer`]; the reactor runs on a thread of its own while the
//! application talks to it through futures.
//!
//! # Features
//!
//! - Request and response heads with tolerant line breaks (CR, LF, CRLF, LFCR)
//! - `Content-Length` framed bodies, received while the application waits
//! - Pipelined requests, answered in arrival order whatever order responses are produced in
//! - Several in-flight client requests per connection, matched first in first out
//! - A chunked transfer coding codec, not wired into the read paths
//!
//! # Example
//!
//! ```no_run
//! use std::thread;
//! use http::{Method, StatusCode};
//! use tracing::{Level, info};
//! use tracing_subscriber::FmtSubscriber;
//! use micro_http::client::HttpClient;
//! use micro_http::server::{HttpServer, Response};
//!
//! let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
//! tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
//!
//! let server = HttpServer::bind(8080).unwrap();
//! let runner = server.clone();
//! thread::spawn(move || runner.run());
//!
//! let client = HttpClient::builder().build().unwrap();
//! let runner = client.clone();
//! thread::spawn(move || runner.run());
//!
//! futures::executor::block_on(async {
//!     let request = client.request(Method::POST, "/test").with_content(mime::TEXT_PLAIN, "hello");
//!     let response = client.execute("127.0.0.1", 8080, &request);
//!
//!     let incoming = server.next_request().await.unwrap();
//!     let body = incoming.body().await;
//!     incoming.respond(Response::from_status(StatusCode::OK).with_content(mime::TEXT_PLAIN, body.into_content()));
//!
//!     let response = response.await.unwrap().unwrap();
//!     info!(code = response.code(), "got response");
//! });
//! ```
//!
//! # Architecture
//!
//! - [`protocol`]: message head values, body records and errors
//! - [`codec`]: tri-state parsers and the `tokio_util` codec adapters
//! - [`server`]: [`server::HttpServer`], requests and responses
//! - [`client`]: [`client::HttpClient`] and its response correlation
//!
//! # Limitations
//!
//! - HTTP/1.1 only, no TLS of its own
//! - Requests with a `Transfer-Encoding` are refused with `501`, chunked responses
//!   fail their body and close the connection
//! - Output buffering is unbounded

pub mod client;
pub mod codec;
pub mod protocol;
pub mod server;

mod utils;
