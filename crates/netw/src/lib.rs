//! A single threaded, poll based connection multiplexer
//!
//! This crate is the engine underneath `micro-http`. It multiplexes many TCP
//! connections over one `poll(2)` call and hands their bytes to pluggable
//! protocol handlers.
//!
//! # Architecture
//!
//! - [`fd`]: owned descriptors with non-blocking socket and pipe operations
//! - [`poller`]: the readiness wait, queued as a job and run by [`poller::Poller::runner`]
//! - [`task`]: exactly-once futures bridging callbacks and `async` code
//! - [`handler`]: the [`ProtocolHandler`]/[`ConnectionHandler`] seam
//! - [`server`]: [`NetwServer`], the accept, command and poll loops
//!
//! Cross-thread interaction is limited to [`NetwServer::stop`],
//! [`NetwServer::connect`] and the [`HandlerCallbacks`] given to every
//! handler. All of them end up as a byte on the server's command pipe.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use micro_netw::{EchoProtocol, NetwServer};
//!
//! let server = NetwServer::builder().port(8080).build(Arc::new(EchoProtocol)).unwrap();
//! server.run().unwrap();
//! ```

pub mod fd;
pub mod handler;
pub mod poller;
pub mod server;
pub mod task;

mod echo;
mod error;
mod mailbox;
mod passthrough;

pub use echo::{EchoHandler, EchoProtocol};
pub use error::{FdError, NetwError};
pub use handler::{ConnectionHandler, ConnectionHandlerHandle, HandlerCallbacks, ProtocolHandler, downcast_handler};
pub use passthrough::{PassThroughHandler, PassThroughProtocol, PlainTransport, Transport};
pub use server::{ConnectionId, NetwConfig, NetwServer, NetwServerBuilder, ServerState};
pub use task::{Completer, FnTask, Task};
