use std::collections::{HashMap, VecDeque};
use std::mem;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http::{Method, StatusCode};
use micro_netw::task::lock;
use micro_netw::{Completer, ConnectionHandler, ConnectionId, FnTask, HandlerCallbacks, ProtocolHandler, Task, downcast_handler};
use tracing::{debug, trace, warn};

use crate::codec::{ParseStatus, parse_request};
use crate::protocol::{Http1Request, PendingBody, content_length, has_transfer_encoding};
use crate::server::message::{Request, Response};

#[derive(Default)]
struct Queue {
    requests: VecDeque<Request>,
    waiters: VecDeque<Completer<Option<Request>>>,
    shutting_down: bool,
}

/// State shared by the server front end and every connection handler.
#[derive(Default)]
pub(crate) struct ServerShared {
    queue: Mutex<Queue>,
    connections: Mutex<HashMap<ConnectionId, Arc<Exchange>>>,
}

impl ServerShared {
    pub(crate) fn exchange(&self, id: ConnectionId) -> Option<Arc<Exchange>> {
        lock(&self.connections).get(&id).cloned()
    }

    pub(crate) fn next_request(&self) -> Task<Option<Request>> {
        let mut queue = lock(&self.queue);
        if let Some(request) = queue.requests.pop_front() {
            return Task::ready(Some(request));
        }
        if queue.shutting_down {
            return Task::ready(None);
        }

        let (task, completer) = FnTask::pending();
        queue.waiters.retain(|waiter| !waiter.is_abandoned());
        queue.waiters.push_back(completer);
        Task::from(task)
    }

    /// Hands `request` to the oldest waiter still listening, or queues it.
    fn deliver(&self, mut request: Request) {
        loop {
            let waiter = {
                let mut queue = lock(&self.queue);
                let waiter = queue.waiters.pop_front();
                if waiter.is_none() && !queue.shutting_down {
                    queue.requests.push_back(request);
                    return;
                }
                waiter
            };
            // only reachable once the server is shutting down
            let Some(waiter) = waiter else {
                request.respond_and_close(Response::closing(StatusCode::SERVICE_UNAVAILABLE));
                return;
            };

            match waiter.try_complete(Some(request)) {
                Ok(()) => return,
                Err(Some(returned)) => {
                    trace!(connection = %returned.connection_id(), "skipping abandoned request waiter");
                    request = returned;
                }
                Err(None) => return,
            }
        }
    }

    pub(crate) fn queued_requests(&self) -> usize {
        lock(&self.queue).requests.len()
    }

    fn is_shutting_down(&self) -> bool {
        lock(&self.queue).shutting_down
    }

    /// Resolves waiters with `None` and answers queued requests with `503`.
    pub(crate) fn shut_down(&self) {
        let (waiters, requests) = {
            let mut queue = lock(&self.queue);
            queue.shutting_down = true;
            (mem::take(&mut queue.waiters), mem::take(&mut queue.requests))
        };

        for waiter in waiters {
            waiter.complete(None);
        }
        for request in requests {
            request.respond_and_close(Response::closing(StatusCode::SERVICE_UNAVAILABLE));
        }
    }
}

struct Container {
    seq: u64,
    output: Option<Bytes>,
    close: bool,
}

#[derive(Default)]
struct ExchangeState {
    containers: VecDeque<Container>,
    next_seq: u64,
    closed: bool,
}

/// The responses of one connection, flushed in the order their requests arrived.
pub(crate) struct Exchange {
    callbacks: HandlerCallbacks,
    state: Mutex<ExchangeState>,
}

impl Exchange {
    fn new(callbacks: HandlerCallbacks) -> Self {
        Self { callbacks, state: Mutex::new(ExchangeState::default()) }
    }

    /// Reserves the next slot in the response order.
    fn open(&self) -> u64 {
        let mut state = lock(&self.state);
        let seq = state.next_seq;
        state.next_seq += 1;
        state.containers.push_back(Container { seq, output: None, close: false });
        seq
    }

    /// Stores the rendered response for `seq` and writes out every completed
    /// response at the front of the order.
    pub(crate) fn fulfil(&self, seq: u64, output: Bytes, close: bool) {
        let mut state = lock(&self.state);
        if state.closed {
            return;
        }
        let Some(container) = state.containers.iter_mut().find(|container| container.seq == seq) else {
            return;
        };
        container.output = Some(output);
        container.close = close;

        while state.containers.front().is_some_and(|container| container.output.is_some()) {
            let Some(container) = state.containers.pop_front() else {
                break;
            };
            if let Some(output) = container.output {
                trace!(connection = %self.callbacks.connection_id(), seq = container.seq, bytes = output.len(), "response flushed");
                self.callbacks.output(output);
            }
            if container.close {
                self.callbacks.close();
                state.closed = true;
                state.containers.clear();
            }
        }
    }

    fn close(&self) {
        let mut state = lock(&self.state);
        state.closed = true;
        state.containers.clear();
    }
}

struct BodyReader {
    body: Arc<PendingBody>,
    remaining: usize,
}

/// Reads request heads and `Content-Length` bodies from one connection.
pub(crate) struct ServerHandler {
    shared: Arc<ServerShared>,
    exchange: Arc<Exchange>,
    body: Option<BodyReader>,
    rejected: bool,
}

impl ServerHandler {
    fn connection_id(&self) -> ConnectionId {
        self.exchange.callbacks.connection_id()
    }

    /// Answers with `status` and closes, after the responses queued before it.
    fn reject(&mut self, status: StatusCode) {
        warn!(connection = %self.connection_id(), status = status.as_u16(), "rejecting request");
        self.rejected = true;
        let seq = self.exchange.open();
        self.exchange.fulfil(seq, Response::closing(status).render(false), true);
    }

    fn dispatch(&mut self, head: Http1Request) {
        if has_transfer_encoding(head.headers()) {
            return self.reject(StatusCode::NOT_IMPLEMENTED);
        }
        let Ok(method) = Method::from_bytes(head.line().method().as_bytes()) else {
            return self.reject(StatusCode::BAD_REQUEST);
        };
        let length = content_length(head.headers());
        if length > 0 && (method == Method::GET || method == Method::HEAD) {
            return self.reject(StatusCode::BAD_REQUEST);
        }
        if self.shared.is_shutting_down() {
            return self.reject(StatusCode::SERVICE_UNAVAILABLE);
        }

        let body = if length == 0 {
            Arc::new(PendingBody::completed(Bytes::new()))
        } else {
            let body = Arc::new(PendingBody::new());
            self.body = Some(BodyReader { body: Arc::clone(&body), remaining: length });
            body
        };

        debug!(connection = %self.connection_id(), %method, path = head.line().path(), length, "request received");
        let seq = self.exchange.open();
        let request = Request::new(Arc::clone(&self.shared), self.connection_id(), seq, method, head, body);
        self.shared.deliver(request);
    }

    /// Feeds the outstanding body; returns the bytes used.
    fn read_body(&mut self, data: &[u8]) -> usize {
        let Some(reader) = &mut self.body else {
            return 0;
        };
        let take = reader.remaining.min(data.len());
        reader.body.recv(&data[..take]);
        reader.remaining -= take;
        if reader.remaining == 0 {
            reader.body.complete();
            self.body = None;
        }
        take
    }
}

impl ConnectionHandler for ServerHandler {
    fn accept_input(&mut self, data: &[u8]) -> usize {
        let mut consumed = 0;
        loop {
            if self.rejected {
                return data.len();
            }
            if self.body.is_some() {
                consumed += self.read_body(&data[consumed..]);
                if self.body.is_some() {
                    return consumed;
                }
                continue;
            }
            if consumed == data.len() {
                return consumed;
            }

            match parse_request(&data[consumed..]) {
                ParseStatus::Valid { value, consumed: size } => {
                    consumed += size;
                    self.dispatch(value);
                }
                ParseStatus::Truncated => return consumed,
                ParseStatus::Invalid => self.reject(StatusCode::BAD_REQUEST),
            }
        }
    }

    fn end_of_connection(&mut self) {
        debug!(connection = %self.connection_id(), "http connection ended");
        if let Some(reader) = self.body.take() {
            reader.body.fail();
        }
        self.exchange.close();
    }
}

pub(crate) struct HttpServerProtocol {
    shared: Arc<ServerShared>,
}

impl HttpServerProtocol {
    pub(crate) fn new(shared: Arc<ServerShared>) -> Self {
        Self { shared }
    }
}

impl ProtocolHandler for HttpServerProtocol {
    fn create(&self, callbacks: HandlerCallbacks) -> Box<dyn ConnectionHandler> {
        let id = callbacks.connection_id();
        let exchange = Arc::new(Exchange::new(callbacks));
        lock(&self.shared.connections).insert(id, Arc::clone(&exchange));

        Box::new(ServerHandler { shared: Arc::clone(&self.shared), exchange, body: None, rejected: false })
    }

    fn release(&self, mut handler: Box<dyn ConnectionHandler>) {
        if let Some(handler) = downcast_handler::<ServerHandler>(&mut *handler) {
            let id = handler.connection_id();
            lock(&self.shared.connections).remove(&id);
            trace!(connection = %id, "http connection released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Http1RequestLine;
    use futures::executor::block_on;

    fn request(shared: &Arc<ServerShared>, path: &str) -> Request {
        let head = Http1Request::new(Http1RequestLine::new("GET", path, "HTTP/1.1"), Vec::new());
        let body = Arc::new(PendingBody::completed(Bytes::new()));
        Request::new(Arc::clone(shared), ConnectionId::from(1), 0, Method::GET, head, body)
    }

    #[test]
    fn dropped_waiter_is_skipped() {
        let shared = Arc::new(ServerShared::default());
        let gone = shared.next_request();
        let live = shared.next_request();
        drop(gone);

        shared.deliver(request(&shared, "/x"));

        let received = block_on(live).unwrap();
        assert_eq!(received.path(), "/x");
        assert!(lock(&shared.queue).requests.is_empty());
    }

    #[test]
    fn request_waits_when_every_waiter_is_gone() {
        let shared = Arc::new(ServerShared::default());
        drop(shared.next_request());

        shared.deliver(request(&shared, "/queued"));

        let queued = block_on(shared.next_request()).unwrap();
        assert_eq!(queued.path(), "/queued");
        assert!(lock(&shared.queue).waiters.is_empty());
    }

    #[test]
    fn requests_delivered_after_shutdown_are_not_queued() {
        let shared = Arc::new(ServerShared::default());
        shared.shut_down();

        shared.deliver(request(&shared, "/late"));

        assert!(lock(&shared.queue).requests.is_empty());
        assert!(block_on(shared.next_request()).is_none());
    }
}
