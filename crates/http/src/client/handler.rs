use std::collections::VecDeque;
use std::mem;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http::Method;
use micro_netw::task::lock;
use micro_netw::{Completer, ConnectionHandler, HandlerCallbacks, ProtocolHandler};
use tracing::{debug, trace, warn};

use crate::client::message::ClientResponse;
use crate::codec::{ParseStatus, parse_response};
use crate::protocol::{ClientError, Http1Response, PendingBody, content_length, has_transfer_encoding};

pub type ExecuteResult = Result<Option<ClientResponse>, ClientError>;

pub(crate) struct Inflight {
    method: Method,
    completer: Completer<ExecuteResult>,
}

impl Inflight {
    pub(crate) fn new(method: Method, completer: Completer<ExecuteResult>) -> Self {
        Self { method, completer }
    }

    pub(crate) fn fail(self, error: ClientError) {
        self.completer.complete(Err(error));
    }
}

struct BodyReader {
    body: Arc<PendingBody>,
    remaining: usize,
}

#[derive(Default)]
struct ConnState {
    callbacks: Option<HandlerCallbacks>,
    inflight: VecDeque<Inflight>,
    body: Option<BodyReader>,
    closed: bool,
}

impl ConnState {
    /// Marks the connection dead and hands back everything still waiting on it.
    fn shut(&mut self, completions: &mut Vec<(Inflight, Option<ClientResponse>)>) {
        self.closed = true;
        if let Some(reader) = self.body.take() {
            reader.body.fail();
        }
        completions.extend(mem::take(&mut self.inflight).into_iter().map(|inflight| (inflight, None)));
    }
}

/// One client connection as seen from the application side.
pub(crate) struct ClientConn {
    addr: SocketAddr,
    state: Mutex<ConnState>,
}

impl ClientConn {
    pub(crate) fn new(addr: SocketAddr, first: Inflight) -> Self {
        let mut state = ConnState::default();
        state.inflight.push_back(first);
        Self { addr, state: Mutex::new(state) }
    }

    /// Queues another request on an open connection. Gives the request back
    /// when the connection can no longer carry it.
    pub(crate) fn send(&self, inflight: Inflight, output: Bytes) -> Result<(), Inflight> {
        let mut state = lock(&self.state);
        if state.closed {
            return Err(inflight);
        }
        let Some(callbacks) = state.callbacks.clone() else {
            return Err(inflight);
        };
        state.inflight.push_back(inflight);
        callbacks.output(output);
        Ok(())
    }

    /// Takes the first request back after the connection could not be opened.
    pub(crate) fn abandon(&self) -> Option<Inflight> {
        let mut state = lock(&self.state);
        state.closed = true;
        state.inflight.pop_front()
    }

    fn attach(&self, callbacks: HandlerCallbacks) {
        lock(&self.state).callbacks = Some(callbacks);
    }
}

/// Matches responses to the requests of one connection in FIFO order.
pub(crate) struct ClientHandler {
    callbacks: HandlerCallbacks,
    conn: Option<Arc<ClientConn>>,
}

impl ClientHandler {
    pub(crate) fn attach(&mut self, conn: Arc<ClientConn>) {
        conn.attach(self.callbacks.clone());
        self.conn = Some(conn);
    }

    fn response(
        &self,
        state: &mut ConnState,
        head: Http1Response,
        completions: &mut Vec<(Inflight, Option<ClientResponse>)>,
    ) {
        let Some(inflight) = state.inflight.pop_front() else {
            warn!(connection = %self.callbacks.connection_id(), "response without a request, closing");
            self.close(state, completions);
            return;
        };

        let (line, headers) = head.into_parts();
        let head_only = inflight.method == Method::HEAD;
        let chunked = !head_only && has_transfer_encoding(&headers);
        let length = if head_only { 0 } else { content_length(&headers) };

        let body = if chunked {
            let body = Arc::new(PendingBody::new());
            body.fail();
            body
        } else if length == 0 {
            Arc::new(PendingBody::completed(Bytes::new()))
        } else {
            let body = Arc::new(PendingBody::new());
            state.body = Some(BodyReader { body: Arc::clone(&body), remaining: length });
            body
        };

        trace!(connection = %self.callbacks.connection_id(), code = line.code(), length, "response received");
        completions.push((inflight, Some(ClientResponse::new(line, headers, body))));

        if chunked {
            debug!(connection = %self.callbacks.connection_id(), "transfer coded response, closing");
            self.close(state, completions);
        }
    }

    fn close(&self, state: &mut ConnState, completions: &mut Vec<(Inflight, Option<ClientResponse>)>) {
        state.shut(completions);
        self.callbacks.close();
    }
}

fn complete(completions: Vec<(Inflight, Option<ClientResponse>)>) {
    for (inflight, response) in completions {
        inflight.completer.complete(Ok(response));
    }
}

impl ConnectionHandler for ClientHandler {
    fn accept_input(&mut self, data: &[u8]) -> usize {
        let Some(conn) = self.conn.clone() else {
            return data.len();
        };

        let mut completions = Vec::new();
        let mut consumed = 0;
        {
            let mut state = lock(&conn.state);
            loop {
                if state.closed {
                    consumed = data.len();
                    break;
                }
                if let Some(reader) = &mut state.body {
                    let take = reader.remaining.min(data.len() - consumed);
                    reader.body.recv(&data[consumed..consumed + take]);
                    reader.remaining -= take;
                    consumed += take;
                    if reader.remaining > 0 {
                        break;
                    }
                    reader.body.complete();
                    state.body = None;
                    continue;
                }
                if consumed == data.len() {
                    break;
                }

                match parse_response(&data[consumed..]) {
                    ParseStatus::Valid { value, consumed: size } => {
                        consumed += size;
                        self.response(&mut state, value, &mut completions);
                    }
                    ParseStatus::Truncated => break,
                    ParseStatus::Invalid => {
                        warn!(connection = %self.callbacks.connection_id(), "malformed response, closing");
                        self.close(&mut state, &mut completions);
                    }
                }
            }
        }

        complete(completions);
        consumed
    }

    fn end_of_connection(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        debug!(connection = %self.callbacks.connection_id(), addr = %conn.addr, "client connection ended");

        let mut completions = Vec::new();
        lock(&conn.state).shut(&mut completions);
        complete(completions);
    }
}

pub(crate) struct HttpClientProtocol;

impl ProtocolHandler for HttpClientProtocol {
    fn create(&self, callbacks: HandlerCallbacks) -> Box<dyn ConnectionHandler> {
        Box::new(ClientHandler { callbacks, conn: None })
    }
}
