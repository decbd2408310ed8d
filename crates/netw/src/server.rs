//! The connection multiplexer.
//!
//! A [`NetwServer`] owns a [`Poller`], an optional listening socket, a command
//! pipe and every live [`Connection`]. [`NetwServer::run`] drives three
//! cooperative loops on a single thread:
//!
//! - the accept loop takes new connections off the listener,
//! - the command loop reads the pipe: `'w'` flushes the output mailbox into
//!   connection buffers, `'q'` starts the shutdown,
//! - the poll loop waits for readiness and pumps bytes between sockets and
//!   their [`ConnectionHandler`]s.
//!
//! Shutdown is staged: the command loop stops accepting, the accept loop then
//! stops polling, and the poll loop ends the run. Connections still open at
//! that point get a last write attempt and their `end_of_connection` call.

use std::collections::BTreeMap;
use std::fmt;
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use futures::executor::LocalPool;
use futures::task::LocalSpawnExt;
use tracing::{debug, error, info, trace, warn};

use crate::error::NetwError;
use crate::fd::Fd;
use crate::handler::{ConnectionHandler, ConnectionHandlerHandle, HandlerCallbacks, ProtocolHandler};
use crate::mailbox::{MailboxItem, OutputMailbox, QUIT_COMMAND, WAKE_COMMAND};
use crate::poller::{Interest, Poller, PollerResult, Readiness};
use crate::task::{Completer, Task, lock};

const DEFAULT_BACKLOG: i32 = 20;
const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(10_000);
const DEFAULT_READ_CHUNK_SIZE: usize = 16 * 1024;
const COMMAND_CHUNK_SIZE: usize = 16;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process wide unique id of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for ConnectionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerState {
    Initial = 0,
    Running = 1,
    Draining = 2,
    Stopped = 3,
}

impl ServerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Initial,
            1 => Self::Running,
            2 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

/// One TCP peer and its buffers.
struct Connection {
    id: ConnectionId,
    fd: Fd,
    input: BytesMut,
    output: BytesMut,
    handler: ConnectionHandlerHandle,
    close_after_flush: bool,
    registered: bool,
    ended: bool,
}

impl Connection {
    fn new(id: ConnectionId, fd: Fd, handler: ConnectionHandlerHandle) -> Self {
        Self {
            id,
            fd,
            input: BytesMut::new(),
            output: BytesMut::new(),
            handler,
            close_after_flush: false,
            registered: false,
            ended: false,
        }
    }

    fn interest(&self) -> Interest {
        Interest { read: true, write: !self.output.is_empty(), error: true }
    }

    /// Writes as much buffered output as the socket takes.
    fn flush_output(&mut self) -> bool {
        match self.fd.write(&self.output) {
            Ok(n) => {
                trace!(connection = %self.id, size = n, remaining = self.output.len() - n, "wrote output");
                self.output.advance(n);
                true
            }
            Err(e) => {
                debug!(connection = %self.id, cause = %e, "write failed");
                false
            }
        }
    }

    /// Offers buffered input to the handler until it stops making progress.
    fn feed_handler(&mut self) {
        while !self.input.is_empty() {
            let consumed = self.handler.accept_input(&self.input);
            if consumed == 0 {
                break;
            }
            self.input.advance(consumed.min(self.input.len()));
        }
    }

    fn end(&mut self) {
        if !self.ended {
            self.ended = true;
            self.handler.end_of_connection();
        }
    }
}

#[derive(Default)]
struct Clients {
    connections: BTreeMap<ConnectionId, Connection>,
    closed: bool,
}

/// Tasks parked until a descriptor becomes readable.
#[derive(Clone, Default)]
struct ReadyWaiters {
    waiters: Arc<Mutex<Vec<Completer<bool>>>>,
}

impl ReadyWaiters {
    fn wait(&self) -> Task<bool> {
        let waiters = Arc::clone(&self.waiters);
        Task::from_fn(move |completer| lock(&waiters).push(completer))
    }

    fn fire(&self, ready: bool) {
        let waiters = std::mem::take(&mut *lock(&self.waiters));
        for waiter in waiters {
            waiter.complete(ready);
        }
    }
}

#[derive(Debug, Clone)]
pub struct NetwConfig {
    port: Option<u16>,
    backlog: i32,
    poll_timeout: Duration,
    read_chunk_size: usize,
}

impl Default for NetwConfig {
    fn default() -> Self {
        Self { port: None, backlog: DEFAULT_BACKLOG, poll_timeout: DEFAULT_POLL_TIMEOUT, read_chunk_size: DEFAULT_READ_CHUNK_SIZE }
    }
}

impl NetwConfig {
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn backlog(&self) -> i32 {
        self.backlog
    }

    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }

    pub fn read_chunk_size(&self) -> usize {
        self.read_chunk_size
    }
}

#[derive(Debug, Default)]
pub struct NetwServerBuilder {
    config: NetwConfig,
}

impl NetwServerBuilder {
    fn new() -> Self {
        Self::default()
    }

    /// Listens on `port` of every IPv4 interface. Without a port the server
    /// only carries outbound connections.
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = Some(port);
        self
    }

    pub fn backlog(mut self, backlog: i32) -> Self {
        self.config.backlog = backlog;
        self
    }

    /// Upper bound of one readiness wait.
    pub fn poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.config.poll_timeout = poll_timeout;
        self
    }

    /// How many bytes one readiness round reads from a connection at most.
    pub fn read_chunk_size(mut self, read_chunk_size: usize) -> Self {
        self.config.read_chunk_size = read_chunk_size;
        self
    }

    pub fn config(mut self, config: NetwConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self, protocol: Arc<dyn ProtocolHandler>) -> Result<Arc<NetwServer>, NetwError> {
        let config = self.config;
        if config.read_chunk_size == 0 {
            return Err(NetwError::config("read chunk size must be positive"));
        }
        if config.backlog <= 0 {
            return Err(NetwError::config("backlog must be positive"));
        }

        let (command_read, command_write) = Fd::pipe(true, true)?;

        let listener = match config.port {
            Some(port) => {
                let listener = Fd::inet_socket()?;
                listener.bind_listen(port)?;
                listener.listen(config.backlog)?;
                listener.set_nonblocking()?;
                info!(port = listener.local_port(), "start listening");
                Some(listener)
            }
            None => None,
        };

        let poller = Poller::new();
        poller.add_fd(command_read.as_raw_fd(), Interest::READ);
        if let Some(listener) = &listener {
            poller.add_fd(listener.as_raw_fd(), Interest::READ);
        }

        Ok(Arc::new(NetwServer {
            config,
            protocol,
            poller,
            listener,
            command_read,
            mailbox: Arc::new(OutputMailbox::new(Arc::new(command_write))),
            clients: Mutex::default(),
            state: AtomicU8::new(ServerState::Initial as u8),
            quit_accepting: AtomicBool::new(false),
            quit_polling: AtomicBool::new(false),
            quit_loop: AtomicBool::new(false),
            accept_ready: ReadyWaiters::default(),
            command_ready: ReadyWaiters::default(),
        }))
    }
}

pub struct NetwServer {
    config: NetwConfig,
    protocol: Arc<dyn ProtocolHandler>,
    poller: Poller,
    listener: Option<Fd>,
    command_read: Fd,
    mailbox: Arc<OutputMailbox>,
    clients: Mutex<Clients>,
    state: AtomicU8,
    quit_accepting: AtomicBool,
    quit_polling: AtomicBool,
    quit_loop: AtomicBool,
    accept_ready: ReadyWaiters,
    command_ready: ReadyWaiters,
}

impl NetwServer {
    pub fn builder() -> NetwServerBuilder {
        NetwServerBuilder::new()
    }

    pub fn config(&self) -> &NetwConfig {
        &self.config
    }

    /// The port actually listened on, useful after binding port 0.
    pub fn local_port(&self) -> Option<u16> {
        self.listener.as_ref().and_then(Fd::local_port)
    }

    pub fn state(&self) -> ServerState {
        ServerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn connection_count(&self) -> usize {
        lock(&self.clients).connections.len()
    }

    /// Runs the reactor on the calling thread until the server is stopped.
    pub fn run(self: &Arc<Self>) -> Result<(), NetwError> {
        if let Err(current) = self.state.compare_exchange(
            ServerState::Initial as u8,
            ServerState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            return Err(match ServerState::from_u8(current) {
                ServerState::Running | ServerState::Draining => NetwError::AlreadyRunning,
                ServerState::Initial | ServerState::Stopped => NetwError::Stopped,
            });
        }
        info!(port = self.local_port(), "network server running");

        let mut pool = LocalPool::new();
        let spawner = pool.spawner();
        spawner.spawn_local(Arc::clone(self).command_loop())?;
        if self.listener.is_some() {
            spawner.spawn_local(Arc::clone(self).accept_loop())?;
        }
        spawner.spawn_local(Arc::clone(self).poll_loop())?;

        loop {
            pool.run_until_stalled();
            if self.quit_loop.load(Ordering::Acquire) {
                break;
            }
            self.poller.runner();
        }

        self.state.store(ServerState::Stopped as u8, Ordering::Release);
        info!("network server stopped");
        Ok(())
    }

    /// Asks the reactor to shut down. Safe to call from any thread, any number of times.
    pub fn stop(&self) {
        if self.state() == ServerState::Stopped {
            return;
        }
        debug!("stop requested");
        self.mailbox.send_command(QUIT_COMMAND);
    }

    /// Opens an outbound connection carried by this server.
    ///
    /// `addr` holds network order address bytes, 4 for IPv4 and 16 for IPv6.
    /// `setup` sees the freshly created handler before any byte flows, and
    /// `initial_output` is the first thing written once the socket connects.
    pub fn connect<F>(&self, addr: &[u8], port: u16, initial_output: Bytes, setup: F) -> Result<ConnectionId, NetwError>
    where
        F: FnOnce(&mut (dyn ConnectionHandler + 'static)),
    {
        if matches!(self.state(), ServerState::Draining | ServerState::Stopped) {
            return Err(NetwError::Stopped);
        }

        let fd = if addr.len() == 16 { Fd::inet6_socket()? } else { Fd::inet_socket()? };
        fd.set_nonblocking()?;
        fd.connect(addr, port)?;

        let id = ConnectionId::next();
        let mut handler = ConnectionHandlerHandle::new(Arc::clone(&self.protocol), self.callbacks(id));
        if let Some(handler) = handler.handler_mut() {
            setup(handler);
        }

        let mut connection = Connection::new(id, fd, handler);
        connection.output.extend_from_slice(&initial_output);

        {
            let mut clients = lock(&self.clients);
            if clients.closed {
                return Err(NetwError::Stopped);
            }
            clients.connections.insert(id, connection);
        }

        debug!(connection = %id, port, "outbound connection queued");
        self.mailbox.signal();
        Ok(id)
    }

    fn callbacks(&self, id: ConnectionId) -> HandlerCallbacks {
        let output = Arc::clone(&self.mailbox);
        let close = Arc::clone(&self.mailbox);
        HandlerCallbacks::new(
            id,
            move |bytes| output.push(id, MailboxItem::Output(bytes)),
            move || close.push(id, MailboxItem::Close),
        )
    }

    async fn accept_loop(self: Arc<Self>) {
        let Some(listener) = self.listener.as_ref() else {
            return;
        };

        while !self.quit_accepting.load(Ordering::Acquire) {
            if !self.accept_ready.wait().await {
                break;
            }

            let fd = listener.accept();
            if !fd.is_valid() {
                continue;
            }
            if let Err(e) = fd.set_nonblocking() {
                warn!(cause = %e, "failed to prepare accepted connection");
                continue;
            }

            let id = ConnectionId::next();
            let handler = ConnectionHandlerHandle::new(Arc::clone(&self.protocol), self.callbacks(id));
            let mut connection = Connection::new(id, fd, handler);
            self.poller.add_fd(connection.fd.as_raw_fd(), connection.interest());
            connection.registered = true;

            lock(&self.clients).connections.insert(id, connection);
            debug!(connection = %id, "accepted connection");
        }

        debug!("accept loop finished");
        self.quit_polling.store(true, Ordering::Release);
    }

    async fn command_loop(self: Arc<Self>) {
        let mut buf = [0u8; COMMAND_CHUNK_SIZE];

        loop {
            self.command_ready.wait().await;

            let n = match self.command_read.read(&mut buf) {
                Ok(n) => n,
                Err(e) => {
                    error!(cause = %e, "failed to read command pipe");
                    0
                }
            };

            let mut quit = false;
            for &command in &buf[..n] {
                match command {
                    QUIT_COMMAND => quit = true,
                    WAKE_COMMAND => {}
                    other => warn!(command = other, "invalid internal command"),
                }
            }

            self.flush_mailbox(&mut lock(&self.clients));

            if quit {
                self.begin_shutdown();
                break;
            }
        }

        debug!("command loop finished");
    }

    fn begin_shutdown(&self) {
        info!("network server draining");
        self.state.store(ServerState::Draining as u8, Ordering::Release);
        self.quit_accepting.store(true, Ordering::Release);

        if self.listener.is_some() {
            self.accept_ready.fire(false);
        } else {
            self.quit_polling.store(true, Ordering::Release);
        }

        // the poll round already queued must not sit out its whole timeout
        self.mailbox.send_command(QUIT_COMMAND);
    }

    /// Moves mailbox entries into their connection buffers.
    fn flush_mailbox(&self, clients: &mut Clients) {
        for (id, item) in self.mailbox.drain() {
            let Some(connection) = clients.connections.get_mut(&id) else {
                trace!(connection = %id, "mailbox entry for a closed connection");
                continue;
            };

            match item {
                MailboxItem::Output(bytes) => connection.output.extend_from_slice(&bytes),
                MailboxItem::Close => connection.close_after_flush = true,
            }
            // nothing left to flush, the close takes effect now
            if connection.close_after_flush && connection.output.is_empty() {
                self.drop_connection(clients, id);
                continue;
            }
            if connection.registered {
                self.poller.update_fd(connection.fd.as_raw_fd(), connection.interest());
            }
        }
    }

    fn drop_connection(&self, clients: &mut Clients, id: ConnectionId) {
        let Some(mut connection) = clients.connections.remove(&id) else {
            return;
        };
        connection.end();
        if connection.registered {
            self.poller.remove_fd(connection.fd.as_raw_fd());
        }
        debug!(connection = %id, "connection closed");
    }

    async fn poll_loop(self: Arc<Self>) {
        let mut scratch = vec![0u8; self.config.read_chunk_size];

        while !self.quit_polling.load(Ordering::Acquire) {
            self.register_connections();

            match self.poller.poll(self.config.poll_timeout).await {
                PollerResult::Ready => {}
                PollerResult::Timeout => continue,
                PollerResult::Error => {
                    warn!("poll round failed");
                    continue;
                }
            }

            if self.quit_polling.load(Ordering::Acquire) {
                break;
            }

            let command = self.poller.results(self.command_read.as_raw_fd());
            if !command.is_empty() {
                self.command_ready.fire(true);
            }
            if let Some(listener) = &self.listener {
                if !self.poller.results(listener.as_raw_fd()).is_empty() {
                    self.accept_ready.fire(true);
                }
            }

            self.pump_connections(&mut scratch);
        }

        self.drain_connections();
        self.quit_loop.store(true, Ordering::Release);
        debug!("poll loop finished");
    }

    fn register_connections(&self) {
        let mut clients = lock(&self.clients);
        for connection in clients.connections.values_mut().filter(|c| !c.registered) {
            self.poller.add_fd(connection.fd.as_raw_fd(), connection.interest());
            connection.registered = true;
            trace!(connection = %connection.id, "registered connection");
        }
    }

    fn pump_connections(&self, scratch: &mut [u8]) {
        let mut clients = lock(&self.clients);

        let mut dropped = Vec::new();
        for (id, connection) in &mut clients.connections {
            if !connection.registered {
                continue;
            }

            let readiness = self.poller.results(connection.fd.as_raw_fd());
            if Self::pump(connection, readiness, scratch) {
                self.poller.update_fd(connection.fd.as_raw_fd(), connection.interest());
            } else {
                dropped.push(*id);
            }
        }

        for id in dropped {
            self.drop_connection(&mut clients, id);
        }
    }

    /// One readiness round for one connection. Returns false once it should be dropped.
    fn pump(connection: &mut Connection, readiness: Readiness, scratch: &mut [u8]) -> bool {
        if readiness.write && !connection.output.is_empty() && !connection.flush_output() {
            return false;
        }
        if connection.output.is_empty() && connection.close_after_flush {
            return false;
        }

        let mut end_of_stream = false;
        if readiness.read || readiness.error {
            match connection.fd.recv(scratch) {
                Ok(Some(0)) => end_of_stream = true,
                Ok(Some(n)) => {
                    trace!(connection = %connection.id, size = n, "read input");
                    connection.input.extend_from_slice(&scratch[..n]);
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(connection = %connection.id, cause = %e, "read failed");
                    end_of_stream = true;
                }
            }
        }

        connection.feed_handler();
        !end_of_stream
    }

    fn drain_connections(&self) {
        let connections = {
            let mut clients = lock(&self.clients);
            self.flush_mailbox(&mut clients);
            clients.closed = true;
            std::mem::take(&mut clients.connections)
        };

        for (id, mut connection) in connections {
            if !connection.output.is_empty() {
                connection.flush_output();
            }
            connection.end();
            trace!(connection = %id, "connection dropped on shutdown");
        }
        self.poller.clear_fds();
    }
}

impl fmt::Debug for NetwServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetwServer")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("poller", &self.poller)
            .finish_non_exhaustive()
    }
}
