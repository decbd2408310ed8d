use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use micro_netw::{
    ConnectionHandler, EchoProtocol, HandlerCallbacks, NetwError, NetwServer, PassThroughProtocol, ProtocolHandler,
};

fn spawn(protocol: Arc<dyn ProtocolHandler>) -> (Arc<NetwServer>, thread::JoinHandle<Result<(), NetwError>>) {
    let server = NetwServer::builder().port(0).poll_timeout(Duration::from_millis(500)).build(protocol).unwrap();
    let runner = Arc::clone(&server);
    (server, thread::spawn(move || runner.run()))
}

fn connect(server: &NetwServer) -> TcpStream {
    let stream = TcpStream::connect(("127.0.0.1", server.local_port().unwrap())).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    stream
}

/// Answers the first line with a farewell and closes the connection.
struct Farewell {
    callbacks: HandlerCallbacks,
}

impl ConnectionHandler for Farewell {
    fn accept_input(&mut self, data: &[u8]) -> usize {
        let Some(end) = data.iter().position(|b| *b == b'\n') else {
            return 0;
        };
        self.callbacks.output(format!("bye {}", String::from_utf8_lossy(&data[..end])));
        self.callbacks.close();
        data.len()
    }
}

struct FarewellProtocol;

impl ProtocolHandler for FarewellProtocol {
    fn create(&self, callbacks: HandlerCallbacks) -> Box<dyn ConnectionHandler> {
        Box::new(Farewell { callbacks })
    }
}

/// Hangs up on the first input without writing anything.
struct Hangup {
    callbacks: HandlerCallbacks,
}

impl ConnectionHandler for Hangup {
    fn accept_input(&mut self, data: &[u8]) -> usize {
        self.callbacks.close();
        data.len()
    }
}

struct HangupProtocol;

impl ProtocolHandler for HangupProtocol {
    fn create(&self, callbacks: HandlerCallbacks) -> Box<dyn ConnectionHandler> {
        Box::new(Hangup { callbacks })
    }
}

/// Replies from a worker thread instead of the reactor thread.
struct Deferred {
    callbacks: HandlerCallbacks,
}

impl ConnectionHandler for Deferred {
    fn accept_input(&mut self, data: &[u8]) -> usize {
        let callbacks = self.callbacks.clone();
        let reply = data.to_ascii_uppercase();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            callbacks.output(reply);
        });
        data.len()
    }
}

struct DeferredProtocol;

impl ProtocolHandler for DeferredProtocol {
    fn create(&self, callbacks: HandlerCallbacks) -> Box<dyn ConnectionHandler> {
        Box::new(Deferred { callbacks })
    }
}

#[derive(Default)]
struct Counters {
    created: AtomicUsize,
    ended: AtomicUsize,
    released: AtomicUsize,
}

struct Counted {
    counters: Arc<Counters>,
}

impl ConnectionHandler for Counted {
    fn accept_input(&mut self, data: &[u8]) -> usize {
        data.len()
    }

    fn end_of_connection(&mut self) {
        self.counters.ended.fetch_add(1, Ordering::SeqCst);
    }
}

struct CountedProtocol {
    counters: Arc<Counters>,
}

impl ProtocolHandler for CountedProtocol {
    fn create(&self, _callbacks: HandlerCallbacks) -> Box<dyn ConnectionHandler> {
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        Box::new(Counted { counters: Arc::clone(&self.counters) })
    }

    fn release(&self, handler: Box<dyn ConnectionHandler>) {
        self.counters.released.fetch_add(1, Ordering::SeqCst);
        drop(handler);
    }
}

fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("condition not reached in time");
}

#[test]
fn echoes_many_connections() {
    let (server, handle) = spawn(Arc::new(EchoProtocol));

    let mut streams = (0..8).map(|_| connect(&server)).collect::<Vec<_>>();
    for (i, stream) in streams.iter_mut().enumerate() {
        stream.write_all(format!("message {i}").as_bytes()).unwrap();
    }
    for (i, stream) in streams.iter_mut().enumerate() {
        let expected = format!("message {i}");
        let mut buf = vec![0u8; expected.len()];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(buf, expected.as_bytes());
    }

    server.stop();
    handle.join().unwrap().unwrap();
}

#[test]
fn close_after_flush_delivers_output_first() {
    let (server, handle) = spawn(Arc::new(FarewellProtocol));

    let mut stream = connect(&server);
    stream.write_all(b"alice\n").unwrap();

    let mut reply = String::new();
    stream.read_to_string(&mut reply).unwrap();
    assert_eq!(reply, "bye alice");

    server.stop();
    handle.join().unwrap().unwrap();
}

#[test]
fn close_without_output_reaches_the_peer() {
    let (server, handle) = spawn(Arc::new(HangupProtocol));

    let mut stream = connect(&server);
    stream.write_all(b"knock").unwrap();

    let mut buf = [0u8; 8];
    assert_eq!(stream.read(&mut buf).unwrap(), 0);
    wait_until(|| server.connection_count() == 0);

    server.stop();
    handle.join().unwrap().unwrap();
}

#[test]
fn partial_input_waits_for_more_bytes() {
    let (server, handle) = spawn(Arc::new(FarewellProtocol));

    let mut stream = connect(&server);
    stream.write_all(b"bo").unwrap();
    thread::sleep(Duration::from_millis(50));
    stream.write_all(b"b\n").unwrap();

    let mut reply = String::new();
    stream.read_to_string(&mut reply).unwrap();
    assert_eq!(reply, "bye bob");

    server.stop();
    handle.join().unwrap().unwrap();
}

#[test]
fn output_from_other_threads_reaches_the_socket() {
    let (server, handle) = spawn(Arc::new(DeferredProtocol));

    let mut stream = connect(&server);
    stream.write_all(b"shout").unwrap();

    let mut buf = [0u8; 5];
    stream.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"SHOUT");

    server.stop();
    handle.join().unwrap().unwrap();
}

#[test]
fn peer_disconnect_ends_and_releases_once() {
    let counters = Arc::new(Counters::default());
    let (server, handle) = spawn(Arc::new(CountedProtocol { counters: Arc::clone(&counters) }));

    let mut stream = connect(&server);
    stream.write_all(b"data").unwrap();
    wait_until(|| counters.created.load(Ordering::SeqCst) == 1);

    drop(stream);
    wait_until(|| counters.released.load(Ordering::SeqCst) == 1);
    assert_eq!(counters.ended.load(Ordering::SeqCst), 1);
    assert_eq!(server.connection_count(), 0);

    let _open = connect(&server);
    wait_until(|| counters.created.load(Ordering::SeqCst) == 2);

    server.stop();
    handle.join().unwrap().unwrap();
    assert_eq!(counters.ended.load(Ordering::SeqCst), 2);
    assert_eq!(counters.released.load(Ordering::SeqCst), 2);
}

#[test]
fn pass_through_carries_the_upstream_protocol() {
    let (server, handle) = spawn(Arc::new(PassThroughProtocol::plain(Arc::new(EchoProtocol))));

    let mut stream = connect(&server);
    stream.write_all(b"wrapped").unwrap();

    let mut buf = [0u8; 7];
    stream.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"wrapped");

    server.stop();
    handle.join().unwrap().unwrap();
}
