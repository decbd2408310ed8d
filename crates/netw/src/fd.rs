//! Owned descriptors with the socket and pipe operations the reactor needs.
//!
//! [`Fd`] is move-only and closes its descriptor on drop. Reads and writes are
//! meant for non-blocking descriptors: "would block" is reported as a zero
//! byte transfer so callers can treat short I/O uniformly, every other failure
//! is an [`FdError`].

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use socket2::{Domain, Protocol, SockAddr, SockRef, Socket, Type};
use tracing::trace;

use crate::error::FdError;

/// Exclusive owner of one OS descriptor, or nothing at all.
///
/// An empty `Fd` is what [`Fd::accept`] hands back when there was no
/// connection to take.
#[derive(Debug, Default)]
pub struct Fd {
    fd: Option<OwnedFd>,
}

impl Fd {
    pub fn empty() -> Self {
        Self { fd: None }
    }

    /// Takes ownership of `raw`.
    ///
    /// # Safety
    ///
    /// `raw` must be an open descriptor that nothing else will close.
    pub unsafe fn from_raw(raw: RawFd) -> Self {
        // SAFETY: the caller hands over an open descriptor it no longer owns
        Self { fd: Some(unsafe { OwnedFd::from_raw_fd(raw) }) }
    }

    /// Creates a pipe and returns `(read_end, write_end)`.
    pub fn pipe(close_on_exec: bool, non_blocking: bool) -> Result<(Fd, Fd), FdError> {
        let mut flags = 0;
        if close_on_exec {
            flags |= libc::O_CLOEXEC;
        }
        if non_blocking {
            flags |= libc::O_NONBLOCK;
        }

        let mut fds: [libc::c_int; 2] = [-1; 2];
        // SAFETY: `fds` points at two writable c_ints as pipe2 requires
        let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), flags) };
        if rc < 0 {
            return Err(FdError::last_os_error("failed to create pipe"));
        }

        // SAFETY: pipe2 succeeded, both descriptors are open and owned by nobody else
        Ok(unsafe { (Fd::from_raw(fds[0]), Fd::from_raw(fds[1])) })
    }

    /// A fresh IPv4 TCP socket.
    pub fn inet_socket() -> Result<Fd, FdError> {
        Self::tcp_socket(Domain::IPV4)
    }

    /// A fresh IPv6 TCP socket.
    pub fn inet6_socket() -> Result<Fd, FdError> {
        Self::tcp_socket(Domain::IPV6)
    }

    fn tcp_socket(domain: Domain) -> Result<Fd, FdError> {
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| FdError::new("failed to create socket", e))?;
        Ok(Fd::from(OwnedFd::from(socket)))
    }

    pub fn is_valid(&self) -> bool {
        self.fd.is_some()
    }

    /// Binds to `INADDR_ANY:port`. Port 0 picks an ephemeral port, see [`Fd::local_port`].
    pub fn bind_listen(&self, port: u16) -> Result<(), FdError> {
        let socket = self.socket()?;
        socket.set_reuse_address(true).map_err(|e| FdError::new("failed to set SO_REUSEADDR", e))?;

        let addr = SockAddr::from(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
        socket.bind(&addr).map_err(|e| FdError::new("failed to bind socket", e))
    }

    pub fn listen(&self, backlog: i32) -> Result<(), FdError> {
        self.socket()?.listen(backlog).map_err(|e| FdError::new("failed to listen on socket", e))
    }

    /// Connects to `addr` given as network order bytes, 4 for IPv4 and 16 for IPv6.
    ///
    /// A connect that is still in progress on a non-blocking socket counts as
    /// success; failures then surface through poll readiness.
    pub fn connect(&self, addr: &[u8], port: u16) -> Result<(), FdError> {
        let ip = ip_from_bytes(addr)?;
        let target = SockAddr::from(SocketAddr::new(ip, port));

        match self.socket()?.connect(&target) {
            Ok(()) => Ok(()),
            Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) || e.kind() == io::ErrorKind::WouldBlock => {
                trace!(%ip, port, "connect in progress");
                Ok(())
            }
            Err(e) => Err(FdError::new("failed to connect socket", e)),
        }
    }

    pub fn set_nonblocking(&self) -> Result<(), FdError> {
        let raw = self.raw()?;
        // SAFETY: `raw` is open for as long as `self` lives
        let flags = unsafe { libc::fcntl(raw, libc::F_GETFL) };
        if flags < 0 {
            return Err(FdError::last_os_error("failed to read descriptor flags"));
        }
        // SAFETY: same descriptor, only adds O_NONBLOCK to the flags read above
        let rc = unsafe { libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK) };
        if rc < 0 {
            return Err(FdError::last_os_error("failed to set descriptor non-blocking"));
        }
        Ok(())
    }

    /// Accepts one pending connection. Returns an empty `Fd` when there is
    /// none or the accept failed.
    pub fn accept(&self) -> Fd {
        let Ok(socket) = self.socket() else {
            return Fd::empty();
        };

        match socket.accept() {
            Ok((accepted, _peer)) => Fd::from(OwnedFd::from(accepted)),
            Err(e) => {
                trace!(cause = %e, "accept returned no connection");
                Fd::empty()
            }
        }
    }

    /// Reads into `buf`, returning 0 when the read would block.
    ///
    /// A return of 0 is ambiguous with end of stream; use [`Fd::recv`] where
    /// the two must be told apart.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, FdError> {
        Ok(self.recv(buf)?.unwrap_or(0))
    }

    /// Reads into the `offset..offset + size` window of `buf`, clamped to its length.
    pub fn read_window(&self, buf: &mut [u8], offset: usize, size: usize) -> Result<usize, FdError> {
        let (start, end) = window(buf.len(), offset, size);
        self.read(&mut buf[start..end])
    }

    /// Reads into `buf`. `None` means the read would block, `Some(0)` is end of stream.
    pub fn recv(&self, buf: &mut [u8]) -> Result<Option<usize>, FdError> {
        let raw = self.raw()?;
        loop {
            // SAFETY: `buf` is valid for writes of `buf.len()` bytes
            let n = unsafe { libc::read(raw, buf.as_mut_ptr().cast(), buf.len()) };
            if let Ok(n) = usize::try_from(n) {
                return Ok(Some(n));
            }

            let e = io::Error::last_os_error();
            match e.kind() {
                io::ErrorKind::WouldBlock => return Ok(None),
                io::ErrorKind::Interrupted => {}
                _ => return Err(FdError::new("failed to read from descriptor", e)),
            }
        }
    }

    /// Writes from `buf`, returning 0 when the write would block.
    pub fn write(&self, buf: &[u8]) -> Result<usize, FdError> {
        let raw = self.raw()?;
        loop {
            // SAFETY: `buf` is valid for reads of `buf.len()` bytes
            let n = unsafe { libc::write(raw, buf.as_ptr().cast(), buf.len()) };
            if let Ok(n) = usize::try_from(n) {
                return Ok(n);
            }

            let e = io::Error::last_os_error();
            match e.kind() {
                io::ErrorKind::WouldBlock => return Ok(0),
                io::ErrorKind::Interrupted => {}
                _ => return Err(FdError::new("failed to write to descriptor", e)),
            }
        }
    }

    /// Writes the `offset..offset + size` window of `buf`, clamped to its length.
    pub fn write_window(&self, buf: &[u8], offset: usize, size: usize) -> Result<usize, FdError> {
        let (start, end) = window(buf.len(), offset, size);
        self.write(&buf[start..end])
    }

    /// Port the socket is bound to, if it is a bound inet socket.
    pub fn local_port(&self) -> Option<u16> {
        let socket = self.socket().ok()?;
        socket.local_addr().ok()?.as_socket().map(|addr| addr.port())
    }

    fn raw(&self) -> Result<RawFd, FdError> {
        self.fd.as_ref().map(AsRawFd::as_raw_fd).ok_or_else(not_open)
    }

    fn socket(&self) -> Result<SockRef<'_>, FdError> {
        self.fd.as_ref().map(SockRef::from).ok_or_else(not_open)
    }
}

impl From<OwnedFd> for Fd {
    fn from(fd: OwnedFd) -> Self {
        Self { fd: Some(fd) }
    }
}

impl AsRawFd for Fd {
    /// -1 for an empty `Fd`, which `poll(2)` skips.
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_ref().map_or(-1, AsRawFd::as_raw_fd)
    }
}

fn not_open() -> FdError {
    FdError::new("descriptor is not open", io::Error::from(io::ErrorKind::InvalidInput))
}

fn window(len: usize, offset: usize, size: usize) -> (usize, usize) {
    let end = offset.saturating_add(size).min(len);
    (offset.min(end), end)
}

fn ip_from_bytes(addr: &[u8]) -> Result<IpAddr, FdError> {
    if let Ok(v4) = <[u8; 4]>::try_from(addr) {
        return Ok(IpAddr::V4(Ipv4Addr::from(v4)));
    }
    if let Ok(v6) = <[u8; 16]>::try_from(addr) {
        return Ok(IpAddr::V6(Ipv6Addr::from(v6)));
    }
    Err(FdError::new("unexpected address size", io::Error::from(io::ErrorKind::InvalidInput)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipe_round_trip() {
        let (read_end, write_end) = Fd::pipe(true, true).unwrap();

        assert_eq!(write_end.write(b"hello").unwrap(), 5);

        let mut buf = [0u8; 16];
        assert_eq!(read_end.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"hello");
    }

    #[test]
    fn empty_non_blocking_pipe_reads_zero() {
        let (read_end, _write_end) = Fd::pipe(false, true).unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(read_end.read(&mut buf).unwrap(), 0);
        assert_eq!(read_end.recv(&mut buf).unwrap(), None);
    }

    #[test]
    fn closed_writer_is_end_of_stream() {
        let (read_end, write_end) = Fd::pipe(false, true).unwrap();
        drop(write_end);

        let mut buf = [0u8; 4];
        assert_eq!(read_end.recv(&mut buf).unwrap(), Some(0));
    }

    #[test]
    fn windows_are_clamped() {
        let (read_end, write_end) = Fd::pipe(false, true).unwrap();

        assert_eq!(write_end.write_window(b"0123456789", 8, 100).unwrap(), 2);
        assert_eq!(write_end.write_window(b"0123456789", 20, 5).unwrap(), 0);

        let mut buf = [0u8; 8];
        assert_eq!(read_end.read_window(&mut buf, 6, 10).unwrap(), 2);
        assert_eq!(&buf[6..], b"89");
    }

    #[test]
    fn empty_fd() {
        let fd = Fd::empty();

        assert!(!fd.is_valid());
        assert_eq!(fd.as_raw_fd(), -1);
        assert!(!fd.accept().is_valid());
        assert!(fd.write(b"x").is_err());
    }

    #[test]
    fn connect_rejects_odd_address_sizes() {
        let fd = Fd::inet_socket().unwrap();

        let error = fd.connect(&[127, 0, 0], 80).unwrap_err();
        assert_eq!(error.message(), "unexpected address size");
        assert_eq!(error.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn listener_accepts_loopback_connection() {
        let listener = Fd::inet_socket().unwrap();
        listener.bind_listen(0).unwrap();
        listener.listen(20).unwrap();
        listener.set_nonblocking().unwrap();

        let port = listener.local_port().unwrap();
        assert_ne!(port, 0);
        assert!(!listener.accept().is_valid());

        let _peer = std::net::TcpStream::connect(("127.0.0.1", port)).unwrap();
        let mut accepted = listener.accept();
        for _ in 0..100 {
            if accepted.is_valid() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
            accepted = listener.accept();
        }
        assert!(accepted.is_valid());
    }
}
