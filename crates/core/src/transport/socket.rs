use std::io::{self, Read, Write};
use std::net::{SocketAddr, ToSocketAddrs};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::net::{TcpStream, UdpSocket};

use crate::error::{Result, RtspError};
use crate::reporter::Reporter;

/// Transport kind of a socket, derived from the presentation's URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// TCP byte stream (`rtsp://`).
    Stream,
    /// Connected UDP socket (`rtspu://`).
    Datagram,
}

/// Socket lifecycle state.
///
/// `Connectable` through `Connected` track connection establishment;
/// `Readable`/`Reading` and `Writable`/`Writing` are transient marks applied
/// while the event loop hands the socket to its owner and while an I/O call
/// is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Disconnected,
    Connectable,
    Connecting,
    Connected,
    Readable,
    Reading,
    Writable,
    Writing,
}

impl SocketState {
    /// Whenever the state is open, the underlying handle exists.
    pub fn is_open(self) -> bool {
        self != SocketState::Disconnected
    }
}

enum Endpoint {
    Stream(TcpStream),
    Datagram(UdpSocket),
}

/// Read size for draining a stream socket into the pushback buffer.
const STREAM_CHUNK: usize = 4096;
/// Largest datagram a single recv can return without truncation.
const MAX_DATAGRAM: usize = 65536;

/// Unified TCP/UDP endpoint.
///
/// The OS-level socket is always non-blocking; the `*_blocking` methods wait
/// for readiness with a deadline before issuing the call, so the event loop
/// and the blocking facade share one I/O path.
///
/// Bytes a consumer read past the boundary it needed go back through
/// [`unread`](Self::unread) into the pushback buffer, which every read
/// drains before touching the kernel. The incremental message parser leans
/// on this for reads that straddle start-line, header, and body boundaries.
pub struct Socket {
    kind: TransportKind,
    host: String,
    port: u16,
    endpoint: Option<Endpoint>,
    state: SocketState,
    pushback: Vec<u8>,
    last_active: Instant,
    connect_deadline: Option<Instant>,
    last_error: Option<String>,
    reporter: Arc<Reporter>,
}

impl Socket {
    pub fn new(kind: TransportKind, host: &str, port: u16, reporter: Arc<Reporter>) -> Self {
        Socket {
            kind,
            host: host.to_string(),
            port,
            endpoint: None,
            state: SocketState::Disconnected,
            pushback: Vec::new(),
            last_active: Instant::now(),
            connect_deadline: None,
            last_error: None,
            reporter,
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn state(&self) -> SocketState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: SocketState) {
        self.state = state;
    }

    /// The most recent network error recorded on this socket.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.clone()
    }

    /// Monotonic timestamp of the last successful operation.
    pub fn last_active(&self) -> Instant {
        self.last_active
    }

    pub fn raw_fd(&self) -> Option<RawFd> {
        match &self.endpoint {
            Some(Endpoint::Stream(s)) => Some(s.as_raw_fd()),
            Some(Endpoint::Datagram(s)) => Some(s.as_raw_fd()),
            None => None,
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.endpoint {
            Some(Endpoint::Stream(s)) => s.local_addr().ok(),
            Some(Endpoint::Datagram(s)) => s.local_addr().ok(),
            None => None,
        }
    }

    /// Open and fully establish the connection, waiting up to `timeout`.
    pub fn connect_blocking(&mut self, timeout: Duration) -> Result<()> {
        self.connect_start(timeout)?;
        if self.state == SocketState::Connected {
            return Ok(());
        }
        if !self.wait_writable(timeout)? {
            self.record("Connect timed out");
            self.disconnect();
            return Err(RtspError::ConnectTimeout);
        }
        match self.finish_connect()? {
            true => Ok(()),
            false => {
                self.record("Connect timed out");
                self.disconnect();
                Err(RtspError::ConnectTimeout)
            }
        }
    }

    /// Begin a non-blocking connect.
    ///
    /// Streams move to `Connecting`; the event loop later observes
    /// writability and calls [`finish_connect`](Self::finish_connect).
    /// Datagram sockets bind, fix their peer, and are `Connected`
    /// immediately.
    pub fn connect_start(&mut self, timeout: Duration) -> Result<()> {
        let addr = self.resolve()?;
        match self.kind {
            TransportKind::Stream => {
                let stream = match TcpStream::connect(addr) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let msg = format!("connect to {addr} failed: {e}");
                        self.record(&msg);
                        return Err(RtspError::ConnectFailed(msg));
                    }
                };
                let _ = stream.set_nodelay(true);
                self.endpoint = Some(Endpoint::Stream(stream));
                self.state = SocketState::Connecting;
            }
            TransportKind::Datagram => {
                let local: SocketAddr = if addr.is_ipv4() {
                    SocketAddr::from(([0, 0, 0, 0], 0))
                } else {
                    SocketAddr::from(([0u16; 8], 0))
                };
                let socket = match UdpSocket::bind(local) {
                    Ok(socket) => socket,
                    Err(e) => {
                        let msg = format!("bind for {addr} failed: {e}");
                        self.record(&msg);
                        return Err(RtspError::ConnectFailed(msg));
                    }
                };
                if let Err(e) = socket.connect(addr) {
                    let msg = format!("connect to {addr} failed: {e}");
                    self.record(&msg);
                    return Err(RtspError::ConnectFailed(msg));
                }
                self.endpoint = Some(Endpoint::Datagram(socket));
                self.state = SocketState::Connected;
            }
        }
        self.connect_deadline = Some(Instant::now() + timeout);
        self.touch();
        Ok(())
    }

    /// Probe an in-flight connect after a writability notification.
    ///
    /// Returns `Ok(true)` once the connection is established, `Ok(false)`
    /// while still in progress.
    pub fn finish_connect(&mut self) -> Result<bool> {
        enum Probe {
            Ready,
            Pending,
            Failed(String),
        }
        let probe = {
            let Some(Endpoint::Stream(stream)) = &self.endpoint else {
                return Ok(self.state == SocketState::Connected);
            };
            match stream.take_error() {
                Ok(Some(err)) => Probe::Failed(err.to_string()),
                Err(err) => Probe::Failed(err.to_string()),
                Ok(None) => match stream.peer_addr() {
                    Ok(_) => Probe::Ready,
                    Err(e)
                        if e.kind() == io::ErrorKind::NotConnected
                            || e.raw_os_error() == Some(libc::EINPROGRESS) =>
                    {
                        Probe::Pending
                    }
                    Err(e) => Probe::Failed(e.to_string()),
                },
            }
        };
        match probe {
            Probe::Ready => {
                self.state = SocketState::Connected;
                self.connect_deadline = None;
                self.touch();
                Ok(true)
            }
            Probe::Pending => Ok(false),
            Probe::Failed(err) => {
                let msg = format!("connect to {}:{} failed: {err}", self.host, self.port);
                self.record(&msg);
                self.disconnect();
                Err(RtspError::ConnectFailed(msg))
            }
        }
    }

    /// Whether the deadline passed without the connect completing.
    pub fn connect_deadline_passed(&self, now: Instant) -> bool {
        self.state == SocketState::Connecting
            && self.connect_deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Open with a confirmed peer: the state says open and the kernel still
    /// reports a peer address.
    pub fn is_connected(&self) -> bool {
        if !self.state.is_open() {
            return false;
        }
        match &self.endpoint {
            Some(Endpoint::Stream(s)) => s.peer_addr().is_ok(),
            Some(Endpoint::Datagram(s)) => s.peer_addr().is_ok(),
            None => false,
        }
    }

    /// Prepend bytes to the pushback buffer. The next read returns them
    /// before anything from the kernel.
    pub fn unread(&mut self, bytes: &[u8]) {
        let mut combined = Vec::with_capacity(bytes.len() + self.pushback.len());
        combined.extend_from_slice(bytes);
        combined.append(&mut self.pushback);
        self.pushback = combined;
    }

    pub fn has_unread(&self) -> bool {
        !self.pushback.is_empty()
    }

    /// Read without waiting. `Ok(None)` means nothing was available.
    ///
    /// The pushback buffer is drained before any system read. On a datagram
    /// socket a system read returns one datagram.
    pub fn read_nonblocking(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        if !self.pushback.is_empty() {
            let n = buf.len().min(self.pushback.len());
            buf[..n].copy_from_slice(&self.pushback[..n]);
            self.pushback.drain(..n);
            return Ok(Some(n));
        }
        let restore = self.state;
        if restore.is_open() {
            self.state = SocketState::Reading;
        }
        let outcome = loop {
            match self.sys_read(buf) {
                Ok(0) if self.kind == TransportKind::Stream => {
                    let msg = "Connection closed by peer".to_string();
                    self.record(&msg);
                    self.disconnect();
                    break Err(RtspError::Network(msg));
                }
                Ok(n) => {
                    self.touch();
                    break Ok(Some(n));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.record(&format!("read failed: {e}"));
                    self.disconnect();
                    break Err(RtspError::Io(e));
                }
            }
        };
        if self.state == SocketState::Reading {
            self.state = restore;
        }
        outcome
    }

    /// Read, waiting for readiness up to `timeout` first.
    pub fn read_blocking(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if !self.pushback.is_empty() {
            let n = buf.len().min(self.pushback.len());
            buf[..n].copy_from_slice(&self.pushback[..n]);
            self.pushback.drain(..n);
            return Ok(n);
        }
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || !self.wait_readable(remaining)? {
                self.record("Read timed out");
                return Err(RtspError::ReadTimeout);
            }
            if let Some(n) = self.read_nonblocking(buf)? {
                return Ok(n);
            }
        }
    }

    /// Drain everything the kernel currently holds into the pushback buffer.
    ///
    /// Returns `Ok(false)` when the peer closed the stream; any bytes
    /// gathered before the close are still in the buffer.
    pub fn buffer_incoming(&mut self) -> Result<bool> {
        let chunk = match self.kind {
            TransportKind::Stream => STREAM_CHUNK,
            TransportKind::Datagram => MAX_DATAGRAM,
        };
        let mut buf = vec![0u8; chunk];
        let restore = self.state;
        if restore.is_open() {
            self.state = SocketState::Reading;
        }
        let outcome = loop {
            match self.sys_read(&mut buf) {
                Ok(0) if self.kind == TransportKind::Stream => {
                    self.record("Connection closed by peer");
                    self.disconnect();
                    break Ok(false);
                }
                Ok(n) => {
                    self.pushback.extend_from_slice(&buf[..n]);
                    self.touch();
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(true),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.record(&format!("read failed: {e}"));
                    self.disconnect();
                    break Err(RtspError::Io(e));
                }
            }
        };
        if self.state == SocketState::Reading {
            self.state = restore;
        }
        outcome
    }

    /// Write without waiting. `Ok(None)` means the kernel buffer was full
    /// and nothing was written.
    ///
    /// A short write is a network error; callers do not resume partial
    /// writes, they fail the request and rely on retransmission policy.
    pub fn write_nonblocking(&mut self, buf: &[u8]) -> Result<Option<usize>> {
        let restore = self.state;
        if restore.is_open() {
            self.state = SocketState::Writing;
        }
        let outcome = loop {
            match self.sys_write(buf) {
                Ok(n) if n == buf.len() => {
                    self.touch();
                    break Ok(Some(n));
                }
                Ok(n) => {
                    let msg = format!("Data partially written ({n} of {} bytes)", buf.len());
                    self.record(&msg);
                    self.disconnect();
                    break Err(RtspError::Network(msg));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.record(&format!("write failed: {e}"));
                    self.disconnect();
                    break Err(RtspError::Io(e));
                }
            }
        };
        if self.state == SocketState::Writing {
            self.state = restore;
        }
        outcome
    }

    /// Write, waiting for writability up to `timeout` first.
    pub fn write_blocking(&mut self, buf: &[u8], timeout: Duration) -> Result<usize> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || !self.wait_writable(remaining)? {
                self.record("Write timed out");
                return Err(RtspError::WriteTimeout);
            }
            if let Some(n) = self.write_nonblocking(buf)? {
                return Ok(n);
            }
        }
    }

    /// Wait for the socket to become readable, up to `timeout`.
    pub fn wait_readable(&self, timeout: Duration) -> Result<bool> {
        self.wait(libc::POLLIN, timeout)
    }

    /// Wait for the socket to become writable, up to `timeout`.
    pub fn wait_writable(&self, timeout: Duration) -> Result<bool> {
        self.wait(libc::POLLOUT, timeout)
    }

    /// Close the handle and move to `Disconnected`.
    pub fn disconnect(&mut self) {
        if self.endpoint.take().is_some() {
            tracing::debug!(host = %self.host, port = self.port, "socket closed");
        }
        self.state = SocketState::Disconnected;
        self.connect_deadline = None;
        self.touch();
    }

    pub(crate) fn record_error(&mut self, message: &str) {
        self.record(message);
    }

    fn record(&mut self, message: &str) {
        tracing::debug!(host = %self.host, port = self.port, message, "network error");
        self.last_error = Some(message.to_string());
        self.reporter.error(message);
    }

    fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    fn resolve(&mut self) -> Result<SocketAddr> {
        let resolved = (self.host.as_str(), self.port).to_socket_addrs();
        match resolved {
            Ok(mut addrs) => match addrs.next() {
                Some(addr) => Ok(addr),
                None => {
                    let msg = format!("no address found for {}:{}", self.host, self.port);
                    self.record(&msg);
                    Err(RtspError::ConnectFailed(msg))
                }
            },
            Err(e) => {
                let msg = format!("could not resolve {}:{}: {e}", self.host, self.port);
                self.record(&msg);
                Err(RtspError::ConnectFailed(msg))
            }
        }
    }

    fn sys_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.endpoint.as_mut() {
            Some(Endpoint::Stream(s)) => s.read(buf),
            Some(Endpoint::Datagram(s)) => s.recv(buf),
            None => Err(io::Error::from(io::ErrorKind::NotConnected)),
        }
    }

    fn sys_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.endpoint.as_mut() {
            Some(Endpoint::Stream(s)) => s.write(buf),
            Some(Endpoint::Datagram(s)) => s.send(buf),
            None => Err(io::Error::from(io::ErrorKind::NotConnected)),
        }
    }

    fn wait(&self, events: libc::c_short, timeout: Duration) -> Result<bool> {
        let Some(fd) = self.raw_fd() else {
            return Err(RtspError::Network("socket not open".to_string()));
        };
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let ms = remaining.as_millis().min(i32::MAX as u128) as libc::c_int;
            let mut pollfd = libc::pollfd {
                fd,
                events,
                revents: 0,
            };
            let rc = unsafe { libc::poll(&mut pollfd, 1, ms) };
            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(RtspError::Io(err));
            }
            return Ok(rc > 0);
        }
    }
}
