//! Single-threaded readiness multiplexer.
//!
//! One [`EventLoop`] interleaves any number of connections. Per cycle each
//! admitted connection gets at most one readable and one writable
//! invocation; the readiness poll itself never waits (zero timeout), so the
//! only suspension points are the poll and the per-callback return.
//!
//! ## Cycle
//!
//! 1. Fire at most one due scheduled callback.
//! 2. Admit queued connections while the active set has room, opening each
//!    one (non-blocking connect).
//! 3. Poll readiness, coalescing events per descriptor; confirm in-flight
//!    connects, dispatch readable/writable, sweep disconnected entries, and
//!    re-arm write interest for connections with outbound work.
//! 4. Invoke each per-cycle hook.
//!
//! The loop stops when the admission queue, the active set, and the
//! scheduled-callback queue are all empty.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use parking_lot::Mutex;

use crate::error::{Result, RtspError};
use crate::transport::{Socket, SocketState};

/// A connection the event loop can drive.
///
/// Implemented by [`Presentation`](crate::Presentation); the loop itself
/// only needs socket access and the readiness entry points.
pub trait Connection {
    fn socket(&self) -> &Socket;
    fn socket_mut(&mut self) -> &mut Socket;
    /// Admission: start the (non-blocking) connect.
    fn open(&mut self) -> Result<()>;
    fn on_connected(&mut self);
    fn on_connect_failed(&mut self, error: RtspError);
    fn on_readable(&mut self);
    fn on_writable(&mut self);
    /// Whether the connection has outbound work; the loop arms WRITABLE
    /// interest while this is true.
    fn wants_write(&self) -> bool;
}

pub type ConnectionRef = Arc<Mutex<dyn Connection>>;

/// Opaque handle for a scheduled callback, usable with
/// [`EventLoop::cancel_after`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AfterId(u64);

struct Scheduled {
    due: Instant,
    id: u64,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.id == other.id
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the earliest deadline wins,
        // with the allocation id as the tiebreak for equal deadlines.
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.id.cmp(&self.id))
    }
}

struct ActiveEntry {
    conn: ConnectionRef,
    interests: Interest,
}

/// Readiness-driven event loop over a bounded active set.
pub struct EventLoop {
    poll: Poll,
    events: Events,
    admission: VecDeque<ConnectionRef>,
    active: HashMap<RawFd, ActiveEntry>,
    max_connections: usize,
    scheduled: BinaryHeap<Scheduled>,
    callbacks: HashMap<u64, Box<dyn FnOnce()>>,
    next_after_id: u64,
    hooks: Vec<Box<dyn FnMut() -> bool>>,
    activity: u64,
}

impl EventLoop {
    pub fn new(max_connections: usize) -> Result<Self> {
        Ok(EventLoop {
            poll: Poll::new()?,
            events: Events::with_capacity(128),
            admission: VecDeque::new(),
            active: HashMap::new(),
            max_connections,
            scheduled: BinaryHeap::new(),
            callbacks: HashMap::new(),
            next_after_id: 0,
            hooks: Vec::new(),
            activity: 0,
        })
    }

    /// Queue a connection for admission. It is opened and registered once
    /// the active set has room.
    pub fn admit(&mut self, conn: ConnectionRef) {
        self.admission.push_back(conn);
    }

    /// Remove a connection from the active set, or from the admission queue
    /// if it was never admitted.
    pub fn remove(&mut self, conn: &ConnectionRef) {
        if let Some(i) = self
            .admission
            .iter()
            .position(|c| same_connection(c, conn))
        {
            self.admission.remove(i);
            return;
        }
        let fd = self
            .active
            .iter()
            .find_map(|(fd, entry)| same_connection(&entry.conn, conn).then_some(*fd));
        if let Some(fd) = fd {
            self.remove_fd(fd);
        }
    }

    pub fn remove_fd(&mut self, fd: RawFd) {
        if self.active.remove(&fd).is_some() {
            let _ = self.poll.registry().deregister(&mut SourceFd(&fd));
        }
    }

    /// Schedule `callback` to run once, `delay` from now.
    pub fn schedule_after(
        &mut self,
        delay: Duration,
        callback: impl FnOnce() + 'static,
    ) -> AfterId {
        let id = self.next_after_id;
        self.next_after_id += 1;
        self.scheduled.push(Scheduled {
            due: Instant::now() + delay,
            id,
        });
        self.callbacks.insert(id, Box::new(callback));
        AfterId(id)
    }

    /// Cancel a scheduled callback. Returns whether it was still pending.
    pub fn cancel_after(&mut self, id: AfterId) -> bool {
        // The heap entry stays behind as a tombstone and is skipped when it
        // reaches the head.
        self.callbacks.remove(&id.0).is_some()
    }

    pub fn add_hook(&mut self, hook: impl FnMut() -> bool + 'static) {
        self.hooks.push(Box::new(hook));
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn admission_len(&self) -> usize {
        self.admission.len()
    }

    pub fn scheduled_len(&self) -> usize {
        self.callbacks.len()
    }

    /// Whether any admission, active, or scheduled work remains.
    pub fn has_work(&self) -> bool {
        !self.admission.is_empty() || !self.active.is_empty() || !self.callbacks.is_empty()
    }

    /// Execute one cycle and return the number of events it produced.
    pub fn run_cycle(&mut self) -> u64 {
        let before = self.activity;
        if self.fire_due(Instant::now()) {
            self.activity += 1;
        }
        self.admit_pending();
        self.poll_ready();
        let mut hooks = std::mem::take(&mut self.hooks);
        for hook in &mut hooks {
            if hook() {
                self.activity += 1;
            }
        }
        hooks.extend(self.hooks.drain(..));
        self.hooks = hooks;
        self.activity - before
    }

    /// Run cycles until no work remains.
    pub fn run(&mut self) {
        while self.has_work() {
            if self.run_cycle() == 0 {
                std::thread::yield_now();
            }
        }
    }

    /// Pop and invoke at most one scheduled callback whose deadline is at or
    /// before `now`. Cancelled entries are discarded without counting.
    fn fire_due(&mut self, now: Instant) -> bool {
        loop {
            let Some(head) = self.scheduled.peek() else {
                return false;
            };
            if !self.callbacks.contains_key(&head.id) {
                self.scheduled.pop();
                continue;
            }
            if head.due > now {
                return false;
            }
            let id = head.id;
            self.scheduled.pop();
            if let Some(callback) = self.callbacks.remove(&id) {
                callback();
            }
            return true;
        }
    }

    fn admit_pending(&mut self) {
        while self.active.len() < self.max_connections {
            let Some(conn) = self.admission.pop_front() else {
                break;
            };
            let mut c = conn.lock();
            c.socket_mut().set_state(SocketState::Connectable);
            if let Err(error) = c.open() {
                tracing::debug!(error = %error, "admission: open failed");
                c.on_connect_failed(error);
                continue;
            }
            let state = c.socket().state();
            if !matches!(state, SocketState::Connecting | SocketState::Connected) {
                continue;
            }
            let Some(fd) = c.socket().raw_fd() else {
                continue;
            };
            if state == SocketState::Connected {
                c.on_connected();
            }
            let interests = if c.socket().state() == SocketState::Connecting || c.wants_write() {
                Interest::READABLE | Interest::WRITABLE
            } else {
                Interest::READABLE
            };
            if let Err(error) =
                self.poll
                    .registry()
                    .register(&mut SourceFd(&fd), Token(fd as usize), interests)
            {
                tracing::warn!(fd, error = %error, "admission: register failed");
                c.socket_mut().disconnect();
                continue;
            }
            drop(c);
            tracing::debug!(fd, "connection admitted");
            self.active.insert(fd, ActiveEntry { conn, interests });
            self.activity += 1;
        }
    }

    fn poll_ready(&mut self) {
        self.check_connect_deadlines();

        if let Err(error) = self.poll.poll(&mut self.events, Some(Duration::ZERO))
            && error.kind() != io::ErrorKind::Interrupted
        {
            tracing::warn!(error = %error, "readiness poll failed");
        }

        // Coalesce per descriptor so each connection sees at most one
        // readable and one writable invocation per cycle.
        let mut ready: Vec<(RawFd, bool, bool)> = Vec::new();
        for event in self.events.iter() {
            let fd = event.token().0 as RawFd;
            let readable = event.is_readable() || event.is_read_closed() || event.is_error();
            let writable = event.is_writable() || event.is_write_closed();
            match ready.iter_mut().find(|(f, _, _)| *f == fd) {
                Some(entry) => {
                    entry.1 |= readable;
                    entry.2 |= writable;
                }
                None => ready.push((fd, readable, writable)),
            }
        }

        // A connection with buffered pushback is readable regardless of
        // kernel readiness.
        for (fd, entry) in &self.active {
            if entry.conn.lock().socket().has_unread() {
                match ready.iter_mut().find(|(f, _, _)| f == fd) {
                    Some(entry) => entry.1 = true,
                    None => ready.push((*fd, true, false)),
                }
            }
        }

        for (fd, readable, writable) in ready {
            let Some(entry) = self.active.get(&fd) else {
                continue;
            };
            let conn = entry.conn.clone();
            let mut c = conn.lock();

            if c.socket().state() == SocketState::Connecting && (readable || writable) {
                match c.socket_mut().finish_connect() {
                    Ok(true) => {
                        c.on_connected();
                        self.activity += 1;
                    }
                    Ok(false) => {}
                    Err(error) => {
                        c.on_connect_failed(error);
                        self.activity += 1;
                        continue;
                    }
                }
            }

            if readable && c.socket().state().is_open() && c.socket().is_connected() {
                c.socket_mut().set_state(SocketState::Readable);
                c.on_readable();
                if c.socket().state() == SocketState::Readable {
                    c.socket_mut().set_state(SocketState::Connected);
                }
                self.activity += 1;
            }

            if writable && c.socket().state().is_open() && c.socket().is_connected() {
                c.socket_mut().set_state(SocketState::Writable);
                c.on_writable();
                if c.socket().state() == SocketState::Writable {
                    c.socket_mut().set_state(SocketState::Connected);
                }
                self.activity += 1;
            }
        }

        self.sweep_and_rearm();
    }

    fn check_connect_deadlines(&mut self) {
        let now = Instant::now();
        let expired: Vec<ConnectionRef> = self
            .active
            .values()
            .filter(|entry| entry.conn.lock().socket().connect_deadline_passed(now))
            .map(|entry| entry.conn.clone())
            .collect();
        for conn in expired {
            let mut c = conn.lock();
            c.socket_mut().record_error("Connect timed out");
            c.socket_mut().disconnect();
            c.on_connect_failed(RtspError::ConnectTimeout);
            self.activity += 1;
        }
    }

    fn sweep_and_rearm(&mut self) {
        let mut dead: Vec<RawFd> = Vec::new();
        for (fd, entry) in self.active.iter_mut() {
            let c = entry.conn.lock();
            let state = c.socket().state();
            if state == SocketState::Disconnected {
                dead.push(*fd);
                continue;
            }
            let desired = if state == SocketState::Connecting || c.wants_write() {
                Interest::READABLE | Interest::WRITABLE
            } else {
                Interest::READABLE
            };
            // Re-register whenever WRITABLE is wanted: the registry delivers
            // edges, and re-registration re-arms one for an already-writable
            // socket.
            if (desired != entry.interests || desired.is_writable())
                && self
                    .poll
                    .registry()
                    .reregister(&mut SourceFd(fd), Token(*fd as usize), desired)
                    .is_ok()
            {
                entry.interests = desired;
            }
        }
        for fd in dead {
            let _ = self.poll.registry().deregister(&mut SourceFd(&fd));
            self.active.remove(&fd);
            tracing::debug!(fd, "connection left the active set");
        }
    }
}

fn same_connection(a: &ConnectionRef, b: &ConnectionRef) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::net::UdpSocket as StdUdpSocket;
    use std::rc::Rc;

    use super::*;
    use crate::reporter::Reporter;
    use crate::transport::TransportKind;

    struct StubConn {
        socket: Socket,
    }

    impl StubConn {
        fn to_port(port: u16) -> ConnectionRef {
            let socket = Socket::new(
                TransportKind::Datagram,
                "127.0.0.1",
                port,
                Arc::new(Reporter::default()),
            );
            Arc::new(Mutex::new(StubConn { socket }))
        }
    }

    impl Connection for StubConn {
        fn socket(&self) -> &Socket {
            &self.socket
        }
        fn socket_mut(&mut self) -> &mut Socket {
            &mut self.socket
        }
        fn open(&mut self) -> crate::error::Result<()> {
            self.socket.connect_start(Duration::from_secs(1))
        }
        fn on_connected(&mut self) {}
        fn on_connect_failed(&mut self, _error: RtspError) {}
        fn on_readable(&mut self) {}
        fn on_writable(&mut self) {}
        fn wants_write(&self) -> bool {
            false
        }
    }

    #[test]
    fn scheduled_callbacks_fire_in_deadline_order() {
        let mut event_loop = EventLoop::new(4).unwrap();
        let fired: Rc<std::cell::RefCell<Vec<&'static str>>> =
            Rc::new(std::cell::RefCell::new(Vec::new()));

        let a = fired.clone();
        event_loop.schedule_after(Duration::from_millis(100), move || a.borrow_mut().push("a"));
        let b = fired.clone();
        event_loop.schedule_after(Duration::from_millis(50), move || b.borrow_mut().push("b"));

        let later = Instant::now() + Duration::from_millis(200);
        assert!(event_loop.fire_due(later));
        assert!(event_loop.fire_due(later));
        assert!(!event_loop.fire_due(later));
        assert_eq!(fired.borrow().as_slice(), ["b", "a"]);
    }

    #[test]
    fn cancelled_callback_never_fires() {
        let mut event_loop = EventLoop::new(4).unwrap();
        let a_count = Rc::new(Cell::new(0u32));
        let b_count = Rc::new(Cell::new(0u32));

        let a = a_count.clone();
        event_loop.schedule_after(Duration::from_millis(100), move || a.set(a.get() + 1));
        let b = b_count.clone();
        let b_id =
            event_loop.schedule_after(Duration::from_millis(50), move || b.set(b.get() + 1));

        assert!(event_loop.cancel_after(b_id));
        assert!(!event_loop.cancel_after(b_id));

        let later = Instant::now() + Duration::from_millis(200);
        assert!(event_loop.fire_due(later));
        assert!(!event_loop.fire_due(later));

        assert_eq!(a_count.get(), 1);
        assert_eq!(b_count.get(), 0);
        assert!(!event_loop.has_work());
    }

    #[test]
    fn not_yet_due_callback_stays_queued() {
        let mut event_loop = EventLoop::new(4).unwrap();
        event_loop.schedule_after(Duration::from_secs(60), || {});
        assert!(!event_loop.fire_due(Instant::now()));
        assert_eq!(event_loop.scheduled_len(), 1);
        assert!(event_loop.has_work());
    }

    #[test]
    fn active_set_is_bounded_by_max_connections() {
        let target = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        let port = target.local_addr().unwrap().port();

        let mut event_loop = EventLoop::new(2).unwrap();
        let conns: Vec<ConnectionRef> = (0..3).map(|_| StubConn::to_port(port)).collect();
        for conn in &conns {
            event_loop.admit(conn.clone());
        }

        event_loop.run_cycle();
        assert_eq!(event_loop.active_len(), 2);
        assert_eq!(event_loop.admission_len(), 1);

        event_loop.remove(&conns[0]);
        assert_eq!(event_loop.active_len(), 1);

        event_loop.run_cycle();
        assert_eq!(event_loop.active_len(), 2);
        assert_eq!(event_loop.admission_len(), 0);

        for conn in &conns[1..] {
            event_loop.remove(conn);
        }
        assert!(!event_loop.has_work());
    }

    #[test]
    fn hooks_run_once_per_cycle_and_count_progress() {
        let mut event_loop = EventLoop::new(1).unwrap();
        let calls = Rc::new(Cell::new(0u32));
        let seen = calls.clone();
        event_loop.add_hook(move || {
            seen.set(seen.get() + 1);
            seen.get() == 1
        });

        assert_eq!(event_loop.run_cycle(), 1);
        assert_eq!(event_loop.run_cycle(), 0);
        assert_eq!(calls.get(), 2);
    }
}
