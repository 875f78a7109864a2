//! Connection management.

use crate::error::{is_transient, NetError};
use crate::iob::{Iob, Transfer, DEFAULT_IOB_SIZE};
use crate::resolve::{Resolver, SystemResolver};
use crate::socket::{grow_buffer, BufferDirection, OsSocket, SocketOps, IOV_MAX};
use crate::wait::{BlockingWait, Deadline, Interest, IoWait, WaitError};
use std::fmt;
use std::io::{self, IoSlice};
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::time::Duration;
use xlogwire_codec::ErrorKind;

/// Default connect timeout (10 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    /// Connect timeout; `None` waits forever.
    pub connect_timeout: Option<Duration>,
    /// Send timeout; `None` waits forever.
    pub send_timeout: Option<Duration>,
    /// Receive timeout; `None` waits forever.
    pub recv_timeout: Option<Duration>,
    /// Send IOB capacity; 0 disables send buffering.
    pub send_buffer: usize,
    /// Receive IOB capacity; 0 disables receive buffering.
    pub recv_buffer: usize,
    /// Lower bound for the OS send buffer search (0 = 16 KiB).
    pub os_send_buffer: usize,
    /// Lower bound for the OS receive buffer search (0 = 16 KiB).
    pub os_recv_buffer: usize,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            send_timeout: None,
            recv_timeout: None,
            send_buffer: DEFAULT_IOB_SIZE,
            recv_buffer: DEFAULT_IOB_SIZE,
            os_send_buffer: 0,
            os_recv_buffer: 0,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn with_recv_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.recv_timeout = timeout;
        self
    }

    pub fn with_send_buffer(mut self, size: usize) -> Self {
        self.send_buffer = size;
        self
    }

    pub fn with_recv_buffer(mut self, size: usize) -> Self {
        self.recv_buffer = size;
        self
    }

    pub fn with_os_buffers(mut self, send: usize, recv: usize) -> Self {
        self.os_send_buffer = send;
        self.os_recv_buffer = recv;
        self
    }
}

/// Connection lifecycle. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unconnected,
    Connecting,
    Connected,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Unconnected => write!(f, "unconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// A TCP connection with optional send/receive buffering.
pub struct Connection<S: SocketOps = OsSocket> {
    config: ConnectionConfig,
    state: ConnectionState,
    socket: Option<S>,
    send_buf: Option<Iob>,
    recv_buf: Option<Iob>,
    wait: Box<dyn IoWait>,
    resolver: Box<dyn Resolver>,
    last_error: Option<ErrorKind>,
    last_os_error: Option<i32>,
}

impl Connection<OsSocket> {
    /// Creates an unconnected connection using blocking waits and the
    /// system resolver.
    pub fn new(config: ConnectionConfig) -> Self {
        Self::with_policy(config, Box::new(BlockingWait), Box::new(SystemResolver))
    }

    /// Resolves, opens and connects an OS socket.
    pub fn connect(&mut self) -> Result<(), NetError> {
        self.connect_with(OsSocket::open)
    }
}

impl<S: SocketOps> Connection<S> {
    /// Creates an unconnected connection with caller-supplied wait and
    /// resolve policies.
    pub fn with_policy(
        config: ConnectionConfig,
        wait: Box<dyn IoWait>,
        resolver: Box<dyn Resolver>,
    ) -> Self {
        let send_buf = (config.send_buffer > 0).then(|| Iob::new(config.send_buffer));
        let recv_buf = (config.recv_buffer > 0).then(|| Iob::new(config.recv_buffer));
        Self {
            config,
            state: ConnectionState::Unconnected,
            socket: None,
            send_buf,
            recv_buf,
            wait,
            resolver,
            last_error: None,
            last_os_error: None,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn fd(&self) -> Option<RawFd> {
        self.socket.as_ref().map(|s| s.fd())
    }

    pub fn socket(&self) -> Option<&S> {
        self.socket.as_ref()
    }

    /// Returns the kind of the last failure.
    pub fn last_error(&self) -> Option<ErrorKind> {
        self.last_error
    }

    /// Returns the OS error number of the last failure, if any.
    pub fn last_os_error(&self) -> Option<i32> {
        self.last_os_error
    }

    /// Installs a transfer hook on the send buffer.
    pub fn set_send_transfer(&mut self, transfer: Box<dyn Transfer>) {
        if let Some(iob) = self.send_buf.as_mut() {
            iob.set_transfer(transfer);
        }
    }

    /// Installs a transfer hook on the receive buffer.
    pub fn set_recv_transfer(&mut self, transfer: Box<dyn Transfer>) {
        if let Some(iob) = self.recv_buf.as_mut() {
            iob.set_transfer(transfer);
        }
    }

    /// Resolves the configured address, opens a socket with `open` and
    /// connects it.
    ///
    /// The connect runs non-blocking and waits for writability through the
    /// wait policy. Under a blocking policy the socket is switched back to
    /// blocking mode afterwards. Any failure closes the connection.
    pub fn connect_with(
        &mut self,
        open: impl FnOnce(&SocketAddr) -> io::Result<S>,
    ) -> Result<(), NetError> {
        if self.state != ConnectionState::Unconnected {
            return Err(NetError::InvalidState(self.state));
        }
        self.state = ConnectionState::Connecting;
        match self.connect_inner(open) {
            Ok(()) => {
                self.state = ConnectionState::Connected;
                tracing::debug!(
                    host = %self.config.host,
                    port = self.config.port,
                    "connected"
                );
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    fn connect_inner(
        &mut self,
        open: impl FnOnce(&SocketAddr) -> io::Result<S>,
    ) -> Result<(), NetError> {
        let deadline = Deadline::after(self.config.connect_timeout);
        let addr = self.resolver.resolve(
            &self.config.host,
            self.config.port,
            self.config.connect_timeout,
        )?;
        tracing::debug!(%addr, "connecting");

        let socket = self.socket.insert(open(&addr).map_err(|e| NetError::system("socket", e))?);
        socket
            .set_nonblocking(true)
            .map_err(|e| NetError::system("fcntl", e))?;

        if let Err(e) = socket.connect(&addr) {
            let in_progress = e.raw_os_error() == Some(libc::EINPROGRESS) || is_transient(&e);
            if !in_progress {
                return Err(NetError::system("connect", e));
            }
        }

        await_ready(
            socket.fd(),
            self.wait.as_mut(),
            Interest::WRITE,
            &deadline,
            "connect",
        )?;

        match socket.take_error() {
            Ok(None) => {}
            Ok(Some(errno)) => {
                return Err(NetError::system(
                    "connect",
                    io::Error::from_raw_os_error(errno),
                ))
            }
            Err(e) => return Err(NetError::system("getsockopt", e)),
        }

        if self.wait.is_blocking() {
            socket
                .set_nonblocking(false)
                .map_err(|e| NetError::system("fcntl", e))?;
        }

        socket
            .set_nodelay(true)
            .map_err(|e| NetError::system("setsockopt", e))?;
        let sndbuf = grow_buffer(self.config.os_send_buffer, |size| {
            socket.set_buffer_size(BufferDirection::Send, size).is_ok()
        });
        let rcvbuf = grow_buffer(self.config.os_recv_buffer, |size| {
            socket.set_buffer_size(BufferDirection::Recv, size).is_ok()
        });
        tracing::trace!(?sndbuf, ?rcvbuf, "socket buffers sized");
        socket
            .set_timeouts(self.config.send_timeout, self.config.recv_timeout)
            .map_err(|e| NetError::system("setsockopt", e))?;
        Ok(())
    }

    /// Records a failure and drops the connection for anything that leaves
    /// the byte stream in an unknown state.
    fn fail(&mut self, err: NetError) -> NetError {
        self.last_error = Some(err.kind());
        self.last_os_error = err.os_error();
        match err {
            NetError::TooBig { .. } | NetError::InvalidState(_) | NetError::NotConnected => {}
            _ => {
                tracing::debug!(error = %err, "connection failed");
                self.close();
            }
        }
        err
    }

    fn ensure_connected(&self) -> Result<(), NetError> {
        if self.state != ConnectionState::Connected || self.socket.is_none() {
            return Err(NetError::NotConnected);
        }
        Ok(())
    }

    /// Sends `data`, coalescing through the send buffer when configured.
    ///
    /// A request larger than the buffer capacity is rejected. When the
    /// request does not fit behind the buffered bytes, those are flushed
    /// first.
    pub fn send(&mut self, data: &[u8]) -> Result<usize, NetError> {
        self.ensure_connected()?;
        let timeout = self.config.send_timeout;
        let result = match (self.socket.as_mut(), self.send_buf.as_mut()) {
            (Some(socket), None) => {
                write_all(socket, self.wait.as_mut(), data, &Deadline::after(timeout))
            }
            (Some(socket), Some(iob)) => {
                if data.len() > iob.capacity() {
                    Err(NetError::TooBig {
                        size: data.len(),
                        capacity: iob.capacity(),
                    })
                } else {
                    let flushed = if iob.fits(data.len()) {
                        Ok(0)
                    } else {
                        flush_iob(socket, self.wait.as_mut(), iob, timeout)
                    };
                    flushed.map(|_| {
                        iob.put(data);
                        data.len()
                    })
                }
            }
            (None, _) => Err(NetError::NotConnected),
        };
        result.map_err(|e| self.fail(e))
    }

    /// Sends several buffers as one request.
    ///
    /// Unbuffered, this goes straight to `writev`, resuming after partial
    /// writes where the previous call stopped.
    pub fn send_vectored(&mut self, bufs: &[&[u8]]) -> Result<usize, NetError> {
        self.ensure_connected()?;
        let timeout = self.config.send_timeout;
        let total: usize = bufs.iter().map(|b| b.len()).sum();
        let result = match (self.socket.as_mut(), self.send_buf.as_mut()) {
            (Some(socket), None) => {
                writev_all(socket, self.wait.as_mut(), bufs, &Deadline::after(timeout))
            }
            (Some(socket), Some(iob)) => {
                if total > iob.capacity() {
                    Err(NetError::TooBig {
                        size: total,
                        capacity: iob.capacity(),
                    })
                } else {
                    let flushed = if iob.fits(total) {
                        Ok(0)
                    } else {
                        flush_iob(socket, self.wait.as_mut(), iob, timeout)
                    };
                    flushed.map(|_| {
                        for buf in bufs {
                            iob.put(buf);
                        }
                        total
                    })
                }
            }
            (None, _) => Err(NetError::NotConnected),
        };
        result.map_err(|e| self.fail(e))
    }

    /// Writes out everything buffered. Returns the number of bytes flushed.
    pub fn flush(&mut self) -> Result<usize, NetError> {
        self.ensure_connected()?;
        let timeout = self.config.send_timeout;
        let result = match (self.socket.as_mut(), self.send_buf.as_mut()) {
            (Some(socket), Some(iob)) => flush_iob(socket, self.wait.as_mut(), iob, timeout),
            _ => Ok(0),
        };
        result.map_err(|e| self.fail(e))
    }

    /// Fills `buf` completely.
    ///
    /// With a receive buffer, unconsumed bytes are handed out first and the
    /// buffer is refilled with one read at a time until the request is met.
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize, NetError> {
        self.ensure_connected()?;
        let deadline = Deadline::after(self.config.recv_timeout);
        let result = match (self.socket.as_mut(), self.recv_buf.as_mut()) {
            (Some(socket), None) => read_exact(socket, self.wait.as_mut(), buf, &deadline),
            (Some(socket), Some(iob)) => {
                recv_buffered(socket, self.wait.as_mut(), iob, buf, &deadline)
            }
            (None, _) => Err(NetError::NotConnected),
        };
        result.map_err(|e| self.fail(e))
    }

    /// Closes the socket. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            tracing::debug!(fd = socket.fd(), "closing connection");
            socket.close();
        }
        self.state = ConnectionState::Closed;
    }
}

impl<S: SocketOps> Drop for Connection<S> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<S: SocketOps> fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("state", &self.state)
            .field("send_buf", &self.send_buf)
            .field("recv_buf", &self.recv_buf)
            .finish()
    }
}

fn await_ready(
    fd: RawFd,
    wait: &mut dyn IoWait,
    interest: Interest,
    deadline: &Deadline,
    op: &'static str,
) -> Result<(), NetError> {
    match wait.wait(fd, interest, deadline.remaining()) {
        Ok(_) => Ok(()),
        Err(WaitError::Timeout) => Err(NetError::Timeout { op }),
        Err(WaitError::System(e)) => Err(NetError::system(op, e)),
    }
}

fn write_all<S: SocketOps>(
    socket: &mut S,
    wait: &mut dyn IoWait,
    mut data: &[u8],
    deadline: &Deadline,
) -> Result<usize, NetError> {
    let total = data.len();
    while !data.is_empty() {
        match socket.write(data) {
            Ok(0) => return Err(NetError::Closed),
            Ok(n) => data = &data[n..],
            Err(e) if is_transient(&e) => {
                await_ready(socket.fd(), wait, Interest::WRITE, deadline, "write")?
            }
            Err(e) => return Err(NetError::system("write", e)),
        }
    }
    Ok(total)
}

fn writev_all<S: SocketOps>(
    socket: &mut S,
    wait: &mut dyn IoWait,
    bufs: &[&[u8]],
    deadline: &Deadline,
) -> Result<usize, NetError> {
    // Owned by this loop; partial writes trim it in place.
    let mut parts: Vec<&[u8]> = bufs.iter().copied().filter(|b| !b.is_empty()).collect();
    let mut head = 0;
    let mut total = 0;
    while head < parts.len() {
        let result = {
            let iov: Vec<IoSlice<'_>> = parts[head..]
                .iter()
                .take(IOV_MAX)
                .map(|p| IoSlice::new(p))
                .collect();
            socket.writev(&iov)
        };
        match result {
            Ok(0) => return Err(NetError::Closed),
            Ok(mut n) => {
                total += n;
                while n > 0 {
                    let first = parts[head];
                    if first.len() > n {
                        parts[head] = &first[n..];
                        n = 0;
                    } else {
                        n -= first.len();
                        head += 1;
                    }
                }
            }
            Err(e) if is_transient(&e) => {
                await_ready(socket.fd(), wait, Interest::WRITE, deadline, "writev")?
            }
            Err(e) => return Err(NetError::system("writev", e)),
        }
    }
    Ok(total)
}

fn flush_iob<S: SocketOps>(
    socket: &mut S,
    wait: &mut dyn IoWait,
    iob: &mut Iob,
    timeout: Option<Duration>,
) -> Result<usize, NetError> {
    let deadline = Deadline::after(timeout);
    let flushed = match iob.drain_parts() {
        ([], _) => return Ok(0),
        (pending, Some(transfer)) => transfer_all(transfer, pending)?,
        (pending, None) => write_all(socket, wait, pending, &deadline)?,
    };
    iob.mark_flushed();
    Ok(flushed)
}

fn transfer_all(transfer: &mut dyn Transfer, mut data: &[u8]) -> Result<usize, NetError> {
    let total = data.len();
    while !data.is_empty() {
        match transfer.write(data) {
            Ok(0) => return Err(NetError::Closed),
            Ok(n) => data = &data[n..],
            Err(e) => return Err(NetError::system("transfer", e)),
        }
    }
    Ok(total)
}

/// Reads once, waiting for readability as needed. Never returns 0.
fn read_some<S: SocketOps>(
    socket: &mut S,
    wait: &mut dyn IoWait,
    buf: &mut [u8],
    deadline: &Deadline,
) -> Result<usize, NetError> {
    loop {
        match socket.read(buf) {
            Ok(0) => return Err(NetError::Closed),
            Ok(n) => return Ok(n),
            Err(e) if is_transient(&e) => {
                await_ready(socket.fd(), wait, Interest::READ, deadline, "read")?
            }
            Err(e) => return Err(NetError::system("read", e)),
        }
    }
}

fn read_exact<S: SocketOps>(
    socket: &mut S,
    wait: &mut dyn IoWait,
    buf: &mut [u8],
    deadline: &Deadline,
) -> Result<usize, NetError> {
    let mut off = 0;
    while off < buf.len() {
        off += read_some(socket, wait, &mut buf[off..], deadline)?;
    }
    Ok(off)
}

fn recv_buffered<S: SocketOps>(
    socket: &mut S,
    wait: &mut dyn IoWait,
    iob: &mut Iob,
    buf: &mut [u8],
    deadline: &Deadline,
) -> Result<usize, NetError> {
    let mut off = iob.take_into(buf);
    while off < buf.len() {
        let top = match iob.refill_parts() {
            (space, Some(transfer)) => match transfer.read(space) {
                Ok(0) => return Err(NetError::Closed),
                Ok(n) => n,
                Err(e) => return Err(NetError::system("transfer", e)),
            },
            (space, None) => read_some(socket, wait, space, deadline)?,
        };
        iob.set_filled(top);
        tracing::trace!(bytes = top, "receive buffer refilled");
        off += iob.take_into(&mut buf[off..]);
    }
    Ok(off)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wait::CooperativeWait;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct MockState {
        /// Most bytes accepted or returned per call.
        chunk: usize,
        written: Vec<u8>,
        incoming: Vec<u8>,
        read_pos: usize,
        writes: usize,
        reads: usize,
        /// Errors returned before any data moves.
        write_errors: Vec<io::ErrorKind>,
        read_errors: Vec<io::ErrorKind>,
        pending_error: Option<i32>,
        nonblocking: Vec<bool>,
        nodelay: bool,
        timeouts: Option<(Option<Duration>, Option<Duration>)>,
        closed: bool,
    }

    #[derive(Clone, Default)]
    struct MockSocket(Rc<RefCell<MockState>>);

    impl MockSocket {
        fn new(chunk: usize) -> Self {
            let mock = Self::default();
            mock.0.borrow_mut().chunk = chunk;
            mock
        }

        fn state(&self) -> std::cell::Ref<'_, MockState> {
            self.0.borrow()
        }
    }

    impl SocketOps for MockSocket {
        fn fd(&self) -> RawFd {
            42
        }

        fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()> {
            self.0.borrow_mut().nonblocking.push(nonblocking);
            Ok(())
        }

        fn connect(&mut self, _addr: &SocketAddr) -> io::Result<()> {
            Err(io::Error::from_raw_os_error(libc::EINPROGRESS))
        }

        fn take_error(&mut self) -> io::Result<Option<i32>> {
            Ok(self.0.borrow_mut().pending_error.take())
        }

        fn set_nodelay(&mut self, nodelay: bool) -> io::Result<()> {
            self.0.borrow_mut().nodelay = nodelay;
            Ok(())
        }

        fn set_buffer_size(&mut self, _direction: BufferDirection, size: usize) -> io::Result<()> {
            if size <= 256 * 1024 {
                Ok(())
            } else {
                Err(io::Error::from_raw_os_error(libc::ENOBUFS))
            }
        }

        fn set_timeouts(
            &mut self,
            send: Option<Duration>,
            recv: Option<Duration>,
        ) -> io::Result<()> {
            self.0.borrow_mut().timeouts = Some((send, recv));
            Ok(())
        }

        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut st = self.0.borrow_mut();
            st.writes += 1;
            if !st.write_errors.is_empty() {
                return Err(io::Error::from(st.write_errors.remove(0)));
            }
            let n = buf.len().min(st.chunk);
            st.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn writev(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
            let mut st = self.0.borrow_mut();
            st.writes += 1;
            if !st.write_errors.is_empty() {
                return Err(io::Error::from(st.write_errors.remove(0)));
            }
            let mut left = st.chunk;
            let mut n = 0;
            for buf in bufs {
                let take = buf.len().min(left);
                st.written.extend_from_slice(&buf[..take]);
                left -= take;
                n += take;
                if left == 0 {
                    break;
                }
            }
            Ok(n)
        }

        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut st = self.0.borrow_mut();
            st.reads += 1;
            if !st.read_errors.is_empty() {
                return Err(io::Error::from(st.read_errors.remove(0)));
            }
            let avail = st.incoming.len() - st.read_pos;
            let n = buf.len().min(st.chunk).min(avail);
            let start = st.read_pos;
            buf[..n].copy_from_slice(&st.incoming[start..start + n]);
            st.read_pos += n;
            Ok(n)
        }

        fn close(&mut self) {
            self.0.borrow_mut().closed = true;
        }
    }

    fn fixed_resolver() -> Box<dyn Resolver> {
        Box::new(
            |_: &str, port: u16, _: Option<Duration>| -> Result<SocketAddr, NetError> {
                Ok(SocketAddr::from(([127, 0, 0, 1], port)))
            },
        )
    }

    fn ready_wait() -> Box<dyn IoWait> {
        Box::new(CooperativeWait::new(|_, interest, _| Ok(interest)))
    }

    fn connected(config: ConnectionConfig, mock: &MockSocket) -> Connection<MockSocket> {
        connected_with(config, mock, ready_wait())
    }

    fn connected_with(
        config: ConnectionConfig,
        mock: &MockSocket,
        wait: Box<dyn IoWait>,
    ) -> Connection<MockSocket> {
        let mut conn = Connection::with_policy(config, wait, fixed_resolver());
        let socket = mock.clone();
        conn.connect_with(move |_| Ok(socket)).unwrap();
        conn
    }

    fn unbuffered() -> ConnectionConfig {
        ConnectionConfig::new("db", 33013)
            .with_send_buffer(0)
            .with_recv_buffer(0)
    }

    #[test]
    fn test_config_defaults() {
        let config = ConnectionConfig::new("localhost", 33013);
        assert_eq!(config.connect_timeout, Some(DEFAULT_CONNECT_TIMEOUT));
        assert_eq!(config.send_timeout, None);
        assert_eq!(config.send_buffer, DEFAULT_IOB_SIZE);
        assert_eq!(config.recv_buffer, DEFAULT_IOB_SIZE);
    }

    #[test]
    fn test_connect_applies_socket_options() {
        let mock = MockSocket::new(64);
        let config = unbuffered()
            .with_send_timeout(Some(Duration::from_secs(2)))
            .with_recv_timeout(Some(Duration::from_secs(3)));
        let conn = connected(config, &mock);

        assert_eq!(conn.state(), ConnectionState::Connected);
        let st = mock.state();
        assert!(st.nodelay);
        // Cooperative policy keeps the socket non-blocking.
        assert_eq!(st.nonblocking, vec![true]);
        assert_eq!(
            st.timeouts,
            Some((Some(Duration::from_secs(2)), Some(Duration::from_secs(3))))
        );
    }

    #[test]
    fn test_connect_blocking_policy_restores_blocking_mode() {
        struct Ready;
        impl IoWait for Ready {
            fn wait(
                &mut self,
                _fd: RawFd,
                interest: Interest,
                _timeout: Option<Duration>,
            ) -> Result<Interest, WaitError> {
                Ok(interest)
            }
            fn is_blocking(&self) -> bool {
                true
            }
        }

        let mock = MockSocket::new(64);
        connected_with(unbuffered(), &mock, Box::new(Ready));
        assert_eq!(mock.state().nonblocking, vec![true, false]);
    }

    #[test]
    fn test_connect_pending_socket_error() {
        let mock = MockSocket::new(64);
        mock.0.borrow_mut().pending_error = Some(libc::ECONNREFUSED);

        let mut conn = Connection::with_policy(unbuffered(), ready_wait(), fixed_resolver());
        let socket = mock.clone();
        let err = conn.connect_with(move |_| Ok(socket)).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::System);
        assert_eq!(err.os_error(), Some(libc::ECONNREFUSED));
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(conn.last_os_error(), Some(libc::ECONNREFUSED));
        assert!(mock.state().closed);
    }

    #[test]
    fn test_connect_timeout() {
        let mock = MockSocket::new(64);
        let wait = Box::new(CooperativeWait::new(|_, _, _| Err(WaitError::Timeout)));
        let mut conn = Connection::with_policy(unbuffered(), wait, fixed_resolver());
        let socket = mock.clone();
        let err = conn.connect_with(move |_| Ok(socket)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(conn.last_error(), Some(ErrorKind::Timeout));
    }

    #[test]
    fn test_connect_resolve_failure() {
        let resolver = Box::new(
            |host: &str, _: u16, _: Option<Duration>| -> Result<SocketAddr, NetError> {
                Err(NetError::Resolve {
                    host: host.to_string(),
                    reason: "unknown host".into(),
                })
            },
        );
        let mut conn: Connection<MockSocket> =
            Connection::with_policy(unbuffered(), ready_wait(), resolver);
        let err = conn
            .connect_with(|_| Ok(MockSocket::new(1)))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResolveFailed);
    }

    #[test]
    fn test_reconnect_after_close_rejected() {
        let mock = MockSocket::new(64);
        let mut conn = connected(unbuffered(), &mock);
        conn.close();
        conn.close();
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(conn.fd().is_none());

        let err = conn.connect_with(|_| Ok(MockSocket::new(1))).unwrap_err();
        assert!(matches!(
            err,
            NetError::InvalidState(ConnectionState::Closed)
        ));
        assert!(matches!(conn.send(b"x"), Err(NetError::NotConnected)));
    }

    #[test]
    fn test_send_partial_writes() {
        let mock = MockSocket::new(3);
        let mut conn = connected(unbuffered(), &mock);

        let data: Vec<u8> = (0..10).collect();
        assert_eq!(conn.send(&data).unwrap(), 10);

        let st = mock.state();
        assert_eq!(st.written, data);
        // ceil(10 / 3)
        assert_eq!(st.writes, 4);
    }

    #[test]
    fn test_recv_partial_reads() {
        let mock = MockSocket::new(4);
        mock.0.borrow_mut().incoming = (0..10).collect();
        let mut conn = connected(unbuffered(), &mock);

        let mut buf = [0u8; 10];
        assert_eq!(conn.recv(&mut buf).unwrap(), 10);
        assert_eq!(buf.to_vec(), (0..10).collect::<Vec<u8>>());
        assert_eq!(mock.state().reads, 3);
    }

    #[test]
    fn test_send_vectored_partial_writes() {
        let mock = MockSocket::new(4);
        let mut conn = connected(unbuffered(), &mock);

        let n = conn
            .send_vectored(&[b"abc", b"", b"defgh", b"ij"])
            .unwrap();
        assert_eq!(n, 10);
        let st = mock.state();
        assert_eq!(st.written, b"abcdefghij");
        assert_eq!(st.writes, 3);
    }

    #[test]
    fn test_send_timeout_single_write() {
        let mock = MockSocket::new(64);
        mock.0.borrow_mut().write_errors = vec![io::ErrorKind::WouldBlock; 8];

        let mut calls = 0;
        let wait = Box::new(CooperativeWait::new(move |_, interest: Interest, _| {
            calls += 1;
            // The connect wait succeeds; the write wait times out.
            if calls == 1 {
                Ok(interest)
            } else {
                Err(WaitError::Timeout)
            }
        }));
        let config = unbuffered().with_send_timeout(Some(Duration::from_millis(1)));
        let mut conn = connected_with(config, &mock, wait);

        let err = conn.send(b"payload").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(mock.state().writes, 1);
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_send_retries_after_interrupt() {
        let mock = MockSocket::new(64);
        mock.0.borrow_mut().write_errors = vec![io::ErrorKind::Interrupted];
        let mut conn = connected(unbuffered(), &mock);

        conn.send(b"abc").unwrap();
        let st = mock.state();
        assert_eq!(st.writes, 2);
        assert_eq!(st.written, b"abc");
    }

    #[test]
    fn test_send_system_error() {
        let mock = MockSocket::new(64);
        mock.0.borrow_mut().write_errors = vec![io::ErrorKind::BrokenPipe];
        let mut conn = connected(unbuffered(), &mock);

        let err = conn.send(b"abc").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::System);
        assert_eq!(conn.last_error(), Some(ErrorKind::System));
        assert!(!conn.is_connected());
    }

    #[test]
    fn test_peer_closed_on_zero_read() {
        let mock = MockSocket::new(8);
        mock.0.borrow_mut().incoming = b"ab".to_vec();
        let mut conn = connected(unbuffered(), &mock);

        let mut buf = [0u8; 4];
        let err = conn.recv(&mut buf).unwrap_err();
        assert!(matches!(err, NetError::Closed));
        assert_eq!(err.kind(), ErrorKind::PeerClosed);
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_peer_closed_on_zero_write() {
        let mock = MockSocket::new(0);
        let mut conn = connected(unbuffered(), &mock);
        assert!(matches!(conn.send(b"x"), Err(NetError::Closed)));
    }

    #[test]
    fn test_buffered_send_coalesces() {
        let mock = MockSocket::new(64);
        let config = unbuffered().with_send_buffer(8);
        let mut conn = connected(config, &mock);

        conn.send(b"abc").unwrap();
        conn.send(b"def").unwrap();
        assert_eq!(mock.state().writes, 0);

        // Does not fit behind the 6 buffered bytes: flush, then buffer.
        conn.send(b"ghijk").unwrap();
        assert_eq!(mock.state().written, b"abcdef");
        assert_eq!(mock.state().writes, 1);

        assert_eq!(conn.flush().unwrap(), 5);
        assert_eq!(mock.state().written, b"abcdefghijk");
        assert_eq!(conn.flush().unwrap(), 0);
    }

    #[test]
    fn test_buffered_send_too_big() {
        let mock = MockSocket::new(64);
        let mut conn = connected(unbuffered().with_send_buffer(4), &mock);

        let err = conn.send(b"12345").unwrap_err();
        assert!(matches!(
            err,
            NetError::TooBig {
                size: 5,
                capacity: 4
            }
        ));
        assert_eq!(err.kind(), ErrorKind::TooBig);
        // Rejected before any I/O; the connection stays usable.
        assert!(conn.is_connected());

        let err = conn.send_vectored(&[b"12", b"345"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TooBig);
    }

    #[test]
    fn test_buffered_send_vectored() {
        let mock = MockSocket::new(64);
        let mut conn = connected(unbuffered().with_send_buffer(6), &mock);

        conn.send_vectored(&[b"ab", b"cd"]).unwrap();
        conn.send_vectored(&[b"ef", b"gh"]).unwrap();
        assert_eq!(mock.state().written, b"abcd");
        conn.flush().unwrap();
        assert_eq!(mock.state().written, b"abcdefgh");
    }

    #[test]
    fn test_buffered_recv_refills() {
        let mock = MockSocket::new(5);
        mock.0.borrow_mut().incoming = (0..20).collect();
        let mut conn = connected(unbuffered().with_recv_buffer(8), &mock);

        let mut first = [0u8; 3];
        conn.recv(&mut first).unwrap();
        assert_eq!(first, [0, 1, 2]);
        assert_eq!(mock.state().reads, 1);

        // Two bytes remain buffered; the rest takes further refills.
        let mut second = [0u8; 9];
        conn.recv(&mut second).unwrap();
        assert_eq!(second.to_vec(), (3..12).collect::<Vec<u8>>());
        assert_eq!(mock.state().reads, 3);
    }

    #[test]
    fn test_transfer_hook_replaces_socket_writes() {
        struct Upper(Rc<RefCell<Vec<u8>>>);
        impl Transfer for Upper {
            fn write(&mut self, data: &[u8]) -> io::Result<usize> {
                self.0
                    .borrow_mut()
                    .extend(data.iter().map(|b| b.to_ascii_uppercase()));
                Ok(data.len())
            }
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Ok(0)
            }
        }
        let sink = Rc::new(RefCell::new(Vec::new()));
        let mock = MockSocket::new(64);
        let mut conn = connected(unbuffered().with_send_buffer(16), &mock);
        conn.set_send_transfer(Box::new(Upper(sink.clone())));

        conn.send(b"hello").unwrap();
        conn.flush().unwrap();
        assert_eq!(sink.borrow().as_slice(), b"HELLO");
        assert_eq!(mock.state().writes, 0);
    }
}
