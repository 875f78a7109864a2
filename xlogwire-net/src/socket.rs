//! Socket system calls.
//!
//! [`SocketOps`] is the seam between the connection logic and the OS; the
//! production implementation is [`OsSocket`], a thin wrapper over libc.

use std::io::{self, IoSlice};
use std::mem;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Largest OS buffer size tried when growing socket buffers (128 MiB).
pub const MAX_OS_BUFFER_SIZE: usize = 128 * 1024 * 1024;

/// Floor used when no OS buffer size is configured (16 KiB).
pub const DEFAULT_OS_BUFFER_FLOOR: usize = 16 * 1024;

/// Most buffers passed to a single `writev`.
pub const IOV_MAX: usize = 1024;

/// Which OS socket buffer to size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferDirection {
    Send,
    Recv,
}

/// Operations the connection performs on its socket.
pub trait SocketOps {
    fn fd(&self) -> RawFd;

    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()>;

    /// Issues `connect`; an in-progress connect is reported as an error
    /// carrying `EINPROGRESS`.
    fn connect(&mut self, addr: &SocketAddr) -> io::Result<()>;

    /// Reads and clears the pending socket error (`SO_ERROR`).
    fn take_error(&mut self) -> io::Result<Option<i32>>;

    fn set_nodelay(&mut self, nodelay: bool) -> io::Result<()>;

    fn set_buffer_size(&mut self, direction: BufferDirection, size: usize) -> io::Result<()>;

    /// Applies `SO_SNDTIMEO`/`SO_RCVTIMEO`; `None` disables the timeout.
    fn set_timeouts(&mut self, send: Option<Duration>, recv: Option<Duration>) -> io::Result<()>;

    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    fn writev(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize>;

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn close(&mut self);
}

/// Finds the largest size in `[floor, MAX_OS_BUFFER_SIZE]` that `apply`
/// accepts, by binary search. A `floor` of 0 means
/// [`DEFAULT_OS_BUFFER_FLOOR`].
pub fn grow_buffer(floor: usize, mut apply: impl FnMut(usize) -> bool) -> Option<usize> {
    let mut min = if floor == 0 {
        DEFAULT_OS_BUFFER_FLOOR
    } else {
        floor
    };
    let mut max = MAX_OS_BUFFER_SIZE;
    let mut accepted = None;
    while min <= max {
        let candidate = min + (max - min) / 2;
        if apply(candidate) {
            accepted = Some(candidate);
            min = candidate + 1;
        } else if candidate == 0 {
            break;
        } else {
            max = candidate - 1;
        }
    }
    accepted
}

fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

fn cvt_size(ret: libc::ssize_t) -> io::Result<usize> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret as usize)
    }
}

fn timeval(timeout: Option<Duration>) -> libc::timeval {
    match timeout {
        Some(d) => libc::timeval {
            tv_sec: d.as_secs() as libc::time_t,
            tv_usec: d.subsec_micros() as libc::suseconds_t,
        },
        None => libc::timeval {
            tv_sec: 0,
            tv_usec: 0,
        },
    }
}

fn sockaddr(addr: &SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    // SAFETY: sockaddr_storage is plain data; all-zero is a valid value.
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let len = match addr {
        SocketAddr::V4(a) => {
            // SAFETY: sockaddr_storage is large enough and suitably aligned
            // for sockaddr_in.
            let sin = unsafe { &mut *(&mut storage as *mut _ as *mut libc::sockaddr_in) };
            sin.sin_family = libc::AF_INET as libc::sa_family_t;
            sin.sin_port = a.port().to_be();
            sin.sin_addr = libc::in_addr {
                s_addr: u32::from_ne_bytes(a.ip().octets()),
            };
            mem::size_of::<libc::sockaddr_in>()
        }
        SocketAddr::V6(a) => {
            // SAFETY: as above, for sockaddr_in6.
            let sin6 = unsafe { &mut *(&mut storage as *mut _ as *mut libc::sockaddr_in6) };
            sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sin6.sin6_port = a.port().to_be();
            sin6.sin6_flowinfo = a.flowinfo();
            sin6.sin6_addr = libc::in6_addr {
                s6_addr: a.ip().octets(),
            };
            sin6.sin6_scope_id = a.scope_id();
            mem::size_of::<libc::sockaddr_in6>()
        }
    };
    (storage, len as libc::socklen_t)
}

/// TCP socket backed by a raw file descriptor.
#[derive(Debug)]
pub struct OsSocket {
    fd: RawFd,
}

impl OsSocket {
    /// Opens a TCP socket for the address family of `addr`.
    pub fn open(addr: &SocketAddr) -> io::Result<Self> {
        let domain = match addr {
            SocketAddr::V4(_) => libc::AF_INET,
            SocketAddr::V6(_) => libc::AF_INET6,
        };
        // SAFETY: plain syscall, no pointers involved.
        let fd = cvt(unsafe { libc::socket(domain, libc::SOCK_STREAM, 0) })?;
        Ok(Self { fd })
    }

    fn setsockopt<T>(&self, level: libc::c_int, name: libc::c_int, value: &T) -> io::Result<()> {
        // SAFETY: `value` points to a live T of the advertised size.
        cvt(unsafe {
            libc::setsockopt(
                self.fd,
                level,
                name,
                value as *const T as *const libc::c_void,
                mem::size_of::<T>() as libc::socklen_t,
            )
        })?;
        Ok(())
    }
}

impl SocketOps for OsSocket {
    fn fd(&self) -> RawFd {
        self.fd
    }

    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()> {
        // SAFETY: fcntl on an fd we own.
        let flags = cvt(unsafe { libc::fcntl(self.fd, libc::F_GETFL) })?;
        let flags = if nonblocking {
            flags | libc::O_NONBLOCK
        } else {
            flags & !libc::O_NONBLOCK
        };
        cvt(unsafe { libc::fcntl(self.fd, libc::F_SETFL, flags) })?;
        Ok(())
    }

    fn connect(&mut self, addr: &SocketAddr) -> io::Result<()> {
        let (storage, len) = sockaddr(addr);
        // SAFETY: storage holds a valid sockaddr of `len` bytes.
        cvt(unsafe {
            libc::connect(
                self.fd,
                &storage as *const _ as *const libc::sockaddr,
                len,
            )
        })?;
        Ok(())
    }

    fn take_error(&mut self) -> io::Result<Option<i32>> {
        let mut value: libc::c_int = 0;
        let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
        // SAFETY: value/len describe a live c_int.
        cvt(unsafe {
            libc::getsockopt(
                self.fd,
                libc::SOL_SOCKET,
                libc::SO_ERROR,
                &mut value as *mut _ as *mut libc::c_void,
                &mut len,
            )
        })?;
        Ok(if value == 0 { None } else { Some(value) })
    }

    fn set_nodelay(&mut self, nodelay: bool) -> io::Result<()> {
        let value = libc::c_int::from(nodelay);
        self.setsockopt(libc::IPPROTO_TCP, libc::TCP_NODELAY, &value)
    }

    fn set_buffer_size(&mut self, direction: BufferDirection, size: usize) -> io::Result<()> {
        let name = match direction {
            BufferDirection::Send => libc::SO_SNDBUF,
            BufferDirection::Recv => libc::SO_RCVBUF,
        };
        let value = libc::c_int::try_from(size)
            .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
        self.setsockopt(libc::SOL_SOCKET, name, &value)
    }

    fn set_timeouts(&mut self, send: Option<Duration>, recv: Option<Duration>) -> io::Result<()> {
        self.setsockopt(libc::SOL_SOCKET, libc::SO_SNDTIMEO, &timeval(send))?;
        self.setsockopt(libc::SOL_SOCKET, libc::SO_RCVTIMEO, &timeval(recv))
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // SAFETY: buf is a live slice of buf.len() bytes.
        cvt_size(unsafe { libc::write(self.fd, buf.as_ptr() as *const libc::c_void, buf.len()) })
    }

    fn writev(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        let count = bufs.len().min(IOV_MAX) as libc::c_int;
        // SAFETY: IoSlice is ABI compatible with iovec on unix.
        cvt_size(unsafe { libc::writev(self.fd, bufs.as_ptr() as *const libc::iovec, count) })
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: buf is a live, writable slice of buf.len() bytes.
        cvt_size(unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) })
    }

    fn close(&mut self) {
        if self.fd >= 0 {
            // SAFETY: we own the fd and invalidate it right after.
            unsafe { libc::close(self.fd) };
            self.fd = -1;
        }
    }
}

impl Drop for OsSocket {
    fn drop(&mut self) {
        self.close();
    }
}
