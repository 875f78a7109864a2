//! Readiness wait policies.
//!
//! All suspension happens inside [`IoWait::wait`]: a blocking policy parks
//! the calling thread in `poll`, a cooperative one hands control to the
//! caller's scheduler until the descriptor is ready.

use std::io;
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

/// Readiness a caller waits for, or that a wait reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub read: bool,
    pub write: bool,
}

impl Interest {
    pub const READ: Interest = Interest {
        read: true,
        write: false,
    };
    pub const WRITE: Interest = Interest {
        read: false,
        write: true,
    };
    pub const NONE: Interest = Interest {
        read: false,
        write: false,
    };

    fn poll_events(self) -> libc::c_short {
        let mut events = 0;
        if self.read {
            events |= libc::POLLIN;
        }
        if self.write {
            events |= libc::POLLOUT;
        }
        events
    }
}

/// Why a wait did not report readiness.
#[derive(Debug)]
pub enum WaitError {
    Timeout,
    System(io::Error),
}

/// Waits until a descriptor is ready.
pub trait IoWait {
    /// Waits for `interest` on `fd` for at most `timeout` (`None` = forever)
    /// and returns the readiness observed.
    fn wait(
        &mut self,
        fd: RawFd,
        interest: Interest,
        timeout: Option<Duration>,
    ) -> Result<Interest, WaitError>;

    /// Whether this policy blocks the calling thread. A connection switches
    /// its socket back to blocking mode after connecting under such a policy.
    fn is_blocking(&self) -> bool {
        false
    }
}

/// Wall-clock deadline fixed at the start of an operation.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    pub fn after(timeout: Option<Duration>) -> Self {
        Self {
            at: timeout.map(|t| Instant::now() + t),
        }
    }

    pub fn never() -> Self {
        Self { at: None }
    }

    /// Returns the time left, recomputed from now; `None` means no limit.
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.remaining(), Some(left) if left.is_zero())
    }
}

/// Blocks the calling thread in `poll(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct BlockingWait;

impl BlockingWait {
    pub fn new() -> Self {
        Self
    }
}

impl IoWait for BlockingWait {
    fn wait(
        &mut self,
        fd: RawFd,
        interest: Interest,
        timeout: Option<Duration>,
    ) -> Result<Interest, WaitError> {
        let deadline = Deadline::after(timeout);
        loop {
            let millis = match deadline.remaining() {
                None => -1,
                Some(left) => {
                    // Round up so sub-millisecond budgets still poll once.
                    let ms = left.as_micros().div_ceil(1000);
                    libc::c_int::try_from(ms).unwrap_or(libc::c_int::MAX)
                }
            };
            let mut pfd = libc::pollfd {
                fd,
                events: interest.poll_events(),
                revents: 0,
            };
            // SAFETY: pfd is a single live pollfd.
            let ret = unsafe { libc::poll(&mut pfd, 1, millis) };
            if ret < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    if deadline.is_expired() {
                        return Err(WaitError::Timeout);
                    }
                    continue;
                }
                return Err(WaitError::System(err));
            }
            if ret == 0 {
                return Err(WaitError::Timeout);
            }
            let errored = pfd.revents & (libc::POLLERR | libc::POLLHUP) != 0;
            return Ok(Interest {
                read: pfd.revents & libc::POLLIN != 0 || (errored && interest.read),
                write: pfd.revents & libc::POLLOUT != 0 || (errored && interest.write),
            });
        }
    }

    fn is_blocking(&self) -> bool {
        true
    }
}

/// Delegates waits to a caller-supplied scheduler hook.
pub struct CooperativeWait<F> {
    hook: F,
}

impl<F> CooperativeWait<F>
where
    F: FnMut(RawFd, Interest, Option<Duration>) -> Result<Interest, WaitError>,
{
    pub fn new(hook: F) -> Self {
        Self { hook }
    }
}

impl<F> IoWait for CooperativeWait<F>
where
    F: FnMut(RawFd, Interest, Option<Duration>) -> Result<Interest, WaitError>,
{
    fn wait(
        &mut self,
        fd: RawFd,
        interest: Interest,
        timeout: Option<Duration>,
    ) -> Result<Interest, WaitError> {
        (self.hook)(fd, interest, timeout)
    }
}
