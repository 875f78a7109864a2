//! Transport error types.

use crate::connection::ConnectionState;
use std::io;
use thiserror::Error;
use xlogwire_codec::ErrorKind;

/// Transport errors.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("{op} failed: {source}")]
    System {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("{op} timed out")]
    Timeout { op: &'static str },

    #[error("failed to resolve '{host}': {reason}")]
    Resolve { host: String, reason: String },

    #[error("connection closed by peer")]
    Closed,

    #[error("request of {size} bytes exceeds buffer capacity {capacity}")]
    TooBig { size: usize, capacity: usize },

    #[error("not connected")]
    NotConnected,

    #[error("connection is {0}")]
    InvalidState(ConnectionState),
}

impl NetError {
    pub(crate) fn system(op: &'static str, source: io::Error) -> Self {
        NetError::System { op, source }
    }

    /// Returns the stable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            NetError::System { .. } => ErrorKind::System,
            NetError::Timeout { .. } => ErrorKind::Timeout,
            NetError::Resolve { .. } => ErrorKind::ResolveFailed,
            NetError::Closed => ErrorKind::PeerClosed,
            NetError::TooBig { .. } => ErrorKind::TooBig,
            NetError::NotConnected | NetError::InvalidState(_) => ErrorKind::System,
        }
    }

    /// Returns the OS error number, if the failure came from a system call.
    pub fn os_error(&self) -> Option<i32> {
        match self {
            NetError::System { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }

    /// Returns whether this error is retryable.
    ///
    /// Nothing in this crate retries on its own; callers decide whether to
    /// reconnect and try again.
    pub fn is_retryable(&self) -> bool {
        match self {
            NetError::Timeout { .. } => true,
            NetError::System { source, .. } => is_transient(source),
            _ => false,
        }
    }
}

/// Returns whether an OS error only means "try again".
pub(crate) fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(NetError::Closed.kind(), ErrorKind::PeerClosed);
        assert_eq!(NetError::Timeout { op: "read" }.kind(), ErrorKind::Timeout);
        assert_eq!(
            NetError::TooBig {
                size: 10,
                capacity: 4
            }
            .kind(),
            ErrorKind::TooBig
        );
        assert_eq!(
            NetError::Resolve {
                host: "nowhere".into(),
                reason: "no address".into()
            }
            .kind(),
            ErrorKind::ResolveFailed
        );
    }

    #[test]
    fn test_os_error_preserved() {
        let err = NetError::system("write", io::Error::from_raw_os_error(libc::EPIPE));
        assert_eq!(err.os_error(), Some(libc::EPIPE));
        assert_eq!(err.kind(), ErrorKind::System);
        assert!(err.to_string().starts_with("write failed"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retryable() {
        assert!(NetError::Timeout { op: "connect" }.is_retryable());
        assert!(NetError::system("read", io::Error::from(io::ErrorKind::Interrupted))
            .is_retryable());
        assert!(!NetError::Closed.is_retryable());
        assert!(!NetError::NotConnected.is_retryable());
    }
}
