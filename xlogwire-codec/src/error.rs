//! Codec error types and the error kinds shared across xlogwire crates.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised by the growable buffer, the encoders and the decode cursor.
#[derive(Debug, Clone, Error)]
pub enum CodecError {
    #[error("Immutable 'mpstream' buffer")]
    Immutable,

    #[error("Failed to allocate {size} bytes in '{context}' for 'mpstream'")]
    AllocationFailed { context: &'static str, size: usize },

    #[error("advance of {requested} bytes exceeds reserved {reserved}")]
    AdvanceOverflow { requested: usize, reserved: usize },

    #[error("value of {size} bytes exceeds format limit {max}")]
    TooBig { size: usize, max: usize },

    #[error("malformed value at position {position}: {reason}")]
    Malformed { position: usize, reason: String },
}

impl CodecError {
    /// Returns the stable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CodecError::Immutable => ErrorKind::ImmutableViolation,
            CodecError::AllocationFailed { .. } => ErrorKind::AllocationFailed,
            CodecError::AdvanceOverflow { .. } => ErrorKind::BufferFull,
            CodecError::TooBig { .. } => ErrorKind::TooBig,
            CodecError::Malformed { .. } => ErrorKind::MalformedEncoding,
        }
    }

    /// Returns the buffer position for decode errors.
    pub fn position(&self) -> Option<usize> {
        match self {
            CodecError::Malformed { position, .. } => Some(*position),
            _ => None,
        }
    }

    pub(crate) fn malformed(position: usize, reason: impl Into<String>) -> Self {
        CodecError::Malformed {
            position,
            reason: reason.into(),
        }
    }
}

/// Stable error kinds.
///
/// These are shared by the codec, the transport and the log decoder so that
/// callers can branch on one taxonomy regardless of the layer that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    // Codec errors
    MalformedEncoding,
    BufferFull,
    TooBig,
    AllocationFailed,
    ImmutableViolation,

    // Transport errors
    System,
    Timeout,
    ResolveFailed,
    PeerClosed,

    // Log decoder errors
    UnrecognizedOperation,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::MalformedEncoding => write!(f, "MALFORMED_ENCODING"),
            ErrorKind::BufferFull => write!(f, "BUFFER_FULL"),
            ErrorKind::TooBig => write!(f, "TOO_BIG"),
            ErrorKind::AllocationFailed => write!(f, "ALLOCATION_FAILED"),
            ErrorKind::ImmutableViolation => write!(f, "IMMUTABLE_VIOLATION"),
            ErrorKind::System => write!(f, "SYSTEM"),
            ErrorKind::Timeout => write!(f, "TIMEOUT"),
            ErrorKind::ResolveFailed => write!(f, "RESOLVE_FAILED"),
            ErrorKind::PeerClosed => write!(f, "PEER_CLOSED"),
            ErrorKind::UnrecognizedOperation => write!(f, "UNRECOGNIZED_OPERATION"),
        }
    }
}
