//! Log decoder error types.

use thiserror::Error;
use xlogwire_codec::{CodecError, ErrorKind};
use xlogwire_net::NetError;

/// Errors raised while reading, decoding or re-encoding log rows.
#[derive(Debug, Error)]
pub enum XlogError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Net(#[from] NetError),

    #[error("truncated {what} at position {position}")]
    Truncated { what: &'static str, position: usize },

    #[error("malformed record at position {position}: {reason}")]
    Malformed { position: usize, reason: String },

    #[error("unrecognized operation: {0}")]
    UnrecognizedOperation(String),

    #[error("undefined update operation: 0x{0:02x}")]
    UnrecognizedUpdateOp(u8),

    #[error("bad value for arithm op: expected 4 or 8 bytes, got {size}")]
    BadArithmeticValue { size: usize },

    #[error("Cannot convert field '{field}' to type NUM, expected len 4 or 8, got '{size}'")]
    FieldConversion { field: String, size: usize },

    #[error("record corrupted at offset {offset}: CRC mismatch (expected {expected:#x}, got {actual:#x})")]
    CorruptedRecord {
        offset: u64,
        expected: u32,
        actual: u32,
    },

    #[error("invalid log header at offset {offset}: {reason}")]
    InvalidHeader { offset: u64, reason: String },

    #[error("parsing failed at {context}: {source}")]
    Source {
        context: String,
        #[source]
        source: Box<XlogError>,
    },

    #[error("schema error: {0}")]
    Schema(#[from] serde_yaml::Error),
}

impl XlogError {
    /// Returns the stable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            XlogError::Io(_) => ErrorKind::System,
            XlogError::Codec(err) => err.kind(),
            XlogError::Net(err) => err.kind(),
            XlogError::Source { source, .. } => source.kind(),
            XlogError::UnrecognizedOperation(_) | XlogError::UnrecognizedUpdateOp(_) => {
                ErrorKind::UnrecognizedOperation
            }
            XlogError::Truncated { .. }
            | XlogError::Malformed { .. }
            | XlogError::BadArithmeticValue { .. }
            | XlogError::FieldConversion { .. }
            | XlogError::CorruptedRecord { .. }
            | XlogError::InvalidHeader { .. }
            | XlogError::Schema(_) => ErrorKind::MalformedEncoding,
        }
    }

    /// Returns the position within the record for decode errors.
    pub fn position(&self) -> Option<usize> {
        match self {
            XlogError::Truncated { position, .. } | XlogError::Malformed { position, .. } => {
                Some(*position)
            }
            XlogError::Codec(err) => err.position(),
            XlogError::Source { source, .. } => source.position(),
            _ => None,
        }
    }

    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            XlogError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
            ),
            XlogError::Source { source, .. } => source.is_retryable(),
            XlogError::Net(err) => err.is_retryable(),
            _ => false,
        }
    }
}
