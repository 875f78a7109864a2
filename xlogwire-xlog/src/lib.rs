//! # xlogwire-xlog
//!
//! Log row decoding for xlogwire.
//!
//! This crate provides:
//! - Tuple and request body parsing, including update operations
//! - Re-encoding of rows into the value format with per-space type hints
//! - Batch iteration with LSN range and space filters
//! - Record sources over log files and live byte streams

pub mod batch;
pub mod encode;
pub mod error;
pub mod file;
pub mod request;
pub mod row;
pub mod schema;
pub mod stream;
pub mod tuple;
pub mod visit;
pub mod wire;

pub use batch::{Batch, BatchOptions, BatchReader, RecordSource, ResumeCursor, DEFAULT_BATCH_SIZE};
pub use encode::{encode_field, encode_key, encode_op, encode_ops, encode_row, encode_tuple};
pub use error::XlogError;
pub use file::{LogReader, LogWriter, RowHeader};
pub use request::{RequestType, RowOp, Splice, UpdateArgument, UpdateOp, UpdateOpcode};
pub use row::{LogKind, LogRow, Record, RecordHeader};
pub use schema::{FieldType, NoSchema, SchemaRegistry, Schemas, SpaceSchema};
pub use stream::{subscribe, ByteSource, ReadSource, StreamSource, DEFAULT_REPLICATION_PORT};
pub use tuple::Tuple;
pub use visit::{visit_row, FieldValue, RowVisitor, Section};
