//! # xlogwire-codec
//!
//! Streaming codec for the xlogwire value format (MessagePack).
//!
//! This crate provides:
//! - A growable output stream over pluggable backing stores
//! - Typed encoders that reserve a worst-case bound and advance exactly
//! - A zero-copy, bounds-checked decode cursor
//! - The error kinds shared by every xlogwire crate

pub mod decode;
pub mod encode;
pub mod error;
pub mod stream;

pub use decode::{value_len, Cursor, Value};
pub use error::{CodecError, ErrorKind};
pub use stream::{Arena, Backing, ErrorSink, FixedScratch, MpStream, DEFAULT_CHUNK_SIZE};
