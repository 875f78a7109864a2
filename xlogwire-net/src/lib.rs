//! # xlogwire-net
//!
//! Socket transport for xlogwire.
//!
//! This crate provides:
//! - Fixed-capacity send/receive buffers (IOB) with optional transfer hooks
//! - Synchronous TCP connections with timeout and partial I/O handling
//! - Pluggable readiness wait and address resolution policies

pub mod connection;
pub mod error;
pub mod iob;
pub mod resolve;
pub mod socket;
pub mod wait;

pub use connection::{Connection, ConnectionConfig, ConnectionState};
pub use error::NetError;
pub use iob::{Iob, Transfer, DEFAULT_IOB_SIZE};
pub use resolve::{Resolver, SystemResolver};
pub use socket::{grow_buffer, BufferDirection, OsSocket, SocketOps};
pub use wait::{BlockingWait, CooperativeWait, Deadline, Interest, IoWait, WaitError};

/// Default port of the database's primary (binary) protocol.
pub const DEFAULT_PORT: u16 = 33013;
