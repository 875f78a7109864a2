//! Fixed-capacity framed buffers used for socket-level buffering.
//!
//! A send buffer coalesces small writes: `off` is the amount buffered but
//! not yet flushed. A receive buffer holds the unconsumed window
//! `[off, top)` of the last socket read.

use std::fmt;
use std::io;

/// Default IOB capacity (16 KiB).
pub const DEFAULT_IOB_SIZE: usize = 16 * 1024;

/// Replaces the raw socket transfer of an IOB (e.g. compression).
pub trait Transfer {
    /// Moves bytes out; returns how many were consumed.
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Fills `buf`; returns how many bytes were produced.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

pub struct Iob {
    buf: Box<[u8]>,
    off: usize,
    top: usize,
    transfer: Option<Box<dyn Transfer>>,
}

impl Iob {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            off: 0,
            top: 0,
            transfer: None,
        }
    }

    pub fn with_transfer(capacity: usize, transfer: Box<dyn Transfer>) -> Self {
        let mut iob = Self::new(capacity);
        iob.transfer = Some(transfer);
        iob
    }

    pub fn set_transfer(&mut self, transfer: Box<dyn Transfer>) {
        self.transfer = Some(transfer);
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    // Send side

    /// Returns the bytes buffered but not yet flushed.
    pub fn pending(&self) -> &[u8] {
        &self.buf[..self.off]
    }

    pub fn fits(&self, size: usize) -> bool {
        self.off + size <= self.buf.len()
    }

    /// Appends `data`; the caller checks [`Iob::fits`] first.
    pub(crate) fn put(&mut self, data: &[u8]) {
        debug_assert!(self.fits(data.len()));
        self.buf[self.off..self.off + data.len()].copy_from_slice(data);
        self.off += data.len();
    }

    /// Splits the buffer into the pending bytes and its transfer hook.
    pub(crate) fn drain_parts(&mut self) -> (&[u8], Option<&mut (dyn Transfer + 'static)>) {
        (&self.buf[..self.off], self.transfer.as_deref_mut())
    }

    pub(crate) fn mark_flushed(&mut self) {
        self.off = 0;
    }

    // Receive side

    /// Returns the number of unconsumed bytes.
    pub fn available(&self) -> usize {
        self.top - self.off
    }

    /// Copies unconsumed bytes into `out`; returns how many were copied.
    pub(crate) fn take_into(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.available());
        out[..n].copy_from_slice(&self.buf[self.off..self.off + n]);
        self.off += n;
        n
    }

    /// Empties the window and hands the whole storage to `fill`.
    pub(crate) fn refill_parts(&mut self) -> (&mut [u8], Option<&mut (dyn Transfer + 'static)>) {
        self.off = 0;
        self.top = 0;
        (&mut self.buf[..], self.transfer.as_deref_mut())
    }

    pub(crate) fn set_filled(&mut self, top: usize) {
        debug_assert!(top <= self.buf.len());
        self.off = 0;
        self.top = top;
    }
}

impl fmt::Debug for Iob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Iob")
            .field("capacity", &self.buf.len())
            .field("off", &self.off)
            .field("top", &self.top)
            .field("transfer", &self.transfer.is_some())
            .finish()
    }
}
