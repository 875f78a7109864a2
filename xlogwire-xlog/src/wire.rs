//! Little-endian readers and writers for log records.
//!
//! Sizes inside tuples and update operations use a variable-length
//! integer: 7 bits per byte, most significant group first, high bit set on
//! every byte but the last, at most 5 bytes.

use crate::error::XlogError;
use bytes::{BufMut, Bytes};

/// Longest varint encoding.
pub const MAX_VARINT_LEN: usize = 5;

/// Returns the encoded length of `value` as a varint.
pub fn varint_len(value: u32) -> usize {
    if value < (1 << 7) {
        1
    } else if value < (1 << 14) {
        2
    } else if value < (1 << 21) {
        3
    } else if value < (1 << 28) {
        4
    } else {
        5
    }
}

pub fn put_varint(buf: &mut impl BufMut, value: u32) {
    let len = varint_len(value);
    for i in (1..len).rev() {
        buf.put_u8(((value >> (7 * i)) & 0x7f) as u8 | 0x80);
    }
    buf.put_u8((value & 0x7f) as u8);
}

/// Cursor over a record's bytes. Slices share the record's storage.
#[derive(Debug, Clone)]
pub struct WireReader {
    data: Bytes,
    pos: usize,
}

impl WireReader {
    pub fn new(data: Bytes) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Returns the unread bytes without consuming them.
    pub fn rest(&self) -> Bytes {
        self.data.slice(self.pos..)
    }

    fn take(&mut self, size: usize, what: &'static str) -> Result<&[u8], XlogError> {
        if size > self.remaining() {
            return Err(XlogError::Truncated {
                what,
                position: self.pos,
            });
        }
        let start = self.pos;
        self.pos += size;
        Ok(&self.data[start..start + size])
    }

    pub fn bytes(&mut self, size: usize, what: &'static str) -> Result<Bytes, XlogError> {
        if size > self.remaining() {
            return Err(XlogError::Truncated {
                what,
                position: self.pos,
            });
        }
        let slice = self.data.slice(self.pos..self.pos + size);
        self.pos += size;
        Ok(slice)
    }

    pub fn u8(&mut self, what: &'static str) -> Result<u8, XlogError> {
        Ok(self.take(1, what)?[0])
    }

    pub fn u16(&mut self, what: &'static str) -> Result<u16, XlogError> {
        let b = self.take(2, what)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self, what: &'static str) -> Result<u32, XlogError> {
        let b = self.take(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn i32(&mut self, what: &'static str) -> Result<i32, XlogError> {
        Ok(self.u32(what)? as i32)
    }

    pub fn u64(&mut self, what: &'static str) -> Result<u64, XlogError> {
        let b = self.take(8, what)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(u64::from_le_bytes(buf))
    }

    pub fn f64(&mut self, what: &'static str) -> Result<f64, XlogError> {
        Ok(f64::from_bits(self.u64(what)?))
    }

    /// Reads a varint; returns the value and the number of bytes it used.
    pub fn varint(&mut self, what: &'static str) -> Result<(u32, usize), XlogError> {
        let start = self.pos;
        let mut value: u32 = 0;
        for i in 0..MAX_VARINT_LEN {
            let b = self.u8(what)?;
            value = (value << 7) | u32::from(b & 0x7f);
            if b & 0x80 == 0 {
                return Ok((value, i + 1));
            }
        }
        Err(XlogError::Malformed {
            position: start,
            reason: format!("{} size prefix longer than {} bytes", what, MAX_VARINT_LEN),
        })
    }
}

/// Decodes a little-endian 4- or 8-byte unsigned number.
pub fn le_number(data: &[u8]) -> Option<u64> {
    match data.len() {
        4 => Some(u64::from(u32::from_le_bytes([
            data[0], data[1], data[2], data[3],
        ]))),
        8 => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(data);
            Some(u64::from_le_bytes(buf))
        }
        _ => None,
    }
}
