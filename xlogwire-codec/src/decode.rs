//! Decode cursor for the value format.
//!
//! The cursor yields one [`Value`] per call and never builds a tree: arrays
//! and maps come back as headers carrying their element count, and the
//! elements follow as separate values.
//!
//! Every value is bounds-checked against the write limit of the underlying
//! window before the cursor moves. A value that fails validation leaves the
//! cursor where it was.

use crate::error::CodecError;

/// A single decoded value.
///
/// Strings, binaries and extension payloads borrow from the decoded bytes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value<'a> {
    Uint(u64),
    Int(i64),
    F32(f32),
    F64(f64),
    Str(&'a [u8]),
    Bin(&'a [u8]),
    Bool(bool),
    Nil,
    /// Array header with its declared element count.
    Array(u32),
    /// Map header with its declared pair count.
    Map(u32),
    Ext { kind: i8, data: &'a [u8] },
}

impl<'a> Value<'a> {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Uint(_) => "uint",
            Value::Int(_) => "int",
            Value::F32(_) => "float",
            Value::F64(_) => "double",
            Value::Str(_) => "str",
            Value::Bin(_) => "bin",
            Value::Bool(_) => "bool",
            Value::Nil => "nil",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::Ext { .. } => "ext",
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::Uint(n) => Some(n),
            Value::Int(n) if n >= 0 => Some(n as u64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Int(n) => Some(n),
            Value::Uint(n) => i64::try_from(n).ok(),
            _ => None,
        }
    }

    /// Returns the payload of a str or bin value.
    pub fn as_bytes(&self) -> Option<&'a [u8]> {
        match *self {
            Value::Str(b) | Value::Bin(b) => Some(b),
            _ => None,
        }
    }
}

/// Forward-only cursor over encoded values.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    /// Window the values live in; may extend past `limit`.
    data: &'a [u8],
    /// End of the written bytes.
    limit: usize,
    pos: usize,
    error: Option<CodecError>,
}

impl<'a> Cursor<'a> {
    /// Creates a cursor over fully written bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_limit(data, data.len())
    }

    /// Creates a cursor whose values must end before `limit`.
    pub fn with_limit(data: &'a [u8], limit: usize) -> Self {
        Self {
            data,
            limit: limit.min(data.len()),
            pos: 0,
            error: None,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Returns the written bytes not yet consumed.
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..self.limit]
    }

    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.limit
    }

    /// Returns the error that ended iteration, if any.
    pub fn error(&self) -> Option<&CodecError> {
        self.error.as_ref()
    }

    /// Decodes the next value.
    ///
    /// Returns `Ok(None)` once the cursor reaches the write limit.
    pub fn try_next(&mut self) -> Result<Option<Value<'a>>, CodecError> {
        if self.is_exhausted() {
            return Ok(None);
        }
        let (value, len) = self.decode()?;
        self.pos += len;
        Ok(Some(value))
    }

    /// Moves past one complete value, nested elements included.
    ///
    /// The whole value is checked before the cursor moves. Returns `false` if
    /// the cursor was already exhausted.
    pub fn skip_value(&mut self) -> Result<bool, CodecError> {
        if self.is_exhausted() {
            return Ok(false);
        }
        let mut ahead = self.clone();
        let mut pending: u64 = 1;
        while pending > 0 {
            let value = ahead.try_next()?.ok_or_else(|| {
                CodecError::malformed(ahead.pos, "container extends past written data")
            })?;
            pending -= 1;
            match value {
                Value::Array(count) => pending += u64::from(count),
                Value::Map(count) => pending += 2 * u64::from(count),
                _ => {}
            }
        }
        self.pos = ahead.pos;
        Ok(true)
    }

    fn end(&self, size: usize) -> usize {
        self.pos.saturating_add(size)
    }

    /// Fails unless `size` bytes at the cursor are written.
    fn need(&self, size: usize, what: &str) -> Result<(), CodecError> {
        if self.end(size) > self.limit {
            return Err(CodecError::malformed(
                self.pos,
                format!("{} extends past written data", what),
            ));
        }
        Ok(())
    }

    fn be16(&self, off: usize) -> u16 {
        let p = self.pos + off;
        u16::from_be_bytes([self.data[p], self.data[p + 1]])
    }

    fn be32(&self, off: usize) -> u32 {
        let p = self.pos + off;
        u32::from_be_bytes([
            self.data[p],
            self.data[p + 1],
            self.data[p + 2],
            self.data[p + 3],
        ])
    }

    fn be64(&self, off: usize) -> u64 {
        let p = self.pos + off;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.data[p..p + 8]);
        u64::from_be_bytes(buf)
    }

    fn span(&self, header: usize, len: usize, what: &str) -> Result<&'a [u8], CodecError> {
        self.need(header.saturating_add(len), what)?;
        let start = self.pos + header;
        Ok(&self.data[start..start + len])
    }

    fn fixed(&self, size: usize, what: &str) -> Result<(), CodecError> {
        self.need(size, what)
    }

    /// Decodes the value at the cursor and returns it with its encoded size.
    fn decode(&self) -> Result<(Value<'a>, usize), CodecError> {
        let tag = self.data[self.pos];
        match tag {
            0x00..=0x7f => Ok((Value::Uint(u64::from(tag)), 1)),
            0x80..=0x8f => Ok((Value::Map(u32::from(tag & 0x0f)), 1)),
            0x90..=0x9f => Ok((Value::Array(u32::from(tag & 0x0f)), 1)),
            0xa0..=0xbf => {
                let len = usize::from(tag & 0x1f);
                Ok((Value::Str(self.span(1, len, "str")?), 1 + len))
            }
            0xc0 => Ok((Value::Nil, 1)),
            0xc1 => Err(CodecError::malformed(self.pos, "reserved tag 0xc1")),
            0xc2 => Ok((Value::Bool(false), 1)),
            0xc3 => Ok((Value::Bool(true), 1)),
            0xc4..=0xc6 => {
                let (header, len) = self.length(tag - 0xc4, "bin header")?;
                Ok((Value::Bin(self.span(header, len, "bin")?), header + len))
            }
            0xc7 => {
                self.fixed(3, "ext header")?;
                self.ext(3, usize::from(self.data[self.pos + 1]), 2)
            }
            0xc8 => {
                self.fixed(4, "ext header")?;
                self.ext(4, usize::from(self.be16(1)), 3)
            }
            0xc9 => {
                self.fixed(6, "ext header")?;
                self.ext(6, self.be32(1) as usize, 5)
            }
            0xca => {
                self.fixed(5, "float")?;
                Ok((Value::F32(f32::from_bits(self.be32(1))), 5))
            }
            0xcb => {
                self.fixed(9, "double")?;
                Ok((Value::F64(f64::from_bits(self.be64(1))), 9))
            }
            0xcc => {
                self.fixed(2, "uint8")?;
                Ok((Value::Uint(u64::from(self.data[self.pos + 1])), 2))
            }
            0xcd => {
                self.fixed(3, "uint16")?;
                Ok((Value::Uint(u64::from(self.be16(1))), 3))
            }
            0xce => {
                self.fixed(5, "uint32")?;
                Ok((Value::Uint(u64::from(self.be32(1))), 5))
            }
            0xcf => {
                self.fixed(9, "uint64")?;
                Ok((Value::Uint(self.be64(1)), 9))
            }
            0xd0 => {
                self.fixed(2, "int8")?;
                Ok((Value::Int(i64::from(self.data[self.pos + 1] as i8)), 2))
            }
            0xd1 => {
                self.fixed(3, "int16")?;
                Ok((Value::Int(i64::from(self.be16(1) as i16)), 3))
            }
            0xd2 => {
                self.fixed(5, "int32")?;
                Ok((Value::Int(i64::from(self.be32(1) as i32)), 5))
            }
            0xd3 => {
                self.fixed(9, "int64")?;
                Ok((Value::Int(self.be64(1) as i64), 9))
            }
            0xd4..=0xd8 => {
                let len = 1usize << (tag - 0xd4);
                self.fixed(2, "ext header")?;
                self.ext(2, len, 1)
            }
            0xd9..=0xdb => {
                let (header, len) = self.length(tag - 0xd9, "str header")?;
                Ok((Value::Str(self.span(header, len, "str")?), header + len))
            }
            0xdc => self.array(3),
            0xdd => self.array(5),
            0xde => self.map(3),
            0xdf => self.map(5),
            0xe0..=0xff => Ok((Value::Int(i64::from(tag as i8)), 1)),
        }
    }

    /// Reads an 8/16/32-bit big-endian length following the tag.
    fn length(&self, width: u8, what: &str) -> Result<(usize, usize), CodecError> {
        match width {
            0 => {
                self.fixed(2, what)?;
                Ok((2, usize::from(self.data[self.pos + 1])))
            }
            1 => {
                self.fixed(3, what)?;
                Ok((3, usize::from(self.be16(1))))
            }
            _ => {
                self.fixed(5, what)?;
                Ok((5, self.be32(1) as usize))
            }
        }
    }

    fn ext(
        &self,
        header: usize,
        len: usize,
        kind_at: usize,
    ) -> Result<(Value<'a>, usize), CodecError> {
        let data = self.span(header, len, "ext")?;
        let kind = self.data[self.pos + kind_at] as i8;
        Ok((Value::Ext { kind, data }, header + len))
    }

    /// Array headers read their count first and check the write limit after.
    fn array(&self, header: usize) -> Result<(Value<'a>, usize), CodecError> {
        if self.end(header) > self.data.len() {
            return Err(CodecError::malformed(self.pos, "truncated array header"));
        }
        let count = if header == 3 {
            u32::from(self.be16(1))
        } else {
            self.be32(1)
        };
        if self.end(header) > self.limit {
            return Err(CodecError::malformed(
                self.pos,
                format!(
                    "array of {} elements: header extends past written data",
                    count
                ),
            ));
        }
        Ok((Value::Array(count), header))
    }

    /// Map headers check the write limit before reading their count.
    fn map(&self, header: usize) -> Result<(Value<'a>, usize), CodecError> {
        self.need(header, "map header")?;
        let count = if header == 3 {
            u32::from(self.be16(1))
        } else {
            self.be32(1)
        };
        Ok((Value::Map(count), header))
    }
}

impl<'a> Iterator for Cursor<'a> {
    type Item = Value<'a>;

    /// Yields values until the write limit or the first malformed value.
    ///
    /// A malformed value ends iteration; it is kept in [`Cursor::error`].
    fn next(&mut self) -> Option<Value<'a>> {
        if self.error.is_some() {
            return None;
        }
        match self.try_next() {
            Ok(value) => value,
            Err(err) => {
                self.error = Some(err);
                None
            }
        }
    }
}

/// Returns the encoded size of the complete value at the start of `data`.
pub fn value_len(data: &[u8]) -> Result<usize, CodecError> {
    let mut cursor = Cursor::new(data);
    if !cursor.skip_value()? {
        return Err(CodecError::malformed(0, "empty input"));
    }
    Ok(cursor.position())
}
