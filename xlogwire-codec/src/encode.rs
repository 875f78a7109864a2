//! Typed encoders for the value format (MessagePack).
//!
//! Every encoder reserves the worst-case size of its encoding, writes the
//! exact bytes and advances by what it wrote.

use crate::error::CodecError;
use crate::stream::MpStream;

/// Upper bound for an array or map header.
pub const MAX_HEADER_SIZE: usize = 5;

/// Upper bound for an encoded integer.
pub const MAX_INT_SIZE: usize = 9;

/// Upper bound for an encoded 32-bit float.
pub const MAX_FLOAT_SIZE: usize = 5;

/// Upper bound for an encoded 64-bit float.
pub const MAX_DOUBLE_SIZE: usize = 9;

/// Upper bound for a str/bin header.
pub const MAX_STR_HEADER_SIZE: usize = 5;

/// Upper bound for an ext header (tag, length, type).
pub const MAX_EXT_HEADER_SIZE: usize = 6;

pub fn sizeof_uint(num: u64) -> usize {
    if num <= 0x7f {
        1
    } else if num <= u8::MAX as u64 {
        2
    } else if num <= u16::MAX as u64 {
        3
    } else if num <= u32::MAX as u64 {
        5
    } else {
        9
    }
}

pub fn sizeof_int(num: i64) -> usize {
    if num >= 0 {
        sizeof_uint(num as u64)
    } else if num >= -32 {
        1
    } else if num >= i8::MIN as i64 {
        2
    } else if num >= i16::MIN as i64 {
        3
    } else if num >= i32::MIN as i64 {
        5
    } else {
        9
    }
}

pub fn sizeof_array(count: u32) -> usize {
    if count <= 15 {
        1
    } else if count <= u16::MAX as u32 {
        3
    } else {
        5
    }
}

pub fn sizeof_map(count: u32) -> usize {
    sizeof_array(count)
}

pub fn sizeof_str(len: u32) -> usize {
    if len <= 31 {
        1 + len as usize
    } else {
        sizeof_bin(len)
    }
}

pub fn sizeof_bin(len: u32) -> usize {
    let header = if len <= u8::MAX as u32 {
        2
    } else if len <= u16::MAX as u32 {
        3
    } else {
        5
    };
    header + len as usize
}

pub fn sizeof_ext(len: u32) -> usize {
    let header = match len {
        1 | 2 | 4 | 8 | 16 => 2,
        _ if len <= u8::MAX as u32 => 3,
        _ if len <= u16::MAX as u32 => 4,
        _ => 6,
    };
    header + len as usize
}

fn write_uint(out: &mut [u8], num: u64) -> usize {
    if num <= 0x7f {
        out[0] = num as u8;
        1
    } else if num <= u8::MAX as u64 {
        out[0] = 0xcc;
        out[1] = num as u8;
        2
    } else if num <= u16::MAX as u64 {
        out[0] = 0xcd;
        out[1..3].copy_from_slice(&(num as u16).to_be_bytes());
        3
    } else if num <= u32::MAX as u64 {
        out[0] = 0xce;
        out[1..5].copy_from_slice(&(num as u32).to_be_bytes());
        5
    } else {
        out[0] = 0xcf;
        out[1..9].copy_from_slice(&num.to_be_bytes());
        9
    }
}

fn write_int(out: &mut [u8], num: i64) -> usize {
    if num >= 0 {
        write_uint(out, num as u64)
    } else if num >= -32 {
        out[0] = num as i8 as u8;
        1
    } else if num >= i8::MIN as i64 {
        out[0] = 0xd0;
        out[1] = num as i8 as u8;
        2
    } else if num >= i16::MIN as i64 {
        out[0] = 0xd1;
        out[1..3].copy_from_slice(&(num as i16).to_be_bytes());
        3
    } else if num >= i32::MIN as i64 {
        out[0] = 0xd2;
        out[1..5].copy_from_slice(&(num as i32).to_be_bytes());
        5
    } else {
        out[0] = 0xd3;
        out[1..9].copy_from_slice(&num.to_be_bytes());
        9
    }
}

/// Writes a container header: `fix` carries the fixed-size tag base,
/// `tag16`/`tag32` the wide forms.
fn write_container(out: &mut [u8], count: u32, fix: u8, tag16: u8, tag32: u8) -> usize {
    if count <= 15 {
        out[0] = fix | count as u8;
        1
    } else if count <= u16::MAX as u32 {
        out[0] = tag16;
        out[1..3].copy_from_slice(&(count as u16).to_be_bytes());
        3
    } else {
        out[0] = tag32;
        out[1..5].copy_from_slice(&count.to_be_bytes());
        5
    }
}

fn write_len(out: &mut [u8], len: u32, tags: [u8; 3]) -> usize {
    if len <= u8::MAX as u32 {
        out[0] = tags[0];
        out[1] = len as u8;
        2
    } else if len <= u16::MAX as u32 {
        out[0] = tags[1];
        out[1..3].copy_from_slice(&(len as u16).to_be_bytes());
        3
    } else {
        out[0] = tags[2];
        out[1..5].copy_from_slice(&len.to_be_bytes());
        5
    }
}

fn payload_len(data: &[u8]) -> Result<u32, CodecError> {
    u32::try_from(data.len()).map_err(|_| CodecError::TooBig {
        size: data.len(),
        max: u32::MAX as usize,
    })
}

impl MpStream<'_> {
    pub fn encode_array(&mut self, count: u32) -> Result<usize, CodecError> {
        debug_assert!(sizeof_array(count) <= MAX_HEADER_SIZE);
        self.put(MAX_HEADER_SIZE, |out| {
            write_container(out, count, 0x90, 0xdc, 0xdd)
        })
    }

    pub fn encode_map(&mut self, count: u32) -> Result<usize, CodecError> {
        debug_assert!(sizeof_map(count) <= MAX_HEADER_SIZE);
        self.put(MAX_HEADER_SIZE, |out| {
            write_container(out, count, 0x80, 0xde, 0xdf)
        })
    }

    pub fn encode_uint(&mut self, num: u64) -> Result<usize, CodecError> {
        self.put(MAX_INT_SIZE, |out| write_uint(out, num))
    }

    /// Encodes a signed integer; non-negative values use the unsigned forms.
    pub fn encode_int(&mut self, num: i64) -> Result<usize, CodecError> {
        self.put(MAX_INT_SIZE, |out| write_int(out, num))
    }

    pub fn encode_float(&mut self, num: f32) -> Result<usize, CodecError> {
        self.put(MAX_FLOAT_SIZE, |out| {
            out[0] = 0xca;
            out[1..5].copy_from_slice(&num.to_be_bytes());
            5
        })
    }

    pub fn encode_double(&mut self, num: f64) -> Result<usize, CodecError> {
        self.put(MAX_DOUBLE_SIZE, |out| {
            out[0] = 0xcb;
            out[1..9].copy_from_slice(&num.to_be_bytes());
            9
        })
    }

    pub fn encode_str(&mut self, data: &[u8]) -> Result<usize, CodecError> {
        let len = payload_len(data)?;
        self.put(MAX_STR_HEADER_SIZE + data.len(), |out| {
            let header = if len <= 31 {
                out[0] = 0xa0 | len as u8;
                1
            } else {
                write_len(out, len, [0xd9, 0xda, 0xdb])
            };
            out[header..header + data.len()].copy_from_slice(data);
            header + data.len()
        })
    }

    pub fn encode_bin(&mut self, data: &[u8]) -> Result<usize, CodecError> {
        let len = payload_len(data)?;
        self.put(MAX_STR_HEADER_SIZE + data.len(), |out| {
            let header = write_len(out, len, [0xc4, 0xc5, 0xc6]);
            out[header..header + data.len()].copy_from_slice(data);
            header + data.len()
        })
    }

    pub fn encode_nil(&mut self) -> Result<usize, CodecError> {
        self.put(1, |out| {
            out[0] = 0xc0;
            1
        })
    }

    pub fn encode_bool(&mut self, val: bool) -> Result<usize, CodecError> {
        self.put(1, |out| {
            out[0] = if val { 0xc3 } else { 0xc2 };
            1
        })
    }

    pub fn encode_ext(&mut self, kind: i8, data: &[u8]) -> Result<usize, CodecError> {
        let len = payload_len(data)?;
        self.put(MAX_EXT_HEADER_SIZE + data.len(), |out| {
            let mut header = match len {
                1 => {
                    out[0] = 0xd4;
                    1
                }
                2 => {
                    out[0] = 0xd5;
                    1
                }
                4 => {
                    out[0] = 0xd6;
                    1
                }
                8 => {
                    out[0] = 0xd7;
                    1
                }
                16 => {
                    out[0] = 0xd8;
                    1
                }
                _ => write_len(out, len, [0xc7, 0xc8, 0xc9]),
            };
            out[header] = kind as u8;
            header += 1;
            out[header..header + data.len()].copy_from_slice(data);
            header + data.len()
        })
    }
}
