//! Request bodies carried by log rows: opcodes, tuples and update operations.

use crate::error::XlogError;
use crate::tuple::Tuple;
use crate::wire::{le_number, put_varint, varint_len, WireReader};
use bytes::{BufMut, Bytes};

/// Request opcodes that may appear in a log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum RequestType {
    Insert = 13,
    Select = 17,
    Update = 19,
    /// Delete without a flags word.
    DeleteLegacy = 20,
    Delete = 21,
    Call = 22,
    Ping = 65280,
}

impl RequestType {
    pub fn from_u16(op: u16) -> Option<Self> {
        match op {
            13 => Some(RequestType::Insert),
            17 => Some(RequestType::Select),
            19 => Some(RequestType::Update),
            20 => Some(RequestType::DeleteLegacy),
            21 => Some(RequestType::Delete),
            22 => Some(RequestType::Call),
            65280 => Some(RequestType::Ping),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RequestType::Insert => "insert",
            RequestType::Select => "select",
            RequestType::Update => "update",
            RequestType::DeleteLegacy | RequestType::Delete => "delete",
            RequestType::Call => "call",
            RequestType::Ping => "ping",
        }
    }
}

/// Update operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum UpdateOpcode {
    Assign = 0,
    Add = 1,
    And = 2,
    Xor = 3,
    Or = 4,
    Splice = 5,
    Delete = 6,
    Insert = 7,
}

impl UpdateOpcode {
    pub fn from_u8(code: u8) -> Result<Self, XlogError> {
        Ok(match code {
            0 => UpdateOpcode::Assign,
            1 => UpdateOpcode::Add,
            2 => UpdateOpcode::And,
            3 => UpdateOpcode::Xor,
            4 => UpdateOpcode::Or,
            5 => UpdateOpcode::Splice,
            6 => UpdateOpcode::Delete,
            7 => UpdateOpcode::Insert,
            _ => return Err(XlogError::UnrecognizedUpdateOp(code)),
        })
    }

    /// Symbol used when the operation is re-encoded.
    pub fn symbol(self) -> &'static str {
        match self {
            UpdateOpcode::Assign => "=",
            UpdateOpcode::Add => "+",
            UpdateOpcode::And => "&",
            UpdateOpcode::Xor => "^",
            UpdateOpcode::Or => "|",
            UpdateOpcode::Splice => ":",
            UpdateOpcode::Delete => "#",
            UpdateOpcode::Insert => "!",
        }
    }

    /// Element count of the re-encoded operation, symbol and field included.
    pub fn arg_count(self) -> u32 {
        match self {
            UpdateOpcode::Splice => 5,
            _ => 3,
        }
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            UpdateOpcode::Add | UpdateOpcode::And | UpdateOpcode::Xor | UpdateOpcode::Or
        )
    }
}

/// Replaces `[offset, offset + length)` of a field with `replacement`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Splice {
    pub offset: i32,
    pub length: i32,
    pub replacement: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateArgument {
    /// Raw value for `=`, `!` and `#`.
    Value(Bytes),
    /// Operand of an arithmetic operation; `width` is 4 or 8.
    Number { value: u64, width: u8 },
    Splice(Splice),
}

/// One operation of an UPDATE request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOp {
    pub opcode: UpdateOpcode,
    pub field: u32,
    pub argument: UpdateArgument,
}

impl UpdateOp {
    /// Reads `field u32, opcode u8, varint size, argument`.
    pub fn parse(reader: &mut WireReader) -> Result<Self, XlogError> {
        let field = reader.u32("update field")?;
        let opcode = UpdateOpcode::from_u8(reader.u8("update opcode")?)?;
        let (size, _) = reader.varint("update argument size")?;
        let start = reader.position();
        let data = reader.bytes(size as usize, "update argument")?;

        let argument = match opcode {
            op if op.is_arithmetic() => {
                let value = le_number(&data).ok_or(XlogError::BadArithmeticValue {
                    size: data.len(),
                })?;
                UpdateArgument::Number {
                    value,
                    width: data.len() as u8,
                }
            }
            UpdateOpcode::Splice => UpdateArgument::Splice(parse_splice(data, start)?),
            _ => UpdateArgument::Value(data),
        };

        Ok(Self {
            opcode,
            field,
            argument,
        })
    }

    pub fn write(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.field);
        buf.put_u8(self.opcode as u8);
        match &self.argument {
            UpdateArgument::Value(data) => {
                put_varint(buf, data.len() as u32);
                buf.put_slice(data);
            }
            UpdateArgument::Number { value, width: 4 } => {
                put_varint(buf, 4);
                buf.put_u32_le(*value as u32);
            }
            UpdateArgument::Number { value, .. } => {
                put_varint(buf, 8);
                buf.put_u64_le(*value);
            }
            UpdateArgument::Splice(splice) => {
                let tail = splice.replacement.len() as u32;
                put_varint(buf, (1 + 4 + 1 + 4 + varint_len(tail)) as u32 + tail);
                put_varint(buf, 4);
                buf.put_i32_le(splice.offset);
                put_varint(buf, 4);
                buf.put_i32_le(splice.length);
                put_varint(buf, tail);
                buf.put_slice(&splice.replacement);
            }
        }
    }
}

/// Parses `varint(4) offset, varint(4) length, varint(n) replacement`.
///
/// `base` is the argument's position in the enclosing record.
fn parse_splice(data: Bytes, base: usize) -> Result<Splice, XlogError> {
    let mut reader = WireReader::new(data);
    let malformed = |at: usize, reason: String| XlogError::Malformed {
        position: base + at,
        reason,
    };

    let word = |reader: &mut WireReader, what: &'static str| -> Result<i32, XlogError> {
        let at = reader.position();
        let (size, _) = reader.varint(what)?;
        if size != 4 {
            return Err(malformed(at, format!("splice {} must be 4 bytes, got {}", what, size)));
        }
        reader.i32(what)
    };
    let offset = word(&mut reader, "offset")?;
    let length = word(&mut reader, "length")?;

    let at = reader.position();
    let (size, _) = reader.varint("splice replacement size")?;
    let replacement = reader.rest();
    if size as usize != replacement.len() {
        return Err(malformed(
            at,
            format!(
                "splice replacement declares {} bytes, argument holds {}",
                size,
                replacement.len()
            ),
        ));
    }

    Ok(Splice {
        offset,
        length,
        replacement,
    })
}

/// The operation a log row records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOp {
    Insert { flags: u32, tuple: Tuple },
    Delete { flags: u32, key: Tuple },
    Update {
        flags: u32,
        key: Tuple,
        ops: Vec<UpdateOp>,
    },
}

impl RowOp {
    pub fn name(&self) -> &'static str {
        self.request_type().name()
    }

    pub fn request_type(&self) -> RequestType {
        match self {
            RowOp::Insert { .. } => RequestType::Insert,
            RowOp::Delete { .. } => RequestType::Delete,
            RowOp::Update { .. } => RequestType::Update,
        }
    }

    /// Decodes a request body for opcode `op`; returns the space id and the
    /// operation. The body must be consumed exactly.
    pub fn parse(op: u16, reader: &mut WireReader) -> Result<(u32, RowOp), XlogError> {
        let request = RequestType::from_u16(op)
            .ok_or_else(|| XlogError::UnrecognizedOperation(format!("op {}", op)))?;

        let (space, row) = match request {
            RequestType::Insert => {
                let space = reader.u32("space")?;
                let flags = reader.u32("flags")?;
                let tuple = Tuple::parse(reader)?;
                (space, RowOp::Insert { flags, tuple })
            }
            RequestType::Delete => {
                let space = reader.u32("space")?;
                let flags = reader.u32("flags")?;
                let key = Tuple::parse(reader)?;
                (space, RowOp::Delete { flags, key })
            }
            RequestType::DeleteLegacy => {
                let space = reader.u32("space")?;
                let key = Tuple::parse(reader)?;
                (space, RowOp::Delete { flags: 0, key })
            }
            RequestType::Update => {
                let space = reader.u32("space")?;
                let flags = reader.u32("flags")?;
                let key = Tuple::parse(reader)?;
                let count = reader.u32("update op count")?;
                let mut ops = Vec::with_capacity((count as usize).min(reader.remaining()));
                for _ in 0..count {
                    ops.push(UpdateOp::parse(reader)?);
                }
                (space, RowOp::Update { flags, key, ops })
            }
            other => {
                return Err(XlogError::UnrecognizedOperation(other.name().to_uppercase()));
            }
        };

        if !reader.is_empty() {
            return Err(XlogError::Malformed {
                position: reader.position(),
                reason: format!(
                    "{} trailing bytes after {} body",
                    reader.remaining(),
                    request.name()
                ),
            });
        }
        Ok((space, row))
    }

    /// Writes `op u16` and the request body.
    pub fn write(&self, space: u32, buf: &mut impl BufMut) {
        buf.put_u16_le(self.request_type() as u16);
        buf.put_u32_le(space);
        match self {
            RowOp::Insert { flags, tuple } => {
                buf.put_u32_le(*flags);
                tuple.write(buf);
            }
            RowOp::Delete { flags, key } => {
                buf.put_u32_le(*flags);
                key.write(buf);
            }
            RowOp::Update { flags, key, ops } => {
                buf.put_u32_le(*flags);
                key.write(buf);
                buf.put_u32_le(ops.len() as u32);
                for op in ops {
                    op.write(buf);
                }
            }
        }
    }
}
