//! Re-encoding of decoded rows into the value format.
//!
//! A tuple becomes an array of its fields. An update operation becomes
//! `[symbol, field, args...]` behind an array header sized by the
//! operation's argument count. Field numbers stay 0-based.

use crate::error::XlogError;
use crate::request::{RowOp, UpdateArgument, UpdateOp, UpdateOpcode};
use crate::row::LogRow;
use crate::schema::{FieldType, SchemaRegistry, SpaceSchema};
use crate::tuple::Tuple;
use crate::visit::{field_value, FieldValue};
use xlogwire_codec::MpStream;

/// Encodes one raw field as `ty`.
///
/// A NUM field of 4 or 8 bytes becomes an unsigned integer. Any other width
/// fails when `throws` is set and falls back to a string otherwise.
pub fn encode_field(
    stream: &mut MpStream<'_>,
    data: &[u8],
    ty: FieldType,
    throws: bool,
) -> Result<usize, XlogError> {
    match field_value(data, ty, throws)? {
        FieldValue::Num(value) => Ok(stream.encode_uint(value)?),
        FieldValue::Int(value) => Ok(stream.encode_int(value)?),
        FieldValue::Bytes(data) => Ok(stream.encode_str(data)?),
    }
}

fn encode_fields(
    stream: &mut MpStream<'_>,
    tuple: &Tuple,
    schema: Option<&SpaceSchema>,
    type_of: fn(&SpaceSchema, usize) -> FieldType,
) -> Result<usize, XlogError> {
    let mut size = stream.encode_array(tuple.cardinality() as u32)?;
    for (index, field) in tuple.fields().iter().enumerate() {
        size += match schema {
            Some(schema) => encode_field(stream, field, type_of(schema, index), schema.throws)?,
            None => encode_field(stream, field, FieldType::Str, false)?,
        };
    }
    Ok(size)
}

/// Encodes a tuple using the schema's tuple field hints.
pub fn encode_tuple(
    stream: &mut MpStream<'_>,
    tuple: &Tuple,
    schema: Option<&SpaceSchema>,
) -> Result<usize, XlogError> {
    encode_fields(stream, tuple, schema, SpaceSchema::field_type)
}

/// Encodes a key using the schema's key field hints.
pub fn encode_key(
    stream: &mut MpStream<'_>,
    key: &Tuple,
    schema: Option<&SpaceSchema>,
) -> Result<usize, XlogError> {
    encode_fields(stream, key, schema, SpaceSchema::key_type)
}

/// Encodes one update operation.
pub fn encode_op(
    stream: &mut MpStream<'_>,
    op: &UpdateOp,
    schema: Option<&SpaceSchema>,
) -> Result<usize, XlogError> {
    let mut size = stream.encode_array(op.opcode.arg_count())?;
    size += stream.encode_str(op.opcode.symbol().as_bytes())?;
    size += stream.encode_uint(u64::from(op.field))?;

    size += match (&op.argument, op.opcode) {
        (UpdateArgument::Number { value, .. }, _) => stream.encode_uint(*value)?,
        (UpdateArgument::Splice(splice), _) => {
            stream.encode_int(i64::from(splice.offset))?
                + stream.encode_int(i64::from(splice.length))?
                + stream.encode_str(&splice.replacement)?
        }
        (UpdateArgument::Value(_), UpdateOpcode::Delete) => stream.encode_uint(1)?,
        (UpdateArgument::Value(data), _) => {
            let index = op.field as usize;
            match schema {
                Some(schema) => {
                    encode_field(stream, data, schema.field_type(index), schema.throws)?
                }
                None => encode_field(stream, data, FieldType::Str, false)?,
            }
        }
    };
    Ok(size)
}

/// Encodes an operation list as an array of operations.
pub fn encode_ops(
    stream: &mut MpStream<'_>,
    ops: &[UpdateOp],
    schema: Option<&SpaceSchema>,
) -> Result<usize, XlogError> {
    let mut size = stream.encode_array(ops.len() as u32)?;
    for op in ops {
        size += encode_op(stream, op, schema)?;
    }
    Ok(size)
}

/// Encodes what a row carries: the tuple of an insert, the key of a delete,
/// or `[key, ops]` for an update.
pub fn encode_row(
    stream: &mut MpStream<'_>,
    row: &LogRow,
    schemas: &dyn SchemaRegistry,
) -> Result<usize, XlogError> {
    let schema = schemas.space(row.space);
    match &row.op {
        RowOp::Insert { tuple, .. } => encode_tuple(stream, tuple, schema),
        RowOp::Delete { key, .. } => encode_key(stream, key, schema),
        RowOp::Update { key, ops, .. } => Ok(stream.encode_array(2)?
            + encode_key(stream, key, schema)?
            + encode_ops(stream, ops, schema)?),
    }
}
