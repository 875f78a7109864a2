//! Replays decoded rows into a caller-supplied value sink.

use crate::error::XlogError;
use crate::request::{RowOp, UpdateArgument, UpdateOp, UpdateOpcode};
use crate::row::LogRow;
use crate::schema::{FieldType, SchemaRegistry, SpaceSchema};
use crate::tuple::Tuple;
use crate::wire::le_number;

/// A scalar handed to a [`RowVisitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue<'a> {
    Num(u64),
    Int(i64),
    Bytes(&'a [u8]),
}

/// Which list of a row is being replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Tuple,
    Key,
    Ops,
}

/// Receives a row piece by piece.
///
/// Calls arrive in a fixed order: `begin_row`, then for each section
/// `begin_section`, its values (operations are bracketed by `begin_op` and
/// `end_op`), `end_section`, and finally `end_row`.
pub trait RowVisitor {
    fn begin_row(&mut self, lsn: u64, timestamp: f64, space: u32, op: &'static str);
    fn begin_section(&mut self, section: Section, len: usize);
    fn value(&mut self, value: FieldValue<'_>);
    fn begin_op(&mut self, symbol: &'static str, field: u32);
    fn end_op(&mut self) {}
    fn end_section(&mut self) {}
    fn end_row(&mut self) {}
}

/// Interprets a raw field as `ty`. A NUM field of the wrong width is an
/// error when `throws` is set and bytes otherwise.
pub(crate) fn field_value<'a>(
    data: &'a [u8],
    ty: FieldType,
    throws: bool,
) -> Result<FieldValue<'a>, XlogError> {
    if ty == FieldType::Num {
        match le_number(data) {
            Some(value) => return Ok(FieldValue::Num(value)),
            None if throws => {
                return Err(XlogError::FieldConversion {
                    field: String::from_utf8_lossy(data).into_owned(),
                    size: data.len(),
                });
            }
            None => {}
        }
    }
    Ok(FieldValue::Bytes(data))
}

fn visit_fields(
    visitor: &mut dyn RowVisitor,
    section: Section,
    tuple: &Tuple,
    schema: Option<&SpaceSchema>,
) -> Result<(), XlogError> {
    visitor.begin_section(section, tuple.cardinality());
    for (index, field) in tuple.fields().iter().enumerate() {
        let value = match schema {
            Some(s) if section == Section::Key => field_value(field, s.key_type(index), s.throws)?,
            Some(s) => field_value(field, s.field_type(index), s.throws)?,
            None => FieldValue::Bytes(field),
        };
        visitor.value(value);
    }
    visitor.end_section();
    Ok(())
}

fn visit_op(
    visitor: &mut dyn RowVisitor,
    op: &UpdateOp,
    schema: Option<&SpaceSchema>,
) -> Result<(), XlogError> {
    visitor.begin_op(op.opcode.symbol(), op.field);
    match (&op.argument, op.opcode) {
        (UpdateArgument::Number { value, .. }, _) => visitor.value(FieldValue::Num(*value)),
        (UpdateArgument::Splice(splice), _) => {
            visitor.value(FieldValue::Int(i64::from(splice.offset)));
            visitor.value(FieldValue::Int(i64::from(splice.length)));
            visitor.value(FieldValue::Bytes(&splice.replacement));
        }
        (UpdateArgument::Value(_), UpdateOpcode::Delete) => visitor.value(FieldValue::Num(1)),
        (UpdateArgument::Value(data), _) => {
            let value = match schema {
                Some(s) => field_value(data, s.field_type(op.field as usize), s.throws)?,
                None => FieldValue::Bytes(data),
            };
            visitor.value(value);
        }
    }
    visitor.end_op();
    Ok(())
}

/// Replays `row` into `visitor`, interpreting fields through `schemas`.
///
/// A conversion failure stops the replay; the visitor may have seen part of
/// the row.
pub fn visit_row(
    row: &LogRow,
    schemas: &dyn SchemaRegistry,
    visitor: &mut dyn RowVisitor,
) -> Result<(), XlogError> {
    let schema = schemas.space(row.space);
    visitor.begin_row(row.lsn, row.timestamp, row.space, row.op.name());
    match &row.op {
        RowOp::Insert { tuple, .. } => visit_fields(visitor, Section::Tuple, tuple, schema)?,
        RowOp::Delete { key, .. } => visit_fields(visitor, Section::Key, key, schema)?,
        RowOp::Update { key, ops, .. } => {
            visit_fields(visitor, Section::Key, key, schema)?;
            visitor.begin_section(Section::Ops, ops.len());
            for op in ops {
                visit_op(visitor, op, schema)?;
            }
            visitor.end_section();
        }
    }
    visitor.end_row();
    Ok(())
}
