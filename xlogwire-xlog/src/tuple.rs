//! Tuples: a cardinality followed by size-prefixed raw fields.

use crate::error::XlogError;
use crate::wire::{put_varint, WireReader};
use bytes::{BufMut, Bytes};

/// Iterates the raw fields of a tuple body without copying.
///
/// Yields exactly `cardinality` fields or the first decode error.
#[derive(Debug)]
pub struct FieldIter<'r> {
    reader: &'r mut WireReader,
    left: u32,
    failed: bool,
}

impl<'r> FieldIter<'r> {
    pub fn new(reader: &'r mut WireReader, cardinality: u32) -> Self {
        Self {
            reader,
            left: cardinality,
            failed: false,
        }
    }
}

impl Iterator for FieldIter<'_> {
    type Item = Result<Bytes, XlogError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.left == 0 || self.failed {
            return None;
        }
        self.left -= 1;
        let field = self
            .reader
            .varint("field size")
            .and_then(|(size, _)| self.reader.bytes(size as usize, "field"));
        if field.is_err() {
            self.failed = true;
        }
        Some(field)
    }
}

/// A decoded tuple. Fields share the record's storage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tuple {
    fields: Vec<Bytes>,
}

impl Tuple {
    pub fn new(fields: Vec<Bytes>) -> Self {
        Self { fields }
    }

    /// Reads `cardinality u32` and the fields that follow.
    pub fn parse(reader: &mut WireReader) -> Result<Self, XlogError> {
        let cardinality = reader.u32("tuple cardinality")?;
        Self::parse_fields(reader, cardinality)
    }

    /// Reads `cardinality` fields from a body whose count was read elsewhere.
    pub fn parse_fields(reader: &mut WireReader, cardinality: u32) -> Result<Self, XlogError> {
        // A corrupt count must not drive a huge allocation.
        let mut fields = Vec::with_capacity((cardinality as usize).min(reader.remaining()));
        for field in FieldIter::new(reader, cardinality) {
            fields.push(field?);
        }
        Ok(Self { fields })
    }

    pub fn cardinality(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, index: usize) -> Option<&Bytes> {
        self.fields.get(index)
    }

    pub fn fields(&self) -> &[Bytes] {
        &self.fields
    }

    /// Size of the field list without the cardinality word.
    pub fn data_size(&self) -> usize {
        self.fields
            .iter()
            .map(|f| crate::wire::varint_len(f.len() as u32) + f.len())
            .sum()
    }

    /// Writes the fields without the cardinality word.
    pub fn write_fields(&self, buf: &mut impl BufMut) {
        for field in &self.fields {
            put_varint(buf, field.len() as u32);
            buf.put_slice(field);
        }
    }

    /// Writes `cardinality u32` followed by the fields.
    pub fn write(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.fields.len() as u32);
        self.write_fields(buf);
    }
}

impl<T: Into<Bytes>> FromIterator<T> for Tuple {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().map(Into::into).collect(),
        }
    }
}
