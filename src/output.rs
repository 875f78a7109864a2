//! Row printers.

use clap::ValueEnum;
use serde_json::{json, Map, Value};
use std::io::Write;
use xlogwire_codec::{Arena, MpStream};
use xlogwire_xlog::{encode_row, visit_row, FieldValue, LogRow, RowVisitor, SchemaRegistry, Section, XlogError};

/// How rows are printed, one per line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// JSON object with the row header and its values.
    #[default]
    Json,
    /// Hex of the row's MessagePack re-encoding.
    Msgpack,
}

/// Builds a JSON object for one row.
#[derive(Debug, Default)]
pub struct JsonRow {
    row: Map<String, Value>,
    section: Option<(Section, Vec<Value>)>,
    op: Option<Vec<Value>>,
}

impl JsonRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.row)
    }

    fn push(&mut self, value: Value) {
        if let Some(op) = self.op.as_mut() {
            op.push(value);
        } else if let Some((_, values)) = self.section.as_mut() {
            values.push(value);
        }
    }
}

fn bytes_value(data: &[u8]) -> Value {
    match std::str::from_utf8(data) {
        Ok(s) => Value::String(s.to_string()),
        Err(_) => json!({ "bin": hex::encode(data) }),
    }
}

fn section_name(section: Section) -> &'static str {
    match section {
        Section::Tuple => "tuple",
        Section::Key => "key",
        Section::Ops => "ops",
    }
}

impl RowVisitor for JsonRow {
    fn begin_row(&mut self, lsn: u64, timestamp: f64, space: u32, op: &'static str) {
        self.row.insert("lsn".into(), json!(lsn));
        self.row.insert("time".into(), json!(timestamp));
        self.row.insert("space".into(), json!(space));
        self.row.insert("op".into(), json!(op));
    }

    fn begin_section(&mut self, section: Section, len: usize) {
        self.section = Some((section, Vec::with_capacity(len)));
    }

    fn value(&mut self, value: FieldValue<'_>) {
        let value = match value {
            FieldValue::Num(n) => json!(n),
            FieldValue::Int(n) => json!(n),
            FieldValue::Bytes(data) => bytes_value(data),
        };
        self.push(value);
    }

    fn begin_op(&mut self, symbol: &'static str, field: u32) {
        self.op = Some(vec![json!(symbol), json!(field)]);
    }

    fn end_op(&mut self) {
        if let Some(op) = self.op.take() {
            self.push(Value::Array(op));
        }
    }

    fn end_section(&mut self) {
        if let Some((section, values)) = self.section.take() {
            self.row
                .insert(section_name(section).into(), Value::Array(values));
        }
    }
}

/// Writes rows to `out` in the chosen format.
pub struct RowPrinter<'s, W> {
    out: W,
    format: Format,
    schemas: &'s dyn SchemaRegistry,
    printed: u64,
}

impl<'s, W: Write> RowPrinter<'s, W> {
    pub fn new(out: W, format: Format, schemas: &'s dyn SchemaRegistry) -> Self {
        Self {
            out,
            format,
            schemas,
            printed: 0,
        }
    }

    pub fn printed(&self) -> u64 {
        self.printed
    }

    pub fn print(&mut self, row: &LogRow) -> Result<(), XlogError> {
        let line = match self.format {
            Format::Json => {
                let mut visitor = JsonRow::new();
                visit_row(row, self.schemas, &mut visitor)?;
                visitor.into_value().to_string()
            }
            Format::Msgpack => {
                let mut arena = Arena::new();
                let mut stream = MpStream::new(&mut arena)?;
                encode_row(&mut stream, row, self.schemas)?;
                stream.flush()?;
                drop(stream);
                hex::encode(arena.as_slice())
            }
        };
        writeln!(self.out, "{}", line)?;
        self.printed += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), XlogError> {
        self.out.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
