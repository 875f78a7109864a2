//! Log rows decoded from framed record payloads.

use crate::error::XlogError;
use crate::request::RowOp;
use crate::tuple::Tuple;
use crate::wire::WireReader;
use bytes::{BufMut, Bytes};

/// Tag of rows written by the write-ahead log.
pub const XLOG_TAG: u16 = 65534;
/// Tag of rows written into snapshots.
pub const SNAP_TAG: u16 = 65535;

/// Whether a record carries a request or a snapshot tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogKind {
    Xlog,
    Snapshot,
}

impl LogKind {
    /// Magic line of a log file of this kind.
    pub fn magic(self) -> &'static str {
        match self {
            LogKind::Xlog => "XLOG",
            LogKind::Snapshot => "SNAP",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            LogKind::Xlog => "xlog",
            LogKind::Snapshot => "snap",
        }
    }

    pub fn from_magic(magic: &str) -> Option<Self> {
        match magic {
            "XLOG" => Some(LogKind::Xlog),
            "SNAP" => Some(LogKind::Snapshot),
            _ => None,
        }
    }

    /// Guesses the kind from a file extension.
    pub fn from_path(path: impl AsRef<std::path::Path>) -> Option<Self> {
        match path.as_ref().extension()?.to_str()? {
            "xlog" => Some(LogKind::Xlog),
            "snap" => Some(LogKind::Snapshot),
            _ => None,
        }
    }
}

/// Fixed part of every framed record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordHeader {
    pub lsn: u64,
    /// Seconds since the epoch.
    pub timestamp: f64,
}

/// A framed record as yielded by a record source.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub header: RecordHeader,
    pub kind: LogKind,
    pub data: Bytes,
}

impl Record {
    /// Builds a record around an already encoded payload.
    pub fn new(kind: LogKind, lsn: u64, timestamp: f64, data: Bytes) -> Self {
        Self {
            header: RecordHeader { lsn, timestamp },
            kind,
            data,
        }
    }
}

/// A decoded row.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRow {
    pub lsn: u64,
    pub timestamp: f64,
    pub space: u32,
    pub op: RowOp,
}

impl LogRow {
    /// Decodes the payload of `record`.
    ///
    /// Xlog payloads are `tag u16, cookie u64, op u16, body`. Snapshot
    /// payloads are `tag u16, cookie u64, space u32, cardinality u32,
    /// data_size u32, fields` and decode to inserts.
    pub fn decode(record: &Record) -> Result<Self, XlogError> {
        let mut reader = WireReader::new(record.data.clone());
        let _tag = reader.u16("row tag")?;
        let _cookie = reader.u64("row cookie")?;

        let (space, op) = match record.kind {
            LogKind::Xlog => {
                let op = reader.u16("row op")?;
                RowOp::parse(op, &mut reader)?
            }
            LogKind::Snapshot => decode_snapshot(&mut reader)?,
        };

        Ok(Self {
            lsn: record.header.lsn,
            timestamp: record.header.timestamp,
            space,
            op,
        })
    }

    /// Encodes the row into a record payload of the given kind.
    ///
    /// Only inserts can be written into snapshots.
    pub fn encode(&self, kind: LogKind, buf: &mut impl BufMut) -> Result<(), XlogError> {
        match (kind, &self.op) {
            (LogKind::Xlog, op) => {
                buf.put_u16_le(XLOG_TAG);
                buf.put_u64_le(0);
                op.write(self.space, buf);
            }
            (LogKind::Snapshot, RowOp::Insert { tuple, .. }) => {
                buf.put_u16_le(SNAP_TAG);
                buf.put_u64_le(0);
                buf.put_u32_le(self.space);
                buf.put_u32_le(tuple.cardinality() as u32);
                buf.put_u32_le(tuple.data_size() as u32);
                tuple.write_fields(buf);
            }
            (LogKind::Snapshot, op) => {
                return Err(XlogError::UnrecognizedOperation(format!(
                    "{} in snapshot",
                    op.name()
                )));
            }
        }
        Ok(())
    }
}

fn decode_snapshot(reader: &mut WireReader) -> Result<(u32, RowOp), XlogError> {
    let space = reader.u32("space")?;
    let cardinality = reader.u32("tuple cardinality")?;
    let data_size = reader.u32("tuple size")? as usize;
    if data_size != reader.remaining() {
        return Err(XlogError::Malformed {
            position: reader.position(),
            reason: format!(
                "snapshot tuple declares {} bytes, record holds {}",
                data_size,
                reader.remaining()
            ),
        });
    }
    let tuple = Tuple::parse_fields(reader, cardinality)?;
    if !reader.is_empty() {
        return Err(XlogError::Malformed {
            position: reader.position(),
            reason: format!("{} bytes left after snapshot tuple", reader.remaining()),
        });
    }
    Ok((space, RowOp::Insert { flags: 0, tuple }))
}
