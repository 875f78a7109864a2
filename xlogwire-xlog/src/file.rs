//! Log files in the v0.11 format.
//!
//! ```text
//! XLOG\n | SNAP\n
//! 0.11\n
//! key: value\n        (optional, repeated)
//! \n
//! +------------+---------------+---------+--------+---------+-------------+------+
//! | marker u32 | header_crc u32| lsn i64 | tm f64 | len u32 | data_crc u32| data |
//! +------------+---------------+---------+--------+---------+-------------+------+
//! ...
//! eof marker u32      (optional)
//! ```
//!
//! Integers are little-endian. `header_crc` covers the 24 header bytes after
//! it; both checksums are CRC32C.

use crate::batch::RecordSource;
use crate::error::XlogError;
use crate::row::{LogKind, LogRow, Record, RecordHeader};
use bytes::{BufMut, BytesMut};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

pub const ROW_MARKER: u32 = 0xba0b_abed;
pub const EOF_MARKER: u32 = 0x10ad_ab1e;
pub const LOG_VERSION: &str = "0.11";

/// Size of the row header that follows the marker.
pub const ROW_HEADER_SIZE: usize = 28;

/// Largest row payload accepted (64 MiB).
pub const MAX_ROW_SIZE: usize = 64 * 1024 * 1024;

/// Row header as stored before each payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowHeader {
    pub lsn: u64,
    pub timestamp: f64,
    pub len: u32,
    pub data_crc: u32,
}

impl RowHeader {
    pub fn for_data(lsn: u64, timestamp: f64, data: &[u8]) -> Self {
        Self {
            lsn,
            timestamp,
            len: data.len() as u32,
            data_crc: crc32c::crc32c(data),
        }
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        let mut body = [0u8; ROW_HEADER_SIZE - 4];
        body[0..8].copy_from_slice(&(self.lsn as i64).to_le_bytes());
        body[8..16].copy_from_slice(&self.timestamp.to_le_bytes());
        body[16..20].copy_from_slice(&self.len.to_le_bytes());
        body[20..24].copy_from_slice(&self.data_crc.to_le_bytes());
        buf.put_u32_le(crc32c::crc32c(&body));
        buf.put_slice(&body);
    }

    /// Decodes and verifies a header read at `offset`.
    pub fn decode(raw: &[u8; ROW_HEADER_SIZE], offset: u64) -> Result<Self, XlogError> {
        let word = |at: usize| u32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]]);
        let dword = |at: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&raw[at..at + 8]);
            b
        };

        let expected = word(0);
        let actual = crc32c::crc32c(&raw[4..]);
        if expected != actual {
            return Err(XlogError::CorruptedRecord {
                offset,
                expected,
                actual,
            });
        }

        let lsn = i64::from_le_bytes(dword(4));
        if lsn < 0 {
            return Err(XlogError::InvalidHeader {
                offset,
                reason: format!("negative lsn {}", lsn),
            });
        }
        let header = Self {
            lsn: lsn as u64,
            timestamp: f64::from_le_bytes(dword(12)),
            len: word(20),
            data_crc: word(24),
        };
        if header.len as usize > MAX_ROW_SIZE {
            return Err(XlogError::InvalidHeader {
                offset,
                reason: format!("row of {} bytes exceeds {}", header.len, MAX_ROW_SIZE),
            });
        }
        Ok(header)
    }

    /// Checks `data` against the header checksum.
    pub fn verify(&self, data: &[u8], offset: u64) -> Result<(), XlogError> {
        let actual = crc32c::crc32c(data);
        if actual != self.data_crc {
            return Err(XlogError::CorruptedRecord {
                offset,
                expected: self.data_crc,
                actual,
            });
        }
        Ok(())
    }
}

/// Reads until `buf` is full or the input ends; returns the bytes read.
pub(crate) fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Sequential reader over a log file.
#[derive(Debug)]
pub struct LogReader<R> {
    reader: R,
    kind: LogKind,
    version: String,
    meta: Vec<String>,
    offset: u64,
    exhausted: bool,
    eof_marker: bool,
    last_error: Option<String>,
}

impl LogReader<BufReader<File>> {
    /// Opens a log file and reads its text header.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, XlogError> {
        let path = path.as_ref();
        let reader = Self::new(BufReader::new(File::open(path)?))?;
        if let Some(guess) = LogKind::from_path(path) {
            if guess != reader.kind {
                tracing::warn!(
                    path = %path.display(),
                    magic = reader.kind.magic(),
                    "file extension does not match log type"
                );
            }
        }
        tracing::debug!(path = %path.display(), kind = ?reader.kind, "opened log");
        Ok(reader)
    }
}

impl<R: BufRead> LogReader<R> {
    /// Reads the text header from `reader`.
    pub fn new(mut reader: R) -> Result<Self, XlogError> {
        let mut offset = 0u64;
        let mut next_line = |reader: &mut R, what: &str| -> Result<String, XlogError> {
            let mut line = String::new();
            let at = offset;
            let n = reader.read_line(&mut line)?;
            offset += n as u64;
            match line.strip_suffix('\n') {
                Some(text) => Ok(text.to_string()),
                None => Err(XlogError::InvalidHeader {
                    offset: at,
                    reason: format!("unterminated {}", what),
                }),
            }
        };

        let magic = next_line(&mut reader, "file type")?;
        let kind = LogKind::from_magic(&magic).ok_or_else(|| XlogError::InvalidHeader {
            offset: 0,
            reason: format!("unknown file type '{}'", magic),
        })?;
        let version = next_line(&mut reader, "version")?;
        if version != LOG_VERSION {
            return Err(XlogError::InvalidHeader {
                offset: magic.len() as u64 + 1,
                reason: format!("unsupported version '{}'", version),
            });
        }
        let mut meta = Vec::new();
        loop {
            let line = next_line(&mut reader, "header line")?;
            if line.is_empty() {
                break;
            }
            meta.push(line);
        }

        Ok(Self {
            reader,
            kind,
            version,
            meta,
            offset,
            exhausted: false,
            eof_marker: false,
            last_error: None,
        })
    }

    pub fn kind(&self) -> LogKind {
        self.kind
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Extra `key: value` header lines.
    pub fn meta(&self) -> &[String] {
        &self.meta
    }

    /// Byte offset of the next row.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Whether the file ended with an EOF marker.
    pub fn has_eof_marker(&self) -> bool {
        self.eof_marker
    }

    fn read_exact_at(&mut self, buf: &mut [u8], what: &str) -> Result<(), XlogError> {
        let n = read_full(&mut self.reader, buf)?;
        if n < buf.len() {
            return Err(XlogError::Malformed {
                position: self.offset as usize,
                reason: format!("{} truncated: expected {} bytes, found {}", what, buf.len(), n),
            });
        }
        self.offset += n as u64;
        Ok(())
    }

    fn read_record(&mut self) -> Result<Option<Record>, XlogError> {
        let mut word = [0u8; 4];
        let n = read_full(&mut self.reader, &mut word)?;
        if n == 0 {
            tracing::warn!(offset = self.offset, "log ends without eof marker");
            return Ok(None);
        }
        if n < word.len() {
            return Err(XlogError::Malformed {
                position: self.offset as usize,
                reason: format!("row marker truncated: {} of 4 bytes", n),
            });
        }
        match u32::from_le_bytes(word) {
            ROW_MARKER => {}
            EOF_MARKER => {
                self.offset += 4;
                self.eof_marker = true;
                return Ok(None);
            }
            other => {
                return Err(XlogError::InvalidHeader {
                    offset: self.offset,
                    reason: format!("bad row marker {:#010x}", other),
                });
            }
        }
        self.offset += 4;

        let row_offset = self.offset;
        let mut raw = [0u8; ROW_HEADER_SIZE];
        self.read_exact_at(&mut raw, "row header")?;
        let header = RowHeader::decode(&raw, row_offset)?;

        let mut data = BytesMut::zeroed(header.len as usize);
        self.read_exact_at(&mut data, "row data")?;
        header.verify(&data, row_offset)?;

        Ok(Some(Record {
            header: RecordHeader {
                lsn: header.lsn,
                timestamp: header.timestamp,
            },
            kind: self.kind,
            data: data.freeze(),
        }))
    }
}

impl<R: BufRead> RecordSource for LogReader<R> {
    /// Checksum failures skip the damaged row; framing failures end the
    /// file.
    fn next_record(&mut self) -> Result<Option<Record>, XlogError> {
        if self.exhausted {
            return Ok(None);
        }
        match self.read_record() {
            Ok(Some(record)) => Ok(Some(record)),
            Ok(None) => {
                self.exhausted = true;
                Ok(None)
            }
            Err(err) => {
                if !matches!(err, XlogError::CorruptedRecord { .. }) {
                    self.exhausted = true;
                }
                self.last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

/// Writes log files in the v0.11 format.
pub struct LogWriter<W: Write> {
    writer: W,
    kind: LogKind,
    offset: u64,
}

impl LogWriter<BufWriter<File>> {
    /// Creates a new log file; fails if it exists.
    pub fn create(path: impl AsRef<Path>, kind: LogKind) -> Result<Self, XlogError> {
        let file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path.as_ref())?;
        Self::new(BufWriter::new(file), kind, &[])
    }
}

impl<W: Write> LogWriter<W> {
    /// Writes the text header, including `meta` as `key: value` lines.
    pub fn new(mut writer: W, kind: LogKind, meta: &[(&str, &str)]) -> Result<Self, XlogError> {
        let mut header = format!("{}\n{}\n", kind.magic(), LOG_VERSION);
        for (key, value) in meta {
            header.push_str(&format!("{}: {}\n", key, value));
        }
        header.push('\n');
        writer.write_all(header.as_bytes())?;
        Ok(Self {
            writer,
            kind,
            offset: header.len() as u64,
        })
    }

    pub fn kind(&self) -> LogKind {
        self.kind
    }

    /// Appends a framed payload; returns the offset of its marker.
    pub fn append(&mut self, lsn: u64, timestamp: f64, data: &[u8]) -> Result<u64, XlogError> {
        let offset = self.offset;
        let mut buf = BytesMut::with_capacity(4 + ROW_HEADER_SIZE + data.len());
        buf.put_u32_le(ROW_MARKER);
        RowHeader::for_data(lsn, timestamp, data).encode(&mut buf);
        buf.put_slice(data);
        self.writer.write_all(&buf)?;
        self.offset += buf.len() as u64;
        Ok(offset)
    }

    /// Encodes and appends a row.
    pub fn append_row(&mut self, row: &LogRow) -> Result<u64, XlogError> {
        let mut data = BytesMut::new();
        row.encode(self.kind, &mut data)?;
        self.append(row.lsn, row.timestamp, &data)
    }

    pub fn flush(&mut self) -> Result<(), XlogError> {
        self.writer.flush()?;
        Ok(())
    }

    /// Writes the EOF marker and returns the underlying writer.
    pub fn finish(mut self) -> Result<W, XlogError> {
        self.writer.write_all(&EOF_MARKER.to_le_bytes())?;
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Reads a whole log file into memory.
pub fn read_file(path: impl AsRef<Path>) -> Result<Vec<Record>, XlogError> {
    let mut reader = LogReader::open(path)?;
    let mut records = Vec::new();
    while let Some(record) = reader.next_record()? {
        records.push(record);
    }
    Ok(records)
}
