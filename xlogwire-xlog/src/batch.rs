//! Batch iteration over a record source with LSN and space filters.

use crate::error::XlogError;
use crate::row::{LogRow, Record};
use std::collections::HashSet;

/// Default number of rows per batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Pull interface over framed records.
///
/// Backed by a log file ([`LogReader`](crate::file::LogReader)) or a live
/// stream ([`StreamSource`](crate::stream::StreamSource)).
pub trait RecordSource {
    /// Returns the next record, or `None` once the source is exhausted.
    fn next_record(&mut self) -> Result<Option<Record>, XlogError>;

    fn is_exhausted(&self) -> bool;

    /// Text of the last error the source ran into.
    fn last_error(&self) -> Option<&str>;
}

impl<S: RecordSource + ?Sized> RecordSource for &mut S {
    fn next_record(&mut self) -> Result<Option<Record>, XlogError> {
        (**self).next_record()
    }

    fn is_exhausted(&self) -> bool {
        (**self).is_exhausted()
    }

    fn last_error(&self) -> Option<&str> {
        (**self).last_error()
    }
}

/// Filters and sizing for [`BatchReader`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOptions {
    /// First accepted LSN, inclusive.
    pub lsn_from: u64,
    /// Last accepted LSN, inclusive.
    pub lsn_to: u64,
    /// Accepted spaces; `None` accepts all.
    pub spaces: Option<HashSet<u32>>,
    /// Maximum rows per batch.
    pub batch_size: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            lsn_from: 0,
            lsn_to: u64::MAX,
            spaces: None,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl BatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_range(mut self, from: u64, to: u64) -> Self {
        self.lsn_from = from;
        self.lsn_to = to;
        self
    }

    pub fn with_spaces(mut self, spaces: impl IntoIterator<Item = u32>) -> Self {
        self.spaces = Some(spaces.into_iter().collect());
        self
    }

    /// Sets the batch size; zero is raised to one.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn accepts_lsn(&self, lsn: u64) -> bool {
        (self.lsn_from..=self.lsn_to).contains(&lsn)
    }

    pub fn accepts_space(&self, space: u32) -> bool {
        self.spaces.as_ref().map_or(true, |s| s.contains(&space))
    }
}

/// Where a batch reader stands in its source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResumeCursor {
    /// Records pulled from the source, accepted or not.
    pub records_read: u64,
    /// LSN of the last record pulled.
    pub last_lsn: Option<u64>,
}

/// Rows accepted in one pass.
#[derive(Debug, Clone)]
pub struct Batch {
    pub rows: Vec<LogRow>,
    /// Position after the last record of this batch.
    pub cursor: ResumeCursor,
}

/// Decodes rows from a record source in batches.
///
/// A record outside the LSN range is skipped without decoding its body. A
/// record that fails to decode aborts the batch with an error. Rows accepted
/// before it are held back and open the next batch, which continues with the
/// record after the bad one.
pub struct BatchReader<S> {
    source: S,
    options: BatchOptions,
    cursor: ResumeCursor,
    pending: Vec<LogRow>,
}

impl<S: RecordSource> BatchReader<S> {
    pub fn new(source: S, options: BatchOptions) -> Self {
        Self {
            source,
            options,
            cursor: ResumeCursor::default(),
            pending: Vec::new(),
        }
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    pub fn cursor(&self) -> ResumeCursor {
        self.cursor
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn into_inner(self) -> S {
        self.source
    }

    /// Rows accepted before the last error and not yet returned.
    pub fn pending(&self) -> &[LogRow] {
        &self.pending
    }

    /// Hands over the held-back rows, e.g. before giving up on the source.
    pub fn take_pending(&mut self) -> Vec<LogRow> {
        std::mem::take(&mut self.pending)
    }

    /// Returns the next non-empty batch, or `None` once the source is
    /// exhausted.
    pub fn next_batch(&mut self) -> Result<Option<Batch>, XlogError> {
        let limit = self.options.batch_size.max(1);
        let mut rows = std::mem::take(&mut self.pending);
        rows.reserve(limit.min(1024).saturating_sub(rows.len()));

        while rows.len() < limit {
            let record = match self.source.next_record() {
                Ok(Some(record)) => record,
                Ok(None) => break,
                Err(err) => {
                    self.pending = rows;
                    return Err(XlogError::Source {
                        context: format!("record {}", self.cursor.records_read + 1),
                        source: Box::new(err),
                    });
                }
            };
            self.cursor.records_read += 1;
            self.cursor.last_lsn = Some(record.header.lsn);

            let lsn = record.header.lsn;
            if !self.options.accepts_lsn(lsn) {
                tracing::trace!(lsn, "row outside requested range");
                continue;
            }

            let row = match LogRow::decode(&record) {
                Ok(row) => row,
                Err(err) => {
                    self.pending = rows;
                    return Err(XlogError::Source {
                        context: format!("lsn {}", lsn),
                        source: Box::new(err),
                    });
                }
            };
            if !self.options.accepts_space(row.space) {
                continue;
            }
            rows.push(row);
        }

        if rows.is_empty() {
            tracing::debug!(records = self.cursor.records_read, "record source exhausted");
            return Ok(None);
        }
        tracing::debug!(rows = rows.len(), last_lsn = ?self.cursor.last_lsn, "batch decoded");
        Ok(Some(Batch {
            rows,
            cursor: self.cursor,
        }))
    }
}

impl<S: RecordSource> Iterator for BatchReader<S> {
    type Item = Result<Batch, XlogError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_batch().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RowOp;
    use crate::row::{LogKind, RecordHeader};
    use bytes::{Bytes, BytesMut};
    use std::collections::VecDeque;

    /// In-memory source; `Err` entries are returned once, in order.
    struct VecSource {
        records: VecDeque<Result<Record, XlogError>>,
        last_error: Option<String>,
    }

    impl VecSource {
        fn new(records: Vec<Result<Record, XlogError>>) -> Self {
            Self {
                records: records.into(),
                last_error: None,
            }
        }
    }

    impl RecordSource for VecSource {
        fn next_record(&mut self) -> Result<Option<Record>, XlogError> {
            match self.records.pop_front() {
                Some(Ok(record)) => Ok(Some(record)),
                Some(Err(err)) => {
                    self.last_error = Some(err.to_string());
                    Err(err)
                }
                None => Ok(None),
            }
        }

        fn is_exhausted(&self) -> bool {
            self.records.is_empty()
        }

        fn last_error(&self) -> Option<&str> {
            self.last_error.as_deref()
        }
    }

    fn record(lsn: u64, space: u32) -> Record {
        let row = LogRow {
            lsn,
            timestamp: lsn as f64,
            space,
            op: RowOp::Insert {
                flags: 0,
                tuple: [Bytes::from(lsn.to_string())].into_iter().collect(),
            },
        };
        let mut buf = BytesMut::new();
        row.encode(LogKind::Xlog, &mut buf).unwrap();
        Record {
            header: RecordHeader {
                lsn,
                timestamp: lsn as f64,
            },
            kind: LogKind::Xlog,
            data: buf.freeze(),
        }
    }

    fn lsns(batches: &[Batch]) -> Vec<Vec<u64>> {
        batches
            .iter()
            .map(|b| b.rows.iter().map(|r| r.lsn).collect())
            .collect()
    }

    fn read_all(source: VecSource, options: BatchOptions) -> Vec<Batch> {
        BatchReader::new(source, options)
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn test_range_filter_independent_of_batch_size() {
        let expected = [
            (1, vec![vec![2], vec![3], vec![4]]),
            (2, vec![vec![2, 3], vec![4]]),
            (10, vec![vec![2, 3, 4]]),
        ];
        for (size, chunks) in expected {
            let source = VecSource::new((1..=5).map(|lsn| Ok(record(lsn, 0))).collect());
            let options = BatchOptions::new().with_range(2, 4).with_batch_size(size);
            let batches = read_all(source, options);
            assert_eq!(lsns(&batches), chunks, "batch size {}", size);
        }
    }

    #[test]
    fn test_space_allowlist() {
        let source = VecSource::new(vec![
            Ok(record(1, 0)),
            Ok(record(2, 7)),
            Ok(record(3, 1)),
            Ok(record(4, 7)),
        ]);
        let options = BatchOptions::new().with_spaces([7]);
        let batches = read_all(source, options);
        assert_eq!(lsns(&batches), vec![vec![2, 4]]);
        assert_eq!(
            batches[0].cursor,
            ResumeCursor {
                records_read: 4,
                last_lsn: Some(4)
            }
        );
    }

    #[test]
    fn test_empty_source() {
        let mut reader = BatchReader::new(VecSource::new(Vec::new()), BatchOptions::new());
        assert!(reader.next_batch().unwrap().is_none());
        assert!(reader.source().is_exhausted());
    }

    #[test]
    fn test_malformed_row_aborts_batch() {
        let mut bad = record(2, 0);
        bad.data = bad.data.slice(..bad.data.len() - 1);
        let source = VecSource::new(vec![Ok(record(1, 0)), Ok(bad), Ok(record(3, 0))]);
        let mut reader = BatchReader::new(source, BatchOptions::new());

        let err = reader.next_batch().unwrap_err();
        assert!(err.to_string().starts_with("parsing failed at lsn 2: truncated"));
        assert_eq!(err.kind(), xlogwire_codec::ErrorKind::MalformedEncoding);

        // Row 1 is held back and leads the next batch, which resumes after
        // the bad record.
        assert_eq!(reader.pending().len(), 1);
        let batch = reader.next_batch().unwrap().unwrap();
        assert_eq!(batch.rows.iter().map(|r| r.lsn).collect::<Vec<_>>(), vec![1, 3]);
        assert!(reader.pending().is_empty());
        assert!(reader.next_batch().unwrap().is_none());
    }

    #[test]
    fn test_bad_record_keeps_earlier_rows() {
        let records = || {
            let mut bad = record(4, 0);
            bad.data = Bytes::from_static(b"garbage");
            vec![
                Ok(record(1, 0)),
                Ok(record(2, 0)),
                Ok(record(3, 0)),
                Ok(bad),
                Ok(record(5, 0)),
            ]
        };
        for size in [1, 2, DEFAULT_BATCH_SIZE] {
            let options = BatchOptions::new().with_batch_size(size);
            let mut reader = BatchReader::new(VecSource::new(records()), options);
            let mut seen = Vec::new();
            let mut errors = 0;
            loop {
                match reader.next_batch() {
                    Ok(Some(batch)) => seen.extend(batch.rows.iter().map(|r| r.lsn)),
                    Ok(None) => break,
                    Err(_) => errors += 1,
                }
            }
            assert_eq!(seen, vec![1, 2, 3, 5], "batch size {}", size);
            assert_eq!(errors, 1);
        }
    }

    #[test]
    fn test_take_pending_after_source_error() {
        let source = VecSource::new(vec![
            Ok(record(1, 0)),
            Ok(record(2, 0)),
            Err(XlogError::Malformed {
                position: 0,
                reason: "bad marker".to_string(),
            }),
        ]);
        let mut reader = BatchReader::new(source, BatchOptions::new());
        assert!(reader.next_batch().is_err());
        let held: Vec<u64> = reader.take_pending().iter().map(|r| r.lsn).collect();
        assert_eq!(held, vec![1, 2]);
        assert!(reader.next_batch().unwrap().is_none());
    }

    #[test]
    fn test_source_error_includes_stream_text() {
        let source = VecSource::new(vec![
            Ok(record(1, 0)),
            Err(XlogError::CorruptedRecord {
                offset: 64,
                expected: 1,
                actual: 2,
            }),
        ]);
        let mut reader = BatchReader::new(source, BatchOptions::new());
        let err = reader.next_batch().unwrap_err();
        assert!(err
            .to_string()
            .starts_with("parsing failed at record 2: record corrupted at offset 64"));
        assert_eq!(
            reader.source().last_error(),
            Some("record corrupted at offset 64: CRC mismatch (expected 0x1, got 0x2)")
        );
    }

    #[test]
    fn test_out_of_range_rows_are_not_decoded() {
        let mut bad = record(9, 0);
        bad.data = Bytes::from_static(b"garbage");
        let source = VecSource::new(vec![Ok(record(1, 0)), Ok(bad)]);
        let batches = read_all(source, BatchOptions::new().with_range(0, 5));
        assert_eq!(lsns(&batches), vec![vec![1]]);
    }
}
