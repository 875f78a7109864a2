//! Record source over a live byte stream.
//!
//! Records arrive as a row header immediately followed by its payload, with
//! no marker in between. The stream ends when the peer closes it between
//! records.

use crate::batch::RecordSource;
use crate::error::XlogError;
use crate::file::{read_full, RowHeader, ROW_HEADER_SIZE};
use crate::row::{LogKind, Record};
use bytes::BytesMut;
use std::io::Read;
use xlogwire_net::{Connection, NetError, SocketOps};

/// Default port of the replication feed.
pub const DEFAULT_REPLICATION_PORT: u16 = 33016;

/// Replication protocol version expected from the server.
pub const REPLICATION_VERSION: u32 = 11;

/// Blocking source of raw bytes.
pub trait ByteSource {
    /// Fills `buf`; returns fewer bytes only when the source has ended.
    ///
    /// A source that cannot count a partial fill reports it as
    /// [`NetError::Closed`] instead.
    fn fill(&mut self, buf: &mut [u8]) -> Result<usize, XlogError>;
}

/// A peer close before the first byte ends the stream. A close after it
/// surfaces as `NetError::Closed`, since `recv` does not report how much of
/// the request it had filled.
impl<S: SocketOps> ByteSource for Connection<S> {
    fn fill(&mut self, buf: &mut [u8]) -> Result<usize, XlogError> {
        let Some((first, rest)) = buf.split_first_mut() else {
            return Ok(0);
        };
        match self.recv(std::slice::from_mut(first)) {
            Ok(_) => {}
            Err(NetError::Closed) => return Ok(0),
            Err(err) => return Err(err.into()),
        }
        if !rest.is_empty() {
            self.recv(rest)?;
        }
        Ok(buf.len())
    }
}

/// Turns a peer close in the middle of `what` into a framing error.
fn cut_short(err: XlogError, position: u64, what: &str) -> XlogError {
    match err {
        XlogError::Net(NetError::Closed) => XlogError::Malformed {
            position: position as usize,
            reason: format!("stream ended inside {}: {}", what, NetError::Closed),
        },
        other => other,
    }
}

/// Adapts any [`Read`] into a [`ByteSource`].
#[derive(Debug)]
pub struct ReadSource<R>(pub R);

impl<R: Read> ByteSource for ReadSource<R> {
    fn fill(&mut self, buf: &mut [u8]) -> Result<usize, XlogError> {
        Ok(read_full(&mut self.0, buf)?)
    }
}

pub struct StreamSource<B> {
    source: B,
    kind: LogKind,
    offset: u64,
    exhausted: bool,
    last_error: Option<String>,
}

impl<B: ByteSource> StreamSource<B> {
    /// Reads xlog rows from `source`.
    pub fn new(source: B) -> Self {
        Self::with_kind(source, LogKind::Xlog)
    }

    pub fn with_kind(source: B, kind: LogKind) -> Self {
        Self {
            source,
            kind,
            offset: 0,
            exhausted: false,
            last_error: None,
        }
    }

    /// Bytes consumed so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn get_mut(&mut self) -> &mut B {
        &mut self.source
    }

    pub fn into_inner(self) -> B {
        self.source
    }

    fn read_record(&mut self) -> Result<Option<Record>, XlogError> {
        let at = self.offset;
        let mut raw = [0u8; ROW_HEADER_SIZE];
        let n = self
            .source
            .fill(&mut raw)
            .map_err(|e| cut_short(e, at, "row header"))?;
        self.offset += n as u64;
        if n == 0 {
            return Ok(None);
        }
        if n < raw.len() {
            return Err(XlogError::Malformed {
                position: at as usize,
                reason: format!("stream ended inside row header ({} of {} bytes)", n, raw.len()),
            });
        }
        let header = RowHeader::decode(&raw, at)?;

        let mut data = BytesMut::zeroed(header.len as usize);
        let n = self
            .source
            .fill(&mut data)
            .map_err(|e| cut_short(e, at, "row data"))?;
        self.offset += n as u64;
        if n < data.len() {
            return Err(XlogError::Malformed {
                position: at as usize,
                reason: format!("stream ended inside row data ({} of {} bytes)", n, data.len()),
            });
        }
        header.verify(&data, at)?;

        Ok(Some(Record::new(
            self.kind,
            header.lsn,
            header.timestamp,
            data.freeze(),
        )))
    }
}

impl<B: ByteSource> RecordSource for StreamSource<B> {
    /// Any failure ends the stream: framing is lost once a read fails.
    fn next_record(&mut self) -> Result<Option<Record>, XlogError> {
        if self.exhausted {
            return Ok(None);
        }
        match self.read_record() {
            Ok(Some(record)) => Ok(Some(record)),
            Ok(None) => {
                tracing::debug!(offset = self.offset, "stream closed");
                self.exhausted = true;
                Ok(None)
            }
            Err(err) => {
                self.exhausted = true;
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

/// Requests rows from `lsn` onwards over a connected replication socket and
/// returns a source over the feed.
///
/// The request is the LSN as `i64`; the server answers with its protocol
/// version as `u32` before streaming rows.
pub fn subscribe<S: SocketOps>(
    mut conn: Connection<S>,
    lsn: u64,
) -> Result<StreamSource<Connection<S>>, XlogError> {
    conn.send(&(lsn as i64).to_le_bytes())?;
    conn.flush()?;

    let mut version = [0u8; 4];
    conn.recv(&mut version)?;
    let version = u32::from_le_bytes(version);
    if version != REPLICATION_VERSION {
        return Err(XlogError::InvalidHeader {
            offset: 0,
            reason: format!("unsupported replication version {}", version),
        });
    }
    tracing::debug!(lsn, "subscribed to replication feed");
    Ok(StreamSource::new(conn))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{BatchOptions, BatchReader};
    use crate::request::RowOp;
    use crate::row::LogRow;
    use bytes::Bytes;
    use std::cell::RefCell;
    use std::io::{self, IoSlice};
    use std::net::SocketAddr;
    use std::os::unix::io::RawFd;
    use std::rc::Rc;
    use std::time::Duration;
    use xlogwire_net::{BufferDirection, ConnectionConfig, CooperativeWait, IoWait, Resolver};

    fn framed(rows: &[LogRow]) -> Vec<u8> {
        let mut out = BytesMut::new();
        for row in rows {
            let mut data = BytesMut::new();
            row.encode(LogKind::Xlog, &mut data).unwrap();
            RowHeader::for_data(row.lsn, row.timestamp, &data).encode(&mut out);
            out.extend_from_slice(&data);
        }
        out.to_vec()
    }

    fn row(lsn: u64) -> LogRow {
        LogRow {
            lsn,
            timestamp: 0.5,
            space: 1,
            op: RowOp::Delete {
                flags: 0,
                key: [Bytes::from(vec![lsn as u8; 3])].into_iter().collect(),
            },
        }
    }

    /// Serves `incoming` a few bytes per read, then reports an orderly close.
    #[derive(Clone)]
    struct FeedSocket {
        incoming: Rc<RefCell<(Vec<u8>, usize)>>,
        written: Rc<RefCell<Vec<u8>>>,
        chunk: usize,
    }

    impl SocketOps for FeedSocket {
        fn fd(&self) -> RawFd {
            7
        }

        fn set_nonblocking(&mut self, _nonblocking: bool) -> io::Result<()> {
            Ok(())
        }

        fn connect(&mut self, _addr: &SocketAddr) -> io::Result<()> {
            Ok(())
        }

        fn take_error(&mut self) -> io::Result<Option<i32>> {
            Ok(None)
        }

        fn set_nodelay(&mut self, _nodelay: bool) -> io::Result<()> {
            Ok(())
        }

        fn set_buffer_size(&mut self, _direction: BufferDirection, _size: usize) -> io::Result<()> {
            Ok(())
        }

        fn set_timeouts(&mut self, _send: Option<Duration>, _recv: Option<Duration>) -> io::Result<()> {
            Ok(())
        }

        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn writev(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
            let mut written = self.written.borrow_mut();
            for buf in bufs {
                written.extend_from_slice(buf);
            }
            Ok(bufs.iter().map(|b| b.len()).sum())
        }

        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut feed = self.incoming.borrow_mut();
            let (data, pos) = &mut *feed;
            let n = buf.len().min(self.chunk).min(data.len() - *pos);
            buf[..n].copy_from_slice(&data[*pos..*pos + n]);
            *pos += n;
            Ok(n)
        }

        fn close(&mut self) {}
    }

    fn connection(incoming: Vec<u8>, config: ConnectionConfig) -> Connection<FeedSocket> {
        connection_with_log(incoming, config, Rc::default())
    }

    fn connection_with_log(
        incoming: Vec<u8>,
        config: ConnectionConfig,
        written: Rc<RefCell<Vec<u8>>>,
    ) -> Connection<FeedSocket> {
        let wait: Box<dyn IoWait> = Box::new(CooperativeWait::new(|_, interest, _| Ok(interest)));
        let resolver: Box<dyn Resolver> = Box::new(
            |_: &str, port: u16, _: Option<Duration>| -> Result<SocketAddr, NetError> {
                Ok(SocketAddr::from(([127, 0, 0, 1], port)))
            },
        );
        let socket = FeedSocket {
            incoming: Rc::new(RefCell::new((incoming, 0))),
            written,
            chunk: 5,
        };
        let mut conn = Connection::with_policy(config, wait, resolver);
        conn.connect_with(move |_| Ok(socket)).unwrap();
        conn
    }

    #[test]
    fn test_stream_from_reader() {
        let rows: Vec<LogRow> = (1..=3).map(row).collect();
        let mut source = StreamSource::new(ReadSource(io::Cursor::new(framed(&rows))));
        for expected in &rows {
            let record = source.next_record().unwrap().unwrap();
            assert_eq!(&LogRow::decode(&record).unwrap(), expected);
        }
        assert!(source.next_record().unwrap().is_none());
        assert!(source.is_exhausted());
        assert!(source.last_error().is_none());
    }

    #[test]
    fn test_stream_over_connection() {
        let rows: Vec<LogRow> = (1..=5).map(row).collect();
        for config in [
            ConnectionConfig::new("replica", 33013),
            ConnectionConfig::new("replica", 33013).with_recv_buffer(0),
        ] {
            let conn = connection(framed(&rows), config);
            let source = StreamSource::new(conn);
            let options = BatchOptions::new().with_range(2, 4).with_batch_size(2);
            let lsns: Vec<Vec<u64>> = BatchReader::new(source, options)
                .map(|b| b.unwrap().rows.iter().map(|r| r.lsn).collect())
                .collect();
            assert_eq!(lsns, vec![vec![2, 3], vec![4]]);
        }
    }

    #[test]
    fn test_stream_ends_inside_row() {
        let mut bytes = framed(&[row(1)]);
        bytes.truncate(bytes.len() - 2);
        let mut source = StreamSource::new(connection(bytes, ConnectionConfig::new("db", 1)));
        let err = source.next_record().unwrap_err();
        assert!(err.to_string().contains("stream ended inside row data"));
        assert!(source.is_exhausted());
        assert!(source.next_record().unwrap().is_none());
    }

    #[test]
    fn test_stream_ends_inside_row_header() {
        let first = framed(&[row(1)]);
        let mut bytes = framed(&[row(1), row(2)]);
        bytes.truncate(first.len() + 10);
        for config in [
            ConnectionConfig::new("db", 1),
            ConnectionConfig::new("db", 1).with_recv_buffer(0),
        ] {
            let mut source = StreamSource::new(connection(bytes.clone(), config));
            assert_eq!(source.next_record().unwrap().unwrap().header.lsn, 1);

            let err = source.next_record().unwrap_err();
            assert!(err.to_string().contains("stream ended inside row header"));
            assert_eq!(err.kind(), xlogwire_codec::ErrorKind::MalformedEncoding);
            assert!(source.is_exhausted());
            assert!(source.last_error().is_some());
        }
    }

    #[test]
    fn test_stream_close_between_rows_is_clean() {
        let bytes = framed(&[row(1)]);
        let mut source = StreamSource::new(connection(bytes, ConnectionConfig::new("db", 1)));
        assert!(source.next_record().unwrap().is_some());
        assert!(source.next_record().unwrap().is_none());
        assert!(source.last_error().is_none());
    }

    #[test]
    fn test_stream_checksum_mismatch() {
        let mut bytes = framed(&[row(1)]);
        let last = bytes.len() - 1;
        bytes[last] ^= 0x55;
        let mut source = StreamSource::new(ReadSource(io::Cursor::new(bytes)));
        let err = source.next_record().unwrap_err();
        assert!(matches!(err, XlogError::CorruptedRecord { offset: 0, .. }));
        assert!(source.last_error().unwrap().contains("CRC mismatch"));
    }

    #[test]
    fn test_subscribe_handshake() {
        let rows: Vec<LogRow> = (7..=8).map(row).collect();
        let mut feed = REPLICATION_VERSION.to_le_bytes().to_vec();
        feed.extend_from_slice(&framed(&rows));

        let written = Rc::new(RefCell::new(Vec::new()));
        let conn = connection_with_log(feed, ConnectionConfig::new("master", 33016), written.clone());
        let mut source = subscribe(conn, 7).unwrap();
        assert_eq!(written.borrow().as_slice(), &7i64.to_le_bytes());

        let mut lsns = Vec::new();
        while let Some(record) = source.next_record().unwrap() {
            lsns.push(record.header.lsn);
        }
        assert_eq!(lsns, vec![7, 8]);
    }

    #[test]
    fn test_subscribe_rejects_version() {
        let conn = connection(12u32.to_le_bytes().to_vec(), ConnectionConfig::new("master", 1));
        let err = subscribe(conn, 0).err().unwrap();
        assert!(err.to_string().contains("unsupported replication version 12"));
    }
}
