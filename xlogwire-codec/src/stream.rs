//! Growable output stream over a pluggable backing store.
//!
//! An [`MpStream`] writes into a window handed out by a [`Backing`]. When the
//! window runs out, the bytes written so far are committed to the backing and
//! a fresh window is fetched:
//!
//! ```text
//!   window: [ committed .. | start ...... pos | ...... end ]
//!                           ^ written, not yet committed
//! ```
//!
//! A stream can also wrap caller-owned bytes ([`MpStream::from_slice`]); such a
//! stream is immutable and rejects every write.

use crate::decode::Cursor;
use crate::error::CodecError;
use bytes::{Bytes, BytesMut};

/// Default window size handed out by [`Arena`] (4 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024;

/// Storage provider for an [`MpStream`].
pub trait Backing {
    /// Hands out a fresh window of at least `hint` bytes.
    ///
    /// The length of the returned vector is the usable window size and may be
    /// larger than `hint`. Returns `None` when the store is exhausted.
    fn fetch(&mut self, hint: usize) -> Option<Vec<u8>>;

    /// Takes the bytes written into the current window.
    ///
    /// Fails with [`CodecError::AllocationFailed`] when the store cannot hold
    /// them; nothing is taken in that case.
    fn commit(&mut self, used: &[u8]) -> Result<(), CodecError>;
}

/// Receives codec failures as they happen.
///
/// Reporting does not unwind: the failing call still returns its error and
/// the caller decides what to do with it.
pub trait ErrorSink {
    fn report(&mut self, err: &CodecError);
}

/// Unbounded backing store that accumulates committed bytes.
#[derive(Debug)]
pub struct Arena {
    data: BytesMut,
    chunk_size: usize,
    fetches: usize,
}

impl Arena {
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            data: BytesMut::new(),
            chunk_size,
            fetches: 0,
        }
    }

    /// Returns the committed bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns how many windows were handed out.
    pub fn fetches(&self) -> usize {
        self.fetches
    }

    /// Takes the committed bytes, leaving the arena empty.
    pub fn take(&mut self) -> Bytes {
        self.data.split().freeze()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

impl Backing for Arena {
    fn fetch(&mut self, hint: usize) -> Option<Vec<u8>> {
        self.fetches += 1;
        Some(vec![0u8; hint.max(self.chunk_size)])
    }

    fn commit(&mut self, used: &[u8]) -> Result<(), CodecError> {
        self.data.extend_from_slice(used);
        Ok(())
    }
}

/// Bounded backing store; fails once `capacity` bytes are in use.
#[derive(Debug)]
pub struct FixedScratch {
    data: Vec<u8>,
    capacity: usize,
}

impl FixedScratch {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the bytes still available to new windows.
    pub fn remaining(&self) -> usize {
        self.capacity - self.data.len()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

impl Backing for FixedScratch {
    fn fetch(&mut self, hint: usize) -> Option<Vec<u8>> {
        let remaining = self.remaining();
        if hint > remaining {
            return None;
        }
        Some(vec![0u8; remaining])
    }

    fn commit(&mut self, used: &[u8]) -> Result<(), CodecError> {
        if used.len() > self.remaining() {
            return Err(CodecError::AllocationFailed {
                context: "commit",
                size: used.len(),
            });
        }
        self.data.extend_from_slice(used);
        Ok(())
    }
}

/// Where a stream's bytes live.
enum Target<'a> {
    Backed {
        backing: &'a mut dyn Backing,
        window: Vec<u8>,
    },
    Fixed(&'a [u8]),
}

/// Growable output stream.
pub struct MpStream<'a> {
    target: Target<'a>,
    /// Start of the uncommitted region.
    start: usize,
    /// Write cursor.
    pos: usize,
    /// Bytes granted by the last `reserve` and not yet advanced over.
    reserved: usize,
    sink: Option<&'a mut dyn ErrorSink>,
}

impl<'a> MpStream<'a> {
    /// Creates a stream and fetches its first window.
    pub fn new(backing: &'a mut dyn Backing) -> Result<Self, CodecError> {
        Self::build(backing, None)
    }

    /// Creates a stream that reports failures to `sink`.
    pub fn with_sink(
        backing: &'a mut dyn Backing,
        sink: &'a mut dyn ErrorSink,
    ) -> Result<Self, CodecError> {
        Self::build(backing, Some(sink))
    }

    fn build(
        backing: &'a mut dyn Backing,
        sink: Option<&'a mut dyn ErrorSink>,
    ) -> Result<Self, CodecError> {
        let mut stream = Self {
            target: Target::Backed {
                backing,
                window: Vec::new(),
            },
            start: 0,
            pos: 0,
            reserved: 0,
            sink,
        };
        stream.reset()?;
        Ok(stream)
    }

    /// Wraps caller-owned bytes as an immutable stream positioned at their end.
    pub fn from_slice(data: &'a [u8]) -> Self {
        Self {
            target: Target::Fixed(data),
            start: 0,
            pos: data.len(),
            reserved: 0,
            sink: None,
        }
    }

    /// Wraps caller-owned bytes, reporting write attempts to `sink`.
    pub fn from_slice_with_sink(data: &'a [u8], sink: &'a mut dyn ErrorSink) -> Self {
        let mut stream = Self::from_slice(data);
        stream.sink = Some(sink);
        stream
    }

    pub fn is_immutable(&self) -> bool {
        matches!(self.target, Target::Fixed(_))
    }

    fn window(&self) -> &[u8] {
        match &self.target {
            Target::Backed { window, .. } => window,
            Target::Fixed(data) => data,
        }
    }

    /// Returns the write cursor within the current window.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Returns the start of the uncommitted region.
    pub fn window_start(&self) -> usize {
        self.start
    }

    /// Returns the end of the current window.
    pub fn window_end(&self) -> usize {
        self.window().len()
    }

    /// Returns the bytes written since the last commit.
    pub fn written(&self) -> &[u8] {
        &self.window()[self.start..self.pos]
    }

    /// Returns a decode cursor over the bytes written since the last commit.
    pub fn iter(&self) -> Cursor<'_> {
        let window = self.window();
        Cursor::with_limit(&window[self.start..], self.pos - self.start)
    }

    fn fail(&mut self, err: CodecError) -> CodecError {
        match self.sink.as_mut() {
            Some(sink) => sink.report(&err),
            None => tracing::error!("{}", err),
        }
        err
    }

    fn check_mutable(&mut self) -> Result<(), CodecError> {
        if self.is_immutable() {
            return Err(self.fail(CodecError::Immutable));
        }
        Ok(())
    }

    /// Drops the current window and fetches a new one without committing.
    pub fn reset(&mut self) -> Result<(), CodecError> {
        self.check_mutable()?;
        let fetched = match &mut self.target {
            Target::Backed { backing, .. } => backing.fetch(0),
            Target::Fixed(_) => return Err(CodecError::Immutable),
        };
        self.install(fetched, "reset", 0)
    }

    fn install(
        &mut self,
        fetched: Option<Vec<u8>>,
        context: &'static str,
        size: usize,
    ) -> Result<(), CodecError> {
        self.start = 0;
        self.pos = 0;
        self.reserved = 0;
        match fetched {
            Some(new_window) => {
                if let Target::Backed { window, .. } = &mut self.target {
                    *window = new_window;
                }
                Ok(())
            }
            None => {
                if let Target::Backed { window, .. } = &mut self.target {
                    window.clear();
                }
                Err(self.fail(CodecError::AllocationFailed { context, size }))
            }
        }
    }

    /// Guarantees at least `size` writable bytes at the cursor.
    ///
    /// When the current window is too small, the written bytes are committed
    /// and a new window is fetched from the backing store.
    pub fn reserve(&mut self, size: usize) -> Result<&mut [u8], CodecError> {
        self.check_mutable()?;
        if self.pos + size > self.window_end() {
            self.reserve_slow(size)?;
        }
        self.reserved = size;
        match &mut self.target {
            Target::Backed { window, .. } => Ok(&mut window[self.pos..]),
            Target::Fixed(_) => Err(CodecError::Immutable),
        }
    }

    fn reserve_slow(&mut self, size: usize) -> Result<(), CodecError> {
        let committed = match &mut self.target {
            Target::Backed { backing, window } => backing.commit(&window[self.start..self.pos]),
            Target::Fixed(_) => return Err(CodecError::Immutable),
        };
        if let Err(err) = committed {
            return Err(self.fail(err));
        }
        self.start = self.pos;
        let fetched = match &mut self.target {
            Target::Backed { backing, .. } => backing.fetch(size),
            Target::Fixed(_) => return Err(CodecError::Immutable),
        };
        tracing::trace!(size, "mpstream window exhausted, fetching a new one");
        self.install(fetched, "reserve", size)
    }

    /// Commits `size` bytes written into the reserved region.
    pub fn advance(&mut self, size: usize) -> Result<(), CodecError> {
        self.check_mutable()?;
        if size > self.reserved {
            return Err(self.fail(CodecError::AdvanceOverflow {
                requested: size,
                reserved: self.reserved,
            }));
        }
        debug_assert!(self.pos + size <= self.window_end());
        self.pos += size;
        self.reserved -= size;
        Ok(())
    }

    /// Hands everything written so far to the backing store.
    pub fn flush(&mut self) -> Result<(), CodecError> {
        self.check_mutable()?;
        if let Target::Backed { backing, window } = &mut self.target {
            if let Err(err) = backing.commit(&window[self.start..self.pos]) {
                return Err(self.fail(err));
            }
        }
        self.start = self.pos;
        Ok(())
    }

    /// Reserves `bound` bytes, lets `write` fill them and advances by the
    /// count it returns.
    pub(crate) fn put(
        &mut self,
        bound: usize,
        write: impl FnOnce(&mut [u8]) -> usize,
    ) -> Result<usize, CodecError> {
        let out = self.reserve(bound)?;
        let written = write(out);
        self.advance(written)?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        messages: Vec<String>,
    }

    impl ErrorSink for Recorder {
        fn report(&mut self, err: &CodecError) {
            self.messages.push(err.to_string());
        }
    }

    #[test]
    fn test_new_fetches_initial_window() {
        let mut arena = Arena::with_chunk_size(64);
        let stream = MpStream::new(&mut arena).unwrap();
        assert_eq!(stream.window_end(), 64);
        assert_eq!(stream.position(), 0);
        assert!(!stream.is_immutable());
        drop(stream);
        assert_eq!(arena.fetches(), 1);
    }

    #[test]
    fn test_reserve_and_advance() {
        let mut arena = Arena::with_chunk_size(16);
        let mut stream = MpStream::new(&mut arena).unwrap();

        let out = stream.reserve(3).unwrap();
        assert!(out.len() >= 3);
        out[..3].copy_from_slice(b"abc");
        stream.advance(3).unwrap();

        assert_eq!(stream.written(), b"abc");
        assert!(stream.window_start() <= stream.position());
        assert!(stream.position() <= stream.window_end());
    }

    #[test]
    fn test_advance_past_reserve_rejected() {
        let mut arena = Arena::new();
        let mut stream = MpStream::new(&mut arena).unwrap();

        stream.reserve(4).unwrap();
        let err = stream.advance(5).unwrap_err();
        assert!(matches!(
            err,
            CodecError::AdvanceOverflow {
                requested: 5,
                reserved: 4
            }
        ));
        assert_eq!(stream.position(), 0);

        // Reserved bytes are consumed by advancing.
        stream.advance(4).unwrap();
        assert!(stream.advance(1).is_err());
    }

    #[test]
    fn test_growth_commits_old_window() {
        let mut arena = Arena::with_chunk_size(8);
        {
            let mut stream = MpStream::new(&mut arena).unwrap();
            let out = stream.reserve(6).unwrap();
            out[..6].copy_from_slice(b"hello!");
            stream.advance(6).unwrap();

            // Does not fit into the remaining 2 bytes.
            let out = stream.reserve(5).unwrap();
            out[..5].copy_from_slice(b"world");
            stream.advance(5).unwrap();
            assert_eq!(stream.written(), b"world");
            stream.flush().unwrap();
        }
        assert_eq!(arena.as_slice(), b"hello!world");
        assert_eq!(arena.fetches(), 2);
    }

    #[test]
    fn test_flush_keeps_window_end() {
        let mut arena = Arena::with_chunk_size(32);
        let mut stream = MpStream::new(&mut arena).unwrap();
        let out = stream.reserve(2).unwrap();
        out[..2].copy_from_slice(b"ok");
        stream.advance(2).unwrap();

        let end = stream.window_end();
        stream.flush().unwrap();
        assert_eq!(stream.window_end(), end);
        assert_eq!(stream.window_start(), stream.position());
        assert!(stream.written().is_empty());
    }

    #[test]
    fn test_fixed_scratch_exhaustion() {
        let mut scratch = FixedScratch::new(8);
        let mut recorder = Recorder::default();
        {
            let mut stream = MpStream::with_sink(&mut scratch, &mut recorder).unwrap();
            let out = stream.reserve(8).unwrap();
            out[..8].copy_from_slice(b"12345678");
            stream.advance(8).unwrap();

            let err = stream.reserve(1).unwrap_err();
            assert!(matches!(
                err,
                CodecError::AllocationFailed {
                    context: "reserve",
                    size: 1
                }
            ));
        }
        assert_eq!(scratch.as_slice(), b"12345678");
        assert_eq!(recorder.messages.len(), 1);
        assert!(recorder.messages[0].contains("Failed to allocate 1 bytes"));
    }

    #[test]
    fn test_fixed_scratch_rejects_oversized_commit() {
        let mut scratch = FixedScratch::new(4);
        scratch.commit(b"ab").unwrap();
        let err = scratch.commit(b"xyz").unwrap_err();
        assert!(matches!(
            err,
            CodecError::AllocationFailed {
                context: "commit",
                size: 3
            }
        ));
        assert_eq!(err.kind(), crate::error::ErrorKind::AllocationFailed);
        // Nothing of the rejected commit is kept.
        assert_eq!(scratch.as_slice(), b"ab");
        assert_eq!(scratch.remaining(), 2);
    }

    /// Hands out windows larger than the space it can actually store.
    struct Overcommitting(FixedScratch);

    impl Backing for Overcommitting {
        fn fetch(&mut self, _hint: usize) -> Option<Vec<u8>> {
            Some(vec![0u8; 16])
        }

        fn commit(&mut self, used: &[u8]) -> Result<(), CodecError> {
            self.0.commit(used)
        }
    }

    #[test]
    fn test_flush_reports_failed_commit() {
        let mut backing = Overcommitting(FixedScratch::new(4));
        let mut recorder = Recorder::default();
        {
            let mut stream = MpStream::with_sink(&mut backing, &mut recorder).unwrap();
            stream.encode_str(b"too long").unwrap();
            assert!(matches!(
                stream.flush(),
                Err(CodecError::AllocationFailed {
                    context: "commit",
                    size: 9
                })
            ));
        }
        assert!(backing.0.as_slice().is_empty());
        assert_eq!(recorder.messages.len(), 1);
    }

    #[test]
    fn test_immutable_rejects_writes() {
        let data = [0x91u8, 0x01];
        let mut recorder = Recorder::default();
        let mut stream = MpStream::from_slice_with_sink(&data, &mut recorder);

        assert!(stream.is_immutable());
        assert!(matches!(stream.reserve(1), Err(CodecError::Immutable)));
        assert!(matches!(stream.advance(0), Err(CodecError::Immutable)));
        assert!(matches!(stream.flush(), Err(CodecError::Immutable)));
        assert!(matches!(stream.reset(), Err(CodecError::Immutable)));
        assert_eq!(stream.written(), &data);
        drop(stream);

        assert_eq!(recorder.messages.len(), 4);
        assert!(recorder.messages[0].contains("Immutable"));
    }

    #[test]
    fn test_arena_take() {
        let mut arena = Arena::new();
        arena.commit(b"abc").unwrap();
        let bytes = arena.take();
        assert_eq!(&bytes[..], b"abc");
        assert!(arena.is_empty());
    }
}
