//! Prompt-Terminated Frame Buffering
//!
//! Serial drivers deliver arbitrary-sized chunks with no message boundary.
//! ELM327 adapters end every reply with the `>` prompt, so replies are
//! accumulated into a bounded [`FrameBuffer`] until the prompt shows up or the
//! read-attempt budget runs out, then served one frame at a time.

use crate::error::TransportError;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};

/// ELM327 prompt byte that ends every reply
pub const TERMINATOR: u8 = b'>';

/// Result of appending a chunk to the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillStatus {
    /// A terminator is buffered; a complete frame can be taken
    Terminated,
    /// No terminator yet, room left
    Partial,
    /// Buffer reached capacity without a terminator; excess bytes dropped
    Full,
}

/// Bounded accumulation buffer for raw serial chunks
#[derive(Debug)]
pub struct FrameBuffer {
    /// Pre-allocated storage
    storage: Box<[u8]>,
    /// Number of valid bytes at the front of `storage`
    len: usize,
}

impl FrameBuffer {
    /// Create a buffer holding at most `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            storage: vec![0u8; capacity.max(1)].into_boxed_slice(),
            len: 0,
        }
    }

    /// Append a chunk, truncating whatever does not fit
    pub fn fill(&mut self, chunk: &[u8]) -> FillStatus {
        let room = self.remaining_capacity();
        let accepted = chunk.len().min(room);
        self.storage[self.len..self.len + accepted].copy_from_slice(&chunk[..accepted]);
        self.len += accepted;

        if accepted < chunk.len() {
            warn!(
                "Frame buffer full, dropped {} bytes",
                chunk.len() - accepted
            );
        }

        if self.has_terminator() {
            FillStatus::Terminated
        } else if self.remaining_capacity() == 0 {
            FillStatus::Full
        } else {
            FillStatus::Partial
        }
    }

    /// Remove and return the next frame.
    ///
    /// If a terminator is buffered the frame ends with it and any bytes after
    /// it stay buffered for the next frame; otherwise every buffered byte is
    /// returned as an unterminated frame.
    pub fn take_frame(&mut self) -> Frame {
        let end = match self.terminator_position() {
            Some(pos) => pos + 1,
            None => self.len,
        };
        let bytes = self.storage[..end].to_vec();
        self.storage.copy_within(end..self.len, 0);
        self.len -= end;
        Frame::new(bytes)
    }

    /// Whether a terminator byte is buffered
    pub fn has_terminator(&self) -> bool {
        self.terminator_position().is_some()
    }

    fn terminator_position(&self) -> Option<usize> {
        self.storage[..self.len].iter().position(|&b| b == TERMINATOR)
    }

    /// Number of buffered bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Maximum number of buffered bytes
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Bytes that can still be appended
    pub fn remaining_capacity(&self) -> usize {
        self.capacity() - self.len
    }
}

/// One owned reply, consumed front to back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
    position: usize,
}

impl Frame {
    fn new(bytes: Vec<u8>) -> Self {
        Self { bytes, position: 0 }
    }

    /// All bytes of the frame
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Whether the frame ends with the prompt
    pub fn is_terminated(&self) -> bool {
        self.bytes.last() == Some(&TERMINATOR)
    }

    /// Check if the frame carries no bytes at all
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.position
    }

    /// Copy unread bytes into `buf`, returning how many were copied
    pub fn read_into(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.remaining());
        buf[..n].copy_from_slice(&self.bytes[self.position..self.position + n]);
        self.position += n;
        n
    }
}

/// Reader that turns a chunked byte source into prompt-terminated frames.
///
/// `read` serves bytes of the current frame and returns `Ok(0)` once it is
/// exhausted; the call after that starts filling a new frame.
pub struct FramedReader<R> {
    inner: R,
    buffer: FrameBuffer,
    current: Option<Frame>,
    read_attempts: usize,
    read_timeout: Duration,
}

impl<R: AsyncRead + Unpin + Send> FramedReader<R> {
    /// Wrap a byte source
    pub fn new(inner: R, capacity: usize, read_attempts: usize, read_timeout: Duration) -> Self {
        Self {
            inner,
            buffer: FrameBuffer::with_capacity(capacity),
            current: None,
            read_attempts: read_attempts.max(1),
            read_timeout,
        }
    }

    /// Read bytes of the current frame; `Ok(0)` marks end-of-frame
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if buf.is_empty() {
            return Ok(0);
        }

        if self.current.is_none() {
            let frame = self.fill().await?;
            if frame.is_empty() {
                return Ok(0);
            }
            self.current = Some(frame);
        }

        let n = self
            .current
            .as_mut()
            .map_or(0, |frame| frame.read_into(buf));
        if n == 0 {
            self.current = None;
        }
        Ok(n)
    }

    /// Read a single byte; `None` marks end-of-frame
    pub async fn read_byte(&mut self) -> Result<Option<u8>, TransportError> {
        let mut byte = [0u8; 1];
        match self.read(&mut byte).await? {
            0 => Ok(None),
            _ => Ok(Some(byte[0])),
        }
    }

    /// Underlying source, e.g. for writing commands
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    async fn fill(&mut self) -> Result<Frame, TransportError> {
        let mut chunk = vec![0u8; self.buffer.capacity()];

        for attempt in 0..self.read_attempts {
            if self.buffer.has_terminator() {
                break;
            }
            let room = self.buffer.remaining_capacity();
            if room == 0 {
                warn!("Frame buffer exhausted without terminator");
                break;
            }

            match tokio::time::timeout(self.read_timeout, self.inner.read(&mut chunk[..room])).await {
                Err(_) => continue,
                Ok(Ok(0)) => {
                    return Err(TransportError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "serial device closed the stream",
                    )))
                }
                Ok(Ok(n)) => {
                    self.buffer.fill(&chunk[..n]);
                }
                Ok(Err(e)) => return Err(e.into()),
            }

            if attempt + 1 == self.read_attempts && !self.buffer.has_terminator() {
                debug!(
                    "Read attempts exhausted with {} unterminated bytes",
                    self.buffer.len()
                );
            }
        }

        Ok(self.buffer.take_frame())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::VecDeque;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    /// Byte source that hands out pre-split chunks, then pends forever
    struct ChunkedSource {
        chunks: VecDeque<Vec<u8>>,
    }

    impl ChunkedSource {
        fn new(chunks: &[&[u8]]) -> Self {
            Self {
                chunks: chunks.iter().map(|c| c.to_vec()).collect(),
            }
        }
    }

    impl AsyncRead for ChunkedSource {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            match self.chunks.pop_front() {
                Some(mut chunk) => {
                    let n = chunk.len().min(buf.remaining());
                    buf.put_slice(&chunk[..n]);
                    if n < chunk.len() {
                        let rest = chunk.split_off(n);
                        self.chunks.push_front(rest);
                    }
                    Poll::Ready(Ok(()))
                }
                None => Poll::Pending,
            }
        }
    }

    async fn drain_frame<R: AsyncRead + Unpin + Send>(reader: &mut FramedReader<R>) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(b) = reader.read_byte().await.unwrap() {
            out.push(b);
        }
        out
    }

    #[test]
    fn test_fill_reports_terminator() {
        let mut buffer = FrameBuffer::with_capacity(16);
        assert_eq!(buffer.fill(b"41 0C"), FillStatus::Partial);
        assert_eq!(buffer.fill(b" 1A\r>"), FillStatus::Terminated);
        let frame = buffer.take_frame();
        assert_eq!(frame.as_bytes(), b"41 0C 1A\r>");
        assert!(frame.is_terminated());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_take_frame_keeps_trailing_bytes() {
        let mut buffer = FrameBuffer::with_capacity(16);
        buffer.fill(b"OK\r>41");
        assert_eq!(buffer.take_frame().as_bytes(), b"OK\r>");
        assert_eq!(buffer.len(), 2);
        let rest = buffer.take_frame();
        assert_eq!(rest.as_bytes(), b"41");
        assert!(!rest.is_terminated());
    }

    #[test]
    fn test_overflow_truncates() {
        let mut buffer = FrameBuffer::with_capacity(4);
        assert_eq!(buffer.fill(b"ABCDEF"), FillStatus::Full);
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.take_frame().as_bytes(), b"ABCD");
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_byte_reads_across_chunks() {
        let source = ChunkedSource::new(&[b"41 00", b" BE\r3E", b" 00\r>", b"OK\r>"]);
        let mut reader = FramedReader::new(source, 64, 10, Duration::from_millis(15));

        assert_eq!(drain_frame(&mut reader).await, b"41 00 BE\r3E 00\r>".to_vec());
        // next call starts a fresh frame
        assert_eq!(drain_frame(&mut reader).await, b"OK\r>".to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_of_frame_signalled_once_per_frame() {
        let source = ChunkedSource::new(&[b"A>", b"B>"]);
        let mut reader = FramedReader::new(source, 8, 3, Duration::from_millis(15));

        assert_eq!(reader.read_byte().await.unwrap(), Some(b'A'));
        assert_eq!(reader.read_byte().await.unwrap(), Some(b'>'));
        assert_eq!(reader.read_byte().await.unwrap(), None);
        assert_eq!(reader.read_byte().await.unwrap(), Some(b'B'));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_budget_yields_partial_frame() {
        let source = ChunkedSource::new(&[b"SEARCHING"]);
        let mut reader = FramedReader::new(source, 32, 4, Duration::from_millis(15));

        assert_eq!(drain_frame(&mut reader).await, b"SEARCHING".to_vec());
        // nothing more arrives: empty frame after the attempt budget
        assert_eq!(reader.read_byte().await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bulk_read_stops_at_frame_end() {
        let source = ChunkedSource::new(&[b"41 0D 55\r>NO DATA\r>"]);
        let mut reader = FramedReader::new(source, 64, 2, Duration::from_millis(15));
        let mut buf = [0u8; 64];

        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"41 0D 55\r>");
        assert_eq!(reader.read(&mut buf).await.unwrap(), 0);
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"NO DATA\r>");
    }

    proptest! {
        #[test]
        fn prop_chunking_does_not_change_frame(split_points in proptest::collection::vec(0usize..16, 0..6)) {
            let payload: &[u8] = b"41 00 BE\r3E 00\r>";
            let mut cuts: Vec<usize> = split_points.into_iter().map(|p| p % payload.len()).collect();
            cuts.sort_unstable();
            cuts.dedup();

            let mut chunks = Vec::new();
            let mut start = 0;
            for cut in cuts.into_iter().filter(|&c| c > 0) {
                chunks.push(payload[start..cut].to_vec());
                start = cut;
            }
            chunks.push(payload[start..].to_vec());

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();
            let received = runtime.block_on(async {
                let source = ChunkedSource { chunks: chunks.into_iter().collect() };
                let mut reader = FramedReader::new(source, 64, 16, Duration::from_millis(15));
                drain_frame(&mut reader).await
            });
            prop_assert_eq!(received, payload.to_vec());
        }
    }
}
