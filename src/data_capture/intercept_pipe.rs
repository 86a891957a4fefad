//! Synchronous in-memory pipe with a tap on the write path.
//!
//! Reads and writes are matched one to one, except when several reads are
//! needed to consume a single write. A write does not complete until readers
//! have consumed every byte of it: the data is handed over directly from the
//! writer to the reader and nothing is buffered inside the pipe, so
//! backpressure from a slow reader reaches the writer.
//!
//! The tap registered at construction sees each written slice before any
//! reader does. It runs on the writer's task and must return promptly.
//!
//! ```no_run
//! use sshcast::data_capture::InterceptPipe;
//!
//! # async fn demo() {
//! let pipe = InterceptPipe::with_tap(|b: &[u8]| println!("tapped {} bytes", b.len()));
//! let (writer, reader) = (pipe.writer(), pipe.reader());
//!
//! let producer = tokio::spawn(async move {
//!     writer.write(b"hello").await.unwrap();
//!     writer.close();
//! });
//!
//! let mut buf = [0u8; 16];
//! let n = reader.read(&mut buf).await.unwrap();
//! assert_eq!(&buf[..n], b"hello");
//! assert_eq!(reader.read(&mut buf).await.unwrap(), 0); // end of stream
//! producer.await.unwrap();
//! # }
//! ```

use std::sync::{Arc, Mutex, OnceLock};

use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::error_handling::types::PipeError;

type Tap = Box<dyn Fn(&[u8]) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClosedBy {
    Reader,
    Writer,
}

#[derive(Debug)]
struct Closure {
    by: ClosedBy,
    err: Option<PipeError>,
}

/// Bytes offered by the writer currently holding the write lock.
#[derive(Default)]
struct Slot {
    offer: Option<Vec<u8>>,
    pos: usize,
}

struct Inner {
    /// Serializes writers; held for the whole hand-off of one write.
    write_lock: AsyncMutex<()>,
    /// Serializes readers.
    read_lock: AsyncMutex<()>,
    slot: Mutex<Slot>,
    data_ready: Notify,
    consumed: Notify,
    done: CancellationToken,
    closed: OnceLock<Closure>,
    tap: Option<Tap>,
}

/// A tapped rendezvous pipe. Cheap to clone; all clones share the same ends.
#[derive(Clone)]
pub struct InterceptPipe {
    inner: Arc<Inner>,
}

impl InterceptPipe {
    /// Creates a pipe without a tap.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Creates a pipe whose `tap` observes every written slice.
    pub fn with_tap<F>(tap: F) -> Self
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        Self::build(Some(Box::new(tap)))
    }

    fn build(tap: Option<Tap>) -> Self {
        Self {
            inner: Arc::new(Inner {
                write_lock: AsyncMutex::new(()),
                read_lock: AsyncMutex::new(()),
                slot: Mutex::new(Slot::default()),
                data_ready: Notify::new(),
                consumed: Notify::new(),
                done: CancellationToken::new(),
                closed: OnceLock::new(),
                tap,
            }),
        }
    }

    /// Returns the reading half of the pipe.
    pub fn reader(&self) -> PipeReader {
        PipeReader {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Returns the writing half of the pipe.
    pub fn writer(&self) -> PipeWriter {
        PipeWriter {
            inner: Arc::clone(&self.inner),
        }
    }

    /// True once either end has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.done.is_cancelled()
    }
}

impl Default for InterceptPipe {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn close(&self, by: ClosedBy, err: Option<PipeError>) {
        // Only the first close is honored.
        if self.closed.set(Closure { by, err }).is_ok() {
            self.done.cancel();
        }
    }

    /// What a reader observes after close: `Ok(0)` is end of stream.
    fn read_close_result(&self) -> Result<usize, PipeError> {
        match self.closed.get() {
            Some(Closure {
                by: ClosedBy::Writer,
                err: None,
            }) => Ok(0),
            Some(Closure {
                by: ClosedBy::Writer,
                err: Some(e),
            }) => Err(e.clone()),
            _ => Err(PipeError::ClosedPipe),
        }
    }

    fn write_close_error(&self) -> PipeError {
        match self.closed.get() {
            Some(Closure {
                by: ClosedBy::Reader,
                err: Some(e),
            }) => e.clone(),
            _ => PipeError::ClosedPipe,
        }
    }

    fn clear_offer(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        slot.offer = None;
        slot.pos = 0;
    }

    async fn read(&self, buf: &mut [u8]) -> Result<usize, PipeError> {
        if self.done.is_cancelled() {
            return self.read_close_result();
        }
        let _guard = self.read_lock.lock().await;

        loop {
            if self.done.is_cancelled() {
                return self.read_close_result();
            }

            let copied = {
                let mut guard = self.slot.lock().unwrap_or_else(|e| e.into_inner());
                let slot = &mut *guard;
                match slot.offer.as_ref() {
                    Some(offer) => {
                        let n = std::cmp::min(buf.len(), offer.len() - slot.pos);
                        buf[..n].copy_from_slice(&offer[slot.pos..slot.pos + n]);
                        slot.pos += n;
                        let drained = slot.pos == offer.len();
                        if drained {
                            slot.offer = None;
                            slot.pos = 0;
                        }
                        Some((n, drained))
                    }
                    None => None,
                }
            };

            if let Some((n, drained)) = copied {
                if drained {
                    self.consumed.notify_one();
                }
                return Ok(n);
            }

            tokio::select! {
                biased;
                _ = self.done.cancelled() => return self.read_close_result(),
                _ = self.data_ready.notified() => {}
            }
        }
    }

    async fn write(&self, data: &[u8]) -> Result<usize, PipeError> {
        if self.done.is_cancelled() {
            return Err(self.write_close_error());
        }
        let _guard = self.write_lock.lock().await;
        if self.done.is_cancelled() {
            return Err(self.write_close_error());
        }
        if data.is_empty() {
            return Ok(0);
        }

        if let Some(tap) = &self.tap {
            tap(data);
        }

        {
            let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
            slot.offer = Some(data.to_vec());
            slot.pos = 0;
        }
        let offer = OfferGuard { inner: self };
        self.data_ready.notify_one();

        loop {
            if self.offer_consumed() {
                offer.disarm();
                return Ok(data.len());
            }

            tokio::select! {
                biased;
                _ = self.done.cancelled() => {
                    // A reader may have drained the offer right before closing.
                    if self.offer_consumed() {
                        offer.disarm();
                        return Ok(data.len());
                    }
                    return Err(self.write_close_error());
                }
                _ = self.consumed.notified() => {}
            }
        }
    }

    fn offer_consumed(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .offer
            .is_none()
    }
}

/// Withdraws an unconsumed offer when a write is abandoned (close or cancel),
/// so a later reader never sees bytes from a write that already returned.
struct OfferGuard<'a> {
    inner: &'a Inner,
}

impl OfferGuard<'_> {
    fn disarm(self) {
        std::mem::forget(self);
    }
}

impl Drop for OfferGuard<'_> {
    fn drop(&mut self) {
        self.inner.clear_offer();
    }
}

/// The read half of an [`InterceptPipe`].
#[derive(Clone)]
pub struct PipeReader {
    inner: Arc<Inner>,
}

impl PipeReader {
    /// Reads data from the pipe, waiting until a writer arrives or the pipe
    /// is closed. Returns `Ok(0)` once the write half was closed without an
    /// error; if it was closed with one, that error is returned.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, PipeError> {
        self.inner.read(buf).await
    }

    /// Closes the reader; writes then fail with [`PipeError::ClosedPipe`].
    pub fn close(&self) {
        self.close_with_error(None);
    }

    /// Closes the reader; writes then fail with `err` (or
    /// [`PipeError::ClosedPipe`] when `None`).
    pub fn close_with_error(&self, err: Option<PipeError>) {
        self.inner.close(ClosedBy::Reader, err);
    }
}

/// The write half of an [`InterceptPipe`].
#[derive(Clone)]
pub struct PipeWriter {
    inner: Arc<Inner>,
}

impl PipeWriter {
    /// Writes `data`, waiting until readers have consumed all of it or the
    /// pipe is closed. If the read half was closed with an error, that error
    /// is returned; otherwise [`PipeError::ClosedPipe`].
    pub async fn write(&self, data: &[u8]) -> Result<usize, PipeError> {
        self.inner.write(data).await
    }

    /// Closes the writer; reads then return no bytes and end of stream.
    pub fn close(&self) {
        self.close_with_error(None);
    }

    /// Closes the writer; reads then fail with `err`, or report end of
    /// stream when `None`.
    pub fn close_with_error(&self, err: Option<PipeError>) {
        self.inner.close(ClosedBy::Writer, err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio_test::{assert_pending, assert_ready};

    #[tokio::test]
    async fn reads_reconstitute_written_bytes_in_order() {
        let pipe = InterceptPipe::new();
        let (writer, reader) = (pipe.writer(), pipe.reader());

        let chunks: Vec<Vec<u8>> = vec![
            b"first".to_vec(),
            vec![0xff, 0x00, 0x1b, b'['],
            (0..=255u8).cycle().take(5000).collect(),
        ];
        let expected: Vec<u8> = chunks.concat();

        let producer = tokio::spawn(async move {
            let mut total = 0;
            for chunk in chunks {
                total += writer.write(&chunk).await.unwrap();
            }
            writer.close();
            total
        });

        let mut got = Vec::new();
        let mut buf = [0u8; 7];
        loop {
            let n = reader.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            got.extend_from_slice(&buf[..n]);
        }

        let written = producer.await.unwrap();
        assert_eq!(written, expected.len());
        assert_eq!(got.len(), written);
        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn write_blocks_until_consumed() {
        let pipe = InterceptPipe::new();
        let (writer, reader) = (pipe.writer(), pipe.reader());

        let mut write = tokio_test::task::spawn(async move { writer.write(b"abcdef").await });
        assert_pending!(write.poll());

        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_pending!(write.poll());

        assert_eq!(reader.read(&mut buf).await.unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
        assert!(write.is_woken());
        assert_eq!(assert_ready!(write.poll()), Ok(6));
    }

    #[tokio::test]
    async fn drained_write_succeeds_even_if_reader_closes_first() {
        let pipe = InterceptPipe::new();
        let (writer, reader) = (pipe.writer(), pipe.reader());

        let mut write = tokio_test::task::spawn(async move { writer.write(b"abcdef").await });
        assert_pending!(write.poll());

        let mut buf = [0u8; 6];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 6);
        reader.close();

        // Every byte was delivered, so the write reports all of them.
        assert_eq!(assert_ready!(write.poll()), Ok(6));
    }

    #[tokio::test]
    async fn partly_read_write_fails_when_reader_closes() {
        let pipe = InterceptPipe::new();
        let (writer, reader) = (pipe.writer(), pipe.reader());

        let mut write = tokio_test::task::spawn(async move { writer.write(b"abcdef").await });
        assert_pending!(write.poll());

        let mut buf = [0u8; 2];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 2);
        reader.close();

        assert_eq!(assert_ready!(write.poll()), Err(PipeError::ClosedPipe));
    }

    #[tokio::test]
    async fn read_never_spans_two_writes() {
        let pipe = InterceptPipe::new();
        let (writer, reader) = (pipe.writer(), pipe.reader());

        let producer = tokio::spawn(async move {
            writer.write(b"ab").await.unwrap();
            writer.write(b"cd").await.unwrap();
        });

        let mut buf = [0u8; 16];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 2);
        assert_eq!(&buf[..2], b"ab");
        assert_eq!(reader.read(&mut buf).await.unwrap(), 2);
        assert_eq!(&buf[..2], b"cd");
        producer.await.unwrap();
    }

    #[tokio::test]
    async fn tap_sees_exact_slice_before_reader() {
        let seen: Arc<StdMutex<Vec<Vec<u8>>>> = Arc::new(StdMutex::new(Vec::new()));
        let seen_tap = Arc::clone(&seen);
        let pipe = InterceptPipe::with_tap(move |b: &[u8]| {
            seen_tap.lock().unwrap().push(b.to_vec());
        });
        let (writer, reader) = (pipe.writer(), pipe.reader());

        let mut write = tokio_test::task::spawn(async move { writer.write(b"tapped").await });
        assert_pending!(write.poll());
        // Tapped while the write is still waiting for a reader.
        assert_eq!(seen.lock().unwrap().as_slice(), &[b"tapped".to_vec()]);

        let mut buf = [0u8; 3];
        reader.read(&mut buf).await.unwrap();
        reader.read(&mut buf).await.unwrap();
        assert_eq!(assert_ready!(write.poll()), Ok(6));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn write_close_without_error_is_end_of_stream() {
        let pipe = InterceptPipe::new();
        let (writer, reader) = (pipe.writer(), pipe.reader());

        let pending_read = tokio::spawn(async move {
            let mut buf = [0u8; 8];
            reader.read(&mut buf).await
        });
        tokio::task::yield_now().await;

        writer.close();
        let res = tokio::time::timeout(Duration::from_secs(2), pending_read)
            .await
            .expect("read unblocked")
            .unwrap();
        assert_eq!(res, Ok(0));

        assert_eq!(writer.write(b"late").await, Err(PipeError::ClosedPipe));
    }

    #[tokio::test]
    async fn write_close_with_error_reaches_reader() {
        let pipe = InterceptPipe::new();
        let (writer, reader) = (pipe.writer(), pipe.reader());

        writer.close_with_error(Some(PipeError::Closed("client went away".into())));

        let mut buf = [0u8; 8];
        assert_eq!(
            reader.read(&mut buf).await,
            Err(PipeError::Closed("client went away".into()))
        );
        // Deterministic on every later call.
        assert_eq!(
            reader.read(&mut buf).await,
            Err(PipeError::Closed("client went away".into()))
        );
        assert_eq!(writer.write(b"x").await, Err(PipeError::ClosedPipe));
    }

    #[tokio::test]
    async fn read_close_unblocks_pending_writer_with_closer_error() {
        let pipe = InterceptPipe::new();
        let (writer, reader) = (pipe.writer(), pipe.reader());

        let pending_write = tokio::spawn(async move { writer.write(b"never read").await });
        tokio::task::yield_now().await;

        reader.close_with_error(Some(PipeError::Closed("pty gone".into())));
        let res = tokio::time::timeout(Duration::from_secs(2), pending_write)
            .await
            .expect("write unblocked")
            .unwrap();
        assert_eq!(res, Err(PipeError::Closed("pty gone".into())));

        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).await, Err(PipeError::ClosedPipe));
    }

    #[tokio::test]
    async fn only_first_close_is_honored() {
        let pipe = InterceptPipe::new();
        let (writer, reader) = (pipe.writer(), pipe.reader());

        writer.close();
        reader.close_with_error(Some(PipeError::Closed("ignored".into())));
        writer.close_with_error(Some(PipeError::Closed("ignored too".into())));

        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).await, Ok(0));
        assert_eq!(writer.write(b"x").await, Err(PipeError::ClosedPipe));
        assert!(pipe.is_closed());
    }

    #[tokio::test]
    async fn abandoned_write_does_not_leak_into_later_reads() {
        let pipe = InterceptPipe::new();
        let (writer, reader) = (pipe.writer(), pipe.reader());

        let mut stale = tokio_test::task::spawn({
            let writer = writer.clone();
            async move { writer.write(b"stale").await }
        });
        assert_pending!(stale.poll());
        drop(stale);

        let producer = tokio::spawn(async move { writer.write(b"fresh").await });
        let mut buf = [0u8; 16];
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"fresh");
        assert_eq!(producer.await.unwrap(), Ok(5));
    }

    #[tokio::test]
    async fn concurrent_writers_are_not_interleaved() {
        let pipe = InterceptPipe::new();
        let reader = pipe.reader();

        let mut producers = Vec::new();
        for tag in [b'a', b'b', b'c'] {
            let writer = pipe.writer();
            producers.push(tokio::spawn(async move {
                for _ in 0..10 {
                    writer.write(&[tag; 32]).await.unwrap();
                }
            }));
        }

        let closer = {
            let writer = pipe.writer();
            tokio::spawn(async move {
                for p in producers {
                    p.await.unwrap();
                }
                writer.close();
            })
        };

        let mut buf = [0u8; 64];
        let mut reads = 0;
        loop {
            let n = reader.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            assert_eq!(n, 32);
            assert!(buf[..n].iter().all(|b| *b == buf[0]));
            reads += 1;
        }
        closer.await.unwrap();
        assert_eq!(reads, 30);
    }
}
