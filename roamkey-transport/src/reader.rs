//! Cancellable Accessory Reader
//!
//! Closing the accessory descriptor does not unblock a thread that is
//! already inside `read(2)`, so a plain blocking read could hang a session
//! forever after the user cancels. This reader never blocks in `read`:
//!
//! 1. wait for readability with a bounded poll (200ms by default)
//! 2. on timeout, re-check the `stopped` flag and fail if it is set
//! 3. on readiness, perform exactly one OS read into a 16 KiB buffer
//!
//! This is polling-based cooperative cancellation, not an interrupt. The
//! poll timeout bounds how long [`StopHandle::stop`] takes to be observed.

use crate::accessory::AccessoryIo;
use crate::codec::ByteSource;
use crate::error::{Error, Result};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Capacity of the reader's internal buffer
pub const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Shared cancellation flag
///
/// Cloning yields another handle to the same flag. `stop` is idempotent and
/// callable from any thread.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the reader to stop
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Bytes pulled from the OS but not yet consumed
///
/// Invariant: `offset <= used <= data.len()`. Refilled only once
/// `offset == used`.
struct ReaderBuffer {
    data: Box<[u8]>,
    used: usize,
    offset: usize,
}

impl ReaderBuffer {
    fn new() -> Self {
        Self {
            data: vec![0u8; READ_BUFFER_SIZE].into_boxed_slice(),
            used: 0,
            offset: 0,
        }
    }

    fn is_drained(&self) -> bool {
        self.offset == self.used
    }

    /// Copy buffered bytes into `out`, returning how many were copied
    fn take(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.used - self.offset);
        out[..n].copy_from_slice(&self.data[self.offset..self.offset + n]);
        self.offset += n;
        n
    }
}

/// Blocking reader that can be stopped while a read is in progress
pub struct CancellableReader {
    io: Arc<dyn AccessoryIo>,
    buffer: ReaderBuffer,
    stop: StopHandle,
    poll_timeout: Duration,
}

impl CancellableReader {
    /// Create a reader over `io`
    ///
    /// `stop` is usually a clone of a handle the session keeps for itself.
    pub fn new(io: Arc<dyn AccessoryIo>, stop: StopHandle, poll_timeout: Duration) -> Self {
        Self {
            io,
            buffer: ReaderBuffer::new(),
            stop,
            poll_timeout: poll_timeout.max(Duration::from_millis(1)),
        }
    }

    /// Handle that stops this reader
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Stop the reader. Any read in progress fails within one poll timeout.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Fill `out` completely
    ///
    /// Fails with [`Error::Stopped`] once stopped and with [`Error::Closed`]
    /// if the stream ends first.
    pub fn read(&mut self, out: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < out.len() {
            if self.buffer.is_drained() {
                self.refill()?;
            }
            filled += self.buffer.take(&mut out[filled..]);
        }
        Ok(())
    }

    /// Wait for data and pull one OS read into the drained buffer
    fn refill(&mut self) -> Result<()> {
        debug_assert!(self.buffer.is_drained());

        loop {
            if self.stop.is_stopped() {
                return Err(Error::Stopped);
            }

            match self.io.poll_readable(self.poll_timeout) {
                Ok(true) => break,
                Ok(false) => continue,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        let n = loop {
            match self.io.read(&mut self.buffer.data) {
                Ok(n) => break n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        };

        if n == 0 {
            return Err(Error::Closed);
        }

        tracing::trace!(len = n, "accessory read");
        self.buffer.used = n;
        self.buffer.offset = 0;
        Ok(())
    }
}

impl ByteSource for CancellableReader {
    fn read_exact(&mut self, out: &mut [u8]) -> Result<()> {
        self.read(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Descriptor driven by a script of poll results and read chunks.
    /// Each poll advances a virtual clock by the requested timeout.
    struct ScriptedIo {
        chunks: Mutex<VecDeque<Vec<u8>>>,
        polls: Mutex<u32>,
        elapsed: Mutex<Duration>,
        stop_on_poll: Option<(u32, StopHandle)>,
    }

    impl ScriptedIo {
        fn new(chunks: Vec<Vec<u8>>) -> Self {
            Self {
                chunks: Mutex::new(chunks.into()),
                polls: Mutex::new(0),
                elapsed: Mutex::new(Duration::ZERO),
                stop_on_poll: None,
            }
        }

        fn polls(&self) -> u32 {
            *self.polls.lock().unwrap()
        }
    }

    impl AccessoryIo for ScriptedIo {
        fn poll_readable(&self, timeout: Duration) -> std::io::Result<bool> {
            let mut polls = self.polls.lock().unwrap();
            *polls += 1;
            if let Some((n, handle)) = &self.stop_on_poll {
                if *polls == *n {
                    handle.stop();
                }
            }
            let ready = !self.chunks.lock().unwrap().is_empty();
            if !ready {
                *self.elapsed.lock().unwrap() += timeout;
            }
            Ok(ready)
        }

        fn read(&self, buf: &mut [u8]) -> std::io::Result<usize> {
            let Some(chunk) = self.chunks.lock().unwrap().pop_front() else {
                return Ok(0);
            };
            assert!(chunk.len() <= buf.len());
            buf[..chunk.len()].copy_from_slice(&chunk);
            Ok(chunk.len())
        }

        fn write_all(&self, _data: &[u8]) -> std::io::Result<()> {
            Ok(())
        }
    }

    const POLL: Duration = Duration::from_millis(200);

    #[test]
    fn test_reads_across_chunks() {
        let io = Arc::new(ScriptedIo::new(vec![vec![1, 2, 3], vec![4, 5], vec![6]]));
        let mut reader = CancellableReader::new(io, StopHandle::new(), POLL);

        let mut out = [0u8; 4];
        reader.read(&mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);

        let mut out = [0u8; 2];
        reader.read(&mut out).unwrap();
        assert_eq!(out, [5, 6]);
    }

    #[test]
    fn test_refills_only_when_drained() {
        let io = Arc::new(ScriptedIo::new(vec![vec![1, 2, 3, 4], vec![5]]));
        let mut reader = CancellableReader::new(io.clone(), StopHandle::new(), POLL);

        let mut out = [0u8; 1];
        reader.read(&mut out).unwrap();
        reader.read(&mut out).unwrap();
        reader.read(&mut out).unwrap();
        // Three reads served from one OS read
        assert_eq!(io.polls(), 1);

        let mut out = [0u8; 2];
        reader.read(&mut out).unwrap();
        assert_eq!(out, [4, 5]);
        assert_eq!(io.polls(), 2);
    }

    /// Always readable, always at end of stream
    struct Eof;

    impl AccessoryIo for Eof {
        fn poll_readable(&self, _: Duration) -> std::io::Result<bool> {
            Ok(true)
        }

        fn read(&self, _: &mut [u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn write_all(&self, _: &[u8]) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_end_of_stream_is_closed() {
        let mut reader = CancellableReader::new(Arc::new(Eof), StopHandle::new(), POLL);
        let mut out = [0u8; 2];
        assert_eq!(reader.read(&mut out), Err(Error::Closed));
    }

    #[test]
    fn test_stop_before_read() {
        let io = Arc::new(ScriptedIo::new(vec![vec![1, 2]]));
        let mut reader = CancellableReader::new(io.clone(), StopHandle::new(), POLL);
        reader.stop();
        reader.stop();

        let mut out = [0u8; 1];
        assert_eq!(reader.read(&mut out), Err(Error::Stopped));
        assert_eq!(io.polls(), 0);
    }

    #[test]
    fn test_stop_while_blocked_is_observed_within_one_poll() {
        let stop = StopHandle::new();
        let mut io = ScriptedIo::new(vec![]);
        // The stop request lands while the fifth poll is waiting
        io.stop_on_poll = Some((5, stop.clone()));
        let io = Arc::new(io);

        let mut reader = CancellableReader::new(io.clone(), stop, POLL);
        let mut out = [0u8; 5];
        assert_eq!(reader.read(&mut out), Err(Error::Stopped));

        // No poll after the one during which stop arrived
        assert_eq!(io.polls(), 5);
        let waited_after_stop = *io.elapsed.lock().unwrap() - POLL * 4;
        assert!(waited_after_stop <= POLL * 2);
    }

    #[test]
    fn test_stop_handle_is_shared() {
        let handle = StopHandle::new();
        let clone = handle.clone();
        assert!(!handle.is_stopped());
        clone.stop();
        assert!(handle.is_stopped());
    }
}
