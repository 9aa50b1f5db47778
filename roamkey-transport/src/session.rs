//! USB Accessory Session
//!
//! Owns the accessory I/O objects for the duration of one transaction:
//!
//! - opens the accessory through an [`AccessoryProvider`]
//! - runs the read loop on a dedicated worker thread
//! - frames outgoing messages and queues them for a writer thread
//! - stops from any thread, without waiting on the link
//!
//! Decoded messages are handed to a [`MessageSink`], normally the sending
//! half of a channel drained by the control thread. The sink sees
//! `Some(message)` for each message in stream order and exactly one final
//! `None` when the session ends for any reason, including a failure to
//! open the accessory.
//!
//! # Example
//!
//! ```no_run
//! use roamkey_transport::{AccessoryPath, ReaderConfig, UsbSession};
//! use std::sync::mpsc;
//!
//! let (tx, rx) = mpsc::channel::<Option<Vec<u8>>>();
//! let mut session = UsbSession::new(
//!     Box::new(AccessoryPath::new("/dev/usb_accessory")),
//!     ReaderConfig::default(),
//! );
//! session.start(tx)?;
//!
//! while let Ok(Some(message)) = rx.recv() {
//!     session.write(&message)?; // echo
//! }
//! session.stop();
//! # Ok::<(), roamkey_transport::Error>(())
//! ```

use crate::accessory::{AccessoryIo, AccessoryProvider};
use crate::codec::{FrameOutput, FramingCodec};
use crate::config::ReaderConfig;
use crate::error::{Error, Result};
use crate::framing;
use crate::reader::{CancellableReader, StopHandle};

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Default name of the reader thread
pub const DEFAULT_WORKER_NAME: &str = "accessory-reader";

/// Receiver of decoded messages
///
/// Called on the worker thread. Implementations must only hand the message
/// off, never process it in place.
pub trait MessageSink: Send + 'static {
    fn deliver(&self, message: Option<Vec<u8>>);
}

impl<T> MessageSink for Sender<T>
where
    T: From<Option<Vec<u8>>> + Send + 'static,
{
    fn deliver(&self, message: Option<Vec<u8>>) {
        // The receiver is gone once the transaction is torn down
        let _ = self.send(T::from(message));
    }
}

/// Outgoing frame queue shared by the reader (Sync echoes) and the session
/// (messages)
///
/// Frames are written whole, in queue order, by the writer thread. The lock
/// only guards the sending half, so no caller ever waits on the link.
#[derive(Default)]
struct FrameQueue {
    frames: Mutex<Option<Sender<Vec<u8>>>>,
}

impl FrameQueue {
    fn attach(&self, frames: Sender<Vec<u8>>) -> Result<()> {
        let mut slot = self
            .frames
            .lock()
            .map_err(|_| Error::IoError("writer lock poisoned".to_string()))?;
        *slot = Some(frames);
        Ok(())
    }

    /// Drop the sending half; the writer exits once the queue is drained
    fn detach(&self) {
        match self.frames.lock() {
            Ok(mut slot) => *slot = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }

    fn push(&self, frame: Vec<u8>) -> Result<()> {
        let slot = self
            .frames
            .lock()
            .map_err(|_| Error::IoError("writer lock poisoned".to_string()))?;
        let frames = slot.as_ref().ok_or(Error::Stopped)?;
        frames.send(frame).map_err(|_| Error::Closed)
    }
}

impl FrameOutput for Arc<FrameQueue> {
    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.push(frame.to_vec())
    }
}

/// Stops a session from any thread
#[derive(Clone)]
pub struct SessionCloser {
    stop: StopHandle,
    queue: Arc<FrameQueue>,
}

impl SessionCloser {
    /// Set the cancellation flag and release the write half
    ///
    /// Never waits on the link. The reader observes the flag within one
    /// poll timeout and the writer exits after its queue drains; the
    /// descriptor closes when both have dropped their reference.
    /// Idempotent.
    pub fn close(&self) {
        if !self.stop.is_stopped() {
            tracing::info!("stopping accessory session");
        }
        self.stop.stop();
        self.queue.detach();
    }

    pub fn is_closed(&self) -> bool {
        self.stop.is_stopped()
    }
}

/// Delivers the terminal `None` exactly once, when dropped
///
/// Owned by the reader closure, so a thread that never starts or a read
/// loop that panics still ends the session for the sink.
struct SessionEnd<S: MessageSink> {
    sink: S,
}

impl<S: MessageSink> SessionEnd<S> {
    fn deliver(&self, message: Vec<u8>) {
        self.sink.deliver(Some(message));
    }
}

impl<S: MessageSink> Drop for SessionEnd<S> {
    fn drop(&mut self) {
        self.sink.deliver(None);
    }
}

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Idle,
    Running,
}

/// One transaction's accessory link
pub struct UsbSession {
    provider: Box<dyn AccessoryProvider>,
    config: ReaderConfig,
    worker_name: String,
    state: SessionState,
    closer: SessionCloser,
    workers: Vec<JoinHandle<()>>,
}

impl UsbSession {
    /// Create an idle session
    pub fn new(provider: Box<dyn AccessoryProvider>, config: ReaderConfig) -> Self {
        Self {
            provider,
            config,
            worker_name: DEFAULT_WORKER_NAME.to_string(),
            state: SessionState::Idle,
            closer: SessionCloser {
                stop: StopHandle::new(),
                queue: Arc::new(FrameQueue::default()),
            },
            workers: Vec::new(),
        }
    }

    /// Name the reader thread. The writer thread gets a `-writer` suffix.
    pub fn with_worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = name.into();
        self
    }

    /// Open the accessory and start the reader and writer threads
    ///
    /// If the accessory cannot be opened, or a thread cannot be spawned,
    /// `None` is delivered to `sink` and the error is returned. Nothing is
    /// retried.
    pub fn start<S: MessageSink>(&mut self, sink: S) -> Result<()> {
        if self.state != SessionState::Idle || self.closer.is_closed() {
            return Err(Error::AlreadyStarted);
        }
        self.state = SessionState::Running;
        let end = SessionEnd { sink };

        let io = match self.provider.open() {
            Ok(io) => io,
            Err(e) => {
                tracing::warn!(error = %e, "accessory unavailable at session start");
                self.closer.close();
                return Err(e);
            }
        };

        let (frames_tx, frames_rx) = mpsc::channel();
        let writer_io = io.clone();
        let writer_closer = self.closer.clone();
        let writer = std::thread::Builder::new()
            .name(format!("{}-writer", self.worker_name))
            .spawn(move || run_writer(writer_io, frames_rx, writer_closer))
            .map_err(|e| {
                self.closer.close();
                Error::IoError(format!("Failed to spawn writer thread: {}", e))
            })?;
        self.workers.push(writer);
        self.closer.queue.attach(frames_tx)?;

        let reader = CancellableReader::new(io, self.closer.stop.clone(), self.config.poll_timeout());
        let codec = FramingCodec::new(reader, self.closer.queue.clone())
            .with_max_message_len(self.config.max_message_len());
        let closer = self.closer.clone();

        // A failed spawn drops the closure, and with it `end`
        let worker = std::thread::Builder::new()
            .name(self.worker_name.clone())
            .spawn(move || run_reader(codec, closer, end))
            .map_err(|e| {
                self.closer.close();
                Error::IoError(format!("Failed to spawn reader thread: {}", e))
            })?;

        tracing::info!(worker = %self.worker_name, "accessory session started");
        self.workers.push(worker);
        Ok(())
    }

    /// Frame and queue one message for the writer thread
    ///
    /// Returns as soon as the frame is queued. A write that later fails on
    /// the link closes the session.
    pub fn write(&self, payload: &[u8]) -> Result<()> {
        if self.state == SessionState::Idle {
            return Err(Error::NotStarted);
        }
        if self.closer.is_closed() {
            return Err(Error::Stopped);
        }
        let frame = framing::encode_message(payload)?;
        self.closer.queue.push(frame)
    }

    /// Stop the session. Safe to call repeatedly and before `start`.
    pub fn stop(&self) {
        self.closer.close();
    }

    /// Handle for stopping the session from another thread
    pub fn closer(&self) -> SessionCloser {
        self.closer.clone()
    }

    /// Whether `start` has been called and `stop` has not
    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running && !self.closer.is_closed()
    }

    /// Wait for the reader and writer threads to exit
    ///
    /// Returns immediately if nothing was started. Call after `stop`, or
    /// after the sink saw `None`, to avoid waiting on a live link. The
    /// writer finishes queued frames first.
    pub fn join(&mut self) -> Result<()> {
        let mut result = Ok(());
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                result = Err(Error::IoError("session thread panicked".to_string()));
            }
        }
        result
    }
}

impl Drop for UsbSession {
    fn drop(&mut self) {
        self.closer.close();
    }
}

/// Reader thread body
fn run_reader<S: MessageSink>(
    mut codec: FramingCodec<CancellableReader, Arc<FrameQueue>>,
    closer: SessionCloser,
    end: SessionEnd<S>,
) {
    loop {
        match codec.next_message() {
            Ok(message) => end.deliver(message),
            Err(Error::Stopped) => {
                tracing::debug!("accessory reader stopped");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "accessory session failed");
                break;
            }
        }
    }

    closer.close();
    drop(codec);
    drop(end);
}

/// Writer thread body
///
/// Writes each queued frame with one `write_all`. Exits when the queue is
/// detached and drained, or on the first failed write, which also closes
/// the session.
fn run_writer(io: Arc<dyn AccessoryIo>, frames: Receiver<Vec<u8>>, closer: SessionCloser) {
    for frame in frames.iter() {
        if let Err(e) = io.write_all(&frame) {
            tracing::warn!(error = %e, len = frame.len(), "accessory write failed");
            closer.close();
            break;
        }
    }
    tracing::debug!("accessory writer stopped");
}
