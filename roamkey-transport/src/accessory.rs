//! USB Accessory Descriptor
//!
//! The phone side of the accessory cable is a single file descriptor handed
//! over by the platform once the host switches the device into accessory
//! mode. It is a plain byte stream with two limitations that shape the rest
//! of this crate:
//!
//! - it has no framing (see [`crate::framing`])
//! - closing it does not reliably wake a thread blocked in `read(2)`
//!   (see [`crate::reader`])
//!
//! # Example
//!
//! ```no_run
//! use roamkey_transport::accessory::{AccessoryIo, AccessoryPath, AccessoryProvider};
//! use std::time::Duration;
//!
//! let provider = AccessoryPath::new("/dev/usb_accessory");
//! let io = provider.open()?;
//!
//! if io.poll_readable(Duration::from_millis(200))? {
//!     let mut buffer = [0u8; 64];
//!     let len = io.read(&mut buffer)?;
//!     println!("Received {} bytes", len);
//! }
//! # Ok::<(), roamkey_transport::Error>(())
//! ```

use crate::{Error, Result};

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use nix::poll::{PollFd, PollFlags, PollTimeout};

/// Byte-level access to an accessory link
///
/// Shared between the reader worker and the writer, so every method takes
/// `&self`.
pub trait AccessoryIo: Send + Sync {
    /// Wait up to `timeout` for the link to become readable
    ///
    /// Returns `Ok(false)` on timeout.
    fn poll_readable(&self, timeout: Duration) -> std::io::Result<bool>;

    /// One OS-level read. `Ok(0)` means end of stream.
    fn read(&self, buf: &mut [u8]) -> std::io::Result<usize>;

    /// Write the whole buffer
    fn write_all(&self, data: &[u8]) -> std::io::Result<()>;
}

/// Source of accessory handles
///
/// Opening can fail if the cable was unplugged, or the accessory was
/// revoked, between validation and session start.
pub trait AccessoryProvider: Send {
    fn open(&self) -> Result<Arc<dyn AccessoryIo>>;
}

/// Accessory link over a file descriptor
pub struct FdAccessory {
    file: File,
}

impl FdAccessory {
    /// Wrap an already opened descriptor
    pub fn from_file(file: File) -> Self {
        Self { file }
    }

    /// Get the raw file descriptor
    pub fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl From<OwnedFd> for FdAccessory {
    fn from(fd: OwnedFd) -> Self {
        Self::from_file(File::from(fd))
    }
}

impl AccessoryIo for FdAccessory {
    fn poll_readable(&self, timeout: Duration) -> std::io::Result<bool> {
        let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
        let mut fds = [PollFd::new(self.file.as_fd(), PollFlags::POLLIN)];

        let ready = nix::poll::poll(&mut fds, PollTimeout::from(millis))?;
        if ready == 0 {
            return Ok(false);
        }

        // POLLHUP and POLLERR also count as readable: the following read
        // reports end of stream or the error itself.
        Ok(fds[0].revents().is_some_and(|r| !r.is_empty()))
    }

    fn read(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut file_ref = &self.file;
        file_ref.read(buf)
    }

    fn write_all(&self, data: &[u8]) -> std::io::Result<()> {
        let mut file_ref = &self.file;
        file_ref.write_all(data)?;
        file_ref.flush()
    }
}

/// Provider that opens an accessory device node by path
#[derive(Debug, Clone)]
pub struct AccessoryPath {
    path: PathBuf,
}

impl AccessoryPath {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AccessoryProvider for AccessoryPath {
    fn open(&self) -> Result<Arc<dyn AccessoryIo>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| {
                Error::Unavailable(format!("Failed to open {}: {}", self.path.display(), e))
            })?;

        tracing::debug!(path = %self.path.display(), "opened accessory");
        Ok(Arc::new(FdAccessory::from_file(file)))
    }
}
