//! Accessory Link Transport
//!
//! This crate carries opaque CTAP2 payloads over a USB accessory cable, a
//! byte stream with no framing of its own:
//! - Wire format (Sync frames and length-prefixed Message frames)
//! - Framing codec with resynchronization after stale data
//! - Cancellable reader (bounded poll + stop flag over a descriptor that
//!   cannot be interrupted)
//! - Session owning one transaction's accessory I/O and reader thread
//!
//! The cryptographic handshake and CTAP2 semantics live elsewhere; nothing
//! here looks inside a payload.

pub mod accessory;
pub mod codec;
pub mod config;
pub mod error;
pub mod framing;
pub mod reader;
pub mod session;

// Re-export commonly used types
pub use accessory::{AccessoryIo, AccessoryPath, AccessoryProvider, FdAccessory};
pub use codec::{ByteSource, FrameOutput, FramingCodec};
pub use config::{ReaderConfig, ReaderConfigBuilder};
pub use error::{Error, Result};
pub use framing::{MAX_MESSAGE_LEN, SyncFrame, decode_message, encode_message};
pub use reader::{CancellableReader, StopHandle};
pub use session::{MessageSink, SessionCloser, UsbSession};
