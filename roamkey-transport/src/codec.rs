//! Accessory Framing Codec
//!
//! Turns the raw accessory byte stream into discrete messages and echoes
//! Sync frames back to the initiator.
//!
//! A transaction cancelled on the host may leave a reply in flight. Without
//! resynchronization that stale reply would be taken for the first reply of
//! the next transaction. So every logical session opens with a Sync frame
//! carrying a fresh nonce, and the codec:
//!
//! 1. discards input until a byte equal to the Sync tag
//! 2. reads the rest of the 17-byte Sync frame and echoes it verbatim
//! 3. reads 5-byte headers: a Message tag is followed by its payload, any
//!    other tag starts a new Sync frame which is completed, echoed, and the
//!    loop continues
//!
//! Errors are never retried here.

use crate::error::{Error, Result};
use crate::framing::{
    self, HEADER_LEN, Header, MAX_MESSAGE_LEN, SYNC_FRAME_LEN, SYNC_TAG, SyncFrame,
};

/// Blocking source of bytes
pub trait ByteSource {
    /// Fill `out` completely or fail
    fn read_exact(&mut self, out: &mut [u8]) -> Result<()>;
}

impl ByteSource for &[u8] {
    fn read_exact(&mut self, out: &mut [u8]) -> Result<()> {
        if self.len() < out.len() {
            *self = &self[self.len()..];
            return Err(Error::Closed);
        }
        let (head, tail) = self.split_at(out.len());
        out.copy_from_slice(head);
        *self = tail;
        Ok(())
    }
}

/// Sink for whole frames
///
/// Each call carries one complete frame and must be written as a unit.
pub trait FrameOutput {
    fn write_frame(&mut self, frame: &[u8]) -> Result<()>;
}

impl FrameOutput for Vec<u8> {
    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.extend_from_slice(frame);
        Ok(())
    }
}

/// Codec state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncState {
    /// No Sync frame seen yet; input is discarded
    Unsynchronized,

    /// Message frames are accepted
    Synchronized,
}

/// Read side of the accessory protocol
pub struct FramingCodec<R: ByteSource, W: FrameOutput> {
    source: R,
    output: W,
    state: SyncState,
    max_message_len: usize,
}

impl<R: ByteSource, W: FrameOutput> FramingCodec<R, W> {
    /// Create a codec. Sync echoes are written to `output`.
    pub fn new(source: R, output: W) -> Self {
        Self {
            source,
            output,
            state: SyncState::Unsynchronized,
            max_message_len: MAX_MESSAGE_LEN,
        }
    }

    /// Lower the accepted message size
    pub fn with_max_message_len(mut self, len: usize) -> Self {
        self.max_message_len = len.min(MAX_MESSAGE_LEN);
        self
    }

    /// Whether the initial Sync frame has been seen
    pub fn is_synchronized(&self) -> bool {
        self.state == SyncState::Synchronized
    }

    /// Read the next message payload
    ///
    /// Blocks until a whole message arrives. Sync frames encountered on the
    /// way are echoed and consumed.
    pub fn next_message(&mut self) -> Result<Vec<u8>> {
        if self.state == SyncState::Unsynchronized {
            self.synchronize()?;
        }

        loop {
            let mut header = [0u8; HEADER_LEN];
            self.source.read_exact(&mut header)?;

            match Header::parse(header) {
                Header::Message { len } => {
                    framing::check_len(len, self.max_message_len)?;
                    let mut payload = vec![0u8; len];
                    self.source.read_exact(&mut payload)?;
                    tracing::trace!(len, "decoded accessory message");
                    return Ok(payload);
                }
                Header::SyncPrefix(prefix) => {
                    let mut frame = [0u8; SYNC_FRAME_LEN];
                    frame[..HEADER_LEN].copy_from_slice(&prefix);
                    self.source.read_exact(&mut frame[HEADER_LEN..])?;
                    tracing::debug!(tag = prefix[0], "accessory resync");
                    self.echo(SyncFrame::from_bytes(frame))?;
                }
            }
        }
    }

    /// Discard input up to the first Sync tag and echo that Sync frame
    fn synchronize(&mut self) -> Result<()> {
        let mut byte = [0u8; 1];
        let mut discarded = 0usize;
        loop {
            self.source.read_exact(&mut byte)?;
            if byte[0] == SYNC_TAG {
                break;
            }
            discarded += 1;
        }

        let mut frame = [0u8; SYNC_FRAME_LEN];
        frame[0] = SYNC_TAG;
        self.source.read_exact(&mut frame[1..])?;

        tracing::debug!(discarded, "accessory synchronized");
        self.echo(SyncFrame::from_bytes(frame))?;
        self.state = SyncState::Synchronized;
        Ok(())
    }

    fn echo(&mut self, frame: SyncFrame) -> Result<()> {
        self.output.write_frame(frame.as_bytes())
    }

    /// Get a reference to the echo output
    pub fn output(&self) -> &W {
        &self.output
    }

    /// Consume the codec and return the source and output
    pub fn into_parts(self) -> (R, W) {
        (self.source, self.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::{MESSAGE_TAG, NONCE_LEN, encode_message};

    fn sync(n: u8) -> SyncFrame {
        SyncFrame::new([n; NONCE_LEN])
    }

    fn stream(parts: &[&[u8]]) -> Vec<u8> {
        parts.concat()
    }

    #[test]
    fn test_sync_then_message() {
        let s = sync(0x11);
        let msg = encode_message(b"ping").unwrap();
        let input = stream(&[s.as_bytes(), &msg]);

        let mut codec = FramingCodec::new(input.as_slice(), Vec::new());
        assert_eq!(codec.next_message().unwrap(), b"ping");
        assert!(codec.is_synchronized());
        assert_eq!(codec.output().as_slice(), s.as_bytes());
    }

    #[test]
    fn test_desync_recovery() {
        // A stale reply left over from a cancelled transaction
        let stale = encode_message(&[0x01, 0x02, 0x03, 0x04]).unwrap();
        let s = sync(0x42);
        let msg = encode_message(b"fresh").unwrap();
        let input = stream(&[&stale, s.as_bytes(), &msg]);

        let mut codec = FramingCodec::new(input.as_slice(), Vec::new());
        assert_eq!(codec.next_message().unwrap(), b"fresh");
        assert_eq!(codec.output().as_slice(), s.as_bytes());
    }

    #[test]
    fn test_mid_stream_resync() {
        let first = sync(0x01);
        let second = sync(0x02);
        let a = encode_message(b"a").unwrap();
        let b = encode_message(b"b").unwrap();
        let input = stream(&[first.as_bytes(), &a, second.as_bytes(), &b]);

        let mut codec = FramingCodec::new(input.as_slice(), Vec::new());
        assert_eq!(codec.next_message().unwrap(), b"a");
        assert_eq!(codec.next_message().unwrap(), b"b");

        let (_, echoed) = codec.into_parts();
        assert_eq!(echoed, stream(&[first.as_bytes(), second.as_bytes()]));
    }

    #[test]
    fn test_resync_echoes_exact_bytes() {
        // After synchronization any non-message tag starts a Sync frame and
        // the 17 bytes go back untouched.
        let first = sync(0x01);
        let mut foreign = [0x55u8; SYNC_FRAME_LEN];
        foreign[0] = 0x00;
        let msg = encode_message(b"x").unwrap();
        let input = stream(&[first.as_bytes(), &foreign, &msg]);

        let mut codec = FramingCodec::new(input.as_slice(), Vec::new());
        assert_eq!(codec.next_message().unwrap(), b"x");
        assert_eq!(&codec.output()[SYNC_FRAME_LEN..], &foreign);
    }

    #[test]
    fn test_message_before_sync_is_discarded() {
        let input = encode_message(b"stale").unwrap();
        let mut codec = FramingCodec::new(input.as_slice(), Vec::new());
        assert_eq!(codec.next_message(), Err(Error::Closed));
        assert!(codec.output().is_empty());
    }

    #[test]
    fn test_oversize_rejected_without_reading_payload() {
        let s = sync(0x07);
        let len = (MAX_MESSAGE_LEN as u32 + 1).to_le_bytes();
        let header = [MESSAGE_TAG, len[0], len[1], len[2], len[3]];
        let input = stream(&[s.as_bytes(), &header]);

        let mut codec = FramingCodec::new(input.as_slice(), Vec::new());
        assert_eq!(
            codec.next_message(),
            Err(Error::MessageTooLarge {
                len: MAX_MESSAGE_LEN + 1,
                max: MAX_MESSAGE_LEN
            })
        );
    }

    #[test]
    fn test_configured_limit() {
        let s = sync(0x07);
        let msg = encode_message(&[0u8; 32]).unwrap();
        let input = stream(&[s.as_bytes(), &msg]);

        let mut codec = FramingCodec::new(input.as_slice(), Vec::new()).with_max_message_len(16);
        assert!(matches!(
            codec.next_message(),
            Err(Error::MessageTooLarge { len: 32, max: 16 })
        ));
    }

    #[test]
    fn test_short_read_fails() {
        let s = sync(0x09);
        let msg = encode_message(b"truncated").unwrap();
        let input = stream(&[s.as_bytes(), &msg[..msg.len() - 2]]);

        let mut codec = FramingCodec::new(input.as_slice(), Vec::new());
        assert_eq!(codec.next_message(), Err(Error::Closed));
    }

    #[test]
    fn test_truncated_sync_fails() {
        let s = sync(0x0A);
        let input = &s.as_bytes()[..10];
        let mut codec = FramingCodec::new(input, Vec::new());
        assert_eq!(codec.next_message(), Err(Error::Closed));
        assert!(!codec.is_synchronized());
    }
}
