//! Accessory Link Wire Format
//!
//! The accessory link is a raw byte stream. Two frame kinds are carried on it:
//!
//! - Sync frame: TAG(1) = 0x77 + NONCE(16), 17 bytes total
//! - Message frame: TAG(1) = 0x21 + LEN(4, little-endian) + DATA(LEN)
//!
//! The top bit of the last length byte is ignored on decode. Payloads are
//! opaque to this crate.

use crate::error::{Error, Result};

use rand::RngCore;

/// Sync frame tag
pub const SYNC_TAG: u8 = 0x77;

/// Message frame tag
pub const MESSAGE_TAG: u8 = 0x21;

/// Total length of a Sync frame, tag included
pub const SYNC_FRAME_LEN: usize = 17;

/// Length of a Message frame header
pub const HEADER_LEN: usize = 5;

/// Length of the Sync nonce
pub const NONCE_LEN: usize = SYNC_FRAME_LEN - 1;

/// Largest payload accepted from the wire (1 MiB)
///
/// A sanity bound against a corrupt stream rather than a protocol limit.
pub const MAX_MESSAGE_LEN: usize = 1 << 20;

/// A 17-byte Sync frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncFrame {
    data: [u8; SYNC_FRAME_LEN],
}

impl SyncFrame {
    /// Create a Sync frame carrying `nonce`
    pub fn new(nonce: [u8; NONCE_LEN]) -> Self {
        let mut data = [0u8; SYNC_FRAME_LEN];
        data[0] = SYNC_TAG;
        data[1..].copy_from_slice(&nonce);
        Self { data }
    }

    /// Create a Sync frame with a fresh random nonce
    ///
    /// Used by the initiating side at the start of every logical session.
    pub fn random() -> Self {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        Self::new(nonce)
    }

    /// Reinterpret 17 raw bytes as a Sync frame
    ///
    /// The first byte is kept as received. A mid-stream resync echoes the
    /// exact bytes it read, whatever their tag.
    pub fn from_bytes(data: [u8; SYNC_FRAME_LEN]) -> Self {
        Self { data }
    }

    /// Raw frame bytes
    pub fn as_bytes(&self) -> &[u8; SYNC_FRAME_LEN] {
        &self.data
    }

    /// Nonce carried by the frame
    pub fn nonce(&self) -> &[u8] {
        &self.data[1..]
    }
}

/// A decoded 5-byte header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Header {
    /// Message frame announcing `len` payload bytes
    Message { len: usize },

    /// Not a Message tag. The bytes are the first five of a Sync frame.
    SyncPrefix([u8; HEADER_LEN]),
}

impl Header {
    /// Classify a header
    ///
    /// Length limits are not checked here, see [`check_len`].
    pub fn parse(bytes: [u8; HEADER_LEN]) -> Self {
        if bytes[0] != MESSAGE_TAG {
            return Header::SyncPrefix(bytes);
        }
        let len = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4] & 0x7F]);
        Header::Message { len: len as usize }
    }
}

/// Reject lengths above `max`
pub fn check_len(len: usize, max: usize) -> Result<()> {
    if len > max {
        return Err(Error::MessageTooLarge { len, max });
    }
    Ok(())
}

/// Encode a Message header for `len` payload bytes
pub fn encode_header(len: usize) -> Result<[u8; HEADER_LEN]> {
    check_len(len, MAX_MESSAGE_LEN)?;
    let mut header = [0u8; HEADER_LEN];
    header[0] = MESSAGE_TAG;
    header[1..].copy_from_slice(&(len as u32).to_le_bytes());
    Ok(header)
}

/// Encode a complete Message frame
pub fn encode_message(payload: &[u8]) -> Result<Vec<u8>> {
    let header = encode_header(payload.len())?;
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&header);
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Decode exactly one Message frame
///
/// The input must hold one whole frame and nothing else.
pub fn decode_message(frame: &[u8]) -> Result<Vec<u8>> {
    if frame.len() < HEADER_LEN {
        return Err(Error::Closed);
    }
    let mut header = [0u8; HEADER_LEN];
    header.copy_from_slice(&frame[..HEADER_LEN]);

    match Header::parse(header) {
        Header::Message { len } => {
            check_len(len, MAX_MESSAGE_LEN)?;
            let body = &frame[HEADER_LEN..];
            if body.len() < len {
                return Err(Error::Closed);
            }
            if body.len() > len {
                return Err(Error::InvalidFrame("trailing bytes after message"));
            }
            Ok(body.to_vec())
        }
        Header::SyncPrefix(_) => Err(Error::InvalidFrame("not a message frame")),
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn message_round_trip(payload in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let frame = encode_message(&payload).unwrap();
            prop_assert_eq!(decode_message(&frame).unwrap(), payload);
        }

        #[test]
        fn length_field_round_trip(len in 0usize..=MAX_MESSAGE_LEN) {
            let header = encode_header(len).unwrap();
            prop_assert_eq!(Header::parse(header), Header::Message { len });
        }
    }
}
