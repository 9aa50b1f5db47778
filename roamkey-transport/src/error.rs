//! Transport layer error types

use thiserror::Error;

/// Transport layer result type
pub type Result<T> = std::result::Result<T, Error>;

/// Transport layer errors
///
/// Every variant is terminal for the session that produced it. Nothing in
/// this crate retries; the caller decides what a failure means.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A frame did not have the expected shape
    #[error("Invalid frame: {0}")]
    InvalidFrame(&'static str),

    /// Declared message length exceeds the accepted maximum
    #[error("Message too large: {len} bytes (max {max})")]
    MessageTooLarge { len: usize, max: usize },

    /// The peer closed the stream before a complete frame arrived
    #[error("Accessory stream closed")]
    Closed,

    /// The reader was asked to stop
    #[error("Reader stopped")]
    Stopped,

    /// The accessory could not be opened
    #[error("Accessory unavailable: {0}")]
    Unavailable(String),

    /// `write` was called before `start`
    #[error("Session not started")]
    NotStarted,

    /// `start` was called twice on the same session
    #[error("Session already started")]
    AlreadyStarted,

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => Error::Closed,
            _ => Error::IoError(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unexpected_eof_maps_to_closed() {
        let err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert_eq!(Error::from(err), Error::Closed);
    }

    #[test]
    fn test_display() {
        let err = Error::MessageTooLarge {
            len: 1_048_577,
            max: 1_048_576,
        };
        assert_eq!(
            err.to_string(),
            "Message too large: 1048577 bytes (max 1048576)"
        );
    }
}
