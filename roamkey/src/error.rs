//! Error types for transaction control

use crate::registry::TransactionHandle;

use thiserror::Error;

/// Error type for transaction control
///
/// Precondition failures are not errors here: they are states of the
/// readiness machine. These variants cover transport failures and misuse of
/// the control surface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Failure reported by the accessory transport
    #[error("Transport error: {0}")]
    Transport(#[from] roamkey_transport::Error),

    /// A second transport was started before the first was stopped
    #[error("A transport session is already active for this transaction")]
    SessionActive,

    /// The handle refers to a transaction that was already removed
    #[error("Stale transaction handle {0}")]
    StaleHandle(TransactionHandle),

    /// The active transport carries its own channel and takes no writes
    #[error("Transport does not accept framed writes")]
    WriteUnsupported,

    /// BLE advertising could not be started
    #[error("Bluetooth advertising unavailable: {0}")]
    AdvertiseFailed(String),
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Transport(error.into())
    }
}

/// Result type alias for transaction control
pub type Result<T> = std::result::Result<T, Error>;
