//! Active transport of a transaction
//!
//! A transaction owns at most one of these. USB sessions frame CTAP2
//! payloads over the accessory link; BLE advertisements hand the
//! connection to the engine's own tunnel and take no framed writes.

use crate::error::{Error, Result};
use crate::platform::Advertisement;

use roamkey_transport::UsbSession;

/// Which transport is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Usb,
    Ble,
}

/// One transaction's transport
pub enum TransportSession {
    Usb(UsbSession),
    Ble(Option<Box<dyn Advertisement>>),
}

impl TransportSession {
    pub fn ble(advertisement: Box<dyn Advertisement>) -> Self {
        TransportSession::Ble(Some(advertisement))
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            TransportSession::Usb(_) => TransportKind::Usb,
            TransportSession::Ble(_) => TransportKind::Ble,
        }
    }

    /// Frame and write one payload
    pub fn write(&self, payload: &[u8]) -> Result<()> {
        match self {
            TransportSession::Usb(session) => Ok(session.write(payload)?),
            TransportSession::Ble(_) => Err(Error::WriteUnsupported),
        }
    }

    /// Stop whichever transport is active. Idempotent.
    pub fn stop(&mut self) {
        match self {
            TransportSession::Usb(session) => session.stop(),
            TransportSession::Ble(advertisement) => {
                if let Some(mut advertisement) = advertisement.take() {
                    tracing::info!("stopping bluetooth advertisement");
                    advertisement.stop();
                }
            }
        }
    }

    /// Wait for a USB reader thread to exit. No-op for BLE.
    pub fn join(&mut self) -> Result<()> {
        match self {
            TransportSession::Usb(session) => Ok(session.join()?),
            TransportSession::Ble(_) => Ok(()),
        }
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.stop();
    }
}
