//! Collaborator traits
//!
//! A transaction talks to three collaborators it does not implement:
//!
//! - [`Platform`]: screen lock, Bluetooth radio, runtime permissions, timers
//! - [`Presenter`]: whatever shows the user where the transaction is
//! - [`TransactionEngine`]: the cryptographic handshake and CTAP2 handling
//!
//! Queries must answer immediately. Requests are asynchronous: their result
//! comes back later as an [`Event`](crate::Event) passed to
//! [`Transaction::on_event`](crate::Transaction::on_event).

use crate::error::Result;
use crate::state::{ErrorCode, Permission, ReadinessState};
use crate::transaction::Outcome;

use std::time::Duration;

use smallvec::SmallVec;

/// Running BLE advertisement
pub trait Advertisement: Send {
    /// Stop advertising. Called at most once.
    fn stop(&mut self);
}

/// Operating system services
pub trait Platform {
    fn device_has_screen_lock(&self) -> bool;

    /// Whether a BLE advertiser can be obtained right now
    fn advertiser_available(&self) -> bool;

    /// Whether this OS gates Bluetooth behind runtime permissions
    fn runtime_ble_permissions_required(&self) -> bool;

    fn has_permissions(&self, permissions: &[Permission]) -> bool;

    /// Ask the user for permissions
    ///
    /// Answered with `PermissionsGranted` or `PermissionsDenied`.
    fn request_permissions(&mut self, permissions: &[Permission]);

    /// Ask the OS to power the radio. Answered with `BleEnabled`.
    fn request_bluetooth_enable(&mut self);

    /// Answered with `TimeoutComplete` after `delay`
    fn schedule_timeout(&mut self, delay: Duration);

    /// Start the BLE advertisement for the hybrid transport
    fn start_advertising(&mut self) -> Result<Box<dyn Advertisement>>;
}

/// Presentation layer
pub trait Presenter {
    /// Show the state the machine is in
    ///
    /// Called for every state the machine passes through, including
    /// transient ones.
    fn render(&mut self, state: &ReadinessState);

    /// The transaction ended
    fn finished(&mut self, outcome: &Outcome) {
        let _ = outcome;
    }
}

/// Final result reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub ok: bool,
    pub error_code: ErrorCode,
}

/// What the engine wants done after a frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineResponse {
    /// Payloads to write to the transport, in order
    pub replies: SmallVec<[Vec<u8>; 2]>,

    /// Set when the transaction is over
    pub completion: Option<Completion>,
}

impl EngineResponse {
    /// Nothing to do
    pub fn none() -> Self {
        Self::default()
    }

    /// One reply, transaction continues
    pub fn reply(payload: Vec<u8>) -> Self {
        let mut response = Self::default();
        response.replies.push(payload);
        response
    }

    /// Transaction finished
    pub fn complete(ok: bool, error_code: ErrorCode) -> Self {
        Self {
            replies: SmallVec::new(),
            completion: Some(Completion { ok, error_code }),
        }
    }

    /// Add a reply written before the completion takes effect
    pub fn with_reply(mut self, payload: Vec<u8>) -> Self {
        self.replies.push(payload);
        self
    }
}

/// Handshake and CTAP2 engine
pub trait TransactionEngine {
    /// Check a scanned QR URI before the transaction starts
    fn validate_qr_uri(&self, uri: &str) -> std::result::Result<(), ErrorCode>;

    /// Check a server-provided link before the transaction starts
    fn validate_server_link(&self, link: &[u8]) -> std::result::Result<(), ErrorCode>;

    /// Code used for the recoverable "missing BLE permission" error
    fn ble_permission_error(&self) -> ErrorCode;

    /// Consume one transport delivery
    ///
    /// `None` means the transport ended or never produced anything. The
    /// engine is expected to complete the transaction in response.
    fn handle_frame(&mut self, frame: Option<&[u8]>) -> EngineResponse;
}
