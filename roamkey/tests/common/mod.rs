//! Common test utilities for roamkey integration tests
//!
//! Fakes for the three collaborators, a socket-pair accessory, and helpers
//! for waiting on the reader thread.

#![allow(dead_code)]

use roamkey::{
    Advertisement, EngineResponse, ErrorCode, Outcome, Permission, Platform, Presenter,
    ReadinessState, Transaction, TransactionEngine,
};
use roamkey_transport::{AccessoryIo, AccessoryProvider, Error as TransportError, FdAccessory};

use std::collections::HashSet;
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing_subscriber::EnvFilter;

/// Code the engine uses for "missing BLE permission"
pub const BLE_PERMISSION_ERROR: ErrorCode = ErrorCode(30);

/// Code the engine reports when the transport produced nothing
pub const TRANSPORT_ERROR: ErrorCode = ErrorCode(41);

/// Payload that makes the test engine finish successfully
pub const DONE: &[u8] = b"done";

/// Install a test log subscriber once
pub fn init_for_tests() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Platform with settable preconditions that records every request
#[derive(Default)]
pub struct FakePlatform {
    pub screen_lock: bool,
    pub advertiser_available: bool,
    pub runtime_permissions_required: bool,
    pub granted: HashSet<Permission>,
    pub advertise_fails: bool,

    pub permission_requests: Vec<Vec<Permission>>,
    pub enable_requests: usize,
    pub timeouts: Vec<Duration>,
    pub advertisements_started: usize,
    pub advertisement_stops: Arc<AtomicUsize>,
}

impl FakePlatform {
    /// Phone with a screen lock and no Bluetooth permissions yet
    pub fn locked() -> Self {
        Self {
            screen_lock: true,
            runtime_permissions_required: true,
            ..Default::default()
        }
    }

    pub fn grant(&mut self, permissions: &[Permission]) {
        self.granted.extend(permissions.iter().copied());
    }

    pub fn stops(&self) -> usize {
        self.advertisement_stops.load(Ordering::SeqCst)
    }
}

struct FakeAdvertisement(Arc<AtomicUsize>);

impl Advertisement for FakeAdvertisement {
    fn stop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

impl Platform for FakePlatform {
    fn device_has_screen_lock(&self) -> bool {
        self.screen_lock
    }

    fn advertiser_available(&self) -> bool {
        self.advertiser_available
    }

    fn runtime_ble_permissions_required(&self) -> bool {
        self.runtime_permissions_required
    }

    fn has_permissions(&self, permissions: &[Permission]) -> bool {
        permissions.iter().all(|p| self.granted.contains(p))
    }

    fn request_permissions(&mut self, permissions: &[Permission]) {
        self.permission_requests.push(permissions.to_vec());
    }

    fn request_bluetooth_enable(&mut self) {
        self.enable_requests += 1;
    }

    fn schedule_timeout(&mut self, delay: Duration) {
        self.timeouts.push(delay);
    }

    fn start_advertising(&mut self) -> roamkey::Result<Box<dyn Advertisement>> {
        if self.advertise_fails {
            return Err(roamkey::Error::AdvertiseFailed("radio off".to_string()));
        }
        self.advertisements_started += 1;
        Ok(Box::new(FakeAdvertisement(self.advertisement_stops.clone())))
    }
}

/// Presenter that keeps everything it was shown
#[derive(Default)]
pub struct RecordingPresenter {
    pub rendered: Vec<ReadinessState>,
    pub outcomes: Vec<Outcome>,
}

impl RecordingPresenter {
    /// Rendered states with consecutive repeats collapsed
    pub fn path(&self) -> Vec<ReadinessState> {
        let mut path = self.rendered.clone();
        path.dedup();
        path
    }
}

impl Presenter for RecordingPresenter {
    fn render(&mut self, state: &ReadinessState) {
        self.rendered.push(*state);
    }

    fn finished(&mut self, outcome: &Outcome) {
        self.outcomes.push(*outcome);
    }
}

/// Engine that acknowledges each message and finishes on [`DONE`]
#[derive(Default)]
pub struct EchoEngine {
    pub qr_error: Option<ErrorCode>,
    pub link_error: Option<ErrorCode>,
    pub frames: Vec<Option<Vec<u8>>>,
}

impl TransactionEngine for EchoEngine {
    fn validate_qr_uri(&self, uri: &str) -> Result<(), ErrorCode> {
        match self.qr_error {
            Some(code) => Err(code),
            None if uri.starts_with("FIDO:/") => Ok(()),
            None => Err(ErrorCode(1)),
        }
    }

    fn validate_server_link(&self, link: &[u8]) -> Result<(), ErrorCode> {
        match self.link_error {
            Some(code) => Err(code),
            None if link.is_empty() => Err(ErrorCode(2)),
            None => Ok(()),
        }
    }

    fn ble_permission_error(&self) -> ErrorCode {
        BLE_PERMISSION_ERROR
    }

    fn handle_frame(&mut self, frame: Option<&[u8]>) -> EngineResponse {
        self.frames.push(frame.map(<[u8]>::to_vec));
        match frame {
            None => EngineResponse::complete(false, TRANSPORT_ERROR),
            Some(message) if message == DONE => {
                EngineResponse::complete(true, ErrorCode(0)).with_reply(b"bye".to_vec())
            }
            Some(message) => {
                let mut reply = b"ack:".to_vec();
                reply.extend_from_slice(message);
                EngineResponse::reply(reply)
            }
        }
    }
}

pub type TestTransaction = Transaction<FakePlatform, RecordingPresenter, EchoEngine>;

/// Accessory backed by one end of a socket pair, counting opens
pub struct SocketAccessory {
    end: Mutex<Option<FdAccessory>>,
    pub opens: Arc<AtomicUsize>,
}

impl SocketAccessory {
    /// Accessory for the phone plus the host's end of the cable
    pub fn pair() -> (Self, UnixStream) {
        let (phone, host) = UnixStream::pair().expect("Failed to create socket pair");
        let accessory = Self {
            end: Mutex::new(Some(FdAccessory::from(OwnedFd::from(phone)))),
            opens: Arc::new(AtomicUsize::new(0)),
        };
        (accessory, host)
    }

    /// Accessory that was unplugged before the transport started
    pub fn unplugged() -> Self {
        Self {
            end: Mutex::new(None),
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl AccessoryProvider for SocketAccessory {
    fn open(&self) -> roamkey_transport::Result<Arc<dyn AccessoryIo>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let end = self
            .end
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| TransportError::Unavailable("accessory detached".to_string()))?;
        Ok(Arc::new(end))
    }
}

/// Pump deliveries until `done` holds or `timeout` passes
pub fn pump_until<F>(transaction: &mut TestTransaction, timeout: Duration, done: F) -> bool
where
    F: Fn(&TestTransaction) -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        transaction.pump();
        if done(transaction) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}
