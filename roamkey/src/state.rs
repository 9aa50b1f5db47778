//! Readiness states, transaction modes and external events

use std::fmt;

/// Opaque error code
///
/// The numeric values belong to the transaction engine. This crate only
/// carries and compares them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ErrorCode(pub i32);

impl ErrorCode {
    pub fn value(self) -> i32 {
        self.0
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for ErrorCode {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

/// Where a transaction is on its way to an armed transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadinessState {
    Start,
    /// Waiting for the user to allow or deny a scanned QR code
    QrConfirm,
    CheckScreenLock,
    /// Waiting for the user to set up a screen lock
    NoScreenLock,
    StartMode,
    EnableBluetooth,
    /// Delay timer armed before touching the radio
    EnableBluetoothWaiting,
    /// Radio enable requested, waiting for it to come up
    EnableBluetoothPending,
    EnableBluetoothPermissionRequested,
    RequestBluetoothEnable,
    BluetoothEnabled,
    BluetoothAdvertisePermissionRequested,
    BluetoothReady,
    RunningUsb,
    RunningBle,
    Error(ErrorCode),
}

impl ReadinessState {
    /// Whether a transport has been started
    ///
    /// Running states are terminal: no event leaves them.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::RunningUsb | Self::RunningBle)
    }

    /// The carried error code, if this is the error state
    pub fn error(&self) -> Option<ErrorCode> {
        match self {
            Self::Error(code) => Some(*code),
            _ => None,
        }
    }
}

impl fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(code) => write!(f, "Error({})", code),
            other => fmt::Debug::fmt(other, f),
        }
    }
}

/// Activation source of a transaction
///
/// Fixed at creation. Only `Usb` reaches [`ReadinessState::RunningUsb`];
/// every other mode goes through Bluetooth enablement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionMode {
    /// Accessory cable attached
    Usb,
    /// QR code scanned on the phone
    Qr,
    /// Link handed over by a server
    ServerLink,
    /// Push message from a linked device
    CloudMessage,
}

impl TransactionMode {
    /// All modes, for exhaustive tests and tooling
    pub const ALL: [TransactionMode; 4] = [Self::Usb, Self::Qr, Self::ServerLink, Self::CloudMessage];
}

/// External stimulus delivered to the readiness machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// No new stimulus, re-evaluate
    None,
    /// The owning activity came back to the foreground
    Resumed,
    /// The Bluetooth radio came up
    BleEnabled,
    PermissionsGranted,
    PermissionsDenied,
    /// The user allowed the QR transaction
    QrAllowClicked { share_linking_info: bool },
    QrDenyClicked,
    /// The delay timer fired
    TimeoutComplete,
}

/// Runtime permission the platform may have to grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    BluetoothConnect,
    BluetoothScan,
    BluetoothAdvertise,
}

/// Permissions needed before the radio may be enabled
pub const BLE_PERMISSIONS: &[Permission] = &[Permission::BluetoothConnect, Permission::BluetoothScan];

/// Permissions needed before advertising
pub const ADVERTISE_PERMISSIONS: &[Permission] = &[Permission::BluetoothAdvertise];
