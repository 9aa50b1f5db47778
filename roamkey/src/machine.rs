//! Transport Readiness Machine
//!
//! Decides, for one transaction, which platform preconditions must hold
//! before a transport may start. The decision is a pure function:
//!
//! ```text
//! transition(state, event, context, conditions) -> Wait | MoveTo(next, effect) | Terminate
//! ```
//!
//! `conditions` is a snapshot of instantaneous platform queries taken just
//! before the call. Nothing in this module blocks or talks to the platform;
//! [`ReadinessMachine::drive`] feeds the function through an
//! [`Environment`] in a trampoline:
//!
//! 1. render the current state
//! 2. snapshot conditions and evaluate the transition
//! 3. on `MoveTo`, commit the state, apply the side effect, clear the
//!    event to [`Event::None`] and repeat
//! 4. on `Wait`, keep the state until the next event
//!
//! A `MoveTo` that names the current state is a logic error.

use crate::error::Result;
use crate::state::{
    ADVERTISE_PERMISSIONS, BLE_PERMISSIONS, ErrorCode, Event, Permission, ReadinessState,
    TransactionMode,
};

/// Per-transaction constants the transition function depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Context {
    pub mode: TransactionMode,

    /// Code of the recoverable "missing BLE permission" error
    pub ble_permission_error: ErrorCode,
}

/// Snapshot of platform preconditions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Conditions {
    pub screen_lock: bool,
    pub advertiser_available: bool,
    pub activity_started: bool,
    pub runtime_ble_permission_required: bool,
    pub ble_permissions_held: bool,
    pub advertise_permission_held: bool,
}

impl Conditions {
    /// Whether the radio may be enabled without asking for permissions
    pub fn ble_permissions_satisfied(&self) -> bool {
        !self.runtime_ble_permission_required || self.ble_permissions_held
    }
}

/// Work requested by a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideEffect {
    /// Remember the user's "share linking info" choice
    RecordLinkingChoice(bool),
    StartUsb,
    StartBle,
    /// Arm the Bluetooth enable delay timer
    ArmTimer,
    RequestPermissions(&'static [Permission]),
    RequestBluetoothEnable,
}

/// Result of one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Keep the current state until another event arrives
    Wait,
    MoveTo(ReadinessState, Option<SideEffect>),
    /// End the transaction
    Terminate,
}

impl Transition {
    fn to(state: ReadinessState) -> Self {
        Transition::MoveTo(state, None)
    }

    fn with(state: ReadinessState, effect: SideEffect) -> Self {
        Transition::MoveTo(state, Some(effect))
    }
}

/// Evaluate one step of the readiness machine
///
/// Unlisted combinations wait. Running states never move.
pub fn transition(
    state: &ReadinessState,
    event: &Event,
    ctx: &Context,
    conditions: &Conditions,
) -> Transition {
    use ReadinessState as S;

    match *state {
        S::Start => {
            if ctx.mode == TransactionMode::Qr {
                Transition::to(S::QrConfirm)
            } else {
                Transition::to(S::CheckScreenLock)
            }
        }

        S::QrConfirm => match *event {
            Event::QrAllowClicked { share_linking_info } => Transition::with(
                S::CheckScreenLock,
                SideEffect::RecordLinkingChoice(share_linking_info),
            ),
            Event::QrDenyClicked => Transition::Terminate,
            _ => Transition::Wait,
        },

        S::CheckScreenLock => {
            // Server links were already authorized on another device
            if ctx.mode == TransactionMode::ServerLink || conditions.screen_lock {
                Transition::to(S::StartMode)
            } else {
                Transition::to(S::NoScreenLock)
            }
        }

        S::NoScreenLock => {
            if *event == Event::Resumed && conditions.screen_lock {
                Transition::to(S::StartMode)
            } else {
                Transition::Wait
            }
        }

        S::StartMode => {
            if ctx.mode == TransactionMode::Usb {
                Transition::with(S::RunningUsb, SideEffect::StartUsb)
            } else {
                Transition::to(S::EnableBluetooth)
            }
        }

        S::EnableBluetooth => {
            if conditions.advertiser_available {
                Transition::to(S::BluetoothEnabled)
            } else if !conditions.activity_started {
                Transition::Wait
            } else {
                Transition::with(S::EnableBluetoothWaiting, SideEffect::ArmTimer)
            }
        }

        S::EnableBluetoothWaiting => match *event {
            Event::TimeoutComplete if !conditions.ble_permissions_satisfied() => Transition::with(
                S::EnableBluetoothPermissionRequested,
                SideEffect::RequestPermissions(BLE_PERMISSIONS),
            ),
            Event::TimeoutComplete => Transition::to(S::RequestBluetoothEnable),
            _ => Transition::Wait,
        },

        S::EnableBluetoothPermissionRequested => match *event {
            Event::PermissionsGranted => Transition::to(S::RequestBluetoothEnable),
            Event::PermissionsDenied => Transition::to(S::Error(ctx.ble_permission_error)),
            _ => Transition::Wait,
        },

        S::RequestBluetoothEnable => Transition::with(
            S::EnableBluetoothPending,
            SideEffect::RequestBluetoothEnable,
        ),

        S::EnableBluetoothPending => match *event {
            Event::BleEnabled => Transition::to(S::BluetoothEnabled),
            _ => Transition::Wait,
        },

        S::BluetoothEnabled => {
            if conditions.advertise_permission_held {
                Transition::to(S::BluetoothReady)
            } else {
                Transition::with(
                    S::BluetoothAdvertisePermissionRequested,
                    SideEffect::RequestPermissions(ADVERTISE_PERMISSIONS),
                )
            }
        }

        S::BluetoothAdvertisePermissionRequested => match *event {
            Event::PermissionsGranted => Transition::to(S::BluetoothReady),
            Event::PermissionsDenied => Transition::to(S::Error(ctx.ble_permission_error)),
            _ => Transition::Wait,
        },

        S::BluetoothReady => Transition::with(S::RunningBle, SideEffect::StartBle),

        S::Error(code) => {
            if *event == Event::Resumed
                && code == ctx.ble_permission_error
                && conditions.ble_permissions_satisfied()
                && conditions.advertise_permission_held
            {
                Transition::to(S::EnableBluetooth)
            } else {
                Transition::Wait
            }
        }

        S::RunningUsb | S::RunningBle => Transition::Wait,
    }
}

/// Platform seen by the trampoline
pub trait Environment {
    /// Query every precondition once
    fn conditions(&self) -> Conditions;

    /// Present the state the machine is in
    fn render(&mut self, state: &ReadinessState);

    /// Carry out a side effect of a committed transition
    fn apply(&mut self, effect: SideEffect) -> Result<()>;
}

/// Why a drive returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drive {
    /// Settled in a state waiting for the next event
    Waiting,
    /// The transaction should end
    Terminated,
}

/// State holder and trampoline
#[derive(Debug, Clone)]
pub struct ReadinessMachine {
    state: ReadinessState,
    context: Context,
    parked: bool,
}

impl ReadinessMachine {
    /// A machine in [`ReadinessState::Start`]
    pub fn new(context: Context) -> Self {
        Self {
            state: ReadinessState::Start,
            context,
            parked: false,
        }
    }

    /// A machine parked in `Error(code)` for good
    ///
    /// Used for transactions whose activation payload failed validation.
    /// No event moves it, even when `code` equals the recoverable BLE
    /// permission code.
    pub fn parked(context: Context, code: ErrorCode) -> Self {
        Self {
            state: ReadinessState::Error(code),
            context,
            parked: true,
        }
    }

    pub fn state(&self) -> &ReadinessState {
        &self.state
    }

    pub fn is_parked(&self) -> bool {
        self.parked
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Process one event to completion
    pub fn drive<E: Environment + ?Sized>(&mut self, event: Event, env: &mut E) -> Result<Drive> {
        if self.parked {
            tracing::debug!(state = ?self.state, ?event, "event on parked machine ignored");
            return Ok(Drive::Waiting);
        }
        let mut event = event;

        loop {
            env.render(&self.state);
            let conditions = env.conditions();

            match transition(&self.state, &event, &self.context, &conditions) {
                Transition::Wait => return Ok(Drive::Waiting),
                Transition::Terminate => {
                    tracing::debug!(state = ?self.state, "readiness machine terminated");
                    return Ok(Drive::Terminated);
                }
                Transition::MoveTo(next, effect) => {
                    if next == self.state {
                        debug_assert!(false, "transition from {:?} to itself", next);
                        tracing::error!(state = ?next, "transition to the same state");
                        return Ok(Drive::Waiting);
                    }

                    tracing::debug!(from = ?self.state, to = ?next, ?event, "readiness transition");
                    self.state = next;
                    if let Some(effect) = effect {
                        env.apply(effect)?;
                    }
                    event = Event::None;
                }
            }
        }
    }
}
