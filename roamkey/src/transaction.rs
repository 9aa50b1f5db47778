//! Authenticator Transaction
//!
//! One transaction is one attempt by a host to use the phone as a security
//! key. It owns the readiness machine, at most one transport, and the
//! channel the transport's reader thread delivers into.
//!
//! All entry points run on the control thread and take `&mut self`, so
//! events are processed one at a time, to completion, in arrival order.
//! Transport deliveries are queued by the reader thread and handed to the
//! engine by [`Transaction::pump`].

use crate::config::TransactionConfig;
use crate::error::{Error, Result};
use crate::machine::{Conditions, Context, Drive, Environment, ReadinessMachine, SideEffect};
use crate::platform::{Completion, Platform, Presenter, TransactionEngine};
use crate::state::{
    ADVERTISE_PERMISSIONS, BLE_PERMISSIONS, ErrorCode, Event, ReadinessState, TransactionMode,
};
use crate::transport::{TransportKind, TransportSession};

use roamkey_transport::{AccessoryProvider, UsbSession};

use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};

/// What started the transaction
pub enum Activation {
    /// Accessory cable attached; the provider opens the accessory
    Usb {
        accessory: Box<dyn AccessoryProvider>,
    },
    /// QR code scanned by the user
    Qr { uri: String },
    /// Link handed over by a server
    ServerLink { link: Vec<u8> },
    /// Push message from a linked device
    CloudMessage,
}

impl Activation {
    pub fn mode(&self) -> TransactionMode {
        match self {
            Activation::Usb { .. } => TransactionMode::Usb,
            Activation::Qr { .. } => TransactionMode::Qr,
            Activation::ServerLink { .. } => TransactionMode::ServerLink,
            Activation::CloudMessage => TransactionMode::CloudMessage,
        }
    }
}

impl fmt::Debug for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Activation::Usb { .. } => f.write_str("Usb"),
            Activation::Qr { uri } => f.debug_struct("Qr").field("uri", uri).finish(),
            Activation::ServerLink { link } => f
                .debug_struct("ServerLink")
                .field("len", &link.len())
                .finish(),
            Activation::CloudMessage => f.write_str("CloudMessage"),
        }
    }
}

/// How a transaction ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The engine reported a result
    Completed { ok: bool, error_code: ErrorCode },
    /// The user denied the QR request
    Declined,
    /// Torn down by its owner
    Abandoned,
}

/// Everything the readiness machine acts on
struct Host<P, R> {
    platform: P,
    presenter: R,
    config: TransactionConfig,
    accessory: Option<Box<dyn AccessoryProvider>>,
    session: Option<TransportSession>,
    deliveries: Sender<Option<Vec<u8>>>,
    activity_started: bool,
    linking_choice: Option<bool>,
}

impl<P: Platform, R: Presenter> Host<P, R> {
    /// Report "transport produced nothing" through the delivery channel
    fn deliver_nothing(&self) {
        let _ = self.deliveries.send(None);
    }

    fn start_usb(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Err(Error::SessionActive);
        }

        let Some(accessory) = self.accessory.take() else {
            tracing::error!("usb transport requested without an accessory");
            self.deliver_nothing();
            return Ok(());
        };

        let mut session = UsbSession::new(accessory, self.config.reader.clone())
            .with_worker_name(self.config.worker_name());
        if let Err(e) = session.start(self.deliveries.clone()) {
            // The session already delivered its terminal None
            tracing::warn!(error = %e, "usb transport failed to start");
        }
        self.session = Some(TransportSession::Usb(session));
        Ok(())
    }

    fn start_ble(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Err(Error::SessionActive);
        }

        match self.platform.start_advertising() {
            Ok(advertisement) => {
                tracing::info!("bluetooth advertisement started");
                self.session = Some(TransportSession::ble(advertisement));
            }
            Err(e) => {
                tracing::warn!(error = %e, "bluetooth transport failed to start");
                self.deliver_nothing();
            }
        }
        Ok(())
    }
}

impl<P: Platform, R: Presenter> Environment for Host<P, R> {
    fn conditions(&self) -> Conditions {
        Conditions {
            screen_lock: self.platform.device_has_screen_lock(),
            advertiser_available: self.platform.advertiser_available(),
            activity_started: self.activity_started,
            runtime_ble_permission_required: self.platform.runtime_ble_permissions_required(),
            ble_permissions_held: self.platform.has_permissions(BLE_PERMISSIONS),
            advertise_permission_held: self.platform.has_permissions(ADVERTISE_PERMISSIONS),
        }
    }

    fn render(&mut self, state: &ReadinessState) {
        self.presenter.render(state);
    }

    fn apply(&mut self, effect: SideEffect) -> Result<()> {
        match effect {
            SideEffect::RecordLinkingChoice(share) => {
                self.linking_choice = Some(share);
                Ok(())
            }
            SideEffect::StartUsb => self.start_usb(),
            SideEffect::StartBle => self.start_ble(),
            SideEffect::ArmTimer => {
                self.platform
                    .schedule_timeout(self.config.bluetooth_enable_delay());
                Ok(())
            }
            SideEffect::RequestPermissions(permissions) => {
                self.platform.request_permissions(permissions);
                Ok(())
            }
            SideEffect::RequestBluetoothEnable => {
                self.platform.request_bluetooth_enable();
                Ok(())
            }
        }
    }
}

/// One authenticator transaction
pub struct Transaction<P: Platform, R: Presenter, E: TransactionEngine> {
    machine: ReadinessMachine,
    host: Host<P, R>,
    engine: E,
    deliveries: Receiver<Option<Vec<u8>>>,
    outcome: Option<Outcome>,
}

impl<P: Platform, R: Presenter, E: TransactionEngine> Transaction<P, R, E> {
    /// Create a transaction and drive it as far as it can go
    ///
    /// QR and server-link payloads are validated by the engine first. A
    /// rejected payload parks the transaction in `Error(code)` without
    /// running the machine; no later event moves it.
    pub fn begin(
        activation: Activation,
        platform: P,
        presenter: R,
        engine: E,
        config: TransactionConfig,
    ) -> Result<Self> {
        let mode = activation.mode();
        let context = Context {
            mode,
            ble_permission_error: engine.ble_permission_error(),
        };

        let validation = match &activation {
            Activation::Qr { uri } => engine.validate_qr_uri(uri),
            Activation::ServerLink { link } => engine.validate_server_link(link),
            Activation::Usb { .. } | Activation::CloudMessage => Ok(()),
        };
        let accessory = match activation {
            Activation::Usb { accessory } => Some(accessory),
            _ => None,
        };

        let (tx, rx) = mpsc::channel();
        let mut transaction = Self {
            machine: ReadinessMachine::new(context),
            host: Host {
                platform,
                presenter,
                config,
                accessory,
                session: None,
                deliveries: tx,
                activity_started: false,
                linking_choice: None,
            },
            engine,
            deliveries: rx,
            outcome: None,
        };

        match validation {
            Ok(()) => {
                tracing::info!(?mode, "transaction started");
                transaction.drive(Event::None)?;
            }
            Err(code) => {
                tracing::warn!(?mode, %code, "activation payload rejected");
                transaction.machine = ReadinessMachine::parked(context, code);
                transaction.host.presenter.render(transaction.machine.state());
            }
        }

        Ok(transaction)
    }

    fn drive(&mut self, event: Event) -> Result<()> {
        if self.outcome.is_some() {
            tracing::debug!(?event, "event after transaction end ignored");
            return Ok(());
        }

        match self.machine.drive(event, &mut self.host)? {
            Drive::Waiting => Ok(()),
            Drive::Terminated => {
                self.finish(Outcome::Declined);
                Ok(())
            }
        }
    }

    /// Deliver an external stimulus
    pub fn on_event(&mut self, event: Event) -> Result<()> {
        self.drive(event)
    }

    /// The owning activity finished starting
    ///
    /// `EnableBluetooth` waits for this before touching the radio.
    pub fn on_activity_started(&mut self) -> Result<()> {
        self.host.activity_started = true;
        self.drive(Event::None)
    }

    /// Hand one transport delivery to the engine
    ///
    /// Replies are queued on the active transport and written by its own
    /// thread, so this never waits on the link. A completion ends the
    /// transaction.
    pub fn on_frame(&mut self, frame: Option<Vec<u8>>) {
        if self.outcome.is_some() {
            tracing::trace!("delivery after transaction end ignored");
            return;
        }

        let response = self.engine.handle_frame(frame.as_deref());
        for reply in &response.replies {
            let written = match &self.host.session {
                Some(session) => session.write(reply),
                None => Err(Error::Transport(roamkey_transport::Error::NotStarted)),
            };
            if let Err(e) = written {
                // A dead link also ends the reader, which delivers None
                tracing::warn!(error = %e, len = reply.len(), "reply dropped");
            }
        }

        if let Some(Completion { ok, error_code }) = response.completion {
            self.complete(ok, error_code);
        }
    }

    /// Hand every queued delivery to the engine
    ///
    /// Returns how many were handled. Stops early once the transaction has
    /// ended. Never blocks.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while self.outcome.is_none() {
            match self.deliveries.try_recv() {
                Ok(frame) => {
                    self.on_frame(frame);
                    handled += 1;
                }
                Err(_) => break,
            }
        }
        handled
    }

    /// Record the engine's final result
    ///
    /// Used directly when the engine runs its own tunnel (BLE).
    pub fn complete(&mut self, ok: bool, error_code: ErrorCode) {
        if self.outcome.is_none() {
            self.finish(Outcome::Completed { ok, error_code });
        }
    }

    /// Tear the transaction down
    ///
    /// Stops the transport; a blocked USB reader exits within one poll
    /// timeout. Safe at any point, including before a transport started.
    pub fn stop(&mut self) {
        if self.outcome.is_none() {
            self.finish(Outcome::Abandoned);
        } else if let Some(mut session) = self.host.session.take() {
            session.stop();
        }
    }

    fn finish(&mut self, outcome: Outcome) {
        if let Some(mut session) = self.host.session.take() {
            session.stop();
        }
        tracing::info!(?outcome, state = ?self.machine.state(), "transaction finished");
        self.host.presenter.finished(&outcome);
        self.outcome = Some(outcome);
    }

    pub fn current_state(&self) -> &ReadinessState {
        self.machine.state()
    }

    pub fn current_error(&self) -> Option<ErrorCode> {
        self.machine.state().error()
    }

    pub fn mode(&self) -> TransactionMode {
        self.machine.context().mode
    }

    /// The user's "share linking info" choice, once made
    pub fn linking_choice(&self) -> Option<bool> {
        self.host.linking_choice
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    /// Kind of the transport currently held, if any
    pub fn transport_kind(&self) -> Option<TransportKind> {
        self.host.session.as_ref().map(TransportSession::kind)
    }

    pub fn platform(&self) -> &P {
        &self.host.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.host.platform
    }

    pub fn presenter(&self) -> &R {
        &self.host.presenter
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }
}

impl<P: Platform, R: Presenter, E: TransactionEngine> fmt::Debug for Transaction<P, R, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("mode", &self.mode())
            .field("state", self.current_state())
            .field("transport", &self.transport_kind())
            .field("outcome", &self.outcome)
            .finish()
    }
}
