//! # roamkey
//!
//! Gets a phone ready to act as a roaming FIDO2 authenticator and carries
//! the transaction once it is.
//!
//! ## Architecture
//!
//! - **State**: readiness states, activation modes, external events
//! - **Machine**: pure transition function plus a trampoline driver
//! - **Platform**: traits for the OS, the presentation layer and the
//!   handshake engine
//! - **Transaction**: one activation, from validation to outcome
//! - **Registry**: generational handles for stopping transactions from
//!   platform callbacks
//!
//! The accessory wire protocol lives in `roamkey-transport`.
//!
//! ## Example
//!
//! ```no_run
//! # use roamkey::{Activation, Event, Transaction, TransactionConfig, Platform, Presenter, TransactionEngine};
//! # fn run<P: Platform, R: Presenter, E: TransactionEngine>(platform: P, presenter: R, engine: E) -> roamkey::Result<()> {
//! let activation = Activation::Qr { uri: "FIDO:/0123".to_string() };
//! let mut transaction =
//!     Transaction::begin(activation, platform, presenter, engine, TransactionConfig::default())?;
//!
//! transaction.on_event(Event::QrAllowClicked { share_linking_info: true })?;
//! transaction.on_activity_started()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod machine;
pub mod platform;
pub mod registry;
pub mod state;
pub mod transaction;
pub mod transport;

// Re-export main types at root level for convenience
pub use config::{TransactionConfig, TransactionConfigBuilder};
pub use error::{Error, Result};
pub use machine::{Conditions, Context, ReadinessMachine, SideEffect, Transition, transition};
pub use platform::{Advertisement, Completion, EngineResponse, Platform, Presenter, TransactionEngine};
pub use registry::{TransactionHandle, TransactionRegistry};
pub use state::{ErrorCode, Event, Permission, ReadinessState, TransactionMode};
pub use transaction::{Activation, Outcome, Transaction};
pub use transport::{TransportKind, TransportSession};
