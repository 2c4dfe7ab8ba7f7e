//! # modemcore
//!
//! An async AT command engine for cellular modems.
//!
//! The modem speaks a line-oriented, request/response protocol on a serial
//! port and interleaves unsolicited result codes (URCs) with the replies.
//! This library separates the two, runs commands strictly one at a time per
//! channel, and wraps a modem in a resource lifecycle that gates which
//! signals reach subscribers.
//!
//! ## Quick Start
//!
//! ```no_run
//! use modemcore::{ChannelConfig, CommandSets, EventDispatcher, Modem, SerialTransport};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), modemcore::Error> {
//!     let events = EventDispatcher::default();
//!     let mut subscription = events.subscribe();
//!
//!     let modem = Modem::new(
//!         ChannelConfig::new("main"),
//!         SerialTransport::with_port("/dev/ttySAC0"),
//!         CommandSets::default(),
//!         events,
//!     );
//!     modem.enable().await?;
//!
//!     let info = modem.get_info().await?;
//!     println!("{} {} ({})", info.manufacturer, info.model, info.imei);
//!
//!     while let Some(event) = subscription.recv().await {
//!         println!("{event:?}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`protocol`] - Line parser, command and response types, error codes
//! - [`unsolicited`] - URC groups and their handlers
//! - [`transport`] - Byte stream transports (currently serial)
//! - [`channel`] - Command channel: queue, timeouts, handshake
//! - [`sequencer`] - Multi-step command exchanges
//! - [`resource`] - Enable/disable/suspend/resume lifecycle and signal gating
//! - [`event`] - Async event system for signals and state changes
//! - [`modem`] - The GSM modem service built from all of the above

pub mod channel;
pub mod error;
pub mod event;
pub mod modem;
pub mod protocol;
pub mod resource;
pub mod sequencer;
pub mod transport;
pub mod unsolicited;

// Re-exports for convenience
pub use channel::{ChannelConfig, ChannelHandle, ChannelStatus, CommandChannel, PendingResponse};
pub use error::{DeviceError, Error, Result};
pub use event::{Event, EventDispatcher, EventFilter, EventKind, Subscription};
pub use modem::{CommandSets, DeviceInfo, Modem};
pub use protocol::{Command, ErrorCategory, FinalResult, LineParser, Parsed, ParserConfig, Response};
pub use resource::{
    NoHooks, PendingTransition, ResourceHooks, ResourceLifecycle, ResourceStatus, SignalGate,
    Transition,
};
pub use sequencer::{Exchange, Procedure, Sequencer, Step};
pub use transport::{SerialConfig, SerialTransport, Transport, list_ports};
pub use unsolicited::{IgnoreUnsolicited, Unsolicited, UnsolicitedHandler, UrcRegistry};
