//! Error types for the modemcore library.

use std::fmt;

use thiserror::Error;

use crate::protocol::codes::{self, ErrorCategory};
use crate::resource::Transition;

/// The main error type for modemcore operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No terminal response arrived within the command's deadline.
    #[error("command {command:?} timed out after {timeout_ms}ms")]
    Timeout { command: String, timeout_ms: u64 },

    /// The terminal line of the response was an error token.
    #[error("command {command:?} failed: {reason}")]
    DeviceFailed { command: String, reason: DeviceError },

    /// The command was cancelled while in flight.
    #[error("command cancelled")]
    Cancelled,

    /// The channel is not open.
    #[error("not connected")]
    NotConnected,

    /// The channel was closed while the command was in flight.
    #[error("channel closed")]
    ChannelClosed,

    /// The handshake never got an answer from the modem.
    #[error("could not open channel {channel} after {attempts} attempts")]
    OpenFailed { channel: String, attempts: u32 },

    /// A resource-specific operation was attempted while the resource is not enabled.
    #[error("resource {resource} is not enabled")]
    ResourceNotEnabled { resource: String },

    /// An enable/disable/suspend/resume hook reported failure.
    #[error("resource {resource}: {transition} failed: {source}")]
    ResourceTransitionFailed {
        resource: String,
        transition: Transition,
        #[source]
        source: Box<Error>,
    },

    /// A sequencer was resumed after it terminated.
    #[error("sequence already finished")]
    SequenceFinished,

    /// The modem answered with something the caller could not interpret.
    #[error("protocol error: {message}")]
    Protocol { message: String },
}

impl Error {
    /// Returns true for [`Error::Timeout`].
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns the descriptive category of a device failure, if this is one.
    #[must_use]
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            Self::DeviceFailed { reason, .. } => Some(reason.category()),
            _ => None,
        }
    }
}

/// Classification of an error terminal line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// Plain `ERROR`.
    Failed,
    /// `+CME ERROR: <code>` (mobile equipment).
    Cme(u16),
    /// `+CMS ERROR: <code>` (message service).
    Cms(u16),
    /// `+EXT ERROR: <code>` (vendor extension).
    Ext(u16),
    /// `BUSY`.
    Busy,
    /// `NO ANSWER`.
    NoAnswer,
    /// `NO CARRIER`.
    NoCarrier,
    /// `NO DIALTONE`.
    NoDialtone,
    /// An error line whose code could not be parsed.
    Unparsed(String),
}

impl DeviceError {
    /// Maps the error to the category callers act on.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Cme(code) => codes::cme_category(*code),
            Self::Cms(code) => codes::cms_category(*code),
            Self::Ext(code) => codes::ext_category(*code),
            Self::NoCarrier => ErrorCategory::CallNoCarrier,
            Self::Failed
            | Self::Busy
            | Self::NoAnswer
            | Self::NoDialtone
            | Self::Unparsed(_) => ErrorCategory::Generic,
        }
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed => f.write_str("ERROR"),
            Self::Cme(code) => write!(f, "+CME ERROR {code}: {}", codes::cme_text(*code)),
            Self::Cms(code) => write!(f, "+CMS ERROR {code}: {}", codes::cms_text(*code)),
            Self::Ext(code) => write!(f, "+EXT ERROR {code}: {}", codes::ext_text(*code)),
            Self::Busy => f.write_str("BUSY"),
            Self::NoAnswer => f.write_str("NO ANSWER"),
            Self::NoCarrier => f.write_str("NO CARRIER"),
            Self::NoDialtone => f.write_str("NO DIALTONE"),
            Self::Unparsed(line) => write!(f, "unrecognised error line {line:?}"),
        }
    }
}

/// Result type alias for modemcore operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_error_display() {
        assert_eq!(DeviceError::Cme(10).to_string(), "+CME ERROR 10: SIM not inserted");
        assert_eq!(DeviceError::NoCarrier.to_string(), "NO CARRIER");
    }

    #[test]
    fn test_error_category() {
        let err = Error::DeviceFailed {
            command: "+CPIN?".into(),
            reason: DeviceError::Cme(10),
        };
        assert_eq!(err.category(), Some(ErrorCategory::SimNotPresent));
        assert_eq!(Error::Cancelled.category(), None);
    }

    #[test]
    fn test_timeout_display() {
        let err = Error::Timeout {
            command: "+CFUN?".into(),
            timeout_ms: 1000,
        };
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "command \"+CFUN?\" timed out after 1000ms");
    }
}
