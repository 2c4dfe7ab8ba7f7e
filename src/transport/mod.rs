//! Transport layer for modem communication.
//!
//! A transport knows how to (re)open the byte source behind one channel.
//! Currently only USB/Serial is implemented; multiplexer virtual channels and
//! pseudo-terminals fit the same trait.

pub mod serial;

use std::future::Future;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// A bidirectional byte stream to the modem.
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Trait for transport implementations.
pub trait Transport: Send {
    /// Opens a fresh stream to the device.
    ///
    /// Called again whenever the channel decides to reopen the line, so every
    /// call must release whatever the previous one acquired.
    fn open(&mut self) -> Pin<Box<dyn Future<Output = Result<Box<dyn ByteStream>>> + Send + '_>>;

    /// Returns a human-readable name of the underlying device.
    fn name(&self) -> &str;
}

pub use serial::{SerialConfig, SerialTransport, list_ports};
