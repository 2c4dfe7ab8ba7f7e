//! Serial/USB transport implementation.
//!
//! This module provides serial port access for modems attached via UART or
//! USB, and for the virtual ports of a multiplexer.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio_serial::{FlowControl, SerialPortBuilderExt};

use crate::error::{Error, Result};
use crate::transport::{ByteStream, Transport};

/// Default baud rate for modem lines.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default connection delay.
pub const DEFAULT_CONNECTION_DELAY: Duration = Duration::from_millis(300);

/// Configuration for serial transport.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/ttySAC0" or "COM3").
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Use RTS/CTS hardware flow control.
    pub rtscts: bool,
    /// Delay after opening before the line is used.
    pub connection_delay: Duration,
}

impl SerialConfig {
    /// Creates a new serial configuration with default settings.
    #[must_use]
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            rtscts: true,
            connection_delay: DEFAULT_CONNECTION_DELAY,
        }
    }

    /// Sets the baud rate.
    #[must_use]
    pub const fn baud_rate(mut self, rate: u32) -> Self {
        self.baud_rate = rate;
        self
    }

    /// Enables or disables hardware flow control.
    #[must_use]
    pub const fn rtscts(mut self, enabled: bool) -> Self {
        self.rtscts = enabled;
        self
    }

    /// Sets the connection delay.
    #[must_use]
    pub const fn connection_delay(mut self, delay: Duration) -> Self {
        self.connection_delay = delay;
        self
    }
}

/// Serial transport for one modem line.
pub struct SerialTransport {
    config: SerialConfig,
}

impl SerialTransport {
    /// Creates a new serial transport with the given configuration.
    #[must_use]
    pub const fn new(config: SerialConfig) -> Self {
        Self { config }
    }

    /// Creates a new serial transport for the given port with default settings.
    #[must_use]
    pub fn with_port(port: impl Into<String>) -> Self {
        Self::new(SerialConfig::new(port))
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &SerialConfig {
        &self.config
    }
}

impl Transport for SerialTransport {
    fn open(&mut self) -> Pin<Box<dyn Future<Output = Result<Box<dyn ByteStream>>> + Send + '_>> {
        Box::pin(async move {
            tracing::info!("opening serial port: {}", self.config.port);

            let flow_control = if self.config.rtscts {
                FlowControl::Hardware
            } else {
                FlowControl::None
            };
            let mut stream = tokio_serial::new(&self.config.port, self.config.baud_rate)
                .flow_control(flow_control)
                .open_native_async()
                .map_err(Error::Serial)?;

            tokio::time::sleep(self.config.connection_delay).await;

            // Drain whatever the modem sent before we were listening
            let mut buf = [0u8; 1024];
            let mut total_drained = 0usize;
            let drain_deadline = tokio::time::Instant::now() + Duration::from_millis(200);
            while tokio::time::Instant::now() < drain_deadline {
                match tokio::time::timeout(Duration::from_millis(20), stream.read(&mut buf)).await {
                    Ok(Ok(n)) if n > 0 => total_drained += n,
                    _ => tokio::time::sleep(Duration::from_millis(10)).await,
                }
            }

            if total_drained > 0 {
                tracing::debug!("drained {} stale bytes from buffer", total_drained);
            }

            tracing::info!("serial port {} open", self.config.port);
            Ok(Box::new(stream) as Box<dyn ByteStream>)
        })
    }

    fn name(&self) -> &str {
        &self.config.port
    }
}

/// Lists available serial ports.
///
/// # Errors
///
/// Returns an error if the port list cannot be retrieved.
pub fn list_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports().map_err(Error::Serial)?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_config_defaults() {
        let config = SerialConfig::new("/dev/ttySAC0");
        assert_eq!(config.port, "/dev/ttySAC0");
        assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE);
        assert!(config.rtscts);
    }

    #[test]
    fn test_serial_config_builder() {
        let config = SerialConfig::new("/dev/ttyUSB0")
            .baud_rate(9600)
            .rtscts(false)
            .connection_delay(Duration::from_secs(1));
        assert_eq!(config.baud_rate, 9600);
        assert!(!config.rtscts);
        assert_eq!(config.connection_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_transport_name_is_port() {
        let transport = SerialTransport::with_port("/dev/ttyUSB1");
        assert_eq!(transport.name(), "/dev/ttyUSB1");
    }

    #[test]
    #[ignore = "Requires /sys/class/tty - not available in sandboxed builds"]
    fn test_list_ports() {
        let _ = list_ports();
    }
}
