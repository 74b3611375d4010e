//! Serial transport with reconnection backoff.
//!
//! Opens the station's serial device and hands the stream to the ingest
//! loop. Framing and timeouts are the stream reader's concern; this module
//! only gets the port open and keeps retrying until it is.

use backoff::{backoff::Backoff, ExponentialBackoff};
use thiserror::Error;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::{error, info, warn};

use crate::config::SerialConfig;

/// Errors that can occur while opening the serial transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open serial port {port}: {source}")]
    Open {
        port: String,
        source: tokio_serial::Error,
    },

    #[error("gave up opening serial port {port} after {attempts} attempts")]
    RetriesExhausted { port: String, attempts: u32 },
}

/// Open the configured serial port, retrying with exponential backoff.
///
/// `max_connect_attempts` of zero retries forever. Line settings follow
/// the field units: 8 data bits, one stop bit, no flow control, parity
/// from config.
pub async fn open_serial(config: &SerialConfig) -> Result<SerialStream, TransportError> {
    let mut backoff = ExponentialBackoff {
        initial_interval: config.reconnect_base_delay(),
        max_interval: config.reconnect_max_delay(),
        max_elapsed_time: None, // Retry forever unless max_connect_attempts is set
        ..Default::default()
    };

    let mut attempts = 0u32;
    let max_attempts = config.max_connect_attempts;

    loop {
        match try_open(config) {
            Ok(stream) => {
                info!(
                    port = %config.port,
                    baud = config.baud,
                    attempts,
                    "serial port opened"
                );
                return Ok(stream);
            }
            Err(e) => {
                attempts += 1;

                if max_attempts > 0 && attempts >= max_attempts {
                    error!(
                        port = %config.port,
                        attempts,
                        error = %e,
                        "giving up on serial port"
                    );
                    return Err(TransportError::RetriesExhausted {
                        port: config.port.clone(),
                        attempts,
                    });
                }

                if let Some(delay) = backoff.next_backoff() {
                    warn!(
                        port = %config.port,
                        attempt = attempts,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "serial open failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                } else {
                    backoff.reset();
                }
            }
        }
    }
}

fn try_open(config: &SerialConfig) -> Result<SerialStream, TransportError> {
    tokio_serial::new(&config.port, config.baud)
        .data_bits(DataBits::Eight)
        .parity(parity_from(&config.parity))
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .open_native_async()
        .map_err(|source| TransportError::Open {
            port: config.port.clone(),
            source,
        })
}

fn parity_from(value: &str) -> Parity {
    match value.to_ascii_lowercase().as_str() {
        "odd" => Parity::Odd,
        "even" => Parity::Even,
        _ => Parity::None,
    }
}

/// Names of serial ports currently visible on the system. Enumeration
/// failure is reported as an empty list, not an error.
pub fn available_ports() -> Vec<String> {
    match tokio_serial::available_ports() {
        Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
        Err(e) => {
            warn!(error = %e, "could not enumerate serial ports");
            Vec::new()
        }
    }
}
