//! Relay output transports.
//!
//! - `modbus`: 16-channel RS485 relay board (Modbus-RTU, write single register).
//! - `serial`: opens the serial line used by the Modbus backend.
//! - `gpio`: direct digital outputs, one pin per relay channel.
//! - `worker`: single-owner thread that serializes every write to the bus.
//!
//! Every backend implements [`RelayTransport`]. Writes are idempotent: setting
//! a channel to the level it already has is harmless.

pub mod gpio;
pub mod modbus;
pub mod serial;
pub mod worker;

use log::warn;
use std::fmt;
use std::io;

/// Relay channels are numbered `1..=CHANNEL_COUNT`.
pub const CHANNEL_COUNT: u8 = 16;

#[derive(Debug)]
pub enum TransportError {
    /// Channel number outside `1..=16`; nothing was sent.
    InvalidChannel(u8),
    Io(io::Error),
    /// No (complete) reply within the configured timeout.
    Timeout,
    Crc { expected: u16, actual: u16 },
    UnexpectedResponse(String),
    /// The device answered with a Modbus exception.
    Exception { function: u8, code: u8 },
    Gpio(String),
    /// The worker queue is full.
    Busy,
    /// The worker thread is gone.
    Disconnected,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::InvalidChannel(ch) => {
                write!(f, "invalid relay channel {} (expected 1..={})", ch, CHANNEL_COUNT)
            }
            TransportError::Io(e) => write!(f, "io error: {}", e),
            TransportError::Timeout => write!(f, "timed out waiting for relay reply"),
            TransportError::Crc { expected, actual } => {
                write!(f, "crc mismatch: expected {:#06x}, got {:#06x}", expected, actual)
            }
            TransportError::UnexpectedResponse(s) => write!(f, "unexpected response: {}", s),
            TransportError::Exception { function, code } => {
                write!(f, "modbus exception {:#04x} for function {:#04x}", code, function)
            }
            TransportError::Gpio(s) => write!(f, "gpio error: {}", s),
            TransportError::Busy => write!(f, "relay queue is full"),
            TransportError::Disconnected => write!(f, "relay worker is not running"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(value: io::Error) -> Self {
        match value.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::UnexpectedEof => {
                TransportError::Timeout
            }
            _ => TransportError::Io(value),
        }
    }
}

pub fn check_channel(channel: u8) -> Result<u8, TransportError> {
    if (1..=CHANNEL_COUNT).contains(&channel) {
        Ok(channel)
    } else {
        Err(TransportError::InvalidChannel(channel))
    }
}

/// Result of one channel of a best-effort fan-out.
#[derive(Debug)]
pub struct ChannelOutcome {
    pub channel: u8,
    pub result: Result<(), TransportError>,
}

impl ChannelOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Switch every channel off, one at a time, attempting all of them whatever
/// fails. Failures are logged and returned.
pub fn switch_all_off(mut set: impl FnMut(u8) -> Result<(), TransportError>) -> Vec<ChannelOutcome> {
    (1..=CHANNEL_COUNT)
        .map(|channel| {
            let result = set(channel);
            if let Err(e) = &result {
                warn!("Relay: failed to switch off channel {}: {}", channel, e);
            }
            ChannelOutcome { channel, result }
        })
        .collect()
}

pub trait RelayTransport {
    fn set(&mut self, channel: u8, on: bool) -> Result<(), TransportError>;

    fn all_off(&mut self) -> Vec<ChannelOutcome> {
        switch_all_off(|channel| self.set(channel, false))
    }
}
