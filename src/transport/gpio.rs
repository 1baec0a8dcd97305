//! Relay board wired straight to digital outputs.
//!
//! On host/test: generic over any `embedded_hal` output pin.
//! On the controller: Linux sysfs GPIO lines ([`SysfsPin`]).
//!
//! Channel policy: a channel outside `1..=16` is rejected; a channel in range
//! without a configured pin is a silent no-op.

use super::{RelayTransport, TransportError, check_channel};
use embedded_hal::digital::{self, ErrorKind, ErrorType, OutputPin};
use log::debug;
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::PathBuf;

const SYSFS_GPIO: &str = "/sys/class/gpio";

pub struct GpioRelay<P: OutputPin> {
    pins: BTreeMap<u8, P>,
    active_low: bool,
}

impl<P> GpioRelay<P>
where
    P: OutputPin,
    P::Error: Display,
{
    /// Take ownership of the pins and drive every relay to off.
    pub fn new(pins: BTreeMap<u8, P>, active_low: bool) -> Result<Self, TransportError> {
        if let Some(&channel) = pins.keys().find(|&&ch| check_channel(ch).is_err()) {
            return Err(TransportError::InvalidChannel(channel));
        }
        let mut relay = GpioRelay { pins, active_low };
        let channels: Vec<u8> = relay.pins.keys().copied().collect();
        for channel in channels {
            relay.set(channel, false)?;
        }
        Ok(relay)
    }
}

impl<P> RelayTransport for GpioRelay<P>
where
    P: OutputPin,
    P::Error: Display,
{
    fn set(&mut self, channel: u8, on: bool) -> Result<(), TransportError> {
        check_channel(channel)?;
        let Some(pin) = self.pins.get_mut(&channel) else {
            debug!("GPIO: channel {} has no pin, ignoring", channel);
            return Ok(());
        };
        let result = if on != self.active_low {
            pin.set_high()
        } else {
            pin.set_low()
        };
        result.map_err(|e| TransportError::Gpio(format!("channel {}: {}", channel, e)))
    }
}

/// Output line exported through `/sys/class/gpio`.
pub struct SysfsPin {
    value: File,
}

#[derive(Debug)]
pub struct SysfsPinError(io::Error);

impl Display for SysfsPinError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "sysfs write failed: {}", self.0)
    }
}

impl std::error::Error for SysfsPinError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

impl digital::Error for SysfsPinError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

impl SysfsPin {
    pub fn export(line: u32) -> io::Result<Self> {
        let dir = PathBuf::from(SYSFS_GPIO).join(format!("gpio{}", line));
        if !dir.exists() {
            fs::write(PathBuf::from(SYSFS_GPIO).join("export"), line.to_string())?;
        }
        fs::write(dir.join("direction"), "out")?;
        let value = OpenOptions::new().write(true).open(dir.join("value"))?;
        Ok(SysfsPin { value })
    }

    fn write_level(&mut self, level: &[u8]) -> Result<(), SysfsPinError> {
        self.value.seek(SeekFrom::Start(0)).map_err(SysfsPinError)?;
        self.value.write_all(level).map_err(SysfsPinError)
    }
}

impl ErrorType for SysfsPin {
    type Error = SysfsPinError;
}

impl OutputPin for SysfsPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.write_level(b"0")
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.write_level(b"1")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::convert::Infallible;
    use std::rc::Rc;

    /// Pin that logs every level it is driven to.
    struct LoggedPin {
        id: u8,
        log: Rc<RefCell<Vec<(u8, bool)>>>,
    }

    impl ErrorType for LoggedPin {
        type Error = Infallible;
    }

    impl OutputPin for LoggedPin {
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.log.borrow_mut().push((self.id, false));
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Infallible> {
            self.log.borrow_mut().push((self.id, true));
            Ok(())
        }
    }

    fn board(active_low: bool, channels: &[u8]) -> (GpioRelay<LoggedPin>, Rc<RefCell<Vec<(u8, bool)>>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let pins = channels
            .iter()
            .map(|&id| (id, LoggedPin { id, log: log.clone() }))
            .collect();
        let relay = GpioRelay::new(pins, active_low).expect("valid pins");
        (relay, log)
    }

    #[test]
    fn pins_start_off() {
        let (_, log) = board(true, &[1, 2]);
        // Active-low boards are "off" at a high level.
        assert_eq!(*log.borrow(), vec![(1, true), (2, true)]);
    }

    #[test]
    fn active_low_inverts_levels() {
        let (mut relay, log) = board(true, &[4]);
        log.borrow_mut().clear();
        relay.set(4, true).unwrap();
        relay.set(4, false).unwrap();
        assert_eq!(*log.borrow(), vec![(4, false), (4, true)]);
    }

    #[test]
    fn active_high_drives_directly() {
        let (mut relay, log) = board(false, &[4]);
        log.borrow_mut().clear();
        relay.set(4, true).unwrap();
        assert_eq!(*log.borrow(), vec![(4, true)]);
    }

    #[test]
    fn unmapped_channel_is_a_silent_no_op() {
        let (mut relay, log) = board(false, &[1]);
        log.borrow_mut().clear();
        assert!(relay.set(7, true).is_ok());
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn out_of_range_channel_is_rejected() {
        let (mut relay, _) = board(false, &[1]);
        assert!(matches!(relay.set(17, true), Err(TransportError::InvalidChannel(17))));
        assert!(matches!(relay.set(0, true), Err(TransportError::InvalidChannel(0))));
    }

    /// Pin whose line has gone away.
    struct DeadPin;

    impl ErrorType for DeadPin {
        type Error = SysfsPinError;
    }

    impl OutputPin for DeadPin {
        fn set_low(&mut self) -> Result<(), SysfsPinError> {
            Err(SysfsPinError(io::Error::other("line 17 unexported")))
        }

        fn set_high(&mut self) -> Result<(), SysfsPinError> {
            self.set_low()
        }
    }

    #[test]
    fn pin_failure_carries_the_io_cause() {
        let relay = GpioRelay::new(BTreeMap::from([(3, DeadPin)]), false);
        match relay {
            Err(TransportError::Gpio(msg)) => {
                assert_eq!(msg, "channel 3: sysfs write failed: line 17 unexported");
            }
            _ => panic!("expected a GPIO error"),
        }
    }

    #[test]
    fn pin_on_invalid_channel_is_refused() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut pins = BTreeMap::new();
        pins.insert(20, LoggedPin { id: 20, log });
        assert!(matches!(GpioRelay::new(pins, false), Err(TransportError::InvalidChannel(20))));
    }
}
