//! Serial line for the RS485 relay board.

use super::TransportError;
use super::modbus::Link;
use crate::config::{Parity, Rs485Config};
use serialport::{ClearBuffer, DataBits, SerialPort, StopBits};
use std::io::{self, Read, Write};

pub struct SerialLink {
    port: Box<dyn SerialPort>,
}

impl Read for SerialLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl Link for SerialLink {
    fn clear_input(&mut self) -> io::Result<()> {
        self.port.clear(ClearBuffer::Input).map_err(io::Error::from)
    }
}

fn data_bits(bytesize: u8) -> Result<DataBits, TransportError> {
    match bytesize {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        other => Err(TransportError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("unsupported byte size {}", other),
        ))),
    }
}

fn stop_bits(stopbits: u8) -> Result<StopBits, TransportError> {
    match stopbits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        other => Err(TransportError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("unsupported stop bits {}", other),
        ))),
    }
}

fn parity(parity: Parity) -> serialport::Parity {
    match parity {
        Parity::None => serialport::Parity::None,
        Parity::Even => serialport::Parity::Even,
        Parity::Odd => serialport::Parity::Odd,
    }
}

pub fn open(cfg: &Rs485Config) -> Result<SerialLink, TransportError> {
    let port = serialport::new(cfg.port.as_str(), cfg.baudrate)
        .data_bits(data_bits(cfg.bytesize)?)
        .stop_bits(stop_bits(cfg.stopbits)?)
        .parity(parity(cfg.parity))
        .timeout(cfg.timeout)
        .open()
        .map_err(|e| TransportError::Io(io::Error::from(e)))?;
    Ok(SerialLink { port })
}
