//! RS485 relay board over Modbus-RTU.
//!
//! Each channel is one holding register at `coil_base + channel`. The board
//! switches a relay on when `0x0100` is written and off on `0x0200`, using
//! function 0x06 (write single register).
//!
//! Wire format (request, and the echo the board sends back):
//! ```text
//! ┌───────┬──────┬──────────┬─────────┬─────────┐
//! │ slave │ 0x06 │ reg (BE) │ val (BE)│ crc (LE)│
//! │  1B   │  1B  │    2B    │   2B    │   2B    │
//! └───────┴──────┴──────────┴─────────┴─────────┘
//! ```
//! An exception reply is `[slave, 0x86, code, crc_lo, crc_hi]`.

use super::{RelayTransport, TransportError, check_channel};
use log::debug;
use std::io::{self, Read, Write};
use std::thread;
use std::time::Duration;

pub const RELAY_ON: u16 = 0x0100;
pub const RELAY_OFF: u16 = 0x0200;

const WRITE_SINGLE_REGISTER: u8 = 0x06;
const EXCEPTION_FLAG: u8 = 0x80;
const FRAME_LEN: usize = 8;
const EXCEPTION_LEN: usize = 5;

/// CRC-16/MODBUS (reflected poly 0xA001, init 0xFFFF).
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ 0xA001 } else { crc >> 1 };
        }
    }
    crc
}

fn append_crc(frame: &mut [u8]) {
    let body = frame.len() - 2;
    let [lo, hi] = crc16(&frame[..body]).to_le_bytes();
    frame[body] = lo;
    frame[body + 1] = hi;
}

fn verify_crc(frame: &[u8]) -> Result<(), TransportError> {
    let body = frame.len() - 2;
    let expected = crc16(&frame[..body]);
    let actual = u16::from_le_bytes([frame[body], frame[body + 1]]);
    if expected == actual {
        Ok(())
    } else {
        Err(TransportError::Crc { expected, actual })
    }
}

pub fn encode_write_register(slave: u8, register: u16, value: u16) -> [u8; FRAME_LEN] {
    let [reg_hi, reg_lo] = register.to_be_bytes();
    let [val_hi, val_lo] = value.to_be_bytes();
    let mut frame = [slave, WRITE_SINGLE_REGISTER, reg_hi, reg_lo, val_hi, val_lo, 0, 0];
    append_crc(&mut frame);
    frame
}

/// Check a complete normal reply against the request it answers.
pub fn check_write_reply(request: &[u8; FRAME_LEN], reply: &[u8; FRAME_LEN]) -> Result<(), TransportError> {
    verify_crc(reply)?;
    if reply != request {
        return Err(TransportError::UnexpectedResponse(format!(
            "reply {} does not echo request {}",
            hex(reply),
            hex(request)
        )));
    }
    Ok(())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join(" ")
}

/// Byte link to the bus.
pub trait Link: Read + Write {
    /// Drop any bytes already received.
    fn clear_input(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct ModbusRelay<L: Link> {
    link: L,
    slave_id: u8,
    coil_base: u16,
    settle: Duration,
}

impl<L: Link> ModbusRelay<L> {
    pub fn new(link: L, slave_id: u8, coil_base: u16, settle: Duration) -> Self {
        ModbusRelay {
            link,
            slave_id,
            coil_base,
            settle,
        }
    }

    pub fn register_for(&self, channel: u8) -> Result<u16, TransportError> {
        Ok(self.coil_base + u16::from(check_channel(channel)?))
    }

    fn transact(&mut self, request: &[u8; FRAME_LEN]) -> Result<(), TransportError> {
        self.link.clear_input()?;
        self.link.write_all(request)?;
        self.link.flush()?;

        let mut reply = [0u8; FRAME_LEN];
        self.link.read_exact(&mut reply[..2])?;
        if reply[0] != request[0] {
            return Err(TransportError::UnexpectedResponse(format!(
                "reply from slave {} while addressing slave {}",
                reply[0], request[0]
            )));
        }
        if reply[1] == WRITE_SINGLE_REGISTER | EXCEPTION_FLAG {
            self.link.read_exact(&mut reply[2..EXCEPTION_LEN])?;
            verify_crc(&reply[..EXCEPTION_LEN])?;
            return Err(TransportError::Exception {
                function: WRITE_SINGLE_REGISTER,
                code: reply[2],
            });
        }
        self.link.read_exact(&mut reply[2..])?;
        check_write_reply(request, &reply)
    }
}

impl<L: Link> RelayTransport for ModbusRelay<L> {
    fn set(&mut self, channel: u8, on: bool) -> Result<(), TransportError> {
        let register = self.register_for(channel)?;
        let value = if on { RELAY_ON } else { RELAY_OFF };
        let request = encode_write_register(self.slave_id, register, value);
        debug!("Modbus: tx {}", hex(&request));

        let result = self.transact(&request);
        // Bus turnaround for the board, whatever the outcome.
        if !self.settle.is_zero() {
            thread::sleep(self.settle);
        }
        result
    }
}
