//! Process-wide runtime context: validated hardware configuration plus the
//! handle to the relay worker. Built once in `main` and passed by reference
//! to startup, the control loop and override handlers.

use crate::config::{Config, HardwareConfig, TransportConfig};
use crate::models::rack::{Channel, RackId};
use crate::transport::gpio::{GpioRelay, SysfsPin};
use crate::transport::modbus::ModbusRelay;
use crate::transport::worker::{self, RelayHandle};
use crate::transport::{RelayTransport, TransportError, serial};
use log::info;
use std::collections::BTreeMap;
use std::time::Duration;

pub struct RuntimeContext {
    pub hardware: HardwareConfig,
    pub relays: RelayHandle,
    pub tick_interval: Duration,
}

impl RuntimeContext {
    pub fn new(
        hardware: HardwareConfig,
        transport: Box<dyn RelayTransport + Send>,
        reply_timeout: Duration,
        tick_interval: Duration,
    ) -> Result<Self, TransportError> {
        let relays = worker::spawn(transport, reply_timeout)?;
        Ok(RuntimeContext {
            hardware,
            relays,
            tick_interval,
        })
    }

    pub fn from_config(cfg: &Config, hardware: HardwareConfig) -> Result<Self, TransportError> {
        let transport = build_transport(&hardware.transport, cfg.relay_settle)?;
        let reply_timeout = reply_timeout(&hardware.transport, cfg.relay_settle);
        Self::new(hardware, transport, reply_timeout, cfg.tick_interval)
    }

    pub fn racks_count(&self) -> u8 {
        self.hardware.racks_count
    }

    pub fn relay_for(&self, rack_id: RackId, channel: Channel) -> Option<u8> {
        self.hardware.relays.relay(rack_id, channel)
    }
}

/// How long a caller waits on the worker for one write.
pub fn reply_timeout(transport: &TransportConfig, settle: Duration) -> Duration {
    let bus = match transport {
        TransportConfig::Rs485(rs) => rs.timeout,
        TransportConfig::Gpio { .. } => Duration::ZERO,
    };
    bus + settle + Duration::from_secs(1)
}

pub fn build_transport(
    transport: &TransportConfig,
    settle: Duration,
) -> Result<Box<dyn RelayTransport + Send>, TransportError> {
    match transport {
        TransportConfig::Rs485(rs) => {
            let link = serial::open(rs)?;
            info!(
                "Relay transport: Modbus-RTU on {} ({} baud, slave {}, coil_base {})",
                rs.port, rs.baudrate, rs.slave_id, rs.coil_base
            );
            Ok(Box::new(ModbusRelay::new(link, rs.slave_id, rs.coil_base, settle)))
        }
        TransportConfig::Gpio { pins, active_low } => {
            let mut outputs = BTreeMap::new();
            for (&channel, &line) in pins {
                outputs.insert(channel, SysfsPin::export(line)?);
            }
            info!(
                "Relay transport: GPIO ({} outputs, active_low={})",
                outputs.len(),
                active_low
            );
            Ok(Box::new(GpioRelay::new(outputs, *active_low)?))
        }
    }
}

#[cfg(test)]
pub mod testing {
    use super::RuntimeContext;
    use crate::config::{HardwareConfig, TransportConfig};
    use crate::models::rack::{RackId, RackRelays, RelayMap};
    use crate::transport::testing::{TestBoard, RecordingRelay};
    use std::collections::BTreeMap;
    use std::time::Duration;

    /// Context over a recording board. Rack `n` uses relays `2n-1` (light)
    /// and `2n` (water).
    pub fn context(racks_count: u8) -> (RuntimeContext, TestBoard) {
        let relays = (1..=racks_count)
            .map(|n| {
                (
                    RackId(n),
                    RackRelays {
                        light_relay: 2 * n - 1,
                        water_relay: 2 * n,
                    },
                )
            })
            .collect();
        let hardware = HardwareConfig {
            racks_count,
            relays: RelayMap::new(relays),
            transport: TransportConfig::Gpio {
                pins: BTreeMap::new(),
                active_low: false,
            },
        };
        let (relay, board) = RecordingRelay::new();
        let ctx = RuntimeContext::new(hardware, Box::new(relay), Duration::from_secs(1), Duration::from_millis(10))
            .expect("worker starts");
        (ctx, board)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Parity, Rs485Config};

    #[test]
    fn reply_timeout_covers_bus_and_settle() {
        let rs = TransportConfig::Rs485(Rs485Config {
            port: "/dev/null".into(),
            baudrate: 9600,
            parity: Parity::None,
            stopbits: 1,
            bytesize: 8,
            slave_id: 1,
            coil_base: 0,
            timeout: Duration::from_millis(500),
        });
        assert_eq!(
            reply_timeout(&rs, Duration::from_millis(30)),
            Duration::from_millis(1530)
        );
    }

    #[test]
    fn context_maps_racks_to_relays() {
        let (ctx, _) = testing::context(2);
        assert_eq!(ctx.racks_count(), 2);
        assert_eq!(ctx.relay_for(RackId(2), Channel::Light), Some(3));
        assert_eq!(ctx.relay_for(RackId(3), Channel::Light), None);
    }
}
