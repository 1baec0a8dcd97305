//! Manual overrides. A channel in manual mode keeps the flag the user set
//! until it is handed back to its schedule.
//!
//! Entry points for a request layer embedded in the controller process; it
//! must share the process's `RuntimeContext` and relay worker.

use crate::db::store::{RackStore, StoreError};
use crate::models::rack::{Channel, Mode, RackId};
use crate::runtime::RuntimeContext;
use crate::transport::TransportError;
use log::{info, warn};
use std::error::Error;
use std::fmt::{self, Display, Formatter};

#[derive(Debug)]
pub enum OverrideError {
    UnknownRack(RackId),
    Store(StoreError),
    /// The flag was stored but the relay write failed.
    Hardware(TransportError),
}

impl Display for OverrideError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            OverrideError::UnknownRack(id) => write!(f, "unknown rack {}", id),
            OverrideError::Store(e) => write!(f, "storage: {}", e),
            OverrideError::Hardware(e) => write!(f, "relay: {}", e),
        }
    }
}

impl Error for OverrideError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            OverrideError::UnknownRack(_) => None,
            OverrideError::Store(e) => Some(e),
            OverrideError::Hardware(e) => Some(e),
        }
    }
}

impl From<StoreError> for OverrideError {
    fn from(value: StoreError) -> Self {
        OverrideError::Store(value)
    }
}

fn check_rack(ctx: &RuntimeContext, rack_id: RackId) -> Result<(), OverrideError> {
    if (1..=ctx.racks_count()).contains(&rack_id.0) {
        Ok(())
    } else {
        Err(OverrideError::UnknownRack(rack_id))
    }
}

/// Put a channel in manual mode with the given flag and switch its relay.
pub fn set_manual(
    ctx: &RuntimeContext,
    store: &mut dyn RackStore,
    rack_id: RackId,
    channel: Channel,
    on: bool,
) -> Result<(), OverrideError> {
    check_rack(ctx, rack_id)?;
    if !store.set_channel(rack_id, channel, Mode::Manual, Some(on))? {
        return Err(OverrideError::UnknownRack(rack_id));
    }
    info!("Rack {} {}: manual {}", rack_id, channel, if on { "on" } else { "off" });

    match ctx.relay_for(rack_id, channel) {
        Some(relay) => ctx.relays.set(relay, on).map_err(OverrideError::Hardware),
        None => {
            warn!("Rack {} {}: no relay mapped", rack_id, channel);
            Ok(())
        }
    }
}

/// Change only the mode. A channel handed back to its schedule is picked up
/// by the next tick.
pub fn set_mode(
    ctx: &RuntimeContext,
    store: &mut dyn RackStore,
    rack_id: RackId,
    channel: Channel,
    mode: Mode,
) -> Result<(), OverrideError> {
    check_rack(ctx, rack_id)?;
    if !store.set_channel(rack_id, channel, mode, None)? {
        return Err(OverrideError::UnknownRack(rack_id));
    }
    info!("Rack {} {}: mode {}", rack_id, channel, mode);
    Ok(())
}
