//! Fail-safe startup: force every relay off, then write and store the state
//! each channel should have right now. Runs once before the control loop.

use crate::db::store::{RackStore, StoreError};
use crate::models::rack::{Channel, Mode, RackSchedule};
use crate::runtime::RuntimeContext;
use crate::services::evaluator;
use chrono::NaiveDateTime;
use log::{info, warn};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResyncReport {
    /// Channels successfully switched off by the initial reset.
    pub forced_off: usize,
    /// Channels the reset could not switch off.
    pub reset_failures: Vec<u8>,
    /// Relays whose desired state could not be written.
    pub write_failures: Vec<u8>,
    pub states_written: usize,
}

/// Storage errors are returned; the loop must not start on unknown state.
/// Relay failures are logged and reported only.
pub fn startup_resync(
    ctx: &RuntimeContext,
    store: &mut dyn RackStore,
    now: NaiveDateTime,
) -> Result<ResyncReport, StoreError> {
    let mut report = ResyncReport::default();

    for outcome in ctx.relays.all_off() {
        if outcome.is_ok() {
            report.forced_off += 1;
        } else {
            report.reset_failures.push(outcome.channel);
        }
    }

    let states = store.load_all_rack_states()?;
    let schedules = store.load_all_schedules()?;
    let no_schedule = RackSchedule::default();

    let mut resolved = Vec::new();
    for state in states.iter().filter(|s| (1..=ctx.racks_count()).contains(&s.rack_id.0)) {
        let schedule = schedules.get(&state.rack_id).unwrap_or(&no_schedule);
        let mut next = state.clone();
        for channel in Channel::ALL {
            let mode = state.mode(channel);
            let desired = match mode {
                Mode::Manual => state.is_on(channel),
                Mode::Schedule => evaluator::evaluate(schedule.channel(channel), now).active,
            };
            let failed = match ctx.relay_for(state.rack_id, channel) {
                Some(relay) => match ctx.relays.set(relay, desired) {
                    Ok(()) => false,
                    Err(e) => {
                        warn!("Rack {} {}: startup write to relay {} failed: {}", state.rack_id, channel, relay, e);
                        report.write_failures.push(relay);
                        true
                    }
                },
                None => {
                    warn!("Rack {} {}: no relay mapped", state.rack_id, channel);
                    false
                }
            };
            // Manual flags are the user's intent. A schedule channel whose
            // write failed is stored inverted so the loop retries it.
            let stored = match mode {
                Mode::Manual => desired,
                Mode::Schedule => desired != failed,
            };
            next.set_on(channel, stored);
        }
        resolved.push(next);
    }

    store.persist_rack_states(&resolved)?;
    report.states_written = resolved.len();

    info!(
        "Startup resync: {} channel(s) forced off ({} failed), {} rack(s) written, {} write failure(s)",
        report.forced_off,
        report.reset_failures.len(),
        report.states_written,
        report.write_failures.len()
    );
    Ok(report)
}
