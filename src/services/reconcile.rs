//! Reconciliation: drive every schedule-mode channel to what its schedule
//! says right now.
//!
//! A tick reads the full state, decides every change up front, writes the
//! relays and only then stores the new flags in one batch. If any relay write
//! fails the batch is dropped; the stale flags make the next tick decide the
//! same changes again, so a failed tick heals itself once the bus recovers.

use crate::db::store::{RackStore, StoreError};
use crate::models::rack::{Channel, ChannelUpdate, Mode, RackId, RackSchedule};
use crate::runtime::RuntimeContext;
use crate::services::evaluator;
use crate::transport::ChannelOutcome;
use crate::utils::{Clock, StopSignal};
use chrono::NaiveDateTime;
use log::{debug, error, info, warn};
use std::error::Error;
use std::fmt::{self, Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickChange {
    pub rack_id: RackId,
    pub channel: Channel,
    pub relay: u8,
    pub on: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Schedule-mode channels evaluated.
    pub evaluated: usize,
    pub changes: Vec<TickChange>,
    /// Flags actually stored; lower than `changes.len()` when a channel was
    /// switched to manual while the tick ran.
    pub persisted: usize,
}

#[derive(Debug)]
pub enum TickError {
    Store(StoreError),
    /// Relay writes that failed; nothing was persisted.
    Hardware { failures: Vec<ChannelOutcome> },
}

impl Display for TickError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TickError::Store(e) => write!(f, "storage: {}", e),
            TickError::Hardware { failures } => {
                write!(f, "{} relay write(s) failed:", failures.len())?;
                for outcome in failures {
                    if let Err(e) = &outcome.result {
                        write!(f, " [channel {}: {}]", outcome.channel, e)?;
                    }
                }
                Ok(())
            }
        }
    }
}

impl Error for TickError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TickError::Store(e) => Some(e),
            TickError::Hardware { .. } => None,
        }
    }
}

impl From<StoreError> for TickError {
    fn from(value: StoreError) -> Self {
        TickError::Store(value)
    }
}

/// One reconciliation pass at `now`.
pub fn tick(ctx: &RuntimeContext, store: &mut dyn RackStore, now: NaiveDateTime) -> Result<TickReport, TickError> {
    let states = store.load_all_rack_states()?;
    let schedules = store.load_all_schedules()?;
    let no_schedule = RackSchedule::default();

    let mut report = TickReport::default();
    for state in states.iter().filter(|s| (1..=ctx.racks_count()).contains(&s.rack_id.0)) {
        let schedule = schedules.get(&state.rack_id).unwrap_or(&no_schedule);
        for channel in Channel::ALL {
            if state.mode(channel) == Mode::Manual {
                continue;
            }
            report.evaluated += 1;
            let desired = evaluator::evaluate(schedule.channel(channel), now).active;
            if desired == state.is_on(channel) {
                continue;
            }
            let Some(relay) = ctx.relay_for(state.rack_id, channel) else {
                warn!("Rack {} {}: no relay mapped, skipping", state.rack_id, channel);
                continue;
            };
            report.changes.push(TickChange {
                rack_id: state.rack_id,
                channel,
                relay,
                on: desired,
            });
        }
    }

    let mut failures = Vec::new();
    for change in &report.changes {
        let result = ctx.relays.set(change.relay, change.on);
        if let Err(e) = &result {
            warn!(
                "Rack {} {}: relay {} -> {} failed: {}",
                change.rack_id,
                change.channel,
                change.relay,
                on_off(change.on),
                e
            );
            failures.push(ChannelOutcome {
                channel: change.relay,
                result,
            });
        }
    }
    if !failures.is_empty() {
        return Err(TickError::Hardware { failures });
    }
    if report.changes.is_empty() {
        return Ok(report);
    }

    let updates: Vec<ChannelUpdate> = report
        .changes
        .iter()
        .map(|c| ChannelUpdate {
            rack_id: c.rack_id,
            channel: c.channel,
            on: c.on,
        })
        .collect();
    report.persisted = store.apply_scheduled_updates(&updates)?;
    if report.persisted < updates.len() {
        debug!(
            "{} scheduled update(s) not stored: channel left schedule mode during the tick",
            updates.len() - report.persisted
        );
    }
    for change in &report.changes {
        info!(
            "Rack {} {} -> {} (relay {})",
            change.rack_id,
            change.channel,
            on_off(change.on),
            change.relay
        );
    }
    Ok(report)
}

fn on_off(on: bool) -> &'static str {
    if on { "on" } else { "off" }
}

/// Tick, then wait a full interval, until `stop` is set. A failed tick is
/// logged and retried on the next one.
pub fn run_loop(ctx: &RuntimeContext, store: &mut dyn RackStore, clock: &dyn Clock, stop: &StopSignal) {
    info!(
        "Reconciliation loop started: racks={}, interval={}s",
        ctx.racks_count(),
        ctx.tick_interval.as_secs()
    );
    while !stop.is_stopped() {
        match tick(ctx, store, clock.now()) {
            Ok(report) => debug!(
                "Tick: {} channel(s) evaluated, {} change(s)",
                report.evaluated,
                report.changes.len()
            ),
            Err(e) => error!("Tick failed: {}", e),
        }
        if stop.wait(ctx.tick_interval) {
            break;
        }
    }
    info!("Reconciliation loop stopped");
}
