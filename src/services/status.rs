//! Per-rack status for display: current flags plus "until"/"next" hints.

use crate::db::store::{RackStore, StoreError};
use crate::models::rack::{Channel, ChannelSchedule, Mode, RackId, RackSchedule, RackState};
use crate::services::evaluator;
use chrono::NaiveDateTime;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelStatus {
    pub on: bool,
    pub mode: Mode,
    /// `HH:MM` the running range ends; only while on under the schedule.
    pub until: Option<String>,
    /// `Mon 08:00` of the next range; only while off under the schedule.
    pub next: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RackStatus {
    pub rack_id: RackId,
    pub light: ChannelStatus,
    pub water: ChannelStatus,
}

pub fn channel_status(on: bool, mode: Mode, schedule: &ChannelSchedule, now: NaiveDateTime) -> ChannelStatus {
    let mut status = ChannelStatus {
        on,
        mode,
        until: None,
        next: None,
    };
    if mode == Mode::Schedule {
        if on {
            status.until = evaluator::active_until(schedule, now).map(|t| t.to_string());
        } else {
            status.next = evaluator::evaluate(schedule, now).next_start.map(|n| n.label());
        }
    }
    status
}

pub fn rack_status(state: &RackState, schedule: &RackSchedule, now: NaiveDateTime) -> RackStatus {
    let channel = |ch: Channel| channel_status(state.is_on(ch), state.mode(ch), schedule.channel(ch), now);
    RackStatus {
        rack_id: state.rack_id,
        light: channel(Channel::Light),
        water: channel(Channel::Water),
    }
}

/// Status of racks `1..=racks_count`, in rack order.
pub fn rack_statuses(
    store: &mut dyn RackStore,
    racks_count: u8,
    now: NaiveDateTime,
) -> Result<Vec<RackStatus>, StoreError> {
    let states = store.load_all_rack_states()?;
    let schedules = store.load_all_schedules()?;
    let no_schedule = RackSchedule::default();

    let mut statuses: Vec<RackStatus> = states
        .iter()
        .filter(|s| (1..=racks_count).contains(&s.rack_id.0))
        .map(|s| rack_status(s, schedules.get(&s.rack_id).unwrap_or(&no_schedule), now))
        .collect();
    statuses.sort_by_key(|s| s.rack_id);
    Ok(statuses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::memory::MemoryStore;
    use crate::models::rack::{TimeOfDay, TimeRange, WeekDay};
    use chrono::NaiveDate;
    use serde_json::json;

    fn monday(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 3).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    fn daytime() -> ChannelSchedule {
        ChannelSchedule::new().with_day(
            WeekDay::Mon,
            vec![TimeRange::new(TimeOfDay::new(8, 0).unwrap(), TimeOfDay::new(21, 30).unwrap())],
        )
    }

    #[test]
    fn on_under_schedule_shows_until() {
        let status = channel_status(true, Mode::Schedule, &daytime(), monday(10, 0));
        assert_eq!(status.until.as_deref(), Some("21:30"));
        assert_eq!(status.next, None);
    }

    #[test]
    fn off_under_schedule_shows_next() {
        let status = channel_status(false, Mode::Schedule, &daytime(), monday(22, 0));
        assert_eq!(status.until, None);
        assert_eq!(status.next.as_deref(), Some("Mon 08:00"));
    }

    #[test]
    fn manual_channels_have_no_hints() {
        let status = channel_status(true, Mode::Manual, &daytime(), monday(10, 0));
        assert_eq!(status.until, None);
        assert_eq!(status.next, None);
    }

    #[test]
    fn empty_schedule_has_no_next() {
        let status = channel_status(false, Mode::Schedule, &ChannelSchedule::new(), monday(10, 0));
        assert_eq!(status.next, None);
    }

    #[test]
    fn statuses_cover_configured_racks_only() {
        let mut store = MemoryStore::with_racks(3);
        store.schedules.get_mut(&RackId(1)).unwrap().light = daytime();
        store.state_mut(RackId(1)).light_on = true;

        let statuses = rack_statuses(&mut store, 2, monday(10, 0)).unwrap();
        assert_eq!(statuses.len(), 2);
        assert_eq!(
            serde_json::to_value(&statuses[0]).unwrap(),
            json!({
                "rack_id": 1,
                "light": {"on": true, "mode": "schedule", "until": "21:30", "next": null},
                "water": {"on": false, "mode": "schedule", "until": null, "next": null}
            })
        );
    }
}
