//! Diesel row structs for `rack_state` and `rack_schedule`, and their
//! conversion to and from the domain types.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::warn;

use crate::db::store::StoreError;
use crate::models::rack::{Channel, Mode, RackId, RackSchedule, RackState};
use crate::schema;

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = schema::rack_state)]
pub struct RackStateRow {
    pub rack_id: i32,
    pub light_on: bool,
    pub water_on: bool,
    pub light_mode: String,
    pub water_mode: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::rack_state)]
pub struct NewRackState {
    pub rack_id: i32,
    pub light_on: bool,
    pub water_on: bool,
    pub light_mode: String,
    pub water_mode: String,
}

/// Partial update of a `rack_state` row; `None` columns are left alone.
#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = schema::rack_state)]
pub struct RackStateChanges {
    pub light_on: Option<bool>,
    pub water_on: Option<bool>,
    pub light_mode: Option<String>,
    pub water_mode: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl RackStateChanges {
    pub fn channel(channel: Channel, mode: Option<Mode>, on: Option<bool>) -> Self {
        let mode = mode.map(|m| m.as_str().to_string());
        let mut changes = RackStateChanges {
            updated_at: Some(Utc::now()),
            ..Default::default()
        };
        match channel {
            Channel::Light => {
                changes.light_on = on;
                changes.light_mode = mode;
            }
            Channel::Water => {
                changes.water_on = on;
                changes.water_mode = mode;
            }
        }
        changes
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = schema::rack_schedule)]
pub struct RackScheduleRow {
    pub rack_id: i32,
    pub schedule_json: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::rack_schedule)]
pub struct NewRackSchedule {
    pub rack_id: i32,
    pub schedule_json: serde_json::Value,
}

fn rack_id_of(raw: i32) -> Result<RackId, StoreError> {
    u8::try_from(raw).map(RackId).map_err(|_| StoreError::InvalidRow {
        rack_id: raw,
        reason: "rack id out of range".into(),
    })
}

impl TryFrom<RackStateRow> for RackState {
    type Error = StoreError;

    fn try_from(row: RackStateRow) -> Result<Self, Self::Error> {
        let mode = |raw: &str| {
            raw.parse::<Mode>().map_err(|reason| StoreError::InvalidRow {
                rack_id: row.rack_id,
                reason,
            })
        };
        Ok(RackState {
            rack_id: rack_id_of(row.rack_id)?,
            light_on: row.light_on,
            water_on: row.water_on,
            light_mode: mode(&row.light_mode)?,
            water_mode: mode(&row.water_mode)?,
        })
    }
}

impl From<&RackState> for NewRackState {
    fn from(state: &RackState) -> Self {
        NewRackState {
            rack_id: i32::from(state.rack_id.0),
            light_on: state.light_on,
            water_on: state.water_on,
            light_mode: state.light_mode.as_str().to_string(),
            water_mode: state.water_mode.as_str().to_string(),
        }
    }
}

impl RackScheduleRow {
    /// Decode the stored schedule. Bad entries inside a day are dropped by
    /// the schedule decoder itself; a document that is not a schedule at all
    /// is logged and read as empty.
    pub fn into_schedule(self) -> Result<(RackId, RackSchedule), StoreError> {
        let rack_id = rack_id_of(self.rack_id)?;
        let schedule = match serde_json::from_value::<RackSchedule>(self.schedule_json) {
            Ok(s) => s,
            Err(e) => {
                warn!("Rack {}: unreadable schedule, treating as empty: {}", rack_id, e);
                RackSchedule::default()
            }
        };
        Ok((rack_id, schedule))
    }
}

impl NewRackSchedule {
    pub fn new(rack_id: RackId, schedule: &RackSchedule) -> Result<Self, StoreError> {
        Ok(NewRackSchedule {
            rack_id: i32::from(rack_id.0),
            schedule_json: serde_json::to_value(schedule)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(light_mode: &str) -> RackStateRow {
        RackStateRow {
            rack_id: 3,
            light_on: true,
            water_on: false,
            light_mode: light_mode.into(),
            water_mode: "schedule".into(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn state_row_round_trips_through_domain() {
        let state = RackState::try_from(row("manual")).unwrap();
        assert_eq!(state.rack_id, RackId(3));
        assert_eq!(state.light_mode, Mode::Manual);
        assert!(state.light_on);

        let new_row = NewRackState::from(&state);
        assert_eq!(new_row.rack_id, 3);
        assert_eq!(new_row.light_mode, "manual");
        assert_eq!(new_row.water_mode, "schedule");
    }

    #[test]
    fn unknown_mode_is_an_invalid_row() {
        let err = RackState::try_from(row("auto")).unwrap_err();
        assert!(matches!(err, StoreError::InvalidRow { rack_id: 3, .. }));
    }

    #[test]
    fn changes_touch_only_one_channel() {
        let changes = RackStateChanges::channel(Channel::Water, Some(Mode::Manual), Some(true));
        assert_eq!(changes.water_on, Some(true));
        assert_eq!(changes.water_mode.as_deref(), Some("manual"));
        assert_eq!(changes.light_on, None);
        assert_eq!(changes.light_mode, None);
    }

    #[test]
    fn unreadable_schedule_document_reads_as_empty() {
        let row = RackScheduleRow {
            rack_id: 1,
            schedule_json: json!(["not", "a", "schedule"]),
            updated_at: Utc::now(),
        };
        let (rack_id, schedule) = row.into_schedule().unwrap();
        assert_eq!(rack_id, RackId(1));
        assert_eq!(schedule, RackSchedule::default());
    }

    #[test]
    fn schedule_row_keeps_valid_entries() {
        let row = RackScheduleRow {
            rack_id: 2,
            schedule_json: json!({
                "light": {"mon": [{"start": "08:00", "end": "21:30"}, {"start": "bad"}]}
            }),
            updated_at: Utc::now(),
        };
        let (_, schedule) = row.into_schedule().unwrap();
        assert_eq!(schedule.light.ranges(crate::models::rack::WeekDay::Mon).len(), 1);
        assert!(schedule.water.is_empty());
    }

    #[test]
    fn bad_light_channel_keeps_water_schedule() {
        let row = RackScheduleRow {
            rack_id: 4,
            schedule_json: json!({
                "light": "garbage",
                "water": {"mon": [{"start": "06:00", "end": "06:15"}]}
            }),
            updated_at: Utc::now(),
        };
        let (_, schedule) = row.into_schedule().unwrap();
        assert!(schedule.light.is_empty());
        assert_eq!(schedule.water.ranges(crate::models::rack::WeekDay::Mon).len(), 1);
    }
}
