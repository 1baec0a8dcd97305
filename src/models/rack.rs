//! Rack, channel and weekly schedule types.
//!
//! Notes
//! - Time-of-day values are wall-clock `HH:MM` without seconds.
//! - The persisted schedule format is, per channel, a map from weekday keys
//!   (`mon`..`sun`) to ordered lists of `{"start": "HH:MM", "end": "HH:MM"}`.
//!   Decoding is lenient per entry: an entry with a missing or unparsable
//!   bound is dropped and the rest of the day is kept. Absent days are empty,
//!   and so is a channel whose value is not a map.

use chrono::{NaiveTime, Timelike, Weekday};
use log::debug;
use serde::de::{self, Deserializer, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Highest rack id and highest relay channel number.
pub const MAX_RACKS: u8 = 16;
pub const MAX_RELAY_CHANNEL: u8 = 16;

// =====================
// Identifiers and enums
// =====================

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RackId(pub u8);

impl fmt::Display for RackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Light,
    Water,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Light, Channel::Water];

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Light => "light",
            Channel::Water => "water",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Manual,
    Schedule,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Manual => "manual",
            Mode::Schedule => "schedule",
        }
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Mode::Manual),
            "schedule" => Ok(Mode::Schedule),
            other => Err(format!("unknown mode {:?}", other)),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Day of the week, Monday first. Ordering follows the week.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeekDay {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl WeekDay {
    pub const ALL: [WeekDay; 7] = [
        WeekDay::Mon,
        WeekDay::Tue,
        WeekDay::Wed,
        WeekDay::Thu,
        WeekDay::Fri,
        WeekDay::Sat,
        WeekDay::Sun,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Storage key (`mon`, `tue`, ...).
    pub fn key(self) -> &'static str {
        match self {
            WeekDay::Mon => "mon",
            WeekDay::Tue => "tue",
            WeekDay::Wed => "wed",
            WeekDay::Thu => "thu",
            WeekDay::Fri => "fri",
            WeekDay::Sat => "sat",
            WeekDay::Sun => "sun",
        }
    }

    /// Display name used in UI hints (`Mon`, `Tue`, ...).
    pub fn short_name(self) -> &'static str {
        match self {
            WeekDay::Mon => "Mon",
            WeekDay::Tue => "Tue",
            WeekDay::Wed => "Wed",
            WeekDay::Thu => "Thu",
            WeekDay::Fri => "Fri",
            WeekDay::Sat => "Sat",
            WeekDay::Sun => "Sun",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        WeekDay::ALL.into_iter().find(|d| d.key() == key)
    }

    /// The day `days` after this one, wrapping around the week.
    pub fn offset(self, days: u32) -> Self {
        WeekDay::ALL[(self.index() + days as usize) % 7]
    }

    pub fn previous(self) -> Self {
        self.offset(6)
    }
}

impl From<Weekday> for WeekDay {
    fn from(value: Weekday) -> Self {
        WeekDay::ALL[value.num_days_from_monday() as usize]
    }
}

impl fmt::Display for WeekDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

// =====================
// Time of day and ranges
// =====================

/// Wall-clock time of day with minute precision, serialized as `HH:MM`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay(NaiveTime);

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(TimeOfDay)
    }

    /// Parse `H:MM` / `HH:MM`, surrounding whitespace ignored.
    pub fn parse(raw: &str) -> Option<Self> {
        let (h, m) = raw.trim().split_once(':')?;
        let digits = |s: &str| !s.is_empty() && s.len() <= 2 && s.bytes().all(|b| b.is_ascii_digit());
        if !digits(h) || !digits(m) {
            return None;
        }
        TimeOfDay::new(h.parse().ok()?, m.parse().ok()?)
    }

    pub fn as_naive(self) -> NaiveTime {
        self.0
    }

    pub fn hour(self) -> u32 {
        self.0.hour()
    }

    pub fn minute(self) -> u32 {
        self.0.minute()
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct V;
        impl<'de> Visitor<'de> for V {
            type Value = TimeOfDay;
            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a time of day formatted as HH:MM")
            }
            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                TimeOfDay::parse(v).ok_or_else(|| E::invalid_value(de::Unexpected::Str(v), &self))
            }
        }
        deserializer.deserialize_str(V)
    }
}

/// A daily on-window. `end <= start` means the window crosses midnight.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

impl TimeRange {
    pub fn new(start: TimeOfDay, end: TimeOfDay) -> Self {
        TimeRange { start, end }
    }

    pub fn crosses_midnight(&self) -> bool {
        self.end <= self.start
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

// =====================
// Schedules
// =====================

/// Weekly schedule of one channel. List order within a day is the
/// evaluation order; ranges may overlap and need not be sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelSchedule {
    days: BTreeMap<WeekDay, Vec<TimeRange>>,
}

impl ChannelSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ranges(&self, day: WeekDay) -> &[TimeRange] {
        self.days.get(&day).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn set_day(&mut self, day: WeekDay, ranges: Vec<TimeRange>) {
        if ranges.is_empty() {
            self.days.remove(&day);
        } else {
            self.days.insert(day, ranges);
        }
    }

    pub fn with_day(mut self, day: WeekDay, ranges: Vec<TimeRange>) -> Self {
        self.set_day(day, ranges);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.days.values().all(Vec::is_empty)
    }
}

impl Serialize for ChannelSchedule {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        // Always emit all seven keys so readers never see a missing day.
        let mut map = serializer.serialize_map(Some(WeekDay::ALL.len()))?;
        for day in WeekDay::ALL {
            map.serialize_entry(day.key(), self.ranges(day))?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ChannelSchedule {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let days = match Value::deserialize(deserializer)? {
            Value::Object(days) => days,
            Value::Null => Default::default(),
            other => {
                debug!("Schedule: ignoring non-object channel schedule {}", other);
                Default::default()
            }
        };
        let mut schedule = ChannelSchedule::new();
        for (key, entries) in days {
            let Some(day) = WeekDay::from_key(&key) else {
                debug!("Schedule: ignoring unknown day key {:?}", key);
                continue;
            };
            let Value::Array(entries) = entries else {
                debug!("Schedule: ignoring non-list entries for {}", key);
                continue;
            };
            let ranges = entries
                .into_iter()
                .filter_map(|entry| match serde_json::from_value::<TimeRange>(entry) {
                    Ok(range) => Some(range),
                    Err(e) => {
                        debug!("Schedule: skipping malformed range on {}: {}", key, e);
                        None
                    }
                })
                .collect();
            schedule.set_day(day, ranges);
        }
        Ok(schedule)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RackSchedule {
    #[serde(default)]
    pub light: ChannelSchedule,
    #[serde(default)]
    pub water: ChannelSchedule,
}

impl RackSchedule {
    pub fn channel(&self, channel: Channel) -> &ChannelSchedule {
        match channel {
            Channel::Light => &self.light,
            Channel::Water => &self.water,
        }
    }
}

// =====================
// State
// =====================

/// Last-known logical state of a rack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RackState {
    pub rack_id: RackId,
    pub light_on: bool,
    pub water_on: bool,
    pub light_mode: Mode,
    pub water_mode: Mode,
}

impl RackState {
    /// Fresh rack: schedule mode, everything off.
    pub fn new(rack_id: RackId) -> Self {
        RackState {
            rack_id,
            light_on: false,
            water_on: false,
            light_mode: Mode::Schedule,
            water_mode: Mode::Schedule,
        }
    }

    pub fn is_on(&self, channel: Channel) -> bool {
        match channel {
            Channel::Light => self.light_on,
            Channel::Water => self.water_on,
        }
    }

    pub fn mode(&self, channel: Channel) -> Mode {
        match channel {
            Channel::Light => self.light_mode,
            Channel::Water => self.water_mode,
        }
    }

    pub fn set_on(&mut self, channel: Channel, on: bool) {
        match channel {
            Channel::Light => self.light_on = on,
            Channel::Water => self.water_on = on,
        }
    }

    pub fn set_mode(&mut self, channel: Channel, mode: Mode) {
        match channel {
            Channel::Light => self.light_mode = mode,
            Channel::Water => self.water_mode = mode,
        }
    }
}

/// A scheduled flag change produced by a reconciliation tick.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ChannelUpdate {
    pub rack_id: RackId,
    pub channel: Channel,
    pub on: bool,
}

// =====================
// Relay mapping
// =====================

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RackRelays {
    pub light_relay: u8,
    pub water_relay: u8,
}

impl RackRelays {
    pub fn relay(&self, channel: Channel) -> u8 {
        match channel {
            Channel::Light => self.light_relay,
            Channel::Water => self.water_relay,
        }
    }
}

/// Physical relay channel of every (rack, channel) pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayMap(BTreeMap<RackId, RackRelays>);

impl RelayMap {
    pub fn new(entries: BTreeMap<RackId, RackRelays>) -> Self {
        RelayMap(entries)
    }

    pub fn relay(&self, rack_id: RackId, channel: Channel) -> Option<u8> {
        self.0.get(&rack_id).map(|r| r.relay(channel))
    }

    /// Check the map for racks `1..=racks_count`: every rack mapped, every
    /// channel number within range and used by at most one (rack, channel).
    pub fn validate(&self, racks_count: u8) -> Result<(), String> {
        let mut seen: BTreeMap<u8, (RackId, Channel)> = BTreeMap::new();
        for id in 1..=racks_count {
            let rack_id = RackId(id);
            let relays = self
                .0
                .get(&rack_id)
                .ok_or_else(|| format!("rack {} has no relay mapping", rack_id))?;
            for channel in Channel::ALL {
                let relay = relays.relay(channel);
                if !(1..=MAX_RELAY_CHANNEL).contains(&relay) {
                    return Err(format!(
                        "rack {} {} relay {} is outside 1..={}",
                        rack_id, channel, relay, MAX_RELAY_CHANNEL
                    ));
                }
                if let Some((other_rack, other_channel)) = seen.insert(relay, (rack_id, channel)) {
                    return Err(format!(
                        "relay {} assigned to both rack {} {} and rack {} {}",
                        relay, other_rack, other_channel, rack_id, channel
                    ));
                }
            }
        }
        Ok(())
    }
}
