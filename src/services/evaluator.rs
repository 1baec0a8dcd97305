//! Weekly schedule evaluation: (channel schedule, instant) -> on/off plus the
//! next switch-on time.
//!
//! Policy
//! - Ranges of the current day are tried in list order; the first range that
//!   contains `now` wins even if a later one matches too.
//! - A range with `end <= start` crosses midnight. Listed on day D it covers
//!   D start..D+1 end; before its start time on D it is read as the early
//!   morning tail of the previous night (start D-1, end D).
//! - When no range of the current day matches, overnight ranges listed on the
//!   previous day are checked for their after-midnight tail.
//! - The next start is searched over the following 7 days (strictly after
//!   `now`, at most `now + 7 days`).

use crate::models::rack::{ChannelSchedule, TimeOfDay, TimeRange, WeekDay};
use chrono::{Datelike, Days, Duration, NaiveDate, NaiveDateTime};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NextStart {
    pub day: WeekDay,
    pub time: TimeOfDay,
    pub at: NaiveDateTime,
}

impl NextStart {
    /// UI label such as `Mon 08:00`.
    pub fn label(&self) -> String {
        format!("{} {}", self.day.short_name(), self.time)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleStatus {
    pub active: bool,
    pub active_range: Option<TimeRange>,
    pub next_start: Option<NextStart>,
}

pub fn evaluate(schedule: &ChannelSchedule, now: NaiveDateTime) -> ScheduleStatus {
    if let Some(range) = find_active(schedule, now) {
        return ScheduleStatus {
            active: true,
            active_range: Some(range),
            next_start: None,
        };
    }
    ScheduleStatus {
        active: false,
        active_range: None,
        next_start: next_start(schedule, now),
    }
}

/// End of the range `now` falls in, for "on until HH:MM" hints.
pub fn active_until(schedule: &ChannelSchedule, now: NaiveDateTime) -> Option<TimeOfDay> {
    find_active(schedule, now).map(|range| range.end)
}

fn find_active(schedule: &ChannelSchedule, now: NaiveDateTime) -> Option<TimeRange> {
    let today = WeekDay::from(now.weekday());
    let date = now.date();

    let hit = schedule.ranges(today).iter().find(|range| {
        let (start, end) = window_on(range, date, now);
        start <= now && now < end
    });
    if let Some(range) = hit {
        return Some(*range);
    }

    let yesterday = date.pred_opt()?;
    schedule
        .ranges(today.previous())
        .iter()
        .filter(|range| range.crosses_midnight())
        .find(|range| {
            let start = yesterday.and_time(range.start.as_naive());
            let end = date.and_time(range.end.as_naive());
            start <= now && now < end
        })
        .copied()
}

/// Concrete window of `range` listed on `date`, anchored around `now`.
fn window_on(range: &TimeRange, date: NaiveDate, now: NaiveDateTime) -> (NaiveDateTime, NaiveDateTime) {
    let mut start = date.and_time(range.start.as_naive());
    let mut end = date.and_time(range.end.as_naive());
    if end <= start {
        end += Duration::days(1);
        if now < start {
            start -= Duration::days(1);
            end -= Duration::days(1);
        }
    }
    (start, end)
}

fn next_start(schedule: &ChannelSchedule, now: NaiveDateTime) -> Option<NextStart> {
    let today = WeekDay::from(now.weekday());
    let horizon = now + Duration::days(7);
    let mut best: Option<NextStart> = None;

    // Offset 7 only matters for a start on today's weekday at or before `now`;
    // the horizon check keeps it inside the week.
    for offset in 0..=7u32 {
        let day = today.offset(offset);
        let Some(date) = now.date().checked_add_days(Days::new(u64::from(offset))) else {
            break;
        };
        for range in schedule.ranges(day) {
            let at = date.and_time(range.start.as_naive());
            if at <= now || at > horizon {
                continue;
            }
            if best.as_ref().is_none_or(|b| at < b.at) {
                best = Some(NextStart {
                    day,
                    time: range.start,
                    at,
                });
            }
        }
    }
    best
}
