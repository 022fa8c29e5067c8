//! Daily time window gating binding firings

use chrono::{Datelike, NaiveDateTime, NaiveTime};
use serde::Deserialize;

use crate::errors::{SchedulerError, SchedulerResult};

#[derive(Debug, Deserialize)]
struct RawSchedule {
    start: String,
    end: String,
    #[serde(default)]
    days_of_week: Vec<i64>,
}

/// Window `[start, end)` on the listed weekdays (0 = Sunday).
///
/// An empty day list means every day. When `start > end` the window runs
/// past midnight and belongs to the day it opened on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingSchedule {
    start: NaiveTime,
    end: NaiveTime,
    days: [bool; 7],
}

impl BindingSchedule {
    /// Parse the persisted JSON form
    pub fn from_value(value: &serde_json::Value) -> SchedulerResult<Self> {
        let raw: RawSchedule = serde_json::from_value(value.clone())
            .map_err(|e| SchedulerError::invalid_schedule(format!("malformed schedule: {e}")))?;

        let start = parse_time(&raw.start)?;
        let end = parse_time(&raw.end)?;

        let mut days = [raw.days_of_week.is_empty(); 7];
        for day in raw.days_of_week {
            let idx = usize::try_from(day)
                .ok()
                .filter(|d| *d < 7)
                .ok_or_else(|| {
                    SchedulerError::invalid_schedule(format!("day of week {day} out of range 0-6"))
                })?;
            days[idx] = true;
        }

        Ok(Self { start, end, days })
    }

    /// Whether a firing at local time `now` falls inside the window
    pub fn admits(&self, now: NaiveDateTime) -> bool {
        let time = now.time();
        let today = now.weekday().num_days_from_sunday() as usize;

        if self.start <= self.end {
            return self.start <= time && time < self.end && self.days[today];
        }

        if time >= self.start {
            self.days[today]
        } else if time < self.end {
            self.days[(today + 6) % 7]
        } else {
            false
        }
    }
}

fn parse_time(value: &str) -> SchedulerResult<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .map_err(|_| SchedulerError::invalid_schedule(format!("invalid time '{value}'")))
}
