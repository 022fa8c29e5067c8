//! Workflow trigger configuration

use cron::Schedule;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::{SchedulerError, SchedulerResult};

#[derive(Debug, Default, Deserialize)]
struct TriggerConfig {
    #[serde(default)]
    schedule: Option<String>,
    #[serde(default)]
    interval_sec: Option<i64>,
}

/// How a scheduled workflow recurs
#[derive(Debug, Clone)]
pub enum Trigger {
    Cron {
        expression: String,
        schedule: Box<Schedule>,
    },
    Interval(Duration),
}

impl Trigger {
    /// Parse `{"schedule": "<cron>", "interval_sec": N}`; exactly one must be set
    pub fn from_config(value: Option<&serde_json::Value>) -> SchedulerResult<Self> {
        let value = value
            .filter(|v| !v.is_null())
            .ok_or_else(|| SchedulerError::invalid_trigger("no trigger configuration"))?;
        let config: TriggerConfig = serde_json::from_value(value.clone())
            .map_err(|e| SchedulerError::invalid_trigger(format!("malformed trigger: {e}")))?;

        let expression = config
            .schedule
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let interval = config.interval_sec.filter(|secs| *secs > 0);

        match (expression, interval) {
            (Some(expression), None) => Self::cron(&expression),
            (None, Some(secs)) => Ok(Self::Interval(Duration::from_secs(secs.unsigned_abs()))),
            (Some(_), Some(_)) => Err(SchedulerError::invalid_trigger(
                "both schedule and interval_sec specified",
            )),
            (None, None) => Err(SchedulerError::invalid_trigger(
                "no schedule or interval specified",
            )),
        }
    }

    /// Parse a cron expression; classic five-field crontab lines get a seconds field
    pub fn cron(expression: &str) -> SchedulerResult<Self> {
        let normalized = normalize_cron(expression);
        let schedule = Schedule::from_str(&normalized).map_err(|e| {
            SchedulerError::invalid_trigger(format!("invalid cron expression '{expression}': {e}"))
        })?;
        Ok(Self::Cron {
            expression: normalized,
            schedule: Box::new(schedule),
        })
    }
}

/// Crontab lines (`min hour dom month dow`, Sunday = 0 or 7) become the
/// six-field form the `cron` crate parses, where Sunday = 1.
fn normalize_cron(expression: &str) -> String {
    let expression = expression.trim();
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if expression.starts_with('@') || fields.len() != 5 {
        return expression.to_string();
    }
    format!(
        "0 {} {} {} {} {}",
        fields[0],
        fields[1],
        fields[2],
        fields[3],
        crontab_weekdays(fields[4])
    )
}

/// Shift numeric crontab weekdays (0-7) onto 1-7; names and `*` pass through
fn crontab_weekdays(field: &str) -> String {
    field
        .split(',')
        .map(|item| {
            let (base, step) = match item.split_once('/') {
                Some((base, step)) => (base, Some(step)),
                None => (item, None),
            };
            let base = match base.split_once('-') {
                Some((from, to)) => {
                    let (from, to) = (shift_weekday(from), shift_weekday(to));
                    // `5-7` ends on Sunday, which now sorts first
                    if step.is_none() && to == "1" && from != "1" {
                        return format!("{from}-7,1");
                    }
                    format!("{from}-{to}")
                }
                None => shift_weekday(base),
            };
            match step {
                Some(step) => format!("{base}/{step}"),
                None => base,
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn shift_weekday(day: &str) -> String {
    match day.parse::<u8>() {
        Ok(n) if n <= 7 => ((n % 7) + 1).to_string(),
        _ => day.to_string(),
    }
}
