//! Recurrence rules for scheduled tasks.

use crate::error::{CronError, CronResult};
use crate::expression::CronExpression;
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// When a task recurs. All times are UTC.
///
/// Persisted as a `schedule_type` tag plus a `schedule_config` object
/// holding the variant's fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "schedule_type",
    content = "schedule_config",
    rename_all = "snake_case"
)]
pub enum Schedule {
    /// Every `minutes` after the previous run
    Interval { minutes: u32 },
    Daily { hour: u32, minute: u32 },
    /// `day_of_week` counts from 0 = Sunday
    Weekly {
        day_of_week: u32,
        hour: u32,
        minute: u32,
    },
    /// Days past the end of a month fall on its last day
    Monthly {
        day_of_month: u32,
        hour: u32,
        minute: u32,
    },
}

impl Schedule {
    pub fn interval(minutes: u32) -> Self {
        Schedule::Interval { minutes }
    }

    pub fn daily(hour: u32, minute: u32) -> Self {
        Schedule::Daily { hour, minute }
    }

    pub fn weekly(day_of_week: u32, hour: u32, minute: u32) -> Self {
        Schedule::Weekly {
            day_of_week,
            hour,
            minute,
        }
    }

    pub fn monthly(day_of_month: u32, hour: u32, minute: u32) -> Self {
        Schedule::Monthly {
            day_of_month,
            hour,
            minute,
        }
    }

    pub fn schedule_type(&self) -> &'static str {
        match self {
            Schedule::Interval { .. } => "interval",
            Schedule::Daily { .. } => "daily",
            Schedule::Weekly { .. } => "weekly",
            Schedule::Monthly { .. } => "monthly",
        }
    }

    /// The variant's parameters as a JSON object.
    pub fn config(&self) -> Value {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut tagged)) => tagged.remove("schedule_config").unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }

    /// Rebuild from the persisted `schedule_type` / `schedule_config` pair.
    pub fn from_parts(schedule_type: &str, config: Value) -> CronResult<Self> {
        let tagged = serde_json::json!({
            "schedule_type": schedule_type,
            "schedule_config": config,
        });
        let schedule: Schedule = serde_json::from_value(tagged).map_err(|e| {
            CronError::InvalidSchedule(format!("{} schedule: {}", schedule_type, e))
        })?;
        schedule.validate()?;
        Ok(schedule)
    }

    pub fn validate(&self) -> CronResult<()> {
        let check_time = |hour: u32, minute: u32| {
            if hour > 23 || minute > 59 {
                Err(CronError::InvalidSchedule(format!(
                    "time {:02}:{:02} is out of range",
                    hour, minute
                )))
            } else {
                Ok(())
            }
        };

        match *self {
            Schedule::Interval { minutes } if minutes == 0 => Err(CronError::InvalidSchedule(
                "interval must be at least one minute".to_string(),
            )),
            Schedule::Interval { .. } => Ok(()),
            Schedule::Daily { hour, minute } => check_time(hour, minute),
            Schedule::Weekly {
                day_of_week,
                hour,
                minute,
            } => {
                if day_of_week > 6 {
                    return Err(CronError::InvalidSchedule(format!(
                        "day_of_week {} is not 0-6",
                        day_of_week
                    )));
                }
                check_time(hour, minute)
            }
            Schedule::Monthly {
                day_of_month,
                hour,
                minute,
            } => {
                if !(1..=31).contains(&day_of_month) {
                    return Err(CronError::InvalidSchedule(format!(
                        "day_of_month {} is not 1-31",
                        day_of_month
                    )));
                }
                check_time(hour, minute)
            }
        }
    }

    /// Next run strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> CronResult<DateTime<Utc>> {
        self.validate()?;
        let next = match *self {
            Schedule::Interval { minutes } => Some(now + Duration::minutes(i64::from(minutes))),
            Schedule::Daily { hour, minute } => CronExpression::daily(hour, minute)?.next_after(now),
            Schedule::Weekly {
                day_of_week,
                hour,
                minute,
            } => CronExpression::weekly(day_of_week, hour, minute)?.next_after(now),
            Schedule::Monthly {
                day_of_month,
                hour,
                minute,
            } => next_monthly(now, day_of_month, hour, minute),
        };
        next.ok_or_else(|| {
            CronError::InvalidSchedule(format!("no {} run after {}", self.schedule_type(), now))
        })
    }
}

fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let first_of_next = NaiveDate::from_ymd_opt(next_year, next_month, 1)?;
    Some(first_of_next.pred_opt()?.day())
}

fn occurrence(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
    let day = day.min(days_in_month(year, month)?);
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0).single()
}

fn next_monthly(now: DateTime<Utc>, day: u32, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
    let this_month = occurrence(now.year(), now.month(), day, hour, minute)?;
    if this_month > now {
        return Some(this_month);
    }
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    occurrence(year, month, day, hour, minute)
}
