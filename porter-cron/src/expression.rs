//! Cron expression parsing and evaluation.

use crate::error::{CronError, CronResult};
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;

const WEEKDAYS: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Parsed cron expression.
#[derive(Debug, Clone)]
pub struct CronExpression {
    schedule: Schedule,
    expression: String,
}

impl CronExpression {
    /// Parse a cron expression.
    ///
    /// Uses the 6-field format:
    /// - Second (0-59)
    /// - Minute (0-59)
    /// - Hour (0-23)
    /// - Day of month (1-31)
    /// - Month (1-12)
    /// - Day of week (SUN-SAT)
    ///
    /// # Examples
    ///
    /// ```
    /// use porter_cron::CronExpression;
    ///
    /// // Every day at 09:30
    /// let expr = CronExpression::parse("0 30 9 * * *").unwrap();
    ///
    /// // Every Monday at 9 AM
    /// let expr = CronExpression::parse("0 0 9 * * MON").unwrap();
    /// ```
    pub fn parse(expression: &str) -> CronResult<Self> {
        let schedule = Schedule::from_str(expression)
            .map_err(|e| CronError::InvalidSchedule(format!("{}: {}", expression, e)))?;

        Ok(Self {
            schedule,
            expression: expression.to_string(),
        })
    }

    /// Every day at `hour:minute` UTC.
    pub fn daily(hour: u32, minute: u32) -> CronResult<Self> {
        Self::parse(&format!("0 {} {} * * *", minute, hour))
    }

    /// Every week on `day_of_week` (0 = Sunday) at `hour:minute` UTC.
    pub fn weekly(day_of_week: u32, hour: u32, minute: u32) -> CronResult<Self> {
        let day = usize::try_from(day_of_week)
            .ok()
            .and_then(|d| WEEKDAYS.get(d))
            .ok_or_else(|| {
                CronError::InvalidSchedule(format!("day_of_week {} is not 0-6", day_of_week))
            })?;
        Self::parse(&format!("0 {} {} * * {}", minute, hour, day))
    }

    /// First occurrence strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// Get the expression string.
    pub fn expression(&self) -> &str {
        &self.expression
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike, Weekday};

    #[test]
    fn test_parse_invalid_expression() {
        assert!(CronExpression::parse("invalid").is_err());
    }

    #[test]
    fn test_daily_is_strictly_after() {
        let expr = CronExpression::daily(9, 0).unwrap();
        assert_eq!(expr.expression(), "0 0 9 * * *");

        let at_nine = Utc.with_ymd_and_hms(2024, 3, 10, 9, 0, 0).unwrap();
        let next = expr.next_after(at_nine).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 11, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_weekly_uses_sunday_zero() {
        // 2024-03-13 is a Wednesday
        let wed = Utc.with_ymd_and_hms(2024, 3, 13, 12, 0, 0).unwrap();

        let sunday = CronExpression::weekly(0, 6, 30).unwrap().next_after(wed).unwrap();
        assert_eq!(sunday.weekday(), Weekday::Sun);
        assert_eq!(sunday.day(), 17);
        assert_eq!((sunday.hour(), sunday.minute()), (6, 30));

        let saturday = CronExpression::weekly(6, 0, 0).unwrap().next_after(wed).unwrap();
        assert_eq!(saturday.weekday(), Weekday::Sat);
    }

    #[test]
    fn test_weekly_rejects_bad_day() {
        assert!(matches!(
            CronExpression::weekly(7, 0, 0),
            Err(CronError::InvalidSchedule(_))
        ));
    }
}
