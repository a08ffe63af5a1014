//! Lightweight cron expression parser.
//! Supports: "MIN HOUR DOM MON DOW" (5-field, no seconds)
//! Per field: `*`, `N`, `a-b`, `*/n`, `a-b/n`, and comma lists of those.
//! Day-of-week is 0-6 with Sunday = 0.
//! Example: "30 9 * * 1-5" = weekdays at 09:30
//!
//! Evaluated in a caller-supplied timezone; results are returned in UTC.

use chrono::offset::LocalResult;
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};
use plughost_core::error::{PlugHostError, Result};

/// How far ahead `next_after` searches before giving up (covers leap days).
const MAX_SEARCH_DAYS: u32 = 366 * 5;

const MINUTES_PER_DAY: u32 = 24 * 60;

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
    minutes: u64,
    hours: u32,
    days_of_month: u32,
    months: u16,
    days_of_week: u8,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronSchedule {
    /// Parse a 5-field expression.
    pub fn parse(expression: &str) -> Result<Self> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(PlugHostError::Cron(format!(
                "'{expression}' has {} fields (need 5: MIN HOUR DOM MON DOW)",
                parts.len()
            )));
        }

        let minutes = parse_field(parts[0], 0, 59)
            .map_err(|e| cron_error(expression, "minute", e))?;
        let hours = parse_field(parts[1], 0, 23)
            .map_err(|e| cron_error(expression, "hour", e))?;
        let days_of_month = parse_field(parts[2], 1, 31)
            .map_err(|e| cron_error(expression, "day-of-month", e))?;
        let months = parse_field(parts[3], 1, 12)
            .map_err(|e| cron_error(expression, "month", e))?;
        let days_of_week = parse_field(parts[4], 0, 6)
            .map_err(|e| cron_error(expression, "day-of-week", e))?;

        Ok(Self {
            expression: expression.trim().to_string(),
            minutes,
            hours: hours as u32,
            days_of_month: days_of_month as u32,
            months: months as u16,
            days_of_week: days_of_week as u8,
            dom_restricted: !parts[2].starts_with('*'),
            dow_restricted: !parts[4].starts_with('*'),
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// The first fire time strictly after `after`, evaluated in `tz`.
    ///
    /// Local times skipped by a DST jump never fire; local times repeated by a
    /// DST fall-back fire on their first occurrence.
    pub fn next_after<Z: TimeZone>(&self, after: DateTime<Utc>, tz: &Z) -> Option<DateTime<Utc>> {
        let local = after.with_timezone(tz).naive_local();
        let mut date = local.date();
        let mut start_minute = local.hour() * 60 + local.minute() + 1;

        for _ in 0..MAX_SEARCH_DAYS {
            if start_minute < MINUTES_PER_DAY && self.matches_date(date) {
                for minute_of_day in start_minute..MINUTES_PER_DAY {
                    let (hour, minute) = (minute_of_day / 60, minute_of_day % 60);
                    if !self.matches_time(hour, minute) {
                        continue;
                    }
                    let Some(naive) = date.and_hms_opt(hour, minute, 0) else {
                        continue;
                    };
                    let candidate = match tz.from_local_datetime(&naive) {
                        LocalResult::Single(dt) => dt.with_timezone(&Utc),
                        LocalResult::Ambiguous(first, _) => first.with_timezone(&Utc),
                        LocalResult::None => continue,
                    };
                    if candidate > after {
                        return Some(candidate);
                    }
                }
            }
            date = date.succ_opt()?;
            start_minute = 0;
        }

        None
    }

    /// Gap between the next two fires after `from`; `None` if the schedule
    /// never fires twice within the search window.
    pub fn expected_period<Z: TimeZone>(&self, from: DateTime<Utc>, tz: &Z) -> Option<Duration> {
        let first = self.next_after(from, tz)?;
        let second = self.next_after(first, tz)?;
        Some(second - first)
    }

    fn matches_time(&self, hour: u32, minute: u32) -> bool {
        self.hours & (1 << hour) != 0 && self.minutes & (1 << minute) != 0
    }

    fn matches_date(&self, date: NaiveDate) -> bool {
        if self.months & (1 << date.month()) == 0 {
            return false;
        }
        let dom = self.days_of_month & (1 << date.day()) != 0;
        let dow = self.days_of_week & (1 << date.weekday().num_days_from_sunday()) != 0;
        // Vixie semantics: two restricted day fields are OR-ed.
        if self.dom_restricted && self.dow_restricted {
            dom || dow
        } else {
            dom && dow
        }
    }
}

impl std::str::FromStr for CronSchedule {
    type Err = PlugHostError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.expression)
    }
}

/// Parse a cron expression and compute the next run time in UTC.
pub fn next_run_from_cron(expression: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match CronSchedule::parse(expression) {
        Ok(schedule) => schedule.next_after(after, &Utc),
        Err(e) => {
            tracing::warn!("Invalid cron expression: {e}");
            None
        }
    }
}

fn cron_error(expression: &str, field: &str, reason: String) -> PlugHostError {
    PlugHostError::Cron(format!("'{expression}': invalid {field} field: {reason}"))
}

/// Parse a cron field into a bitmask of matching values.
fn parse_field(field: &str, min: u32, max: u32) -> std::result::Result<u64, String> {
    let mut mask = 0u64;
    for item in field.split(',') {
        if item.is_empty() {
            return Err(format!("empty list item in '{field}'"));
        }
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let n: u32 = step
                    .parse()
                    .map_err(|_| format!("bad step '{step}'"))?;
                if n == 0 {
                    return Err("step must be > 0".into());
                }
                (range, n)
            }
            None => (item, 1),
        };

        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            let lo = parse_value(a, min, max)?;
            let hi = parse_value(b, min, max)?;
            if lo > hi {
                return Err(format!("range {lo}-{hi} is reversed"));
            }
            (lo, hi)
        } else {
            if step != 1 || item.contains('/') {
                // "N/n" is not part of the accepted grammar.
                return Err(format!("step on single value '{item}'"));
            }
            let v = parse_value(range, min, max)?;
            (v, v)
        };

        for v in (lo..=hi).step_by(step as usize) {
            mask |= 1 << v;
        }
    }
    Ok(mask)
}

fn parse_value(s: &str, min: u32, max: u32) -> std::result::Result<u32, String> {
    let n: u32 = s.parse().map_err(|_| format!("'{s}' is not a number"))?;
    if n < min || n > max {
        return Err(format!("{n} outside {min}-{max}"));
    }
    Ok(n)
}
