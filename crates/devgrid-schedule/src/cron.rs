//! Cron schedules bound to an IANA timezone.
//!
//! Expressions use the five classic fields `minute hour day-of-month month
//! day-of-week`, optionally prefixed with `CRON_TZ=<zone>` (UTC when absent):
//!
//! - `CRON_TZ=Europe/Berlin 30 9 * * 1-5`: 09:30 Berlin time on weekdays
//! - `0 0 * * *`: midnight UTC
//! - `*/15 8-18 * * MON,WED`: every quarter hour during the day, twice a week
//!
//! Matching happens on local wall-clock time, so a schedule keeps firing at
//! 09:30 local across DST changes. Local times skipped by a DST gap never
//! fire; local times repeated by a DST overlap fire once, at their first
//! occurrence. A [`Schedule`] may additionally be restricted to every Nth
//! week, counted from the Monday 2023-01-02.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::ScheduleError;

/// `num_days_from_ce` of Monday 2023-01-02, the anchor for week intervals.
const EPOCH_MONDAY_DAYS: i32 = 738_522;

/// How far ahead [`Schedule::next`] searches before giving up.
const MAX_SEARCH_DAYS: u32 = 366 * 5;

const MONTH_NAMES: &[&str] = &[
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const DAY_NAMES: &[&str] = &["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Number of whole weeks between the epoch Monday and `date` (negative before it).
pub fn weeks_since_epoch(date: NaiveDate) -> i64 {
    i64::from(date.num_days_from_ce() - EPOCH_MONDAY_DAYS).div_euclid(7)
}

/// Whether `date` falls in a week selected by an every-`weeks`-weeks interval.
pub fn week_selected(date: NaiveDate, weeks: u32) -> bool {
    weeks <= 1 || weeks_since_epoch(date).rem_euclid(i64::from(weeks)) == 0
}

/// One parsed cron field as a bit set of allowed values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Field {
    bits: u64,
    /// The field was written as a bare `*` (or `?`).
    wildcard: bool,
}

impl Field {
    fn contains(&self, value: u32) -> bool {
        value < 64 && self.bits & (1 << value) != 0
    }

    fn values(&self) -> impl Iterator<Item = u32> + '_ {
        (0..64).filter(|v| self.contains(*v))
    }
}

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
}

const MINUTE: FieldSpec = FieldSpec { name: "minute", min: 0, max: 59, names: &[] };
const HOUR: FieldSpec = FieldSpec { name: "hour", min: 0, max: 23, names: &[] };
const DAY_OF_MONTH: FieldSpec = FieldSpec { name: "day-of-month", min: 1, max: 31, names: &[] };
const MONTH: FieldSpec = FieldSpec { name: "month", min: 1, max: 12, names: MONTH_NAMES };
// 7 is accepted as an alias for Sunday.
const DAY_OF_WEEK: FieldSpec = FieldSpec { name: "day-of-week", min: 0, max: 7, names: DAY_NAMES };

impl FieldSpec {
    fn error(&self, value: &str, reason: impl Into<String>) -> ScheduleError {
        ScheduleError::Field {
            field: self.name,
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    fn value(&self, raw: &str, token: &str) -> Result<u32, ScheduleError> {
        let value = match self.names.iter().position(|n| n.eq_ignore_ascii_case(token)) {
            // Month names start at 1, day names at 0.
            Some(index) => index as u32 + self.min,
            None => token
                .parse::<u32>()
                .map_err(|_| self.error(raw, format!("{token:?} is not a number")))?,
        };
        if value < self.min || value > self.max {
            return Err(self.error(
                raw,
                format!("{value} is outside {}-{}", self.min, self.max),
            ));
        }
        Ok(value)
    }

    fn parse(&self, raw: &str) -> Result<Field, ScheduleError> {
        let mut bits = 0u64;
        for part in raw.split(',') {
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => {
                    let step = step
                        .parse::<u32>()
                        .map_err(|_| self.error(raw, format!("bad step {step:?}")))?;
                    if step == 0 {
                        return Err(self.error(raw, "step must be positive"));
                    }
                    (range, Some(step))
                }
                None => (part, None),
            };
            let (lo, hi) = match range {
                "*" | "?" => (self.min, self.max),
                _ => match range.split_once('-') {
                    Some((lo, hi)) => (self.value(raw, lo)?, self.value(raw, hi)?),
                    // `N/S` means N through the end of the range.
                    None if step.is_some() => (self.value(raw, range)?, self.max),
                    None => {
                        let v = self.value(raw, range)?;
                        (v, v)
                    }
                },
            };
            if lo > hi {
                return Err(self.error(raw, format!("range {lo}-{hi} is reversed")));
            }
            for v in (lo..=hi).step_by(step.unwrap_or(1) as usize) {
                bits |= 1 << v;
            }
        }
        if self.max == 7 && bits & (1 << 7) != 0 {
            bits = (bits & !(1 << 7)) | 1;
        }
        Ok(Field {
            bits,
            wildcard: raw == "*" || raw == "?",
        })
    }
}

/// A parsed cron schedule in a specific timezone.
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    source: String,
    tz: Tz,
    minutes: Field,
    hours: Field,
    days_of_month: Field,
    months: Field,
    days_of_week: Field,
    weeks: u32,
}

impl Schedule {
    /// Parse a cron expression, optionally prefixed with `CRON_TZ=<zone>`.
    pub fn parse(expr: &str) -> Result<Self, ScheduleError> {
        let trimmed = expr.trim();
        let (tz, body) = match trimmed
            .strip_prefix("CRON_TZ=")
            .or_else(|| trimmed.strip_prefix("TZ="))
        {
            Some(rest) => {
                let (zone, body) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                let tz = zone
                    .parse::<Tz>()
                    .map_err(|_| ScheduleError::Timezone(zone.to_string()))?;
                (tz, body)
            }
            None => (Tz::UTC, trimmed),
        };

        let fields: Vec<&str> = body.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ScheduleError::FieldCount(fields.len()));
        }

        Ok(Self {
            source: trimmed.to_string(),
            tz,
            minutes: MINUTE.parse(fields[0])?,
            hours: HOUR.parse(fields[1])?,
            days_of_month: DAY_OF_MONTH.parse(fields[2])?,
            months: MONTH.parse(fields[3])?,
            days_of_week: DAY_OF_WEEK.parse(fields[4])?,
            weeks: 1,
        })
    }

    /// Parse a schedule that may only restrict time of day and day of week.
    pub fn weekly(expr: &str) -> Result<Self, ScheduleError> {
        let schedule = Self::parse(expr)?;
        if !schedule.days_of_month.wildcard || !schedule.months.wildcard {
            return Err(ScheduleError::Shape("weekly", "day-of-month and month"));
        }
        Ok(schedule)
    }

    /// Parse a schedule that fires at the same time(s) every day.
    pub fn daily(expr: &str) -> Result<Self, ScheduleError> {
        let schedule = Self::parse(expr)?;
        if !schedule.days_of_month.wildcard
            || !schedule.months.wildcard
            || !schedule.days_of_week.wildcard
        {
            return Err(ScheduleError::Shape(
                "daily",
                "day-of-month, month and day-of-week",
            ));
        }
        Ok(schedule)
    }

    /// Restrict matching days to every `weeks`th week.
    pub fn with_weeks(mut self, weeks: u32) -> Result<Self, ScheduleError> {
        if weeks == 0 {
            return Err(ScheduleError::ZeroWeeks);
        }
        self.weeks = weeks;
        Ok(self)
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn weeks(&self) -> u32 {
        self.weeks
    }

    /// Whether the schedule fires at some time on the local calendar date.
    pub fn matches_date(&self, date: NaiveDate) -> bool {
        if !self.months.contains(date.month()) || !week_selected(date, self.weeks) {
            return false;
        }
        let dom = self.days_of_month.contains(date.day());
        let dow = self.days_of_week.contains(date.weekday().num_days_from_sunday());
        // Classic cron: two restricted day fields match if either does.
        if self.days_of_month.wildcard || self.days_of_week.wildcard {
            dom && dow
        } else {
            dom || dow
        }
    }

    /// Trigger instants on one local date, in chronological order.
    fn triggers_on(&self, date: NaiveDate) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        self.hours
            .values()
            .flat_map(move |h| self.minutes.values().map(move |m| (h, m)))
            .filter_map(move |(h, m)| {
                let naive = date.and_hms_opt(h, m, 0)?;
                self.tz
                    .from_local_datetime(&naive)
                    .earliest()
                    .map(|local| local.with_timezone(&Utc))
            })
    }

    /// The earliest trigger strictly after `after`, or `None` if the
    /// expression never matches within the search horizon.
    pub fn next(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local = after.with_timezone(&self.tz).date_naive();
        let mut date = local.pred_opt().unwrap_or(local);
        for _ in 0..MAX_SEARCH_DAYS {
            if self.matches_date(date)
                && let Some(found) = self.triggers_on(date).find(|t| *t > after)
            {
                return Some(found);
            }
            date = date.succ_opt()?;
        }
        None
    }

    /// The first trigger on the given local calendar date.
    pub fn first_on(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        if !self.matches_date(date) {
            return None;
        }
        self.triggers_on(date).next()
    }
}

impl FromStr for Schedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.source.starts_with("CRON_TZ=") || self.source.starts_with("TZ=") {
            write!(f, "{}", self.source)
        } else {
            write!(f, "CRON_TZ={} {}", self.tz.name(), self.source)
        }
    }
}
