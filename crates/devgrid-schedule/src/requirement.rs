//! Template-level lifecycle requirements.
//!
//! An [`AutostopRequirement`] forces running workspaces to stop on selected
//! days (at the owner's quiet hours), optionally only every Nth week. An
//! [`AutostartRequirement`] limits the days on which autostart may fire.

use std::fmt;

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::cron::week_selected;
use crate::error::ScheduleError;

/// Set of weekdays stored as a 7-bit mask, bit 0 = Monday … bit 6 = Sunday.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DaysOfWeek(u8);

impl DaysOfWeek {
    pub const NONE: Self = Self(0);
    pub const ALL: Self = Self(0x7F);

    pub fn from_bits(bits: u8) -> Result<Self, ScheduleError> {
        if bits & !0x7F != 0 {
            return Err(ScheduleError::DaysOfWeek(bits));
        }
        Ok(Self(bits))
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, day: Weekday) -> bool {
        self.0 & (1 << day.num_days_from_monday()) != 0
    }
}

impl fmt::Display for DaysOfWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let days = [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ];
        let names: Vec<String> = days
            .into_iter()
            .filter(|d| self.contains(*d))
            .map(|d| d.to_string())
            .collect();
        write!(f, "{}", names.join(","))
    }
}

/// Days on which running workspaces must be restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutostopRequirement {
    pub days_of_week: DaysOfWeek,
    pub weeks: u32,
}

impl Default for AutostopRequirement {
    fn default() -> Self {
        Self {
            days_of_week: DaysOfWeek::NONE,
            weeks: 1,
        }
    }
}

impl AutostopRequirement {
    pub fn new(days_of_week: u8, weeks: u32) -> Result<Self, ScheduleError> {
        if weeks == 0 {
            return Err(ScheduleError::ZeroWeeks);
        }
        Ok(Self {
            days_of_week: DaysOfWeek::from_bits(days_of_week)?,
            weeks,
        })
    }

    pub fn is_enabled(&self) -> bool {
        !self.days_of_week.is_empty()
    }

    /// Whether a forced stop is due on this local calendar date.
    pub fn applies_on(&self, date: NaiveDate) -> bool {
        self.days_of_week.contains(date.weekday()) && week_selected(date, self.weeks)
    }
}

/// Days on which autostart is permitted. An empty set permits every day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutostartRequirement {
    pub days_of_week: DaysOfWeek,
}

impl AutostartRequirement {
    pub fn new(days_of_week: u8) -> Result<Self, ScheduleError> {
        Ok(Self {
            days_of_week: DaysOfWeek::from_bits(days_of_week)?,
        })
    }

    pub fn allows(&self, day: Weekday) -> bool {
        self.days_of_week.is_empty() || self.days_of_week.contains(day)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn days_of_week_bits() {
        let days = DaysOfWeek::from_bits(0b101_0001).unwrap();
        assert_eq!(days.bits(), 0b100_0001 | 0b1_0000);
        assert!(days.contains(Weekday::Mon));
        assert!(days.contains(Weekday::Sun));
        assert!(!days.contains(Weekday::Tue));
        assert_eq!(days.to_string(), "Mon,Fri,Sun");

        assert_eq!(
            DaysOfWeek::from_bits(0x80).unwrap_err(),
            ScheduleError::DaysOfWeek(0x80)
        );
    }

    #[test]
    fn autostop_requirement_validation() {
        assert_eq!(
            AutostopRequirement::new(0b1, 0).unwrap_err(),
            ScheduleError::ZeroWeeks
        );
        assert!(!AutostopRequirement::default().is_enabled());
        assert!(AutostopRequirement::new(0b1, 1).unwrap().is_enabled());
    }

    #[test]
    fn autostop_requirement_every_other_week() {
        // Mondays, every second week from the 2023-01-02 epoch.
        let req = AutostopRequirement::new(0b1, 2).unwrap();
        assert!(req.applies_on(date(2023, 1, 2)));
        assert!(!req.applies_on(date(2023, 1, 3)));
        assert!(!req.applies_on(date(2023, 1, 9)));
        assert!(req.applies_on(date(2023, 1, 16)));
        assert!(req.applies_on(date(2024, 1, 1)));
    }

    #[test]
    fn autostart_requirement_empty_allows_all() {
        let any = AutostartRequirement::default();
        assert!(any.allows(Weekday::Sat));

        let weekdays = AutostartRequirement::new(0b1_1111).unwrap();
        assert!(weekdays.allows(Weekday::Fri));
        assert!(!weekdays.allows(Weekday::Sat));
    }
}
