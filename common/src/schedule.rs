use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, FixedOffset, Weekday};
use serde::{Deserialize, Serialize};

use crate::{time_of_day::TimeOfDay, types::TempSetting};

/// Weekday numbered the way the timer facility expects it: Sunday is 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DayOfWeek {
    Sun,
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
}

impl DayOfWeek {
    pub const ALL: [Self; 7] = [
        Self::Sun,
        Self::Mon,
        Self::Tue,
        Self::Wed,
        Self::Thu,
        Self::Fri,
        Self::Sat,
    ];

    pub fn index(self) -> u8 {
        match self {
            Self::Sun => 0,
            Self::Mon => 1,
            Self::Tue => 2,
            Self::Wed => 3,
            Self::Thu => 4,
            Self::Fri => 5,
            Self::Sat => 6,
        }
    }

    pub fn from_index(index: u8) -> Self {
        Self::ALL[(index % 7) as usize]
    }

    pub fn from_chrono(weekday: Weekday) -> Self {
        Self::from_index(weekday.num_days_from_sunday() as u8)
    }

    pub fn of(now: &DateTime<FixedOffset>) -> Self {
        Self::from_chrono(now.weekday())
    }

    pub fn next(self) -> Self {
        Self::from_index(self.index() + 1)
    }

    pub fn previous(self) -> Self {
        Self::from_index(self.index() + 6)
    }

    /// Accepts `"0"`..`"6"` or an English day name / three-letter abbreviation.
    pub fn parse_key(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if let Ok(index) = trimmed.parse::<u8>() {
            return (index < 7).then(|| Self::from_index(index));
        }
        let lower = trimmed.to_ascii_lowercase();
        let prefix = lower.get(..3)?;
        let day = match prefix {
            "sun" => Self::Sun,
            "mon" => Self::Mon,
            "tue" => Self::Tue,
            "wed" => Self::Wed,
            "thu" => Self::Thu,
            "fri" => Self::Fri,
            "sat" => Self::Sat,
            _ => return None,
        };
        let full = match day {
            Self::Sun => "sunday",
            Self::Mon => "monday",
            Self::Tue => "tuesday",
            Self::Wed => "wednesday",
            Self::Thu => "thursday",
            Self::Fri => "friday",
            Self::Sat => "saturday",
        };
        (lower.len() == 3 || lower == full).then_some(day)
    }
}

/// A compiled schedule window. Active from `start` through the whole `end`
/// minute; a window whose end is earlier than its start runs into the next day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledWindow {
    #[serde(rename = "roomId")]
    pub room_id: u32,
    pub weekdays: BTreeSet<DayOfWeek>,
    #[serde(rename = "startTime")]
    pub start: TimeOfDay,
    #[serde(rename = "endTime")]
    pub end: TimeOfDay,
    pub temperature: TempSetting,
}

impl ScheduledWindow {
    pub fn crosses_midnight(&self) -> bool {
        TimeOfDay::crosses_midnight(self.start, self.end)
    }

    /// Weekday on which the window's end falls when it starts on `day`.
    pub fn end_day(&self, day: DayOfWeek) -> DayOfWeek {
        if self.crosses_midnight() {
            day.next()
        } else {
            day
        }
    }

    pub fn is_active_at(&self, day: DayOfWeek, now: TimeOfDay) -> bool {
        let covers_until_end = |start: TimeOfDay| {
            TimeOfDay::is_between(now, start, self.end) || now == self.end
        };

        if !self.crosses_midnight() {
            return self.weekdays.contains(&day) && covers_until_end(self.start);
        }

        // Split at midnight: the evening part on the start day, the morning
        // part on the day after.
        let evening = self.weekdays.contains(&day) && now >= self.start;
        let morning =
            self.weekdays.contains(&day.previous()) && covers_until_end(TimeOfDay::MIDNIGHT);
        evening || morning
    }

    /// Minute-of-week spans `(offset, length)` covered by this window, end
    /// minute excluded. Windows on different weekdays may meet at that minute.
    pub(crate) fn weekly_spans(&self) -> impl Iterator<Item = (DayOfWeek, u32, u32)> + '_ {
        let start = self.start.minutes_since_midnight() as u32;
        let end = self.end.minutes_since_midnight() as u32;
        let length = if self.crosses_midnight() {
            end + crate::time_of_day::MINUTES_PER_DAY as u32 - start
        } else {
            end - start
        };
        self.weekdays.iter().map(move |day| {
            let offset = day.index() as u32 * crate::time_of_day::MINUTES_PER_DAY as u32 + start;
            (*day, offset, length)
        })
    }
}
