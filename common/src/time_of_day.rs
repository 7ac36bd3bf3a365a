use std::{fmt, str::FromStr};

use chrono::{DateTime, FixedOffset, Timelike};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::HeatingError;

pub const MINUTES_PER_DAY: u16 = 24 * 60;

/// Wall-clock time of day at minute resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
}

impl TimeOfDay {
    pub const MIDNIGHT: Self = Self { hour: 0, minute: 0 };

    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self { hour, minute })
    }

    /// Parses `HH:MM`. Both fields must be exactly two digits.
    pub fn parse(raw: &str) -> Result<Self, HeatingError> {
        let invalid = || HeatingError::InvalidTimeFormat(raw.to_string());
        let bytes = raw.as_bytes();
        if bytes.len() != 5 || bytes[2] != b':' {
            return Err(invalid());
        }
        let digits = [bytes[0], bytes[1], bytes[3], bytes[4]];
        if !digits.iter().all(u8::is_ascii_digit) {
            return Err(invalid());
        }
        let hour = (digits[0] - b'0') * 10 + (digits[1] - b'0');
        let minute = (digits[2] - b'0') * 10 + (digits[3] - b'0');
        Self::new(hour, minute).ok_or_else(invalid)
    }

    pub fn from_datetime(now: &DateTime<FixedOffset>) -> Self {
        Self {
            hour: now.hour() as u8,
            minute: now.minute() as u8,
        }
    }

    pub fn hour(self) -> u8 {
        self.hour
    }

    pub fn minute(self) -> u8 {
        self.minute
    }

    pub fn minutes_since_midnight(self) -> u16 {
        self.hour as u16 * 60 + self.minute as u16
    }

    /// One minute later. 23:59 wraps to 00:00; the caller owns the day carry.
    pub fn add_minute(self) -> Self {
        match (self.hour, self.minute) {
            (23, 59) => Self::MIDNIGHT,
            (hour, 59) => Self {
                hour: hour + 1,
                minute: 0,
            },
            (hour, minute) => Self {
                hour,
                minute: minute + 1,
            },
        }
    }

    /// One minute earlier. 00:00 wraps to 23:59; the caller owns the day carry.
    pub fn sub_minute(self) -> Self {
        match (self.hour, self.minute) {
            (0, 0) => Self {
                hour: 23,
                minute: 59,
            },
            (hour, 0) => Self {
                hour: hour - 1,
                minute: 59,
            },
            (hour, minute) => Self {
                hour,
                minute: minute - 1,
            },
        }
    }

    /// True when a window from `start` to `end` runs into the next day.
    pub fn crosses_midnight(start: Self, end: Self) -> bool {
        start > end
    }

    /// Half-open `start <= now < end` for a window that stays within one day.
    /// Midnight-crossing windows are split by the caller.
    pub fn is_between(now: Self, start: Self, end: Self) -> bool {
        start <= now && now < end
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for TimeOfDay {
    type Err = HeatingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
