use thiserror::Error;

use crate::schedule::DayOfWeek;
use crate::time_of_day::TimeOfDay;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HeatingError {
    #[error("invalid time format '{0}', expected HH:MM")]
    InvalidTimeFormat(String),

    #[error("temperature {0} is outside the allowed range 5..=29")]
    TemperatureOutOfRange(f32),

    #[error("room {room}: malformed weekday list '{key}'")]
    MalformedWeekdayList { room: u32, key: String },

    #[error("room {0} has no thermostats to schedule")]
    NoThermostatsInRoom(u32),

    #[error("room {room}: window {start}-{end} conflicts with another window on {day:?}")]
    SchedulingConflictUnresolved {
        room: u32,
        day: DayOfWeek,
        start: TimeOfDay,
        end: TimeOfDay,
    },

    #[error("room {room}: window starting and ending at {at} is empty")]
    EmptyWindow { room: u32, at: TimeOfDay },

    #[error("room {0} is not configured")]
    UnknownRoom(u32),
}
