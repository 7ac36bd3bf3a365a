use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::{
    schedule::{DayOfWeek, ScheduledWindow},
    time_of_day::TimeOfDay,
    types::TempSetting,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    Start,
    End,
}

impl TransitionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::End => "end",
        }
    }
}

/// Wall-clock match rule handed to the timer facility. `None` is a wildcard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CronSpec {
    pub minute: Option<u8>,
    pub hour: Option<u8>,
    pub weekday: Option<u8>,
    pub day: Option<u8>,
    pub month: Option<u8>,
}

impl CronSpec {
    pub fn every_minute() -> Self {
        Self::default()
    }

    pub fn weekly(day: DayOfWeek, at: TimeOfDay) -> Self {
        Self {
            minute: Some(at.minute()),
            hour: Some(at.hour()),
            weekday: Some(day.index()),
            day: None,
            month: None,
        }
    }
}

/// A single scheduled instant: the start or end of one window on one weekday.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    pub room_id: u32,
    pub window_index: usize,
    pub weekday: DayOfWeek,
    pub kind: TransitionKind,
    pub at: TimeOfDay,
    pub setting: TempSetting,
}

impl Transition {
    /// Flat registration key for the timer facility. Generated only, never parsed.
    pub fn key(&self) -> String {
        let mut key = format!(
            "heating.{}.{}.{}.{}.{}.{}",
            self.room_id,
            self.window_index,
            self.weekday.index(),
            self.kind.as_str(),
            self.at.hour(),
            self.at.minute()
        );
        if self.kind == TransitionKind::Start {
            key.push('.');
            key.push_str(&self.setting.key_token());
        }
        key
    }

    pub fn cron_spec(&self) -> CronSpec {
        CronSpec::weekly(self.weekday, self.at)
    }
}

/// Start and end transitions of one room window, one pair per weekday.
pub fn expand(window_index: usize, window: &ScheduledWindow) -> Vec<Transition> {
    let mut transitions = Vec::with_capacity(window.weekdays.len() * 2);
    for &day in &window.weekdays {
        transitions.push(Transition {
            room_id: window.room_id,
            window_index,
            weekday: day,
            kind: TransitionKind::Start,
            at: window.start,
            setting: window.temperature,
        });
        transitions.push(Transition {
            room_id: window.room_id,
            window_index,
            weekday: window.end_day(day),
            kind: TransitionKind::End,
            at: window.end,
            setting: window.temperature,
        });
    }
    transitions
}

/// Timer registration the host must carry out.
#[derive(Debug, Clone, PartialEq)]
pub enum TimerChange {
    Add { key: String, spec: CronSpec },
    Remove { key: String },
}

/// Transitions currently registered with the timer facility, keyed by their
/// flat key.
#[derive(Debug, Clone, Default)]
pub struct TransitionRegistry {
    registered: BTreeMap<String, Transition>,
}

impl TransitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every transition of the room's windows. Keys that are
    /// already registered produce no change.
    pub fn register<'a>(
        &mut self,
        room_id: u32,
        windows: impl IntoIterator<Item = &'a ScheduledWindow>,
    ) -> Vec<TimerChange> {
        let mut changes = Vec::new();
        for (index, window) in windows.into_iter().enumerate() {
            for transition in expand(index, window) {
                let key = transition.key();
                if self.registered.contains_key(&key) {
                    continue;
                }
                changes.push(TimerChange::Add {
                    key: key.clone(),
                    spec: transition.cron_spec(),
                });
                self.registered.insert(key, transition);
            }
        }
        debug!("room {room_id}: {} transitions newly registered", changes.len());
        changes
    }

    pub fn deregister(&mut self, room_id: u32) -> Vec<TimerChange> {
        let keys: Vec<String> = self
            .registered
            .iter()
            .filter(|(_, transition)| transition.room_id == room_id)
            .map(|(key, _)| key.clone())
            .collect();

        keys.into_iter()
            .map(|key| {
                self.registered.remove(&key);
                TimerChange::Remove { key }
            })
            .collect()
    }

    pub fn deregister_all(&mut self) -> Vec<TimerChange> {
        std::mem::take(&mut self.registered)
            .into_keys()
            .map(|key| TimerChange::Remove { key })
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<&Transition> {
        self.registered.get(key)
    }

    pub fn is_registered(&self, room_id: u32) -> bool {
        self.registered
            .values()
            .any(|transition| transition.room_id == room_id)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.registered.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.registered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registered.is_empty()
    }
}
