use std::collections::HashMap;

use chrono::{DateTime, Datelike, Duration, FixedOffset, Timelike};
use heating_common::{CronSpec, TimerChange};
use tracing::debug;

const MAX_CATCH_UP_MINUTES: i64 = 10;

/// In-process timer facility. Entries fire once per wall-clock minute whose
/// fields match; a `None` field matches anything.
#[derive(Debug, Default)]
pub struct CronTable {
    entries: HashMap<String, CronSpec>,
    last_minute: Option<i64>,
}

impl CronTable {
    /// A table that treats `now`'s minute as already evaluated.
    pub fn starting_at(now: DateTime<FixedOffset>) -> Self {
        Self {
            entries: HashMap::new(),
            last_minute: Some(epoch_minute(&now)),
        }
    }

    pub fn apply(&mut self, change: TimerChange) {
        match change {
            TimerChange::Add { key, spec } => {
                debug!("cron add {key}");
                self.entries.insert(key, spec);
            }
            TimerChange::Remove { key } => {
                if self.entries.remove(&key).is_some() {
                    debug!("cron remove {key}");
                }
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entries due since the last evaluation, each with the minute it fired
    /// in, oldest first. Minutes skipped by a late tick are replayed, up to
    /// `MAX_CATCH_UP_MINUTES`; an entry matching several of them fires once,
    /// at the latest.
    pub fn due(&mut self, now: DateTime<FixedOffset>) -> Vec<(String, DateTime<FixedOffset>)> {
        let minute = epoch_minute(&now);
        let first = match self.last_minute {
            Some(last) if last == minute => return Vec::new(),
            Some(last) if last < minute => (last + 1).max(minute - MAX_CATCH_UP_MINUTES + 1),
            _ => minute,
        };
        self.last_minute = Some(minute);
        if first < minute {
            debug!("cron catching up {} skipped minutes", minute - first);
        }

        let mut fired: HashMap<&str, DateTime<FixedOffset>> = HashMap::new();
        for step in first..=minute {
            let at = now - Duration::minutes(minute - step);
            for (key, spec) in &self.entries {
                if matches(spec, &at) {
                    fired.insert(key.as_str(), at);
                }
            }
        }

        let mut due: Vec<(String, DateTime<FixedOffset>)> = fired
            .into_iter()
            .map(|(key, at)| (key.to_string(), at))
            .collect();
        due.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        due
    }
}

fn epoch_minute(now: &DateTime<FixedOffset>) -> i64 {
    now.timestamp().div_euclid(60)
}

fn matches(spec: &CronSpec, now: &DateTime<FixedOffset>) -> bool {
    let field = |wanted: Option<u8>, actual: u32| wanted.map_or(true, |w| u32::from(w) == actual);

    field(spec.minute, now.minute())
        && field(spec.hour, now.hour())
        && field(spec.weekday, now.weekday().num_days_from_sunday())
        && field(spec.day, now.day())
        && field(spec.month, now.month())
}
