//! Turns the per-room weekly rule tables into canonical schedule windows.
//!
//! Identical rules on different weekdays collapse into one window. Windows
//! that touch (one ends at the minute the other starts) get a one-minute gap
//! by moving the later window's start forward, so no two windows are active
//! at the same instant.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::{
    config::RoomConfig,
    error::HeatingError,
    schedule::{DayOfWeek, ScheduledWindow},
    time_of_day::{TimeOfDay, MINUTES_PER_DAY},
    types::TempSetting,
};

const MINUTES_PER_WEEK: u32 = 7 * MINUTES_PER_DAY as u32;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Compilation {
    pub windows: Vec<ScheduledWindow>,
    pub warnings: Vec<HeatingError>,
}

impl Compilation {
    pub fn room_windows(&self, room: u32) -> impl Iterator<Item = &ScheduledWindow> {
        self.windows.iter().filter(move |window| window.room_id == room)
    }

    pub fn has_schedule(&self, room: u32) -> bool {
        self.room_windows(room).next().is_some()
    }
}

/// Raw identity a rule is merged on, before any gap shifting.
struct Draft {
    raw_start: TimeOfDay,
    raw_end: TimeOfDay,
    window: ScheduledWindow,
}

pub fn compile(rooms: &[RoomConfig]) -> Compilation {
    let mut compilation = Compilation::default();

    for room in rooms {
        let mut drafts = merge_room_rules(room, &mut compilation.warnings);
        insert_gaps(&mut drafts);
        let windows = drafts.into_iter().map(|draft| draft.window).collect();
        let windows = drop_conflicts(room.room, windows, &mut compilation.warnings);
        debug!("room {}: compiled {} schedule windows", room.room, windows.len());
        compilation.windows.extend(windows);
    }

    for warning in &compilation.warnings {
        warn!("schedule rule skipped: {warning}");
    }

    compilation
}

fn merge_room_rules(room: &RoomConfig, warnings: &mut Vec<HeatingError>) -> Vec<Draft> {
    let mut days: Vec<(DayOfWeek, &str)> = Vec::new();
    for key in room.schedule.keys() {
        match DayOfWeek::parse_key(key) {
            Some(day) => days.push((day, key.as_str())),
            None => warnings.push(HeatingError::MalformedWeekdayList {
                room: room.room,
                key: key.clone(),
            }),
        }
    }
    days.sort_by_key(|(day, _)| *day);

    let mut drafts: Vec<Draft> = Vec::new();
    for (day, key) in days {
        for rule in &room.schedule[key] {
            let parsed = TimeOfDay::parse(&rule.stime).and_then(|start| {
                let end = TimeOfDay::parse(&rule.etime)?;
                validate_rule(room.room, start, end, rule.temp)?;
                Ok((start, end))
            });
            let (start, end) = match parsed {
                Ok(times) => times,
                Err(err) => {
                    warnings.push(err);
                    continue;
                }
            };

            let existing = drafts.iter_mut().find(|draft| {
                draft.raw_start == start
                    && draft.raw_end == end
                    && draft.window.temperature == rule.temp
            });
            match existing {
                Some(draft) => {
                    draft.window.weekdays.insert(day);
                }
                None => drafts.push(Draft {
                    raw_start: start,
                    raw_end: end,
                    window: ScheduledWindow {
                        room_id: room.room,
                        weekdays: BTreeSet::from([day]),
                        start,
                        end,
                        temperature: rule.temp,
                    },
                }),
            }
        }
    }
    drafts
}

fn validate_rule(
    room: u32,
    start: TimeOfDay,
    end: TimeOfDay,
    temp: TempSetting,
) -> Result<(), HeatingError> {
    if start == end {
        return Err(HeatingError::EmptyWindow { room, at: start });
    }
    match temp {
        TempSetting::Degrees(value) if !temp.is_in_range() => {
            Err(HeatingError::TemperatureOutOfRange(value))
        }
        _ => Ok(()),
    }
}

/// Moves the start of every window that begins where a window sharing one of
/// its weekdays ends. Only starts move; ends are never pulled back.
fn insert_gaps(drafts: &mut [Draft]) {
    // A shifted start can land on another window's end; repeat until stable.
    for _ in 0..=drafts.len() {
        let mut shifted = false;
        for earlier in 0..drafts.len() {
            for later in 0..drafts.len() {
                if earlier == later {
                    continue;
                }
                let touches = drafts[earlier].window.end == drafts[later].window.start
                    && !drafts[earlier]
                        .window
                        .weekdays
                        .is_disjoint(&drafts[later].window.weekdays);
                if touches {
                    shift_start(&mut drafts[later].window);
                    shifted = true;
                }
            }
        }
        if !shifted {
            break;
        }
    }
}

fn shift_start(window: &mut ScheduledWindow) {
    let shifted = window.start.add_minute();
    if shifted == TimeOfDay::MIDNIGHT {
        // The start rolled into the next day, so every weekday moves with it.
        window.weekdays = window.weekdays.iter().map(|day| day.next()).collect();
    }
    debug!(
        "room {}: start {} shifted to {} to keep a gap",
        window.room_id, window.start, shifted
    );
    window.start = shifted;
}

/// Removes the weekdays on which a window still collides with an earlier one
/// after gap insertion. Windows left without weekdays are dropped.
fn drop_conflicts(
    room: u32,
    windows: Vec<ScheduledWindow>,
    warnings: &mut Vec<HeatingError>,
) -> Vec<ScheduledWindow> {
    let mut kept: Vec<ScheduledWindow> = Vec::new();

    for mut window in windows {
        if window.start == window.end {
            warnings.push(conflict(room, &window, window.weekdays.iter().next().copied()));
            continue;
        }

        let conflicting: Vec<DayOfWeek> = window
            .weekly_spans()
            .filter(|&(_, offset, length)| {
                kept.iter().any(|other| {
                    other
                        .weekly_spans()
                        .any(|(_, o, l)| spans_overlap((offset, length), (o, l)))
                })
            })
            .map(|(day, _, _)| day)
            .collect();

        for day in conflicting {
            warnings.push(conflict(room, &window, Some(day)));
            window.weekdays.remove(&day);
        }

        if !window.weekdays.is_empty() {
            kept.push(window);
        }
    }

    kept
}

fn conflict(room: u32, window: &ScheduledWindow, day: Option<DayOfWeek>) -> HeatingError {
    HeatingError::SchedulingConflictUnresolved {
        room,
        day: day.unwrap_or(DayOfWeek::Sun),
        start: window.start,
        end: window.end,
    }
}

fn spans_overlap(a: (u32, u32), b: (u32, u32)) -> bool {
    let contains = |(offset, length): (u32, u32), minute: u32| {
        (minute + MINUTES_PER_WEEK - offset) % MINUTES_PER_WEEK < length
    };
    contains(a, b.0) || contains(b, a.0)
}
