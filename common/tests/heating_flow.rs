use chrono::{DateTime, FixedOffset, TimeZone};
use heating_common::{
    EngineAction, HeatingConfig, HeatingEngine, HeatingMode, LevelChange, ModeCommand,
    TimeOfDay, RESET_POLL_KEY,
};
use pretty_assertions::assert_eq;

// January 5, 2026 is a Monday.
fn at(day: u32, hour: u32, minute: u32) -> DateTime<FixedOffset> {
    FixedOffset::east_opt(0)
        .unwrap()
        .with_ymd_and_hms(2026, 1, day, hour, minute, 0)
        .unwrap()
}

fn setpoints(actions: &[EngineAction]) -> Vec<(String, f32)> {
    actions
        .iter()
        .filter_map(|action| match action {
            EngineAction::SetPoint { device_id, level } => Some((device_id.clone(), *level)),
            _ => None,
        })
        .collect()
}

fn load(raw: &str) -> HeatingConfig {
    let mut config: HeatingConfig = serde_json::from_str(raw).unwrap();
    config.sanitize();
    config
}

const MONDAY_TABLE: &str = r#"{
    "rooms": [{
        "room": 1,
        "comfortTemp": 22,
        "energySaveTemp": 17,
        "fallbackTemp": "E",
        "schedule": {
            "1": [
                {"stime": "06:00", "etime": "09:00", "temp": 21},
                {"stime": "09:00", "etime": "18:00", "temp": 18}
            ]
        }
    }],
    "resetTime": 1,
    "thermostats": [{"id": "th-1", "room": 1}]
}"#;

const ROUND_THE_CLOCK: &str = r#"{
    "rooms": [{
        "room": 2,
        "comfortTemp": 21,
        "energySaveTemp": 17,
        "schedule": {
            "0": [{"stime": "08:00", "etime": "22:00", "temp": 21}, {"stime": "22:00", "etime": "08:00", "temp": 16.5}],
            "1": [{"stime": "08:00", "etime": "22:00", "temp": 21}, {"stime": "22:00", "etime": "08:00", "temp": 16.5}],
            "2": [{"stime": "08:00", "etime": "22:00", "temp": 21}, {"stime": "22:00", "etime": "08:00", "temp": 16.5}]
        }
    }],
    "thermostats": [{"id": "th-2", "room": 2}]
}"#;

const OVERNIGHT_THEN_MORNING: &str = r#"{
    "rooms": [{
        "room": 3,
        "comfortTemp": 21,
        "energySaveTemp": 17,
        "schedule": {
            "1": [{"stime": "22:00", "etime": "08:00", "temp": 16}],
            "2": [{"stime": "08:00", "etime": "12:00", "temp": 21}]
        }
    }],
    "thermostats": [{"id": "th-3", "room": 3}]
}"#;

fn scheduled(
    raw: &str,
    room: u32,
    now: DateTime<FixedOffset>,
) -> (HeatingEngine, Vec<EngineAction>) {
    let mut engine = HeatingEngine::new(&load(raw));
    engine.start(None, now);
    let actions = engine
        .handle_command(ModeCommand::for_room(HeatingMode::Schedule, room), now)
        .unwrap();
    (engine, actions)
}

#[test]
fn adjacent_rules_compile_with_gap_and_catch_up_at_shared_boundary() {
    let (engine, actions) = scheduled(MONDAY_TABLE, 1, at(5, 9, 0));

    let starts: Vec<TimeOfDay> = engine.windows().iter().map(|w| w.start).collect();
    assert_eq!(
        starts,
        vec![
            TimeOfDay::parse("06:00").unwrap(),
            TimeOfDay::parse("09:01").unwrap()
        ]
    );
    assert!(engine.warnings().is_empty());
    assert_eq!(setpoints(&actions), vec![("th-1".to_string(), 21.0)]);
}

#[test]
fn catch_up_after_gap_selects_following_window() {
    let (_, actions) = scheduled(MONDAY_TABLE, 1, at(5, 9, 1));

    assert_eq!(setpoints(&actions), vec![("th-1".to_string(), 18.0)]);
}

#[test]
fn catch_up_outside_every_window_uses_energy_save() {
    let (engine, actions) = scheduled(MONDAY_TABLE, 1, at(6, 7, 0));

    assert_eq!(setpoints(&actions), vec![("th-1".to_string(), 17.0)]);
    assert_eq!(engine.registry().len(), 4);
}

#[test]
fn overnight_window_is_found_on_both_sides_of_midnight() {
    let (_, evening) = scheduled(ROUND_THE_CLOCK, 2, at(5, 23, 30));
    assert_eq!(setpoints(&evening), vec![("th-2".to_string(), 16.5)]);

    let (_, morning) = scheduled(ROUND_THE_CLOCK, 2, at(6, 7, 30));
    assert_eq!(setpoints(&morning), vec![("th-2".to_string(), 16.5)]);

    let (_, day) = scheduled(ROUND_THE_CLOCK, 2, at(6, 12, 0));
    assert_eq!(setpoints(&day), vec![("th-2".to_string(), 21.0)]);
}

#[test]
fn repeated_schedule_command_registers_nothing_new() {
    let (mut engine, _) = scheduled(MONDAY_TABLE, 1, at(5, 7, 0));
    let registered = engine.registry().len();

    let again = engine
        .handle_command(ModeCommand::for_room(HeatingMode::Schedule, 1), at(5, 7, 10))
        .unwrap();

    assert!(!again
        .iter()
        .any(|action| matches!(action, EngineAction::Timer(_))));
    assert_eq!(setpoints(&again), vec![("th-1".to_string(), 21.0)]);
    assert_eq!(engine.registry().len(), registered);
}

#[test]
fn external_change_is_reset_after_configured_delay() {
    let (mut engine, _) = scheduled(MONDAY_TABLE, 1, at(5, 10, 0));
    assert_eq!(
        engine.on_level_change("th-1", 18.0, at(5, 10, 0)),
        LevelChange::EngineEcho
    );
    engine.on_timer("heating.1.1.1.end.18.0", at(5, 18, 0));
    assert_eq!(
        engine.on_level_change("th-1", 17.0, at(5, 18, 0)),
        LevelChange::EngineEcho
    );

    assert!(matches!(
        engine.on_level_change("th-1", 21.0, at(5, 19, 0)),
        LevelChange::ResetArmed { .. }
    ));
    assert!(setpoints(&engine.on_timer(RESET_POLL_KEY, at(5, 19, 59))).is_empty());

    let actions = engine.on_timer(RESET_POLL_KEY, at(5, 20, 0));

    assert_eq!(setpoints(&actions), vec![("th-1".to_string(), 17.0)]);
    assert_eq!(
        engine.on_level_change("th-1", 17.0, at(5, 20, 0)),
        LevelChange::EngineEcho
    );
    assert_eq!(engine.status().pending_resets, 0);
}

#[test]
fn reset_is_skipped_when_device_is_already_back() {
    let (mut engine, _) = scheduled(MONDAY_TABLE, 1, at(5, 10, 0));
    engine.on_level_change("th-1", 18.0, at(5, 10, 0));
    engine.on_level_change("th-1", 23.0, at(5, 11, 0));
    engine.on_level_change("th-1", 18.0, at(5, 11, 30));

    let actions = engine.on_timer(RESET_POLL_KEY, at(5, 12, 30));

    assert!(setpoints(&actions).is_empty());
    assert_eq!(engine.status().pending_resets, 0);
}

#[test]
fn engine_commands_never_arm_resets() {
    let (mut engine, _) = scheduled(MONDAY_TABLE, 1, at(5, 5, 0));

    for (hour, minute, key) in [
        (6, 0, "heating.1.0.1.start.6.0.21"),
        (9, 0, "heating.1.0.1.end.9.0"),
        (9, 1, "heating.1.1.1.start.9.1.18"),
    ] {
        let actions = engine.on_timer(key, at(5, hour, minute));
        for (device, level) in setpoints(&actions) {
            assert_eq!(
                engine.on_level_change(&device, level, at(5, hour, minute + 1)),
                LevelChange::EngineEcho
            );
        }
    }

    assert_eq!(engine.status().pending_resets, 0);
    assert_eq!(engine.room_state(1).unwrap().target_temp, Some(18.0));
}

#[test]
fn status_serializes_for_the_api() {
    let (engine, _) = scheduled(MONDAY_TABLE, 1, at(5, 7, 0));

    let json = serde_json::to_value(engine.status()).unwrap();

    assert_eq!(json["state"], "custom");
    assert_eq!(json["rooms"][0]["mode"], "schedule");
    assert_eq!(json["rooms"][0]["targetTemp"], 21.0);
    assert_eq!(json["registeredTransitions"], 4);
}

#[test]
fn overnight_window_meets_next_day_window_without_conflict() {
    let (engine, at_handover) = scheduled(OVERNIGHT_THEN_MORNING, 3, at(6, 8, 0));

    assert!(engine.warnings().is_empty());
    assert_eq!(engine.windows().len(), 2);
    assert_eq!(setpoints(&at_handover), vec![("th-3".to_string(), 21.0)]);

    let (_, before) = scheduled(OVERNIGHT_THEN_MORNING, 3, at(6, 7, 59));
    assert_eq!(setpoints(&before), vec![("th-3".to_string(), 16.0)]);
}

#[test]
fn overnight_end_hands_over_to_window_starting_in_same_minute() {
    let (mut engine, evening) = scheduled(OVERNIGHT_THEN_MORNING, 3, at(5, 23, 0));
    assert_eq!(setpoints(&evening), vec![("th-3".to_string(), 16.0)]);

    let end = engine.on_timer("heating.3.0.2.end.8.0", at(6, 8, 0));
    assert_eq!(setpoints(&end), vec![("th-3".to_string(), 21.0)]);

    let start = engine.on_timer("heating.3.1.2.start.8.0.21", at(6, 8, 0));
    assert_eq!(setpoints(&start), vec![("th-3".to_string(), 21.0)]);

    let noon = engine.on_timer("heating.3.1.2.end.12.0", at(6, 12, 0));
    assert_eq!(setpoints(&noon), vec![("th-3".to_string(), 17.0)]);
}
