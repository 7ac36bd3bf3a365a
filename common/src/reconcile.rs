use std::collections::HashMap;

use tracing::{debug, info};

/// How long an engine-issued command may take to echo back as a level change.
pub const ENGINE_ECHO_WINDOW_MS: i64 = 120_000;

pub(crate) const LEVEL_EPSILON: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelChange {
    /// The engine's own command reporting back.
    EngineEcho,
    /// External change; a reset is due at the given epoch millis.
    ResetArmed { due_at_ms: i64 },
    /// External change while reconciliation is disabled.
    Ignored,
    /// Repeated report of the level already known.
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correction {
    pub level: f32,
}

/// Restores thermostats changed by anything other than this engine.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationEngine {
    reset_delay_ms: Option<i64>,
    intended: HashMap<String, f32>,
    engine_changed: HashMap<String, i64>,
    pending: HashMap<String, i64>,
}

impl ReconciliationEngine {
    /// `reset_delay_ms` of `None` or zero disables resets entirely.
    pub fn new(reset_delay_ms: Option<u64>) -> Self {
        Self {
            reset_delay_ms: reset_delay_ms
                .filter(|ms| *ms > 0)
                .map(|ms| i64::try_from(ms).unwrap_or(i64::MAX)),
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.reset_delay_ms.is_some()
    }

    /// Seeds the intended level of a newly seen device. Existing entries win.
    pub fn track(&mut self, device_id: &str, level: Option<f32>) {
        if let Some(level) = level {
            self.intended.entry(device_id.to_string()).or_insert(level);
        }
    }

    /// Records a command the engine is about to issue. Any reset waiting on the
    /// device is superseded.
    pub fn record_command(&mut self, device_id: &str, level: f32, now_ms: i64) {
        self.intended.insert(device_id.to_string(), level);
        self.engine_changed.insert(device_id.to_string(), now_ms);
        if self.pending.remove(device_id).is_some() {
            debug!("pending reset of {device_id} superseded by engine command");
        }
    }

    pub fn on_level_change(&mut self, device_id: &str, level: f32, now_ms: i64) -> LevelChange {
        if let Some(marked_at) = self.engine_changed.remove(device_id) {
            if now_ms.saturating_sub(marked_at) <= ENGINE_ECHO_WINDOW_MS {
                return LevelChange::EngineEcho;
            }
        }

        let Some(delay) = self.reset_delay_ms else {
            return LevelChange::Ignored;
        };

        let due_at_ms = now_ms.saturating_add(delay);
        self.pending.insert(device_id.to_string(), due_at_ms);
        info!("{device_id} changed externally to {level}, reset due at {due_at_ms}");
        LevelChange::ResetArmed { due_at_ms }
    }

    /// Settles every due reset. `live_level` reports the device's current level;
    /// devices it does not know stay pending.
    pub fn sweep(
        &mut self,
        now_ms: i64,
        live_level: impl Fn(&str) -> Option<f32>,
    ) -> Vec<(String, Correction)> {
        let due: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, due_at)| **due_at <= now_ms)
            .map(|(device, _)| device.clone())
            .collect();

        let mut corrections = Vec::new();
        for device_id in due {
            let Some(live) = live_level(&device_id) else {
                continue;
            };
            self.pending.remove(&device_id);

            let Some(&intended) = self.intended.get(&device_id) else {
                debug!("{device_id} has no intended level, dropping reset");
                continue;
            };

            if (intended - live).abs() <= LEVEL_EPSILON {
                debug!("{device_id} already back at {intended}");
                continue;
            }

            info!("resetting {device_id} from {live} to {intended}");
            self.engine_changed.insert(device_id.clone(), now_ms);
            corrections.push((device_id, Correction { level: intended }));
        }
        corrections.sort_by(|a, b| a.0.cmp(&b.0));
        corrections
    }

    pub fn forget(&mut self, device_id: &str) {
        self.intended.remove(device_id);
        self.engine_changed.remove(device_id);
        self.pending.remove(device_id);
    }

    /// Drops pending resets and echo markers; intended levels are kept.
    pub fn clear_pending(&mut self) {
        self.pending.clear();
        self.engine_changed.clear();
    }

    pub fn intended_level(&self, device_id: &str) -> Option<f32> {
        self.intended.get(device_id).copied()
    }

    pub fn pending_reset(&self, device_id: &str) -> Option<i64> {
        self.pending.get(device_id).copied()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR_MS: u64 = 3_600_000;

    #[test]
    fn restores_intended_level_after_delay() {
        let mut engine = ReconciliationEngine::new(Some(HOUR_MS));
        engine.record_command("th-1", 21.0, 0);
        assert_eq!(engine.on_level_change("th-1", 21.0, 1_000), LevelChange::EngineEcho);

        let t = 10_000;
        assert_eq!(
            engine.on_level_change("th-1", 18.0, t),
            LevelChange::ResetArmed {
                due_at_ms: t + HOUR_MS as i64
            }
        );

        assert!(engine.sweep(t + HOUR_MS as i64 - 1, |_| Some(18.0)).is_empty());
        let corrections = engine.sweep(t + HOUR_MS as i64, |_| Some(18.0));

        assert_eq!(
            corrections,
            vec![("th-1".to_string(), Correction { level: 21.0 })]
        );
        assert_eq!(engine.pending_count(), 0);
    }

    #[test]
    fn corrective_command_does_not_rearm_itself() {
        let mut engine = ReconciliationEngine::new(Some(HOUR_MS));
        engine.record_command("th-1", 21.0, 0);
        engine.on_level_change("th-1", 21.0, 0);
        engine.on_level_change("th-1", 18.0, 0);

        let now = HOUR_MS as i64;
        assert_eq!(engine.sweep(now, |_| Some(18.0)).len(), 1);
        assert_eq!(engine.on_level_change("th-1", 21.0, now + 5_000), LevelChange::EngineEcho);
        assert_eq!(engine.pending_count(), 0);
    }

    #[test]
    fn no_command_when_device_already_back() {
        let mut engine = ReconciliationEngine::new(Some(HOUR_MS));
        engine.record_command("th-1", 21.0, 0);
        engine.on_level_change("th-1", 21.0, 0);
        engine.on_level_change("th-1", 18.0, 100);
        engine.on_level_change("th-1", 21.0, 200);

        assert!(engine.sweep(HOUR_MS as i64 + 200, |_| Some(21.0)).is_empty());
        assert_eq!(engine.pending_count(), 0);
    }

    #[test]
    fn engine_command_never_arms_a_reset() {
        let mut engine = ReconciliationEngine::new(Some(HOUR_MS));
        engine.record_command("th-1", 21.0, 0);

        assert_eq!(engine.on_level_change("th-1", 21.0, 500), LevelChange::EngineEcho);
        assert_eq!(engine.pending_reset("th-1"), None);
    }

    #[test]
    fn stale_echo_marker_does_not_hide_external_change() {
        let mut engine = ReconciliationEngine::new(Some(HOUR_MS));
        engine.record_command("th-1", 21.0, 0);

        let late = ENGINE_ECHO_WINDOW_MS + 1;
        assert!(matches!(
            engine.on_level_change("th-1", 16.0, late),
            LevelChange::ResetArmed { .. }
        ));
    }

    #[test]
    fn engine_command_supersedes_pending_reset() {
        let mut engine = ReconciliationEngine::new(Some(HOUR_MS));
        engine.on_level_change("th-1", 18.0, 0);
        assert!(engine.pending_reset("th-1").is_some());

        engine.record_command("th-1", 22.0, 10);

        assert_eq!(engine.pending_reset("th-1"), None);
        assert_eq!(engine.intended_level("th-1"), Some(22.0));
    }

    #[test]
    fn disabled_engine_never_arms() {
        for delay in [None, Some(0)] {
            let mut engine = ReconciliationEngine::new(delay);
            assert!(!engine.is_enabled());
            assert_eq!(engine.on_level_change("th-1", 18.0, 0), LevelChange::Ignored);
            assert!(engine.sweep(i64::MAX, |_| Some(18.0)).is_empty());
        }
    }

    #[test]
    fn unknown_devices_stay_pending() {
        let mut engine = ReconciliationEngine::new(Some(1));
        engine.track("th-1", Some(20.0));
        engine.on_level_change("th-1", 18.0, 0);

        assert!(engine.sweep(10, |_| None).is_empty());
        assert_eq!(engine.pending_count(), 1);
        assert_eq!(engine.sweep(10, |_| Some(18.0)).len(), 1);
    }
}
