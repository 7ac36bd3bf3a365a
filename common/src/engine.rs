use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    compiler::{self, Compilation},
    config::{HeatingConfig, RoomConfig},
    error::HeatingError,
    reconcile::{LevelChange, ReconciliationEngine, LEVEL_EPSILON},
    schedule::{DayOfWeek, ScheduledWindow},
    store::RoomStateStore,
    time_of_day::TimeOfDay,
    transition::{CronSpec, TimerChange, Transition, TransitionKind, TransitionRegistry},
    types::{
        HeatingMode, HouseState, ModeCommand, NotificationLevel, Preset, RoomRuntimeState,
        TempSetting, FROST_PROTECTION_TEMP,
    },
};

pub const RESET_POLL_KEY: &str = "heating.reset.poll";
pub const BOOTSTRAP_POLL_KEY: &str = "heating.bootstrap.poll";

#[derive(Debug, Clone, PartialEq)]
pub enum EngineAction {
    SetPoint { device_id: String, level: f32 },
    Timer(TimerChange),
    Notify { level: NotificationLevel, message: String },
    Publish(HouseState),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelSnapshot {
    #[serde(rename = "deviceId")]
    pub device_id: String,
    pub level: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    #[serde(flatten)]
    pub house: HouseState,
    #[serde(rename = "registeredTransitions")]
    pub registered_transitions: usize,
    #[serde(rename = "pendingResets")]
    pub pending_resets: usize,
    #[serde(rename = "preWindowLevels")]
    pub pre_window_levels: BTreeMap<u32, Vec<LevelSnapshot>>,
}

#[derive(Debug, Clone)]
struct TrackedThermostat {
    room: u32,
    level: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct HeatingEngine {
    rooms: Vec<RoomConfig>,
    compilation: Compilation,
    registry: TransitionRegistry,
    reconciler: ReconciliationEngine,
    store: RoomStateStore,
    thermostats: BTreeMap<String, TrackedThermostat>,
    pre_window_levels: BTreeMap<u32, Vec<LevelSnapshot>>,
    running: bool,
}

impl HeatingEngine {
    pub fn new(config: &HeatingConfig) -> Self {
        let compilation = compiler::compile(&config.rooms);
        let room_states = config
            .rooms
            .iter()
            .map(|room| RoomRuntimeState::new(room.room, compilation.has_schedule(room.room)))
            .collect();

        let mut engine = Self {
            rooms: config.rooms.clone(),
            compilation,
            registry: TransitionRegistry::new(),
            reconciler: ReconciliationEngine::new(config.reset_delay_ms()),
            store: RoomStateStore::new(room_states),
            thermostats: BTreeMap::new(),
            pre_window_levels: BTreeMap::new(),
            running: false,
        };

        for binding in &config.thermostats {
            engine.track_thermostat(&binding.id, binding.room, None);
        }
        engine
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn windows(&self) -> &[ScheduledWindow] {
        &self.compilation.windows
    }

    pub fn warnings(&self) -> &[HeatingError] {
        &self.compilation.warnings
    }

    pub fn registry(&self) -> &TransitionRegistry {
        &self.registry
    }

    pub fn reconciler(&self) -> &ReconciliationEngine {
        &self.reconciler
    }

    pub fn house_state(&self) -> HouseState {
        self.store.snapshot()
    }

    pub fn room_state(&self, room_id: u32) -> Option<&RoomRuntimeState> {
        self.store.get(room_id)
    }

    pub fn thermostat_level(&self, device_id: &str) -> Option<f32> {
        self.thermostats.get(device_id).and_then(|t| t.level)
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            house: self.store.snapshot(),
            registered_transitions: self.registry.len(),
            pending_resets: self.reconciler.pending_count(),
            pre_window_levels: self.pre_window_levels.clone(),
        }
    }

    /// Brings the engine up: surfaces compile warnings, restores the last
    /// published state, registers the reset sweep and re-performs the stored
    /// house command. A bootstrap poll repeats that command once more for
    /// thermostats that appear late.
    pub fn start(
        &mut self,
        restored: Option<&HouseState>,
        now: DateTime<FixedOffset>,
    ) -> Vec<EngineAction> {
        let mut actions: Vec<EngineAction> = self
            .compilation
            .warnings
            .iter()
            .map(|warning| EngineAction::Notify {
                level: NotificationLevel::Warning,
                message: warning.to_string(),
            })
            .collect();

        if let Some(house) = restored {
            for room in &house.rooms {
                self.store.update(room.room_id, |state| {
                    state.mode = room.mode;
                    state.target_temp = room.target_temp;
                });
            }
            self.store.set_house_mode(house.state);
        }

        self.running = true;
        actions.push(EngineAction::Timer(TimerChange::Add {
            key: RESET_POLL_KEY.to_string(),
            spec: CronSpec::every_minute(),
        }));
        self.reapply_house_mode(now, &mut actions);
        actions.push(EngineAction::Timer(TimerChange::Add {
            key: BOOTSTRAP_POLL_KEY.to_string(),
            spec: CronSpec::every_minute(),
        }));

        info!(
            "heating engine started in {} mode with {} rooms",
            self.store.house_mode(),
            self.rooms.len()
        );
        self.flush(&mut actions);
        actions
    }

    /// Cancels every registration and resets room state.
    pub fn stop(&mut self) -> Vec<EngineAction> {
        let mut actions: Vec<EngineAction> = self
            .registry
            .deregister_all()
            .into_iter()
            .map(EngineAction::Timer)
            .collect();
        for key in [RESET_POLL_KEY, BOOTSTRAP_POLL_KEY] {
            actions.push(EngineAction::Timer(TimerChange::Remove {
                key: key.to_string(),
            }));
        }

        self.reconciler.clear_pending();
        self.pre_window_levels.clear();
        self.store.reset();
        self.running = false;

        info!("heating engine stopped");
        self.flush(&mut actions);
        actions
    }

    pub fn handle_command(
        &mut self,
        command: ModeCommand,
        now: DateTime<FixedOffset>,
    ) -> Result<Vec<EngineAction>, HeatingError> {
        if let Some(room) = command.room {
            if self.room_config(room).is_none() {
                return Err(HeatingError::UnknownRoom(room));
            }
        }
        if let Some(temp) = command.temp {
            if !TempSetting::Degrees(temp).is_in_range() {
                return Err(HeatingError::TemperatureOutOfRange(temp));
            }
        }

        info!(
            "command {} for {}",
            command.command,
            command
                .room
                .map_or_else(|| "all rooms".to_string(), |room| format!("room {room}"))
        );

        let mut actions = Vec::new();
        let targets = match command.room {
            Some(room) => vec![room],
            None => self.store.room_ids(),
        };

        for room in targets {
            let Some(current) = self.store.get(room).cloned() else {
                continue;
            };
            // An unaddressed custom command replays each room's own mode.
            let room_mode = if command.room.is_none()
                && command.command == HeatingMode::Custom
                && command.temp.is_none()
            {
                current.mode
            } else {
                command.command
            };
            self.apply_room_mode(room, room_mode, command.temp, &current, now, &mut actions);
        }

        let house_mode = if command.room.is_some() {
            HeatingMode::Custom
        } else {
            command.command
        };
        self.store.set_house_mode(house_mode);

        self.flush(&mut actions);
        Ok(actions)
    }

    /// Registers the room's transitions and applies whichever window is active
    /// right now, or the energy-save temperature when none is. Returns whether
    /// a window was active.
    pub fn activate(
        &mut self,
        room: u32,
        now: DateTime<FixedOffset>,
    ) -> Result<(bool, Vec<EngineAction>), HeatingError> {
        let mut actions = Vec::new();
        let found = self.activate_into(room, now, &mut actions)?;
        self.flush(&mut actions);
        Ok((found, actions))
    }

    pub fn deactivate(&mut self, room: u32) -> Vec<EngineAction> {
        let mut actions = Vec::new();
        self.deactivate_into(room, &mut actions);
        self.flush(&mut actions);
        actions
    }

    /// Entry point for every timer the engine registered.
    pub fn on_timer(&mut self, key: &str, now: DateTime<FixedOffset>) -> Vec<EngineAction> {
        let mut actions = Vec::new();
        if !self.running {
            debug!("timer {key} fired while stopped");
            return actions;
        }

        match key {
            RESET_POLL_KEY => self.sweep_resets(now, &mut actions),
            BOOTSTRAP_POLL_KEY => {
                actions.push(EngineAction::Timer(TimerChange::Remove {
                    key: BOOTSTRAP_POLL_KEY.to_string(),
                }));
                self.reapply_house_mode(now, &mut actions);
            }
            _ => match self.registry.get(key).cloned() {
                Some(transition) => self.fire_transition(&transition, now, &mut actions),
                None => debug!("timer {key} is not registered, ignoring"),
            },
        }

        self.flush(&mut actions);
        actions
    }

    pub fn on_transition_fire(
        &mut self,
        transition: &Transition,
        now: DateTime<FixedOffset>,
    ) -> Vec<EngineAction> {
        let mut actions = Vec::new();
        self.fire_transition(transition, now, &mut actions);
        self.flush(&mut actions);
        actions
    }

    /// A thermostat reported by the device layer. Devices in unconfigured rooms
    /// are not tracked.
    pub fn register_thermostat(
        &mut self,
        device_id: &str,
        room: u32,
        level: Option<f32>,
        now: DateTime<FixedOffset>,
    ) -> Vec<EngineAction> {
        let mut actions = Vec::new();
        if !self.track_thermostat(device_id, room, level) {
            return actions;
        }

        let scheduled = self
            .store
            .get(room)
            .is_some_and(|state| state.mode == HeatingMode::Schedule);
        if self.running && scheduled && !self.registry.is_registered(room) {
            info!("room {room} gained thermostat {device_id}, activating schedule");
            if let Err(err) = self.activate_into(room, now, &mut actions) {
                notify(&mut actions, NotificationLevel::Warning, &err);
            }
        }

        self.flush(&mut actions);
        actions
    }

    pub fn remove_thermostat(&mut self, device_id: &str) {
        if self.thermostats.remove(device_id).is_some() {
            self.reconciler.forget(device_id);
            debug!("thermostat {device_id} removed");
        }
    }

    pub fn on_level_change(
        &mut self,
        device_id: &str,
        level: f32,
        now: DateTime<FixedOffset>,
    ) -> LevelChange {
        let Some(thermostat) = self.thermostats.get_mut(device_id) else {
            return LevelChange::Ignored;
        };
        let previous = thermostat.level.replace(level);
        if previous.is_some_and(|known| (known - level).abs() <= LEVEL_EPSILON) {
            debug!("{device_id} repeated level {level}");
            return LevelChange::Unchanged;
        }
        if !self.running {
            return LevelChange::Ignored;
        }
        self.reconciler
            .on_level_change(device_id, level, now.timestamp_millis())
    }

    fn track_thermostat(&mut self, device_id: &str, room: u32, level: Option<f32>) -> bool {
        if self.room_config(room).is_none() {
            debug!("thermostat {device_id} is in unmanaged room {room}");
            return false;
        }
        let entry = self
            .thermostats
            .entry(device_id.to_string())
            .or_insert(TrackedThermostat { room, level });
        entry.room = room;
        if level.is_some() {
            entry.level = level;
        }
        self.reconciler.track(device_id, level);
        true
    }

    fn apply_room_mode(
        &mut self,
        room: u32,
        mode: HeatingMode,
        custom_temp: Option<f32>,
        current: &RoomRuntimeState,
        now: DateTime<FixedOffset>,
        actions: &mut Vec<EngineAction>,
    ) {
        if current.mode == HeatingMode::Schedule && mode != HeatingMode::Schedule {
            self.deactivate_into(room, actions);
        }

        let target = match mode {
            HeatingMode::Schedule => {
                if let Err(err) = self.activate_into(room, now, actions) {
                    notify(actions, NotificationLevel::Warning, &err);
                }
                None
            }
            HeatingMode::Custom => custom_temp.or(current.target_temp),
            HeatingMode::Comfort => Some(self.resolve(room, TempSetting::Preset(Preset::Comfort))),
            HeatingMode::EnergySave => {
                Some(self.resolve(room, TempSetting::Preset(Preset::EnergySave)))
            }
            HeatingMode::Frost => Some(FROST_PROTECTION_TEMP),
        };

        if let Some(temp) = target {
            self.command_room(room, temp, now, actions);
        }
        self.store.update(room, |state| state.mode = mode);
    }

    fn activate_into(
        &mut self,
        room: u32,
        now: DateTime<FixedOffset>,
        actions: &mut Vec<EngineAction>,
    ) -> Result<bool, HeatingError> {
        if self.room_thermostats(room).is_empty() {
            return Err(HeatingError::NoThermostatsInRoom(room));
        }

        let changes = self
            .registry
            .register(room, self.compilation.room_windows(room));
        actions.extend(changes.into_iter().map(EngineAction::Timer));

        let day = DayOfWeek::of(&now);
        let time = TimeOfDay::from_datetime(&now);
        let active = self.active_window(room, day, time, None);

        match active {
            Some((index, setting)) => {
                info!("room {room}: window {index} already active at {time}, catching up");
                self.capture_pre_window_levels(room);
                let temp = self.resolve(room, setting);
                self.command_room(room, temp, now, actions);
                Ok(true)
            }
            None => {
                debug!("room {room}: no window active at {time}, using energy-save");
                let temp = self.resolve(room, TempSetting::Preset(Preset::EnergySave));
                self.command_room(room, temp, now, actions);
                Ok(false)
            }
        }
    }

    fn deactivate_into(&mut self, room: u32, actions: &mut Vec<EngineAction>) {
        let removed = self.registry.deregister(room);
        debug!("room {room}: {} transitions deregistered", removed.len());
        actions.extend(removed.into_iter().map(EngineAction::Timer));
        self.pre_window_levels.remove(&room);
    }

    fn fire_transition(
        &mut self,
        transition: &Transition,
        now: DateTime<FixedOffset>,
        actions: &mut Vec<EngineAction>,
    ) {
        let room = transition.room_id;
        let scheduled = self
            .store
            .get(room)
            .is_some_and(|state| state.mode == HeatingMode::Schedule);
        if !scheduled {
            debug!("room {room} left schedule mode, dropping {}", transition.key());
            return;
        }
        if self.room_thermostats(room).is_empty() {
            warn!("room {room}: transition fired without thermostats");
            return;
        }

        let setting = match transition.kind {
            TransitionKind::Start => {
                self.capture_pre_window_levels(room);
                transition.setting
            }
            TransitionKind::End => {
                let day = DayOfWeek::of(&now);
                let time = TimeOfDay::from_datetime(&now);
                match self.active_window(room, day, time, Some(transition.window_index)) {
                    Some((_, setting)) => setting,
                    None => TempSetting::Preset(
                        self.room_config(room)
                            .map(|cfg| cfg.fallback_temp)
                            .unwrap_or_default(),
                    ),
                }
            }
        };

        let temp = self.resolve(room, setting);
        info!(
            "room {room}: {} transition at {} sets {temp}",
            transition.kind.as_str(),
            transition.at
        );
        self.command_room(room, temp, now, actions);
    }

    fn sweep_resets(&mut self, now: DateTime<FixedOffset>, actions: &mut Vec<EngineAction>) {
        let thermostats = &self.thermostats;
        let corrections = self
            .reconciler
            .sweep(now.timestamp_millis(), |id| {
                thermostats.get(id).and_then(|t| t.level)
            });
        actions.extend(
            corrections
                .into_iter()
                .map(|(device_id, correction)| EngineAction::SetPoint {
                    device_id,
                    level: correction.level,
                }),
        );
    }

    fn reapply_house_mode(&mut self, now: DateTime<FixedOffset>, actions: &mut Vec<EngineAction>) {
        let command = ModeCommand::all_rooms(self.store.house_mode());
        match self.handle_command(command, now) {
            Ok(mut applied) => actions.append(&mut applied),
            Err(err) => notify(actions, NotificationLevel::Error, &err),
        }
    }

    fn active_window(
        &self,
        room: u32,
        day: DayOfWeek,
        time: TimeOfDay,
        except: Option<usize>,
    ) -> Option<(usize, TempSetting)> {
        let active: Vec<(usize, &ScheduledWindow)> = self
            .compilation
            .room_windows(room)
            .enumerate()
            .filter(|(index, window)| Some(*index) != except && window.is_active_at(day, time))
            .collect();

        // A window in its last minute yields to one that starts in that minute.
        active
            .iter()
            .find(|(_, window)| window.end != time)
            .or_else(|| active.first())
            .map(|(index, window)| (*index, window.temperature))
    }

    fn command_room(
        &mut self,
        room: u32,
        temp: f32,
        now: DateTime<FixedOffset>,
        actions: &mut Vec<EngineAction>,
    ) {
        for device_id in self.room_thermostats(room) {
            self.reconciler
                .record_command(&device_id, temp, now.timestamp_millis());
            actions.push(EngineAction::SetPoint {
                device_id,
                level: temp,
            });
        }
        self.store.update(room, |state| state.target_temp = Some(temp));
    }

    fn capture_pre_window_levels(&mut self, room: u32) {
        let levels = self
            .thermostats
            .iter()
            .filter(|(_, t)| t.room == room)
            .map(|(id, t)| LevelSnapshot {
                device_id: id.clone(),
                level: t.level,
            })
            .collect();
        self.pre_window_levels.insert(room, levels);
    }

    fn resolve(&self, room: u32, setting: TempSetting) -> f32 {
        let Some(cfg) = self.room_config(room) else {
            return FROST_PROTECTION_TEMP;
        };
        match setting {
            TempSetting::Degrees(temp) => temp,
            TempSetting::Preset(Preset::Frost) => FROST_PROTECTION_TEMP,
            TempSetting::Preset(Preset::EnergySave) => cfg.energy_save_temp,
            TempSetting::Preset(Preset::Comfort) => cfg.comfort_temp,
        }
    }

    fn room_config(&self, room: u32) -> Option<&RoomConfig> {
        self.rooms.iter().find(|cfg| cfg.room == room)
    }

    fn room_thermostats(&self, room: u32) -> Vec<String> {
        self.thermostats
            .iter()
            .filter(|(_, t)| t.room == room)
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn flush(&mut self, actions: &mut Vec<EngineAction>) {
        if let Some(house) = self.store.take_changes() {
            actions.push(EngineAction::Publish(house));
        }
    }
}

fn notify(actions: &mut Vec<EngineAction>, level: NotificationLevel, err: &HeatingError) {
    warn!("{err}");
    actions.push(EngineAction::Notify {
        level,
        message: err.to_string(),
    });
}
