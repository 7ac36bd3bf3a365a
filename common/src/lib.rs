pub mod compiler;
pub mod config;
pub mod engine;
pub mod error;
pub mod reconcile;
pub mod schedule;
pub mod store;
pub mod time_of_day;
pub mod topics;
pub mod transition;
pub mod types;

pub use compiler::{compile, Compilation};
pub use config::{HeatingConfig, NetworkConfig, RawRule, RoomConfig, ThermostatBinding};
pub use engine::{EngineAction, EngineStatus, HeatingEngine, BOOTSTRAP_POLL_KEY, RESET_POLL_KEY};
pub use error::HeatingError;
pub use reconcile::{LevelChange, ReconciliationEngine};
pub use schedule::{DayOfWeek, ScheduledWindow};
pub use store::RoomStateStore;
pub use time_of_day::TimeOfDay;
pub use topics::*;
pub use transition::{CronSpec, TimerChange, Transition, TransitionKind, TransitionRegistry};
pub use types::{
    HeatingMode, HouseState, ModeCommand, NotificationLevel, Preset, RoomRuntimeState,
    TempSetting,
};
