use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Frost protection is a fixed floor independent of room configuration.
pub const FROST_PROTECTION_TEMP: f32 = 6.0;

pub const MIN_SCHEDULE_TEMP: f32 = 5.0;
pub const MAX_SCHEDULE_TEMP: f32 = 29.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Preset {
    #[serde(rename = "F", alias = "frost", alias = "frostProtection")]
    Frost,
    #[default]
    #[serde(rename = "E", alias = "energySave")]
    EnergySave,
    #[serde(rename = "C", alias = "comfort")]
    Comfort,
}

impl Preset {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Frost => "F",
            Self::EnergySave => "E",
            Self::Comfort => "C",
        }
    }
}

/// Target of a schedule window: raw degrees or a symbolic preset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TempSetting {
    Degrees(f32),
    Preset(Preset),
}

impl TempSetting {
    pub fn is_in_range(self) -> bool {
        match self {
            Self::Degrees(temp) => {
                temp.is_finite() && (MIN_SCHEDULE_TEMP..=MAX_SCHEDULE_TEMP).contains(&temp)
            }
            Self::Preset(_) => true,
        }
    }

    /// Flat token used inside timer keys; `21.5` becomes `21-5`.
    pub fn key_token(self) -> String {
        match self {
            Self::Degrees(temp) => temp.to_string().replace('.', "-"),
            Self::Preset(preset) => preset.as_str().to_string(),
        }
    }
}

impl fmt::Display for TempSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Degrees(temp) => write!(f, "{temp}"),
            Self::Preset(preset) => f.write_str(preset.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HeatingMode {
    #[serde(rename = "comfort")]
    Comfort,
    #[serde(rename = "energySave")]
    EnergySave,
    #[serde(rename = "frostProtection")]
    Frost,
    #[serde(rename = "schedule")]
    Schedule,
    #[serde(rename = "custom")]
    Custom,
}

impl HeatingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Comfort => "comfort",
            Self::EnergySave => "energySave",
            Self::Frost => "frostProtection",
            Self::Schedule => "schedule",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for HeatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HeatingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "comfort" => Ok(Self::Comfort),
            "energySave" => Ok(Self::EnergySave),
            "frostProtection" => Ok(Self::Frost),
            "schedule" => Ok(Self::Schedule),
            "custom" => Ok(Self::Custom),
            other => Err(format!("unknown heating command '{other}'")),
        }
    }
}

/// A mode command, optionally scoped to one room.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModeCommand {
    pub command: HeatingMode,
    #[serde(default)]
    pub room: Option<u32>,
    #[serde(default)]
    pub temp: Option<f32>,
}

impl ModeCommand {
    pub fn all_rooms(command: HeatingMode) -> Self {
        Self {
            command,
            room: None,
            temp: None,
        }
    }

    pub fn for_room(command: HeatingMode, room: u32) -> Self {
        Self {
            command,
            room: Some(room),
            temp: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomRuntimeState {
    #[serde(rename = "roomId")]
    pub room_id: u32,
    pub mode: HeatingMode,
    #[serde(rename = "targetTemp")]
    pub target_temp: Option<f32>,
    #[serde(rename = "hasSchedule")]
    pub has_schedule: bool,
}

impl RoomRuntimeState {
    pub fn new(room_id: u32, has_schedule: bool) -> Self {
        Self {
            room_id,
            mode: HeatingMode::EnergySave,
            target_temp: None,
            has_schedule,
        }
    }
}

/// Aggregate view written to the external sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HouseState {
    pub state: HeatingMode,
    pub rooms: Vec<RoomRuntimeState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Warning,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_setting_accepts_numbers_and_presets() {
        let parsed: Vec<TempSetting> = serde_json::from_str(r#"[21.5, "F", "E", "comfort"]"#).unwrap();
        assert_eq!(
            parsed,
            vec![
                TempSetting::Degrees(21.5),
                TempSetting::Preset(Preset::Frost),
                TempSetting::Preset(Preset::EnergySave),
                TempSetting::Preset(Preset::Comfort),
            ]
        );
    }

    #[test]
    fn range_check_is_inclusive() {
        assert!(TempSetting::Degrees(5.0).is_in_range());
        assert!(TempSetting::Degrees(29.0).is_in_range());
        assert!(!TempSetting::Degrees(30.0).is_in_range());
        assert!(!TempSetting::Degrees(4.5).is_in_range());
        assert!(!TempSetting::Degrees(f32::NAN).is_in_range());
    }

    #[test]
    fn key_token_flattens_decimal_point() {
        assert_eq!(TempSetting::Degrees(21.5).key_token(), "21-5");
        assert_eq!(TempSetting::Degrees(18.0).key_token(), "18");
        assert_eq!(TempSetting::Preset(Preset::Comfort).key_token(), "C");
    }

    #[test]
    fn mode_names_round_trip_through_strings() {
        for mode in [
            HeatingMode::Comfort,
            HeatingMode::EnergySave,
            HeatingMode::Frost,
            HeatingMode::Schedule,
            HeatingMode::Custom,
        ] {
            assert_eq!(mode.as_str().parse::<HeatingMode>(), Ok(mode));
        }
        assert!("turbo".parse::<HeatingMode>().is_err());
    }
}
