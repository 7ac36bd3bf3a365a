use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{Preset, TempSetting, MAX_SCHEDULE_TEMP, MIN_SCHEDULE_TEMP};

/// One user-entered rule as it appears in the weekly table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRule {
    pub stime: String,
    pub etime: String,
    pub temp: TempSetting,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomConfig {
    pub room: u32,
    pub comfort_temp: f32,
    pub energy_save_temp: f32,
    #[serde(default)]
    pub fallback_temp: Preset,
    #[serde(default)]
    pub sensor_id: Option<String>,
    /// Weekday key (`"0"` is Sunday) to that day's rules.
    #[serde(default)]
    pub schedule: BTreeMap<String, Vec<RawRule>>,
}

impl RoomConfig {
    pub fn new(room: u32, comfort_temp: f32, energy_save_temp: f32) -> Self {
        Self {
            room,
            comfort_temp,
            energy_save_temp,
            fallback_temp: Preset::default(),
            sensor_id: None,
            schedule: BTreeMap::new(),
        }
    }

    pub fn sanitize(&mut self) {
        self.comfort_temp = sanitize_temp(self.comfort_temp, 21.0);
        self.energy_save_temp = sanitize_temp(self.energy_save_temp, 18.0);
    }
}

fn sanitize_temp(value: f32, default: f32) -> f32 {
    if value.is_finite() {
        value.clamp(MIN_SCHEDULE_TEMP, MAX_SCHEDULE_TEMP)
    } else {
        default
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThermostatBinding {
    pub id: String,
    pub room: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "192.168.1.100".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeatingConfig {
    #[serde(default)]
    pub rooms: Vec<RoomConfig>,
    /// Hours before an externally changed thermostat is reset. Zero disables it.
    #[serde(default)]
    pub reset_time: f64,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub thermostats: Vec<ThermostatBinding>,
    #[serde(default)]
    pub network: NetworkConfig,
}

fn default_timezone() -> String {
    "Europe/Berlin".to_string()
}

impl Default for HeatingConfig {
    fn default() -> Self {
        Self {
            rooms: Vec::new(),
            reset_time: 0.0,
            timezone: default_timezone(),
            thermostats: Vec::new(),
            network: NetworkConfig::default(),
        }
    }
}

impl HeatingConfig {
    pub fn sanitize(&mut self) {
        if !self.reset_time.is_finite() {
            self.reset_time = 0.0;
        }
        for room in &mut self.rooms {
            room.sanitize();
        }
    }

    /// Reset delay in milliseconds; `None` when reconciliation is disabled.
    pub fn reset_delay_ms(&self) -> Option<u64> {
        let ms = self.reset_time * 60.0 * 60.0 * 1000.0;
        (ms.is_finite() && ms >= 1.0).then_some(ms as u64)
    }

    pub fn room(&self, room: u32) -> Option<&RoomConfig> {
        self.rooms.iter().find(|cfg| cfg.room == room)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn deserializes_room_table() {
        let raw = r#"{
            "rooms": [{
                "room": 3,
                "comfortTemp": 21.5,
                "energySaveTemp": 17,
                "fallbackTemp": "F",
                "sensorId": "ZWayVDev_zway_5-0-49-1",
                "schedule": {
                    "1": [{"stime": "06:00", "etime": "09:00", "temp": 21}],
                    "6": [{"stime": "22:00", "etime": "08:00", "temp": "C"}]
                }
            }],
            "resetTime": 1.5
        }"#;

        let config: HeatingConfig = serde_json::from_str(raw).unwrap();
        let room = config.room(3).unwrap();

        assert_eq!(room.fallback_temp, Preset::Frost);
        assert_eq!(room.schedule["1"][0].temp, TempSetting::Degrees(21.0));
        assert_eq!(room.schedule["6"][0].temp, TempSetting::Preset(Preset::Comfort));
        assert_eq!(config.reset_delay_ms(), Some(5_400_000));
        assert_eq!(config.timezone, "Europe/Berlin");
    }

    #[test]
    fn non_positive_reset_time_disables_reconciliation() {
        let mut config = HeatingConfig::default();
        assert_eq!(config.reset_delay_ms(), None);

        config.reset_time = -2.0;
        assert_eq!(config.reset_delay_ms(), None);

        config.reset_time = f64::NAN;
        config.sanitize();
        assert_eq!(config.reset_delay_ms(), None);
    }

    #[test]
    fn sanitize_clamps_room_temperatures() {
        let mut room = RoomConfig::new(1, 40.0, f32::NAN);
        room.sanitize();
        assert_eq!(room.comfort_temp, 29.0);
        assert_eq!(room.energy_save_temp, 18.0);
    }
}
