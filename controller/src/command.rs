use std::collections::HashMap;

use heating_common::{HeatingMode, ModeCommand};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum CommandError {
    #[error("missing 'command' parameter")]
    MissingCommand,
    #[error("{0}")]
    UnknownCommand(String),
    #[error("invalid room '{0}'")]
    InvalidRoom(String),
    #[error("invalid temperature '{0}'")]
    InvalidTemp(String),
    #[error("malformed command payload: {0}")]
    Malformed(String),
}

/// `heating/cmnd/mode` accepts either a bare command word for the whole house
/// or a JSON object `{command, room?, temp?}`.
pub fn parse_mqtt_command(payload: &str) -> Result<ModeCommand, CommandError> {
    let payload = payload.trim();
    if payload.starts_with('{') {
        return serde_json::from_str(payload).map_err(|err| CommandError::Malformed(err.to_string()));
    }
    let command = payload
        .parse::<HeatingMode>()
        .map_err(CommandError::UnknownCommand)?;
    Ok(ModeCommand::all_rooms(command))
}

pub fn parse_query_command(params: &HashMap<String, String>) -> Result<ModeCommand, CommandError> {
    let command = params
        .get("command")
        .ok_or(CommandError::MissingCommand)?
        .parse::<HeatingMode>()
        .map_err(CommandError::UnknownCommand)?;

    let room = params
        .get("room")
        .map(|raw| raw.parse::<u32>().map_err(|_| CommandError::InvalidRoom(raw.clone())))
        .transpose()?;

    let temp = params
        .get("temp")
        .map(|raw| match raw.parse::<f32>() {
            Ok(temp) if temp.is_finite() => Ok(temp),
            _ => Err(CommandError::InvalidTemp(raw.clone())),
        })
        .transpose()?;

    Ok(ModeCommand {
        command,
        room,
        temp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_word_addresses_the_whole_house() {
        assert_eq!(
            parse_mqtt_command("schedule\n"),
            Ok(ModeCommand::all_rooms(HeatingMode::Schedule))
        );
        assert!(matches!(
            parse_mqtt_command("HEAT"),
            Err(CommandError::UnknownCommand(_))
        ));
    }

    #[test]
    fn json_payload_may_target_a_room() {
        assert_eq!(
            parse_mqtt_command(r#"{"command": "custom", "room": 3, "temp": 19.5}"#),
            Ok(ModeCommand {
                command: HeatingMode::Custom,
                room: Some(3),
                temp: Some(19.5),
            })
        );
        assert!(matches!(
            parse_mqtt_command(r#"{"room": 3}"#),
            Err(CommandError::Malformed(_))
        ));
    }

    #[test]
    fn query_parameters_are_validated() {
        let params = |pairs: &[(&str, &str)]| {
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>()
        };

        assert_eq!(
            parse_query_command(&params(&[("command", "comfort"), ("room", "2")])),
            Ok(ModeCommand::for_room(HeatingMode::Comfort, 2))
        );
        assert_eq!(
            parse_query_command(&params(&[("room", "2")])),
            Err(CommandError::MissingCommand)
        );
        assert_eq!(
            parse_query_command(&params(&[("command", "comfort"), ("room", "two")])),
            Err(CommandError::InvalidRoom("two".to_string()))
        );
        assert_eq!(
            parse_query_command(&params(&[("command", "custom"), ("temp", "NaN")])),
            Err(CommandError::InvalidTemp("NaN".to_string()))
        );
    }
}
