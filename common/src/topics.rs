pub const TOPIC_DEVICE_LEVEL: &str = "heating/device/+/level";
pub const TOPIC_DEVICE_ANNOUNCE: &str = "heating/device/+/announce";
pub const TOPIC_DEVICE_REMOVED: &str = "heating/device/+/removed";

pub const TOPIC_CONTROLLER_STATE: &str = "heating/controller/state";
pub const TOPIC_CONTROLLER_NOTIFICATION: &str = "heating/controller/notification";

pub const TOPIC_CMD_MODE: &str = "heating/cmnd/mode";

const DEVICE_PREFIX: &str = "heating/device/";

pub fn device_setpoint_topic(device_id: &str) -> String {
    format!("{DEVICE_PREFIX}{device_id}/setpoint")
}

/// Splits `heating/device/<id>/<leaf>` into its device id and leaf.
pub fn parse_device_topic(topic: &str) -> Option<(&str, &str)> {
    let rest = topic.strip_prefix(DEVICE_PREFIX)?;
    let (device_id, leaf) = rest.rsplit_once('/')?;
    (!device_id.is_empty() && !device_id.contains('/')).then_some((device_id, leaf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_device_topics() {
        assert_eq!(
            parse_device_topic("heating/device/ZWayVDev_12/level"),
            Some(("ZWayVDev_12", "level"))
        );
        assert_eq!(parse_device_topic("heating/device//level"), None);
        assert_eq!(parse_device_topic("heating/device/a/b/level"), None);
        assert_eq!(parse_device_topic("heating/cmnd/mode"), None);
        assert_eq!(device_setpoint_topic("th-1"), "heating/device/th-1/setpoint");
    }
}
