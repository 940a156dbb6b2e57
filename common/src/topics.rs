pub const TOPIC_ZONE_STATE: &str = "zonelight/zone/state";

pub const TOPIC_CMD_POWER: &str = "zonelight/cmnd/power";
pub const TOPIC_CMD_PATTERN: &str = "zonelight/cmnd/pattern";
pub const TOPIC_CMD_CAPTURE: &str = "zonelight/cmnd/capture";
pub const TOPIC_CMD_REFRESH: &str = "zonelight/cmnd/refresh";
pub const TOPIC_CMD_DISCOVERY: &str = "zonelight/cmnd/discovery";

pub const COMMAND_TOPICS: [&str; 5] = [
    TOPIC_CMD_POWER,
    TOPIC_CMD_PATTERN,
    TOPIC_CMD_CAPTURE,
    TOPIC_CMD_REFRESH,
    TOPIC_CMD_DISCOVERY,
];
