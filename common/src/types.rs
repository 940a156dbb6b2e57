use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

pub const MIN_ZONE: u8 = 1;
pub const MAX_ZONE: u8 = 6;
pub const OFF_PATTERN: &str = "off";
pub const SPOTLIGHT_PATTERN: &str = "spotlight";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlanType {
    Spotlight,
    NonSpotlight,
}

impl PlanType {
    pub fn for_pattern_type(pattern_type: &str) -> Self {
        if pattern_type.trim().eq_ignore_ascii_case(SPOTLIGHT_PATTERN) {
            Self::Spotlight
        } else {
            Self::NonSpotlight
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    F,
    R,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::F => "F",
            Self::R => "R",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        match value.trim().to_ascii_uppercase().as_str() {
            "F" => Ok(Self::F),
            "R" => Ok(Self::R),
            _ => Err(ValidationError::InvalidDirection(value.to_string())),
        }
    }
}

/// Flat parameter set sent to `/setPattern`.
///
/// `colors` keeps the controller's comma-joined form so that captured values
/// round-trip untouched; [`ParameterSet::validate`] enforces the triplet
/// invariants before anything reaches the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSet {
    pub pattern_type: String,
    pub zone: u8,
    pub num_zones: u8,
    pub num_colors: usize,
    pub colors: String,
    pub direction: Direction,
    pub speed: u8,
    pub gap: u8,
    pub other: u8,
    pub pause: u8,
}

impl ParameterSet {
    pub fn off(zone: u8) -> Self {
        Self {
            pattern_type: OFF_PATTERN.to_string(),
            zone,
            num_zones: 1,
            num_colors: 1,
            colors: "0,0,0".to_string(),
            direction: Direction::F,
            speed: 0,
            gap: 0,
            other: 0,
            pause: 0,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.pattern_type.trim().is_empty() {
            return Err(ValidationError::MissingParameter("patternType"));
        }
        if !(MIN_ZONE..=MAX_ZONE).contains(&self.zone) {
            return Err(ValidationError::ZoneOutOfRange(self.zone));
        }
        if self.num_zones != 1 {
            return Err(ValidationError::ZoneCountNotOne(self.num_zones));
        }
        let values = parse_color_values(&self.colors)?;
        if values.len() != self.num_colors * 3 {
            return Err(ValidationError::TripletMismatch {
                triplets: self.num_colors,
                values: values.len(),
            });
        }
        Ok(())
    }

    /// Query pairs in the order the controller firmware expects them.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("patternType", self.pattern_type.clone()),
            ("zones", self.zone.to_string()),
            ("num_zones", self.num_zones.to_string()),
            ("num_colors", self.num_colors.to_string()),
            ("colors", self.colors.clone()),
            ("direction", self.direction.as_str().to_string()),
            ("speed", self.speed.to_string()),
            ("gap", self.gap.to_string()),
            ("other", self.other.to_string()),
            ("pause", self.pause.to_string()),
        ]
    }

    pub fn command_url(&self, address: &str) -> String {
        let query = self
            .query_pairs()
            .into_iter()
            .map(|(key, value)| match key {
                // The firmware splits on raw commas and does not percent-decode.
                "colors" => format!(
                    "{key}={}",
                    value
                        .split(',')
                        .map(|part| urlencoding::encode(part.trim()).into_owned())
                        .collect::<Vec<_>>()
                        .join(",")
                ),
                _ => format!("{key}={}", urlencoding::encode(&value)),
            })
            .collect::<Vec<_>>()
            .join("&");
        format!("http://{address}/setPattern?{query}")
    }

    pub fn from_command_url(url: &str) -> Result<Self, ValidationError> {
        let query = url.split_once('?').map(|(_, query)| query).unwrap_or(url);
        let mut params = Self::off(MIN_ZONE);
        let mut seen_type = false;

        for pair in query.split('&').filter(|pair| !pair.is_empty()) {
            let (key, raw) = pair.split_once('=').unwrap_or((pair, ""));
            let value = urlencoding::decode(raw)
                .map(|value| value.into_owned())
                .unwrap_or_else(|_| raw.to_string());
            match key {
                "patternType" => {
                    params.pattern_type = value;
                    seen_type = true;
                }
                "zones" => params.zone = parse_number("zones", &value)?,
                "num_zones" => params.num_zones = parse_number("num_zones", &value)?,
                "num_colors" => params.num_colors = parse_number("num_colors", &value)?,
                "colors" => params.colors = value,
                "direction" => params.direction = Direction::parse(&value)?,
                "speed" => params.speed = parse_number("speed", &value)?,
                "gap" => params.gap = parse_number("gap", &value)?,
                "other" => params.other = parse_number("other", &value)?,
                "pause" => params.pause = parse_number("pause", &value)?,
                _ => {}
            }
        }

        if !seen_type {
            return Err(ValidationError::MissingParameter("patternType"));
        }
        Ok(params)
    }

    /// An "off" request: the off pattern, or a single dark triplet. A dark
    /// multi-LED spotlight run is still a lit pattern type.
    pub fn is_off(&self) -> bool {
        if self.pattern_type.trim().eq_ignore_ascii_case(OFF_PATTERN) {
            return true;
        }
        self.num_colors == 1
            && parse_color_values(&self.colors).is_ok_and(|values| values == [0, 0, 0])
    }

    pub fn first_lit_color(&self) -> Option<[u8; 3]> {
        let values = parse_color_values(&self.colors).ok()?;
        values
            .chunks_exact(3)
            .map(|chunk| [chunk[0], chunk[1], chunk[2]])
            .find(|rgb| rgb.iter().any(|channel| *channel != 0))
    }
}

fn parse_number<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ValidationError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ValidationError::InvalidNumber {
            name,
            value: value.to_string(),
        })
}

pub fn parse_color_values(colors: &str) -> Result<Vec<u8>, ValidationError> {
    if colors.trim().is_empty() {
        return Ok(Vec::new());
    }
    colors
        .split(',')
        .enumerate()
        .map(|(position, raw)| {
            raw.trim()
                .parse::<u8>()
                .map_err(|_| ValidationError::ColorOutOfRange {
                    position,
                    value: raw.trim().to_string(),
                })
        })
        .collect()
}

/// One zone object from `/getController`.
///
/// The firmware is inconsistent about numbers vs strings, so every scalar is
/// read leniently.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ZoneStatus {
    #[serde(default, deserialize_with = "loose_number")]
    pub num: Option<u32>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(rename = "isOn", default, deserialize_with = "loose_bool")]
    pub is_on: Option<bool>,
    #[serde(default, deserialize_with = "loose_bool")]
    pub enabled: Option<bool>,
    #[serde(rename = "colorStr", default)]
    pub color_str: Option<String>,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default, deserialize_with = "loose_number")]
    pub speed: Option<u32>,
    #[serde(default, deserialize_with = "loose_number")]
    pub gap: Option<u32>,
    #[serde(default)]
    pub name: Option<String>,
}

impl ZoneStatus {
    pub fn observation(&self) -> ZoneObservation {
        let pattern_name = self
            .pattern
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        let is_off = pattern_name.eq_ignore_ascii_case(OFF_PATTERN);
        let reported = self.is_on.or(self.enabled).unwrap_or(true);
        ZoneObservation {
            is_on: !is_off && reported,
            pattern_name,
        }
    }

    /// `colorStr` uses `&` between channels; the command API wants commas.
    pub fn colors(&self) -> String {
        self.color_str
            .as_deref()
            .unwrap_or_default()
            .split('&')
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn parameters(&self, zone: u8) -> Result<ParameterSet, ValidationError> {
        let pattern_type = self
            .pattern
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(ValidationError::MissingParameter("pattern"))?;

        let mut colors = self.colors();
        if colors.is_empty() {
            colors = "0,0,0".to_string();
        }
        // numberOfColors lags behind colorStr on some firmware; trust the colors.
        let num_colors = parse_color_values(&colors)?.len() / 3;

        let params = ParameterSet {
            pattern_type: pattern_type.to_string(),
            zone,
            num_zones: 1,
            num_colors,
            colors,
            direction: match self.direction.as_deref() {
                Some(raw) => Direction::parse(raw)?,
                None => Direction::F,
            },
            speed: clamp_u8(self.speed),
            gap: clamp_u8(self.gap),
            other: 0,
            pause: 0,
        };
        params.validate()?;
        Ok(params)
    }
}

fn clamp_u8(value: Option<u32>) -> u8 {
    value.map(|v| v.min(u8::MAX as u32) as u8).unwrap_or(0)
}

fn loose_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(number)) => number.as_u64().and_then(|v| u32::try_from(v).ok()),
        Some(Value::String(text)) => text.trim().parse().ok(),
        _ => None,
    })
}

fn loose_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<bool>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Bool(flag)) => Some(flag),
        Some(Value::Number(number)) => number.as_u64().map(|v| v != 0),
        Some(Value::String(text)) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "on" | "1" => Some(true),
            "false" | "off" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneObservation {
    pub pattern_name: String,
    pub is_on: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchState {
    On,
    #[default]
    Off,
}

impl SwitchState {
    pub fn from_on(is_on: bool) -> Self {
        if is_on {
            Self::On
        } else {
            Self::Off
        }
    }
}

/// Public attributes of one zone, republished after every change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneAttributes {
    pub switch: SwitchState,
    pub pattern: String,
    #[serde(rename = "matchedPattern")]
    pub matched_pattern: Option<String>,
    #[serde(rename = "lastPattern")]
    pub last_pattern: Option<String>,
    pub verification: String,
    pub discovery: String,
    #[serde(rename = "controllerAddress")]
    pub controller_address: Option<String>,
    #[serde(rename = "lastStatus")]
    pub last_status: String,
    #[serde(rename = "updatedAtMs")]
    pub updated_at_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn custom(colors: &str, num_colors: usize) -> ParameterSet {
        ParameterSet {
            pattern_type: "march".to_string(),
            zone: 2,
            num_zones: 1,
            num_colors,
            colors: colors.to_string(),
            direction: Direction::R,
            speed: 5,
            gap: 1,
            other: 0,
            pause: 0,
        }
    }

    #[test]
    fn validate_rejects_bad_triplets_and_ranges() {
        assert_eq!(custom("255,0,0,0,0,255", 2).validate(), Ok(()));
        assert_eq!(
            custom("255,0,0,0,0", 2).validate(),
            Err(ValidationError::TripletMismatch {
                triplets: 2,
                values: 5
            })
        );
        assert!(matches!(
            custom("256,0,0", 1).validate(),
            Err(ValidationError::ColorOutOfRange { position: 0, .. })
        ));

        let mut params = custom("1,2,3", 1);
        params.zone = 7;
        assert_eq!(params.validate(), Err(ValidationError::ZoneOutOfRange(7)));
    }

    #[test]
    fn command_url_keeps_firmware_parameter_order() {
        let url = custom("10,20,30", 1).command_url("192.168.1.50");
        assert_eq!(
            url,
            "http://192.168.1.50/setPattern?patternType=march&zones=2&num_zones=1&num_colors=1\
             &colors=10,20,30&direction=R&speed=5&gap=1&other=0&pause=0"
        );
        assert_eq!(ParameterSet::from_command_url(&url), Ok(custom("10,20,30", 1)));
    }

    #[test]
    fn off_command_url_sends_raw_commas() {
        let url = ParameterSet::off(1).command_url("10.0.0.2");
        assert_eq!(
            url,
            "http://10.0.0.2/setPattern?patternType=off&zones=1&num_zones=1&num_colors=1\
             &colors=0,0,0&direction=F&speed=0&gap=0&other=0&pause=0"
        );

        let mut named = custom("1,2,3", 1);
        named.pattern_type = "slow fade".to_string();
        assert!(named.command_url("10.0.0.2").contains("patternType=slow%20fade&"));
    }

    #[test]
    fn off_detection_covers_single_dark_triplet() {
        assert!(ParameterSet::off(1).is_off());
        assert!(custom("0,0,0", 1).is_off());
        assert!(!custom("0,0,0,5,0,0", 2).is_off());

        let mut dark_spotlight = custom("0,0,0,0,0,0,0,0,0", 3);
        dark_spotlight.pattern_type = SPOTLIGHT_PATTERN.to_string();
        assert!(!dark_spotlight.is_off());
    }

    #[test]
    fn off_pattern_forces_switch_off() {
        let status: ZoneStatus =
            serde_json::from_str(r#"{"num":1,"pattern":"off","isOn":true}"#).unwrap();
        assert_eq!(
            status.observation(),
            ZoneObservation {
                pattern_name: "off".to_string(),
                is_on: false
            }
        );
    }

    #[test]
    fn zone_status_reads_loose_scalars() {
        let status: ZoneStatus = serde_json::from_str(
            r#"{"num":"3","pattern":"march","enabled":"true","ledCnt":"150",
                "colorStr":"255&0&0&0&0&255&","direction":"R","speed":"7","numberOfColors":2}"#,
        )
        .unwrap();

        assert_eq!(status.num, Some(3));
        assert!(status.observation().is_on);

        let params = status.parameters(3).unwrap();
        assert_eq!(params.colors, "255,0,0,0,0,255");
        assert_eq!(params.num_colors, 2);
        assert_eq!(params.direction, Direction::R);
        assert_eq!(params.speed, 7);
    }
}
