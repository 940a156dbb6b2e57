//! Response normalisation for the controller's two endpoints.

use serde_json::Value;

use crate::{error::TransportError, types::ZoneStatus};

pub const STATUS_PATH: &str = "getController";
pub const COMMAND_ACK: &str = "Command Received";

/// A `/getController` body as the transport handed it over.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Parsed(Value),
    Text(String),
    Bytes(Vec<u8>),
}

impl ResponseBody {
    /// Collapse every body shape into one JSON value. A JSON string that itself
    /// contains JSON is unwrapped once.
    pub fn into_value(self) -> Result<Value, TransportError> {
        let value = match self {
            Self::Parsed(value) => value,
            Self::Text(text) => parse_text(&text)?,
            Self::Bytes(bytes) => {
                let text = String::from_utf8(bytes)
                    .map_err(|err| TransportError::MalformedBody(err.to_string()))?;
                parse_text(&text)?
            }
        };

        match value {
            Value::String(inner) => parse_text(&inner),
            other => Ok(other),
        }
    }
}

fn parse_text(text: &str) -> Result<Value, TransportError> {
    serde_json::from_str(text.trim()).map_err(|err| TransportError::MalformedBody(err.to_string()))
}

pub fn status_url(address: &str) -> String {
    format!("http://{address}/{STATUS_PATH}")
}

pub fn decode_zones(body: ResponseBody) -> Result<Vec<ZoneStatus>, TransportError> {
    match body.into_value()? {
        Value::Array(items) => items
            .into_iter()
            .map(|item| {
                serde_json::from_value::<ZoneStatus>(item)
                    .map_err(|err| TransportError::MalformedBody(err.to_string()))
            })
            .collect(),
        other => Err(TransportError::MalformedBody(format!(
            "expected a list of zones, got {}",
            value_kind(&other)
        ))),
    }
}

pub fn find_zone(body: ResponseBody, zone: u8) -> Result<ZoneStatus, TransportError> {
    decode_zones(body)?
        .into_iter()
        .find(|status| status.num == Some(zone as u32))
        .ok_or(TransportError::ZoneMissing(zone))
}

/// Structural check used by discovery: a list whose first element is an object
/// carrying `num` plus either `pattern` or `enabled`.
pub fn looks_like_controller(body: ResponseBody) -> bool {
    let Ok(Value::Array(items)) = body.into_value() else {
        return false;
    };
    match items.first() {
        Some(Value::Object(zone)) => {
            zone.contains_key("num") && (zone.contains_key("pattern") || zone.contains_key("enabled"))
        }
        _ => false,
    }
}

pub fn check_command_reply(status: u16, text: &str) -> Result<(), TransportError> {
    if status != 200 {
        return Err(TransportError::Status(status));
    }
    if text.contains(COMMAND_ACK) {
        Ok(())
    } else {
        let excerpt: String = text.chars().take(80).collect();
        Err(TransportError::Rejected(excerpt))
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const BODY: &str = r#"[{"num":1,"pattern":"off","isOn":false},{"num":2,"pattern":"march","isOn":true}]"#;

    #[test]
    fn all_body_shapes_decode_the_same() {
        let parsed = decode_zones(ResponseBody::Parsed(serde_json::from_str(BODY).unwrap())).unwrap();
        let text = decode_zones(ResponseBody::Text(BODY.to_string())).unwrap();
        let bytes = decode_zones(ResponseBody::Bytes(BODY.as_bytes().to_vec())).unwrap();
        let quoted = decode_zones(ResponseBody::Parsed(Value::String(BODY.to_string()))).unwrap();

        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed, text);
        assert_eq!(parsed, bytes);
        assert_eq!(parsed, quoted);
    }

    #[test]
    fn find_zone_reports_missing_zone() {
        let zone = find_zone(ResponseBody::Text(BODY.to_string()), 2).unwrap();
        assert_eq!(zone.pattern.as_deref(), Some("march"));

        assert_eq!(
            find_zone(ResponseBody::Text(BODY.to_string()), 5),
            Err(TransportError::ZoneMissing(5))
        );
    }

    #[test]
    fn non_list_bodies_are_malformed() {
        assert!(matches!(
            decode_zones(ResponseBody::Text("<html>router login</html>".to_string())),
            Err(TransportError::MalformedBody(_))
        ));
        assert!(matches!(
            decode_zones(ResponseBody::Parsed(json!({"num": 1}))),
            Err(TransportError::MalformedBody(_))
        ));
    }

    #[test]
    fn controller_signature_is_structural() {
        assert!(looks_like_controller(ResponseBody::Text(BODY.to_string())));
        assert!(looks_like_controller(ResponseBody::Parsed(
            json!([{"num": 1, "enabled": true}])
        )));
        assert!(!looks_like_controller(ResponseBody::Parsed(json!([{"num": 1}]))));
        assert!(!looks_like_controller(ResponseBody::Parsed(json!([]))));
        assert!(!looks_like_controller(ResponseBody::Text("OK".to_string())));
    }

    #[test]
    fn command_reply_needs_status_and_marker() {
        assert_eq!(check_command_reply(200, "Command Received\n"), Ok(()));
        assert_eq!(check_command_reply(500, "Command Received"), Err(TransportError::Status(500)));
        assert!(matches!(
            check_command_reply(200, "busy"),
            Err(TransportError::Rejected(_))
        ));
    }
}
