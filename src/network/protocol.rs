//! Protocol Messages
//!
//! Wire format of the subscriber surface. Snapshots themselves live in
//! [`crate::leaderboard::snapshot`]; this module covers the small control
//! messages around them. All messages are JSON.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::leaderboard::entity::EntityId;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from a subscriber to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Set (or clear, with 0) this subscriber's focus target.
    Focus {
        /// Player id; 0 or anything unparsable clears focus
        #[serde(default, deserialize_with = "lenient_plid")]
        plid: u8,
    },

    /// Re-send the latest snapshot.
    SyncRequest,
}

impl ClientMessage {
    /// Parse from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Player id from a JSON number or numeric string.
pub fn parse_plid(value: &Value) -> Option<u8> {
    match value {
        Value::Null => Some(0),
        Value::Number(n) => n.as_u64().and_then(|n| u8::try_from(n).ok()),
        Value::String(s) if s.trim().is_empty() => Some(0),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_plid<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(parse_plid(&value).unwrap_or(0))
}

/// Focus target carried by a plid, `None` for 0.
pub fn focus_target(plid: u8) -> Option<EntityId> {
    (plid != 0).then_some(EntityId(plid))
}

/// Body of `POST /camera`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CameraRequest {
    /// Player id (number or numeric string)
    #[serde(default)]
    pub plid: Value,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Informational message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoMessage {
    /// Text
    pub info: String,
}

impl InfoMessage {
    /// Greeting sent after connect.
    pub fn welcome() -> Self {
        Self { info: "welcome".to_string() }
    }

    /// Pull endpoint answer before the first snapshot.
    pub fn no_data() -> Self {
        Self { info: "no data yet".to_string() }
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Answer of `POST /camera`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraResponse {
    /// Whether the directive was sent
    pub ok: bool,
    /// Failure reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CameraResponse {
    /// Success.
    pub fn ok() -> Self {
        Self { ok: true, error: None }
    }

    /// Failure with reason.
    pub fn error(reason: impl Into<String>) -> Self {
        Self { ok: false, error: Some(reason.into()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_focus_message_forms() {
        assert_eq!(
            ClientMessage::from_json(r#"{"type":"focus","plid":7}"#).unwrap(),
            ClientMessage::Focus { plid: 7 }
        );
        assert_eq!(
            ClientMessage::from_json(r#"{"type":"focus","plid":"12"}"#).unwrap(),
            ClientMessage::Focus { plid: 12 }
        );
        assert_eq!(
            ClientMessage::from_json(r#"{"type":"focus"}"#).unwrap(),
            ClientMessage::Focus { plid: 0 }
        );
        assert_eq!(
            ClientMessage::from_json(r#"{"type":"focus","plid":"abc"}"#).unwrap(),
            ClientMessage::Focus { plid: 0 }
        );
        assert_eq!(
            ClientMessage::from_json(r#"{"type":"sync_request"}"#).unwrap(),
            ClientMessage::SyncRequest
        );
        assert!(ClientMessage::from_json(r#"{"type":"auth"}"#).is_err());
        assert!(ClientMessage::from_json("{").is_err());
    }

    #[test]
    fn test_parse_plid() {
        assert_eq!(parse_plid(&json!(null)), Some(0));
        assert_eq!(parse_plid(&json!(3)), Some(3));
        assert_eq!(parse_plid(&json!(" 4 ")), Some(4));
        assert_eq!(parse_plid(&json!(300)), None);
        assert_eq!(parse_plid(&json!(-1)), None);
        assert_eq!(parse_plid(&json!("x")), None);
        assert_eq!(parse_plid(&json!([1])), None);
        assert_eq!(focus_target(0), None);
        assert_eq!(focus_target(5), Some(EntityId(5)));
    }

    #[test]
    fn test_server_messages() {
        assert_eq!(InfoMessage::welcome().to_json().unwrap(), r#"{"info":"welcome"}"#);
        assert_eq!(InfoMessage::no_data().to_json().unwrap(), r#"{"info":"no data yet"}"#);
        assert_eq!(serde_json::to_string(&CameraResponse::ok()).unwrap(), r#"{"ok":true}"#);
        assert_eq!(
            serde_json::to_string(&CameraResponse::error("invalid plid")).unwrap(),
            r#"{"ok":false,"error":"invalid plid"}"#
        );
    }
}
