//! JSON message types carried in WebSocket text frames.
//!
//! # Message flow
//!
//! ```text
//! Subscriber → Server:  JSON text frame  →  ControlMessage
//! Server → Subscriber:  OutboundMessage / StatePayload  →  JSON text frame
//! ```
//!
//! # JSON discriminants
//!
//! The two directions use different discriminant fields, because deployed
//! subscribers already speak this dialect:
//!
//! ```json
//! {"messageType":"togglePlugin","pluginId":"overlay","isActive":false}
//! {"type":"PLUGIN_CHANGED","plugin":{"id":"overlay","name":"Overlay","isActive":false}}
//! {"type":"HEARTBEAT","uptimeSecs":42,"subscribers":2}
//! ```
//!
//! Toggleable features are called "plugins" on the wire.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ── Subscriber → Server ───────────────────────────────────────────────────────

/// A control request sent by a subscriber.
///
/// Unknown `messageType` values fail to deserialize; callers log and ignore
/// them rather than closing the connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "messageType", rename_all = "camelCase")]
pub enum ControlMessage {
    /// Forget every cached payload so the next publish of each kind is sent
    /// even if unchanged.
    ClearCache,

    /// Ask for the list of toggleable features.
    GetPlugins,

    /// Activate or deactivate one feature.
    ///
    /// Both fields are optional at the JSON level so a request missing one of
    /// them can be reported precisely instead of as a generic parse failure.
    #[serde(rename_all = "camelCase")]
    TogglePlugin {
        #[serde(default)]
        plugin_id: Option<String>,
        #[serde(default)]
        is_active: Option<bool>,
    },
}

impl ControlMessage {
    /// Parses a control message from the text of a frame.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error for malformed JSON, a missing
    /// `messageType`, or an unrecognised `messageType`.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Short name for log lines.
    pub fn type_name(&self) -> &'static str {
        match self {
            ControlMessage::ClearCache => "clearCache",
            ControlMessage::GetPlugins => "getPlugins",
            ControlMessage::TogglePlugin { .. } => "togglePlugin",
        }
    }
}

// ── Server → Subscriber ───────────────────────────────────────────────────────

/// Public description of one toggleable feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureSummary {
    /// Stable identifier used in `togglePlugin` requests.
    pub id: String,
    /// Human-readable label.
    pub name: String,
    /// Whether the feature is currently running.
    pub is_active: bool,
}

impl FeatureSummary {
    pub fn new(id: impl Into<String>, name: impl Into<String>, is_active: bool) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_active,
        }
    }
}

/// Feature catalogue messages pushed to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundMessage {
    /// The full feature list, answering `getPlugins`.
    Plugins { plugins: Vec<FeatureSummary> },
    /// One feature changed state.
    PluginChanged { plugin: FeatureSummary },
}

impl OutboundMessage {
    /// Serializes the message to the JSON text sent in a frame.
    ///
    /// # Errors
    ///
    /// Propagates `serde_json` serialization errors.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A snapshot of some piece of live state, published as
/// `{"type":"<KIND>", ...fields}`.
///
/// The embedding application decides which kinds exist and when they change;
/// this type only fixes the envelope.  A field named `type` is overwritten by
/// the kind.
#[derive(Debug, Clone, PartialEq)]
pub struct StatePayload {
    kind: String,
    fields: Map<String, Value>,
}

impl StatePayload {
    /// Creates an empty payload of the given kind, e.g. `"HEARTBEAT"`.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: Map::new(),
        }
    }

    /// The payload published when the embedding application's session ends.
    pub fn logout() -> Self {
        Self::new("LOGOUT")
    }

    /// Builds a payload from any serializable struct whose JSON form is an
    /// object.
    ///
    /// # Errors
    ///
    /// Fails if `data` cannot be serialized or does not serialize to an object.
    pub fn from_serializable<T: Serialize>(
        kind: impl Into<String>,
        data: &T,
    ) -> Result<Self, serde_json::Error> {
        match serde_json::to_value(data)? {
            Value::Object(fields) => Ok(Self {
                kind: kind.into(),
                fields,
            }),
            other => Err(<serde_json::Error as serde::ser::Error>::custom(format!(
                "state payload must serialize to a JSON object, got {other}"
            ))),
        }
    }

    /// Adds or replaces one field.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The full JSON object, including the `type` discriminant.
    pub fn to_value(&self) -> Value {
        let mut object = Map::with_capacity(self.fields.len() + 1);
        object.insert("type".to_string(), Value::String(self.kind.clone()));
        for (name, value) in &self.fields {
            if name != "type" {
                object.insert(name.clone(), value.clone());
            }
        }
        Value::Object(object)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clear_cache_parses() {
        let msg = ControlMessage::from_json(r#"{"messageType":"clearCache"}"#).unwrap();
        assert_eq!(msg, ControlMessage::ClearCache);
    }

    #[test]
    fn test_get_plugins_ignores_extra_fields() {
        let msg =
            ControlMessage::from_json(r#"{"messageType":"getPlugins","requestId":7}"#).unwrap();
        assert_eq!(msg, ControlMessage::GetPlugins);
    }

    #[test]
    fn test_toggle_plugin_parses_camel_case_fields() {
        // Arrange
        let raw = r#"{"messageType":"togglePlugin","pluginId":"overlay","isActive":true}"#;

        // Act
        let msg = ControlMessage::from_json(raw).unwrap();

        // Assert
        assert_eq!(
            msg,
            ControlMessage::TogglePlugin {
                plugin_id: Some("overlay".to_string()),
                is_active: Some(true),
            }
        );
    }

    #[test]
    fn test_toggle_plugin_tolerates_missing_fields() {
        let msg = ControlMessage::from_json(r#"{"messageType":"togglePlugin"}"#).unwrap();

        assert_eq!(
            msg,
            ControlMessage::TogglePlugin {
                plugin_id: None,
                is_active: None,
            }
        );
    }

    #[test]
    fn test_unknown_message_type_is_rejected() {
        assert!(ControlMessage::from_json(r#"{"messageType":"reboot"}"#).is_err());
    }

    #[test]
    fn test_missing_message_type_is_rejected() {
        assert!(ControlMessage::from_json(r#"{"pluginId":"x"}"#).is_err());
    }

    #[test]
    fn test_malformed_json_is_rejected() {
        assert!(ControlMessage::from_json("{not json").is_err());
    }

    #[test]
    fn test_type_name_matches_wire_value() {
        let msg = ControlMessage::TogglePlugin {
            plugin_id: None,
            is_active: None,
        };
        assert_eq!(msg.type_name(), "togglePlugin");
    }

    #[test]
    fn test_plugins_message_serializes_with_type_tag() {
        let msg = OutboundMessage::Plugins {
            plugins: vec![FeatureSummary::new("overlay", "Overlay", true)],
        };

        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(
            value,
            json!({
                "type": "PLUGINS",
                "plugins": [{"id": "overlay", "name": "Overlay", "isActive": true}]
            })
        );
    }

    #[test]
    fn test_plugin_changed_serializes_with_screaming_snake_tag() {
        let msg = OutboundMessage::PluginChanged {
            plugin: FeatureSummary::new("overlay", "Overlay", false),
        };

        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "PLUGIN_CHANGED");
        assert_eq!(value["plugin"]["isActive"], false);
    }

    #[test]
    fn test_state_payload_includes_kind_and_fields() {
        let payload = StatePayload::new("HEARTBEAT")
            .with("uptimeSecs", 42u64)
            .with("subscribers", 2u64);

        assert_eq!(
            payload.to_value(),
            json!({"type": "HEARTBEAT", "uptimeSecs": 42, "subscribers": 2})
        );
    }

    #[test]
    fn test_state_payload_kind_wins_over_type_field() {
        let payload = StatePayload::new("PVP").with("type", "spoofed");

        assert_eq!(payload.to_value()["type"], "PVP");
    }

    #[test]
    fn test_state_payload_from_struct() {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Activity {
            is_active: bool,
        }

        let payload = StatePayload::from_serializable("ACTIVITY", &Activity { is_active: true })
            .unwrap();

        assert_eq!(payload.kind(), "ACTIVITY");
        assert_eq!(payload.to_value(), json!({"type": "ACTIVITY", "isActive": true}));
    }

    #[test]
    fn test_state_payload_from_non_object_fails() {
        assert!(StatePayload::from_serializable("NUMBER", &5u32).is_err());
    }

    #[test]
    fn test_logout_payload_has_no_fields() {
        assert_eq!(StatePayload::logout().to_value(), json!({"type": "LOGOUT"}));
    }
}
