use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Version;
use crate::error::{Result, TunnelError};

/// The value held by one direction of a tunnel.
///
/// On the wire this is the JSON 2-tuple `[version, payload]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(Version, String)", into = "(Version, String)")]
pub struct VersionedMessage {
    pub version: Version,
    pub payload: String,
}

impl VersionedMessage {
    pub fn new(version: Version, payload: impl Into<String>) -> Self {
        VersionedMessage {
            version,
            payload: payload.into(),
        }
    }

    pub fn to_value(&self) -> Value {
        Value::Array(vec![
            Value::from(self.version),
            Value::String(self.payload.clone()),
        ])
    }

    /// Decode a mirrored field value. A missing (`null`) value decodes to
    /// the initial `(0, "")`.
    pub fn from_value(field: &str, value: &Value) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }

        serde_json::from_value(value.clone()).map_err(|e| TunnelError::MalformedField {
            field: field.to_string(),
            reason: e.to_string(),
        })
    }
}

impl From<(Version, String)> for VersionedMessage {
    fn from((version, payload): (Version, String)) -> Self {
        VersionedMessage { version, payload }
    }
}

impl From<VersionedMessage> for (Version, String) {
    fn from(msg: VersionedMessage) -> Self {
        (msg.version, msg.payload)
    }
}

/// Frames exchanged by the WebSocket transport (both directions)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncFrame {
    Declare { field: String, value: Value },
    Update { field: String, value: Value },
}

impl SyncFrame {
    pub fn declare(field: &str, value: Value) -> Self {
        SyncFrame::Declare {
            field: field.to_string(),
            value,
        }
    }

    pub fn update(field: &str, value: Value) -> Self {
        SyncFrame::Update {
            field: field.to_string(),
            value,
        }
    }

    pub fn field(&self) -> &str {
        match self {
            SyncFrame::Declare { field, .. } | SyncFrame::Update { field, .. } => field,
        }
    }

    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
