//! Bus messages exchanged between gateway bundles and the notification relay.
//!
//! Messages are tagged by subject, not by a shared envelope: each variant of
//! [`PushCommand`] is serialized as its bare struct and published on its own
//! subject.

use crate::error::Result;
use crate::response::ResponseType;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

// ============================================================================
// Subjects
// ============================================================================

pub const SUBJECT_REGISTER_DEVICE: &str = "NTFY.REGISTER.DEVICE";
pub const SUBJECT_UNREGISTER_DEVICE: &str = "NTFY.UNREGISTER.DEVICE";
pub const SUBJECT_REGISTER_WEBSOCKET: &str = "NTFY.REGISTER.WEBSOCKET";
pub const SUBJECT_UNREGISTER_WEBSOCKET: &str = "NTFY.UNREGISTER.WEBSOCKET";
pub const SUBJECT_PUSH_INTERNAL: &str = "NTFY.PUSH.INTERNAL";
pub const SUBJECT_PUSH_EXTERNAL: &str = "NTFY.PUSH.EXTERNAL";
/// Wildcard covering every notification subject.
pub const SUBJECT_NTFY_ALL: &str = "NTFY.>";
/// Broadcast subject every bundle subscribes to for WebSocket delivery.
pub const SUBJECT_GATEWAY: &str = "GATEWAY";
/// Outgoing post mail requests.
pub const SUBJECT_MAIL_POST: &str = "MAIL.POST";

// ============================================================================
// Notification commands
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterDevice {
    pub device_id: String,
    pub device_token: String,
    pub device_os: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnregisterDevice {
    pub device_id: String,
    pub device_token: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterWebsocket {
    pub user_id: String,
    pub device_id: String,
    pub bundle_id: String,
    pub websocket_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnregisterWebsocket {
    pub websocket_id: String,
    pub bundle_id: String,
}

/// Sync signal for already-connected clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushInternal {
    /// Account ids.
    pub targets: Vec<String>,
    /// Serialized [`PushMessage`].
    pub message: String,
    /// Deliver to live sockets only, never wake mobile devices.
    #[serde(default)]
    pub local_only: bool,
}

/// Human-readable notification for offline and mobile clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushExternal {
    pub targets: Vec<String>,
    pub data: HashMap<String, String>,
}

/// Any message the gateway publishes on a `NTFY.*` subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushCommand {
    RegisterDevice(RegisterDevice),
    UnregisterDevice(UnregisterDevice),
    RegisterWebsocket(RegisterWebsocket),
    UnregisterWebsocket(UnregisterWebsocket),
    PushInternal(PushInternal),
    PushExternal(PushExternal),
}

impl PushCommand {
    pub fn subject(&self) -> &'static str {
        match self {
            Self::RegisterDevice(_) => SUBJECT_REGISTER_DEVICE,
            Self::UnregisterDevice(_) => SUBJECT_UNREGISTER_DEVICE,
            Self::RegisterWebsocket(_) => SUBJECT_REGISTER_WEBSOCKET,
            Self::UnregisterWebsocket(_) => SUBJECT_UNREGISTER_WEBSOCKET,
            Self::PushInternal(_) => SUBJECT_PUSH_INTERNAL,
            Self::PushExternal(_) => SUBJECT_PUSH_EXTERNAL,
        }
    }

    /// Serialize the bare variant payload.
    pub fn to_payload(&self) -> Result<Bytes> {
        let json = match self {
            Self::RegisterDevice(m) => serde_json::to_vec(m)?,
            Self::UnregisterDevice(m) => serde_json::to_vec(m)?,
            Self::RegisterWebsocket(m) => serde_json::to_vec(m)?,
            Self::UnregisterWebsocket(m) => serde_json::to_vec(m)?,
            Self::PushInternal(m) => serde_json::to_vec(m)?,
            Self::PushExternal(m) => serde_json::to_vec(m)?,
        };
        Ok(Bytes::from(json))
    }

    /// Decode a payload received on `subject`. Unknown subjects yield `None`.
    pub fn from_subject(subject: &str, payload: &[u8]) -> Result<Option<Self>> {
        let command = match subject {
            SUBJECT_REGISTER_DEVICE => Self::RegisterDevice(serde_json::from_slice(payload)?),
            SUBJECT_UNREGISTER_DEVICE => Self::UnregisterDevice(serde_json::from_slice(payload)?),
            SUBJECT_REGISTER_WEBSOCKET => Self::RegisterWebsocket(serde_json::from_slice(payload)?),
            SUBJECT_UNREGISTER_WEBSOCKET => {
                Self::UnregisterWebsocket(serde_json::from_slice(payload)?)
            }
            SUBJECT_PUSH_INTERNAL => Self::PushInternal(serde_json::from_slice(payload)?),
            SUBJECT_PUSH_EXTERNAL => Self::PushExternal(serde_json::from_slice(payload)?),
            _ => return Ok(None),
        };
        Ok(Some(command))
    }
}

// ============================================================================
// Cross-bundle delivery
// ============================================================================

/// Envelope broadcast on [`SUBJECT_GATEWAY`]; only the bundle owning the
/// socket acts on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebsocketPush {
    pub bundle_id: String,
    pub websocket_id: String,
    /// Already-serialized frame, written to the socket verbatim.
    pub payload: String,
}

/// Out-of-band frame sent to clients (`type = "p"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    #[serde(rename = "type")]
    pub kind: ResponseType,
    pub cmd: String,
    pub data: Map<String, Value>,
}

impl PushMessage {
    pub fn new(cmd: impl Into<String>, data: Value) -> Self {
        Self {
            kind: ResponseType::Push,
            cmd: cmd.into(),
            data: match data {
                Value::Object(map) => map,
                _ => Map::new(),
            },
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subject_tagging() {
        let cmd = PushCommand::UnregisterWebsocket(UnregisterWebsocket {
            websocket_id: "ws1".into(),
            bundle_id: "b1".into(),
        });
        assert_eq!(cmd.subject(), SUBJECT_UNREGISTER_WEBSOCKET);

        let payload = cmd.to_payload().unwrap();
        let bare: Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(bare, json!({"websocket_id": "ws1", "bundle_id": "b1"}));

        let decoded = PushCommand::from_subject(cmd.subject(), &payload).unwrap();
        assert_eq!(decoded, Some(cmd));
    }

    #[test]
    fn test_unknown_subject_is_ignored() {
        assert!(PushCommand::from_subject("NTFY.OTHER", b"{}").unwrap().is_none());
    }

    #[test]
    fn test_push_message_shape() {
        let msg = PushMessage::new("sync-p", json!({"place_id": "p1"}));
        let wire: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(wire, json!({"type": "p", "cmd": "sync-p", "data": {"place_id": "p1"}}));
    }
}
