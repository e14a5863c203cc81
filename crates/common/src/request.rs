//! Inbound RPC envelope.
//!
//! Clients send one JSON object per request, over HTTP or as a WebSocket text
//! frame. Transport metadata (`_cip`, `_ua`, `ws_id`) is never read from the
//! client payload; the transport adapter fills it in after decoding.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Transport-agnostic RPC request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Request {
    /// Payload format hint sent by some clients.
    #[serde(default)]
    pub format: String,
    /// Envelope type as sent by the client.
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Client-supplied correlation id, echoed verbatim in the reply.
    #[serde(rename = "_reqid", default)]
    pub request_id: Value,
    /// Command in the form `<prefix>/<action>`.
    #[serde(rename = "cmd", default)]
    pub command: String,
    /// Client asks for a gzip-compressed reply.
    #[serde(rename = "gzip", default)]
    pub compressed: bool,
    #[serde(rename = "_sk", default)]
    pub session_key: String,
    #[serde(rename = "_ss", default)]
    pub session_secret: String,
    #[serde(rename = "_app_id", default)]
    pub app_id: String,
    #[serde(rename = "_app_token", default)]
    pub app_token: String,
    #[serde(rename = "_cid", default)]
    pub client_id: String,
    #[serde(rename = "_cver", default)]
    pub client_version: u32,
    /// Command arguments.
    #[serde(default)]
    pub data: Map<String, Value>,

    // Filled in by the transport adapter.
    #[serde(rename = "_cip", skip_deserializing, default)]
    pub client_ip: String,
    #[serde(rename = "_ua", skip_deserializing, default)]
    pub user_agent: String,
    #[serde(rename = "ws_id", skip_deserializing, default)]
    pub websocket_id: Option<String>,
}

impl Request {
    /// Decode a request from raw bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Build a request for `command` with the given arguments.
    pub fn new(command: impl Into<String>, data: Value) -> Self {
        let data = match data {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            command: command.into(),
            data,
            ..Default::default()
        }
    }

    /// The service prefix, i.e. the part of the command before its single `/`.
    ///
    /// Returns `None` when the command has no `/`, more than one `/`, or an
    /// empty prefix or action.
    pub fn service_prefix(&self) -> Option<&str> {
        parse_command(&self.command).ok().map(|(prefix, _)| prefix)
    }

    /// Session credentials, if both halves are present.
    pub fn session_credentials(&self) -> Option<(&str, &str)> {
        if self.session_key.is_empty() || self.session_secret.is_empty() {
            return None;
        }
        Some((&self.session_key, &self.session_secret))
    }

    /// Application credentials, if both halves are present.
    pub fn app_credentials(&self) -> Option<(&str, &str)> {
        if self.app_id.is_empty() || self.app_token.is_empty() {
            return None;
        }
        Some((&self.app_id, &self.app_token))
    }

    /// Deserialize the `data` map into a typed argument struct.
    pub fn data_as<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(Value::Object(self.data.clone()))
    }

    /// Whether the request arrived over a WebSocket connection.
    pub fn is_websocket(&self) -> bool {
        self.websocket_id.is_some()
    }
}

/// Split a command into `(prefix, action)`.
pub fn parse_command(command: &str) -> Result<(&str, &str)> {
    match command.split_once('/') {
        Some((prefix, action))
            if !prefix.is_empty() && !action.is_empty() && !action.contains('/') =>
        {
            Ok((prefix, action))
        }
        _ => Err(Error::MalformedCommand(command.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_wire_envelope() {
        let raw = br#"{
            "type": "q", "_reqid": "r-17", "cmd": "post/add", "gzip": true,
            "_sk": "sk", "_ss": "ss", "_cid": "web", "_cver": 4,
            "data": {"targets": "p1"}
        }"#;
        let req = Request::from_slice(raw).unwrap();
        assert_eq!(req.command, "post/add");
        assert_eq!(req.request_id, json!("r-17"));
        assert!(req.compressed);
        assert_eq!(req.session_credentials(), Some(("sk", "ss")));
        assert_eq!(req.app_credentials(), None);
        assert_eq!(req.client_version, 4);
        assert_eq!(req.data.get("targets"), Some(&json!("p1")));
    }

    #[test]
    fn test_transport_fields_not_client_controlled() {
        let raw = br#"{"cmd": "a/b", "ws_id": "forged", "_cip": "1.2.3.4", "_ua": "x"}"#;
        let req = Request::from_slice(raw).unwrap();
        assert!(req.websocket_id.is_none());
        assert!(req.client_ip.is_empty());
        assert!(req.user_agent.is_empty());
    }

    #[test]
    fn test_service_prefix() {
        assert_eq!(Request::new("place/get_members", json!({})).service_prefix(), Some("place"));
        assert_eq!(Request::new("noslash", json!({})).service_prefix(), None);
        assert_eq!(Request::new("a/b/c", json!({})).service_prefix(), None);
        assert_eq!(Request::new("/b", json!({})).service_prefix(), None);
        assert_eq!(Request::new("a/", json!({})).service_prefix(), None);
    }

    #[test]
    fn test_invalid_json() {
        assert!(Request::from_slice(b"{not json").is_err());
    }
}
