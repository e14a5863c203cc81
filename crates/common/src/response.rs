//! Outbound reply envelope.

use crate::error::ErrorCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Item used for requests rejected by the level gate.
pub const ITEM_NOT_AUTHORIZED: &str = "not_authorized";
/// Item used for unknown or malformed commands.
pub const ITEM_NOT_IMPLEMENTED: &str = "not_implemented";
/// Item used when a handler returned without populating its reply.
pub const ITEM_NOT_INITIALIZED: &str = "not_initialized";
/// Item used when the inbound payload could not be decoded.
pub const ITEM_NOT_VALID_JSON: &str = "not_valid_json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Err,
}

/// Envelope type: direct reply or out-of-band push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseType {
    #[serde(rename = "r")]
    Reply,
    #[serde(rename = "p")]
    Push,
}

/// RPC reply.
///
/// A fresh response has no status; handlers must call one of the
/// constructors ([`Response::ok`], [`Response::error`], ...) before
/// returning. The dispatcher treats a missing status as a handler defect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "type")]
    pub kind: ResponseType,
    #[serde(rename = "_reqid", default)]
    pub request_id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    /// Set when the reply is produced after the transport gave up on it.
    #[serde(default)]
    pub late: bool,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Response {
    /// Empty reply bound to a request id.
    pub fn new(request_id: Value) -> Self {
        Self {
            kind: ResponseType::Reply,
            request_id,
            status: None,
            late: false,
            data: Map::new(),
        }
    }

    /// Populate a successful reply. Non-object values land under `result`.
    pub fn ok(&mut self, data: Value) {
        self.status = Some(Status::Ok);
        self.data = match data {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("result".to_string(), other);
                map
            }
        };
    }

    /// Populate an error reply naming the offending fields.
    pub fn error(&mut self, code: ErrorCode, items: &[&str]) {
        self.status = Some(Status::Err);
        let mut map = Map::new();
        map.insert("err_code".to_string(), json!(code.code()));
        map.insert("items".to_string(), json!(items));
        self.data = map;
    }

    pub fn not_authorized(&mut self) {
        self.error(ErrorCode::Access, &[ITEM_NOT_AUTHORIZED]);
    }

    pub fn not_implemented(&mut self) {
        self.error(ErrorCode::Unavailable, &[ITEM_NOT_IMPLEMENTED]);
    }

    /// Guard value for handlers that returned without a status.
    pub fn not_initialized(&mut self) {
        self.error(ErrorCode::Unknown, &[ITEM_NOT_INITIALIZED]);
    }

    /// The transport abandoned the request before the handler finished.
    pub fn timeout(&mut self) {
        self.error(ErrorCode::Timeout, &[]);
    }

    /// Mark a reply as delivered after its request context ended.
    pub fn mark_late(&mut self) {
        self.late = true;
    }

    /// Reply for inbound payloads that are not a valid request.
    pub fn invalid_json() -> Self {
        let mut response = Self::new(Value::Null);
        response.error(ErrorCode::Invalid, &[ITEM_NOT_VALID_JSON]);
        response
    }

    pub fn is_initialized(&self) -> bool {
        self.status.is_some()
    }

    pub fn is_ok(&self) -> bool {
        self.status == Some(Status::Ok)
    }

    /// Error code of an error reply.
    pub fn error_code(&self) -> Option<ErrorCode> {
        if self.status != Some(Status::Err) {
            return None;
        }
        self.data
            .get("err_code")
            .and_then(Value::as_u64)
            .and_then(ErrorCode::from_code)
    }

    /// Items of an error reply.
    pub fn error_items(&self) -> Vec<&str> {
        self.data
            .get("items")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    pub fn is_not_authorized(&self) -> bool {
        self.error_code() == Some(ErrorCode::Access)
            && self.error_items() == [ITEM_NOT_AUTHORIZED]
    }

    pub fn is_not_implemented(&self) -> bool {
        self.error_code() == Some(ErrorCode::Unavailable)
            && self.error_items() == [ITEM_NOT_IMPLEMENTED]
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
