//! CDP Protocol Types
//!
//! These are the fundamental types for CDP communication.
//! Keep them minimal - the engine only speaks the handful of methods it needs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Request ID - monotonically increasing per connection
pub type RequestId = u64;

/// Target ID from Chrome
pub type TargetId = String;

/// CDP Request sent to browser
///
/// `params` is always an object, even when the method takes no arguments.
#[derive(Debug, Clone, Serialize)]
pub struct CDPRequest {
    pub id: RequestId,
    pub method: String,
    pub params: Map<String, Value>,
}

impl CDPRequest {
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        let params = match params {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };

        Self {
            id,
            method: method.into(),
            params,
        }
    }
}

/// CDP Error body of an error response
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CDPErrorBody {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// CDP Event from browser (no request ID)
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CDPEvent {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl CDPEvent {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    /// Whether every key of `expected` is present in the params with an equal value
    pub fn matches(&self, method: &str, expected: Option<&Map<String, Value>>) -> bool {
        if self.method != method {
            return false;
        }

        match expected {
            None => true,
            Some(expected) => expected
                .iter()
                .all(|(key, value)| self.params.get(key) == Some(value)),
        }
    }
}

/// Every field a frame may carry; classified into a [`Frame`] afterwards
#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(default)]
    id: Option<RequestId>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<CDPErrorBody>,
}

/// Classified inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Event(CDPEvent),
    Result { id: Option<RequestId>, result: Value },
    Error { id: Option<RequestId>, code: i64, message: String },
}

impl Frame {
    /// Classify a text frame. `None` means the payload has none of the known shapes.
    pub fn parse(payload: &str) -> Option<Self> {
        let raw: RawFrame = serde_json::from_str(payload).ok()?;

        if let Some(method) = raw.method {
            return Some(Frame::Event(CDPEvent {
                method,
                params: raw.params.unwrap_or_else(|| Value::Object(Map::new())),
            }));
        }

        if let Some(error) = raw.error {
            return Some(Frame::Error {
                id: raw.id,
                code: error.code,
                message: error.message,
            });
        }

        raw.result.map(|result| Frame::Result {
            id: raw.id,
            result,
        })
    }
}

/// Result of Target.createTarget
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTargetResult {
    #[serde(rename = "targetId")]
    pub target_id: TargetId,
}
