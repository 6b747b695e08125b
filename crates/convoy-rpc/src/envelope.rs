//! JSON-RPC 2.0 wire envelope
//!
//! One frame is one JSON document: a request, a response, a notification
//! (a server-initiated request), a subscribe frame for event streams, or a
//! raw event record relayed to a subscriber. Unknown fields on envelopes
//! are tolerated on read-back; only signed payloads are strict.

use convoy_events::{Event, EventFilter};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use convoy_core::Aid;

pub const JSONRPC_VERSION: &str = "2.0";

/// Wire-visible error codes.
pub mod code {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    pub const AUTHENTICATION_FAILED: i64 = -32000;
    pub const TIMEOUT: i64 = -32001;
    pub const DISCOVERY_FAILED: i64 = -32002;
    pub const RATE_LIMIT_EXCEEDED: i64 = -32029;
}

/// Request identifier: a non-empty string or a number, echoed verbatim.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    Text(String),
}

impl RequestId {
    /// Reserved id for responses to unparseable input.
    pub const PARSE_ERROR: RequestId = RequestId::Number(-1);

    /// Whether this id is acceptable on an inbound request.
    pub fn is_valid(&self) -> bool {
        match self {
            RequestId::Number(_) => true,
            RequestId::Text(s) => !s.is_empty(),
        }
    }

    /// Stable map key for request correlation.
    pub fn key(&self) -> String {
        match self {
            RequestId::Number(n) => n.to_string(),
            RequestId::Text(s) => s.clone(),
        }
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        RequestId::Text(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::Text(s.to_string())
    }
}

/// Caller identity block on an authenticated request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Auth {
    pub from: Aid,
    /// Lowercase hex of the 64-byte signature over the covered payload.
    pub signature: String,
}

/// A JSON-RPC 2.0 request or notification frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<Auth>,
    pub id: RequestId,
}

impl Request {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            auth: None,
            id: id.into(),
        }
    }
}

/// A JSON-RPC 2.0 response frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl Response {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: RequestId, error: ErrorObject) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Error object carried in a failed response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn parse_error() -> Self {
        Self::new(code::PARSE_ERROR, "Parse error")
    }

    pub fn invalid_request() -> Self {
        Self::new(code::INVALID_REQUEST, "Invalid request")
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(code::METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(code::INVALID_PARAMS, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(code::INTERNAL_ERROR, message)
    }

    pub fn authentication_failed(message: impl Into<String>) -> Self {
        Self::new(code::AUTHENTICATION_FAILED, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(code::TIMEOUT, message)
    }

    pub fn discovery_failed(message: impl Into<String>) -> Self {
        Self::new(code::DISCOVERY_FAILED, message)
    }

    pub fn rate_limit_exceeded() -> Self {
        Self::new(code::RATE_LIMIT_EXCEEDED, "Rate limit exceeded")
    }
}

/// One decoded inbound frame.
#[derive(Debug)]
pub enum Frame {
    /// A request or a notification (server-initiated request).
    Request(Box<Request>),
    Response(Box<Response>),
    /// Event-stream filter amendment.
    Subscribe(EventFilter),
    /// A relayed event record.
    Event(Box<Event>),
    /// Anything else; kept for diagnostics.
    Unknown(Value),
}

/// Classify a parsed frame.
///
/// Subscribe frames carry `type: "subscribe"` and no sequence; JSON-RPC
/// traffic carries `jsonrpc`; relayed events carry `type` plus `sequence`.
pub fn classify_frame(value: Value) -> Frame {
    let Some(obj) = value.as_object() else {
        return Frame::Unknown(value);
    };

    if obj.get("type").and_then(Value::as_str) == Some("subscribe")
        && !obj.contains_key("sequence")
    {
        let filter = obj
            .get("filter")
            .cloned()
            .and_then(|f| serde_json::from_value(f).ok())
            .unwrap_or_default();
        return Frame::Subscribe(filter);
    }

    if obj.contains_key("jsonrpc") {
        if obj.contains_key("method") {
            if let Ok(request) = serde_json::from_value::<Request>(value.clone()) {
                return Frame::Request(Box::new(request));
            }
        } else if obj.contains_key("id") {
            if let Ok(response) = serde_json::from_value::<Response>(value.clone()) {
                return Frame::Response(Box::new(response));
            }
        }
        return Frame::Unknown(value);
    }

    if obj.contains_key("sequence") && obj.contains_key("type") {
        if let Ok(event) = serde_json::from_value::<Event>(value.clone()) {
            return Frame::Event(Box::new(event));
        }
    }

    Frame::Unknown(value)
}
