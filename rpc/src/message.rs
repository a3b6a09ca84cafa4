//! JSON-RPC 2.0 envelope model shared by both sides of the bridge.
//!
//! Payloads are passed through as opaque [`serde_json::Value`]s; only the
//! fields needed for routing (`id`, `method`, the presence of
//! `result`/`error`) are interpreted here.

use serde::Serialize;
use serde_json::{Value, json};

/// The only protocol version either side of the bridge speaks.
pub const JSONRPC_VERSION: &str = "2.0";

// Standard JSON-RPC error codes.
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

// Implementation-defined codes used on the MCP side.
pub const SERVER_NOT_INITIALIZED: i64 = -32002;
pub const REQUEST_TIMEOUT: i64 = -32001;
pub const SOUTH_NOT_RUNNING: i64 = -32000;

/// A request id as JSON-RPC defines it: an integer, a string, or a literal
/// `null`. `Null` means the `id` member was *present* and null, which is
/// distinct from a notification (no `id` member at all).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RequestId {
    Num(i64),
    Str(String),
    Null,
}

impl RequestId {
    /// Interpret the value of an `id` member. Returns `None` for shapes
    /// JSON-RPC does not allow as ids (booleans, arrays, objects, floats).
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(RequestId::Null),
            Value::Number(n) => n.as_i64().map(RequestId::Num),
            Value::String(s) => Some(RequestId::Str(s.clone())),
            _ => None,
        }
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            RequestId::Num(n) => json!(n),
            RequestId::Str(s) => json!(s),
            RequestId::Null => Value::Null,
        }
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Num(n) => write!(f, "{n}"),
            RequestId::Str(s) => write!(f, "{s:?}"),
            RequestId::Null => f.write_str("null"),
        }
    }
}

/// An outgoing request toward the language server. Ids on that side are
/// always generated from a single `u64` counter.
#[derive(Debug, Serialize)]
pub struct Request {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    #[must_use]
    pub fn new(id: u64, method: &'static str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        }
    }
}

/// An outgoing notification. `params` is omitted entirely when `None`,
/// never serialized as `null`.
#[derive(Debug, Serialize)]
pub struct Notification {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    #[must_use]
    pub fn new(method: &'static str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
        }
    }
}

/// Build a success response for `id`.
#[must_use]
pub fn response(id: &RequestId, result: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id.to_value(),
        "result": result,
    })
}

/// Build an error response for `id`.
#[must_use]
pub fn error_response(id: &RequestId, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id.to_value(),
        "error": { "code": code, "message": message },
    })
}
