//! MCP result payloads the server emits.

use serde_json::{Value, json};

pub const SERVER_NAME: &str = "gantry";

/// Newest first; negotiation picks the client's version when listed.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2024-11-05"];

#[must_use]
pub fn initialize_result(protocol_version: &str) -> Value {
    json!({
        "protocolVersion": protocol_version,
        "capabilities": {
            "tools": {},
            "resources": {}
        },
        "serverInfo": {
            "name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

#[must_use]
pub fn tools_list_result(definitions: Vec<Value>) -> Value {
    json!({ "tools": definitions })
}

/// Wrap tool output (or a tool failure) as a single text content item.
#[must_use]
pub fn tool_result(text: &str, is_error: bool) -> Value {
    let mut result = json!({
        "content": [ { "type": "text", "text": text } ]
    });
    if is_error {
        result["isError"] = json!(true);
    }
    result
}
