//! Hand-built LSP payloads for session lifecycle messages.
//!
//! Only the messages the bridge itself originates live here; tool-specific
//! request params are built at their call sites.

use std::path::Path;

use serde_json::{Value, json};

/// The fixed client-capability document sent with `initialize`.
///
/// `processId` is null on purpose: the bridge, not the editor process the
/// server might expect, is the parent, and servers that watch the pid
/// would exit with it.
pub(crate) fn initialize_params(root_uri: &str) -> Value {
    json!({
        "processId": null,
        "rootUri": root_uri,
        "capabilities": {
            "textDocument": {
                "synchronization": {
                    "dynamicRegistration": false,
                    "willSave": false,
                    "willSaveWaitUntil": false,
                    "didSave": false
                },
                "hover": {
                    "dynamicRegistration": false,
                    "contentFormat": ["markdown", "plaintext"]
                },
                "definition": {
                    "dynamicRegistration": false,
                    "linkSupport": true
                },
                "references": {
                    "dynamicRegistration": false
                },
                "documentSymbol": {
                    "dynamicRegistration": false,
                    "hierarchicalDocumentSymbolSupport": true
                }
            },
            "workspace": {
                "symbol": {
                    "dynamicRegistration": false
                },
                "workspaceFolders": false
            }
        }
    })
}

pub(crate) fn did_open_params(uri: &str, language_id: &str, version: i64, text: &str) -> Value {
    json!({
        "textDocument": {
            "uri": uri,
            "languageId": language_id,
            "version": version,
            "text": text
        }
    })
}

pub(crate) fn did_close_params(uri: &str) -> Value {
    json!({
        "textDocument": { "uri": uri }
    })
}

/// LSP language id from a file extension.
pub(crate) fn language_id_for(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("rs") => "rust",
        Some("py" | "pyi") => "python",
        Some("js" | "mjs") => "javascript",
        Some("ts" | "mts") => "typescript",
        Some("go") => "go",
        Some("c" | "h") => "c",
        Some("cpp" | "cc" | "cxx" | "hpp") => "cpp",
        Some("java") => "java",
        Some("zig") => "zig",
        _ => "plaintext",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_params_shape() {
        let params = initialize_params("file:///workspace");
        assert!(params["processId"].is_null());
        assert_eq!(params["rootUri"], "file:///workspace");
        assert!(params["capabilities"]["textDocument"]["synchronization"].is_object());
        assert!(params["capabilities"]["workspace"]["symbol"].is_object());
    }

    #[test]
    fn did_open_params_shape() {
        let params = did_open_params("file:///t.rs", "rust", 1, "fn main() {}");
        assert_eq!(params["textDocument"]["uri"], "file:///t.rs");
        assert_eq!(params["textDocument"]["languageId"], "rust");
        assert_eq!(params["textDocument"]["version"], 1);
        assert_eq!(params["textDocument"]["text"], "fn main() {}");
    }

    #[test]
    fn did_close_params_shape() {
        let params = did_close_params("file:///t.rs");
        assert_eq!(params["textDocument"]["uri"], "file:///t.rs");
    }

    #[test]
    fn language_ids() {
        assert_eq!(language_id_for(Path::new("a.rs")), "rust");
        assert_eq!(language_id_for(Path::new("a.pyi")), "python");
        assert_eq!(language_id_for(Path::new("a.cc")), "cpp");
        assert_eq!(language_id_for(Path::new("Makefile")), "plaintext");
        assert_eq!(language_id_for(Path::new("a.unknownext")), "plaintext");
    }
}
