//! Code-intelligence tools backed by the language server.
//!
//! Each tool makes sure the target document is open, issues one LSP
//! request, and renders the reply as plain text a model can read.
//! Positions are 1-indexed on the tool surface and 0-indexed on the wire.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Value, json};

use gantry_lsp::LspError;
use gantry_rpc::uri::uri_to_path;

use crate::{Tool, ToolCtx, ToolError, ToolFut, parse_args};

#[derive(Debug, Deserialize)]
struct PositionArgs {
    file_path: String,
    line: u32,
    column: u32,
}

#[derive(Debug, Deserialize)]
struct ReferencesArgs {
    file_path: String,
    line: u32,
    column: u32,
    #[serde(default = "default_true")]
    include_declaration: bool,
}

#[derive(Debug, Deserialize)]
struct FileArgs {
    file_path: String,
}

#[derive(Debug, Deserialize)]
struct QueryArgs {
    query: String,
    #[serde(default = "default_max_results")]
    max_results: usize,
}

fn default_true() -> bool {
    true
}

fn default_max_results() -> usize {
    50
}

fn position_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "file_path": {
                "type": "string",
                "description": "Path to the file, relative to the workspace root"
            },
            "line": { "type": "integer", "description": "1-indexed line" },
            "column": { "type": "integer", "description": "1-indexed column" }
        },
        "required": ["file_path", "line", "column"]
    })
}

fn position_params(uri: &str, line: u32, column: u32) -> Value {
    json!({
        "textDocument": { "uri": uri },
        "position": {
            "line": line.saturating_sub(1),
            "character": column.saturating_sub(1)
        }
    })
}

/// Pull the `result` out of a raw reply, surfacing an embedded JSON-RPC
/// error as [`LspError::ServerError`].
fn reply_result(raw: &[u8]) -> Result<Value, ToolError> {
    let reply: Value = serde_json::from_slice(raw).map_err(|e| ToolError::Lsp(
        LspError::ServerError {
            code: gantry_rpc::message::PARSE_ERROR,
            message: format!("unparsable reply: {e}"),
        },
    ))?;
    if let Some(error) = reply.get("error") {
        return Err(ToolError::Lsp(LspError::ServerError {
            code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
            message: error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        }));
    }
    Ok(reply.get("result").cloned().unwrap_or(Value::Null))
}

/// One resolved location, already 1-indexed for display.
struct Spot {
    path: PathBuf,
    line: u32,
    column: u32,
}

impl Spot {
    fn from_location(loc: &Value) -> Option<Self> {
        // Location and LocationLink spell their fields differently.
        let (uri, range) = if loc.get("targetUri").is_some() {
            (loc.get("targetUri"), loc.get("targetSelectionRange"))
        } else {
            (loc.get("uri"), loc.get("range"))
        };
        let uri = uri?.as_str()?;
        let start = range?.get("start")?;
        Some(Spot {
            path: uri_to_path(uri).unwrap_or_else(|_| PathBuf::from(uri)),
            line: start.get("line")?.as_u64()? as u32 + 1,
            column: start.get("character")?.as_u64()? as u32 + 1,
        })
    }
}

/// Normalize the three shapes a definition-style reply can take:
/// null, one Location, or an array of Location/LocationLink.
fn collect_spots(result: &Value) -> Vec<Spot> {
    match result {
        Value::Array(items) => items.iter().filter_map(Spot::from_location).collect(),
        Value::Object(_) => Spot::from_location(result).into_iter().collect(),
        _ => Vec::new(),
    }
}

fn format_spots(spots: &[Spot]) -> String {
    if spots.is_empty() {
        return "No results found.".to_string();
    }
    spots
        .iter()
        .map(|s| format!("{}:{}:{}", s.path.display(), s.line, s.column))
        .collect::<Vec<_>>()
        .join("\n")
}

fn symbol_kind_name(kind: u64) -> &'static str {
    match kind {
        1 => "file",
        2 => "module",
        3 => "namespace",
        4 => "package",
        5 => "class",
        6 => "method",
        7 => "property",
        8 => "field",
        9 => "constructor",
        10 => "enum",
        11 => "interface",
        12 => "function",
        13 => "variable",
        14 => "constant",
        15 => "string",
        16 => "number",
        17 => "boolean",
        18 => "array",
        19 => "object",
        20 => "key",
        21 => "null",
        22 => "enum member",
        23 => "struct",
        24 => "event",
        25 => "operator",
        26 => "type parameter",
        _ => "symbol",
    }
}

/// Jump to where a symbol is defined.
pub struct GotoDefinition;

impl Tool for GotoDefinition {
    fn name(&self) -> &'static str {
        "goto_definition"
    }

    fn description(&self) -> &'static str {
        "Jump to where a symbol is defined. Essential for tracing imports and understanding implementations."
    }

    fn input_schema(&self) -> Value {
        position_schema()
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx<'a>) -> ToolFut<'a> {
        Box::pin(async move {
            let args: PositionArgs = parse_args(args)?;
            let uri = ctx
                .documents
                .ensure_open(ctx.lsp, ctx.workspace, Path::new(&args.file_path))
                .await?;
            let raw = ctx
                .lsp
                .request(
                    "textDocument/definition",
                    Some(position_params(&uri, args.line, args.column)),
                )
                .await?;
            let result = reply_result(&raw)?;
            Ok(format_spots(&collect_spots(&result)))
        })
    }
}

/// Find all usages of a symbol.
pub struct FindReferences;

impl Tool for FindReferences {
    fn name(&self) -> &'static str {
        "find_references"
    }

    fn description(&self) -> &'static str {
        "Find all usages of a symbol. Reveals dependencies, call sites, and the impact of changes."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to the file, relative to the workspace root"
                },
                "line": { "type": "integer", "description": "1-indexed line" },
                "column": { "type": "integer", "description": "1-indexed column" },
                "include_declaration": {
                    "type": "boolean",
                    "description": "Also list the declaration itself (default true)"
                }
            },
            "required": ["file_path", "line", "column"]
        })
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx<'a>) -> ToolFut<'a> {
        Box::pin(async move {
            let args: ReferencesArgs = parse_args(args)?;
            let uri = ctx
                .documents
                .ensure_open(ctx.lsp, ctx.workspace, Path::new(&args.file_path))
                .await?;
            let mut params = position_params(&uri, args.line, args.column);
            params["context"] = json!({ "includeDeclaration": args.include_declaration });
            let raw = ctx
                .lsp
                .request("textDocument/references", Some(params))
                .await?;
            let result = reply_result(&raw)?;
            Ok(format_spots(&collect_spots(&result)))
        })
    }
}

/// Type signature and documentation at a position.
pub struct Hover;

impl Tool for Hover {
    fn name(&self) -> &'static str {
        "hover"
    }

    fn description(&self) -> &'static str {
        "Get the type signature and docs for a symbol. Quick way to understand what something is."
    }

    fn input_schema(&self) -> Value {
        position_schema()
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx<'a>) -> ToolFut<'a> {
        Box::pin(async move {
            let args: PositionArgs = parse_args(args)?;
            let uri = ctx
                .documents
                .ensure_open(ctx.lsp, ctx.workspace, Path::new(&args.file_path))
                .await?;
            let raw = ctx
                .lsp
                .request(
                    "textDocument/hover",
                    Some(position_params(&uri, args.line, args.column)),
                )
                .await?;
            let result = reply_result(&raw)?;
            let text = hover_text(&result);
            if text.is_empty() {
                Ok("No hover information available.".to_string())
            } else {
                Ok(text)
            }
        })
    }
}

/// Flatten the contents shapes hover allows: a string, a MarkedString
/// object, markup, or an array of the first two.
fn hover_text(result: &Value) -> String {
    fn marked(value: &Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Object(obj) => {
                if let Some(text) = obj.get("value").and_then(Value::as_str) {
                    match obj.get("language").and_then(Value::as_str) {
                        Some(lang) => Some(format!("```{lang}\n{text}\n```")),
                        None => Some(text.to_string()),
                    }
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    let Some(contents) = result.get("contents") else {
        return String::new();
    };
    match contents {
        Value::Array(items) => items
            .iter()
            .filter_map(marked)
            .collect::<Vec<_>>()
            .join("\n\n"),
        other => marked(other).unwrap_or_default(),
    }
}

/// Structural overview of one file.
pub struct DocumentSymbols;

impl Tool for DocumentSymbols {
    fn name(&self) -> &'static str {
        "document_symbols"
    }

    fn description(&self) -> &'static str {
        "List all symbols in a file: functions, types, constants. A structural overview."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to the file, relative to the workspace root"
                }
            },
            "required": ["file_path"]
        })
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx<'a>) -> ToolFut<'a> {
        Box::pin(async move {
            let args: FileArgs = parse_args(args)?;
            let uri = ctx
                .documents
                .ensure_open(ctx.lsp, ctx.workspace, Path::new(&args.file_path))
                .await?;
            let raw = ctx
                .lsp
                .request(
                    "textDocument/documentSymbol",
                    Some(json!({ "textDocument": { "uri": uri } })),
                )
                .await?;
            let result = reply_result(&raw)?;

            let mut out = String::new();
            if let Value::Array(symbols) = &result {
                format_symbols(symbols, 0, &mut out);
            }
            if out.is_empty() {
                Ok("No symbols found in document.".to_string())
            } else {
                Ok(out)
            }
        })
    }
}

/// Render DocumentSymbol (nested) or SymbolInformation (flat) entries.
fn format_symbols(symbols: &[Value], depth: usize, out: &mut String) {
    use std::fmt::Write as _;

    for symbol in symbols {
        let name = symbol.get("name").and_then(Value::as_str).unwrap_or("?");
        let kind = symbol.get("kind").and_then(Value::as_u64).unwrap_or(0);
        let line = symbol
            .get("selectionRange")
            .or_else(|| symbol.get("location").and_then(|l| l.get("range")))
            .and_then(|r| r.get("start"))
            .and_then(|s| s.get("line"))
            .and_then(Value::as_u64)
            .map(|l| l + 1);

        let indent = "  ".repeat(depth);
        let _ = match line {
            Some(line) => writeln!(
                out,
                "{indent}[{}] {name} (line {line})",
                symbol_kind_name(kind)
            ),
            None => writeln!(out, "{indent}[{}] {name}", symbol_kind_name(kind)),
        };

        if let Some(Value::Array(children)) = symbol.get("children") {
            format_symbols(children, depth + 1, out);
        }
    }
}

/// Workspace-wide symbol search.
pub struct WorkspaceSymbols;

impl Tool for WorkspaceSymbols {
    fn name(&self) -> &'static str {
        "workspace_symbols"
    }

    fn description(&self) -> &'static str {
        "Search symbols by name across the workspace. Find types, functions, or modules without knowing their location."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Symbol name or fragment" },
                "max_results": {
                    "type": "integer",
                    "description": "Cap on returned symbols (default 50)"
                }
            },
            "required": ["query"]
        })
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx<'a>) -> ToolFut<'a> {
        Box::pin(async move {
            let args: QueryArgs = parse_args(args)?;
            let raw = ctx
                .lsp
                .request("workspace/symbol", Some(json!({ "query": args.query })))
                .await?;
            let result = reply_result(&raw)?;

            let Value::Array(symbols) = &result else {
                return Ok(format!("No symbols found matching {:?}.", args.query));
            };
            if symbols.is_empty() {
                return Ok(format!("No symbols found matching {:?}.", args.query));
            }

            let mut lines = Vec::new();
            for symbol in symbols.iter().take(args.max_results) {
                let name = symbol.get("name").and_then(Value::as_str).unwrap_or("?");
                let kind = symbol.get("kind").and_then(Value::as_u64).unwrap_or(0);
                let spot = symbol.get("location").and_then(Spot::from_location);
                match spot {
                    Some(spot) => lines.push(format!(
                        "[{}] {name} - {}:{}",
                        symbol_kind_name(kind),
                        spot.path.display(),
                        spot.line
                    )),
                    None => lines.push(format!("[{}] {name}", symbol_kind_name(kind))),
                }
            }
            Ok(lines.join("\n"))
        })
    }
}
