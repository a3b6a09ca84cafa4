//! Tool framework for the gantry bridge: the [`Tool`] trait, the
//! [`Registry`] the dispatcher consults, the shared [`ToolCtx`], and the
//! error taxonomy tool results are built from.

pub mod commands;
pub mod navigation;
pub mod policy;

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use gantry_lsp::{DocumentError, DocumentStore, LspClient, LspError};
use gantry_rpc::uri::{PathError, Workspace};

pub use policy::Policy;

/// Tool execution future type alias.
pub type ToolFut<'a> = Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send + 'a>>;

/// Everything a tool handler may touch. Handlers borrow the context for
/// the duration of one call and own nothing.
pub struct ToolCtx<'a> {
    pub lsp: &'a LspClient,
    pub documents: &'a DocumentStore,
    pub workspace: &'a Workspace,
    pub policy: &'a Policy,
}

/// One entry in the tool catalog: an advertised schema plus a handler.
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// JSON schema for the arguments object: `{"type":"object",
    /// "properties":{…}, "required":[…]?}`.
    fn input_schema(&self) -> Value;

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx<'a>) -> ToolFut<'a>;
}

/// Error types for tool execution.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("bad tool args: {message}")]
    BadArgs { message: String },

    #[error("duplicate tool registered: {name}")]
    DuplicateTool { name: String },

    #[error("command tools are disabled; start the bridge with --enable-commands")]
    CommandsDisabled,

    #[error("no {role} binary configured")]
    BinaryNotConfigured { role: &'static str },

    #[error("binary outside the trusted prefixes: {}", .0.display())]
    UntrustedBinary(PathBuf),

    #[error("access to {} is blocked by policy", .0.display())]
    DeniedPath(PathBuf),

    #[error("command failed: {message}")]
    ExecutionFailed { message: String },

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    Lsp(#[from] LspError),
}

impl ToolError {
    /// Whether this failure came from a sick language-server session, the
    /// one class of error a reconnect can fix.
    #[must_use]
    pub fn is_transient_lsp(&self) -> bool {
        match self {
            ToolError::Lsp(e) | ToolError::Document(DocumentError::Lsp(e)) => e.is_transient(),
            _ => false,
        }
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::BadArgs {
        message: e.to_string(),
    })
}

/// Name → tool map consulted by the dispatcher.
#[derive(Default)]
pub struct Registry {
    tools: HashMap<&'static str, Arc<dyn Tool>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.name();
        if self.tools.insert(name, tool).is_some() {
            return Err(ToolError::DuplicateTool {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Snapshot of every tool's advertised definition, in no particular
    /// order.
    #[must_use]
    pub fn definitions(&self) -> Vec<Value> {
        self.tools
            .values()
            .map(|tool| {
                serde_json::json!({
                    "name": tool.name(),
                    "description": tool.description(),
                    "inputSchema": tool.input_schema(),
                })
            })
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// A registry holding the full built-in catalog.
    pub fn with_builtins() -> Result<Self, ToolError> {
        let mut registry = Self::new();
        registry.register(Arc::new(navigation::GotoDefinition))?;
        registry.register(Arc::new(navigation::FindReferences))?;
        registry.register(Arc::new(navigation::Hover))?;
        registry.register(Arc::new(navigation::DocumentSymbols))?;
        registry.register(Arc::new(navigation::WorkspaceSymbols))?;
        registry.register(Arc::new(commands::CommandTool::build()))?;
        registry.register(Arc::new(commands::CommandTool::test()))?;
        registry.register(Arc::new(commands::CommandTool::fmt()))?;
        Ok(registry)
    }
}
