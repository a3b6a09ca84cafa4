//! The session loop and state machine on the MCP side.

use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite};

use gantry_lsp::{DocumentStore, LspClient, Supervisor};
use gantry_rpc::message::{
    INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR, RequestId,
    SERVER_NOT_INITIALIZED, error_response, response,
};
use gantry_rpc::stdio::{MessageReader, MessageWriter};
use gantry_rpc::uri::Workspace;
use gantry_rpc::RpcError;
use gantry_tools::{Registry, Tool, ToolCtx};

use crate::mcp;
use crate::recovery;

/// Lifecycle of one client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing accepted yet but `initialize`, `ping`, `shutdown`.
    Uninitialized,
    /// `initialize` answered; waiting for the `initialized` notification.
    Initializing,
    /// Full method surface available.
    Running,
    /// Terminal; the loop exits after the `shutdown` reply is written.
    Shutdown,
}

/// The bridge server. Borrows its collaborators from the composition
/// root; owns only the session state.
pub struct Server<'a> {
    registry: &'a Registry,
    lsp: &'a LspClient,
    documents: &'a DocumentStore,
    workspace: &'a Workspace,
    policy: &'a gantry_tools::Policy,
    supervisor: Option<&'a mut Supervisor>,
    state: SessionState,
}

impl<'a> Server<'a> {
    pub fn new(
        registry: &'a Registry,
        lsp: &'a LspClient,
        documents: &'a DocumentStore,
        workspace: &'a Workspace,
        policy: &'a gantry_tools::Policy,
        supervisor: Option<&'a mut Supervisor>,
    ) -> Self {
        Self {
            registry,
            lsp,
            documents,
            workspace,
            policy,
            supervisor,
            state: SessionState::Uninitialized,
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Serve one client until EOF or `shutdown`.
    ///
    /// Everything allocated for one message lives in this loop body and is
    /// released before the next read, on success and error paths alike.
    pub async fn run<R, W>(
        &mut self,
        reader: &mut MessageReader<R>,
        writer: &MessageWriter<W>,
    ) -> Result<(), RpcError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        loop {
            let msg = match reader.read_message().await {
                Ok(Some(msg)) => msg,
                Ok(None) => {
                    tracing::info!("client closed its stream");
                    break;
                }
                Err(e) if e.is_recoverable() => {
                    tracing::debug!("rejecting unreadable message: {e}");
                    writer
                        .write_message(&error_response(&RequestId::Null, PARSE_ERROR, "parse error"))
                        .await?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            if let Some(reply) = self.handle_message(msg).await {
                writer.write_message(&reply).await?;
            }
            if self.state == SessionState::Shutdown {
                tracing::info!("shutdown requested");
                break;
            }
        }
        Ok(())
    }

    /// Route one message. `None` means nothing goes back over the wire.
    pub async fn handle_message(&mut self, msg: Value) -> Option<Value> {
        let Some(obj) = msg.as_object() else {
            return Some(error_response(
                &RequestId::Null,
                INVALID_REQUEST,
                "message is not an object",
            ));
        };

        let id = match obj.get("id") {
            None => None,
            Some(raw) => match RequestId::from_value(raw) {
                Some(id) => Some(id),
                None => {
                    return Some(error_response(
                        &RequestId::Null,
                        INVALID_REQUEST,
                        "id must be an integer, a string, or null",
                    ));
                }
            },
        };

        let method = match obj.get("method").and_then(Value::as_str) {
            Some(method) => method,
            None => {
                // An id without a method is a broken request; anything else
                // (a stray response, say) is dropped.
                return id.map(|id| error_response(&id, INVALID_REQUEST, "missing method"));
            }
        };
        let params = obj.get("params");

        // A repeated initialize is invalid in any later state, and must
        // not disturb the state we're in.
        if method == "initialize" && self.state != SessionState::Uninitialized {
            return id.map(|id| {
                error_response(&id, INVALID_REQUEST, "initialize already received")
            });
        }

        if !self.method_allowed(method) {
            tracing::debug!(method, state = ?self.state, "method gated");
            return id
                .map(|id| error_response(&id, SERVER_NOT_INITIALIZED, "server not initialized"));
        }

        match method {
            "initialize" => self.handle_initialize(id, params),
            "initialized" | "notifications/initialized" => {
                if self.state == SessionState::Initializing {
                    self.state = SessionState::Running;
                    tracing::info!("session running");
                }
                None
            }
            "shutdown" => {
                self.state = SessionState::Shutdown;
                id.map(|id| response(&id, Value::Null))
            }
            "ping" => id.map(|id| response(&id, json!({}))),
            "tools/list" => {
                id.map(|id| response(&id, mcp::tools_list_result(self.registry.definitions())))
            }
            "tools/call" => self.handle_tool_call(id, params).await,
            "resources/list" => id.map(|id| response(&id, json!({ "resources": [] }))),
            other => {
                tracing::debug!(method = other, "unknown method");
                id.map(|id| {
                    error_response(&id, METHOD_NOT_FOUND, &format!("method not found: {other}"))
                })
            }
        }
    }

    fn method_allowed(&self, method: &str) -> bool {
        match self.state {
            SessionState::Uninitialized => {
                matches!(method, "initialize" | "ping" | "shutdown")
            }
            SessionState::Initializing => matches!(
                method,
                "initialized" | "notifications/initialized" | "ping" | "shutdown"
            ),
            SessionState::Running | SessionState::Shutdown => true,
        }
    }

    fn handle_initialize(&mut self, id: Option<RequestId>, params: Option<&Value>) -> Option<Value> {
        let id = id?;

        let requested = params
            .and_then(|p| p.get("protocolVersion"))
            .and_then(Value::as_str);
        let Some(requested) = requested else {
            return Some(error_response(
                &id,
                INVALID_PARAMS,
                "protocolVersion missing or not a string",
            ));
        };

        let Some(version) = mcp::SUPPORTED_PROTOCOL_VERSIONS
            .iter()
            .copied()
            .find(|v| *v == requested)
        else {
            return Some(error_response(
                &id,
                INVALID_PARAMS,
                &format!(
                    "unsupported protocol version {requested:?} (supported: {})",
                    mcp::SUPPORTED_PROTOCOL_VERSIONS.join(", ")
                ),
            ));
        };

        self.state = SessionState::Initializing;
        tracing::info!(version, "initialize accepted");
        Some(response(&id, mcp::initialize_result(version)))
    }

    async fn handle_tool_call(
        &mut self,
        id: Option<RequestId>,
        params: Option<&Value>,
    ) -> Option<Value> {
        let id = id?;

        let Some(name) = params
            .and_then(|p| p.get("name"))
            .and_then(Value::as_str)
        else {
            return Some(error_response(&id, INVALID_PARAMS, "missing tool name"));
        };
        let Some(tool) = self.registry.get(name) else {
            return Some(error_response(
                &id,
                INVALID_PARAMS,
                &format!("unknown tool: {name}"),
            ));
        };
        let args = params
            .and_then(|p| p.get("arguments"))
            .cloned()
            .unwrap_or_else(|| json!({}));

        let first = self.execute_tool(tool.as_ref(), args.clone()).await;
        let outcome = match first {
            Ok(text) => Ok(text),
            Err(err) if err.is_transient_lsp() => {
                tracing::warn!(tool = name, "transient failure: {err}");
                match self.try_recover().await {
                    Ok(()) => self.execute_tool(tool.as_ref(), args).await,
                    // Recovery itself failing keeps the original error.
                    Err(recovery_err) => {
                        tracing::warn!("session recovery failed: {recovery_err}");
                        Err(err)
                    }
                }
            }
            Err(err) => Err(err),
        };

        let reply = match outcome {
            Ok(text) => response(&id, mcp::tool_result(&text, false)),
            Err(err) => {
                tracing::debug!(tool = name, "tool failed: {err}");
                response(&id, mcp::tool_result(&err.to_string(), true))
            }
        };
        Some(reply)
    }

    async fn execute_tool(
        &self,
        tool: &dyn Tool,
        args: Value,
    ) -> Result<String, gantry_tools::ToolError> {
        let ctx = ToolCtx {
            lsp: self.lsp,
            documents: self.documents,
            workspace: self.workspace,
            policy: self.policy,
        };
        tool.execute(args, &ctx).await
    }

    async fn try_recover(&mut self) -> Result<(), gantry_lsp::LspError> {
        match self.supervisor.as_deref_mut() {
            Some(supervisor) => {
                recovery::reconnect_session(self.lsp, supervisor, self.documents, self.workspace)
                    .await
            }
            None => Err(gantry_lsp::LspError::NotConnected),
        }
    }
}
