//! Request/response correlation over the language-server pipes.
//!
//! Many callers issue requests against a single pair of child pipes. Each
//! request gets an id from one atomic counter and parks a oneshot sender
//! in the pending table; a background reader task routes each reply to the
//! waiter owning its id. A writer task serializes all outbound frames, so
//! the child's stdin has exactly one writer.
//!
//! Every pending entry is removed exactly once: by the reader on a
//! matching reply, by the caller on timeout, or by teardown draining the
//! table (which wakes every parked caller with [`LspError::NoResponse`]).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

use gantry_rpc::frame::{FrameReader, FrameWriter};
use gantry_rpc::message::{Notification, Request};

use crate::{LspError, protocol};

/// Wall-clock deadline for one request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const WRITER_CHANNEL_CAPACITY: usize = 64;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Vec<u8>>>>>;

enum WriterCommand {
    Send(Value),
    Shutdown,
}

struct Session {
    writer_tx: mpsc::Sender<WriterCommand>,
    /// Cleared by the reader task when the child's stdout ends, so new
    /// requests fail fast instead of parking for the full timeout.
    alive: Arc<AtomicBool>,
    writer_handle: JoinHandle<()>,
    reader_handle: JoinHandle<()>,
    stderr_handle: Option<JoinHandle<()>>,
}

/// Correlating client over one language-server session.
///
/// All methods take `&self`; the client is shared by the dispatch loop and
/// the recovery path without further wrapping.
pub struct LspClient {
    next_id: AtomicU64,
    pending: PendingMap,
    session: Mutex<Option<Session>>,
}

impl Default for LspClient {
    fn default() -> Self {
        Self::new()
    }
}

impl LspClient {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            session: Mutex::new(None),
        }
    }

    /// Attach to a spawned child's pipes and start the background tasks:
    /// a writer draining the outbound queue, a reader demultiplexing
    /// replies, and (when stderr is provided) a drain forwarding the
    /// child's log lines into tracing.
    pub async fn connect<I, O, E>(&self, stdin: I, stdout: O, stderr: Option<E>)
    where
        I: AsyncWrite + Send + Unpin + 'static,
        O: AsyncRead + Send + Unpin + 'static,
        E: AsyncRead + Send + Unpin + 'static,
    {
        let (writer_tx, mut writer_rx) = mpsc::channel::<WriterCommand>(WRITER_CHANNEL_CAPACITY);
        let writer_handle = tokio::spawn(async move {
            let mut writer = FrameWriter::new(stdin);
            while let Some(cmd) = writer_rx.recv().await {
                match cmd {
                    WriterCommand::Send(frame) => {
                        if let Err(e) = writer.write_frame(&frame).await {
                            tracing::warn!("language server write error: {e}");
                            break;
                        }
                    }
                    WriterCommand::Shutdown => break,
                }
            }
        });

        let alive = Arc::new(AtomicBool::new(true));
        let pending = self.pending.clone();
        let reader_alive = alive.clone();
        let reader_handle = tokio::spawn(async move {
            let mut reader = FrameReader::new(stdout);
            loop {
                match reader.read_frame().await {
                    Ok(Some(body)) => dispatch_reply(&body, &pending).await,
                    Ok(None) => {
                        tracing::info!("language server closed its stdout");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("language server read error: {e}");
                        break;
                    }
                }
            }
            // Mark the session dead first, then wake every parked caller;
            // their oneshot receivers fail once the senders drop.
            reader_alive.store(false, Ordering::Release);
            pending.lock().await.clear();
        });

        let stderr_handle = stderr.map(|stderr| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(source = "language-server", "{line}");
                }
            })
        });

        let mut session = self.session.lock().await;
        if let Some(old) = session.take() {
            // Stale ids left in the pending table can no longer be
            // answered; their callers fail via the timeout path.
            tracing::warn!("connect over a live session; dropping the old one");
            let _ = old.writer_tx.send(WriterCommand::Shutdown).await;
            old.reader_handle.abort();
            if let Some(handle) = &old.stderr_handle {
                handle.abort();
            }
        }
        *session = Some(Session {
            writer_tx,
            alive,
            writer_handle,
            reader_handle,
            stderr_handle,
        });
    }

    pub async fn is_connected(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Issue a request and wait for its reply.
    ///
    /// Returns the full reply message bytes; errors carried inside a reply
    /// are the caller's to interpret. Fails with [`LspError::RequestTimeout`]
    /// after [`REQUEST_TIMEOUT`], or [`LspError::NoResponse`] if the session
    /// dies while the request is in flight.
    pub async fn request(
        &self,
        method: &'static str,
        params: Option<Value>,
    ) -> Result<Vec<u8>, LspError> {
        let writer_tx = match &*self.session.lock().await {
            Some(session) if session.alive.load(Ordering::Acquire) => session.writer_tx.clone(),
            _ => return Err(LspError::NotConnected),
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let frame = match serde_json::to_value(Request::new(id, method, params)) {
            Ok(frame) => frame,
            Err(e) => {
                self.pending.lock().await.remove(&id);
                return Err(LspError::ServerError {
                    code: gantry_rpc::message::INTERNAL_ERROR,
                    message: format!("unserializable request: {e}"),
                });
            }
        };
        if writer_tx.send(WriterCommand::Send(frame)).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(LspError::NotConnected);
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(body)) => Ok(body),
            // Sender dropped without a value: the reader drained the table.
            Ok(Err(_)) => Err(LspError::NoResponse),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(LspError::RequestTimeout(REQUEST_TIMEOUT))
            }
        }
    }

    /// Fire-and-forget notification.
    pub async fn notify(
        &self,
        method: &'static str,
        params: Option<Value>,
    ) -> Result<(), LspError> {
        let writer_tx = match &*self.session.lock().await {
            Some(session) if session.alive.load(Ordering::Acquire) => session.writer_tx.clone(),
            _ => return Err(LspError::NotConnected),
        };
        let frame = serde_json::to_value(Notification::new(method, params)).map_err(|e| {
            LspError::ServerError {
                code: gantry_rpc::message::INTERNAL_ERROR,
                message: format!("unserializable notification: {e}"),
            }
        })?;
        writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .map_err(|_| LspError::NotConnected)
    }

    /// Run the LSP handshake: `initialize` with the fixed client
    /// capabilities, then `initialized` with an explicit `{}` params
    /// object (an empty array here confuses several servers).
    pub async fn initialize(&self, workspace_uri: &str) -> Result<(), LspError> {
        let raw = self
            .request("initialize", Some(protocol::initialize_params(workspace_uri)))
            .await?;
        let reply: Value = serde_json::from_slice(&raw).map_err(|e| LspError::ServerError {
            code: gantry_rpc::message::PARSE_ERROR,
            message: format!("unparsable initialize reply: {e}"),
        })?;
        if let Some(error) = reply.get("error") {
            return Err(server_error(error));
        }

        self.notify("initialized", Some(json!({}))).await
    }

    /// Tear the session down: stop the writer, cancel the reader and the
    /// stderr drain, join all three, and wake every parked caller. After
    /// this returns the pending table is empty and no task remains.
    pub async fn disconnect(&self) {
        let Some(session) = self.session.lock().await.take() else {
            return;
        };

        let _ = session.writer_tx.send(WriterCommand::Shutdown).await;
        session.reader_handle.abort();
        if let Some(handle) = &session.stderr_handle {
            handle.abort();
        }

        let _ = session.writer_handle.await;
        let _ = session.reader_handle.await;
        if let Some(handle) = session.stderr_handle {
            let _ = handle.await;
        }

        self.pending.lock().await.clear();
    }

    #[cfg(test)]
    pub(crate) async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }
}

/// Route one inbound frame. Only responses whose id is an integer with a
/// waiter in the table are delivered; notifications, server-initiated
/// requests, string ids, and unknown ids are dropped.
async fn dispatch_reply(body: &[u8], pending: &Mutex<HashMap<u64, oneshot::Sender<Vec<u8>>>>) {
    let frame: Value = match serde_json::from_slice(body) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!("ignoring unparsable frame from language server: {e}");
            return;
        }
    };

    let is_reply = frame.get("result").is_some() || frame.get("error").is_some();
    let id = frame.get("id").and_then(Value::as_u64);

    match (id, is_reply) {
        (Some(id), true) => {
            let waiter = pending.lock().await.remove(&id);
            match waiter {
                Some(tx) => {
                    let _ = tx.send(body.to_vec());
                }
                None => tracing::trace!(id, "reply with no waiter dropped"),
            }
        }
        _ => {
            tracing::trace!(
                method = ?frame.get("method").and_then(serde_json::Value::as_str),
                "unsolicited message from language server dropped"
            );
        }
    }
}

pub(crate) fn server_error(error: &Value) -> LspError {
    LspError::ServerError {
        code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
        message: error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{DuplexStream, duplex};

    /// A scripted peer on the far end of in-memory pipes, standing in for
    /// the child process.
    struct FakeServer {
        reader: FrameReader<DuplexStream>,
        writer: FrameWriter<DuplexStream>,
    }

    impl FakeServer {
        async fn read(&mut self) -> Option<Value> {
            self.reader
                .read_frame()
                .await
                .unwrap()
                .map(|body| serde_json::from_slice(&body).unwrap())
        }

        async fn respond(&mut self, id: u64, result: Value) {
            self.writer
                .write_frame(&json!({"jsonrpc": "2.0", "id": id, "result": result}))
                .await
                .unwrap();
        }
    }

    async fn connected_pair() -> (Arc<LspClient>, FakeServer) {
        let (stdin_ours, stdin_theirs) = duplex(64 * 1024);
        let (stdout_theirs, stdout_ours) = duplex(64 * 1024);

        let client = Arc::new(LspClient::new());
        client
            .connect(stdin_ours, stdout_ours, None::<DuplexStream>)
            .await;

        let server = FakeServer {
            reader: FrameReader::new(stdin_theirs),
            writer: FrameWriter::new(stdout_theirs),
        };
        (client, server)
    }

    #[tokio::test]
    async fn request_gets_its_own_reply() {
        let (client, mut server) = connected_pair().await;

        let server_task = tokio::spawn(async move {
            let msg = server.read().await.unwrap();
            let id = msg["id"].as_u64().unwrap();
            server.respond(id, json!({"ok": true})).await;
        });

        let raw = client.request("textDocument/hover", None).await.unwrap();
        let reply: Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(reply["result"]["ok"], true);
        assert_eq!(client.pending_len().await, 0);

        server_task.await.unwrap();
        client.disconnect().await;
    }

    #[tokio::test]
    async fn concurrent_requests_correlate_out_of_order() {
        let (client, mut server) = connected_pair().await;

        const CALLERS: usize = 8;
        let server_task = tokio::spawn(async move {
            let mut ids = Vec::new();
            for _ in 0..CALLERS {
                let msg = server.read().await.unwrap();
                ids.push(msg["id"].as_u64().unwrap());
            }
            // Answer in reverse arrival order.
            for id in ids.into_iter().rev() {
                server.respond(id, json!({"echo": id})).await;
            }
        });

        let mut callers = Vec::new();
        for _ in 0..CALLERS {
            let client = client.clone();
            callers.push(tokio::spawn(async move {
                let raw = client.request("workspace/symbol", None).await.unwrap();
                serde_json::from_slice::<Value>(&raw).unwrap()
            }));
        }

        for caller in callers {
            let reply = caller.await.unwrap();
            assert_eq!(reply["result"]["echo"], reply["id"]);
        }
        assert_eq!(client.pending_len().await, 0);

        server_task.await.unwrap();
        client.disconnect().await;
    }

    #[tokio::test]
    async fn ids_are_strictly_increasing() {
        let (client, mut server) = connected_pair().await;

        let server_task = tokio::spawn(async move {
            let mut last = 0;
            for _ in 0..3 {
                let msg = server.read().await.unwrap();
                let id = msg["id"].as_u64().unwrap();
                assert!(id > last, "id {id} not greater than {last}");
                last = id;
                server.respond(id, Value::Null).await;
            }
        });

        for _ in 0..3 {
            client.request("shutdown", None).await.unwrap();
        }
        server_task.await.unwrap();
        client.disconnect().await;
    }

    #[tokio::test]
    async fn eof_fails_pending_requests_with_no_response() {
        let (client, mut server) = connected_pair().await;

        let waiter = {
            let client = client.clone();
            tokio::spawn(async move { client.request("textDocument/hover", None).await })
        };

        // Let the request reach the fake server, then hang up.
        let _ = server.read().await;
        drop(server);

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, LspError::NoResponse));
        assert_eq!(client.pending_len().await, 0);
        client.disconnect().await;
    }

    #[tokio::test]
    async fn requests_after_eof_fail_fast_with_not_connected() {
        let (client, mut server) = connected_pair().await;

        let waiter = {
            let client = client.clone();
            tokio::spawn(async move { client.request("textDocument/hover", None).await })
        };
        let _ = server.read().await;
        drop(server);

        // Once the parked caller has been failed, the session is marked
        // dead and later requests do not wait out the timeout.
        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, LspError::NoResponse));

        let err = client.request("textDocument/hover", None).await.unwrap_err();
        assert!(matches!(err, LspError::NotConnected));
        client.disconnect().await;
    }

    #[tokio::test]
    async fn reply_with_string_id_is_dropped() {
        let (client, mut server) = connected_pair().await;

        let waiter = {
            let client = client.clone();
            tokio::spawn(async move { client.request("textDocument/hover", None).await })
        };

        let msg = server.read().await.unwrap();
        let id = msg["id"].as_u64().unwrap();
        // A string id must not correlate, even if it spells the number.
        server
            .writer
            .write_frame(&json!({"jsonrpc": "2.0", "id": id.to_string(), "result": 1}))
            .await
            .unwrap();
        server.respond(id, json!(2)).await;

        let raw = waiter.await.unwrap().unwrap();
        let reply: Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(reply["result"], 2);
        client.disconnect().await;
    }

    #[tokio::test]
    async fn unsolicited_notifications_are_dropped() {
        let (client, mut server) = connected_pair().await;

        server
            .writer
            .write_frame(&json!({
                "jsonrpc": "2.0",
                "method": "textDocument/publishDiagnostics",
                "params": {"uri": "file:///x.rs", "diagnostics": []}
            }))
            .await
            .unwrap();

        // The client still works afterwards.
        let server_task = tokio::spawn(async move {
            let msg = server.read().await.unwrap();
            let id = msg["id"].as_u64().unwrap();
            server.respond(id, Value::Null).await;
        });
        client.request("shutdown", None).await.unwrap();
        server_task.await.unwrap();
        client.disconnect().await;
    }

    #[tokio::test]
    async fn disconnect_clears_pending_and_joins_tasks() {
        let (client, mut server) = connected_pair().await;

        let waiter = {
            let client = client.clone();
            tokio::spawn(async move { client.request("textDocument/hover", None).await })
        };
        let _ = server.read().await;

        client.disconnect().await;
        assert!(!client.is_connected().await);
        assert_eq!(client.pending_len().await, 0);

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, LspError::NoResponse));
    }

    #[tokio::test]
    async fn request_without_session_is_not_connected() {
        let client = LspClient::new();
        let err = client.request("textDocument/hover", None).await.unwrap_err();
        assert!(matches!(err, LspError::NotConnected));
    }

    #[tokio::test]
    async fn initialize_handshake_sends_fixed_params_then_initialized() {
        let (client, mut server) = connected_pair().await;

        let server_task = tokio::spawn(async move {
            let init = server.read().await.unwrap();
            assert_eq!(init["method"], "initialize");
            assert!(init["params"]["processId"].is_null());
            assert_eq!(init["params"]["rootUri"], "file:///ws");
            assert!(init["params"]["capabilities"]["textDocument"].is_object());

            let id = init["id"].as_u64().unwrap();
            server.respond(id, json!({"capabilities": {}})).await;

            let initialized = server.read().await.unwrap();
            assert_eq!(initialized["method"], "initialized");
            assert_eq!(initialized["params"], json!({}));
            assert!(initialized.get("id").is_none());
        });

        client.initialize("file:///ws").await.unwrap();
        server_task.await.unwrap();
        client.disconnect().await;
    }

    #[tokio::test]
    async fn initialize_error_reply_surfaces_as_server_error() {
        let (client, mut server) = connected_pair().await;

        let server_task = tokio::spawn(async move {
            let init = server.read().await.unwrap();
            let id = init["id"].as_u64().unwrap();
            server
                .writer
                .write_frame(&json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": -32002, "message": "not ready"}
                }))
                .await
                .unwrap();
        });

        let err = client.initialize("file:///ws").await.unwrap_err();
        match err {
            LspError::ServerError { code, message } => {
                assert_eq!(code, -32002);
                assert_eq!(message, "not ready");
            }
            other => panic!("expected ServerError, got {other:?}"),
        }
        server_task.await.unwrap();
        client.disconnect().await;
    }
}
