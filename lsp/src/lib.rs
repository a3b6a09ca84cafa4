//! Language-server session management for the gantry bridge.
//!
//! Three pieces cooperate here:
//!
//! - [`Supervisor`] owns the child process and its pipes until they are
//!   detached, and can kill and respawn it under a bounded restart budget.
//! - [`LspClient`] multiplexes concurrent callers onto the child's stdin
//!   and demultiplexes replies off its stdout by request id.
//! - [`DocumentStore`] remembers which documents have been opened in the
//!   current session and can replay them into a fresh one after a restart.

pub mod client;
pub mod documents;
pub mod protocol;
pub mod supervisor;

pub use client::LspClient;
pub use documents::{DocumentError, DocumentStore};
pub use supervisor::{ServerCommand, Supervisor};

/// Errors surfaced by the client and supervisor.
#[derive(Debug, thiserror::Error)]
pub enum LspError {
    /// No session is connected (never connected, or torn down).
    #[error("language server not connected")]
    NotConnected,

    /// The reply deadline elapsed.
    #[error("language server request timed out after {0:?}")]
    RequestTimeout(std::time::Duration),

    /// The session ended while the request was in flight.
    #[error("language server closed without responding")]
    NoResponse,

    /// The language server answered with a JSON-RPC error.
    #[error("language server error {code}: {message}")]
    ServerError { code: i64, message: String },

    #[error("failed to start language server: {0}")]
    SpawnFailed(String),

    /// The restart budget is spent; the session stays down.
    #[error("language server restart budget exhausted after {0} restarts")]
    RestartExhausted(u32),
}

impl LspError {
    /// The errors that indicate a sick session rather than a bad request.
    /// These are the only ones worth a reconnect attempt; a timeout is
    /// deliberately excluded (the server may simply be slow).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LspError::NotConnected | LspError::NoResponse | LspError::ServerError { .. }
        )
    }
}
