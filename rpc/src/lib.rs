//! Wire plumbing for the gantry bridge.
//!
//! Both sides of the bridge speak JSON-RPC 2.0, but with different framing:
//! the MCP client side is newline-delimited JSON over stdio ([`stdio`]),
//! the language-server side is `Content-Length: N\r\n\r\n{json}` over child
//! pipes ([`frame`]). [`message`] holds the envelope model shared by both,
//! and [`uri`] converts between filesystem paths and `file://` URIs.

pub mod frame;
pub mod message;
pub mod stdio;
pub mod uri;

pub use message::RequestId;
pub use uri::Workspace;

/// Errors produced by the codecs in this crate.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A newline-delimited message exceeded [`stdio::MAX_LINE_BYTES`].
    #[error("message line of {len} bytes exceeds the {max} byte limit")]
    LineTooLong { len: usize, max: usize },

    #[error("missing Content-Length header")]
    MissingContentLength,

    #[error("invalid Content-Length value: {0:?}")]
    InvalidContentLength(String),

    #[error("Content-Length {0} exceeds the {max} byte limit", max = frame::MAX_FRAME_BYTES)]
    FrameTooLarge(usize),

    #[error("zero-length frame")]
    EmptyFrame,

    #[error("unexpected EOF while reading frame headers")]
    TruncatedHeaders,
}

impl RpcError {
    /// Whether the north loop can answer this with a parse-error response
    /// and keep reading, as opposed to a transport fault that ends the
    /// session.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RpcError::Json(_) | RpcError::LineTooLong { .. })
    }
}
