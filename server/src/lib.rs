//! The MCP-facing half of the gantry bridge.
//!
//! [`Server`] consumes one message at a time from the client stream,
//! enforces initialization gating, and dispatches to the built-in method
//! handlers and the tool registry. Tool calls that fail because the
//! language-server session died get one reconnect-and-retry cycle
//! ([`recovery`]) before the failure is reported.

pub mod mcp;
pub mod recovery;
pub mod server;

pub use server::{Server, SessionState};
