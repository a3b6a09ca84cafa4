//! Newline-delimited JSON codec for the MCP side of the bridge.
//!
//! Each message is one JSON object followed by a single LF. Blank lines are
//! tolerated and skipped, a trailing CR is stripped, and EOF is a clean end
//! of session. Writes are serialized so concurrent callers can never
//! interleave partial messages.

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use crate::RpcError;

/// Upper bound on a single inbound line (1 MiB).
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Reads newline-delimited JSON messages.
pub struct MessageReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read the next message.
    ///
    /// Returns `Ok(None)` on EOF. A line longer than [`MAX_LINE_BYTES`] is
    /// consumed and rejected without being buffered in full; the reader
    /// stays usable for the following line.
    pub async fn read_message(&mut self) -> Result<Option<Value>, RpcError> {
        loop {
            let Some(line) = self.read_bounded_line().await? else {
                return Ok(None);
            };

            let mut text = line.as_slice();
            if let [head @ .., b'\r'] = text {
                text = head;
            }
            if text.is_empty() {
                continue;
            }

            return Ok(Some(serde_json::from_slice(text)?));
        }
    }

    /// Read up to the next LF, accumulating at most [`MAX_LINE_BYTES`].
    ///
    /// An over-long line is drained to its newline so the next call starts
    /// on a message boundary, then reported as [`RpcError::LineTooLong`].
    async fn read_bounded_line(&mut self) -> Result<Option<Vec<u8>>, RpcError> {
        let mut line = Vec::new();
        let mut dropped = 0usize;

        loop {
            let chunk = self.reader.fill_buf().await?;
            if chunk.is_empty() {
                // EOF. Bytes without a final newline still form a message.
                if line.is_empty() && dropped == 0 {
                    return Ok(None);
                }
                break;
            }

            let (take, consumed, at_newline) =
                match chunk.iter().position(|&b| b == b'\n') {
                    Some(pos) => (pos, pos + 1, true),
                    None => (chunk.len(), chunk.len(), false),
                };

            if dropped == 0 && line.len() + take <= MAX_LINE_BYTES {
                line.extend_from_slice(&chunk[..take]);
            } else {
                dropped += take;
            }
            self.reader.consume(consumed);

            if at_newline {
                break;
            }
        }

        if dropped > 0 {
            return Err(RpcError::LineTooLong {
                len: line.len() + dropped,
                max: MAX_LINE_BYTES,
            });
        }
        Ok(Some(line))
    }
}

/// Writes newline-delimited JSON messages.
///
/// The inner writer is behind a mutex held across the full
/// serialize-write-flush sequence, so each message reaches the stream as
/// one uninterrupted unit even when callers share the writer.
pub struct MessageWriter<W> {
    writer: Mutex<W>,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub async fn write_message(&self, msg: &Value) -> Result<(), RpcError> {
        let body = serde_json::to_vec(msg)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(&body).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }
}
