//! Content-Length framing codec for the language-server side of the bridge.
//!
//! LSP uses `Content-Length: N\r\n\r\n{json}` framing over pipes. The
//! reader hands back raw body bytes so the caller decides when (and
//! whether) to parse; the correlator stores whole replies for waiters
//! without reserializing them.

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::RpcError;

/// Maximum frame size (10 MiB). Checked against the declared length before
/// any body byte is read.
pub const MAX_FRAME_BYTES: usize = 10 * 1024 * 1024;

/// Reads framed messages. The internal [`BufReader`] keeps bytes read past
/// the header boundary available for the body read that follows.
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read the next frame's body bytes.
    ///
    /// Returns `Ok(None)` on a clean EOF at a frame boundary, and also when
    /// the pipe breaks under the reader mid-stream (a dying child is the
    /// same signal as an exiting one).
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, RpcError> {
        let content_length = match self.read_headers().await {
            Ok(Some(len)) => len,
            Ok(None) => return Ok(None),
            Err(e) if is_disconnect(&e) => return Ok(None),
            Err(e) => return Err(e),
        };

        if content_length == 0 {
            return Err(RpcError::EmptyFrame);
        }
        if content_length > MAX_FRAME_BYTES {
            return Err(RpcError::FrameTooLarge(content_length));
        }

        let mut body = vec![0u8; content_length];
        match self.reader.read_exact(&mut body).await {
            Ok(_) => Ok(Some(body)),
            Err(e) if is_disconnect_io(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Parse header lines until the empty separator line.
    ///
    /// Returns the `Content-Length` value, or `None` on EOF before any
    /// header byte.
    async fn read_headers(&mut self) -> Result<Option<usize>, RpcError> {
        let mut content_length: Option<usize> = None;
        let mut line = String::new();
        let mut saw_any_header_bytes = false;

        loop {
            line.clear();
            let bytes_read = self.reader.read_line(&mut line).await?;

            if bytes_read == 0 {
                if !saw_any_header_bytes {
                    return Ok(None);
                }
                return Err(RpcError::TruncatedHeaders);
            }
            saw_any_header_bytes = true;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }

            // Only Content-Length is meaningful; Content-Type and anything
            // else a server sends is skipped. Parsed case-insensitively.
            if let Some((key, value)) = trimmed.split_once(':') {
                if key.trim().eq_ignore_ascii_case("Content-Length") {
                    let parsed = value.trim().parse::<usize>().map_err(|_| {
                        RpcError::InvalidContentLength(value.trim().to_string())
                    })?;
                    content_length = Some(parsed);
                }
            }
        }

        content_length.map_or(Err(RpcError::MissingContentLength), |len| Ok(Some(len)))
    }
}

fn is_disconnect(err: &RpcError) -> bool {
    match err {
        RpcError::Io(io) => is_disconnect_io(io),
        _ => false,
    }
}

fn is_disconnect_io(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::UnexpectedEof
    )
}

/// Writes framed messages. Callers hold single-threaded write access by
/// construction; the client funnels every frame through one writer task.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_frame(&mut self, msg: &Value) -> Result<(), RpcError> {
        let body = serde_json::to_vec(msg)?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());

        self.writer.write_all(header.as_bytes()).await?;
        self.writer.write_all(&body).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn read_value(reader: &mut FrameReader<&[u8]>) -> Option<Value> {
        reader
            .read_frame()
            .await
            .unwrap()
            .map(|body| serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn roundtrip() {
        let msg = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "textDocument/definition",
            "params": { "uri": "file:///test.rs" }
        });

        let mut buf = Vec::new();
        FrameWriter::new(&mut buf).write_frame(&msg).await.unwrap();

        let mut reader = FrameReader::new(buf.as_slice());
        assert_eq!(read_value(&mut reader).await, Some(msg));
    }

    #[tokio::test]
    async fn multiple_frames_preserve_read_ahead() {
        let mut buf = Vec::new();
        {
            let mut writer = FrameWriter::new(&mut buf);
            writer.write_frame(&json!({"id": 1})).await.unwrap();
            writer.write_frame(&json!({"id": 2})).await.unwrap();
            writer.write_frame(&json!({"id": 3})).await.unwrap();
        }

        let mut reader = FrameReader::new(buf.as_slice());
        assert_eq!(read_value(&mut reader).await, Some(json!({"id": 1})));
        assert_eq!(read_value(&mut reader).await, Some(json!({"id": 2})));
        assert_eq!(read_value(&mut reader).await, Some(json!({"id": 3})));
        assert_eq!(read_value(&mut reader).await, None);
    }

    #[tokio::test]
    async fn eof_returns_none() {
        let mut reader = FrameReader::new(&b""[..]);
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_content_length_is_an_error() {
        let buf: &[u8] = b"Content-Type: application/json\r\n\r\n{}";
        let mut reader = FrameReader::new(buf);
        assert!(matches!(
            reader.read_frame().await,
            Err(RpcError::MissingContentLength)
        ));
    }

    #[tokio::test]
    async fn invalid_content_length_is_an_error() {
        let buf: &[u8] = b"Content-Length: twelve\r\n\r\n";
        let mut reader = FrameReader::new(buf);
        assert!(matches!(
            reader.read_frame().await,
            Err(RpcError::InvalidContentLength(_))
        ));
    }

    #[tokio::test]
    async fn zero_length_frame_is_rejected() {
        let buf: &[u8] = b"Content-Length: 0\r\n\r\n";
        let mut reader = FrameReader::new(buf);
        assert!(matches!(
            reader.read_frame().await,
            Err(RpcError::EmptyFrame)
        ));
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected_without_reading_the_body() {
        // Only the header is present; the rejection must come from the
        // declared length alone.
        let header = format!("Content-Length: {}\r\n\r\n", MAX_FRAME_BYTES + 1);
        let mut reader = FrameReader::new(header.as_bytes());
        assert!(matches!(
            reader.read_frame().await,
            Err(RpcError::FrameTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn case_insensitive_content_length() {
        let body = r#"{"jsonrpc":"2.0","id":1}"#;
        let frame = format!("content-length: {}\r\n\r\n{body}", body.len());
        let mut reader = FrameReader::new(frame.as_bytes());
        let value = read_value(&mut reader).await.unwrap();
        assert_eq!(value["id"], 1);
    }

    #[tokio::test]
    async fn ignores_extra_headers() {
        let body = r#"{"id":1}"#;
        let frame = format!(
            "Content-Type: application/vscode-jsonrpc; charset=utf-8\r\nContent-Length: {}\r\n\r\n{body}",
            body.len(),
        );
        let mut reader = FrameReader::new(frame.as_bytes());
        assert!(read_value(&mut reader).await.is_some());
    }

    #[tokio::test]
    async fn eof_mid_headers_is_an_error() {
        let buf: &[u8] = b"Content-Length: 10\r\n";
        let mut reader = FrameReader::new(buf);
        assert!(matches!(
            reader.read_frame().await,
            Err(RpcError::TruncatedHeaders)
        ));
    }

    #[tokio::test]
    async fn eof_mid_body_reads_as_clean_eof() {
        // A child that dies between header and body produces the same
        // signal as one that exits cleanly.
        let buf: &[u8] = b"Content-Length: 100\r\n\r\nhello";
        let mut reader = FrameReader::new(buf);
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn content_length_counts_bytes_not_chars() {
        let body = r#"{"k":"é"}"#;
        assert_eq!(body.len(), 10);
        let frame = format!("Content-Length: {}\r\n\r\n{body}", body.len());
        let mut reader = FrameReader::new(frame.as_bytes());
        let value = read_value(&mut reader).await.unwrap();
        assert_eq!(value["k"], "é");
    }

    #[tokio::test]
    async fn writer_emits_byte_count_header() {
        let msg = json!({"k": "é"});
        let mut buf = Vec::new();
        FrameWriter::new(&mut buf).write_frame(&msg).await.unwrap();

        let body = serde_json::to_string(&msg).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with(&format!("Content-Length: {}\r\n\r\n", body.len())));
    }
}
