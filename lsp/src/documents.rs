//! Tracking of documents opened in the current language-server session.
//!
//! The store guarantees that a URI is present if and only if a `didOpen`
//! reached the live session and no `didClose` followed it. The slow path
//! of [`DocumentStore::ensure_open`] holds the lock across both the send
//! and the insert, so a failed notification can never leave an entry that
//! claims the document is open.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;

use gantry_rpc::uri::{PathError, Workspace, path_to_uri, uri_to_path};

use crate::{LspClient, LspError, protocol};

/// Files larger than this are not forwarded to the language server.
pub const MAX_DOCUMENT_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("cannot read {}: {}", .path.display(), .reason)]
    FileReadError { path: PathBuf, reason: String },

    #[error("{} is {} bytes, above the {} byte limit", .path.display(), .len, MAX_DOCUMENT_BYTES)]
    FileTooLarge { path: PathBuf, len: u64 },

    #[error(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    Lsp(#[from] LspError),
}

struct OpenDocument {
    version: i64,
}

/// The set of documents the current session has seen `didOpen` for.
#[derive(Default)]
pub struct DocumentStore {
    open: Mutex<HashMap<String, OpenDocument>>,
}

impl DocumentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure `path` is open in the session and return its URI.
    ///
    /// The fast path is a lock-and-lookup. The slow path reads the file
    /// without the lock, then re-checks under the lock before sending
    /// `didOpen`, since another caller may have opened it during the read.
    pub async fn ensure_open(
        &self,
        lsp: &LspClient,
        workspace: &Workspace,
        path: &Path,
    ) -> Result<String, DocumentError> {
        let abs = workspace.resolve(path)?;
        let uri = path_to_uri(&abs);

        {
            let open = self.open.lock().await;
            if open.contains_key(&uri) {
                return Ok(uri);
            }
        }

        let text = read_document(&abs).await?;

        let mut open = self.open.lock().await;
        if !open.contains_key(&uri) {
            let params =
                protocol::did_open_params(&uri, protocol::language_id_for(&abs), 1, &text);
            lsp.notify("textDocument/didOpen", Some(params)).await?;
            open.insert(uri.clone(), OpenDocument { version: 1 });
        }
        Ok(uri)
    }

    /// Drop a document from the session. A failure to deliver `didClose`
    /// is logged and swallowed; the entry is gone either way.
    pub async fn close(&self, lsp: &LspClient, uri: &str) {
        let removed = self.open.lock().await.remove(uri).is_some();
        if !removed {
            return;
        }
        if let Err(e) = lsp
            .notify("textDocument/didClose", Some(protocol::did_close_params(uri)))
            .await
        {
            tracing::warn!(uri, "didClose not delivered: {e}");
        }
    }

    /// Re-issue `didOpen` for every tracked document, re-reading each file
    /// from disk. Runs after a successful supervisor restart; individual
    /// failures are logged and skipped so one bad file cannot block the
    /// rest of the replay.
    pub async fn reopen_all(&self, lsp: &LspClient) {
        let open = self.open.lock().await;
        tracing::info!(count = open.len(), "replaying open documents");

        for (uri, doc) in open.iter() {
            let path = match uri_to_path(uri) {
                Ok(path) => path,
                Err(e) => {
                    tracing::warn!(uri, "skipping replay: {e}");
                    continue;
                }
            };
            let text = match read_document(&path).await {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(uri, "skipping replay: {e}");
                    continue;
                }
            };
            let params = protocol::did_open_params(
                uri,
                protocol::language_id_for(&path),
                doc.version,
                &text,
            );
            if let Err(e) = lsp.notify("textDocument/didOpen", Some(params)).await {
                tracing::warn!(uri, "replay didOpen not delivered: {e}");
            }
        }
    }

    pub async fn contains(&self, uri: &str) -> bool {
        self.open.lock().await.contains_key(uri)
    }

    pub async fn len(&self) -> usize {
        self.open.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.open.lock().await.is_empty()
    }
}

async fn read_document(path: &Path) -> Result<String, DocumentError> {
    let meta = tokio::fs::metadata(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            DocumentError::FileNotFound(path.to_path_buf())
        } else {
            DocumentError::FileReadError {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        }
    })?;
    if meta.len() > MAX_DOCUMENT_BYTES {
        return Err(DocumentError::FileTooLarge {
            path: path.to_path_buf(),
            len: meta.len(),
        });
    }

    tokio::fs::read_to_string(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            DocumentError::FileNotFound(path.to_path_buf())
        } else {
            DocumentError::FileReadError {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        }
    })
}
