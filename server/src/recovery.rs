//! One-shot session recovery after the language server goes dark.
//!
//! The cycle tears the client session down, asks the supervisor for a
//! fresh child (counting against its restart budget), reconnects on the
//! detached pipes, redoes the handshake, and replays every tracked open
//! document into the new session.

use gantry_lsp::{DocumentStore, LspClient, LspError, Supervisor};
use gantry_rpc::uri::Workspace;

pub async fn reconnect_session(
    lsp: &LspClient,
    supervisor: &mut Supervisor,
    documents: &DocumentStore,
    workspace: &Workspace,
) -> Result<(), LspError> {
    tracing::warn!("language server session lost; attempting reconnect");

    lsp.disconnect().await;
    supervisor.restart().await?;

    let pipes = supervisor.detach_pipes()?;
    lsp.connect(pipes.stdin, pipes.stdout, Some(pipes.stderr))
        .await;

    lsp.initialize(workspace.root_uri()).await?;
    documents.reopen_all(lsp).await;

    tracing::info!("language server session re-established");
    Ok(())
}
