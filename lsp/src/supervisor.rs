//! Child-process lifecycle for the language server.
//!
//! The supervisor owns the child and its three pipes from spawn until
//! [`Supervisor::detach_pipes`] hands them to the client. After detach the
//! pipes have exactly one owner, so a double close cannot be expressed.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use crate::LspError;

/// Restarts allowed before the supervisor refuses to respawn.
pub const DEFAULT_MAX_RESTARTS: u32 = 5;

/// How long a child gets to exit on its own after its stdin closes.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// How to launch the language server.
#[derive(Debug, Clone)]
pub struct ServerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

/// The three pipes of a freshly spawned child, moved out as a unit.
pub struct Pipes {
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

pub struct Supervisor {
    command: ServerCommand,
    workspace_root: PathBuf,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    restart_count: u32,
    max_restarts: u32,
}

impl Supervisor {
    #[must_use]
    pub fn new(command: ServerCommand, workspace_root: PathBuf) -> Self {
        Self {
            command,
            workspace_root,
            child: None,
            stdin: None,
            stdout: None,
            stderr: None,
            restart_count: 0,
            max_restarts: DEFAULT_MAX_RESTARTS,
        }
    }

    #[must_use]
    pub fn with_max_restarts(mut self, max: u32) -> Self {
        self.max_restarts = max;
        self
    }

    /// Spawn the child with all three streams piped. At most one child is
    /// live at a time; an existing one is killed first.
    pub async fn spawn(&mut self) -> Result<(), LspError> {
        if self.child.is_some() {
            self.kill().await;
        }

        let mut cmd = Command::new(&self.command.program);
        cmd.args(&self.command.args)
            .current_dir(&self.workspace_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            LspError::SpawnFailed(format!("{}: {e}", self.command.program.display()))
        })?;

        self.stdin = Some(take_pipe(child.stdin.take(), "stdin")?);
        self.stdout = Some(take_pipe(child.stdout.take(), "stdout")?);
        self.stderr = Some(take_pipe(child.stderr.take(), "stderr")?);
        self.child = Some(child);

        tracing::info!(
            program = %self.command.program.display(),
            "language server spawned"
        );
        Ok(())
    }

    /// Transfer ownership of the pipes to the caller. The supervisor will
    /// not touch them again; `kill` after a detach only reaps the process.
    pub fn detach_pipes(&mut self) -> Result<Pipes, LspError> {
        match (self.stdin.take(), self.stdout.take(), self.stderr.take()) {
            (Some(stdin), Some(stdout), Some(stderr)) => Ok(Pipes {
                stdin,
                stdout,
                stderr,
            }),
            // Spawn sets all three together and detach takes them together,
            // so a partial state only means "already detached".
            _ => Err(LspError::NotConnected),
        }
    }

    /// Close any still-owned pipes, wait briefly for a voluntary exit,
    /// then kill. Idempotent.
    pub async fn kill(&mut self) {
        self.stdin = None;
        self.stdout = None;
        self.stderr = None;

        let Some(mut child) = self.child.take() else {
            return;
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, child.wait())
            .await
            .is_err()
        {
            tracing::debug!("language server did not exit in time, killing");
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }

    /// Kill and respawn, counting against the restart budget.
    pub async fn restart(&mut self) -> Result<(), LspError> {
        if self.restart_count >= self.max_restarts {
            return Err(LspError::RestartExhausted(self.restart_count));
        }
        self.kill().await;
        self.restart_count += 1;
        tracing::info!(
            attempt = self.restart_count,
            max = self.max_restarts,
            "restarting language server"
        );
        self.spawn().await
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    #[must_use]
    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }
}

fn take_pipe<T>(pipe: Option<T>, name: &str) -> Result<T, LspError> {
    pipe.ok_or_else(|| LspError::SpawnFailed(format!("failed to capture child {name}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cat_supervisor(dir: &std::path::Path) -> Supervisor {
        Supervisor::new(
            ServerCommand {
                program: PathBuf::from("/bin/cat"),
                args: Vec::new(),
            },
            dir.to_path_buf(),
        )
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn spawn_then_kill() {
        let dir = tempfile::tempdir().unwrap();
        let mut sup = cat_supervisor(dir.path());

        sup.spawn().await.unwrap();
        assert!(sup.is_running());

        // cat exits as soon as its stdin closes, inside the grace window.
        sup.kill().await;
        assert!(!sup.is_running());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn second_spawn_replaces_the_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut sup = cat_supervisor(dir.path());

        sup.spawn().await.unwrap();
        sup.spawn().await.unwrap();
        assert!(sup.is_running());
        sup.kill().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn detach_moves_ownership_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut sup = cat_supervisor(dir.path());

        sup.spawn().await.unwrap();
        let _pipes = sup.detach_pipes().unwrap();
        assert!(matches!(
            sup.detach_pipes(),
            Err(LspError::NotConnected)
        ));
        sup.kill().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn restart_counts_and_stops_at_the_bound() {
        let dir = tempfile::tempdir().unwrap();
        let mut sup = cat_supervisor(dir.path()).with_max_restarts(2);

        sup.spawn().await.unwrap();
        sup.restart().await.unwrap();
        sup.restart().await.unwrap();
        assert_eq!(sup.restart_count(), 2);

        let err = sup.restart().await.unwrap_err();
        assert!(matches!(err, LspError::RestartExhausted(2)));
        sup.kill().await;
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut sup = Supervisor::new(
            ServerCommand {
                program: PathBuf::from("/nonexistent/language-server"),
                args: Vec::new(),
            },
            dir.path().to_path_buf(),
        );
        assert!(matches!(sup.spawn().await, Err(LspError::SpawnFailed(_))));
        assert!(!sup.is_running());
    }

    #[tokio::test]
    async fn detach_before_spawn_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut sup = cat_supervisor(dir.path());
        assert!(matches!(sup.detach_pipes(), Err(LspError::NotConnected)));
    }
}
