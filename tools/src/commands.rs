//! Build/test/format tools that run a configured binary inside the
//! workspace. Everything here sits behind the [`Policy`](crate::Policy)
//! gate: the enable flag, the trusted-prefix check on the binary, and
//! containment plus deny-glob screening on any file argument.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};

use crate::policy::CommandRole;
use crate::{Tool, ToolCtx, ToolError, ToolFut, parse_args};

/// Wall-clock budget for one command run.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// Combined stdout+stderr kept in the tool result.
const MAX_OUTPUT_BYTES: usize = 64 * 1024;

#[derive(Debug, Deserialize, Default)]
struct FmtArgs {
    file_path: Option<String>,
}

/// One command tool; three instances cover the configured binaries.
pub struct CommandTool {
    name: &'static str,
    description: &'static str,
    role: CommandRole,
}

impl CommandTool {
    #[must_use]
    pub fn build() -> Self {
        Self {
            name: "build",
            description: "Build the workspace with the configured build binary and report its output.",
            role: CommandRole::Build,
        }
    }

    #[must_use]
    pub fn test() -> Self {
        Self {
            name: "test",
            description: "Run the workspace test suite with the configured test binary.",
            role: CommandRole::Test,
        }
    }

    #[must_use]
    pub fn fmt() -> Self {
        Self {
            name: "fmt",
            description: "Format the workspace (or one file) with the configured formatter binary.",
            role: CommandRole::Fmt,
        }
    }
}

impl Tool for CommandTool {
    fn name(&self) -> &'static str {
        self.name
    }

    fn description(&self) -> &'static str {
        self.description
    }

    fn input_schema(&self) -> Value {
        match self.role {
            CommandRole::Fmt => json!({
                "type": "object",
                "properties": {
                    "file_path": {
                        "type": "string",
                        "description": "Only format this file (workspace-relative); omit to format everything"
                    }
                }
            }),
            _ => json!({ "type": "object", "properties": {} }),
        }
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx<'a>) -> ToolFut<'a> {
        Box::pin(async move {
            let bin = ctx.policy.command_binary(self.role)?;

            let mut cmd = tokio::process::Command::new(bin);
            cmd.current_dir(ctx.workspace.root())
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);

            if self.role == CommandRole::Fmt {
                let args: FmtArgs = parse_args(args)?;
                if let Some(file_path) = args.file_path {
                    let resolved = ctx.workspace.resolve(Path::new(&file_path))?;
                    ctx.policy.check_path_allowed(&resolved)?;
                    cmd.arg(resolved);
                }
            }

            tracing::info!(tool = self.name, bin = %bin.display(), "running command tool");
            let run = cmd.output();
            let output = match tokio::time::timeout(COMMAND_TIMEOUT, run).await {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => {
                    return Err(ToolError::ExecutionFailed {
                        message: format!("{}: {e}", bin.display()),
                    });
                }
                Err(_) => {
                    return Err(ToolError::ExecutionFailed {
                        message: format!(
                            "{} did not finish within {COMMAND_TIMEOUT:?}",
                            bin.display()
                        ),
                    });
                }
            };

            Ok(render_output(&output))
        })
    }
}

fn render_output(output: &std::process::Output) -> String {
    let mut text = String::new();
    text.push_str(&format!("exit status: {}\n", output.status));

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.trim().is_empty() {
        text.push_str("\n--- stdout ---\n");
        text.push_str(stdout.trim_end());
        text.push('\n');
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        text.push_str("\n--- stderr ---\n");
        text.push_str(stderr.trim_end());
        text.push('\n');
    }

    truncate_output(text)
}

fn truncate_output(mut text: String) -> String {
    if text.len() <= MAX_OUTPUT_BYTES {
        return text;
    }
    let mut cut = MAX_OUTPUT_BYTES;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text.push_str("\n[output truncated]");
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use gantry_lsp::{DocumentStore, LspClient};
    use gantry_rpc::uri::Workspace;

    use crate::policy::{CommandBinaries, Policy};

    struct Fixture {
        lsp: LspClient,
        documents: DocumentStore,
        workspace: Workspace,
        policy: Policy,
        _dir: tempfile::TempDir,
    }

    impl Fixture {
        fn ctx(&self) -> ToolCtx<'_> {
            ToolCtx {
                lsp: &self.lsp,
                documents: &self.documents,
                workspace: &self.workspace,
                policy: &self.policy,
            }
        }
    }

    fn fixture_with(policy: impl FnOnce(&Path) -> Policy) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::new(dir.path()).unwrap();
        let policy = policy(workspace.root());
        Fixture {
            lsp: LspClient::new(),
            documents: DocumentStore::new(),
            workspace,
            policy,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn disabled_commands_are_refused() {
        let fx = fixture_with(|root| Policy::disabled(root).unwrap());
        let err = CommandTool::build()
            .execute(json!({}), &fx.ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::CommandsDisabled));
    }

    #[tokio::test]
    async fn unconfigured_binary_is_refused() {
        let fx = fixture_with(|root| {
            Policy::new(true, root, CommandBinaries::default()).unwrap()
        });
        let err = CommandTool::test()
            .execute(json!({}), &fx.ctx())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ToolError::BinaryNotConfigured { role: "test" }
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn build_runs_the_configured_binary() {
        let fx = fixture_with(|root| {
            Policy::new(
                true,
                root,
                CommandBinaries {
                    build: Some(PathBuf::from("/usr/bin/env")),
                    ..Default::default()
                },
            )
            .unwrap()
        });
        let text = CommandTool::build()
            .execute(json!({}), &fx.ctx())
            .await
            .unwrap();
        assert!(text.starts_with("exit status:"), "got: {text}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn fmt_rejects_files_outside_the_workspace() {
        let other = tempfile::tempdir().unwrap();
        std::fs::write(other.path().join("x.rs"), "x").unwrap();
        let outside = other.path().join("x.rs");

        let fx = fixture_with(|root| {
            Policy::new(
                true,
                root,
                CommandBinaries {
                    fmt: Some(PathBuf::from("/usr/bin/env")),
                    ..Default::default()
                },
            )
            .unwrap()
        });
        let err = CommandTool::fmt()
            .execute(json!({ "file_path": outside.to_str().unwrap() }), &fx.ctx())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ToolError::Path(gantry_rpc::uri::PathError::OutsideWorkspace(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn fmt_rejects_denied_files() {
        let fx = fixture_with(|root| {
            Policy::new(
                true,
                root,
                CommandBinaries {
                    fmt: Some(PathBuf::from("/usr/bin/env")),
                    ..Default::default()
                },
            )
            .unwrap()
        });
        std::fs::write(fx.workspace.root().join(".env"), "SECRET=1").unwrap();

        let err = CommandTool::fmt()
            .execute(json!({ "file_path": ".env" }), &fx.ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::DeniedPath(_)));
    }

    #[test]
    fn truncation_marks_the_cut() {
        let long = "x".repeat(MAX_OUTPUT_BYTES + 100);
        let out = truncate_output(long);
        assert!(out.ends_with("[output truncated]"));
        assert!(out.len() <= MAX_OUTPUT_BYTES + "\n[output truncated]".len());
    }

    #[test]
    fn short_output_is_untouched() {
        assert_eq!(truncate_output("ok".to_string()), "ok");
    }
}
