//! gantry binary entry point and composition root.
//!
//! Wires the pieces together in dependency order: workspace → policy →
//! supervisor (spawn the language server) → client (connect on the
//! detached pipes, run the handshake) → registry → session loop on real
//! stdio. Teardown runs in reverse once the loop ends.
//!
//! Logging goes to stderr only; stdout is the protocol channel.

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use gantry_lsp::{DocumentStore, LspClient, ServerCommand, Supervisor};
use gantry_rpc::stdio::{MessageReader, MessageWriter};
use gantry_rpc::uri::Workspace;
use gantry_server::Server;
use gantry_tools::policy::CommandBinaries;
use gantry_tools::{Policy, Registry};

use config::GantryConfig;

/// MCP server exposing language-server code intelligence and build tools.
#[derive(Parser, Debug)]
#[command(name = "gantry")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Workspace root directory.
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Language server command (a name looked up in PATH, or an absolute
    /// path).
    #[arg(short = 's', long, default_value = "rust-analyzer")]
    server_cmd: String,

    /// Extra argument for the language server (repeatable).
    #[arg(long = "server-arg")]
    server_args: Vec<String>,

    /// Path to a TOML config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Allow the build/test/fmt command tools to run.
    #[arg(long)]
    enable_commands: bool,

    /// Absolute path of the binary behind the `build` tool.
    #[arg(long)]
    build_bin: Option<PathBuf>,

    /// Absolute path of the binary behind the `test` tool.
    #[arg(long)]
    test_bin: Option<PathBuf>,

    /// Absolute path of the binary behind the `fmt` tool.
    #[arg(long)]
    fmt_bin: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error.
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Flags merged over the config file.
struct Settings {
    workspace: PathBuf,
    server_cmd: String,
    server_args: Vec<String>,
    commands_enabled: bool,
    binaries: CommandBinaries,
    log_level: String,
}

fn merge(args: Args, config: GantryConfig) -> Settings {
    let server = config.server.unwrap_or_default();
    let commands = config.commands.unwrap_or_default();

    let workspace = if args.workspace == PathBuf::from(".") {
        config.workspace.unwrap_or(args.workspace)
    } else {
        args.workspace
    };
    let server_cmd = if args.server_cmd == "rust-analyzer" {
        server.command.unwrap_or(args.server_cmd)
    } else {
        args.server_cmd
    };
    let server_args = if args.server_args.is_empty() {
        server.args
    } else {
        args.server_args
    };

    Settings {
        workspace,
        server_cmd,
        server_args,
        commands_enabled: args.enable_commands || commands.enabled.unwrap_or(false),
        binaries: CommandBinaries {
            build: args.build_bin.or(commands.build_bin),
            test: args.test_bin.or(commands.test_bin),
            fmt: args.fmt_bin.or(commands.fmt_bin),
        },
        log_level: if args.log_level == "info" {
            config.log_level.unwrap_or(args.log_level)
        } else {
            args.log_level
        },
    }
}

fn init_tracing(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("gantry={level}")));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .with_target(true),
        )
        .try_init()
        .context("initializing tracing subscriber")?;
    Ok(())
}

/// Resolve the language-server command: absolute paths are taken as given,
/// names go through PATH.
fn resolve_server_command(settings: &Settings) -> Result<ServerCommand> {
    let program = PathBuf::from(&settings.server_cmd);
    let program = if program.is_absolute() {
        program
    } else {
        which::which(&settings.server_cmd)
            .with_context(|| format!("{} not found in PATH", settings.server_cmd))?
    };
    Ok(ServerCommand {
        program,
        args: settings.server_args.clone(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => GantryConfig::load(path)?,
        None => GantryConfig::default(),
    };
    let settings = merge(args, config);
    init_tracing(&settings.log_level)?;

    let workspace = Workspace::new(&settings.workspace)
        .with_context(|| format!("resolving workspace root {}", settings.workspace.display()))?;
    tracing::info!(root = %workspace.root().display(), "workspace resolved");

    let policy = match Policy::new(
        settings.commands_enabled,
        workspace.root(),
        settings.binaries.clone(),
    ) {
        Ok(policy) => policy,
        Err(e) => bail!("command-tool policy rejected the configuration: {e}"),
    };

    let server_command = resolve_server_command(&settings)?;
    tracing::info!(
        program = %server_command.program.display(),
        "starting language server"
    );

    let mut supervisor = Supervisor::new(server_command, workspace.root().to_path_buf());
    supervisor
        .spawn()
        .await
        .context("spawning the language server")?;
    let pipes = supervisor
        .detach_pipes()
        .context("taking the language server pipes")?;

    let lsp = LspClient::new();
    lsp.connect(pipes.stdin, pipes.stdout, Some(pipes.stderr))
        .await;
    lsp.initialize(workspace.root_uri())
        .await
        .context("language server handshake")?;
    tracing::info!("language server session established");

    let documents = DocumentStore::new();
    let registry = Registry::with_builtins()
        .map_err(|e| anyhow::anyhow!("building the tool catalog: {e}"))?;

    let mut reader = MessageReader::new(tokio::io::stdin());
    let writer = MessageWriter::new(tokio::io::stdout());
    let result = {
        let mut server = Server::new(
            &registry,
            &lsp,
            &documents,
            &workspace,
            &policy,
            Some(&mut supervisor),
        );
        server.run(&mut reader, &writer).await
    };

    // Reverse order of construction: session first, child last.
    lsp.disconnect().await;
    supervisor.kill().await;

    result.context("session loop failed")?;
    tracing::info!("gantry exiting");
    Ok(())
}
