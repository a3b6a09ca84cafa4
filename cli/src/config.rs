//! Optional TOML configuration, mirroring the command-line flags.
//!
//! ```toml
//! workspace = "/home/dev/project"
//!
//! [server]
//! command = "rust-analyzer"
//! args = ["--log-file", "/tmp/ra.log"]
//!
//! [commands]
//! enabled = true
//! build_bin = "/usr/bin/make"
//! test_bin = "/usr/bin/make"
//! fmt_bin = "/usr/bin/rustfmt"
//! ```
//!
//! Flags win over the file; the file wins over defaults.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct GantryConfig {
    pub workspace: Option<PathBuf>,
    pub log_level: Option<String>,
    pub server: Option<ServerSection>,
    pub commands: Option<CommandsSection>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServerSection {
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CommandsSection {
    pub enabled: Option<bool>,
    pub build_bin: Option<PathBuf>,
    pub test_bin: Option<PathBuf>,
    pub fmt_bin: Option<PathBuf>,
}

impl GantryConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
    }
}
