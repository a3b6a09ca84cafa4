//! The gate every command tool passes through: an enable flag, an
//! allow-list of trusted binary prefixes, and deny globs for sensitive
//! files. Path containment itself lives in [`gantry_rpc::uri::Workspace`];
//! this layer screens what containment alone would let through.

use std::path::{Path, PathBuf};

use globset::GlobBuilder;

use crate::ToolError;

/// Prefixes a command binary may live under, besides the workspace root.
pub const DEFAULT_TRUSTED_PREFIXES: &[&str] =
    &["/usr/bin", "/usr/local/bin", "/opt/homebrew/bin"];

/// Deny patterns for files no tool should touch even inside the workspace.
pub const DEFAULT_DENY_PATTERNS: &[&str] = &[
    "**/.ssh/**",
    "**/.gnupg/**",
    "**/.aws/**",
    "**/.git/**",
    "**/.git-credentials",
    "**/.netrc",
    "**/.npmrc",
    "**/.env",
    "**/.env.*",
    "**/id_rsa*",
    "**/id_ed25519*",
    "**/*.pem",
    "**/*.key",
];

/// Which configured binary a command tool runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandRole {
    Build,
    Test,
    Fmt,
}

impl CommandRole {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            CommandRole::Build => "build",
            CommandRole::Test => "test",
            CommandRole::Fmt => "fmt",
        }
    }
}

/// The three optional command binaries, validated at construction.
#[derive(Debug, Clone, Default)]
pub struct CommandBinaries {
    pub build: Option<PathBuf>,
    pub test: Option<PathBuf>,
    pub fmt: Option<PathBuf>,
}

#[derive(Debug, Clone)]
struct DenyPattern {
    pattern: String,
    matcher: globset::GlobMatcher,
}

#[derive(Debug)]
pub struct Policy {
    commands_enabled: bool,
    trusted_prefixes: Vec<PathBuf>,
    deny_patterns: Vec<DenyPattern>,
    binaries: CommandBinaries,
}

impl Policy {
    /// Build the gate. Every configured binary must be absolute and under
    /// a trusted prefix; a violation here is a startup error, not a
    /// runtime surprise.
    pub fn new(
        commands_enabled: bool,
        workspace_root: &Path,
        binaries: CommandBinaries,
    ) -> Result<Self, ToolError> {
        let mut trusted_prefixes: Vec<PathBuf> =
            DEFAULT_TRUSTED_PREFIXES.iter().map(PathBuf::from).collect();
        trusted_prefixes.push(workspace_root.to_path_buf());

        let mut deny_patterns = Vec::new();
        for pattern in DEFAULT_DENY_PATTERNS {
            // Case-insensitive so "Secret.PEM" cannot slip past "*.pem".
            let glob = GlobBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| ToolError::BadArgs {
                    message: format!("invalid deny pattern {pattern:?}: {e}"),
                })?;
            deny_patterns.push(DenyPattern {
                pattern: (*pattern).to_string(),
                matcher: glob.compile_matcher(),
            });
        }

        let policy = Self {
            commands_enabled,
            trusted_prefixes,
            deny_patterns,
            binaries,
        };

        for bin in [
            &policy.binaries.build,
            &policy.binaries.test,
            &policy.binaries.fmt,
        ]
        .into_iter()
        .flatten()
        {
            if !bin.is_absolute() || !policy.is_trusted(bin) {
                return Err(ToolError::UntrustedBinary(bin.clone()));
            }
        }

        Ok(policy)
    }

    /// Gate disabled, no binaries: the default for pure navigation use.
    pub fn disabled(workspace_root: &Path) -> Result<Self, ToolError> {
        Self::new(false, workspace_root, CommandBinaries::default())
    }

    #[must_use]
    pub fn commands_enabled(&self) -> bool {
        self.commands_enabled
    }

    /// The binary for `role`, after the enable-flag and configuration
    /// checks.
    pub fn command_binary(&self, role: CommandRole) -> Result<&Path, ToolError> {
        if !self.commands_enabled {
            return Err(ToolError::CommandsDisabled);
        }
        let bin = match role {
            CommandRole::Build => &self.binaries.build,
            CommandRole::Test => &self.binaries.test,
            CommandRole::Fmt => &self.binaries.fmt,
        };
        bin.as_deref().ok_or(ToolError::BinaryNotConfigured {
            role: role.label(),
        })
    }

    /// Screen an already-contained path against the deny globs.
    pub fn check_path_allowed(&self, path: &Path) -> Result<(), ToolError> {
        for deny in &self.deny_patterns {
            if deny.matcher.is_match(path) {
                tracing::warn!(
                    path = %path.display(),
                    pattern = %deny.pattern,
                    "path blocked by deny pattern"
                );
                return Err(ToolError::DeniedPath(path.to_path_buf()));
            }
        }
        Ok(())
    }

    fn is_trusted(&self, bin: &Path) -> bool {
        self.trusted_prefixes
            .iter()
            .any(|prefix| bin.starts_with(prefix))
    }
}
