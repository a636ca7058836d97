//! Runtime configuration for the CLI.
//!
//! Configuration is loaded from environment variables, then overridden by
//! command-line flags.

use std::path::{Path, PathBuf};

/// Environment variable naming the working directory.
pub const BASE_DIR_ENV: &str = "CLOUDINIT_BUILDER_DIR";

/// Resolved settings for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuilderConfig {
    /// Absolute working directory; all state lives below it.
    pub base_dir: PathBuf,

    /// Suppress `[*]`/`[+]` progress lines.
    pub quiet: bool,
}

impl BuilderConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `CLOUDINIT_BUILDER_DIR` | current directory |
    /// | `CLOUDINIT_BUILDER_QEMU_ACCEL` | `tcg` (read at VM launch) |
    /// | `RUST_LOG` | `warn` (console log filter) |
    pub fn from_env() -> anyhow::Result<Self> {
        let base_dir = match std::env::var_os(BASE_DIR_ENV).filter(|v| !v.is_empty()) {
            Some(dir) => PathBuf::from(dir),
            None => std::env::current_dir()
                .map_err(|e| anyhow::anyhow!("determine working directory: {e}"))?,
        };
        Self::resolve(&base_dir, false)
    }

    /// Build a config for `base_dir`, made absolute.
    pub fn resolve(base_dir: &Path, quiet: bool) -> anyhow::Result<Self> {
        let base_dir = std::path::absolute(base_dir)
            .map_err(|e| anyhow::anyhow!("resolve {}: {e}", base_dir.display()))?;
        Ok(Self { base_dir, quiet })
    }

    /// Apply command-line overrides.
    pub fn with_overrides(self, base_dir: Option<PathBuf>, quiet: bool) -> anyhow::Result<Self> {
        let quiet = self.quiet || quiet;
        match base_dir {
            Some(dir) => Self::resolve(&dir, quiet),
            None => Ok(Self { quiet, ..self }),
        }
    }
}
