use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable designating the sandbox root.
pub const SANDBOX_ROOT_ENV: &str = "SAFE_ROOT";

/// Directory name used under the working directory when no root is configured.
pub const DEFAULT_SANDBOX_DIR: &str = "safefiles";

/// Maximum config file size (1 MB).
const MAX_CONFIG_BYTES: u64 = 1024 * 1024;

/// Default ceiling for attested subjects (500 MB).
pub const DEFAULT_MAX_SUBJECT_BYTES: u64 = 500 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Directory outside of which nothing may resolve.
    pub sandbox_root: PathBuf,
    /// Whether a candidate resolving to the sandbox root itself is accepted.
    pub allow_root_itself: bool,
    /// Subjects larger than this are refused before they are read.
    pub max_subject_bytes: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            sandbox_root: default_sandbox_root(),
            allow_root_itself: false,
            max_subject_bytes: DEFAULT_MAX_SUBJECT_BYTES,
        }
    }
}

fn default_sandbox_root() -> PathBuf {
    std::env::current_dir()
        .map(|cwd| cwd.join(DEFAULT_SANDBOX_DIR))
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_SANDBOX_DIR))
}

impl GuardConfig {
    /// Builds a config for an explicit root, other knobs at their defaults.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            sandbox_root: root.into(),
            ..Self::default()
        }
    }

    /// Reads `SAFE_ROOT` once. Unset or empty falls back to `<cwd>/safefiles`.
    pub fn from_env() -> Self {
        match std::env::var_os(SANDBOX_ROOT_ENV) {
            Some(root) if !root.is_empty() => Self::with_root(root),
            _ => Self::default(),
        }
    }

    /// Loads a JSON config file, or the environment-derived config when no
    /// file is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => {
                let bytes = crate::fs_guard::read_validated(p, MAX_CONFIG_BYTES)?;
                serde_json::from_slice(&bytes)
                    .with_context(|| format!("parsing config {}", p.display()))
            }
            None => Ok(Self::from_env()),
        }
    }
}
