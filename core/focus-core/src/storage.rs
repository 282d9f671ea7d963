//! Storage configuration and path management for agent-focus.
//!
//! Every process that takes part in the protocol (hooks, CLI, each window's
//! engine) resolves its paths here so they agree on one shared state directory.
//!
//! ```text
//! <stateDir>/
//! ├── sessions/<id>.json     one file per session (producers write)
//! ├── focus-request.json     cross-window broadcast (at most one)
//! ├── aliases.json           cwd → display name
//! ├── config.toml            optional settings
//! └── logs/                  hook log files
//! ```

use std::env;
use std::path::{Path, PathBuf};

use crate::error::{FocusError, Result};

/// Environment variable that overrides the state directory.
pub const STATE_DIR_ENV: &str = "AGENT_FOCUS_HOME";

const DEFAULT_DIR_NAME: &str = ".agent-focus";

/// Central configuration for all agent-focus storage paths.
///
/// Production code uses [`StorageConfig::from_env`], which points to
/// `$AGENT_FOCUS_HOME` or `~/.agent-focus`. Tests use
/// [`StorageConfig::with_root`] for isolation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    root: PathBuf,
}

impl StorageConfig {
    pub fn from_env() -> Result<Self> {
        if let Some(root) = env::var_os(STATE_DIR_ENV).filter(|value| !value.is_empty()) {
            return Ok(Self::with_root(PathBuf::from(root)));
        }
        let home = dirs::home_dir().ok_or(FocusError::HomeDirNotFound)?;
        Ok(Self::with_root(home.join(DEFAULT_DIR_NAME)))
    }

    /// Creates a StorageConfig with a custom root directory.
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Shared Files
    // ─────────────────────────────────────────────────────────────────────────────

    /// Path to the single shared focus-request file.
    pub fn focus_request_file(&self) -> PathBuf {
        self.root.join("focus-request.json")
    }

    /// Path to aliases.json (cwd → display name).
    pub fn aliases_file(&self) -> PathBuf {
        self.root.join("aliases.json")
    }

    /// Path to config.toml (optional settings).
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Directories
    // ─────────────────────────────────────────────────────────────────────────────

    /// Path to sessions/ directory (one JSON file per session).
    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Path of the record file for `session_id`. Callers validate the id first.
    pub fn session_file(&self, session_id: &str) -> PathBuf {
        self.sessions_dir()
            .join(agent_focus_protocol::session_file_name(session_id))
    }
}
