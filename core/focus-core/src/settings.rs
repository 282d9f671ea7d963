//! Tunables loaded from `<stateDir>/config.toml`.
//!
//! Every field has a default, so a missing file (the common case) is simply
//! [`Settings::default`]. A malformed file is reported to the caller, which
//! decides whether to fall back.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FocusError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Seconds between liveness probes. `0` disables the periodic probe; the
    /// eager probe at startup still runs.
    pub liveness_interval_secs: u64,
    /// Quiet period that coalesces a burst of directory events.
    pub debounce_ms: u64,
    /// Delay before re-arming the directory watch after an OS watch error.
    pub rearm_delay_ms: u64,
    /// Interval of the focus-request poller.
    pub focus_poll_ms: u64,
    /// Focus requests older than this are discarded unacted.
    pub focus_stale_secs: u64,
    /// Maximum number of parent hops when walking a process's ancestry.
    pub ancestry_max_depth: usize,
    /// How long a walked ancestry chain stays memoized.
    pub ancestry_ttl_secs: u64,
    /// Bound on every external process call (liveness, ancestry, window activation).
    pub probe_timeout_ms: u64,
    /// Interval for noticing closed terminals. `0` disables the poll.
    pub terminal_poll_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            liveness_interval_secs: 30,
            debounce_ms: 50,
            rearm_delay_ms: 1_000,
            focus_poll_ms: 250,
            focus_stale_secs: 5,
            ancestry_max_depth: 15,
            ancestry_ttl_secs: 600,
            probe_timeout_ms: 3_000,
            terminal_poll_ms: 2_000,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let content = match fs_err::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Settings::default())
            }
            Err(err) => return Err(FocusError::io("Failed to read settings", err)),
        };

        toml::from_str(&content).map_err(|err| FocusError::ConfigMalformed {
            path: path.to_path_buf(),
            details: err.to_string(),
        })
    }

    /// Like [`Settings::load`], but logs and falls back to defaults on error.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(settings) => settings,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to load settings; using defaults");
                Settings::default()
            }
        }
    }

    pub fn liveness_interval(&self) -> Option<Duration> {
        (self.liveness_interval_secs > 0).then(|| Duration::from_secs(self.liveness_interval_secs))
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn rearm_delay(&self) -> Duration {
        Duration::from_millis(self.rearm_delay_ms)
    }

    pub fn focus_poll_interval(&self) -> Duration {
        Duration::from_millis(self.focus_poll_ms.max(1))
    }

    pub fn focus_stale_after(&self) -> Duration {
        Duration::from_secs(self.focus_stale_secs)
    }

    pub fn ancestry_ttl(&self) -> Duration {
        Duration::from_secs(self.ancestry_ttl_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn terminal_poll_interval(&self) -> Option<Duration> {
        (self.terminal_poll_ms > 0).then(|| Duration::from_millis(self.terminal_poll_ms))
    }
}
