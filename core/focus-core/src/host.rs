//! The window/terminal surface of the host application.
//!
//! The core never talks to a window system directly. A [`TerminalHost`] is the
//! one window this engine instance lives in: it can list its terminals, report
//! each terminal's shell pid, bring one to the front, and raise its own OS
//! window.

use std::fmt;

/// Opaque handle for one terminal inside the host window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TerminalId(String);

impl TerminalId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TerminalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HostError {
    message: String,
}

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<HostError> for crate::error::FocusError {
    fn from(err: HostError) -> Self {
        crate::error::FocusError::Host(err.message)
    }
}

pub trait TerminalHost: Send + Sync {
    /// Opaque token unique to this window, if the host can provide one.
    fn window_identity(&self) -> Option<String>;

    /// Workspace root folders open in this window.
    fn workspace_roots(&self) -> Vec<String>;

    fn open_terminals(&self) -> Result<Vec<TerminalId>, HostError>;

    /// OS pid of the shell process behind `terminal`. May be slow.
    fn terminal_pid(&self, terminal: &TerminalId) -> Result<Option<u32>, HostError>;

    fn show_terminal(&self, terminal: &TerminalId) -> Result<(), HostError>;

    /// Raise this window to the foreground. Best-effort.
    fn activate_window(&self) -> Result<(), HostError>;
}
