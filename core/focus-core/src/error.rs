//! Error types for focus-core operations.
//!
//! Expected cross-process races (a file caught mid-write, a watcher hiccup, a
//! stale focus request) are handled inside the component that sees them and
//! never surface here. These variants are for callers that can act on them.

use std::path::PathBuf;

use agent_focus_protocol::InvalidSessionId;

/// All errors that can occur in focus-core operations.
#[derive(Debug, thiserror::Error)]
pub enum FocusError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // Session Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Invalid session id {id:?}: {reason}")]
    InvalidSessionId { id: String, reason: InvalidSessionId },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("No terminal found for session {0}")]
    NoTerminal(String),

    #[error("Session {0} has no working directory to name")]
    MissingCwd(String),

    #[error("Session {0} belongs to another window and the focus request could not be written")]
    FocusRequestUndelivered(String),

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Directory watch failed: {0}")]
    Watch(#[from] notify::Error),

    // ─────────────────────────────────────────────────────────────────────
    // Platform Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Process inspection failed: {0}")]
    Probe(#[from] ProbeError),

    #[error("Host operation failed: {0}")]
    Host(String),
}

impl FocusError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        FocusError::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        FocusError::Json {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn invalid_id(id: &str, reason: InvalidSessionId) -> Self {
        FocusError::InvalidSessionId {
            id: id.to_string(),
            reason,
        }
    }
}

/// Failure of an external process-inspection call. Always "inconclusive":
/// nothing is ever deleted because of one of these.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error("timed out after {0} ms")]
    Timeout(u64),

    #[error("{0}")]
    Failed(String),
}

/// Convenience type alias for Results using FocusError.
pub type Result<T> = std::result::Result<T, FocusError>;

// Conversion for string error compatibility
impl From<FocusError> for String {
    fn from(err: FocusError) -> String {
        err.to_string()
    }
}
