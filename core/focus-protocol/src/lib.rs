//! On-disk schema for agent-focus.
//!
//! This crate is shared by the hook (producer) and every reader to prevent schema
//! drift. It performs no I/O.
//!
//! ```text
//! <stateDir>/sessions/<id>.json     one SessionRecord per session
//! <stateDir>/focus-request.json     at most one outstanding FocusRequest
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix for session ids derived from the agent's process id.
pub const PPID_PREFIX: &str = "ppid-";

/// File extension of session records.
pub const SESSION_FILE_EXTENSION: &str = "json";

/// Lifecycle phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Attention,
    Running,
    Idle,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Attention => "attention",
            Self::Running => "running",
            Self::Idle => "idle",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "attention" => Ok(Self::Attention),
            "running" => Ok(Self::Running),
            "idle" => Ok(Self::Idle),
            other => Err(format!("unknown session status: {}", other)),
        }
    }
}

/// One tracked agent session, persisted as `<id>.json`.
///
/// Optional fields are omitted from the file when absent; they never
/// round-trip as empty strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    pub last_update: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_identity: Option<String>,
}

impl SessionRecord {
    /// Record for a `start` event.
    pub fn running(id: impl Into<String>, cwd: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            status: SessionStatus::Running,
            reason: None,
            cwd: Some(cwd.into()),
            last_update: at,
            terminal_pid: None,
            window_identity: None,
        }
    }

    /// Record for an `idle` event.
    pub fn idle(id: impl Into<String>, cwd: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            status: SessionStatus::Idle,
            ..Self::running(id, cwd, at)
        }
    }

    /// Record for an `attention` event. Returns `None` when `reason` is blank,
    /// since an attention record always names what the agent is waiting on.
    pub fn attention(
        id: impl Into<String>,
        reason: impl Into<String>,
        cwd: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Option<Self> {
        let reason = reason.into();
        if reason.trim().is_empty() {
            return None;
        }
        Some(Self {
            status: SessionStatus::Attention,
            reason: Some(reason),
            ..Self::running(id, cwd, at)
        })
    }

    pub fn with_terminal_pid(mut self, pid: Option<u32>) -> Self {
        self.terminal_pid = pid;
        self
    }

    pub fn with_window_identity(mut self, identity: Option<String>) -> Self {
        self.window_identity = identity.filter(|value| !value.is_empty());
        self
    }

    pub fn needs_attention(&self) -> bool {
        self.status == SessionStatus::Attention
    }

    /// Process id embedded in the session id (`ppid-<pid>`), if any.
    pub fn agent_pid(&self) -> Option<u32> {
        pid_from_session_id(&self.id)
    }

    /// File name for this record inside the sessions directory.
    pub fn file_name(&self) -> String {
        session_file_name(&self.id)
    }
}

/// Broadcast asking whichever window owns `session_id` to focus it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusRequest {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_identity: Option<String>,
    /// Unix epoch milliseconds at which the request was written.
    pub timestamp: i64,
}

impl FocusRequest {
    pub fn for_session(record: &SessionRecord, now: DateTime<Utc>) -> Self {
        Self {
            session_id: record.id.clone(),
            cwd: record.cwd.clone(),
            window_identity: record.window_identity.clone(),
            timestamp: now.timestamp_millis(),
        }
    }

    /// Age of the request relative to `now`. Negative when written by a
    /// clock that runs ahead of ours.
    pub fn age_millis(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp_millis() - self.timestamp
    }
}

/// Session id for an agent process.
pub fn session_id_for_pid(pid: u32) -> String {
    format!("{}{}", PPID_PREFIX, pid)
}

/// Extracts the agent pid from a `ppid-<pid>` id. Externally supplied
/// session tokens yield `None`.
pub fn pid_from_session_id(id: &str) -> Option<u32> {
    let digits = id.strip_prefix(PPID_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().filter(|pid| *pid > 0)
}

pub fn session_file_name(id: &str) -> String {
    format!("{}.{}", id, SESSION_FILE_EXTENSION)
}

/// Why a session id cannot be used as a file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidSessionId {
    Empty,
    PathSeparator,
    ParentReference,
    ControlCharacter,
}

impl fmt::Display for InvalidSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Self::Empty => "session id is empty",
            Self::PathSeparator => "session id contains a path separator",
            Self::ParentReference => "session id is a relative path component",
            Self::ControlCharacter => "session id contains a control character",
        };
        f.write_str(message)
    }
}

/// Session ids become file names, so anything that could escape the sessions
/// directory is rejected.
pub fn validate_session_id(id: &str) -> Result<(), InvalidSessionId> {
    if id.trim().is_empty() {
        return Err(InvalidSessionId::Empty);
    }
    if id.contains('/') || id.contains('\\') {
        return Err(InvalidSessionId::PathSeparator);
    }
    if id == "." || id == ".." {
        return Err(InvalidSessionId::ParentReference);
    }
    if id.chars().any(char::is_control) {
        return Err(InvalidSessionId::ControlCharacter);
    }
    Ok(())
}
