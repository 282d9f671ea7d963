//! Cross-window focus routing through one shared file.
//!
//! A window that cannot focus a session itself writes a [`FocusRequest`] to
//! `<stateDir>/focus-request.json` (overwriting any previous one). Every window
//! polls that file on a short interval and self-selects:
//!
//! 1. exact match on window identity, when both the request and the window
//!    carry one;
//! 2. otherwise, containment (either direction) between the request's cwd and
//!    one of the window's workspace roots.
//!
//! The window that claims a request deletes the file *before* acting, so a
//! crash mid-action never replays it. Requests older than the staleness bound
//! are deleted without being acted on. A request nobody claims simply goes
//! stale; that lost update is accepted.
//!
//! All I/O on the shared file is best-effort: failures are logged and reported
//! as outcomes, never as errors.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use agent_focus_protocol::{FocusRequest, SessionRecord};
use chrono::{DateTime, Utc};
use fs_err as fs;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::path_utils::paths_overlap;

/// How this window decided a request was addressed to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetMatch {
    WindowIdentity,
    Workspace,
}

/// What one poll observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// No request file.
    NoRequest,
    /// Same modification time as the last successful poll.
    Unchanged,
    /// File present but not parseable yet (mid-write or corrupt); retried next poll.
    Unreadable,
    /// Older than the staleness bound; deleted, not acted on.
    Stale(FocusRequest),
    /// Addressed to some other window.
    NotForUs(FocusRequest),
    /// Another window deleted the file between our read and our delete.
    ClaimedElsewhere(FocusRequest),
    /// Ours. The file has already been deleted; the caller must act on it.
    Claimed(FocusRequest, TargetMatch),
}

/// Identity and workspace of the polling window.
#[derive(Debug, Clone, Default)]
pub struct WindowTarget {
    pub identity: Option<String>,
    pub workspace_roots: Vec<String>,
}

impl WindowTarget {
    pub fn new(identity: Option<String>, workspace_roots: Vec<String>) -> Self {
        Self {
            identity: identity.filter(|value| !value.is_empty()),
            workspace_roots,
        }
    }

    /// Decides whether `request` is addressed to this window.
    pub fn matches(&self, request: &FocusRequest) -> Option<TargetMatch> {
        if let (Some(wanted), Some(mine)) = (request.window_identity.as_deref(), self.identity.as_deref()) {
            return (wanted == mine).then_some(TargetMatch::WindowIdentity);
        }

        let cwd = request.cwd.as_deref().filter(|cwd| !cwd.trim().is_empty())?;
        self.workspace_roots
            .iter()
            .any(|root| paths_overlap(root, cwd))
            .then_some(TargetMatch::Workspace)
    }

    /// True when a session can be focused in this window without a broadcast:
    /// it carries this window's identity, or carries none and lives in this
    /// window's workspace.
    pub fn owns_session(&self, session: &SessionRecord) -> bool {
        match (session.window_identity.as_deref(), self.identity.as_deref()) {
            (Some(theirs), Some(mine)) => theirs == mine,
            (Some(_), None) => false,
            (None, _) => session.cwd.as_deref().is_some_and(|cwd| {
                self.workspace_roots
                    .iter()
                    .any(|root| paths_overlap(root, cwd))
            }),
        }
    }
}

/// Emitter and poller for the shared focus-request file.
#[derive(Debug)]
pub struct FocusRouter {
    path: PathBuf,
    stale_after: Duration,
    watermark: Option<SystemTime>,
}

impl FocusRouter {
    pub fn new(path: PathBuf, stale_after: Duration) -> Self {
        Self {
            path,
            stale_after,
            watermark: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Broadcasts a request to focus `session`, replacing any outstanding one.
    /// Returns whether the request was written.
    pub fn request_focus(&self, session: &SessionRecord, now: DateTime<Utc>) -> bool {
        let request = FocusRequest::for_session(session, now);
        match write_atomically(&self.path, &request) {
            Ok(()) => {
                info!(session = %session.id, "Broadcast focus request");
                true
            }
            Err(err) => {
                warn!(session = %session.id, error = %err, "Failed to write focus request");
                false
            }
        }
    }

    /// Reads the shared file and decides what, if anything, this window does.
    pub fn poll(&mut self, target: &WindowTarget, now: DateTime<Utc>) -> PollOutcome {
        let modified = match std::fs::metadata(&self.path) {
            Ok(metadata) => metadata.modified().ok(),
            Err(err) => {
                if err.kind() != ErrorKind::NotFound {
                    debug!(error = %err, "Focus request not accessible");
                }
                self.watermark = None;
                return PollOutcome::NoRequest;
            }
        };

        if modified.is_some() && modified == self.watermark {
            return PollOutcome::Unchanged;
        }

        let request = match read_request(&self.path) {
            Some(request) => request,
            None => return PollOutcome::Unreadable,
        };
        self.watermark = modified;

        let age_millis = request.age_millis(now).unsigned_abs();
        if age_millis > self.stale_after.as_millis() as u64 {
            debug!(
                session = %request.session_id,
                age_ms = age_millis,
                "Discarding stale focus request"
            );
            self.discard();
            return PollOutcome::Stale(request);
        }

        let Some(matched) = target.matches(&request) else {
            return PollOutcome::NotForUs(request);
        };

        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(session = %request.session_id, "Focus request claimed by another window");
                return PollOutcome::ClaimedElsewhere(request);
            }
            Err(err) => {
                warn!(error = %err, "Failed to delete claimed focus request");
            }
        }
        self.watermark = None;

        info!(session = %request.session_id, matched = ?matched, "Claimed focus request");
        PollOutcome::Claimed(request, matched)
    }

    fn discard(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != ErrorKind::NotFound {
                debug!(error = %err, "Failed to delete stale focus request");
            }
        }
        self.watermark = None;
    }
}

fn read_request(path: &Path) -> Option<FocusRequest> {
    let content = match fs::read(path) {
        Ok(content) => content,
        Err(err) => {
            if err.kind() != ErrorKind::NotFound {
                debug!(error = %err, "Failed to read focus request");
            }
            return None;
        }
    };
    match serde_json::from_slice(&content) {
        Ok(request) => Some(request),
        Err(err) => {
            debug!(error = %err, "Focus request not parseable yet");
            None
        }
    }
}

fn write_atomically(path: &Path, request: &FocusRequest) -> std::io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| std::io::Error::new(ErrorKind::InvalidInput, "request path has no parent"))?;
    fs::create_dir_all(parent)?;

    let content = serde_json::to_vec(request)?;
    let mut temp_file = NamedTempFile::new_in(parent)?;
    temp_file.write_all(&content)?;
    temp_file.flush()?;
    temp_file.persist(path).map_err(|err| err.error)?;
    Ok(())
}
