//! Writes the calling agent's session file.
//!
//! | transition | effect |
//! |---|---|
//! | running    | write `{id, status=running, cwd, lastUpdate}` |
//! | attention  | write `{id, status=attention, reason, cwd, lastUpdate}` |
//! | idle       | write `{id, status=idle, cwd, lastUpdate}` |
//! | end        | delete the file |
//!
//! `terminalPid` and `windowIdentity` are added whenever they are known.
//! Writes replace the whole file; a later write always wins.

use std::env;

use agent_focus_protocol::{session_id_for_pid, validate_session_id, SessionRecord};
use chrono::Utc;
use focus_core::{
    FocusError, ProcessInspector, SessionStore, Settings, StorageConfig, SysinfoInspector,
};

use crate::SessionArgs;

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error(transparent)]
    Focus(#[from] FocusError),

    #[error("attention requires a non-empty reason")]
    BlankReason,

    #[error("cannot determine session id: no --session-id and no parent process")]
    NoSessionId,

    #[error("cannot determine working directory: {0}")]
    NoCwd(std::io::Error),

    #[error("failed to read hook input: {0}")]
    Stdin(std::io::Error),

    #[error("failed to parse hook input: {0}")]
    Payload(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Running,
    Attention { reason: String },
    Idle,
    End,
}

/// Who is reporting, resolved from flags, environment and the process tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub session_id: String,
    pub cwd: String,
    pub terminal_pid: Option<u32>,
    pub window_identity: Option<String>,
}

impl SessionContext {
    pub fn resolve(storage: &StorageConfig, args: &SessionArgs) -> Result<Self, HookError> {
        let agent_pid = agent_pid();

        let session_id = match (&args.session_id, agent_pid) {
            (Some(id), _) => {
                validate_session_id(id).map_err(|reason| {
                    FocusError::InvalidSessionId {
                        id: id.clone(),
                        reason,
                    }
                })?;
                id.clone()
            }
            (None, Some(pid)) => session_id_for_pid(pid),
            (None, None) => return Err(HookError::NoSessionId),
        };

        let cwd = match &args.cwd {
            Some(cwd) if !cwd.trim().is_empty() => cwd.clone(),
            _ => env::current_dir()
                .map_err(HookError::NoCwd)?
                .to_string_lossy()
                .to_string(),
        };

        let terminal_pid = args
            .terminal_pid
            .or_else(|| agent_pid.and_then(|pid| terminal_pid_for(storage, pid)));

        Ok(Self {
            session_id,
            cwd,
            terminal_pid,
            window_identity: args.window_id.clone().filter(|id| !id.is_empty()),
        })
    }
}

pub fn apply(
    storage: &StorageConfig,
    context: &SessionContext,
    transition: &Transition,
) -> Result<(), HookError> {
    let store = SessionStore::new(storage.sessions_dir());
    let now = Utc::now();

    let record = match transition {
        Transition::End => {
            let removed = store.delete([&context.session_id])?;
            tracing::debug!(session = %context.session_id, removed = !removed.is_empty(), "Session ended");
            return Ok(());
        }
        Transition::Running => SessionRecord::running(&context.session_id, &context.cwd, now),
        Transition::Idle => SessionRecord::idle(&context.session_id, &context.cwd, now),
        Transition::Attention { reason } => {
            SessionRecord::attention(&context.session_id, reason, &context.cwd, now)
                .ok_or(HookError::BlankReason)?
        }
    };

    let record = record
        .with_terminal_pid(context.terminal_pid)
        .with_window_identity(context.window_identity.clone());
    store.write(&record)?;
    tracing::debug!(
        session = %record.id,
        status = %record.status,
        terminal_pid = ?record.terminal_pid,
        "Session state written"
    );
    Ok(())
}

/// The agent is the process that ran this hook.
fn agent_pid() -> Option<u32> {
    #[cfg(unix)]
    {
        // SAFETY: getppid() is a simple syscall that returns the parent process ID.
        // It has no failure modes and always returns a valid PID (1 if parent exited).
        #[allow(unsafe_code)]
        let pid = unsafe { libc::getppid() } as u32;
        (pid > 1).then_some(pid)
    }
    #[cfg(not(unix))]
    {
        None
    }
}

/// The terminal shell is the agent's parent.
fn terminal_pid_for(storage: &StorageConfig, agent_pid: u32) -> Option<u32> {
    let timeout = Settings::load_or_default(&storage.config_file()).probe_timeout();
    match SysinfoInspector::new(timeout).parent_pid(agent_pid) {
        Ok(parent) => parent,
        Err(err) => {
            tracing::debug!(agent_pid, error = %err, "Terminal pid unavailable");
            None
        }
    }
}
