//! [`TerminalHost`] backed by the tmux session this process runs in.
//!
//! The "window" is the tmux session; its "terminals" are the session's panes.
//!
//! | host operation    | tmux                                                   |
//! |-------------------|--------------------------------------------------------|
//! | open terminals    | `list-panes -s -t <session> -F '#{pane_id} #{pane_pid}'`|
//! | terminal pid      | from the listing, else `display-message -p -t <pane> '#{pane_pid}'` |
//! | show terminal     | `select-window -t <pane>` + `select-pane -t <pane>`    |
//! | activate window   | `switch-client -t <session>`                           |
//!
//! Every tmux invocation runs under a timeout.

use std::collections::HashMap;
use std::env;
use std::process::Command;
use std::sync::Mutex;
use std::time::Duration;

use focus_core::{call_with_timeout, HostError, ProbeError, TerminalHost, TerminalId};

/// Executes tmux commands. Enables mock injection for testing.
pub trait TmuxRunner: Send + Sync {
    fn run(&self, args: &[&str]) -> Result<String, HostError>;
}

/// Real tmux executor using `std::process::Command`.
pub struct TmuxExecutor {
    tmux_bin: String,
    timeout: Duration,
}

impl TmuxExecutor {
    pub fn new(tmux_bin: impl Into<String>, timeout: Duration) -> Self {
        Self {
            tmux_bin: tmux_bin.into(),
            timeout,
        }
    }
}

impl TmuxRunner for TmuxExecutor {
    fn run(&self, args: &[&str]) -> Result<String, HostError> {
        let bin = self.tmux_bin.clone();
        let owned: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
        call_with_timeout(self.timeout, "tmux", move || {
            let output = Command::new(&bin)
                .args(&owned)
                .output()
                .map_err(|err| ProbeError::Failed(err.to_string()))?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(ProbeError::Failed(format!(
                    "exit code {}: {}",
                    output.status.code().unwrap_or(-1),
                    stderr.trim()
                )));
            }
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        })
        .map_err(|err| HostError::new(format!("tmux {}: {}", args.first().unwrap_or(&""), err)))
    }
}

pub struct TmuxHost<R> {
    runner: R,
    session_id: Option<String>,
    identity: Option<String>,
    workspace_roots: Vec<String>,
    /// Pane pids seen by the last listing, so most pid lookups need no command.
    pane_pids: Mutex<HashMap<TerminalId, u32>>,
}

impl<R: TmuxRunner> TmuxHost<R> {
    /// Attaches to the tmux session named by `$TMUX`, if any. Outside tmux the
    /// host has no terminals and no workspace, so every focus is broadcast.
    pub fn detect(runner: R, identity: Option<String>, workspace_roots: Vec<String>) -> Self {
        let session_id = if env::var_os("TMUX").is_some() {
            match runner.run(&["display-message", "-p", "#{session_id}"]) {
                Ok(output) => Some(output.trim().to_string()).filter(|id| !id.is_empty()),
                Err(err) => {
                    tracing::debug!(error = %err, "Not attached to a tmux session");
                    None
                }
            }
        } else {
            None
        };
        Self::with_session(runner, session_id, identity, workspace_roots)
    }

    pub fn with_session(
        runner: R,
        session_id: Option<String>,
        identity: Option<String>,
        workspace_roots: Vec<String>,
    ) -> Self {
        let identity = identity
            .filter(|id| !id.is_empty())
            .or_else(|| session_id.as_ref().map(|id| format!("tmux:{}", id)));
        let workspace_roots = if session_id.is_some() {
            workspace_roots
        } else {
            Vec::new()
        };
        Self {
            runner,
            session_id,
            identity,
            workspace_roots,
            pane_pids: Mutex::new(HashMap::new()),
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }
}

impl<R: TmuxRunner> TerminalHost for TmuxHost<R> {
    fn window_identity(&self) -> Option<String> {
        self.identity.clone()
    }

    fn workspace_roots(&self) -> Vec<String> {
        self.workspace_roots.clone()
    }

    fn open_terminals(&self) -> Result<Vec<TerminalId>, HostError> {
        let Some(session) = self.session_id.as_deref() else {
            return Ok(Vec::new());
        };
        let output = self.runner.run(&[
            "list-panes",
            "-s",
            "-t",
            session,
            "-F",
            "#{pane_id} #{pane_pid}",
        ])?;
        let panes = parse_panes(&output);
        if let Ok(mut cache) = self.pane_pids.lock() {
            *cache = panes
                .iter()
                .filter_map(|(pane, pid)| pid.map(|pid| (pane.clone(), pid)))
                .collect();
        }
        Ok(panes.into_iter().map(|(pane, _)| pane).collect())
    }

    fn terminal_pid(&self, terminal: &TerminalId) -> Result<Option<u32>, HostError> {
        let cached = self
            .pane_pids
            .lock()
            .ok()
            .and_then(|cache| cache.get(terminal).copied());
        if cached.is_some() {
            return Ok(cached);
        }
        let output =
            self.runner
                .run(&["display-message", "-p", "-t", terminal.as_str(), "#{pane_pid}"])?;
        Ok(output.trim().parse().ok())
    }

    fn show_terminal(&self, terminal: &TerminalId) -> Result<(), HostError> {
        self.runner.run(&["select-window", "-t", terminal.as_str()])?;
        self.runner.run(&["select-pane", "-t", terminal.as_str()])?;
        Ok(())
    }

    fn activate_window(&self) -> Result<(), HostError> {
        match self.session_id.as_deref() {
            Some(session) => self.runner.run(&["switch-client", "-t", session]).map(|_| ()),
            None => Ok(()),
        }
    }
}

/// Parses `#{pane_id} #{pane_pid}` lines. Lines without a pane id are skipped.
fn parse_panes(output: &str) -> Vec<(TerminalId, Option<u32>)> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let pane = fields.next()?;
            let pid = fields.next().and_then(|pid| pid.parse().ok());
            Some((TerminalId::new(pane), pid))
        })
        .collect()
}
