//! In-memory stand-ins for the platform seams, for tests in this crate and in
//! downstream crates.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::ProbeError;
use crate::host::{HostError, TerminalHost, TerminalId};
use crate::process::ProcessInspector;

/// Process table driven by the test: an alive set, a parent map, and an
/// optional forced failure.
#[derive(Debug, Default)]
pub struct ScriptedInspector {
    alive: Mutex<HashSet<u32>>,
    parents: Mutex<HashMap<u32, u32>>,
    failure: Mutex<Option<String>>,
    alive_calls: AtomicUsize,
    parent_calls: AtomicUsize,
}

impl ScriptedInspector {
    pub fn with_alive(pids: impl IntoIterator<Item = u32>) -> Self {
        let inspector = Self::default();
        inspector.set_alive(pids);
        inspector
    }

    pub fn set_alive(&self, pids: impl IntoIterator<Item = u32>) {
        *self.alive.lock().unwrap() = pids.into_iter().collect();
    }

    pub fn set_parent(&self, pid: u32, parent: u32) {
        self.parents.lock().unwrap().insert(pid, parent);
    }

    /// Every subsequent call fails until [`ScriptedInspector::recover`].
    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn recover(&self) {
        *self.failure.lock().unwrap() = None;
    }

    pub fn alive_calls(&self) -> usize {
        self.alive_calls.load(Ordering::SeqCst)
    }

    pub fn parent_calls(&self) -> usize {
        self.parent_calls.load(Ordering::SeqCst)
    }

    fn check_failure(&self) -> Result<(), ProbeError> {
        match self.failure.lock().unwrap().as_ref() {
            Some(message) => Err(ProbeError::Failed(message.clone())),
            None => Ok(()),
        }
    }
}

impl ProcessInspector for ScriptedInspector {
    fn are_alive(&self, pids: &[u32]) -> Result<HashSet<u32>, ProbeError> {
        self.alive_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        let alive = self.alive.lock().unwrap();
        Ok(pids.iter().copied().filter(|pid| alive.contains(pid)).collect())
    }

    fn parent_pid(&self, pid: u32) -> Result<Option<u32>, ProbeError> {
        self.parent_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        Ok(self.parents.lock().unwrap().get(&pid).copied())
    }
}

/// A window with a fixed set of terminals that records every host call.
#[derive(Debug, Default)]
pub struct RecordingHost {
    identity: Option<String>,
    workspace_roots: Vec<String>,
    terminals: Mutex<Vec<(TerminalId, Option<u32>)>>,
    shown: Mutex<Vec<TerminalId>>,
    activations: AtomicUsize,
    pid_queries: AtomicUsize,
    fail_activation: Mutex<bool>,
}

impl RecordingHost {
    pub fn new(identity: Option<&str>, workspace_roots: &[&str]) -> Self {
        Self {
            identity: identity.map(str::to_string),
            workspace_roots: workspace_roots.iter().map(|root| root.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn add_terminal(&self, id: &str, shell_pid: Option<u32>) -> TerminalId {
        let terminal = TerminalId::new(id);
        self.terminals
            .lock()
            .unwrap()
            .push((terminal.clone(), shell_pid));
        terminal
    }

    pub fn close_terminal(&self, id: &TerminalId) {
        self.terminals.lock().unwrap().retain(|(t, _)| t != id);
    }

    pub fn fail_activation(&self) {
        *self.fail_activation.lock().unwrap() = true;
    }

    pub fn shown(&self) -> Vec<TerminalId> {
        self.shown.lock().unwrap().clone()
    }

    pub fn activations(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }

    pub fn pid_queries(&self) -> usize {
        self.pid_queries.load(Ordering::SeqCst)
    }
}

impl TerminalHost for RecordingHost {
    fn window_identity(&self) -> Option<String> {
        self.identity.clone()
    }

    fn workspace_roots(&self) -> Vec<String> {
        self.workspace_roots.clone()
    }

    fn open_terminals(&self) -> Result<Vec<TerminalId>, HostError> {
        Ok(self
            .terminals
            .lock()
            .unwrap()
            .iter()
            .map(|(terminal, _)| terminal.clone())
            .collect())
    }

    fn terminal_pid(&self, terminal: &TerminalId) -> Result<Option<u32>, HostError> {
        self.pid_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .terminals
            .lock()
            .unwrap()
            .iter()
            .find(|(t, _)| t == terminal)
            .and_then(|(_, pid)| *pid))
    }

    fn show_terminal(&self, terminal: &TerminalId) -> Result<(), HostError> {
        self.shown.lock().unwrap().push(terminal.clone());
        Ok(())
    }

    fn activate_window(&self) -> Result<(), HostError> {
        self.activations.fetch_add(1, Ordering::SeqCst);
        if *self.fail_activation.lock().unwrap() {
            return Err(HostError::new("window manager refused activation"));
        }
        Ok(())
    }
}
