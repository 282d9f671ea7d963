//! Process introspection behind a swappable interface.
//!
//! Everything OS-specific that the core needs reduces to two questions:
//! "which of these pids are alive?" (one batched call) and "what is this pid's
//! parent?". [`SysinfoInspector`] answers them with `sysinfo`; tests substitute
//! a scripted implementation.
//!
//! Every call is bounded by a timeout. A call that times out or fails is
//! reported as a [`ProbeError`], which callers treat as "inconclusive".

use std::collections::HashSet;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, System};

use crate::error::ProbeError;

pub trait ProcessInspector: Send + Sync {
    /// Returns the subset of `pids` that are currently running. Implementations
    /// must answer the whole batch with a single platform query.
    fn are_alive(&self, pids: &[u32]) -> Result<HashSet<u32>, ProbeError>;

    /// Parent of `pid`, or `None` at the root of the tree or when `pid` is gone.
    fn parent_pid(&self, pid: u32) -> Result<Option<u32>, ProbeError>;
}

/// `sysinfo`-backed inspector. Each query runs on a short-lived worker thread
/// so a wedged platform call cannot stall the caller beyond `timeout`.
#[derive(Debug, Clone)]
pub struct SysinfoInspector {
    timeout: Duration,
}

impl SysinfoInspector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ProcessInspector for SysinfoInspector {
    fn are_alive(&self, pids: &[u32]) -> Result<HashSet<u32>, ProbeError> {
        if pids.is_empty() {
            return Ok(HashSet::new());
        }
        let pids = pids.to_vec();
        call_with_timeout(self.timeout, "liveness", move || {
            let mut sys = System::new();
            sys.refresh_processes_specifics(ProcessRefreshKind::new());
            if sys.processes().is_empty() {
                // An empty process table means the platform query failed, not
                // that every process on the machine exited.
                return Err(ProbeError::Failed("process table is empty".to_string()));
            }

            Ok(pids
                .into_iter()
                .filter(|pid| {
                    sys.process(Pid::from_u32(*pid))
                        .is_some_and(|process| process.status() != ProcessStatus::Zombie)
                })
                .collect())
        })
    }

    fn parent_pid(&self, pid: u32) -> Result<Option<u32>, ProbeError> {
        if pid == 0 {
            return Ok(None);
        }
        call_with_timeout(self.timeout, "ancestry", move || {
            let mut sys = System::new();
            let sys_pid = Pid::from_u32(pid);
            sys.refresh_process_specifics(sys_pid, ProcessRefreshKind::new());
            Ok(sys
                .process(sys_pid)
                .and_then(|process| process.parent())
                .map(|parent| parent.as_u32())
                .filter(|parent| *parent != 0 && *parent != pid))
        })
    }
}

/// Runs `f` on a worker thread and waits at most `timeout` for its answer.
///
/// On timeout the worker is abandoned; it finishes (or not) on its own and its
/// result is dropped.
pub fn call_with_timeout<T, F>(
    timeout: Duration,
    label: &'static str,
    f: F,
) -> Result<T, ProbeError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ProbeError> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name(format!("focus-{}", label))
        .spawn(move || {
            let _ = tx.send(f());
        })
        .map_err(|err| ProbeError::Failed(format!("failed to spawn {} worker: {}", label, err)))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(ProbeError::Timeout(timeout.as_millis() as u64)),
        Err(RecvTimeoutError::Disconnected) => {
            Err(ProbeError::Failed(format!("{} worker exited without answering", label)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_alive() {
        let inspector = SysinfoInspector::new(Duration::from_secs(10));
        let me = std::process::id();
        let alive = inspector.are_alive(&[me]).unwrap();
        assert!(alive.contains(&me));
    }

    #[test]
    fn empty_batch_skips_the_platform_call() {
        let inspector = SysinfoInspector::new(Duration::from_millis(1));
        assert!(inspector.are_alive(&[]).unwrap().is_empty());
    }

    #[test]
    #[cfg(unix)]
    fn current_process_has_a_parent() {
        let inspector = SysinfoInspector::new(Duration::from_secs(10));
        let parent = inspector.parent_pid(std::process::id()).unwrap();
        assert!(parent.is_some());
    }

    #[test]
    fn slow_calls_time_out_as_inconclusive() {
        let result = call_with_timeout(Duration::from_millis(20), "test", || {
            thread::sleep(Duration::from_millis(500));
            Ok(1)
        });
        assert_eq!(result, Err(ProbeError::Timeout(20)));
    }

    #[test]
    fn worker_errors_propagate() {
        let result: Result<u32, _> = call_with_timeout(Duration::from_secs(1), "test", || {
            Err(ProbeError::Failed("boom".to_string()))
        });
        assert_eq!(result, Err(ProbeError::Failed("boom".to_string())));
    }
}
