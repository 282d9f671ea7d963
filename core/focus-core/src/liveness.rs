//! Dead-session detection.
//!
//! Sessions are keyed `ppid-<pid>` by the hook that created them. The prober
//! extracts those pids, asks the [`ProcessInspector`] about the whole batch in
//! one call, and reports the sessions whose pid is not in the alive set.
//!
//! # Safety Rules
//!
//! - Sessions without an extractable pid (external session tokens) are never
//!   reported dead.
//! - If the platform call fails or times out the probe is inconclusive and
//!   nothing is reported dead. Deletion only ever follows a definite answer.

use std::collections::BTreeMap;
use std::sync::Arc;

use agent_focus_protocol::SessionRecord;
use tracing::{debug, warn};

use crate::process::ProcessInspector;

/// Result of one probe over a set of sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The platform answered. `dead` holds ids whose process is gone, sorted.
    Conclusive { dead: Vec<String> },
    /// The platform call failed; keep every session.
    Inconclusive { reason: String },
}

impl ProbeOutcome {
    /// Ids safe to delete. Empty for an inconclusive probe.
    pub fn dead_ids(&self) -> &[String] {
        match self {
            ProbeOutcome::Conclusive { dead } => dead,
            ProbeOutcome::Inconclusive { .. } => &[],
        }
    }
}

#[derive(Clone)]
pub struct LivenessProber {
    inspector: Arc<dyn ProcessInspector>,
}

impl LivenessProber {
    pub fn new(inspector: Arc<dyn ProcessInspector>) -> Self {
        Self { inspector }
    }

    pub fn probe<'a, I>(&self, sessions: I) -> ProbeOutcome
    where
        I: IntoIterator<Item = &'a SessionRecord>,
    {
        let mut by_pid: BTreeMap<u32, Vec<&str>> = BTreeMap::new();
        for record in sessions {
            if let Some(pid) = record.agent_pid() {
                by_pid.entry(pid).or_default().push(record.id.as_str());
            }
        }

        if by_pid.is_empty() {
            return ProbeOutcome::Conclusive { dead: Vec::new() };
        }

        let pids: Vec<u32> = by_pid.keys().copied().collect();
        let alive = match self.inspector.are_alive(&pids) {
            Ok(alive) => alive,
            Err(err) => {
                warn!(error = %err, count = pids.len(), "Liveness probe inconclusive; keeping all sessions");
                return ProbeOutcome::Inconclusive {
                    reason: err.to_string(),
                };
            }
        };

        let mut dead: Vec<String> = by_pid
            .into_iter()
            .filter(|(pid, _)| !alive.contains(pid))
            .flat_map(|(_, ids)| ids.into_iter().map(str::to_string))
            .collect();
        dead.sort();

        debug!(probed = pids.len(), dead = dead.len(), "Liveness probe complete");
        ProbeOutcome::Conclusive { dead }
    }
}
