//! Session → terminal resolution.
//!
//! Given a session and the terminals open in this window, find the one terminal
//! hosting the agent. Resolution order:
//!
//! 1. A remembered affinity whose terminal is still open.
//! 2. The only open terminal, if there is exactly one.
//! 3. Fast path: the session's recorded `terminalPid` equals a terminal's shell pid.
//! 4. Slow path (records without `terminalPid`): walk the agent's ancestry
//!    (parent, grandparent, …) up to a depth bound, looking for a terminal's
//!    shell pid. Walked chains are memoized per agent pid for a TTL, since a
//!    process's ancestry never changes while it lives.
//! 5. Otherwise no match. Choosing among candidates is the caller's job.
//!
//! Terminal pids are queried at most once per [`TerminalBatch`], however many
//! sessions are resolved against it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use agent_focus_protocol::SessionRecord;
use tracing::{debug, warn};

use crate::error::ProbeError;
use crate::host::{TerminalHost, TerminalId};
use crate::process::ProcessInspector;

/// How a terminal was matched to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedVia {
    Affinity,
    OnlyTerminal,
    TerminalPid,
    Ancestry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub terminal: TerminalId,
    pub via: ResolvedVia,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Terminal Batch
// ═══════════════════════════════════════════════════════════════════════════════

/// Snapshot of the open terminals for one round of resolutions. The
/// pid → terminal map is built lazily, on first need, and only once.
pub struct TerminalBatch<'h> {
    host: &'h dyn TerminalHost,
    terminals: Vec<TerminalId>,
    by_pid: Option<HashMap<u32, TerminalId>>,
}

impl<'h> TerminalBatch<'h> {
    pub fn new(host: &'h dyn TerminalHost, terminals: Vec<TerminalId>) -> Self {
        Self {
            host,
            terminals,
            by_pid: None,
        }
    }

    pub fn terminals(&self) -> &[TerminalId] {
        &self.terminals
    }

    pub fn contains(&self, terminal: &TerminalId) -> bool {
        self.terminals.contains(terminal)
    }

    fn by_pid(&mut self) -> &HashMap<u32, TerminalId> {
        if self.by_pid.is_none() {
            let mut map = HashMap::with_capacity(self.terminals.len());
            for terminal in &self.terminals {
                match self.host.terminal_pid(terminal) {
                    Ok(Some(pid)) => {
                        map.insert(pid, terminal.clone());
                    }
                    Ok(None) => {}
                    Err(err) => {
                        debug!(terminal = %terminal, error = %err, "Terminal pid unavailable");
                    }
                }
            }
            self.by_pid = Some(map);
        }
        self.by_pid.get_or_insert_with(HashMap::new)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Affinity Tracker
// ═══════════════════════════════════════════════════════════════════════════════

/// Remembered session ↔ terminal pairings for one window. Each session maps to
/// at most one terminal and vice versa.
#[derive(Debug, Default)]
pub struct AffinityTracker {
    by_session: HashMap<String, TerminalId>,
    by_terminal: HashMap<TerminalId, String>,
    known_terminals: Vec<TerminalId>,
}

impl AffinityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn terminal_for(&self, session_id: &str) -> Option<&TerminalId> {
        self.by_session.get(session_id)
    }

    pub fn session_for(&self, terminal: &TerminalId) -> Option<&str> {
        self.by_terminal.get(terminal).map(String::as_str)
    }

    pub fn record(&mut self, session_id: &str, terminal: &TerminalId) {
        if let Some(previous) = self.by_session.remove(session_id) {
            self.by_terminal.remove(&previous);
        }
        if let Some(previous) = self.by_terminal.remove(terminal) {
            self.by_session.remove(&previous);
        }
        self.by_session
            .insert(session_id.to_string(), terminal.clone());
        self.by_terminal
            .insert(terminal.clone(), session_id.to_string());
    }

    pub fn forget_session(&mut self, session_id: &str) {
        if let Some(terminal) = self.by_session.remove(session_id) {
            self.by_terminal.remove(&terminal);
        }
    }

    pub fn terminal_closed(&mut self, terminal: &TerminalId) {
        if let Some(session_id) = self.by_terminal.remove(terminal) {
            self.by_session.remove(&session_id);
        }
    }

    /// Invalidates every pairing when the set of open terminals differs from
    /// the last one seen. A pairing made while one terminal was open is not
    /// trustworthy once a second one appears. Returns whether anything changed.
    pub fn terminals_changed(&mut self, open: &[TerminalId]) -> bool {
        let mut open = open.to_vec();
        open.sort();
        if open == self.known_terminals {
            return false;
        }
        self.known_terminals = open;
        self.by_session.clear();
        self.by_terminal.clear();
        true
    }

    /// Drops pairings whose session no longer exists.
    pub fn prune_sessions<F>(&mut self, mut is_live: F)
    where
        F: FnMut(&str) -> bool,
    {
        let gone: Vec<String> = self
            .by_session
            .keys()
            .filter(|id| !is_live(id))
            .cloned()
            .collect();
        for session_id in gone {
            self.forget_session(&session_id);
        }
    }

    pub fn len(&self) -> usize {
        self.by_session.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_session.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Ancestry Cache
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct AncestryChain {
    /// `[agent, parent, grandparent, …]`
    pids: Vec<u32>,
    /// The walk reached the root or the depth bound; nothing left to query.
    complete: bool,
    walked_at: Instant,
}

/// Memoized ancestry walks, keyed by agent pid.
#[derive(Debug)]
pub struct AncestryCache {
    chains: HashMap<u32, AncestryChain>,
    max_depth: usize,
    ttl: Duration,
}

impl AncestryCache {
    pub fn new(max_depth: usize, ttl: Duration) -> Self {
        Self {
            chains: HashMap::new(),
            max_depth,
            ttl,
        }
    }

    /// Walks up from `agent_pid` until a pid in `targets` is found, the root
    /// is reached, or `max_depth` parents have been visited. Resumes a cached
    /// partial walk instead of starting over.
    pub fn find_ancestor<F>(
        &mut self,
        inspector: &dyn ProcessInspector,
        agent_pid: u32,
        mut is_target: F,
    ) -> Result<Option<u32>, ProbeError>
    where
        F: FnMut(u32) -> bool,
    {
        let now = Instant::now();
        let mut chain = match self.chains.remove(&agent_pid) {
            Some(chain) if now.duration_since(chain.walked_at) < self.ttl => chain,
            _ => AncestryChain {
                pids: vec![agent_pid],
                complete: false,
                walked_at: now,
            },
        };

        let mut found = chain.pids.iter().copied().find(|pid| is_target(*pid));
        let mut outcome = Ok(());

        while found.is_none() && !chain.complete {
            if chain.pids.len() > self.max_depth {
                chain.complete = true;
                break;
            }
            let current = chain.pids[chain.pids.len() - 1];
            match inspector.parent_pid(current) {
                Ok(Some(parent)) if !chain.pids.contains(&parent) => {
                    chain.pids.push(parent);
                    if parent <= 1 {
                        chain.complete = true;
                    }
                    if is_target(parent) {
                        found = Some(parent);
                    }
                }
                Ok(_) => chain.complete = true,
                Err(err) => {
                    outcome = Err(err);
                    break;
                }
            }
        }

        self.chains.insert(agent_pid, chain);
        outcome.map(|()| found)
    }

    pub fn purge_expired(&mut self) {
        let ttl = self.ttl;
        let now = Instant::now();
        self.chains
            .retain(|_, chain| now.duration_since(chain.walked_at) < ttl);
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Resolver
// ═══════════════════════════════════════════════════════════════════════════════

pub struct TerminalResolver {
    inspector: Arc<dyn ProcessInspector>,
    ancestry: AncestryCache,
}

impl TerminalResolver {
    pub fn new(inspector: Arc<dyn ProcessInspector>, max_depth: usize, ttl: Duration) -> Self {
        Self {
            inspector,
            ancestry: AncestryCache::new(max_depth, ttl),
        }
    }

    /// Resolves `session` against `batch`. A stale affinity (terminal closed) is
    /// dropped on the way. Does not record new affinities; see
    /// [`TerminalResolver::resolve_and_remember`].
    pub fn resolve(
        &mut self,
        session: &SessionRecord,
        batch: &mut TerminalBatch<'_>,
        affinity: &mut AffinityTracker,
    ) -> Option<Resolution> {
        if let Some(terminal) = affinity.terminal_for(&session.id).cloned() {
            if batch.contains(&terminal) {
                return Some(Resolution {
                    terminal,
                    via: ResolvedVia::Affinity,
                });
            }
            affinity.terminal_closed(&terminal);
        }

        match batch.terminals() {
            [] => return None,
            [only] => {
                return Some(Resolution {
                    terminal: only.clone(),
                    via: ResolvedVia::OnlyTerminal,
                })
            }
            _ => {}
        }

        if let Some(terminal_pid) = session.terminal_pid {
            return batch.by_pid().get(&terminal_pid).map(|terminal| Resolution {
                terminal: terminal.clone(),
                via: ResolvedVia::TerminalPid,
            });
        }

        let agent_pid = session.agent_pid()?;
        let by_pid = batch.by_pid();
        if by_pid.is_empty() {
            return None;
        }
        match self
            .ancestry
            .find_ancestor(self.inspector.as_ref(), agent_pid, |pid| by_pid.contains_key(&pid))
        {
            Ok(Some(pid)) => by_pid.get(&pid).map(|terminal| Resolution {
                terminal: terminal.clone(),
                via: ResolvedVia::Ancestry,
            }),
            Ok(None) => None,
            Err(err) => {
                warn!(session = %session.id, error = %err, "Ancestry walk inconclusive");
                None
            }
        }
    }

    /// [`TerminalResolver::resolve`], then records the pairing so the next
    /// lookup short-circuits.
    pub fn resolve_and_remember(
        &mut self,
        session: &SessionRecord,
        batch: &mut TerminalBatch<'_>,
        affinity: &mut AffinityTracker,
    ) -> Option<Resolution> {
        let resolution = self.resolve(session, batch, affinity)?;
        affinity.record(&session.id, &resolution.terminal);
        Some(resolution)
    }

    /// Resolves every session against one batch (terminal pids are queried once).
    pub fn resolve_all<'s, I>(
        &mut self,
        sessions: I,
        batch: &mut TerminalBatch<'_>,
        affinity: &mut AffinityTracker,
    ) -> HashMap<String, TerminalId>
    where
        I: IntoIterator<Item = &'s SessionRecord>,
    {
        sessions
            .into_iter()
            .filter_map(|session| {
                self.resolve_and_remember(session, batch, affinity)
                    .map(|resolution| (session.id.clone(), resolution.terminal))
            })
            .collect()
    }

    pub fn purge_expired(&mut self) {
        self.ancestry.purge_expired();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingHost, ScriptedInspector};
    use chrono::Utc;

    const TTL: Duration = Duration::from_secs(600);

    fn session(id: &str, terminal_pid: Option<u32>) -> SessionRecord {
        SessionRecord::running(id, "/repo", Utc::now()).with_terminal_pid(terminal_pid)
    }

    fn resolver(inspector: &Arc<ScriptedInspector>) -> TerminalResolver {
        TerminalResolver::new(inspector.clone(), 15, TTL)
    }

    fn batch(host: &RecordingHost) -> TerminalBatch<'_> {
        TerminalBatch::new(host, host.open_terminals().unwrap())
    }

    #[test]
    fn distinct_terminal_pids_resolve_to_distinct_terminals() {
        let host = RecordingHost::new(None, &[]);
        let first = host.add_terminal("t1", Some(11));
        let second = host.add_terminal("t2", Some(22));
        host.add_terminal("t3", Some(33));
        let inspector = Arc::new(ScriptedInspector::default());
        let mut resolver = resolver(&inspector);
        let mut affinity = AffinityTracker::new();
        let mut batch = batch(&host);

        let sessions = [session("ppid-1", Some(11)), session("ppid-2", Some(22))];
        let resolved = resolver.resolve_all(&sessions, &mut batch, &mut affinity);

        assert_eq!(resolved["ppid-1"], first);
        assert_eq!(resolved["ppid-2"], second);
        // pid map built once for the batch, not once per session
        assert_eq!(host.pid_queries(), 3);
        assert_eq!(inspector.parent_calls(), 0);
    }

    #[test]
    fn unknown_terminal_pid_does_not_fall_back_to_ancestry() {
        let host = RecordingHost::new(None, &[]);
        host.add_terminal("t1", Some(11));
        host.add_terminal("t2", Some(22));
        let inspector = Arc::new(ScriptedInspector::default());
        inspector.set_parent(100, 11);
        let mut resolver = resolver(&inspector);

        let resolution = resolver.resolve(
            &session("ppid-100", Some(99)),
            &mut batch(&host),
            &mut AffinityTracker::new(),
        );
        assert!(resolution.is_none());
        assert_eq!(inspector.parent_calls(), 0);
    }

    #[test]
    fn single_terminal_is_returned_unconditionally() {
        let host = RecordingHost::new(None, &[]);
        let only = host.add_terminal("t1", Some(11));
        let inspector = Arc::new(ScriptedInspector::default());
        let mut resolver = resolver(&inspector);

        let resolution = resolver
            .resolve(
                &session("ppid-100", Some(999)),
                &mut batch(&host),
                &mut AffinityTracker::new(),
            )
            .unwrap();
        assert_eq!(resolution.terminal, only);
        assert_eq!(resolution.via, ResolvedVia::OnlyTerminal);
        assert_eq!(host.pid_queries(), 0);
    }

    #[test]
    fn remembered_affinity_short_circuits() {
        let host = RecordingHost::new(None, &[]);
        host.add_terminal("t1", Some(11));
        let second = host.add_terminal("t2", Some(22));
        let inspector = Arc::new(ScriptedInspector::default());
        let mut resolver = resolver(&inspector);
        let mut affinity = AffinityTracker::new();
        affinity.record("ppid-1", &second);

        let resolution = resolver
            .resolve(&session("ppid-1", Some(11)), &mut batch(&host), &mut affinity)
            .unwrap();
        assert_eq!(resolution.terminal, second);
        assert_eq!(resolution.via, ResolvedVia::Affinity);
        assert_eq!(host.pid_queries(), 0);
    }

    #[test]
    fn affinity_to_closed_terminal_is_dropped() {
        let host = RecordingHost::new(None, &[]);
        let first = host.add_terminal("t1", Some(11));
        host.add_terminal("t2", Some(22));
        let gone = TerminalId::new("t9");
        let inspector = Arc::new(ScriptedInspector::default());
        let mut resolver = resolver(&inspector);
        let mut affinity = AffinityTracker::new();
        affinity.record("ppid-1", &gone);

        let resolution = resolver
            .resolve_and_remember(&session("ppid-1", Some(11)), &mut batch(&host), &mut affinity)
            .unwrap();
        assert_eq!(resolution.terminal, first);
        assert_eq!(affinity.terminal_for("ppid-1"), Some(&first));
        assert!(affinity.session_for(&gone).is_none());
    }

    #[test]
    fn legacy_records_walk_the_ancestry() {
        let host = RecordingHost::new(None, &[]);
        host.add_terminal("t1", Some(11));
        let shell = host.add_terminal("t2", Some(22));
        let inspector = Arc::new(ScriptedInspector::default());
        // agent 100 → node 90 → shell 22
        inspector.set_parent(100, 90);
        inspector.set_parent(90, 22);
        inspector.set_parent(22, 1);
        let mut resolver = resolver(&inspector);

        let resolution = resolver
            .resolve(
                &session("ppid-100", None),
                &mut batch(&host),
                &mut AffinityTracker::new(),
            )
            .unwrap();
        assert_eq!(resolution.terminal, shell);
        assert_eq!(resolution.via, ResolvedVia::Ancestry);
        // stopped at the match, never asked for the shell's parent
        assert_eq!(inspector.parent_calls(), 2);
    }

    #[test]
    fn ancestry_walks_are_memoized() {
        let host = RecordingHost::new(None, &[]);
        host.add_terminal("t1", Some(11));
        host.add_terminal("t2", Some(22));
        let inspector = Arc::new(ScriptedInspector::default());
        inspector.set_parent(100, 90);
        inspector.set_parent(90, 22);
        let mut resolver = resolver(&inspector);
        let legacy = session("ppid-100", None);

        resolver.resolve(&legacy, &mut batch(&host), &mut AffinityTracker::new());
        resolver.resolve(&legacy, &mut batch(&host), &mut AffinityTracker::new());
        assert_eq!(inspector.parent_calls(), 2);
    }

    #[test]
    fn ancestry_walk_respects_depth_bound() {
        let inspector = ScriptedInspector::default();
        for pid in 1000..1100 {
            inspector.set_parent(pid, pid + 1);
        }
        let mut cache = AncestryCache::new(10, TTL);

        let found = cache.find_ancestor(&inspector, 1000, |pid| pid == 1050).unwrap();
        assert!(found.is_none());
        assert_eq!(inspector.parent_calls(), 10);

        // complete chains are not walked again
        cache.find_ancestor(&inspector, 1000, |pid| pid == 1050).unwrap();
        assert_eq!(inspector.parent_calls(), 10);
    }

    #[test]
    fn ancestry_failure_is_no_match_and_resumable() {
        let host = RecordingHost::new(None, &[]);
        host.add_terminal("t1", Some(11));
        let shell = host.add_terminal("t2", Some(22));
        let inspector = Arc::new(ScriptedInspector::default());
        inspector.set_parent(100, 22);
        inspector.fail_with("timed out");
        let mut resolver = resolver(&inspector);
        let legacy = session("ppid-100", None);

        assert!(resolver
            .resolve(&legacy, &mut batch(&host), &mut AffinityTracker::new())
            .is_none());

        inspector.recover();
        let resolution = resolver
            .resolve(&legacy, &mut batch(&host), &mut AffinityTracker::new())
            .unwrap();
        assert_eq!(resolution.terminal, shell);
    }

    #[test]
    fn session_without_any_pid_is_unresolved() {
        let host = RecordingHost::new(None, &[]);
        host.add_terminal("t1", Some(11));
        host.add_terminal("t2", Some(22));
        let inspector = Arc::new(ScriptedInspector::default());
        let mut resolver = resolver(&inspector);

        assert!(resolver
            .resolve(
                &session("external-token", None),
                &mut batch(&host),
                &mut AffinityTracker::new()
            )
            .is_none());
    }

    #[test]
    fn tracker_keeps_pairings_one_to_one() {
        let mut affinity = AffinityTracker::new();
        let t1 = TerminalId::new("t1");
        let t2 = TerminalId::new("t2");
        affinity.record("a", &t1);
        affinity.record("b", &t1);
        assert!(affinity.terminal_for("a").is_none());
        assert_eq!(affinity.session_for(&t1), Some("b"));

        affinity.record("b", &t2);
        assert!(affinity.session_for(&t1).is_none());

        assert!(affinity.terminals_changed(&[t1.clone(), t2.clone()]));
        assert!(affinity.is_empty());
        assert!(!affinity.terminals_changed(&[t2.clone(), t1.clone()]));

        affinity.record("c", &t1);
        affinity.prune_sessions(|id| id != "c");
        assert!(affinity.is_empty());
    }
}
