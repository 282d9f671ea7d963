//! FocusEngine - one window's view of every agent session.
//!
//! The engine owns the registry, the liveness prober, the terminal resolver and
//! its affinity map, the focus router and the alias store. It is explicitly
//! constructed with its platform seams ([`ProcessInspector`], [`TerminalHost`]);
//! nothing here is global.
//!
//! ## Event loop
//!
//! [`FocusEngine::run`] drives everything on the calling thread. Inputs:
//! - the directory notifier (debounced "sessions changed" signal)
//! - the liveness timer (`liveness_interval_secs`)
//! - the focus-request poll timer (`focus_poll_ms`)
//! - the terminal-change poll (`terminal_poll_ms`)
//! - an [`EngineHandle`], for refresh and shutdown from other threads
//!
//! Every input funnels into the same full reload, so a burst of triggers costs
//! at most a few redundant reads.
//!
//! ## Example
//!
//! ```rust,ignore
//! let mut engine = FocusEngine::new(storage, settings, inspector, host);
//! engine.start()?;
//! let handle = engine.handle();
//! std::thread::spawn(move || { /* … */ handle.shutdown(); });
//! engine.run()?;
//! ```

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use agent_focus_protocol::{FocusRequest, SessionRecord};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::affinity::{AffinityTracker, ResolvedVia, TerminalBatch, TerminalResolver};
use crate::aliases::AliasStore;
use crate::error::{FocusError, Result};
use crate::focus::{FocusRouter, PollOutcome, WindowTarget};
use crate::host::{TerminalHost, TerminalId};
use crate::liveness::{LivenessProber, ProbeOutcome};
use crate::process::ProcessInspector;
use crate::registry::{RegistrySnapshot, SessionRegistry};
use crate::settings::Settings;
use crate::storage::StorageConfig;
use crate::store::SessionStore;
use crate::watcher::DirectoryNotifier;

/// Result of a cleanup or bulk removal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed_count: usize,
    pub removed_ids: Vec<String>,
}

impl CleanupReport {
    fn from_removed(removed_ids: Vec<String>) -> Self {
        Self {
            removed_count: removed_ids.len(),
            removed_ids,
        }
    }
}

/// What [`FocusEngine::focus_session`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FocusOutcome {
    /// The session lives in this window and its terminal was shown.
    Focused {
        terminal: TerminalId,
        via: ResolvedVia,
        cleared_attention: bool,
    },
    /// The session belongs to another window; a focus request was written.
    Broadcast { delivered: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopEvent {
    SessionsChanged,
    Refresh,
    Shutdown,
}

/// Cross-thread control of a running engine.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: Sender<LoopEvent>,
}

impl EngineHandle {
    /// Asks the loop for a full reload. Returns `false` once the engine is gone.
    pub fn refresh(&self) -> bool {
        self.tx.send(LoopEvent::Refresh).is_ok()
    }

    pub fn shutdown(&self) -> bool {
        self.tx.send(LoopEvent::Shutdown).is_ok()
    }
}

/// Next due time for each periodic input.
struct Schedule {
    liveness: Option<(Instant, Duration)>,
    focus_poll: (Instant, Duration),
    terminals: Option<(Instant, Duration)>,
}

impl Schedule {
    fn new(settings: &Settings, now: Instant) -> Self {
        Self {
            liveness: settings
                .liveness_interval()
                .map(|interval| (now + interval, interval)),
            focus_poll: (
                now + settings.focus_poll_interval(),
                settings.focus_poll_interval(),
            ),
            terminals: settings
                .terminal_poll_interval()
                .map(|interval| (now + interval, interval)),
        }
    }

    fn next_deadline(&self) -> Instant {
        [
            self.liveness.map(|(due, _)| due),
            Some(self.focus_poll.0),
            self.terminals.map(|(due, _)| due),
        ]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(self.focus_poll.0)
    }
}

fn take_due(slot: &mut (Instant, Duration), now: Instant) -> bool {
    if now < slot.0 {
        return false;
    }
    slot.0 = now + slot.1;
    true
}

pub struct FocusEngine {
    storage: StorageConfig,
    settings: Settings,
    host: Arc<dyn TerminalHost>,
    registry: SessionRegistry,
    prober: LivenessProber,
    resolver: TerminalResolver,
    affinity: AffinityTracker,
    router: FocusRouter,
    aliases: AliasStore,
    events_tx: Sender<LoopEvent>,
    events_rx: Receiver<LoopEvent>,
}

impl FocusEngine {
    pub fn new(
        storage: StorageConfig,
        settings: Settings,
        inspector: Arc<dyn ProcessInspector>,
        host: Arc<dyn TerminalHost>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            registry: SessionRegistry::new(SessionStore::new(storage.sessions_dir())),
            prober: LivenessProber::new(Arc::clone(&inspector)),
            resolver: TerminalResolver::new(
                inspector,
                settings.ancestry_max_depth,
                settings.ancestry_ttl(),
            ),
            affinity: AffinityTracker::new(),
            router: FocusRouter::new(storage.focus_request_file(), settings.focus_stale_after()),
            aliases: AliasStore::load(storage.aliases_file()),
            storage,
            settings,
            host,
            events_tx,
            events_rx,
        }
    }

    pub fn storage(&self) -> &StorageConfig {
        &self.storage
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            tx: self.events_tx.clone(),
        }
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        self.registry.snapshot()
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn aliases(&self) -> &AliasStore {
        &self.aliases
    }

    /// Registers a listener called with the new snapshot after every reload.
    pub fn subscribe<F>(&mut self, listener: F)
    where
        F: FnMut(&RegistrySnapshot) + Send + 'static,
    {
        self.registry.subscribe(listener);
    }

    /// Sessions whose cwd lies inside this window's workspace, most recent first.
    pub fn sessions_for_window(&self) -> Vec<SessionRecord> {
        let roots = self.host.workspace_roots();
        self.registry
            .get_filtered(roots.as_slice())
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn display_name(&self, session: &SessionRecord) -> String {
        self.aliases.display_name(session)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────────

    /// Eager reload, liveness probe and focus poll, so the window is current
    /// before the first timer fires.
    pub fn start(&mut self) -> Result<()> {
        self.refresh_now()?;
        if let Err(err) = self.cleanup_now() {
            warn!(error = %err, "Startup cleanup failed");
        }
        self.poll_focus_request();
        info!(
            sessions = self.registry.snapshot().len(),
            window = ?self.host.window_identity(),
            "Focus engine started"
        );
        Ok(())
    }

    /// Runs the event loop until [`EngineHandle::shutdown`] is called.
    pub fn run(&mut self) -> Result<()> {
        let tx = self.events_tx.clone();
        let notifier = DirectoryNotifier::spawn(
            self.storage.sessions_dir(),
            self.settings.debounce(),
            self.settings.rearm_delay(),
            move || tx.send(LoopEvent::SessionsChanged).is_ok(),
        )?;

        let mut schedule = Schedule::new(&self.settings, Instant::now());
        loop {
            let timeout = schedule
                .next_deadline()
                .saturating_duration_since(Instant::now());

            match self.events_rx.recv_timeout(timeout) {
                Ok(LoopEvent::SessionsChanged) | Ok(LoopEvent::Refresh) => {
                    if self.drain_pending() {
                        break;
                    }
                    if let Err(err) = self.refresh_now() {
                        warn!(error = %err, "Reload failed; keeping previous sessions");
                    }
                }
                Ok(LoopEvent::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }

            let now = Instant::now();
            if schedule
                .liveness
                .as_mut()
                .is_some_and(|slot| take_due(slot, now))
            {
                if let Err(err) = self.cleanup_now() {
                    warn!(error = %err, "Periodic cleanup failed");
                }
                self.resolver.purge_expired();
            }
            if take_due(&mut schedule.focus_poll, now) {
                self.poll_focus_request();
            }
            if schedule
                .terminals
                .as_mut()
                .is_some_and(|slot| take_due(slot, now))
            {
                self.check_terminals();
            }
        }

        notifier.stop();
        info!("Focus engine stopped");
        Ok(())
    }

    /// Swallows queued reload triggers; one reload covers them all. Returns
    /// `true` if a shutdown was queued among them.
    fn drain_pending(&self) -> bool {
        while let Ok(event) = self.events_rx.try_recv() {
            if event == LoopEvent::Shutdown {
                return true;
            }
        }
        false
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Commands
    // ─────────────────────────────────────────────────────────────────────────────

    /// Full reload from disk. Affinities of vanished sessions are dropped.
    pub fn refresh_now(&mut self) -> Result<RegistrySnapshot> {
        let snapshot = self.registry.reload()?;
        self.affinity.prune_sessions(|id| snapshot.contains(id));
        Ok(snapshot)
    }

    /// Probes every known session once and deletes the dead ones. An
    /// inconclusive probe removes nothing.
    pub fn cleanup_now(&mut self) -> Result<CleanupReport> {
        let snapshot = self.refresh_now()?;
        let outcome = self.prober.probe(snapshot.all());
        let dead = match outcome {
            ProbeOutcome::Conclusive { dead } => dead,
            ProbeOutcome::Inconclusive { reason } => {
                debug!(reason = %reason, "Skipping cleanup");
                return Ok(CleanupReport::default());
            }
        };
        if dead.is_empty() {
            return Ok(CleanupReport::default());
        }

        let removed = self.registry.remove(&dead)?;
        for id in &removed {
            self.affinity.forget_session(id);
        }
        info!(count = removed.len(), ids = ?removed, "Reclaimed dead sessions");
        Ok(CleanupReport::from_removed(removed))
    }

    pub fn remove_all(&mut self) -> Result<CleanupReport> {
        let removed = self.registry.remove_all()?;
        self.affinity.prune_sessions(|_| false);
        Ok(CleanupReport::from_removed(removed))
    }

    /// Names the session's working directory. A blank alias removes the name.
    /// Returns the session's display name afterwards.
    pub fn rename_session(&mut self, session_id: &str, alias: &str) -> Result<String> {
        let session = self.lookup(session_id)?;
        let cwd = session
            .cwd
            .as_deref()
            .filter(|cwd| !cwd.trim().is_empty())
            .ok_or_else(|| FocusError::MissingCwd(session_id.to_string()))?;
        self.aliases.set(cwd, alias)?;
        Ok(self.aliases.display_name(&session))
    }

    /// Removes the alias for the session's working directory.
    pub fn unalias_session(&mut self, session_id: &str) -> Result<bool> {
        let session = self.lookup(session_id)?;
        match session.cwd.as_deref() {
            Some(cwd) => self.aliases.remove(cwd),
            None => Ok(false),
        }
    }

    /// Focuses the session here if this window owns it, otherwise broadcasts a
    /// request for the owning window.
    pub fn focus_session(&mut self, session_id: &str) -> Result<FocusOutcome> {
        let session = self.lookup(session_id)?;
        if self.window_target().owns_session(&session) {
            return self.focus_locally(&session);
        }
        let delivered = self.router.request_focus(&session, Utc::now());
        Ok(FocusOutcome::Broadcast { delivered })
    }

    /// One poll of the shared focus-request file. A claimed request activates
    /// this window and focuses the session's terminal; every failure on that
    /// path is logged and swallowed.
    pub fn poll_focus_request(&mut self) -> PollOutcome {
        let target = self.window_target();
        let outcome = self.router.poll(&target, Utc::now());
        if let PollOutcome::Claimed(request, _) = &outcome {
            self.act_on_request(request);
        }
        outcome
    }

    fn act_on_request(&mut self, request: &FocusRequest) {
        if let Err(err) = self.host.activate_window() {
            warn!(error = %err, "Failed to activate window");
        }

        let session = match self.lookup(&request.session_id) {
            Ok(session) => session,
            Err(err) => {
                warn!(session = %request.session_id, error = %err, "Claimed focus request for unknown session");
                return;
            }
        };
        if let Err(err) = self.focus_locally(&session) {
            warn!(session = %session.id, error = %err, "Failed to focus claimed session");
        }
    }

    fn focus_locally(&mut self, session: &SessionRecord) -> Result<FocusOutcome> {
        let terminals = self.host.open_terminals()?;
        self.affinity.terminals_changed(&terminals);

        let mut batch = TerminalBatch::new(self.host.as_ref(), terminals);
        let resolution = self
            .resolver
            .resolve_and_remember(session, &mut batch, &mut self.affinity)
            .ok_or_else(|| FocusError::NoTerminal(session.id.clone()))?;
        self.host.show_terminal(&resolution.terminal)?;
        debug!(session = %session.id, terminal = %resolution.terminal, via = ?resolution.via, "Showed terminal");

        let cleared_attention = session.needs_attention() && self.clear_attention(&session.id);
        Ok(FocusOutcome::Focused {
            terminal: resolution.terminal,
            via: resolution.via,
            cleared_attention,
        })
    }

    fn clear_attention(&mut self, session_id: &str) -> bool {
        match self.registry.clear_attention(session_id) {
            Ok(cleared) => cleared,
            Err(FocusError::SessionNotFound(_)) => false,
            Err(err) => {
                warn!(session = %session_id, error = %err, "Failed to clear attention");
                false
            }
        }
    }

    fn check_terminals(&mut self) {
        match self.host.open_terminals() {
            Ok(terminals) => {
                if self.affinity.terminals_changed(&terminals) {
                    debug!(open = terminals.len(), "Terminal set changed; affinities reset");
                }
            }
            Err(err) => debug!(error = %err, "Could not list terminals"),
        }
    }

    /// The session as currently on disk; reloads once on a miss.
    fn lookup(&mut self, session_id: &str) -> Result<SessionRecord> {
        if let Some(session) = self.registry.get(session_id) {
            return Ok(session.clone());
        }
        self.refresh_now()?
            .get(session_id)
            .cloned()
            .ok_or_else(|| FocusError::SessionNotFound(session_id.to_string()))
    }

    fn window_target(&self) -> WindowTarget {
        WindowTarget::new(self.host.window_identity(), self.host.workspace_roots())
    }
}
