//! In-memory projection of the sessions directory.
//!
//! The registry is rebuilt wholesale from the [`SessionStore`] on every
//! [`SessionRegistry::reload`] and published as an immutable
//! [`RegistrySnapshot`]. A reload swaps the whole map at once, so a reader
//! holding a snapshot never sees a half-applied update, and reloading again
//! while a previous snapshot is still in use is always safe.
//!
//! Producers write whole files independently and out of order; there are no
//! per-field merge semantics to patch with, so full reload is the only
//! correct projection. Session counts are small (tens), which keeps it cheap.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use agent_focus_protocol::{SessionRecord, SessionStatus};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::error::{FocusError, Result};
use crate::path_utils::{normalize_path_for_matching, path_is_parent_or_self_normalized};
use crate::store::SessionStore;

pub type SessionMap = BTreeMap<String, SessionRecord>;

/// Per-status session counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub attention: usize,
    pub running: usize,
    pub idle: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.attention + self.running + self.idle
    }
}

/// Immutable view of the registry as of one reload.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    sessions: Arc<SessionMap>,
    generation: u64,
}

impl RegistrySnapshot {
    /// Incremented on every successful reload.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn get(&self, session_id: &str) -> Option<&SessionRecord> {
        self.sessions.get(session_id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.sessions.keys().map(String::as_str)
    }

    /// Every session, most recently updated first.
    pub fn all(&self) -> Vec<&SessionRecord> {
        sorted_recent_first(self.sessions.values())
    }

    /// Sessions in `status`, most recently updated first.
    pub fn get_by_status(&self, status: SessionStatus) -> Vec<&SessionRecord> {
        sorted_recent_first(
            self.sessions
                .values()
                .filter(|record| record.status == status),
        )
    }

    /// Sessions whose `cwd` lies in (or equals) one of `workspace_paths`. With
    /// no workspace paths, every session. Sessions without a cwd only appear
    /// in the unfiltered view.
    pub fn get_filtered<S: AsRef<str>>(&self, workspace_paths: &[S]) -> Vec<&SessionRecord> {
        let roots: Vec<String> = workspace_paths
            .iter()
            .map(|path| normalize_path_for_matching(path.as_ref()))
            .filter(|path| !path.is_empty())
            .collect();
        if roots.is_empty() {
            return self.all();
        }

        sorted_recent_first(self.sessions.values().filter(|record| {
            record.cwd.as_deref().is_some_and(|cwd| {
                let cwd = normalize_path_for_matching(cwd);
                roots
                    .iter()
                    .any(|root| path_is_parent_or_self_normalized(root, &cwd))
            })
        }))
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for record in self.sessions.values() {
            match record.status {
                SessionStatus::Attention => counts.attention += 1,
                SessionStatus::Running => counts.running += 1,
                SessionStatus::Idle => counts.idle += 1,
            }
        }
        counts
    }
}

fn sorted_recent_first<'a, I>(records: I) -> Vec<&'a SessionRecord>
where
    I: Iterator<Item = &'a SessionRecord>,
{
    let mut records: Vec<&SessionRecord> = records.collect();
    records.sort_by(|a, b| {
        b.last_update
            .cmp(&a.last_update)
            .then_with(|| a.id.cmp(&b.id))
    });
    records
}

type Listener = Box<dyn FnMut(&RegistrySnapshot) + Send>;

/// Owner of the current snapshot and the only mutator of derived state.
pub struct SessionRegistry {
    store: SessionStore,
    current: RegistrySnapshot,
    listeners: Vec<Listener>,
}

impl SessionRegistry {
    pub fn new(store: SessionStore) -> Self {
        Self {
            store,
            current: RegistrySnapshot::default(),
            listeners: Vec::new(),
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Cheap handle on the current state.
    pub fn snapshot(&self) -> RegistrySnapshot {
        self.current.clone()
    }

    /// Registers a listener called with the new snapshot after every reload.
    pub fn subscribe<F>(&mut self, listener: F)
    where
        F: FnMut(&RegistrySnapshot) + Send + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    /// Re-reads every session file and swaps in the result. If the directory
    /// itself cannot be listed the previous snapshot is kept.
    pub fn reload(&mut self) -> Result<RegistrySnapshot> {
        let sessions = self.store.read_all()?;
        let next = RegistrySnapshot {
            sessions: Arc::new(sessions),
            generation: self.current.generation + 1,
        };
        debug!(
            generation = next.generation,
            sessions = next.len(),
            "Session registry reloaded"
        );
        self.current = next;

        let snapshot = self.current.clone();
        for listener in &mut self.listeners {
            listener(&snapshot);
        }
        Ok(snapshot)
    }

    pub fn get(&self, session_id: &str) -> Option<&SessionRecord> {
        self.current.get(session_id)
    }

    pub fn get_by_status(&self, status: SessionStatus) -> Vec<&SessionRecord> {
        self.current.get_by_status(status)
    }

    pub fn get_filtered<S: AsRef<str>>(&self, workspace_paths: &[S]) -> Vec<&SessionRecord> {
        self.current.get_filtered(workspace_paths)
    }

    /// Moves an `attention` session back to `running` after the user focused
    /// it: clears `reason`, bumps `lastUpdate`, persists, reloads.
    ///
    /// The file is re-read first so a producer's newer transition is not
    /// clobbered with stale in-memory state. Returns `false` when there was
    /// nothing to clear.
    pub fn clear_attention(&mut self, session_id: &str) -> Result<bool> {
        let Some(mut record) = self.store.read(session_id)? else {
            return Err(FocusError::SessionNotFound(session_id.to_string()));
        };
        if record.status != SessionStatus::Attention {
            debug!(session = %session_id, status = %record.status, "No attention to clear");
            return Ok(false);
        }

        record.status = SessionStatus::Running;
        record.reason = None;
        record.last_update = bumped_timestamp(record.last_update, Utc::now());
        self.store.write(&record)?;
        info!(session = %session_id, "Cleared attention");

        self.reload()?;
        Ok(true)
    }

    /// Deletes the files for `ids` and reloads. Returns the ids actually removed.
    pub fn remove(&mut self, ids: &[String]) -> Result<Vec<String>> {
        let removed = self.store.delete(ids)?;
        if !removed.is_empty() {
            info!(count = removed.len(), "Removed sessions");
        }
        self.reload()?;
        Ok(removed)
    }

    /// Deletes every session file currently on disk.
    pub fn remove_all(&mut self) -> Result<Vec<String>> {
        let on_disk: Vec<String> = self.store.read_all()?.into_keys().collect();
        let known: HashSet<&str> = self.current.ids().collect();
        let ids: Vec<String> = on_disk
            .into_iter()
            .chain(known.into_iter().map(str::to_string))
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        self.remove(&ids)
    }
}

/// `now`, or one millisecond past `previous` if the clock has not moved past it.
fn bumped_timestamp(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    let floor = previous + Duration::milliseconds(1);
    if now > previous {
        now
    } else {
        floor
    }
}
