//! File-backed session persistence: one JSON file per session.
//!
//! Producers (agent hooks) are the authoritative writers; each session file has
//! exactly one of them. The only other writer is the window that clears a
//! session's attention flag after focusing it, and that race is resolved by
//! last-write-wins. No cross-process lock is ever taken.
//!
//! # Defensive Reads
//!
//! A reader can observe the directory at any point of a concurrent write, so
//! [`SessionStore::read_all`] skips (and logs) any single file that is empty,
//! truncated, or otherwise unparsable, and returns everything else. A missing
//! directory is created and reads as empty.
//!
//! # Atomic Writes
//!
//! Uses temp file + rename so readers never see a half-written record. Temp
//! files carry no `.json` extension and are ignored by readers.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use agent_focus_protocol::{validate_session_id, SessionRecord, SESSION_FILE_EXTENSION};
use fs_err as fs;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{FocusError, Result};

/// Reads, writes and deletes session files in one directory.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir
            .join(agent_focus_protocol::session_file_name(session_id))
    }

    /// Reads every session file. Unreadable files are skipped, never fatal.
    pub fn read_all(&self) -> Result<BTreeMap<String, SessionRecord>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                self.ensure_dir()?;
                return Ok(BTreeMap::new());
            }
            Err(err) => {
                return Err(FocusError::io(
                    format!("Failed to list {}", self.dir.display()),
                    err,
                ))
            }
        };

        let mut sessions = BTreeMap::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(stem) = session_file_stem(&path) else {
                continue;
            };

            match read_record(&path) {
                Ok(Some(mut record)) => {
                    if record.id != stem {
                        debug!(
                            file = %path.display(),
                            recorded_id = %record.id,
                            "Session id differs from file name; using file name"
                        );
                        record.id = stem.to_string();
                    }
                    if record.needs_attention() && record.reason.is_none() {
                        debug!(session = %record.id, "Attention record without reason");
                    }
                    sessions.insert(record.id.clone(), record);
                }
                Ok(None) => {
                    debug!(file = %path.display(), "Session file vanished or empty; skipping");
                }
                Err(err) => {
                    warn!(session = %stem, error = %err, "Skipping unreadable session file");
                }
            }
        }

        Ok(sessions)
    }

    /// Reads one session, treating a missing or mid-write file as absent.
    pub fn read(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        validate(session_id)?;
        read_record(&self.path_for(session_id))
    }

    /// Persists `record` as `<id>.json` via temp file + rename.
    pub fn write(&self, record: &SessionRecord) -> Result<()> {
        validate(&record.id)?;
        self.ensure_dir()?;

        let content = serde_json::to_vec_pretty(record)
            .map_err(|err| FocusError::json("Failed to serialize session", err))?;

        let mut temp_file = NamedTempFile::new_in(&self.dir)
            .map_err(|err| FocusError::io("Failed to create temp session file", err))?;
        temp_file
            .write_all(&content)
            .map_err(|err| FocusError::io("Failed to write temp session file", err))?;
        temp_file
            .flush()
            .map_err(|err| FocusError::io("Failed to flush temp session file", err))?;
        temp_file
            .persist(self.path_for(&record.id))
            .map_err(|err| FocusError::io("Failed to commit session file", err.error))?;

        Ok(())
    }

    /// Deletes the files for `ids`. Already-missing files are not an error.
    /// Returns the ids whose file was actually removed by this call.
    pub fn delete<'a, I>(&self, ids: I) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let ids: BTreeSet<&String> = ids.into_iter().collect();
        for id in &ids {
            validate(id)?;
        }

        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            match fs::remove_file(self.path_for(id)) {
                Ok(()) => removed.push(id.clone()),
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    debug!(session = %id, "Session file already gone");
                }
                Err(err) => {
                    warn!(session = %id, error = %err, "Failed to delete session file");
                }
            }
        }
        Ok(removed)
    }

    fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .map_err(|err| FocusError::io("Failed to create sessions directory", err))
    }
}

/// Stem of a session file (`<id>.json`), or `None` for anything else.
pub(crate) fn session_file_stem(path: &Path) -> Option<&str> {
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(SESSION_FILE_EXTENSION));
    if !is_json {
        return None;
    }
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty() && !stem.starts_with('.'))
}

fn read_record(path: &Path) -> Result<Option<SessionRecord>> {
    let content = match fs::read(path) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(FocusError::io("Failed to read session file", err)),
    };

    // Defensive: a producer may have truncated the file but not written it yet
    if content.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    serde_json::from_slice(&content)
        .map(Some)
        .map_err(|err| FocusError::json(format!("Failed to parse {}", path.display()), err))
}

fn validate(session_id: &str) -> Result<()> {
    validate_session_id(session_id).map_err(|reason| FocusError::invalid_id(session_id, reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_focus_protocol::SessionStatus;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn record(id: &str) -> SessionRecord {
        SessionRecord::running(id, "/repo/a", Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
    }

    #[test]
    fn missing_directory_is_created_and_empty() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("sessions");
        let store = SessionStore::new(&dir);

        assert!(store.read_all().unwrap().is_empty());
        assert!(dir.is_dir());
    }

    #[test]
    fn write_then_read_all_round_trips_every_field() {
        let temp = tempdir().unwrap();
        let store = SessionStore::new(temp.path());
        let full = SessionRecord::attention(
            "ppid-7",
            "permission_prompt",
            "/repo/b",
            Utc.with_ymd_and_hms(2024, 2, 3, 4, 5, 6).unwrap(),
        )
        .unwrap()
        .with_terminal_pid(Some(6))
        .with_window_identity(Some("win-a".to_string()));
        let sparse = record("ppid-8");

        store.write(&full).unwrap();
        store.write(&sparse).unwrap();

        let sessions = store.read_all().unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions["ppid-7"], full);
        assert_eq!(sessions["ppid-8"], sparse);

        let raw = fs::read_to_string(store.path_for("ppid-8")).unwrap();
        assert!(!raw.contains("reason"));
        assert!(!raw.contains("terminalPid"));
        assert!(!raw.contains("windowIdentity"));
    }

    #[test]
    fn corrupt_and_partial_files_are_skipped_not_fatal() {
        let temp = tempdir().unwrap();
        let store = SessionStore::new(temp.path());
        store.write(&record("ppid-1")).unwrap();
        fs::write(temp.path().join("ppid-2.json"), "{\"id\":\"ppid-2\",\"sta").unwrap();
        fs::write(temp.path().join("ppid-3.json"), "").unwrap();

        let sessions = store.read_all().unwrap();
        assert_eq!(sessions.keys().collect::<Vec<_>>(), vec!["ppid-1"]);
    }

    #[test]
    fn non_session_files_are_ignored() {
        let temp = tempdir().unwrap();
        let store = SessionStore::new(temp.path());
        store.write(&record("ppid-1")).unwrap();
        fs::write(temp.path().join(".tmpAbc12"), "{}").unwrap();
        fs::write(temp.path().join("notes.txt"), "hello").unwrap();

        assert_eq!(store.read_all().unwrap().len(), 1);
    }

    #[test]
    fn file_name_wins_over_recorded_id() {
        let temp = tempdir().unwrap();
        let store = SessionStore::new(temp.path());
        let json = serde_json::to_string(&record("something-else")).unwrap();
        fs::write(temp.path().join("ppid-5.json"), json).unwrap();

        let sessions = store.read_all().unwrap();
        assert_eq!(sessions["ppid-5"].id, "ppid-5");
    }

    #[test]
    fn write_overwrites_whole_file() {
        let temp = tempdir().unwrap();
        let store = SessionStore::new(temp.path());
        let first = SessionRecord::attention("s1", "permission_prompt", "/repo", Utc::now())
            .unwrap();
        store.write(&first).unwrap();

        let second = SessionRecord::idle("s1", "/repo", Utc::now());
        store.write(&second).unwrap();

        let read = store.read("s1").unwrap().unwrap();
        assert_eq!(read.status, SessionStatus::Idle);
        assert!(read.reason.is_none());
    }

    #[test]
    fn delete_reports_only_removed_files() {
        let temp = tempdir().unwrap();
        let store = SessionStore::new(temp.path());
        store.write(&record("ppid-1")).unwrap();

        let ids = vec!["ppid-1".to_string(), "ppid-2".to_string()];
        let removed = store.delete(&ids).unwrap();
        assert_eq!(removed, vec!["ppid-1".to_string()]);
        assert!(!store.path_for("ppid-1").exists());
    }

    #[test]
    fn invalid_ids_are_rejected() {
        let temp = tempdir().unwrap();
        let store = SessionStore::new(temp.path());
        let mut bad = record("x");
        bad.id = "../escape".to_string();

        assert!(matches!(
            store.write(&bad),
            Err(FocusError::InvalidSessionId { .. })
        ));
        assert!(store.read("..").is_err());
    }
}
