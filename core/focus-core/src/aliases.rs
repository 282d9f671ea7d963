//! User-chosen display names, keyed by session cwd.
//!
//! Stored as a flat JSON object in `<stateDir>/aliases.json`:
//!
//! ```json
//! { "/Users/me/repo": "api server" }
//! ```
//!
//! Keys are normalized with [`normalize_path_for_matching`], so an alias set
//! for `/Repo/` also names sessions started in `/repo`.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use agent_focus_protocol::SessionRecord;
use fs_err as fs;
use tempfile::NamedTempFile;
use tracing::warn;

use crate::error::{FocusError, Result};
use crate::path_utils::{last_component, normalize_path_for_matching};

#[derive(Debug, Clone)]
pub struct AliasStore {
    path: PathBuf,
    aliases: BTreeMap<String, String>,
}

impl AliasStore {
    /// Loads aliases from `path`. A missing or unreadable file yields an
    /// empty store; the next write replaces it.
    pub fn load(path: PathBuf) -> Self {
        let aliases = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|err| {
                warn!(path = %path.display(), error = %err, "Ignoring malformed aliases file");
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };
        Self { path, aliases }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, cwd: &str) -> Option<&str> {
        self.aliases
            .get(&normalize_path_for_matching(cwd))
            .map(String::as_str)
    }

    pub fn all(&self) -> &BTreeMap<String, String> {
        &self.aliases
    }

    /// Names `cwd`. A blank name removes the alias instead.
    pub fn set(&mut self, cwd: &str, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return self.remove(cwd).map(|_| ());
        }
        self.aliases
            .insert(normalize_path_for_matching(cwd), name.to_string());
        self.save()
    }

    /// Returns whether an alias existed.
    pub fn remove(&mut self, cwd: &str) -> Result<bool> {
        let existed = self
            .aliases
            .remove(&normalize_path_for_matching(cwd))
            .is_some();
        if existed {
            self.save()?;
        }
        Ok(existed)
    }

    /// Alias for the session's cwd, else the cwd's last component, else the id.
    pub fn display_name(&self, session: &SessionRecord) -> String {
        let cwd = session.cwd.as_deref().filter(|cwd| !cwd.trim().is_empty());
        if let Some(alias) = cwd.and_then(|cwd| self.get(cwd)) {
            return alias.to_string();
        }
        cwd.and_then(last_component)
            .map(str::to_string)
            .unwrap_or_else(|| session.id.clone())
    }

    fn save(&self) -> Result<()> {
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)
            .map_err(|err| FocusError::io("Failed to create aliases directory", err))?;

        let content = serde_json::to_string_pretty(&self.aliases)
            .map_err(|err| FocusError::json("Failed to serialize aliases", err))?;
        let mut temp_file = NamedTempFile::new_in(parent)
            .map_err(|err| FocusError::io("Failed to create temp aliases file", err))?;
        temp_file
            .write_all(content.as_bytes())
            .map_err(|err| FocusError::io("Failed to write aliases", err))?;
        temp_file
            .persist(&self.path)
            .map_err(|err| FocusError::io("Failed to persist aliases", err.error))?;
        Ok(())
    }
}
