//! Persisted per-user state: PR-set assignments and merge-check results.
//!
//! # File format
//!
//! One JSON file at `<state-dir>/spr/state.json` carrying, per repository,
//! the `commit-id → PR-set index` map, plus the merge-check high-water-mark
//! (`repo key → last checked commit hash`, or the literal `SKIP`).
//!
//! # Atomic writes
//!
//! The file is written with a write-to-temp-then-rename pattern:
//! 1. Write to `state.json.tmp`
//! 2. fsync the file
//! 3. Rename to `state.json`
//! 4. fsync the directory
//!
//! Readers always see either the old or the new state, never a partial write.

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{CommitId, Sha};

/// Current schema version. Increment when making breaking changes.
pub const SCHEMA_VERSION: u32 = 1;

/// Sentinel accepted in place of a checked commit hash: skip the gate.
pub const MERGE_CHECK_SKIP: &str = "SKIP";

/// The persisted state file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Schema version for forward-compatible migrations.
    pub schema_version: u32,

    /// Per repo key: commit-id → PR-set index.
    #[serde(default)]
    pub pr_sets: HashMap<String, HashMap<CommitId, usize>>,

    /// Per repo key: hash of the newest commit the merge check last passed
    /// on, or [`MERGE_CHECK_SKIP`].
    #[serde(default)]
    pub merge_check_commit: HashMap<String, String>,

    /// Opaque display flags, preserved across schema-compatible versions.
    #[serde(default)]
    pub ui_flags: HashMap<String, bool>,
}

impl Default for PersistedState {
    fn default() -> Self {
        PersistedState {
            schema_version: SCHEMA_VERSION,
            pr_sets: HashMap::new(),
            merge_check_commit: HashMap::new(),
            ui_flags: HashMap::new(),
        }
    }
}

impl PersistedState {
    /// The PR-set map for one repository, creating it if absent.
    pub fn pr_sets_mut(&mut self, repo_key: &str) -> &mut HashMap<CommitId, usize> {
        self.pr_sets.entry(repo_key.to_string()).or_default()
    }

    /// Replaces one repository's PR-set map.
    pub fn set_pr_sets(&mut self, repo_key: &str, map: HashMap<CommitId, usize>) {
        if map.is_empty() {
            self.pr_sets.remove(repo_key);
        } else {
            self.pr_sets.insert(repo_key.to_string(), map);
        }
    }

    /// Whether the merge-check gate passes for the given top-of-set commit.
    pub fn merge_check_passes(&self, repo_key: &str, top: &Sha) -> bool {
        match self.merge_check_commit.get(repo_key) {
            Some(recorded) => recorded == MERGE_CHECK_SKIP || recorded == top.as_str(),
            None => false,
        }
    }

    /// Records a successful merge check on `top`.
    pub fn record_merge_check(&mut self, repo_key: &str, top: &Sha) {
        self.merge_check_commit
            .insert(repo_key.to_string(), top.to_string());
    }

    /// Clears the merge-check record after a failed run.
    pub fn clear_merge_check(&mut self, repo_key: &str) {
        self.merge_check_commit.remove(repo_key);
    }
}

/// The default state file location.
pub fn default_path() -> Result<PathBuf> {
    let base = dirs::state_dir()
        .or_else(dirs::config_dir)
        .ok_or_else(|| Error::State("no state or config directory on this platform".into()))?;
    Ok(base.join("spr").join("state.json"))
}

/// Loads the state file, returning defaults when it does not exist yet.
pub fn load(path: &Path) -> Result<PersistedState> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(PersistedState::default())
        }
        Err(e) => return Err(Error::State(format!("reading {}: {}", path.display(), e))),
    };
    let state: PersistedState = serde_json::from_str(&text)
        .map_err(|e| Error::State(format!("parsing {}: {}", path.display(), e)))?;
    if state.schema_version > SCHEMA_VERSION {
        return Err(Error::State(format!(
            "state file {} has schema version {} but this build understands {}",
            path.display(),
            state.schema_version,
            SCHEMA_VERSION
        )));
    }
    Ok(state)
}

/// Saves the state file atomically.
pub fn save(path: &Path, state: &PersistedState) -> Result<()> {
    let io_err = |e: std::io::Error| Error::State(format!("writing {}: {}", path.display(), e));

    let parent = path
        .parent()
        .ok_or_else(|| Error::State(format!("{} has no parent directory", path.display())))?;
    std::fs::create_dir_all(parent).map_err(io_err)?;

    let json = serde_json::to_string_pretty(state)
        .map_err(|e| Error::State(format!("serializing state: {}", e)))?;

    let tmp = path.with_extension("json.tmp");
    {
        let mut file = File::create(&tmp).map_err(io_err)?;
        file.write_all(json.as_bytes()).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
    }
    std::fs::rename(&tmp, path).map_err(io_err)?;

    // fsync the directory so the rename itself survives a crash.
    if let Ok(dir) = File::open(parent) {
        let _ = dir.sync_all();
    }

    Ok(())
}
