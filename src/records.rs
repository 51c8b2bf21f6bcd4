//! Durable checkpoint, branch and pointer records
//!
//! ```text
//! sessions/<session>/
//! ├── state.json                         # SessionState
//! ├── checkpoints/<id>/metadata.json     # CheckpointHeader
//! ├── checkpoints/<id>/manifest.bin      # Vec<FileSnapshot>, bincode
//! └── branches/<id>.json                 # Branch
//! ```
//!
//! Every file is replaced atomically. A checkpoint directory without a
//! `metadata.json` is an interrupted write and is ignored on load.

use crate::branch::Branch;
use crate::checkpoint::{Checkpoint, CheckpointHeader};
use crate::error::{Result, RewindError};
use crate::timeline::{SessionState, SessionTimeline};
use crate::types::FileSnapshot;
use crate::utils::atomic_write;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Longest accepted session identifier
const MAX_SESSION_ID_LEN: usize = 128;

/// Reads and writes the records of every session under one storage root
#[derive(Debug, Clone)]
pub struct SessionRecords {
    root: PathBuf,
}

impl SessionRecords {
    /// Records rooted at `sessions_dir`
    pub fn new(sessions_dir: PathBuf) -> Self {
        Self { root: sessions_dir }
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    fn checkpoint_dir(&self, session_id: &str, checkpoint_id: &str) -> PathBuf {
        self.session_dir(session_id).join("checkpoints").join(checkpoint_id)
    }

    fn branch_path(&self, session_id: &str, branch_id: &str) -> PathBuf {
        self.session_dir(session_id)
            .join("branches")
            .join(format!("{}.json", branch_id))
    }

    /// IDs of every session with a persisted state
    pub fn list_sessions(&self) -> Result<Vec<String>> {
        let mut sessions = Vec::new();
        if !self.root.exists() {
            return Ok(sessions);
        }
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.path().join("state.json").exists() {
                sessions.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        sessions.sort();
        Ok(sessions)
    }

    /// Load one session, `None` if it was never persisted
    pub fn load_session(&self, session_id: &str) -> Result<Option<SessionTimeline>> {
        let dir = self.session_dir(session_id);
        let state_path = dir.join("state.json");
        if !state_path.exists() {
            return Ok(None);
        }
        let state: SessionState = serde_json::from_str(&fs::read_to_string(&state_path)?)?;

        let mut checkpoints = Vec::new();
        let checkpoints_dir = dir.join("checkpoints");
        if checkpoints_dir.exists() {
            for entry in fs::read_dir(&checkpoints_dir)? {
                let entry = entry?;
                if !entry.path().join("metadata.json").exists() {
                    warn!("Skipping incomplete checkpoint record {:?}", entry.path());
                    continue;
                }
                checkpoints.push(read_checkpoint(&entry.path())?);
            }
        }

        let mut branches = Vec::new();
        let branches_dir = dir.join("branches");
        if branches_dir.exists() {
            for entry in fs::read_dir(&branches_dir)? {
                let path = entry?.path();
                if path.extension().is_some_and(|ext| ext == "json") {
                    branches.push(serde_json::from_str::<Branch>(&fs::read_to_string(&path)?)?);
                }
            }
        }

        SessionTimeline::from_records(state, checkpoints, branches).map(Some)
    }

    /// Persist the session pointers
    pub fn write_state(&self, state: &SessionState) -> Result<()> {
        let path = self.session_dir(&state.session_id).join("state.json");
        atomic_write(&path, serde_json::to_string_pretty(state)?.as_bytes())
    }

    /// Persist a checkpoint header and manifest
    ///
    /// The manifest is written first so a visible header always has one.
    pub fn write_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let dir = self.checkpoint_dir(&checkpoint.session_id, &checkpoint.id);
        fs::create_dir_all(&dir)?;

        let manifest = bincode::serde::encode_to_vec(&checkpoint.files, bincode::config::standard())?;
        atomic_write(&dir.join("manifest.bin"), &manifest)?;
        atomic_write(
            &dir.join("metadata.json"),
            serde_json::to_string_pretty(&checkpoint.header())?.as_bytes(),
        )?;

        debug!(
            "Stored checkpoint {} ({} files, {} manifest bytes)",
            checkpoint.short_id(),
            checkpoint.files.len(),
            manifest.len()
        );
        Ok(())
    }

    /// Remove a checkpoint record
    ///
    /// The header goes first so a crash midway leaves an ignorable directory.
    pub fn remove_checkpoint(&self, session_id: &str, checkpoint_id: &str) -> Result<()> {
        let dir = self.checkpoint_dir(session_id, checkpoint_id);
        match fs::remove_file(dir.join("metadata.json")) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }

    /// Persist a branch record
    pub fn write_branch(&self, branch: &Branch) -> Result<()> {
        let path = self.branch_path(&branch.session_id, &branch.id);
        atomic_write(&path, serde_json::to_string_pretty(branch)?.as_bytes())
    }

    /// Remove a branch record
    pub fn remove_branch(&self, session_id: &str, branch_id: &str) -> Result<()> {
        match fs::remove_file(self.branch_path(session_id, branch_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn read_checkpoint(dir: &Path) -> Result<Checkpoint> {
    let header: CheckpointHeader =
        serde_json::from_str(&fs::read_to_string(dir.join("metadata.json"))?)?;
    let manifest_path = dir.join("manifest.bin");
    if !manifest_path.exists() {
        return Err(RewindError::corrupt(format!(
            "Checkpoint {} has no manifest",
            header.id
        )));
    }
    let bytes = fs::read(&manifest_path)?;
    let (files, _): (Vec<FileSnapshot>, _) =
        bincode::serde::decode_from_slice(&bytes, bincode::config::standard())?;
    Checkpoint::from_parts(header, files)
}

/// Reject session IDs that are empty or could escape the sessions directory
pub fn validate_session_id(session_id: &str) -> Result<()> {
    if session_id.trim().is_empty() {
        return Err(RewindError::validation("Session ID must not be empty"));
    }
    if session_id.len() > MAX_SESSION_ID_LEN {
        return Err(RewindError::validation(format!(
            "Session ID longer than {} characters",
            MAX_SESSION_ID_LEN
        )));
    }
    let valid = session_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && session_id != "."
        && session_id != "..";
    if !valid {
        return Err(RewindError::validation(format!(
            "Session ID '{}' may only contain letters, digits, '-', '_' and '.'",
            session_id
        )));
    }
    Ok(())
}
