//! Checkpoint repository
//!
//! Creates and deletes checkpoints for one locked session. Creation reads
//! the tracked files, stores their content, writes the checkpoint record and
//! then moves the session pointers; any failure before the pointers move
//! releases every blob reference taken so far and removes partial records.

use crate::branch::Branch;
use crate::checkpoint::Checkpoint;
use crate::collections::HashSet;
use crate::error::{Result, RewindError};
use crate::records::SessionRecords;
use crate::storage::Storage;
use crate::timeline::SessionTimeline;
use crate::types::FileSnapshot;
use crate::utils::{hash_data, is_binary_content, normalize_tracked_path};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Checkpoint operations over one locked session
pub struct CheckpointRepository<'a> {
    storage: &'a Storage,
    records: &'a SessionRecords,
    workspace: &'a Path,
    max_file_size: u64,
    pool: &'a rayon::ThreadPool,
}

impl<'a> CheckpointRepository<'a> {
    /// Repository reading files under `workspace`
    pub fn new(
        storage: &'a Storage,
        records: &'a SessionRecords,
        workspace: &'a Path,
        max_file_size: u64,
        pool: &'a rayon::ThreadPool,
    ) -> Self {
        Self { storage, records, workspace, max_file_size, pool }
    }

    pub(crate) fn records(&self) -> &'a SessionRecords {
        self.records
    }

    /// Snapshot `tracked_files` as a new checkpoint and make it current
    ///
    /// Paths that do not exist are left out of the manifest. The first
    /// checkpoint of a session also creates its main branch.
    pub fn create(
        &self,
        timeline: &mut SessionTimeline,
        label: &str,
        tracked_files: &[PathBuf],
        description: Option<String>,
    ) -> Result<Checkpoint> {
        let label = label.trim();
        if label.is_empty() {
            return Err(RewindError::validation("Checkpoint label must not be empty"));
        }
        let paths = normalize_paths(tracked_files)?;

        let files = self.store_files(&paths)?;
        let taken: Vec<String> = files.iter().map(|f| f.content_hash.clone()).collect();

        match self.commit(timeline, label, files, description) {
            Ok(checkpoint) => Ok(checkpoint),
            Err(e) => {
                self.storage.release_all(&taken);
                Err(e)
            }
        }
    }

    fn commit(
        &self,
        timeline: &mut SessionTimeline,
        label: &str,
        files: Vec<FileSnapshot>,
        description: Option<String>,
    ) -> Result<Checkpoint> {
        let mut checkpoint = Checkpoint::new(
            timeline.session_id.clone(),
            label,
            timeline.current_checkpoint_id.clone(),
            timeline.current_branch_id.clone(),
            files,
            timeline.next_sequence,
        )
        .with_description(description);

        let new_main = if timeline.main_branch().is_none() {
            let main = Branch::main(timeline.session_id.clone(), checkpoint.id.clone());
            checkpoint.branch_id = Some(main.id.clone());
            Some(main)
        } else {
            None
        };

        let mut state = timeline.state();
        state.current_checkpoint_id = Some(checkpoint.id.clone());
        if let Some(main) = &new_main {
            state.current_branch_id = Some(main.id.clone());
        }
        state.next_sequence = checkpoint.sequence + 1;

        let persisted = self
            .records
            .write_checkpoint(&checkpoint)
            .and_then(|_| match &new_main {
                Some(main) => self.records.write_branch(main),
                None => Ok(()),
            })
            .and_then(|_| self.records.write_state(&state));
        if let Err(e) = persisted {
            if let Err(cleanup) = self.records.remove_checkpoint(&timeline.session_id, &checkpoint.id) {
                warn!("Failed to remove partial checkpoint {}: {}", checkpoint.short_id(), cleanup);
            }
            if let Some(main) = &new_main {
                if let Err(cleanup) = self.records.remove_branch(&timeline.session_id, &main.id) {
                    warn!("Failed to remove partial branch record: {}", cleanup);
                }
            }
            return Err(e);
        }

        timeline.add_checkpoint(checkpoint.clone())?;
        if let Some(main) = new_main {
            timeline.branches.insert(main.id.clone(), main);
        }
        timeline.current_checkpoint_id = state.current_checkpoint_id;
        timeline.current_branch_id = state.current_branch_id;
        timeline.next_sequence = state.next_sequence;

        info!(
            "Created checkpoint {} '{}' in session {} ({} files)",
            checkpoint.short_id(),
            checkpoint.label,
            timeline.session_id,
            checkpoint.files.len()
        );
        Ok(checkpoint)
    }

    /// Read, hash and store every existing path, one reference per file
    fn store_files(&self, paths: &[PathBuf]) -> Result<Vec<FileSnapshot>> {
        let results: Vec<Result<Option<FileSnapshot>>> = self.pool.install(|| {
            paths
                .par_iter()
                .map(|path| {
                    let Some(content) = self.read_tracked(path)? else {
                        return Ok(None);
                    };
                    let hash = self.storage.put(&content)?;
                    Ok(Some(FileSnapshot {
                        path: path.clone(),
                        content_hash: hash,
                        size: content.len() as u64,
                        is_binary: is_binary_content(&content),
                    }))
                })
                .collect()
        });

        let mut files = Vec::with_capacity(results.len());
        let mut first_error = None;
        for result in results {
            match result {
                Ok(Some(file)) => files.push(file),
                Ok(None) => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_error {
            self.storage.release_all(files.iter().map(|f| &f.content_hash));
            return Err(e);
        }
        Ok(files)
    }

    /// Hash the live files without storing anything
    pub fn live_manifest(&self, tracked_files: &[PathBuf]) -> Result<Vec<FileSnapshot>> {
        let paths = normalize_paths(tracked_files)?;
        let results: Vec<Result<Option<FileSnapshot>>> = self.pool.install(|| {
            paths
                .par_iter()
                .map(|path| {
                    Ok(self.read_tracked(path)?.map(|content| FileSnapshot {
                        path: path.clone(),
                        content_hash: hash_data(&content),
                        size: content.len() as u64,
                        is_binary: is_binary_content(&content),
                    }))
                })
                .collect()
        });

        let mut files = Vec::with_capacity(results.len());
        for result in results {
            if let Some(file) = result? {
                files.push(file);
            }
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    /// Content of a tracked file, `None` if no regular file is at the path
    fn read_tracked(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        let full_path = self.workspace.join(path);
        let metadata = match fs::metadata(&full_path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound || under_a_file(&full_path) => {
                debug!("Tracked path {:?} does not exist, skipping", path);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        if metadata.is_dir() {
            debug!("Tracked path {:?} is a directory, skipping", path);
            return Ok(None);
        }
        if self.max_file_size > 0 && metadata.len() > self.max_file_size {
            return Err(RewindError::validation(format!(
                "Tracked file {:?} is {} bytes, over the {} byte limit",
                path,
                metadata.len(),
                self.max_file_size
            )));
        }
        Ok(Some(fs::read(&full_path)?))
    }

    /// Look up a checkpoint of this session
    pub fn get<'t>(&self, timeline: &'t SessionTimeline, checkpoint_id: &str) -> Result<&'t Checkpoint> {
        timeline.get_checkpoint(checkpoint_id)
    }

    /// Every checkpoint of the session, oldest first
    pub fn list_for_session<'t>(&self, timeline: &'t SessionTimeline) -> Vec<&'t Checkpoint> {
        timeline.list_checkpoints()
    }

    /// Delete a checkpoint nothing depends on and release its blobs
    pub fn delete(&self, timeline: &mut SessionTimeline, checkpoint_id: &str) -> Result<Checkpoint> {
        timeline.check_deletable(checkpoint_id)?;
        self.records.remove_checkpoint(&timeline.session_id, checkpoint_id)?;
        let checkpoint = timeline.remove_checkpoint(checkpoint_id)?;
        self.storage
            .release_all(checkpoint.files.iter().map(|f| &f.content_hash));

        info!(
            "Deleted checkpoint {} from session {}",
            checkpoint.short_id(),
            timeline.session_id
        );
        Ok(checkpoint)
    }

    /// Undo a checkpoint this call chain just created
    ///
    /// Used when a later step of the same operation fails. The pointers are
    /// reset to `previous` and the session is persisted in that state.
    pub(crate) fn discard(
        &self,
        timeline: &mut SessionTimeline,
        checkpoint_id: &str,
        previous_checkpoint_id: Option<String>,
    ) -> Result<()> {
        let mut state = timeline.state();
        state.current_checkpoint_id = previous_checkpoint_id;
        self.records.write_state(&state)?;
        timeline.current_checkpoint_id = state.current_checkpoint_id;

        self.records.remove_checkpoint(&timeline.session_id, checkpoint_id)?;
        if let Some(checkpoint) = timeline.detach_checkpoint(checkpoint_id) {
            self.storage
                .release_all(checkpoint.files.iter().map(|f| &f.content_hash));
        }
        debug!("Discarded checkpoint {}", &checkpoint_id[..8.min(checkpoint_id.len())]);
        Ok(())
    }
}

/// Validate, normalize and de-duplicate tracked paths, keeping input order
fn normalize_paths(tracked_files: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut seen: HashSet<PathBuf> = HashSet::default();
    let mut paths = Vec::with_capacity(tracked_files.len());
    for path in tracked_files {
        let normalized = normalize_tracked_path(path)?;
        if seen.insert(normalized.clone()) {
            paths.push(normalized);
        }
    }
    Ok(paths)
}

/// Whether some parent of `path` is a regular file, so `path` cannot exist
fn under_a_file(path: &Path) -> bool {
    path.ancestors().skip(1).any(Path::is_file)
}
