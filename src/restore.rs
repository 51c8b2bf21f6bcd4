//! Restore engine
//!
//! A restore moves the live workspace to the manifest of a target checkpoint.
//! One invocation walks through [`RestorePhase`]s in order:
//!
//! 1. **BackingUp** (optional): snapshot the tracked files as a backup checkpoint.
//! 2. **Diffing**: hash the live tracked files and compare them with the target
//!    to find the files to write and the files to remove.
//! 3. **Staging**: copy every blob needed for the writes into a temporary
//!    directory in the storage root. A missing or corrupt blob aborts here,
//!    before the workspace is touched, and the backup is rolled back.
//! 4. **Applying**: remove files absent from the target, then move staged files
//!    into place. Removing first frees paths that switch between a file and a
//!    directory. The first I/O failure stops the restore and is reported as
//!    [`RewindError::PartialRestore`] with exact accounting of what was applied.
//!
//! Only a fully applied restore whose new pointer was persisted moves the
//! session's current checkpoint. Any later failure is still reported as a
//! partial restore, since the workspace has already changed.

use crate::checkpoint::Checkpoint;
use crate::diff::compare_manifests;
use crate::error::{Result, RewindError};
use crate::repository::CheckpointRepository;
use crate::storage::Storage;
use crate::timeline::SessionTimeline;
use crate::types::{FileSnapshot, RestoreResult};
use crate::utils::{atomic_write, prune_empty_parents};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Stage of a single restore invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestorePhase {
    /// Not started
    Idle,
    /// Creating the backup checkpoint
    BackingUp,
    /// Comparing live files with the target
    Diffing,
    /// Reading blobs into the staging area
    Staging,
    /// Changing the workspace
    Applying,
    /// Every planned change was applied
    Completed,
    /// Applying stopped at an I/O failure
    PartiallyFailed,
}

/// File operations needed to reach a target manifest
#[derive(Debug, Clone, Default)]
pub struct RestorePlan {
    /// Target entries whose content must be written, sorted by path
    pub writes: Vec<FileSnapshot>,
    /// Live paths absent from the target, sorted
    pub removals: Vec<PathBuf>,
    /// Target paths already matching the live content, sorted
    pub unchanged: Vec<PathBuf>,
}

impl RestorePlan {
    /// Plan the move from the `live` manifest to `target`
    pub fn new(live: &[FileSnapshot], target: &[FileSnapshot]) -> Self {
        let changes = compare_manifests(live, target);
        let mut writes: Vec<FileSnapshot> = changes
            .added
            .into_iter()
            .chain(changes.modified.into_iter().map(|(_, new)| new))
            .cloned()
            .collect();
        writes.sort_by(|a, b| a.path.cmp(&b.path));

        Self {
            writes,
            removals: changes.deleted.into_iter().map(|f| f.path.clone()).collect(),
            unchanged: changes.unchanged.into_iter().map(|f| f.path.clone()).collect(),
        }
    }

    /// Nothing to write or remove
    pub fn is_noop(&self) -> bool {
        self.writes.is_empty() && self.removals.is_empty()
    }
}

/// Applies checkpoints to the workspace for one locked session
pub struct RestoreEngine<'a> {
    storage: &'a Storage,
    repository: &'a CheckpointRepository<'a>,
    workspace: &'a Path,
    phase: RestorePhase,
}

impl<'a> RestoreEngine<'a> {
    /// Engine writing into `workspace`
    pub fn new(
        storage: &'a Storage,
        repository: &'a CheckpointRepository<'a>,
        workspace: &'a Path,
    ) -> Self {
        Self { storage, repository, workspace, phase: RestorePhase::Idle }
    }

    fn enter(&mut self, phase: RestorePhase) {
        debug!("Restore phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    /// Restore `checkpoint_id` over the given tracked files
    pub fn restore(
        &mut self,
        timeline: &mut SessionTimeline,
        checkpoint_id: &str,
        create_backup: bool,
        tracked_files: &[PathBuf],
    ) -> Result<RestoreResult> {
        let target = timeline.get_checkpoint(checkpoint_id)?.clone();
        let previous_checkpoint_id = timeline.current_checkpoint_id.clone();

        let backup = if create_backup {
            self.enter(RestorePhase::BackingUp);
            let label = format!("Backup before restore to {}", target.label);
            Some(self.repository.create(timeline, &label, tracked_files, None)?)
        } else {
            None
        };

        let prepared = self.prepare(&target, tracked_files);
        let (plan, staging) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                if let Some(backup) = &backup {
                    self.rollback_backup(timeline, backup, previous_checkpoint_id);
                }
                return Err(e);
            }
        };

        self.enter(RestorePhase::Applying);
        let backup_checkpoint_id = backup.map(|b| b.id);
        let mut result = RestoreResult {
            success: false,
            restored_checkpoint_id: target.id.clone(),
            backup_checkpoint_id,
            restored_files: Vec::new(),
            removed_files: Vec::new(),
            error: None,
        };

        if let Err(message) = self.apply(&plan, staging.as_ref(), &mut result) {
            self.enter(RestorePhase::PartiallyFailed);
            result.restored_files.sort();
            result.removed_files.sort();
            result.error = Some(message);
            warn!(
                "Restore to {} stopped after {} writes and {} removals: {}",
                target.short_id(),
                result.restored_files.len(),
                result.removed_files.len(),
                result.error.as_deref().unwrap_or_default()
            );
            return Err(RewindError::PartialRestore(Box::new(result)));
        }

        result.restored_files = target.files.iter().map(|f| f.path.clone()).collect();
        result.restored_files.sort();
        result.removed_files.sort();

        let mut state = timeline.state();
        state.current_checkpoint_id = Some(target.id.clone());
        if let Err(e) = self.repository.records().write_state(&state) {
            self.enter(RestorePhase::PartiallyFailed);
            warn!(
                "Restored files of {} but could not persist the session pointer: {}",
                target.short_id(),
                e
            );
            result.error = Some(format!(
                "Workspace restored but the current checkpoint was not persisted: {}",
                e
            ));
            return Err(RewindError::PartialRestore(Box::new(result)));
        }
        timeline.current_checkpoint_id = state.current_checkpoint_id;

        self.enter(RestorePhase::Completed);
        result.success = true;

        info!(
            "Restored checkpoint {} ({} written, {} unchanged, {} removed)",
            target.short_id(),
            plan.writes.len(),
            plan.unchanged.len(),
            result.removed_files.len()
        );
        Ok(result)
    }

    /// Diff the live files against the target and stage the needed blobs
    fn prepare(
        &mut self,
        target: &Checkpoint,
        tracked_files: &[PathBuf],
    ) -> Result<(RestorePlan, Option<tempfile::TempDir>)> {
        self.enter(RestorePhase::Diffing);
        let live = self.repository.live_manifest(tracked_files)?;
        let plan = RestorePlan::new(&live, &target.files);
        debug!(
            "Restore plan: {} writes, {} removals, {} unchanged",
            plan.writes.len(),
            plan.removals.len(),
            plan.unchanged.len()
        );

        if plan.is_noop() {
            debug!("Workspace already matches checkpoint {}", target.short_id());
            return Ok((plan, None));
        }

        self.enter(RestorePhase::Staging);
        let staging_root = self.storage.staging_dir();
        fs::create_dir_all(&staging_root)?;
        let staging = tempfile::Builder::new()
            .prefix("restore-")
            .tempdir_in(&staging_root)?;
        for (index, file) in plan.writes.iter().enumerate() {
            let content = self.storage.get_referenced(&file.content_hash)?;
            fs::write(staging.path().join(index.to_string()), content)?;
        }
        Ok((plan, Some(staging)))
    }

    /// Remove stale files and move staged files into place, stopping at the first failure
    fn apply(
        &self,
        plan: &RestorePlan,
        staging: Option<&tempfile::TempDir>,
        result: &mut RestoreResult,
    ) -> std::result::Result<(), String> {
        for path in &plan.removals {
            let full_path = self.workspace.join(path);
            match fs::remove_file(&full_path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(format!("Failed to remove {}: {}", path.display(), e)),
            }
            if let Err(e) = prune_empty_parents(&full_path, self.workspace) {
                debug!("Could not prune parents of {:?}: {}", path, e);
            }
            result.removed_files.push(path.clone());
        }

        let Some(staging) = staging else {
            return Ok(());
        };
        for (index, file) in plan.writes.iter().enumerate() {
            let destination = self.workspace.join(&file.path);
            place_file(&staging.path().join(index.to_string()), &destination)
                .map_err(|e| format!("Failed to write {}: {}", file.path.display(), e))?;
            result.restored_files.push(file.path.clone());
        }
        Ok(())
    }

    fn rollback_backup(
        &mut self,
        timeline: &mut SessionTimeline,
        backup: &Checkpoint,
        previous_checkpoint_id: Option<String>,
    ) {
        if let Err(e) = self
            .repository
            .discard(timeline, &backup.id, previous_checkpoint_id)
        {
            warn!("Failed to roll back backup checkpoint {}: {}", backup.short_id(), e);
        }
    }
}

/// Replace `destination` with the staged file
///
/// Falls back to an atomic copy when a rename is not possible, e.g. when the
/// storage root is on another filesystem.
fn place_file(staged: &Path, destination: &Path) -> Result<()> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    if fs::rename(staged, destination).is_ok() {
        return Ok(());
    }
    let content = fs::read(staged)?;
    atomic_write(destination, &content)
}
