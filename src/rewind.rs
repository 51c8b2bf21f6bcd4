//! Engine facade
//!
//! [`Rewind`] ties the subsystems together for one workspace and one storage
//! root:
//!
//! - **Storage**: content-addressed blobs with reference counts
//! - **Session records**: checkpoints, branches and pointers per session
//! - **Repository / branch manager**: mutations of one session's timeline
//! - **Diff and restore engines**: comparisons and workspace restores
//!
//! ## Sessions and locking
//!
//! Every session is an independent timeline guarded by its own
//! `parking_lot::RwLock`. Mutations hold the write lock for the whole
//! operation; reads hold the read lock only long enough to copy records.
//! Operations on different sessions never wait on each other.
//!
//! ## Examples
//!
//! ```rust,no_run
//! use rewind::Rewind;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let rewind = Rewind::init(PathBuf::from("./project"), PathBuf::from("./project/.rewind"))?;
//! let files = vec![PathBuf::from("src/main.rs")];
//!
//! let first = rewind.create_checkpoint("agent-1", "before edit", &files)?;
//! // ... the agent edits src/main.rs ...
//! let second = rewind.create_checkpoint("agent-1", "after edit", &files)?;
//!
//! let diff = rewind.diff_checkpoints("agent-1", &first.id, &second.id)?;
//! println!("{} files changed", diff.summary.total_files());
//!
//! rewind.restore_checkpoint("agent-1", &first.id, true, &files)?;
//! # Ok(())
//! # }
//! ```

use crate::branch::{Branch, BranchManager};
use crate::checkpoint::Checkpoint;
use crate::collections::ConcurrentMap;
use crate::compression::CompressionStrategy;
use crate::diff::DiffEngine;
use crate::error::{Result, RewindError};
use crate::file_tracking::WorkspaceScanner;
use crate::records::{validate_session_id, SessionRecords};
use crate::repository::CheckpointRepository;
use crate::restore::RestoreEngine;
use crate::storage::Storage;
use crate::timeline::{SessionTimeline, TimelineMetadata};
use crate::types::{CheckpointDiff, DiffOptions, GcStats, RestoreResult, RewindConfig, StorageStats};
use crate::verification::{StoreVerifier, VerificationReport};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Storage directory name used when none is given
pub const DEFAULT_STORAGE_DIR: &str = ".rewind";

type SessionHandle = Arc<RwLock<SessionTimeline>>;

/// Checkpoint timeline engine for one workspace
///
/// `Rewind` is `Send + Sync`; share it behind an `Arc` to serve several
/// sessions from different threads.
pub struct Rewind {
    root_path: PathBuf,
    storage: Arc<Storage>,
    records: SessionRecords,
    sessions: ConcurrentMap<String, SessionHandle>,
    config: RewindConfig,
    pool: Arc<rayon::ThreadPool>,
}

impl std::fmt::Debug for Rewind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rewind")
            .field("root_path", &self.root_path)
            .field("storage", &self.storage)
            .field("sessions", &self.sessions.len())
            .field("config", &self.config)
            .field("workers", &self.pool.current_num_threads())
            .finish()
    }
}

impl Rewind {
    /// Create or reopen storage for `root_path` with default settings
    ///
    /// # Errors
    ///
    /// Fails if the workspace does not exist or the storage cannot be
    /// created or loaded.
    pub fn init(root_path: PathBuf, storage_path: PathBuf) -> Result<Self> {
        RewindBuilder::new().build(root_path, storage_path)
    }

    /// Open existing storage
    ///
    /// The workspace may have moved since the storage was created; the
    /// given `root_path` is used from now on.
    ///
    /// # Errors
    ///
    /// [`RewindError::StorageNotInitialized`] if there is no storage at
    /// `storage_path`, or [`RewindError::CorruptStore`] if a session's
    /// records are inconsistent.
    #[instrument(skip(storage_path))]
    pub fn open(root_path: PathBuf, storage_path: PathBuf) -> Result<Self> {
        info!("Opening storage at {:?}", storage_path);
        check_workspace(&root_path)?;
        let storage = Storage::open(storage_path)?;
        let mut config = storage.metadata().read().config.clone();
        config.root_path = root_path.clone();
        Self::assemble(root_path, storage, config)
    }

    fn assemble(root_path: PathBuf, storage: Storage, config: RewindConfig) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.parallel_workers.max(1))
            .thread_name(|i| format!("rewind-worker-{}", i))
            .build()
            .map_err(|e| RewindError::InvalidConfiguration(e.to_string()))?;

        let records = SessionRecords::new(storage.sessions_dir());
        let sessions: ConcurrentMap<String, SessionHandle> = ConcurrentMap::default();
        for session_id in records.list_sessions()? {
            if let Some(timeline) = records.load_session(&session_id)? {
                debug!(
                    "Loaded session {} ({} checkpoints, {} branches)",
                    session_id,
                    timeline.checkpoints.len(),
                    timeline.branches.len()
                );
                sessions.insert(session_id, Arc::new(RwLock::new(timeline)));
            }
        }
        info!("Loaded {} sessions", sessions.len());

        Ok(Self {
            root_path,
            storage: Arc::new(storage),
            records,
            sessions,
            config,
            pool: Arc::new(pool),
        })
    }

    /// Handle of an existing, non-empty session
    fn session(&self, session_id: &str) -> Result<SessionHandle> {
        validate_session_id(session_id)?;
        let handle = self
            .sessions
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RewindError::session_not_found(session_id))?;
        if handle.read().is_empty() {
            return Err(RewindError::session_not_found(session_id));
        }
        Ok(handle)
    }

    /// Handle of a session, created empty on first use
    fn session_or_create(&self, session_id: &str) -> Result<SessionHandle> {
        validate_session_id(session_id)?;
        let entry = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(SessionTimeline::new(session_id))));
        Ok(Arc::clone(entry.value()))
    }

    fn repository(&self) -> CheckpointRepository<'_> {
        CheckpointRepository::new(
            &self.storage,
            &self.records,
            &self.root_path,
            self.config.max_file_size,
            &self.pool,
        )
    }

    // ----- checkpoints -----

    /// Snapshot `tracked_files` as a new checkpoint of `session_id`
    ///
    /// The checkpoint's parent is the session's current checkpoint and it
    /// is recorded on the current branch. The first checkpoint of a session
    /// also creates the session and its `main` branch. Paths are relative to
    /// the workspace; paths that do not exist are left out.
    ///
    /// # Errors
    ///
    /// [`RewindError::Validation`] for an empty label, a path leaving the
    /// workspace or a file over the size limit. Nothing is stored on error.
    #[instrument(skip(self, tracked_files), fields(files = tracked_files.len()))]
    pub fn create_checkpoint(
        &self,
        session_id: &str,
        label: &str,
        tracked_files: &[PathBuf],
    ) -> Result<Checkpoint> {
        self.create_checkpoint_with_description(session_id, label, tracked_files, None)
    }

    /// [`create_checkpoint`](Self::create_checkpoint) with a free-form description
    pub fn create_checkpoint_with_description(
        &self,
        session_id: &str,
        label: &str,
        tracked_files: &[PathBuf],
        description: Option<String>,
    ) -> Result<Checkpoint> {
        let handle = self.session_or_create(session_id)?;
        let mut timeline = handle.write();
        self.repository()
            .create(&mut timeline, label, tracked_files, description)
    }

    /// Checkpoints, branches and pointers of a session
    #[instrument(skip(self))]
    pub fn get_timeline(&self, session_id: &str) -> Result<TimelineMetadata> {
        let handle = self.session(session_id)?;
        let timeline = handle.read();
        Ok(timeline.metadata())
    }

    /// Copy of a session's full in-memory timeline
    pub fn get_session(&self, session_id: &str) -> Result<SessionTimeline> {
        let handle = self.session(session_id)?;
        let timeline = handle.read();
        Ok(timeline.clone())
    }

    /// Delete a checkpoint and release its content
    ///
    /// # Errors
    ///
    /// [`RewindError::ReferentialIntegrity`] if the checkpoint has children,
    /// is the origin of a branch or is the current checkpoint. Nothing
    /// changes in that case.
    #[instrument(skip(self))]
    pub fn delete_checkpoint(&self, session_id: &str, checkpoint_id: &str) -> Result<()> {
        let handle = self.session(session_id)?;
        let mut timeline = handle.write();
        self.repository().delete(&mut timeline, checkpoint_id)?;
        Ok(())
    }

    /// Restore the workspace to a checkpoint
    ///
    /// `tracked_files` describes the live state: tracked files missing from
    /// the target are removed, target files are written where they differ.
    /// With `create_backup` the live state is first saved as a checkpoint.
    ///
    /// # Errors
    ///
    /// - [`RewindError::NotFound`] for an unknown checkpoint
    /// - [`RewindError::CorruptStore`] if target content is missing; the
    ///   workspace is untouched and any backup is rolled back
    /// - [`RewindError::PartialRestore`] if applying stopped partway; the
    ///   carried [`RestoreResult`] lists what was applied
    #[instrument(skip(self, tracked_files), fields(files = tracked_files.len()))]
    pub fn restore_checkpoint(
        &self,
        session_id: &str,
        checkpoint_id: &str,
        create_backup: bool,
        tracked_files: &[PathBuf],
    ) -> Result<RestoreResult> {
        let handle = self.session(session_id)?;
        let mut guard = handle.write();
        let timeline: &mut SessionTimeline = &mut guard;
        let repository = self.repository();
        let mut engine = RestoreEngine::new(&self.storage, &repository, &self.root_path);
        self.pool
            .install(|| engine.restore(timeline, checkpoint_id, create_backup, tracked_files))
    }

    // ----- branches -----

    /// Create a branch rooted at `checkpoint_id`
    ///
    /// The session's current branch does not change.
    #[instrument(skip(self))]
    pub fn fork_branch(&self, session_id: &str, checkpoint_id: &str, name: &str) -> Result<Branch> {
        self.fork_branch_with_description(session_id, checkpoint_id, name, None)
    }

    /// [`fork_branch`](Self::fork_branch) with a description
    pub fn fork_branch_with_description(
        &self,
        session_id: &str,
        checkpoint_id: &str,
        name: &str,
        description: Option<String>,
    ) -> Result<Branch> {
        let handle = self.session(session_id)?;
        let mut timeline = handle.write();
        BranchManager::new(&self.records).fork(&mut timeline, checkpoint_id, name, description)
    }

    /// Make a branch current and move to its latest checkpoint
    #[instrument(skip(self))]
    pub fn switch_branch(&self, session_id: &str, branch_id: &str) -> Result<()> {
        let handle = self.session(session_id)?;
        let mut timeline = handle.write();
        BranchManager::new(&self.records).switch(&mut timeline, branch_id)
    }

    /// Delete a branch; its checkpoints stay in the timeline
    #[instrument(skip(self))]
    pub fn delete_branch(&self, session_id: &str, branch_id: &str) -> Result<()> {
        let handle = self.session(session_id)?;
        let mut timeline = handle.write();
        BranchManager::new(&self.records).delete(&mut timeline, branch_id)
    }

    /// Rename a branch
    #[instrument(skip(self))]
    pub fn rename_branch(&self, session_id: &str, branch_id: &str, new_name: &str) -> Result<()> {
        let handle = self.session(session_id)?;
        let mut timeline = handle.write();
        BranchManager::new(&self.records).rename(&mut timeline, branch_id, new_name)
    }

    // ----- diffs -----

    /// Diff two checkpoints of a session with the configured context
    #[instrument(skip(self))]
    pub fn diff_checkpoints(&self, session_id: &str, from_id: &str, to_id: &str) -> Result<CheckpointDiff> {
        let options = DiffOptions {
            context_lines: self.config.diff_context_lines,
            ..Default::default()
        };
        self.diff_checkpoints_with_options(session_id, from_id, to_id, options)
    }

    /// Diff two checkpoints with explicit [`DiffOptions`]
    pub fn diff_checkpoints_with_options(
        &self,
        session_id: &str,
        from_id: &str,
        to_id: &str,
        options: DiffOptions,
    ) -> Result<CheckpointDiff> {
        let (from, to) = {
            let handle = self.session(session_id)?;
            let timeline = handle.read();
            (
                timeline.get_checkpoint(from_id)?.clone(),
                timeline.get_checkpoint(to_id)?.clone(),
            )
        };
        let engine = DiffEngine::new(&self.storage, options)?;
        self.pool.install(|| engine.diff(&from, &to))
    }

    // ----- lookup -----

    /// IDs of every session with at least one checkpoint
    pub fn list_sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| !entry.value().read().is_empty())
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Resolve a checkpoint by full ID or unique prefix
    pub fn resolve_checkpoint(&self, session_id: &str, reference: &str) -> Result<String> {
        let handle = self.session(session_id)?;
        let timeline = handle.read();
        if timeline.checkpoints.contains_key(reference) {
            return Ok(reference.to_string());
        }
        let matches: Vec<&String> = timeline
            .checkpoints
            .keys()
            .filter(|id| !reference.is_empty() && id.starts_with(reference))
            .collect();
        match matches.as_slice() {
            [only] => Ok((*only).clone()),
            [] => Err(RewindError::checkpoint_not_found(reference)),
            _ => Err(RewindError::validation(format!(
                "Checkpoint prefix '{}' matches {} checkpoints",
                reference,
                matches.len()
            ))),
        }
    }

    /// Resolve a branch by ID, name or unique ID prefix
    pub fn resolve_branch(&self, session_id: &str, reference: &str) -> Result<String> {
        let handle = self.session(session_id)?;
        let timeline = handle.read();
        BranchManager::new(&self.records)
            .resolve(&timeline, reference)
            .map(|b| b.id.clone())
    }

    /// Files of the workspace a checkpoint would normally track
    ///
    /// Respects `.gitignore`, the configured ignore patterns and size limit,
    /// and never includes the storage directory.
    pub fn scan_workspace(&self) -> Result<Vec<PathBuf>> {
        WorkspaceScanner::new(self.root_path.clone())
            .with_ignore_patterns(self.config.ignore_patterns.clone())
            .with_max_file_size(self.config.max_file_size)
            .with_parallel_workers(self.config.parallel_workers)
            .exclude_dir(self.storage.root().to_path_buf())
            .scan()
    }

    // ----- maintenance -----

    /// Remove blob files no checkpoint references
    ///
    /// Such files are only left behind by interrupted operations. With
    /// `dry_run` nothing is deleted and the stats describe what would be.
    #[instrument(skip(self))]
    pub fn gc(&self, dry_run: bool) -> Result<GcStats> {
        let start = Instant::now();
        let mut stats = GcStats {
            objects_examined: self.storage.list_all_objects()?.len(),
            ..Default::default()
        };

        for (hash, size) in self.storage.unreferenced_objects()? {
            if dry_run {
                stats.bytes_reclaimed += size;
                stats.unreferenced_objects.push(hash);
                continue;
            }
            match self.storage.remove_unreferenced(&hash) {
                Ok(Some(freed)) => {
                    stats.objects_deleted += 1;
                    stats.bytes_reclaimed += freed;
                    stats.unreferenced_objects.push(hash);
                }
                Ok(None) => debug!("Blob {} gained a reference, keeping it", &hash[..8]),
                Err(e) => warn!("Failed to delete object {}: {}", &hash[..8], e),
            }
        }

        stats.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Garbage collection{} in {}ms: {} unreferenced objects, {} bytes",
            if dry_run { " (dry run)" } else { "" },
            stats.duration_ms,
            stats.unreferenced_objects.len(),
            stats.bytes_reclaimed
        );
        Ok(stats)
    }

    /// Cross-check every session against the content store
    #[instrument(skip(self))]
    pub fn verify(&self) -> Result<VerificationReport> {
        let timelines: Vec<SessionTimeline> = self
            .sessions
            .iter()
            .map(|entry| entry.value().read().clone())
            .filter(|timeline| !timeline.is_empty())
            .collect();
        let verifier = StoreVerifier::new(&self.storage);
        self.pool.install(|| verifier.verify(&timelines, true))
    }

    /// Population and size of the storage root
    pub fn storage_stats(&self) -> Result<StorageStats> {
        let objects = self.storage.list_all_objects()?;
        Ok(StorageStats {
            object_count: objects.len(),
            total_bytes: objects.iter().map(|(_, size)| size).sum(),
            total_references: self
                .storage
                .referenced_hashes()
                .iter()
                .map(|(_, count)| count)
                .sum(),
            session_count: self.list_sessions().len(),
        })
    }

    // ----- accessors -----

    /// Workspace directory
    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Storage root directory
    pub fn storage_path(&self) -> &Path {
        self.storage.root()
    }

    /// Effective configuration
    pub fn config(&self) -> &RewindConfig {
        &self.config
    }

    /// Content store
    pub fn storage(&self) -> &Storage {
        &self.storage
    }
}

fn check_workspace(root_path: &Path) -> Result<()> {
    if !root_path.is_dir() {
        return Err(RewindError::InvalidConfiguration(format!(
            "Workspace {:?} is not a directory",
            root_path
        )));
    }
    Ok(())
}

/// Builder for [`Rewind`] with custom settings
///
/// Settings apply when the storage is created. Opening existing storage
/// uses the configuration saved in it.
///
/// ```rust,no_run
/// use rewind::{CompressionStrategy, RewindBuilder};
/// use std::path::PathBuf;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let rewind = RewindBuilder::new()
///     .compression_strategy(CompressionStrategy::Adaptive { min_size: 4096 })
///     .max_file_size(50 * 1024 * 1024)
///     .ignore_patterns(vec!["target/".to_string(), "*.log".to_string()])
///     .build(PathBuf::from("./project"), PathBuf::from("./project/.rewind"))?;
/// # Ok(())
/// # }
/// ```
///
/// # Default Values
///
/// - `compression_strategy`: `CompressionStrategy::Fast`
/// - `ignore_patterns`: empty
/// - `max_file_size`: 0 (no limit)
/// - `parallel_workers`: number of CPU cores
/// - `diff_context_lines`: 3
/// - `verify_blobs`: true
#[derive(Debug, Clone)]
pub struct RewindBuilder {
    compression_strategy: CompressionStrategy,
    ignore_patterns: Vec<String>,
    max_file_size: u64,
    parallel_workers: usize,
    diff_context_lines: usize,
    verify_blobs: bool,
}

impl RewindBuilder {
    /// Builder with default settings
    pub fn new() -> Self {
        Self {
            compression_strategy: CompressionStrategy::default(),
            ignore_patterns: Vec::new(),
            max_file_size: 0,
            parallel_workers: num_cpus::get(),
            diff_context_lines: 3,
            verify_blobs: true,
        }
    }

    /// How blobs are compressed
    pub fn compression_strategy(mut self, strategy: CompressionStrategy) -> Self {
        self.compression_strategy = strategy;
        self
    }

    /// Gitignore-style patterns excluded from workspace scans
    pub fn ignore_patterns(mut self, patterns: Vec<String>) -> Self {
        self.ignore_patterns = patterns;
        self
    }

    /// Largest file a checkpoint may track, in bytes (0 = no limit)
    ///
    /// Tracking a larger file fails the checkpoint with a validation error.
    pub fn max_file_size(mut self, size: u64) -> Self {
        self.max_file_size = size;
        self
    }

    /// Threads used for hashing and diffing (minimum 1)
    pub fn parallel_workers(mut self, count: usize) -> Self {
        self.parallel_workers = count.max(1);
        self
    }

    /// Context lines around each hunk of a unified diff
    pub fn diff_context_lines(mut self, lines: usize) -> Self {
        self.diff_context_lines = lines;
        self
    }

    /// Re-hash blob content on every read
    pub fn verify_blobs(mut self, verify: bool) -> Self {
        self.verify_blobs = verify;
        self
    }

    /// Create the storage, or open it if it already exists
    #[instrument(skip(self))]
    pub fn build(self, root_path: PathBuf, storage_path: PathBuf) -> Result<Rewind> {
        if storage_path.join("metadata.json").exists() {
            return Rewind::open(root_path, storage_path);
        }
        check_workspace(&root_path)?;
        info!("Initializing storage at {:?} for {:?}", storage_path, root_path);

        let config = RewindConfig {
            root_path: root_path.clone(),
            storage_path: storage_path.clone(),
            max_file_size: self.max_file_size,
            parallel_workers: self.parallel_workers,
            ignore_patterns: self.ignore_patterns,
            compression_strategy: self.compression_strategy,
            diff_context_lines: self.diff_context_lines,
            verify_blobs: self.verify_blobs,
            version: env!("CARGO_PKG_VERSION").to_string(),
        };
        let storage = Storage::init(storage_path, config.clone())?;
        Rewind::assemble(root_path, storage, config)
    }
}

impl Default for RewindBuilder {
    fn default() -> Self {
        Self::new()
    }
}
