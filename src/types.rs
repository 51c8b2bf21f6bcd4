//! Core data types shared across the engine
//!
//! - **Snapshots**: [`FileSnapshot`] identifies one file's content inside a checkpoint
//! - **Diffs**: [`CheckpointDiff`], [`FileDiff`], [`DiffSummary`], [`DiffOptions`]
//! - **Restore**: [`RestoreResult`]
//! - **Configuration and storage**: [`RewindConfig`], [`StorageMetadata`], [`GcStats`], [`StorageStats`]

use crate::compression::CompressionStrategy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One tracked file inside a checkpoint
///
/// The content itself lives in the content store under `content_hash`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileSnapshot {
    /// Path relative to the workspace root
    pub path: PathBuf,
    /// SHA-256 of the file content, hex encoded
    pub content_hash: String,
    /// Size in bytes
    pub size: u64,
    /// Whether the content looked binary when captured
    pub is_binary: bool,
}

/// How a file differs between two checkpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// Present only in the newer checkpoint
    Added,
    /// Present in both with different content
    Modified,
    /// Present only in the older checkpoint
    Deleted,
}

/// Difference for a single path
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileDiff {
    /// Path relative to the workspace root
    pub path: PathBuf,
    /// Classification of the change
    pub change_type: ChangeType,
    /// Either side is binary
    pub is_binary: bool,
    /// Unified diff text, absent for binary or skipped content
    pub diff_content: Option<String>,
    /// Hash on the `from` side
    pub old_hash: Option<String>,
    /// Hash on the `to` side
    pub new_hash: Option<String>,
    /// Size on the `from` side (0 when added)
    pub old_size: u64,
    /// Size on the `to` side (0 when deleted)
    pub new_size: u64,
    /// Lines inserted
    pub lines_added: usize,
    /// Lines removed
    pub lines_removed: usize,
    /// Content diff skipped because a side exceeded the configured size limit
    #[serde(default)]
    pub content_skipped: bool,
}

/// Aggregate counts across a [`CheckpointDiff`]
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiffSummary {
    /// Number of files added
    pub files_added: usize,
    /// Number of files modified
    pub files_modified: usize,
    /// Number of files deleted
    pub files_deleted: usize,
    /// Lines inserted across all text diffs
    pub lines_added: usize,
    /// Lines removed across all text diffs
    pub lines_removed: usize,
    /// Total size of added files
    pub bytes_added: u64,
    /// Total size of deleted files
    pub bytes_deleted: u64,
    /// Net size change in bytes
    pub size_delta: i64,
}

impl DiffSummary {
    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.files_added > 0 || self.files_modified > 0 || self.files_deleted > 0
    }

    /// Total number of changed files
    pub fn total_files(&self) -> usize {
        self.files_added + self.files_modified + self.files_deleted
    }
}

/// Difference between two checkpoints, computed on demand
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckpointDiff {
    /// Source checkpoint ID
    pub from_id: String,
    /// Target checkpoint ID
    pub to_id: String,
    /// Files only in the target, sorted by path
    pub added: Vec<FileDiff>,
    /// Files whose content changed, sorted by path
    pub modified: Vec<FileDiff>,
    /// Files only in the source, sorted by path
    pub deleted: Vec<FileDiff>,
    /// Aggregate counts
    pub summary: DiffSummary,
}

impl CheckpointDiff {
    /// All file diffs in added, modified, deleted order
    pub fn iter(&self) -> impl Iterator<Item = &FileDiff> {
        self.added.iter().chain(&self.modified).chain(&self.deleted)
    }

    /// True when nothing changed
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// Knobs for the diff engine
#[derive(Debug, Clone)]
pub struct DiffOptions {
    /// Unchanged lines shown around each hunk
    pub context_lines: usize,
    /// Skip line diffs when either side is larger than this (0 = unlimited)
    pub max_content_size: u64,
    /// Only report paths matching one of these globs (empty = all)
    pub path_filter: Vec<String>,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            context_lines: 3,
            max_content_size: 8 * 1024 * 1024,
            path_filter: Vec::new(),
        }
    }
}

/// Outcome of one restore invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RestoreResult {
    /// Whether every planned file operation was applied
    pub success: bool,
    /// Checkpoint the workspace was restored to
    pub restored_checkpoint_id: String,
    /// Checkpoint holding the pre-restore state, if one was taken
    pub backup_checkpoint_id: Option<String>,
    /// Paths of the target checkpoint present in the workspace afterwards, sorted
    pub restored_files: Vec<PathBuf>,
    /// Paths removed from the workspace, sorted
    pub removed_files: Vec<PathBuf>,
    /// Failure description when `success` is false
    pub error: Option<String>,
}

/// Engine configuration, persisted in `metadata.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewindConfig {
    /// Workspace directory whose files are tracked
    pub root_path: PathBuf,
    /// Storage location
    pub storage_path: PathBuf,
    /// Maximum tracked file size (0 = unlimited)
    pub max_file_size: u64,
    /// Threads used to hash and store files
    pub parallel_workers: usize,
    /// Extra ignore patterns for workspace scans (gitignore style)
    pub ignore_patterns: Vec<String>,
    /// Blob compression strategy
    pub compression_strategy: CompressionStrategy,
    /// Context lines for unified diffs
    pub diff_context_lines: usize,
    /// Re-hash blobs on every read
    pub verify_blobs: bool,
    /// Engine version that wrote this config
    pub version: String,
}

/// Metadata stored at the storage root
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageMetadata {
    /// Version of storage format
    pub format_version: u32,
    /// Engine version that created the storage
    pub rewind_version: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last accessed timestamp
    pub last_accessed: DateTime<Utc>,
    /// Configuration
    pub config: RewindConfig,
}

/// Statistics from garbage collection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GcStats {
    /// Number of blob files examined
    pub objects_examined: usize,
    /// Number of blob files deleted
    pub objects_deleted: usize,
    /// Bytes reclaimed
    pub bytes_reclaimed: u64,
    /// Duration in milliseconds
    pub duration_ms: u64,
    /// Hashes with no reference count
    pub unreferenced_objects: Vec<String>,
}

/// Size and population of a storage root
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageStats {
    /// Blob files on disk
    pub object_count: usize,
    /// Bytes used by blob files
    pub total_bytes: u64,
    /// Sum of all reference counts
    pub total_references: u64,
    /// Sessions with at least one checkpoint
    pub session_count: usize,
}
